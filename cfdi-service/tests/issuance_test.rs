mod common;

use cfdi_service::engine::IssueRequest;
use cfdi_service::error::CfdiError;
use cfdi_service::gateway::{DocumentReceiver, GatewayError, IssuerCredentials};
use cfdi_service::models::{
    ActorRef, CfdiType, NotificationOutcome, PaymentForm, PaymentMethod, PUBLIC_GENERAL_RFC,
};
use chrono::{Duration, Utc};
use common::{TestContext, BRANCH_EMAIL, ISSUER_RFC, SUPPLIER_EMAIL};
use rust_decimal_macros::dec;
use uuid::Uuid;

fn request(order_details_id: Uuid) -> IssueRequest {
    IssueRequest {
        order_details_id,
        cfdi_type: CfdiType::Ingreso,
        payment_form: PaymentForm::new("03").unwrap(),
        expedition_place: None,
        issue_date: None,
        payment_method: PaymentMethod::Pue,
    }
}

#[tokio::test]
async fn issues_invoice_for_a_registered_receiver() {
    let ctx = TestContext::new();
    let (order, details) = ctx.add_standard_order();

    let result = ctx
        .engine
        .issue_invoice(request(details.order_details_id), &ctx.actor_ref())
        .await
        .expect("invoice issued");

    assert_eq!(result.folio, 1);
    assert_eq!(result.series.as_deref(), Some("A"));
    assert_eq!(result.subtotal, dec!(150.00));
    assert_eq!(result.tax, dec!(24.00));
    assert_eq!(result.total, dec!(174.00));
    assert_eq!(result.payment_method, PaymentMethod::Pue);
    assert_eq!(result.issuer.rfc, ISSUER_RFC);
    assert_eq!(result.receiver.rfc, common::RECEIVER_RFC);
    assert_eq!(result.order_details_ids, vec![details.order_details_id]);
    assert!(result.pdf.is_some());
    assert!(result.xml.is_some());
    assert_eq!(result.notification, NotificationOutcome::Sent);

    let documents = ctx.provider.issued_invoices();
    assert_eq!(documents.len(), 1);
    let document = &documents[0];
    assert_eq!(document.expedition_place, "64000");
    assert_eq!(document.currency, "MXN");
    assert!(document.global.is_none());
    assert!(document.observations.contains(&order.order_number));
    assert!(document.observations.ends_with("Sucursal Centro"));
    match &document.receiver {
        DocumentReceiver::Registered { cfdi_use, .. } => assert_eq!(cfdi_use, "G03"),
        other => panic!("expected a registered receiver, got {other:?}"),
    }
    let shipping = document.items.last().unwrap();
    assert_eq!(shipping.product_key, "78102203");
    assert_eq!(shipping.unit_key, "E48");
    assert_eq!(shipping.subtotal, dec!(50.0000));

    let stored = ctx.store.invoice(result.invoice_id);
    assert!(stored.is_active());
    assert_eq!(stored.created_by, ctx.actor.actor_id);

    let sent = ctx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, "invoice_issued");
    assert_eq!(
        sent[0].to,
        vec![BRANCH_EMAIL.to_string(), SUPPLIER_EMAIL.to_string()]
    );
    assert_eq!(sent[0].attachments.len(), 2);
}

#[tokio::test]
async fn second_issuance_for_the_same_details_is_a_duplicate() {
    let ctx = TestContext::new();
    let (_, details) = ctx.add_standard_order();

    ctx.engine
        .issue_invoice(request(details.order_details_id), &ctx.actor_ref())
        .await
        .unwrap();
    let err = ctx
        .engine
        .issue_invoice(request(details.order_details_id), &ctx.actor_ref())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CfdiError::DuplicateInvoice { order_details_id } if order_details_id == details.order_details_id
    ));
    assert_eq!(ctx.provider.call_count("issue_invoice"), 1);
    assert_eq!(ctx.store.invoices().len(), 1);
}

#[tokio::test]
async fn receiver_is_registered_once_and_folios_increase() {
    let ctx = TestContext::new();
    let (_, first) = ctx.add_standard_order();
    let (_, second) = ctx.add_standard_order();

    let a = ctx
        .engine
        .issue_invoice(request(first.order_details_id), &ctx.actor_ref())
        .await
        .unwrap();
    let b = ctx
        .engine
        .issue_invoice(request(second.order_details_id), &ctx.actor_ref())
        .await
        .unwrap();

    assert_eq!(a.folio, 1);
    assert_eq!(b.folio, 2);
    assert_ne!(a.fiscal_uuid, b.fiscal_uuid);
    assert_eq!(ctx.provider.call_count("create_client"), 1);
    assert!(ctx
        .store
        .branch_fiscal(ctx.branch_id)
        .provider_customer_id
        .is_some());
}

#[tokio::test]
async fn deferred_payment_forces_payment_form_99() {
    let ctx = TestContext::new();
    let (_, details) = ctx.add_standard_order();
    let mut req = request(details.order_details_id);
    req.payment_method = PaymentMethod::Ppd;

    let result = ctx
        .engine
        .issue_invoice(req, &ctx.actor_ref())
        .await
        .unwrap();

    assert_eq!(result.payment_method, PaymentMethod::Ppd);
    let document = &ctx.provider.issued_invoices()[0];
    assert!(document.payment_form.is_to_be_defined());
    assert!(ctx.store.invoice(result.invoice_id).payment_form.is_to_be_defined());
}

#[tokio::test]
async fn general_public_receiver_gets_the_global_block() {
    let ctx = TestContext::new();
    ctx.store.set_branch_rfc(ctx.branch_id, PUBLIC_GENERAL_RFC);
    let (_, details) = ctx.add_standard_order();
    let mut req = request(details.order_details_id);
    req.payment_method = PaymentMethod::Ppd;
    req.cfdi_type = CfdiType::Egreso;

    let result = ctx
        .engine
        .issue_invoice(req, &ctx.actor_ref())
        .await
        .unwrap();

    assert_eq!(result.cfdi_type, CfdiType::Ingreso);
    assert_eq!(result.payment_method, PaymentMethod::Pue);
    assert_eq!(result.receiver.rfc, PUBLIC_GENERAL_RFC);
    assert_eq!(result.receiver.tax_regime, "616");

    let document = &ctx.provider.issued_invoices()[0];
    let global = document.global.as_ref().expect("global block");
    assert_eq!(global.periodicity, "04");
    match &document.receiver {
        DocumentReceiver::Inline { customer, cfdi_use } => {
            assert_eq!(customer.tax_id, PUBLIC_GENERAL_RFC);
            assert_eq!(cfdi_use, "S01");
        }
        other => panic!("expected an inline receiver, got {other:?}"),
    }
    assert_eq!(ctx.provider.call_count("create_client"), 0);
}

#[tokio::test]
async fn tax_mismatch_aborts_before_any_side_effect() {
    let ctx = TestContext::new();
    let (_, details) = ctx.add_standard_order();
    ctx.store
        .set_recorded_tax(details.order_details_id, dec!(25.00));

    let err = ctx
        .engine
        .issue_invoice(request(details.order_details_id), &ctx.actor_ref())
        .await
        .unwrap_err();

    match err {
        CfdiError::TaxMismatch { computed, recorded } => {
            assert_eq!(computed, dec!(24.00));
            assert_eq!(recorded, dec!(25.00));
        }
        other => panic!("expected TaxMismatch, got {other:?}"),
    }
    assert_eq!(ctx.provider.call_count("issue_invoice"), 0);
    assert_eq!(ctx.store.last_folio(ctx.business_id), None);
    assert!(ctx.store.invoices().is_empty());
}

#[tokio::test]
async fn issuer_without_usable_certificate_is_rejected() {
    let ctx = TestContext::new();
    ctx.provider.set_issuer(IssuerCredentials {
        rfc: ISSUER_RFC.to_string(),
        legal_name: "Proveedora SA".to_string(),
        has_certificate: true,
        certificate_expires_utc: Some(Utc::now() - Duration::days(1)),
    });
    let (_, details) = ctx.add_standard_order();

    let err = ctx
        .engine
        .issue_invoice(request(details.order_details_id), &ctx.actor_ref())
        .await
        .unwrap_err();

    assert!(matches!(err, CfdiError::CredentialMissing { ref rfc } if rfc == ISSUER_RFC));
    assert_eq!(ctx.store.last_folio(ctx.business_id), None);
    assert_eq!(ctx.provider.call_count("issue_invoice"), 0);
}

#[tokio::test]
async fn provider_rejection_keeps_its_message_and_leaves_a_folio_gap() {
    let ctx = TestContext::new();
    ctx.provider.fail_on(
        "issue_invoice",
        GatewayError::with_code("El RFC del receptor no existe", "CFDI40145"),
    );
    let (_, details) = ctx.add_standard_order();

    let err = ctx
        .engine
        .issue_invoice(request(details.order_details_id), &ctx.actor_ref())
        .await
        .unwrap_err();

    match err {
        CfdiError::Provider { message, code } => {
            assert_eq!(message, "El RFC del receptor no existe");
            assert_eq!(code.as_deref(), Some("CFDI40145"));
        }
        other => panic!("expected Provider, got {other:?}"),
    }
    assert!(ctx.store.invoices().is_empty());
    assert_eq!(ctx.store.last_folio(ctx.business_id), Some(1));
    assert!(ctx.notifier.sent().is_empty());

    ctx.provider.clear_failures();
    let retry = ctx
        .engine
        .issue_invoice(request(details.order_details_id), &ctx.actor_ref())
        .await
        .unwrap();
    assert_eq!(retry.folio, 2);
}

#[tokio::test]
async fn artifact_download_failure_does_not_fail_issuance() {
    let ctx = TestContext::new();
    ctx.provider
        .fail_on("fetch_pdf", GatewayError::new("pdf not ready"));
    let (_, details) = ctx.add_standard_order();

    let result = ctx
        .engine
        .issue_invoice(request(details.order_details_id), &ctx.actor_ref())
        .await
        .unwrap();

    assert!(result.pdf.is_none());
    assert!(result.xml.is_some());
    let sent = ctx.notifier.sent();
    assert_eq!(sent[0].attachments.len(), 1);
    assert!(sent[0].attachments[0].filename.ends_with(".xml"));
}

#[tokio::test]
async fn notification_outcome_is_reported_without_failing() {
    let ctx = TestContext::new();
    ctx.notifier.fail_with("smtp down");
    let (_, details) = ctx.add_standard_order();

    let result = ctx
        .engine
        .issue_invoice(request(details.order_details_id), &ctx.actor_ref())
        .await
        .unwrap();

    assert!(result.notification.is_failure());
    assert_eq!(ctx.store.invoices().len(), 1);
}

#[tokio::test]
async fn notification_is_skipped_without_recipients() {
    let ctx = TestContext::new();
    ctx.store.set_branch_email(ctx.branch_id, None);
    ctx.store.remove_business_email(ctx.business_id);
    let (_, details) = ctx.add_standard_order();

    let result = ctx
        .engine
        .issue_invoice(request(details.order_details_id), &ctx.actor_ref())
        .await
        .unwrap();

    assert!(matches!(result.notification, NotificationOutcome::Skipped(_)));
    assert!(ctx.notifier.sent().is_empty());
}

#[tokio::test]
async fn unknown_actor_is_rejected_before_stamping() {
    let ctx = TestContext::new();
    let (_, details) = ctx.add_standard_order();

    let err = ctx
        .engine
        .issue_invoice(
            request(details.order_details_id),
            &ActorRef::ByExternalId("nobody".to_string()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CfdiError::ActorNotFound(ref id) if id == "nobody"));
    assert!(ctx.provider.calls().is_empty());
}

#[tokio::test]
async fn explicit_actor_skips_the_directory() {
    let ctx = TestContext::new();
    let (_, details) = ctx.add_standard_order();
    let mut actor = ctx.actor.clone();
    actor.actor_id = Uuid::new_v4();
    actor.external_id = None;

    let result = ctx
        .engine
        .issue_invoice(request(details.order_details_id), &ActorRef::Explicit(actor.clone()))
        .await
        .unwrap();

    assert_eq!(ctx.store.invoice(result.invoice_id).created_by, actor.actor_id);
}

#[tokio::test]
async fn stale_issue_date_and_unsupported_types_are_invalid() {
    let ctx = TestContext::new();
    let (_, details) = ctx.add_standard_order();

    let mut stale = request(details.order_details_id);
    stale.issue_date = Some(Utc::now() - Duration::hours(73));
    let err = ctx
        .engine
        .issue_invoice(stale, &ctx.actor_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, CfdiError::Validation(_)));

    let mut pago = request(details.order_details_id);
    pago.cfdi_type = CfdiType::Pago;
    let err = ctx
        .engine
        .issue_invoice(pago, &ctx.actor_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, CfdiError::Validation(_)));

    assert!(ctx.provider.calls().is_empty());
}

#[tokio::test]
async fn unknown_order_details_is_not_found() {
    let ctx = TestContext::new();

    let err = ctx
        .engine
        .issue_invoice(request(Uuid::new_v4()), &ctx.actor_ref())
        .await
        .unwrap_err();

    assert!(matches!(err, CfdiError::NotFound(_)));
}
