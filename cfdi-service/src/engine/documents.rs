//! Stamping pipeline shared by single-order and consolidated issuance.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use tracing::instrument;
use uuid::Uuid;

use super::InvoiceEngine;
use crate::error::{CfdiError, CfdiResult};
use crate::gateway::{DocumentReceiver, GlobalInformation, InvoiceDocument, ProviderCustomer};
use crate::line_items;
use crate::models::{
    is_public_general_rfc, Actor, BranchFiscal, CfdiType, FiscalCertificate, Invoice,
    InvoiceResult, LineItem, NewInvoice, NotificationOutcome, PartySummary, PaymentForm,
    PaymentMethod, SupplierUnit,
};
use crate::notifications::{Attachment, Notification, NotifyError};
use crate::services::metrics::INVOICED_AMOUNT_TOTAL;

/// Tax regime and CFDI use the authority mandates for general-public receivers.
const PUBLIC_TAX_REGIME: &str = "616";
const PUBLIC_CFDI_USE: &str = "S01";
/// Monthly periodicity for the global information block.
const GLOBAL_PERIODICITY: &str = "04";

/// Month/year block for a general-public invoice issued at `issued_utc`.
pub(super) fn global_information(issued_utc: DateTime<Utc>) -> GlobalInformation {
    GlobalInformation {
        periodicity: GLOBAL_PERIODICITY.to_string(),
        months: format!("{:02}", issued_utc.month()),
        year: issued_utc.year(),
    }
}

/// Best-effort PDF/XML of a stamped document.
#[derive(Debug, Default)]
pub(super) struct Artifacts {
    pub pdf: Option<Vec<u8>>,
    pub xml: Option<Vec<u8>>,
}

impl Artifacts {
    pub fn encoded(&self) -> (Option<String>, Option<String>) {
        (
            self.pdf.as_ref().map(|b| STANDARD.encode(b)),
            self.xml.as_ref().map(|b| STANDARD.encode(b)),
        )
    }

    pub fn attachments(&self, base_name: &str) -> Vec<Attachment> {
        let mut attachments = Vec::new();
        if let Some(pdf) = &self.pdf {
            attachments.push(Attachment {
                filename: format!("{}.pdf", base_name),
                content_type: "application/pdf".to_string(),
                content: pdf.clone(),
            });
        }
        if let Some(xml) = &self.xml {
            attachments.push(Attachment {
                filename: format!("{}.xml", base_name),
                content_type: "application/xml".to_string(),
                content: xml.clone(),
            });
        }
        attachments
    }
}

/// Everything needed to stamp and persist one invoice.
pub(super) struct InvoicePlan<'a> {
    pub actor: &'a Actor,
    pub certificate: &'a FiscalCertificate,
    pub unit: &'a SupplierUnit,
    pub branch_fiscal: BranchFiscal,
    pub restaurant_branch_id: Uuid,
    /// Treat the receiver as general public even if its RFC is not a placeholder.
    pub force_public_general: bool,
    pub cfdi_type: CfdiType,
    pub payment_method: PaymentMethod,
    pub payment_form: PaymentForm,
    pub expedition_place: String,
    pub issued_utc: DateTime<Utc>,
    pub items: Vec<LineItem>,
    pub observations: String,
    pub order_details_ids: Vec<Uuid>,
    pub amount_kind: &'static str,
}

pub(super) struct StampedInvoice {
    pub invoice: Invoice,
    pub issuer: PartySummary,
    pub receiver: PartySummary,
    pub issued_utc: DateTime<Utc>,
    pub artifacts: Artifacts,
    pub order_details_ids: Vec<Uuid>,
}

impl StampedInvoice {
    pub fn into_result(self, notification: NotificationOutcome) -> InvoiceResult {
        let (pdf, xml) = self.artifacts.encoded();
        InvoiceResult {
            invoice_id: self.invoice.invoice_id,
            provider_id: self.invoice.provider_id,
            fiscal_uuid: self.invoice.fiscal_uuid,
            folio: self.invoice.folio,
            series: self.invoice.series,
            cfdi_type: self.invoice.cfdi_type,
            payment_method: self.invoice.payment_method,
            issuer: self.issuer,
            receiver: self.receiver,
            subtotal: self.invoice.subtotal,
            tax: self.invoice.tax,
            total: self.invoice.total,
            issued_utc: self.issued_utc,
            pdf,
            xml,
            order_details_ids: self.order_details_ids,
            notification,
        }
    }
}

impl InvoiceEngine {
    /// The issuer must hold usable credentials at the provider.
    pub(super) async fn ensure_credentials(&self, certificate: &FiscalCertificate) -> CfdiResult<()> {
        let credentials = self
            .deps
            .provider
            .get_issuer_credentials(&certificate.rfc)
            .await?;
        match credentials {
            Some(credentials) if credentials.is_usable(Utc::now()) => Ok(()),
            _ => Err(CfdiError::CredentialMissing {
                rfc: certificate.rfc.clone(),
            }),
        }
    }

    /// Provider customer id for the branch, registering it the first time.
    #[instrument(skip(self, fiscal), fields(branch_id = %fiscal.restaurant_branch_id))]
    pub(super) async fn ensure_registered(&self, fiscal: &BranchFiscal) -> CfdiResult<String> {
        if let Some(customer_id) = &fiscal.provider_customer_id {
            return Ok(customer_id.clone());
        }

        let customer = ProviderCustomer {
            legal_name: fiscal.legal_name.clone(),
            tax_id: fiscal.rfc.clone(),
            tax_system: fiscal.tax_regime.clone(),
            zip: fiscal.zip_code.clone(),
            email: fiscal.email.clone(),
        };
        let customer_id = self.deps.provider.create_client(&customer).await?;
        self.deps
            .branches
            .set_provider_customer_id(fiscal.restaurant_branch_id, &customer_id)
            .await?;

        tracing::info!(customer_id = %customer_id, "Receiver registered at provider");
        Ok(customer_id)
    }

    /// Generic receiver profile sent inline for anonymous buyers.
    pub(super) fn public_receiver(&self, rfc: &str, zip: &str) -> (DocumentReceiver, PartySummary) {
        let rfc = if is_public_general_rfc(rfc) {
            rfc.trim().to_ascii_uppercase()
        } else {
            crate::models::PUBLIC_GENERAL_RFC.to_string()
        };
        let customer = ProviderCustomer {
            legal_name: self.settings.public_receiver_name.clone(),
            tax_id: rfc.clone(),
            tax_system: PUBLIC_TAX_REGIME.to_string(),
            zip: zip.to_string(),
            email: None,
        };
        let summary = PartySummary {
            rfc,
            legal_name: customer.legal_name.clone(),
            tax_regime: customer.tax_system.clone(),
            zip_code: customer.zip.clone(),
        };
        (
            DocumentReceiver::Inline {
                customer,
                cfdi_use: PUBLIC_CFDI_USE.to_string(),
            },
            summary,
        )
    }

    /// Fetch PDF and XML concurrently. Failures leave the artifact empty.
    pub(super) async fn fetch_artifacts(&self, provider_id: &str) -> Artifacts {
        let (pdf, xml) = futures::join!(
            self.deps.provider.fetch_pdf(provider_id),
            self.deps.provider.fetch_xml(provider_id)
        );

        let pdf = pdf
            .map_err(|e| tracing::warn!(provider_id, error = %e, "PDF download failed"))
            .ok();
        let xml = xml
            .map_err(|e| tracing::warn!(provider_id, error = %e, "XML download failed"))
            .ok();

        Artifacts { pdf, xml }
    }

    /// Send a notification; never fails the operation.
    pub(super) async fn dispatch(&self, notification: Notification) -> NotificationOutcome {
        if notification.to.is_empty() {
            return NotificationOutcome::Skipped("no recipient".to_string());
        }

        match self.deps.notifier.send(&notification).await {
            Ok(()) => NotificationOutcome::Sent,
            Err(NotifyError::NotConfigured) => {
                NotificationOutcome::Skipped("notifier not configured".to_string())
            }
            Err(e) => {
                tracing::warn!(template = notification.template, error = %e, "Notification failed");
                NotificationOutcome::Failed(e.to_string())
            }
        }
    }

    /// Receiver resolution, folio, stamping, artifacts and persistence.
    ///
    /// Preconditions are the caller's; this runs the side effects in order and
    /// stops at the first failure. A provider failure after the folio was taken
    /// leaves a gap in the sequence.
    #[instrument(
        skip(self, plan),
        fields(
            issuer = %plan.certificate.rfc,
            branch_id = %plan.restaurant_branch_id,
            orders = plan.order_details_ids.len()
        )
    )]
    pub(super) async fn stamp_invoice(&self, plan: InvoicePlan<'_>) -> CfdiResult<StampedInvoice> {
        self.ensure_credentials(plan.certificate).await?;

        let public_general =
            plan.force_public_general || is_public_general_rfc(&plan.branch_fiscal.rfc);

        let (cfdi_type, payment_method, global) = if public_general {
            (
                CfdiType::Ingreso,
                PaymentMethod::Pue,
                Some(global_information(plan.issued_utc)),
            )
        } else {
            (plan.cfdi_type, plan.payment_method, None)
        };
        let payment_form = match payment_method {
            PaymentMethod::Ppd => PaymentForm::to_be_defined(),
            PaymentMethod::Pue => plan.payment_form.clone(),
        };

        let (receiver, receiver_summary) = if public_general {
            self.public_receiver(&plan.branch_fiscal.rfc, &plan.expedition_place)
        } else {
            let customer_id = self.ensure_registered(&plan.branch_fiscal).await?;
            (
                DocumentReceiver::Registered {
                    customer_id,
                    cfdi_use: plan.branch_fiscal.cfdi_use.clone(),
                },
                PartySummary::from(&plan.branch_fiscal),
            )
        };

        let folio = self
            .deps
            .folios
            .next_folio(plan.certificate.supplier_business_id)
            .await?;

        let document = InvoiceDocument {
            issuer_rfc: plan.certificate.rfc.clone(),
            receiver,
            cfdi_type,
            payment_form: payment_form.clone(),
            payment_method,
            expedition_place: plan.expedition_place.clone(),
            folio,
            series: plan.unit.invoice_series.clone(),
            issued_utc: plan.issued_utc,
            currency: "MXN".to_string(),
            items: plan.items,
            observations: plan.observations,
            global,
        };

        let stamped = match self.deps.provider.issue_invoice(&document).await {
            Ok(stamped) => stamped,
            Err(e) => {
                tracing::warn!(folio, error = %e, "Provider rejected invoice, folio left unused");
                return Err(e.into());
            }
        };

        let subtotal = line_items::round2(line_items::subtotal(&document.items));
        let tax = line_items::round2(line_items::tax_total(&document.items));
        let computed_total = line_items::round2(line_items::total(&document.items));
        if computed_total != line_items::round2(stamped.total) {
            tracing::warn!(
                fiscal_uuid = %stamped.fiscal_uuid,
                computed = %computed_total,
                stamped = %stamped.total,
                "Stamped total differs from computed total"
            );
        }

        let artifacts = self.fetch_artifacts(&stamped.provider_id).await;

        let new_invoice = NewInvoice {
            provider_id: stamped.provider_id.clone(),
            fiscal_uuid: stamped.fiscal_uuid.clone(),
            folio,
            series: document.series.clone(),
            supplier_business_id: plan.certificate.supplier_business_id,
            restaurant_branch_id: plan.restaurant_branch_id,
            cfdi_type,
            payment_method,
            payment_form,
            subtotal,
            tax,
            total: stamped.total,
            created_by: plan.actor.actor_id,
        };

        let invoice = match self
            .deps
            .invoices
            .create_invoice(&new_invoice, &plan.order_details_ids)
            .await
        {
            Ok(invoice) => invoice,
            Err(e) => {
                tracing::error!(
                    fiscal_uuid = %stamped.fiscal_uuid,
                    error = %e,
                    "Stamped invoice could not be persisted"
                );
                return Err(e);
            }
        };

        if let Some(amount) = invoice.total.to_f64() {
            INVOICED_AMOUNT_TOTAL
                .with_label_values(&[plan.amount_kind])
                .inc_by(amount);
        }

        tracing::info!(
            invoice_id = %invoice.invoice_id,
            fiscal_uuid = %invoice.fiscal_uuid,
            folio,
            "Invoice stamped"
        );

        Ok(StampedInvoice {
            invoice,
            issuer: PartySummary::from(plan.certificate),
            receiver: receiver_summary,
            issued_utc: stamped.stamped_utc,
            artifacts,
            order_details_ids: plan.order_details_ids,
        })
    }
}
