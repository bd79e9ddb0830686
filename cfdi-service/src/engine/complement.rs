//! Payment complements certifying payments against deferred-payment invoices.
//!
//! Each allocation is sent as both the previous balance and the amount paid
//! of its folio. Balances are not carried across complements.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::instrument;
use uuid::Uuid;

use super::{record_outcome, single_scope, InvoiceEngine};
use crate::error::{CfdiError, CfdiResult};
use crate::gateway::{DocumentReceiver, PaymentComplementDocument, RelatedDocument};
use crate::models::{
    ActorRef, CfdiType, ComplementAmounts, ComplementLink, Invoice, InvoiceComplement, InvoiceResult,
    NewComplement, PartySummary, PaymentMethod, PaymentReceipt,
};
use crate::notifications::{render_payment_complement, InvoiceSummary, Notification};
use crate::services::metrics::INVOICED_AMOUNT_TOTAL;

/// An invoice being paid and the order details that reference it.
#[derive(Debug)]
struct PaidInvoice {
    invoice: Invoice,
    order_details_ids: Vec<Uuid>,
    amount: Decimal,
}

/// Split the payment across the invoices being paid.
fn allocate(
    groups: Vec<(Invoice, Vec<Uuid>)>,
    amounts: &ComplementAmounts,
) -> CfdiResult<Vec<PaidInvoice>> {
    match amounts {
        ComplementAmounts::Single(amount) => {
            if groups.len() != 1 {
                return Err(CfdiError::validation(format!(
                    "a single amount can only pay one invoice, the orders reference {}",
                    groups.len()
                )));
            }
            if *amount <= Decimal::ZERO {
                return Err(CfdiError::validation("payment amount must be positive"));
            }
            Ok(groups
                .into_iter()
                .map(|(invoice, order_details_ids)| PaidInvoice {
                    invoice,
                    order_details_ids,
                    amount: *amount,
                })
                .collect())
        }
        ComplementAmounts::PerOrder(per_order) => {
            let referenced: HashSet<Uuid> = groups
                .iter()
                .flat_map(|(_, ids)| ids.iter().copied())
                .collect();
            if let Some(stray) = per_order.keys().find(|id| !referenced.contains(id)) {
                return Err(CfdiError::validation(format!(
                    "amount given for unreferenced order details {}",
                    stray
                )));
            }

            groups
                .into_iter()
                .map(|(invoice, order_details_ids)| {
                    let mut amount = Decimal::ZERO;
                    for id in &order_details_ids {
                        match per_order.get(id) {
                            Some(value) if *value > Decimal::ZERO => amount += *value,
                            Some(_) => {
                                return Err(CfdiError::validation(format!(
                                    "amount for order details {} must be positive",
                                    id
                                )))
                            }
                            None => {
                                return Err(CfdiError::validation(format!(
                                    "no amount given for order details {}",
                                    id
                                )))
                            }
                        }
                    }
                    Ok(PaidInvoice {
                        invoice,
                        order_details_ids,
                        amount,
                    })
                })
                .collect()
        }
    }
}

impl InvoiceEngine {
    /// Stamp one payment complement for the invoices behind `order_details_ids`.
    ///
    /// One complement row is stored per invoice paid, linked to the receipt and
    /// each order details. The result's `invoice_id` is the first row's id.
    #[instrument(
        skip(self, receipt, order_details_ids, amounts, actor),
        fields(payment_receipt_id = %receipt.payment_receipt_id, orders = order_details_ids.len())
    )]
    pub async fn issue_payment_complement(
        &self,
        receipt: &PaymentReceipt,
        order_details_ids: &[Uuid],
        amounts: &ComplementAmounts,
        actor: &ActorRef,
    ) -> CfdiResult<InvoiceResult> {
        record_outcome(
            "complement",
            self.issue_complement_inner(receipt, order_details_ids, amounts, actor)
                .await,
        )
    }

    async fn issue_complement_inner(
        &self,
        receipt: &PaymentReceipt,
        order_details_ids: &[Uuid],
        amounts: &ComplementAmounts,
        actor: &ActorRef,
    ) -> CfdiResult<InvoiceResult> {
        let mut seen = HashSet::new();
        let order_details_ids: Vec<Uuid> = order_details_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        if order_details_ids.is_empty() {
            return Err(CfdiError::validation("at least one order is required"));
        }
        if receipt.payment_form.is_to_be_defined() {
            return Err(CfdiError::validation(
                "a payment complement needs the actual payment form, not '99'",
            ));
        }

        let actor = self.resolve_actor(actor).await?;

        let mut groups: Vec<(Invoice, Vec<Uuid>)> = Vec::new();
        let mut index: HashMap<Uuid, usize> = HashMap::new();
        for id in &order_details_ids {
            let invoice = self
                .deps
                .invoices
                .active_invoice_for_details(*id)
                .await?
                .ok_or_else(|| {
                    CfdiError::not_found(format!("active invoice for order details {}", id))
                })?;
            match index.get(&invoice.invoice_id) {
                Some(&i) => groups[i].1.push(*id),
                None => {
                    index.insert(invoice.invoice_id, groups.len());
                    groups.push((invoice, vec![*id]));
                }
            }
        }

        if let Some((invoice, _)) = groups
            .iter()
            .find(|(invoice, _)| invoice.payment_method != PaymentMethod::Ppd)
        {
            return Err(CfdiError::validation(format!(
                "invoice {} is not a deferred-payment (PPD) invoice",
                invoice.fiscal_uuid
            )));
        }
        let issuer_id = single_scope(
            groups.iter().map(|(i, _)| i.supplier_business_id),
            "issuer",
        )?;
        let branch_id = single_scope(
            groups.iter().map(|(i, _)| i.restaurant_branch_id),
            "receiver",
        )?;

        let paid = allocate(groups, amounts)?;

        let certificate = self
            .deps
            .certificates
            .get_certificate(issuer_id)
            .await?
            .ok_or_else(|| {
                CfdiError::not_found(format!(
                    "fiscal certificate for supplier business {}",
                    issuer_id
                ))
            })?;
        let business = self
            .deps
            .suppliers
            .get_business(issuer_id)
            .await?
            .ok_or_else(|| CfdiError::not_found(format!("supplier business {}", issuer_id)))?;
        let branch_fiscal = self
            .deps
            .branches
            .get_branch_fiscal(branch_id)
            .await?
            .ok_or_else(|| {
                CfdiError::not_found(format!("fiscal data for restaurant branch {}", branch_id))
            })?;

        self.ensure_credentials(&certificate).await?;
        let customer_id = self.ensure_registered(&branch_fiscal).await?;
        let folio = self.deps.folios.next_folio(issuer_id).await?;

        let document = PaymentComplementDocument {
            issuer_rfc: certificate.rfc.clone(),
            receiver: DocumentReceiver::Registered {
                customer_id,
                cfdi_use: "CP01".to_string(),
            },
            expedition_place: certificate.zip_code.clone(),
            folio,
            series: paid[0].invoice.series.clone(),
            payment_form: receipt.payment_form.clone(),
            paid_utc: receipt.paid_utc,
            currency: "MXN".to_string(),
            related_documents: paid
                .iter()
                .map(|p| RelatedDocument {
                    fiscal_uuid: p.invoice.fiscal_uuid.clone(),
                    folio: p.invoice.folio,
                    series: p.invoice.series.clone(),
                    installment: 1,
                    previous_balance: p.amount,
                    amount_paid: p.amount,
                })
                .collect(),
        };

        let stamped = match self.deps.provider.issue_payment_complement(&document).await {
            Ok(stamped) => stamped,
            Err(e) => {
                tracing::warn!(folio, error = %e, "Provider rejected payment complement");
                return Err(e.into());
            }
        };
        let artifacts = self.fetch_artifacts(&stamped.provider_id).await;

        let mut complements = Vec::with_capacity(paid.len());
        let mut links = Vec::new();
        for p in &paid {
            let complement_id = Uuid::new_v4();
            complements.push(NewComplement {
                complement_id,
                invoice_id: p.invoice.invoice_id,
                provider_id: stamped.provider_id.clone(),
                fiscal_uuid: stamped.fiscal_uuid.clone(),
                amount: p.amount,
                created_by: actor.actor_id,
            });
            links.extend(p.order_details_ids.iter().map(|id| ComplementLink {
                payment_receipt_id: receipt.payment_receipt_id,
                order_details_id: *id,
                complement_id,
            }));
        }
        let stored = match self
            .deps
            .invoices
            .create_complements(&complements, &links)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(
                    fiscal_uuid = %stamped.fiscal_uuid,
                    error = %e,
                    "Stamped payment complement could not be persisted"
                );
                return Err(e);
            }
        };
        let complement_id = first_complement_id(&stored)?;

        let total: Decimal = paid.iter().map(|p| p.amount).sum();
        if let Some(amount) = total.to_f64() {
            INVOICED_AMOUNT_TOTAL
                .with_label_values(&["complement"])
                .inc_by(amount);
        }
        tracing::info!(
            fiscal_uuid = %stamped.fiscal_uuid,
            invoices = paid.len(),
            total = %total,
            "Payment complement stamped"
        );

        let series = document.series.clone();
        let related_folios: Vec<String> = paid
            .iter()
            .map(|p| match &p.invoice.series {
                Some(s) => format!("{}-{}", s, p.invoice.folio),
                None => p.invoice.folio.to_string(),
            })
            .collect();
        let summary = InvoiceSummary {
            supplier_name: &business.name,
            receiver_name: &branch_fiscal.legal_name,
            folio,
            series: series.as_deref(),
            fiscal_uuid: &stamped.fiscal_uuid,
            total,
        };
        let (subject, html) = render_payment_complement(&summary, &related_folios);
        let notification = Notification {
            template: "payment_complement_issued",
            to: branch_fiscal.email.clone().into_iter().collect(),
            subject,
            html,
            attachments: artifacts.attachments(&stamped.fiscal_uuid),
        };
        let outcome = self.dispatch(notification).await;

        let (pdf, xml) = artifacts.encoded();
        Ok(InvoiceResult {
            invoice_id: complement_id,
            provider_id: stamped.provider_id,
            fiscal_uuid: stamped.fiscal_uuid,
            folio,
            series,
            cfdi_type: CfdiType::Pago,
            payment_method: PaymentMethod::Ppd,
            issuer: PartySummary::from(&certificate),
            receiver: PartySummary::from(&branch_fiscal),
            subtotal: Decimal::ZERO,
            tax: Decimal::ZERO,
            total,
            issued_utc: stamped.stamped_utc,
            pdf,
            xml,
            order_details_ids,
            notification: outcome,
        })
    }
}

/// The persisted complement that identifies the stamped document.
fn first_complement_id(stored: &[InvoiceComplement]) -> CfdiResult<Uuid> {
    stored.first().map(|c| c.complement_id).ok_or_else(|| {
        CfdiError::Unexpected(anyhow::anyhow!(
            "payment complement was stamped but no complement rows were stored"
        ))
    })
}
