//! Single-order invoice issuance.

use chrono::{DateTime, Duration, Utc};
use tracing::instrument;
use uuid::Uuid;

use super::documents::InvoicePlan;
use super::{record_outcome, InvoiceEngine};
use crate::error::{CfdiError, CfdiResult};
use crate::line_items;
use crate::models::{
    ActorRef, CfdiType, InvoiceResult, Order, PaymentForm, PaymentMethod, RestaurantBranch,
};
use crate::notifications::{render_order_invoice, InvoiceSummary, Notification};

/// Oldest issue date the authority accepts, relative to now.
const MAX_ISSUE_AGE_HOURS: i64 = 72;

#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub order_details_id: Uuid,
    pub cfdi_type: CfdiType,
    pub payment_form: PaymentForm,
    /// Zip code of the issuing place; defaults to the supplier unit's.
    pub expedition_place: Option<String>,
    /// Defaults to now.
    pub issue_date: Option<DateTime<Utc>>,
    pub payment_method: PaymentMethod,
}

pub(super) fn check_issue_date(
    issue_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> CfdiResult<DateTime<Utc>> {
    let issued = issue_date.unwrap_or(now);
    if issued < now - Duration::hours(MAX_ISSUE_AGE_HOURS) {
        return Err(CfdiError::validation(format!(
            "issue date {} is more than {} hours in the past",
            issued.to_rfc3339(),
            MAX_ISSUE_AGE_HOURS
        )));
    }
    Ok(issued)
}

pub(super) fn observations(order: &Order, branch: &RestaurantBranch) -> String {
    format!(
        "Pedido {} ({}) - Sucursal {}",
        order.order_number, order.order_id, branch.branch_name
    )
}

impl InvoiceEngine {
    /// Issue one invoice for one order-details version.
    ///
    /// Nothing is persisted unless the provider stamps the document. Artifact
    /// downloads and the notification are best effort; the latter's outcome
    /// is reported on the result.
    #[instrument(
        skip(self, request, actor),
        fields(order_details_id = %request.order_details_id, cfdi_type = %request.cfdi_type)
    )]
    pub async fn issue_invoice(
        &self,
        request: IssueRequest,
        actor: &ActorRef,
    ) -> CfdiResult<InvoiceResult> {
        record_outcome("issue_invoice", self.issue_invoice_inner(request, actor).await)
    }

    async fn issue_invoice_inner(
        &self,
        request: IssueRequest,
        actor: &ActorRef,
    ) -> CfdiResult<InvoiceResult> {
        if !matches!(request.cfdi_type, CfdiType::Ingreso | CfdiType::Egreso) {
            return Err(CfdiError::validation(format!(
                "cfdi type '{}' cannot be issued as an invoice",
                request.cfdi_type
            )));
        }
        let issued_utc = check_issue_date(request.issue_date, Utc::now())?;

        let details = self
            .deps
            .orders
            .get_order_details(request.order_details_id)
            .await?
            .ok_or_else(|| {
                CfdiError::not_found(format!("order details {}", request.order_details_id))
            })?;

        if self
            .deps
            .invoices
            .active_invoice_for_details(details.order_details_id)
            .await?
            .is_some()
        {
            return Err(CfdiError::DuplicateInvoice {
                order_details_id: details.order_details_id,
            });
        }

        let actor = self.resolve_actor(actor).await?;

        let order = self
            .deps
            .orders
            .get_order(details.order_id)
            .await?
            .ok_or_else(|| CfdiError::not_found(format!("order {}", details.order_id)))?;
        let unit = self
            .deps
            .suppliers
            .get_unit(order.supplier_unit_id)
            .await?
            .ok_or_else(|| {
                CfdiError::not_found(format!("supplier unit {}", order.supplier_unit_id))
            })?;
        let business = self
            .deps
            .suppliers
            .get_business(unit.supplier_business_id)
            .await?
            .ok_or_else(|| {
                CfdiError::not_found(format!("supplier business {}", unit.supplier_business_id))
            })?;
        let certificate = self
            .deps
            .certificates
            .get_certificate(unit.supplier_business_id)
            .await?
            .ok_or_else(|| {
                CfdiError::not_found(format!(
                    "fiscal certificate for supplier business {}",
                    unit.supplier_business_id
                ))
            })?;
        let branch = self
            .deps
            .branches
            .get_branch(order.restaurant_branch_id)
            .await?
            .ok_or_else(|| {
                CfdiError::not_found(format!("restaurant branch {}", order.restaurant_branch_id))
            })?;
        let branch_fiscal = self
            .deps
            .branches
            .get_branch_fiscal(order.restaurant_branch_id)
            .await?
            .ok_or_else(|| {
                CfdiError::not_found(format!(
                    "fiscal data for restaurant branch {}",
                    order.restaurant_branch_id
                ))
            })?;

        let lines = self.deps.carts.cart_lines(details.cart_id).await?;
        let items = line_items::compile_order(
            &lines,
            details.shipping_cost,
            &self.settings.shipping,
        )?;

        let computed = line_items::round2(line_items::tax_total(&items));
        let recorded = line_items::round2(details.tax);
        if computed != recorded {
            return Err(CfdiError::TaxMismatch { computed, recorded });
        }

        let recipient = branch_fiscal.email.clone();
        let expedition_place = request
            .expedition_place
            .clone()
            .unwrap_or_else(|| unit.zip_code.clone());

        let stamped = self
            .stamp_invoice(InvoicePlan {
                actor: &actor,
                certificate: &certificate,
                unit: &unit,
                branch_fiscal,
                restaurant_branch_id: order.restaurant_branch_id,
                force_public_general: false,
                cfdi_type: request.cfdi_type,
                payment_method: request.payment_method,
                payment_form: request.payment_form,
                expedition_place,
                issued_utc,
                items,
                observations: observations(&order, &branch),
                order_details_ids: vec![details.order_details_id],
                amount_kind: "invoice",
            })
            .await?;

        let summary = InvoiceSummary {
            supplier_name: &business.name,
            receiver_name: &stamped.receiver.legal_name,
            folio: stamped.invoice.folio,
            series: stamped.invoice.series.as_deref(),
            fiscal_uuid: &stamped.invoice.fiscal_uuid,
            total: stamped.invoice.total,
        };
        let (subject, html) =
            render_order_invoice(&summary, &order.order_number, details.delivery_date);
        let notification = Notification {
            template: "invoice_issued",
            to: recipient
                .into_iter()
                .chain(business.notification_email.clone())
                .collect(),
            subject,
            html,
            attachments: stamped.artifacts.attachments(&stamped.invoice.fiscal_uuid),
        };
        let outcome = self.dispatch(notification).await;

        Ok(stamped.into_result(outcome))
    }
}
