//! One invoice spanning several orders of the same branch and supplier unit.

use chrono::Utc;
use std::collections::HashSet;
use tracing::instrument;
use uuid::Uuid;

use super::documents::InvoicePlan;
use super::{record_outcome, single_scope, InvoiceEngine};
use crate::error::{CfdiError, CfdiResult};
use crate::line_items;
use crate::models::{
    ActorRef, CfdiType, InvoiceResult, InvoicingOptions, Order, OrderCart, OrderDetails,
    PaymentForm, PaymentMethod,
};
use crate::notifications::{render_consolidated_invoice, InvoiceSummary, Notification, OrderRow};

#[derive(Debug, Clone, Default)]
pub struct ConsolidationRequest {
    pub order_ids: Vec<Uuid>,
    pub payment_method: Option<PaymentMethod>,
    /// Invoice the orders to the general public regardless of the branch's RFC.
    pub public_general: bool,
    pub payment_form: Option<PaymentForm>,
    pub expedition_place: Option<String>,
}

/// Payment method for a consolidated invoice.
///
/// Precedence: public-general flag (always PUE), the caller's explicit choice,
/// the issuer's override for the branch, the issuer's default.
///
/// An explicit choice in the request outranks the branch override; without
/// one the order is flag, branch override, issuer default.
pub fn resolve_payment_method(
    public_general: bool,
    requested: Option<PaymentMethod>,
    options: &InvoicingOptions,
    restaurant_branch_id: Uuid,
    supplier_business_id: Uuid,
) -> CfdiResult<PaymentMethod> {
    if public_general {
        return Ok(PaymentMethod::Pue);
    }
    requested
        .or_else(|| options.branch_overrides.get(&restaurant_branch_id).copied())
        .or(options.default_payment_method)
        .ok_or(CfdiError::MissingInvoicingConfig {
            supplier_business_id,
        })
}

impl InvoiceEngine {
    /// Issue one invoice covering the latest details of every order.
    #[instrument(skip(self, request, actor), fields(orders = request.order_ids.len()))]
    pub async fn issue_consolidated_invoice(
        &self,
        request: ConsolidationRequest,
        actor: &ActorRef,
    ) -> CfdiResult<Vec<InvoiceResult>> {
        record_outcome(
            "consolidate",
            self.issue_consolidated_inner(request, actor).await,
        )
    }

    async fn issue_consolidated_inner(
        &self,
        request: ConsolidationRequest,
        actor: &ActorRef,
    ) -> CfdiResult<Vec<InvoiceResult>> {
        let mut seen = HashSet::new();
        let order_ids: Vec<Uuid> = request
            .order_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        if order_ids.is_empty() {
            return Err(CfdiError::validation("at least one order is required"));
        }

        let mut orders: Vec<(Order, OrderDetails)> = Vec::with_capacity(order_ids.len());
        for order_id in &order_ids {
            let order = self
                .deps
                .orders
                .get_order(*order_id)
                .await?
                .ok_or_else(|| CfdiError::not_found(format!("order {}", order_id)))?;
            let details = self
                .deps
                .orders
                .latest_order_details(*order_id)
                .await?
                .ok_or_else(|| CfdiError::not_found(format!("details of order {}", order_id)))?;
            orders.push((order, details));
        }

        let branch_id = single_scope(
            orders.iter().map(|(o, _)| o.restaurant_branch_id),
            "restaurant branch",
        )?;
        let unit_id = single_scope(
            orders.iter().map(|(o, _)| o.supplier_unit_id),
            "supplier unit",
        )?;

        for (_, details) in &orders {
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
        }

        let actor = self.resolve_actor(actor).await?;

        let unit = self
            .deps
            .suppliers
            .get_unit(unit_id)
            .await?
            .ok_or_else(|| CfdiError::not_found(format!("supplier unit {}", unit_id)))?;
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
            .get_branch(branch_id)
            .await?
            .ok_or_else(|| CfdiError::not_found(format!("restaurant branch {}", branch_id)))?;
        let branch_fiscal = self
            .deps
            .branches
            .get_branch_fiscal(branch_id)
            .await?
            .ok_or_else(|| {
                CfdiError::not_found(format!("fiscal data for restaurant branch {}", branch_id))
            })?;

        // Each order is reconciled against its own cart. Merged lines round
        // differently from the per-order sum, so the merged taxes are not compared.
        let mut carts = Vec::with_capacity(orders.len());
        for (_, details) in &orders {
            let lines = self.deps.carts.cart_lines(details.cart_id).await?;
            let own = line_items::compile_order(
                &lines,
                details.shipping_cost,
                &self.settings.shipping,
            )?;
            let computed = line_items::round2(line_items::tax_total(&own));
            let recorded = line_items::round2(details.tax);
            if computed != recorded {
                return Err(CfdiError::TaxMismatch { computed, recorded });
            }
            carts.push(OrderCart {
                details: details.clone(),
                lines,
            });
        }
        let items = line_items::compile_consolidated(&carts, &self.settings.shipping)?;

        let options = &certificate.invoicing_options;
        let payment_method = resolve_payment_method(
            request.public_general,
            request.payment_method,
            options,
            branch_id,
            certificate.supplier_business_id,
        )?;
        let payment_form = match payment_method {
            PaymentMethod::Ppd => PaymentForm::to_be_defined(),
            PaymentMethod::Pue => request
                .payment_form
                .clone()
                .or_else(|| options.default_payment_form.clone())
                .ok_or(CfdiError::MissingInvoicingConfig {
                    supplier_business_id: certificate.supplier_business_id,
                })?,
        };

        let order_numbers: Vec<&str> = orders
            .iter()
            .map(|(o, _)| o.order_number.as_str())
            .collect();
        let observations = format!(
            "Pedidos {} - Sucursal {}",
            order_numbers.join(", "),
            branch.branch_name
        );
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
                restaurant_branch_id: branch_id,
                force_public_general: request.public_general,
                cfdi_type: CfdiType::Ingreso,
                payment_method,
                payment_form,
                expedition_place,
                issued_utc: Utc::now(),
                items,
                observations,
                order_details_ids: orders.iter().map(|(_, d)| d.order_details_id).collect(),
                amount_kind: "consolidated",
            })
            .await?;

        let rows: Vec<OrderRow> = orders
            .iter()
            .map(|(order, details)| OrderRow {
                order_number: order.order_number.clone(),
                delivery_date: details.delivery_date,
                total: details.total,
            })
            .collect();
        let summary = InvoiceSummary {
            supplier_name: &business.name,
            receiver_name: &stamped.receiver.legal_name,
            folio: stamped.invoice.folio,
            series: stamped.invoice.series.as_deref(),
            fiscal_uuid: &stamped.invoice.fiscal_uuid,
            total: stamped.invoice.total,
        };
        let (subject, html) = render_consolidated_invoice(&summary, &rows);
        let notification = Notification {
            template: "consolidated_invoice_issued",
            to: recipient
                .into_iter()
                .chain(business.notification_email.clone())
                .collect(),
            subject,
            html,
            attachments: stamped.artifacts.attachments(&stamped.invoice.fiscal_uuid),
        };
        let outcome = self.dispatch(notification).await;

        Ok(vec![stamped.into_result(outcome)])
    }
}
