//! Cancellation and reissue.
//!
//! An invoice moves ACTIVE -> CANCELED once and never back. Cancelling is
//! refused while any payment complement exists against it. A cancellation the
//! receiver still has to accept leaves the invoice ACTIVE with the provider's
//! payload stored.

use tracing::instrument;
use uuid::Uuid;

use super::{record_outcome, InvoiceEngine};
use crate::error::{CfdiError, CfdiResult};
use crate::gateway::CancellationStatus;
use crate::models::{ActorRef, CancellationMotive, CancellationResult, Invoice};

/// Motive and replacement reference after applying defaults and rules.
pub(super) fn normalize_motive(
    motive: Option<CancellationMotive>,
    replacement_uuid: Option<String>,
    default: CancellationMotive,
) -> CfdiResult<(CancellationMotive, Option<String>)> {
    let motive = motive.unwrap_or(default);
    let replacement_uuid = replacement_uuid.filter(|uuid| !uuid.trim().is_empty());

    if motive.requires_replacement() {
        return match replacement_uuid {
            Some(uuid) => Ok((motive, Some(uuid))),
            None => Err(CfdiError::validation(
                "cancellation motive 01 requires the replacement invoice's fiscal UUID",
            )),
        };
    }
    if let Some(uuid) = &replacement_uuid {
        tracing::warn!(
            motive = motive.code(),
            replacement_uuid = %uuid,
            "Replacement UUID ignored for a motive without relation"
        );
    }
    Ok((motive, None))
}

impl InvoiceEngine {
    /// Cancel the order's current invoice.
    ///
    /// For a consolidated invoice every order sharing it gets a fresh
    /// order-details version so each can be invoiced again.
    #[instrument(skip(self, actor), fields(order_id = %order_id))]
    pub async fn cancel_invoice(
        &self,
        order_id: Uuid,
        motive: Option<CancellationMotive>,
        replacement_uuid: Option<String>,
        actor: &ActorRef,
    ) -> CfdiResult<CancellationResult> {
        record_outcome(
            "cancel",
            self.cancel_invoice_inner(order_id, motive, replacement_uuid, actor)
                .await,
        )
    }

    async fn cancel_invoice_inner(
        &self,
        order_id: Uuid,
        motive: Option<CancellationMotive>,
        replacement_uuid: Option<String>,
        actor: &ActorRef,
    ) -> CfdiResult<CancellationResult> {
        let (motive, replacement_uuid) = normalize_motive(
            motive,
            replacement_uuid,
            self.settings.default_cancellation_motive,
        )?;

        self.deps
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| CfdiError::not_found(format!("order {}", order_id)))?;
        let invoice = self
            .deps
            .invoices
            .current_invoice_for_order(order_id)
            .await?
            .ok_or_else(|| CfdiError::not_found(format!("invoice for order {}", order_id)))?;

        if !invoice.is_active() {
            return Ok(CancellationResult {
                fiscal_id: invoice.fiscal_uuid,
                canceled: true,
            });
        }

        let siblings = self
            .deps
            .invoices
            .order_details_for_invoice(invoice.invoice_id)
            .await?;
        self.ensure_no_complements(&invoice).await?;
        let actor = self.resolve_actor(actor).await?;

        let canceled = self
            .cancel_at_provider(&invoice, motive, replacement_uuid.as_deref())
            .await?;

        if canceled {
            for order_details_id in &siblings {
                let current = match self.deps.orders.get_order_details(*order_details_id).await? {
                    Some(current) => current,
                    None => {
                        tracing::warn!(
                            order_details_id = %order_details_id,
                            "Linked order details vanished"
                        );
                        continue;
                    }
                };
                let next = current.next_version(actor.actor_id);
                self.deps.orders.insert_order_details(&next).await?;
                tracing::info!(
                    order_id = %next.order_id,
                    version = next.version,
                    "Order details version released for reinvoicing"
                );
            }
        }

        Ok(CancellationResult {
            fiscal_id: invoice.fiscal_uuid,
            canceled,
        })
    }

    /// Cancel the invoice of an older order-details version, replaced by the
    /// already issued invoice of a newer one.
    #[instrument(skip(self))]
    pub async fn reissue_invoice(
        &self,
        old_order_details_id: Uuid,
        new_order_details_id: Uuid,
    ) -> CfdiResult<CancellationResult> {
        record_outcome(
            "reissue",
            self.reissue_invoice_inner(old_order_details_id, new_order_details_id)
                .await,
        )
    }

    async fn reissue_invoice_inner(
        &self,
        old_order_details_id: Uuid,
        new_order_details_id: Uuid,
    ) -> CfdiResult<CancellationResult> {
        let old = self
            .deps
            .invoices
            .latest_invoice_for_details(old_order_details_id)
            .await?
            .ok_or_else(|| {
                CfdiError::not_found(format!("invoice for order details {}", old_order_details_id))
            })?;
        let new = self
            .deps
            .invoices
            .active_invoice_for_details(new_order_details_id)
            .await?
            .ok_or_else(|| {
                CfdiError::not_found(format!(
                    "active invoice for order details {}",
                    new_order_details_id
                ))
            })?;

        if !old.is_active() {
            return Ok(CancellationResult {
                fiscal_id: old.fiscal_uuid,
                canceled: true,
            });
        }
        if old.invoice_id == new.invoice_id {
            return Err(CfdiError::validation("an invoice cannot replace itself"));
        }

        self.ensure_no_complements(&old).await?;
        let canceled = self
            .cancel_at_provider(
                &old,
                CancellationMotive::ErrorsWithRelation,
                Some(&new.fiscal_uuid),
            )
            .await?;

        Ok(CancellationResult {
            fiscal_id: old.fiscal_uuid,
            canceled,
        })
    }

    async fn ensure_no_complements(&self, invoice: &Invoice) -> CfdiResult<()> {
        let complements = self
            .deps
            .invoices
            .complements_for_invoice(invoice.invoice_id)
            .await?;
        if complements.is_empty() {
            Ok(())
        } else {
            Err(CfdiError::ExistingComplement {
                invoice_id: invoice.invoice_id,
            })
        }
    }

    /// Ask the provider to cancel and record its answer. Returns whether the
    /// invoice is now CANCELED.
    async fn cancel_at_provider(
        &self,
        invoice: &Invoice,
        motive: CancellationMotive,
        replacement_uuid: Option<&str>,
    ) -> CfdiResult<bool> {
        let receipt = self
            .deps
            .provider
            .cancel(&invoice.provider_id, motive, replacement_uuid)
            .await?;
        let canceled = receipt.status == CancellationStatus::Canceled;

        self.deps
            .invoices
            .record_cancellation(invoice.invoice_id, &receipt.payload, canceled)
            .await?;

        if canceled {
            tracing::info!(
                invoice_id = %invoice.invoice_id,
                fiscal_uuid = %invoice.fiscal_uuid,
                motive = motive.code(),
                "Invoice canceled"
            );
        } else {
            tracing::info!(
                invoice_id = %invoice.invoice_id,
                fiscal_uuid = %invoice.fiscal_uuid,
                "Cancellation pending receiver acceptance"
            );
        }
        Ok(canceled)
    }
}
