//! Fiscal invoice lifecycle engine.
//!
//! Orchestrates issuance, consolidation, payment complements and
//! cancellation over the collaborator traits in [`crate::repository`]. The
//! engine holds no locks; the one-active-invoice-per-order rule and folio
//! monotonicity rest on the store's atomic primitives.

mod cancellation;
mod complement;
mod consolidation;
mod documents;
mod issuance;

pub use consolidation::{resolve_payment_method, ConsolidationRequest};
pub use issuance::IssueRequest;

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::config::FiscalConfig;
use crate::error::{CfdiError, CfdiResult};
use crate::gateway::FiscalProvider;
use crate::models::{Actor, ActorRef, InvoiceView};
use crate::notifications::Notifier;
use crate::repository::{
    ActorDirectory, BranchRepository, CartRepository, CertificateRepository, FolioSequence,
    InvoiceRepository, OrderRepository, SupplierRepository,
};
use crate::services::metrics::{ERRORS_TOTAL, OPERATIONS_TOTAL};

/// Everything the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub orders: Arc<dyn OrderRepository>,
    pub carts: Arc<dyn CartRepository>,
    pub suppliers: Arc<dyn SupplierRepository>,
    pub branches: Arc<dyn BranchRepository>,
    pub certificates: Arc<dyn CertificateRepository>,
    pub invoices: Arc<dyn InvoiceRepository>,
    pub folios: Arc<dyn FolioSequence>,
    pub actors: Arc<dyn ActorDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub provider: Arc<dyn FiscalProvider>,
}

#[derive(Clone)]
pub struct InvoiceEngine {
    deps: Collaborators,
    settings: FiscalConfig,
}

impl InvoiceEngine {
    pub fn new(deps: Collaborators, settings: FiscalConfig) -> Self {
        Self { deps, settings }
    }

    pub fn settings(&self) -> &FiscalConfig {
        &self.settings
    }

    /// Resolve the caller once; `ByExternalId` costs one directory lookup.
    pub async fn resolve_actor(&self, actor: &ActorRef) -> CfdiResult<Actor> {
        match actor {
            ActorRef::Explicit(actor) => Ok(actor.clone()),
            ActorRef::ByExternalId(external_id) => self
                .deps
                .actors
                .find_by_external_id(external_id)
                .await?
                .ok_or_else(|| CfdiError::ActorNotFound(external_id.clone())),
        }
    }

    /// The order's current invoice, its sibling orders and its complements.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_invoice(&self, order_id: Uuid) -> CfdiResult<InvoiceView> {
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

        let order_details_ids = self
            .deps
            .invoices
            .order_details_for_invoice(invoice.invoice_id)
            .await?;
        let complements = self
            .deps
            .invoices
            .complements_for_invoice(invoice.invoice_id)
            .await?;

        Ok(InvoiceView {
            invoice,
            order_details_ids,
            complements,
        })
    }
}

/// Count the outcome of an orchestration and pass the result through.
fn record_outcome<T>(operation: &str, result: CfdiResult<T>) -> CfdiResult<T> {
    match &result {
        Ok(_) => {
            OPERATIONS_TOTAL.with_label_values(&[operation, "ok"]).inc();
        }
        Err(err) => {
            OPERATIONS_TOTAL.with_label_values(&[operation, "error"]).inc();
            ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
            match err {
                CfdiError::Unexpected(inner) => {
                    tracing::error!(operation, error = %inner, "Operation failed unexpectedly")
                }
                other => tracing::warn!(operation, error = %other, "Operation rejected"),
            }
        }
    }
    result
}

/// The single distinct value of `values`, or a scope violation.
fn single_scope<T: Eq + Hash + Copy>(
    values: impl Iterator<Item = T>,
    scope: &'static str,
) -> CfdiResult<T> {
    let distinct: Vec<T> = values.collect::<HashSet<_>>().into_iter().collect();
    match distinct.as_slice() {
        [only] => Ok(*only),
        _ => Err(CfdiError::UniqueScopeViolation {
            scope,
            found: distinct.len(),
        }),
    }
}
