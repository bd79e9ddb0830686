//! Collaborator interfaces the engine depends on.
//!
//! Storage failures surface as [`CfdiError::Unexpected`](crate::error::CfdiError).
//! Lookups return `Ok(None)` for missing rows; the engine decides whether that
//! is a `NotFound`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CfdiResult;
use crate::models::{
    Actor, BranchFiscal, CartLine, ComplementLink, FiscalCertificate, Invoice, InvoiceComplement,
    NewComplement, NewInvoice, Order, OrderDetails, RestaurantBranch, SupplierBusiness,
    SupplierUnit,
};

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get_order(&self, order_id: Uuid) -> CfdiResult<Option<Order>>;

    async fn get_order_details(&self, order_details_id: Uuid) -> CfdiResult<Option<OrderDetails>>;

    /// Highest version of the order's details.
    async fn latest_order_details(&self, order_id: Uuid) -> CfdiResult<Option<OrderDetails>>;

    async fn insert_order_details(&self, details: &OrderDetails) -> CfdiResult<()>;
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Cart lines joined with their product's tax metadata.
    async fn cart_lines(&self, cart_id: Uuid) -> CfdiResult<Vec<CartLine>>;
}

#[async_trait]
pub trait SupplierRepository: Send + Sync {
    async fn get_business(&self, supplier_business_id: Uuid)
        -> CfdiResult<Option<SupplierBusiness>>;

    async fn get_unit(&self, supplier_unit_id: Uuid) -> CfdiResult<Option<SupplierUnit>>;
}

#[async_trait]
pub trait BranchRepository: Send + Sync {
    async fn get_branch(&self, restaurant_branch_id: Uuid)
        -> CfdiResult<Option<RestaurantBranch>>;

    async fn get_branch_fiscal(&self, restaurant_branch_id: Uuid)
        -> CfdiResult<Option<BranchFiscal>>;

    async fn set_provider_customer_id(
        &self,
        restaurant_branch_id: Uuid,
        customer_id: &str,
    ) -> CfdiResult<()>;
}

#[async_trait]
pub trait CertificateRepository: Send + Sync {
    async fn get_certificate(
        &self,
        supplier_business_id: Uuid,
    ) -> CfdiResult<Option<FiscalCertificate>>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn active_invoice_for_details(&self, order_details_id: Uuid)
        -> CfdiResult<Option<Invoice>>;

    /// Most recent invoice for the details, whatever its status.
    async fn latest_invoice_for_details(&self, order_details_id: Uuid)
        -> CfdiResult<Option<Invoice>>;

    /// The order's invoice across all of its details versions, preferring an
    /// active one over canceled ones, newest first.
    async fn current_invoice_for_order(&self, order_id: Uuid) -> CfdiResult<Option<Invoice>>;

    async fn order_details_for_invoice(&self, invoice_id: Uuid) -> CfdiResult<Vec<Uuid>>;

    /// Insert the invoice and one association per order details id atomically.
    /// Fails with `DuplicateInvoice` when any of them already has an active invoice.
    async fn create_invoice(
        &self,
        invoice: &NewInvoice,
        order_details_ids: &[Uuid],
    ) -> CfdiResult<Invoice>;

    /// Store the provider's cancellation payload; `canceled` moves the invoice
    /// to CANCELED and releases its associations.
    async fn record_cancellation(
        &self,
        invoice_id: Uuid,
        payload: &serde_json::Value,
        canceled: bool,
    ) -> CfdiResult<()>;

    async fn complements_for_invoice(&self, invoice_id: Uuid)
        -> CfdiResult<Vec<InvoiceComplement>>;

    /// Insert the complements and their payment-receipt links atomically.
    async fn create_complements(
        &self,
        complements: &[NewComplement],
        links: &[ComplementLink],
    ) -> CfdiResult<Vec<InvoiceComplement>>;
}

/// Atomic, per-business folio counter.
#[async_trait]
pub trait FolioSequence: Send + Sync {
    async fn next_folio(&self, supplier_business_id: Uuid) -> CfdiResult<i64>;
}

#[async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn find_by_external_id(&self, external_id: &str) -> CfdiResult<Option<Actor>>;
}
