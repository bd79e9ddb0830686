//! Domain models for cfdi-service.

mod complement;
mod fiscal;
mod invoice;
mod line_item;
mod order;
mod party;

pub use complement::{
    ComplementAmounts, ComplementLink, ComplementStatus, InvoiceComplement, NewComplement,
    PaymentReceipt,
};
pub use fiscal::{
    is_public_general_rfc, CancellationMotive, CfdiType, PaymentForm, PaymentMethod, TaxKind,
    FOREIGN_PUBLIC_GENERAL_RFC, PUBLIC_GENERAL_RFC,
};
pub use invoice::{
    CancellationResult, Invoice, InvoiceOrderAssociation, InvoiceResult, InvoiceStatus,
    InvoiceView, NewInvoice, NotificationOutcome,
};
pub use line_item::{LineItem, TaxEntry};
pub use order::{CartLine, Order, OrderCart, OrderDetails};
pub use party::{
    Actor, ActorRef, BranchFiscal, FiscalCertificate, InvoicingOptions, PartySummary,
    RestaurantBranch, SupplierBusiness, SupplierUnit,
};
