//! Invoice model for cfdi-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::complement::InvoiceComplement;
use super::fiscal::{CfdiType, PaymentForm, PaymentMethod};
use super::party::PartySummary;

/// Invoice status. CANCELED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Active,
    Canceled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Active => "ACTIVE",
            InvoiceStatus::Canceled => "CANCELED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "CANCELED" => InvoiceStatus::Canceled,
            _ => InvoiceStatus::Active,
        }
    }
}

/// A stamped fiscal invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    /// Document id at the stamping provider.
    pub provider_id: String,
    /// Government-issued fiscal UUID.
    pub fiscal_uuid: String,
    pub folio: i64,
    pub series: Option<String>,
    pub supplier_business_id: Uuid,
    pub restaurant_branch_id: Uuid,
    pub cfdi_type: CfdiType,
    pub payment_method: PaymentMethod,
    pub payment_form: PaymentForm,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub status: InvoiceStatus,
    pub created_by: Uuid,
    /// Provider response to the last cancellation request, if any.
    pub cancel_result: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
    pub canceled_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn is_active(&self) -> bool {
        self.status == InvoiceStatus::Active
    }
}

/// Input for persisting a freshly stamped invoice.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub provider_id: String,
    pub fiscal_uuid: String,
    pub folio: i64,
    pub series: Option<String>,
    pub supplier_business_id: Uuid,
    pub restaurant_branch_id: Uuid,
    pub cfdi_type: CfdiType,
    pub payment_method: PaymentMethod,
    pub payment_form: PaymentForm,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub created_by: Uuid,
}

/// Invoice ↔ order-details link. Consolidated invoices have several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceOrderAssociation {
    pub invoice_id: Uuid,
    pub order_details_id: Uuid,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
}

/// Outcome of the post-issuance notification. Never rolls back the invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Sent,
    Skipped(String),
    Failed(String),
}

impl NotificationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, NotificationOutcome::Failed(_))
    }
}

/// What issuance operations hand back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceResult {
    pub invoice_id: Uuid,
    pub provider_id: String,
    pub fiscal_uuid: String,
    pub folio: i64,
    pub series: Option<String>,
    pub cfdi_type: CfdiType,
    pub payment_method: PaymentMethod,
    pub issuer: PartySummary,
    pub receiver: PartySummary,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub issued_utc: DateTime<Utc>,
    /// Base64 encoded PDF, absent when the artifact fetch failed.
    pub pdf: Option<String>,
    /// Base64 encoded XML, absent when the artifact fetch failed.
    pub xml: Option<String>,
    pub order_details_ids: Vec<Uuid>,
    pub notification: NotificationOutcome,
}

/// Read model for an order's current invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceView {
    pub invoice: Invoice,
    pub order_details_ids: Vec<Uuid>,
    pub complements: Vec<InvoiceComplement>,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationResult {
    pub fiscal_id: String,
    /// False when the authority left the cancellation pending receiver acceptance.
    pub canceled: bool,
}
