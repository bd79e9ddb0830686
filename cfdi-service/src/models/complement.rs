//! Payment complement model for cfdi-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::fiscal::PaymentForm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplementStatus {
    Active,
    Canceled,
}

impl ComplementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplementStatus::Active => "ACTIVE",
            ComplementStatus::Canceled => "CANCELED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "CANCELED" => ComplementStatus::Canceled,
            _ => ComplementStatus::Active,
        }
    }
}

/// Payment-certification document stamped against one invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceComplement {
    pub complement_id: Uuid,
    pub invoice_id: Uuid,
    pub provider_id: String,
    pub fiscal_uuid: String,
    /// Amount allocated to this invoice.
    pub amount: Decimal,
    pub status: ComplementStatus,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewComplement {
    pub complement_id: Uuid,
    pub invoice_id: Uuid,
    pub provider_id: String,
    pub fiscal_uuid: String,
    pub amount: Decimal,
    pub created_by: Uuid,
}

/// Payment evidence uploaded for one or more orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment_receipt_id: Uuid,
    pub payment_form: PaymentForm,
    pub paid_utc: DateTime<Utc>,
    pub comments: Option<String>,
}

/// How a payment is spread over the referenced orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ComplementAmounts {
    /// One amount for a payment that settles exactly one invoice.
    Single(Decimal),
    /// Amount per order-details id.
    PerOrder(HashMap<Uuid, Decimal>),
}

/// Links a complement to the receipt/order pair it certifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplementLink {
    pub payment_receipt_id: Uuid,
    pub order_details_id: Uuid,
    pub complement_id: Uuid,
}
