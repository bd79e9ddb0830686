//! Order-side value objects read from the marketplace.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A marketplace order between one restaurant branch and one supplier unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub order_id: Uuid,
    pub order_number: String,
    pub restaurant_branch_id: Uuid,
    pub supplier_unit_id: Uuid,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
}

/// One immutable version of an order's business fields.
///
/// Cancelling an invoice appends a new version so the order can be invoiced again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderDetails {
    pub order_details_id: Uuid,
    pub order_id: Uuid,
    pub version: i32,
    pub cart_id: Uuid,
    pub subtotal: Decimal,
    /// Tax recorded on the order when it was placed.
    pub tax: Decimal,
    pub shipping_cost: Option<Decimal>,
    pub total: Decimal,
    pub delivery_date: Option<NaiveDate>,
    pub status: String,
    pub comments: Option<String>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl OrderDetails {
    /// The next version of these details: same business fields, fresh id.
    pub fn next_version(&self, created_by: Uuid) -> OrderDetails {
        OrderDetails {
            order_details_id: Uuid::new_v4(),
            version: self.version + 1,
            created_by,
            created_utc: Utc::now(),
            ..self.clone()
        }
    }
}

/// A cart line joined with the product's fiscal metadata.
///
/// Amounts are tax inclusive. Optional fields mirror what the catalog may be missing;
/// the compiler rejects lines it cannot price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CartLine {
    pub product_id: Uuid,
    pub description: String,
    /// SAT product/service key.
    pub product_key: String,
    /// SAT unit key.
    pub unit_key: String,
    pub unit_name: String,
    pub quantity: Option<Decimal>,
    /// Tax-inclusive line subtotal.
    pub subtotal: Option<Decimal>,
    /// IVA rate as a fraction (0.16).
    pub tax_rate: Option<Decimal>,
    /// IEPS rate as a fraction, when the product carries excise.
    pub excise_rate: Option<Decimal>,
}

/// A cart line tagged with the order it came from, for consolidated grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderCart {
    pub details: OrderDetails,
    pub lines: Vec<CartLine>,
}
