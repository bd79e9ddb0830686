//! Fiscal line items derived from cart lines. Never persisted.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::fiscal::TaxKind;

/// One transferred tax applied to a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxEntry {
    pub kind: TaxKind,
    pub rate: Decimal,
    pub base: Decimal,
    pub total: Decimal,
}

/// A line of a fiscal document.
///
/// `total == round(subtotal + Σ taxes.total, 4)` and every amount is rounded to 4 decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_key: String,
    pub unit_key: String,
    pub unit_name: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub taxes: Vec<TaxEntry>,
    pub total: Decimal,
}

impl LineItem {
    pub fn tax_total(&self) -> Decimal {
        self.taxes.iter().map(|t| t.total).sum()
    }

    pub fn tax_total_of(&self, kind: TaxKind) -> Decimal {
        self.taxes
            .iter()
            .filter(|t| t.kind == kind)
            .map(|t| t.total)
            .sum()
    }
}
