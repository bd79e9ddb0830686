//! Line-item and tax compiler.
//!
//! Turns tax-inclusive cart lines into fiscal line items with their tax
//! breakdown. Every amount is rounded to 4 decimals, half away from zero, and
//! output is sorted by description so the same cart always yields the same
//! document. A synthetic shipping line, when present, is always last.
//!
//! The compiler only computes; reconciling against an order's recorded tax is
//! up to the caller.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{CfdiError, CfdiResult};
use crate::models::{CartLine, LineItem, OrderCart, TaxEntry, TaxKind};

/// Fixed IVA rate applied to shipping.
pub fn shipping_tax_rate() -> Decimal {
    Decimal::new(16, 2)
}

/// Round to the 4 decimals fiscal line amounts carry.
pub fn round4(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
}

/// Round to cents.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Catalog identity of the synthetic shipping line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShippingConcept {
    pub product_key: String,
    pub unit_key: String,
    pub unit_name: String,
    pub description: String,
}

impl Default for ShippingConcept {
    fn default() -> Self {
        Self {
            product_key: "78102203".to_string(),
            unit_key: "E48".to_string(),
            unit_name: "Unidad de servicio".to_string(),
            description: "Envío".to_string(),
        }
    }
}

/// A cart line whose pricing inputs have been checked.
#[derive(Debug, Clone)]
struct PricedLine<'a> {
    line: &'a CartLine,
    quantity: Decimal,
    gross: Decimal,
    tax_rate: Decimal,
    excise_rate: Option<Decimal>,
}

fn validate(line: &CartLine) -> CfdiResult<PricedLine<'_>> {
    let tax_rate = line.tax_rate.ok_or_else(|| {
        CfdiError::validation(format!("product '{}' has no tax rate", line.description))
    })?;
    if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE {
        return Err(CfdiError::validation(format!(
            "product '{}' has an invalid tax rate {}",
            line.description, tax_rate
        )));
    }

    if let Some(excise) = line.excise_rate {
        if excise < Decimal::ZERO || excise > Decimal::ONE {
            return Err(CfdiError::validation(format!(
                "product '{}' has an invalid excise rate {}",
                line.description, excise
            )));
        }
    }

    let quantity = line.quantity.ok_or_else(|| {
        CfdiError::validation(format!("product '{}' has no quantity", line.description))
    })?;
    if quantity <= Decimal::ZERO {
        return Err(CfdiError::validation(format!(
            "product '{}' has a non-positive quantity {}",
            line.description, quantity
        )));
    }

    let gross = line.subtotal.ok_or_else(|| {
        CfdiError::validation(format!("product '{}' has no subtotal", line.description))
    })?;
    if gross < Decimal::ZERO {
        return Err(CfdiError::validation(format!(
            "product '{}' has a negative subtotal {}",
            line.description, gross
        )));
    }

    Ok(PricedLine {
        line,
        quantity,
        gross,
        tax_rate,
        excise_rate: line.excise_rate.filter(|rate| !rate.is_zero()),
    })
}

#[allow(clippy::too_many_arguments)]
fn price(
    product_key: &str,
    unit_key: &str,
    unit_name: &str,
    description: &str,
    quantity: Decimal,
    gross: Decimal,
    tax_rate: Decimal,
    excise_rate: Option<Decimal>,
) -> LineItem {
    let divisor = Decimal::ONE + tax_rate + excise_rate.unwrap_or(Decimal::ZERO);
    let subtotal = round4(gross / divisor);
    let unit_price = round4(subtotal / quantity);

    let mut taxes = vec![TaxEntry {
        kind: TaxKind::Iva,
        rate: tax_rate,
        base: subtotal,
        total: round4(subtotal * tax_rate),
    }];
    if let Some(rate) = excise_rate {
        taxes.push(TaxEntry {
            kind: TaxKind::Ieps,
            rate,
            base: subtotal,
            total: round4(subtotal * rate),
        });
    }

    let total = round4(subtotal + taxes.iter().map(|t| t.total).sum::<Decimal>());

    LineItem {
        product_key: product_key.to_string(),
        unit_key: unit_key.to_string(),
        unit_name: unit_name.to_string(),
        description: description.to_string(),
        quantity,
        unit_price,
        subtotal,
        taxes,
        total,
    }
}

/// Compile a single cart line.
pub fn compile_line(line: &CartLine) -> CfdiResult<LineItem> {
    let priced = validate(line)?;
    Ok(price_validated(&priced))
}

fn price_validated(priced: &PricedLine<'_>) -> LineItem {
    price(
        &priced.line.product_key,
        &priced.line.unit_key,
        &priced.line.unit_name,
        &priced.line.description,
        priced.quantity,
        priced.gross,
        priced.tax_rate,
        priced.excise_rate,
    )
}

fn shipping_item(shipping_cost: Decimal, concept: &ShippingConcept) -> LineItem {
    price(
        &concept.product_key,
        &concept.unit_key,
        &concept.unit_name,
        &concept.description,
        Decimal::ONE,
        shipping_cost,
        shipping_tax_rate(),
        None,
    )
}

fn finish(
    mut items: Vec<LineItem>,
    shipping_cost: Option<Decimal>,
    concept: &ShippingConcept,
) -> Vec<LineItem> {
    items.sort_by(|a, b| a.description.cmp(&b.description));
    if let Some(cost) = shipping_cost.filter(|cost| *cost > Decimal::ZERO) {
        items.push(shipping_item(cost, concept));
    }
    items
}

/// Compile one order's cart.
pub fn compile_order(
    lines: &[CartLine],
    shipping_cost: Option<Decimal>,
    concept: &ShippingConcept,
) -> CfdiResult<Vec<LineItem>> {
    let items = lines
        .iter()
        .map(compile_line)
        .collect::<CfdiResult<Vec<_>>>()?;
    Ok(finish(items, shipping_cost, concept))
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    description: String,
    unit_key: String,
    unit_price: Decimal,
    tax_rate: Decimal,
    excise_rate: Option<Decimal>,
}

/// Compile the carts of several orders into one set of lines.
///
/// Lines with the same description, unit, tax-inclusive unit price and rates
/// are merged across orders by summing quantity and gross subtotal; each group
/// is then priced with the single-line formula. Shipping costs of all orders
/// collapse into one shipping line.
pub fn compile_consolidated(
    carts: &[OrderCart],
    concept: &ShippingConcept,
) -> CfdiResult<Vec<LineItem>> {
    let mut groups: BTreeMap<GroupKey, (PricedLine<'_>, Decimal, Decimal)> = BTreeMap::new();

    for cart in carts {
        for line in &cart.lines {
            let priced = validate(line)?;
            let key = GroupKey {
                description: line.description.clone(),
                unit_key: line.unit_key.clone(),
                unit_price: round4(priced.gross / priced.quantity),
                tax_rate: priced.tax_rate,
                excise_rate: priced.excise_rate,
            };
            let (quantity, gross) = (priced.quantity, priced.gross);
            groups
                .entry(key)
                .and_modify(|(_, q, g)| {
                    *q += quantity;
                    *g += gross;
                })
                .or_insert((priced, quantity, gross));
        }
    }

    let items = groups
        .into_values()
        .map(|(priced, quantity, gross)| {
            price_validated(&PricedLine {
                quantity,
                gross,
                ..priced
            })
        })
        .collect();

    let shipping: Decimal = carts
        .iter()
        .filter_map(|cart| cart.details.shipping_cost)
        .filter(|cost| *cost > Decimal::ZERO)
        .sum();

    Ok(finish(items, Some(shipping), concept))
}

/// Sum of every tax entry across the items.
pub fn tax_total(items: &[LineItem]) -> Decimal {
    items.iter().map(LineItem::tax_total).sum()
}

pub fn subtotal(items: &[LineItem]) -> Decimal {
    items.iter().map(|item| item.subtotal).sum()
}

pub fn total(items: &[LineItem]) -> Decimal {
    items.iter().map(|item| item.total).sum()
}
