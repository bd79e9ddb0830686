//! Property tests for the line-item compiler.

use cfdi_service::line_items::{
    compile_consolidated, compile_order, round4, tax_total, ShippingConcept,
};
use cfdi_service::models::{CartLine, OrderCart, OrderDetails};
use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn arb_gross() -> impl Strategy<Value = Decimal> {
    (1i64..5_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn arb_quantity() -> impl Strategy<Value = Decimal> {
    prop_oneof![
        (1i64..50i64).prop_map(Decimal::from),
        (1i64..5_000i64).prop_map(|grams| Decimal::new(grams, 3)),
    ]
}

fn arb_tax_rate() -> impl Strategy<Value = Decimal> {
    prop_oneof![Just(dec!(0)), Just(dec!(0.08)), Just(dec!(0.16))]
}

fn arb_excise_rate() -> impl Strategy<Value = Option<Decimal>> {
    prop_oneof![Just(None), Just(Some(dec!(0.08))), Just(Some(dec!(0.265)))]
}

fn arb_line() -> impl Strategy<Value = CartLine> {
    (
        "[A-Z][a-z]{2,10}",
        arb_quantity(),
        arb_gross(),
        arb_tax_rate(),
        arb_excise_rate(),
    )
        .prop_map(|(description, quantity, gross, tax_rate, excise_rate)| CartLine {
            product_id: Uuid::new_v4(),
            description,
            product_key: "50192100".to_string(),
            unit_key: "KGM".to_string(),
            unit_name: "Kilogramo".to_string(),
            quantity: Some(quantity),
            subtotal: Some(gross),
            tax_rate: Some(tax_rate),
            excise_rate,
        })
}

fn arb_shipping() -> impl Strategy<Value = Option<Decimal>> {
    prop_oneof![Just(None), Just(Some(dec!(0))), arb_gross().prop_map(Some)]
}

fn cart(lines: Vec<CartLine>, shipping_cost: Option<Decimal>) -> OrderCart {
    OrderCart {
        details: OrderDetails {
            order_details_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            version: 1,
            cart_id: Uuid::new_v4(),
            subtotal: Decimal::ZERO,
            tax: Decimal::ZERO,
            shipping_cost,
            total: Decimal::ZERO,
            delivery_date: None,
            status: "delivered".to_string(),
            comments: None,
            created_by: Uuid::new_v4(),
            created_utc: Utc::now(),
        },
        lines,
    }
}

fn distinct(lines: Vec<CartLine>) -> Vec<CartLine> {
    let mut seen = std::collections::HashSet::new();
    lines
        .into_iter()
        .filter(|l| seen.insert(l.description.clone()))
        .collect()
}

proptest! {
    #[test]
    fn amounts_carry_at_most_four_decimals(
        lines in prop::collection::vec(arb_line(), 1..8),
        shipping in arb_shipping(),
    ) {
        let items = compile_order(&lines, shipping, &ShippingConcept::default()).unwrap();
        for item in &items {
            prop_assert!(item.subtotal.scale() <= 4);
            prop_assert!(item.unit_price.scale() <= 4);
            prop_assert!(item.total.scale() <= 4);
            for tax in &item.taxes {
                prop_assert!(tax.total.scale() <= 4);
                prop_assert_eq!(tax.base, item.subtotal);
            }
        }
    }

    #[test]
    fn item_total_is_subtotal_plus_taxes(
        lines in prop::collection::vec(arb_line(), 1..8),
        shipping in arb_shipping(),
    ) {
        let items = compile_order(&lines, shipping, &ShippingConcept::default()).unwrap();
        for item in &items {
            prop_assert_eq!(item.total, round4(item.subtotal + item.tax_total()));
        }
    }

    #[test]
    fn lines_are_sorted_and_shipping_comes_last(
        lines in prop::collection::vec(arb_line(), 1..8),
        shipping in arb_shipping(),
    ) {
        let concept = ShippingConcept::default();
        let items = compile_order(&lines, shipping, &concept).unwrap();
        let has_shipping = shipping.map_or(false, |cost| cost > Decimal::ZERO);

        prop_assert_eq!(items.len(), lines.len() + usize::from(has_shipping));
        let goods = if has_shipping {
            let last = items.last().unwrap();
            prop_assert_eq!(&last.product_key, &concept.product_key);
            prop_assert_eq!(last.taxes[0].rate, dec!(0.16));
            &items[..items.len() - 1]
        } else {
            &items[..]
        };
        prop_assert!(goods.windows(2).all(|w| w[0].description <= w[1].description));
    }

    #[test]
    fn tax_inclusive_amount_is_preserved_within_rounding(
        lines in prop::collection::vec(arb_line(), 1..8),
    ) {
        let items = compile_order(&lines, None, &ShippingConcept::default()).unwrap();
        let gross: Decimal = lines.iter().filter_map(|l| l.subtotal).sum();
        let compiled: Decimal = items.iter().map(|i| i.total).sum();
        // Each line may drift by a few ten-thousandths.
        prop_assert!((gross - compiled).abs() <= dec!(0.001) * Decimal::from(items.len()));
    }

    #[test]
    fn consolidating_one_cart_matches_compiling_it(
        lines in prop::collection::vec(arb_line(), 1..8),
        shipping in arb_shipping(),
    ) {
        let lines = distinct(lines);
        let concept = ShippingConcept::default();
        let single = compile_order(&lines, shipping, &concept).unwrap();
        let consolidated = compile_consolidated(&[cart(lines, shipping)], &concept).unwrap();
        prop_assert_eq!(single, consolidated);
    }

    #[test]
    fn consolidating_a_cart_twice_doubles_quantities(
        lines in prop::collection::vec(arb_line(), 1..8),
    ) {
        let lines = distinct(lines);
        let concept = ShippingConcept::default();
        let once = compile_order(&lines, None, &concept).unwrap();
        let twice = compile_consolidated(
            &[cart(lines.clone(), None), cart(lines, None)],
            &concept,
        )
        .unwrap();

        prop_assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(&twice) {
            prop_assert_eq!(&a.description, &b.description);
            prop_assert_eq!(a.quantity * dec!(2), b.quantity);
        }
        let drift = (tax_total(&once) * dec!(2) - tax_total(&twice)).abs();
        prop_assert!(drift <= dec!(0.001) * Decimal::from(once.len()));
    }
}
