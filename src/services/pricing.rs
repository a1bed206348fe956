use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::entities::product;
use crate::errors::ServiceError;

/// Tolerance for comparing a client-claimed total against the server-side
/// recomputation. Covers float rounding in storefront clients; anything
/// larger is treated as tampering.
const TOTAL_EPSILON: Decimal = dec!(0.01);

/// A cart line re-priced from the catalog row, never from client input.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub name: String,
    pub image: Option<String>,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub quantity: i32,
    /// Effective per-unit price after discount, rounded to 2 decimal places.
    pub purchased_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
}

/// Recomputes every line from catalog data. Quantities must already be
/// validated as positive.
pub fn price_cart(items: &[(product::Model, i32)]) -> PricedCart {
    let mut lines = Vec::with_capacity(items.len());
    let mut subtotal = Decimal::ZERO;
    for (product, quantity) in items {
        let purchased_price = effective_unit_price(product.price, product.discount_percent);
        let line_total = purchased_price * Decimal::from(*quantity);
        subtotal += line_total;
        lines.push(PricedLine {
            product_id: product.id,
            name: product.name.clone(),
            image: product.image.clone(),
            unit_price: product.price,
            discount_percent: product.discount_percent,
            quantity: *quantity,
            purchased_price,
            line_total,
        });
    }
    PricedCart { lines, subtotal }
}

/// Per-unit price after discount, rounded to 2 decimal places.
pub fn effective_unit_price(price: Decimal, discount_percent: Decimal) -> Decimal {
    let factor = (dec!(100) - discount_percent) / dec!(100);
    (price * factor).round_dp(2)
}

/// Rejects the order when the client-claimed total drifts more than
/// [`TOTAL_EPSILON`] from the server-side subtotal.
pub fn verify_order_total(priced: &PricedCart, claimed_total: Decimal) -> Result<(), ServiceError> {
    let diff = (priced.subtotal - claimed_total).abs();
    if diff > TOTAL_EPSILON {
        tracing::warn!(
            server_total = %priced.subtotal,
            claimed_total = %claimed_total,
            "order total mismatch"
        );
        return Err(ServiceError::PriceMismatch);
    }
    Ok(())
}
