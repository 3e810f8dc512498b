//! Monetary amounts.
//!
//! Prices and totals are stored as minor units (cents) and only become
//! [`Decimal`] values at the API boundary.

use rust_decimal::Decimal;

/// Number of decimal places carried by every amount.
pub const SCALE: u32 = 2;

/// Converts an amount in minor units to a two-decimal [`Decimal`].
pub fn to_decimal(minor: i64) -> Decimal {
    Decimal::new(minor, SCALE)
}

/// Price of `quantity` units at `unit_price` minor units, `None` on overflow.
pub fn line_total(unit_price: i64, quantity: i32) -> Option<i64> {
    unit_price.checked_mul(i64::from(quantity))
}

/// Sums line totals, `None` on overflow.
pub fn sum<I>(amounts: I) -> Option<i64>
where
    I: IntoIterator<Item = i64>,
{
    amounts
        .into_iter()
        .try_fold(0i64, |acc, amount| acc.checked_add(amount))
}
