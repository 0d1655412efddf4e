//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

/// Identifier of the user who placed an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog product identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

impl ProductId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monetary amount in cents.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Largest amount an order may total: ten billion in major units.
    pub const MAX: Money = Money(1_000_000_000_000);

    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    /// Converts a decimal amount to cents, rounding half to even.
    ///
    /// The scaled value is first snapped to six decimal places so binary
    /// noise (`10.005 * 100 == 1000.4999999999999`) does not decide the
    /// rounding direction.
    ///
    /// `None` when the amount is not finite or its magnitude exceeds
    /// [`Money::MAX`].
    pub fn round_half_even(amount: f64) -> Option<Self> {
        let scaled = ((amount * 100.0) * 1e6).round() / 1e6;
        let cents = scaled.round_ties_even();
        if !cents.is_finite() || cents.abs() > Self::MAX.0 as f64 {
            return None;
        }
        Some(Self(cents as i64))
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    /// The amount in major units, e.g. `20.0` for 2000 cents.
    pub fn as_major(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// The two-digit fractional part, e.g. `99` for 10.99.
    pub fn cents_part(&self) -> i64 {
        self.0.abs() % 100
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{sign}{}.{:02}", self.0.abs() / 100, self.cents_part())
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

/// One line of an order as submitted: price is the decimal unit price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: f64,
}

impl OrderItem {
    pub fn new(product_id: i64, quantity: u32, price: f64) -> Self {
        Self {
            product_id: ProductId::new(product_id),
            quantity,
            price,
        }
    }

    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

/// Sums `price * quantity` over all lines in one pass and rounds once.
/// `None` when the sum is out of range.
pub fn order_total(items: &[OrderItem]) -> Option<Money> {
    Money::round_half_even(items.iter().map(OrderItem::line_total).sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_to_even() {
        let cents = |amount| Money::round_half_even(amount).unwrap().cents();
        assert_eq!(cents(20.0), 2000);
        assert_eq!(cents(10.005), 1000);
        assert_eq!(cents(10.015), 1002);
        assert_eq!(cents(0.125), 12);
        assert_eq!(cents(19.99), 1999);
    }

    #[test]
    fn out_of_range_amounts_do_not_convert() {
        assert_eq!(Money::round_half_even(f64::INFINITY), None);
        assert_eq!(Money::round_half_even(f64::NAN), None);
        assert_eq!(Money::round_half_even(1e17), None);
        assert_eq!(Money::round_half_even(-1e17), None);
        assert_eq!(
            Money::round_half_even(Money::MAX.as_major()),
            Some(Money::MAX)
        );
    }

    #[test]
    fn total_is_rounded_once() {
        // Per-line rounding would give 0.01 + 0.01 + 0.01 = 0.03.
        let items = vec![
            OrderItem::new(1, 1, 0.005),
            OrderItem::new(2, 1, 0.005),
            OrderItem::new(3, 1, 0.005),
        ];
        assert_eq!(order_total(&items).unwrap().cents(), 2);
    }

    #[test]
    fn scenario_total() {
        let items = vec![OrderItem::new(1, 2, 10.00)];
        assert_eq!(order_total(&items), Some(Money::from_cents(2000)));
    }

    #[test]
    fn display_and_parts() {
        let money = Money::from_cents(1099);
        assert_eq!(money.to_string(), "10.99");
        assert_eq!(money.cents_part(), 99);
        assert_eq!(money.as_major(), 10.99);
        assert_eq!(Money::from_cents(-5).to_string(), "-0.05");
    }

    #[test]
    fn item_wire_format_is_camel_case() {
        let item: OrderItem =
            serde_json::from_str(r#"{"productId": 7, "quantity": 3, "price": 2.5}"#).unwrap();
        assert_eq!(item, OrderItem::new(7, 3, 2.5));
        assert_eq!(item.line_total(), 7.5);
    }
}
