//! Precision-safe decimal types for order bookkeeping.
//!
//! Uses `rust_decimal` so that fill accumulation and average-price
//! computation never drift the way binary floats do.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

/// Price with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

/// Order quantity with exact decimal precision.
///
/// Kept distinct from [`Price`] so that fill accumulators cannot be mixed up
/// with prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(pub Decimal);

impl Quantity {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Subtraction clamped at zero.
    #[inline]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if rhs.0 >= self.0 {
            Self::ZERO
        } else {
            Self(self.0 - rhs.0)
        }
    }

    /// Calculate notional value: quantity * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Quantity {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Quantity {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Quantity {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Quantity {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// Volume-weighted average after adding `qty @ price` to `prev_qty @ prev_avg`.
///
/// Returns `prev_avg` unchanged when the combined quantity is zero.
pub fn weighted_average(prev_qty: Quantity, prev_avg: Price, qty: Quantity, price: Price) -> Price {
    let total = prev_qty.0 + qty.0;
    if total.is_zero() {
        return prev_avg;
    }
    Price((prev_qty.notional(prev_avg) + qty.notional(price)) / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_weighted_average() {
        let avg = weighted_average(
            Quantity::new(dec!(40)),
            Price::new(dec!(10)),
            Quantity::new(dec!(60)),
            Price::new(dec!(15)),
        );
        assert_eq!(avg, Price::new(dec!(13)));
    }

    #[test]
    fn test_weighted_average_from_empty() {
        let avg = weighted_average(
            Quantity::ZERO,
            Price::ZERO,
            Quantity::new(dec!(5)),
            Price::new(dec!(2.5)),
        );
        assert_eq!(avg, Price::new(dec!(2.5)));
    }

    #[test]
    fn test_quantity_saturating_sub() {
        let a = Quantity::new(dec!(3));
        let b = Quantity::new(dec!(5));
        assert_eq!(a.saturating_sub(b), Quantity::ZERO);
        assert_eq!(b.saturating_sub(a), Quantity::new(dec!(2)));
    }

    #[test]
    fn test_quantity_parse() {
        let q: Quantity = "12.50".parse().unwrap();
        assert_eq!(q.inner(), dec!(12.50));
        assert!(q.is_positive());
    }
}
