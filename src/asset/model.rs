use std::fmt;
use std::ops::{Div, Mul};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fixed::{FRACTION_BITS, ONE, fixed_div, fixed_mul};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("fixed-point overflow")]
    Overflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("unit mismatch: {0} vs {1}")]
    UnitMismatch(AssetType, AssetType),
    #[error("price base {0} must sort before quote {1}")]
    BadOrientation(AssetType, AssetType),
}

/// Asset types known to the chain. The ordinal decides price orientation:
/// the lower ordinal is always the base (denominator) of a price.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum AssetType {
    #[default]
    Bts = 0,
    Usd = 1,
    Cny = 2,
    Btc = 3,
    Gld = 4,
    Eur = 5,
    Jpy = 6,
}

impl AssetType {
    pub const COUNT: usize = 7;

    pub const ALL: [AssetType; AssetType::COUNT] = [
        AssetType::Bts,
        AssetType::Usd,
        AssetType::Cny,
        AssetType::Btc,
        AssetType::Gld,
        AssetType::Eur,
        AssetType::Jpy,
    ];

    /// The chain's own currency: pays fees, rewards and collateral.
    pub const NATIVE: AssetType = AssetType::Bts;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn symbol(self) -> &'static str {
        match self {
            AssetType::Bts => "BTS",
            AssetType::Usd => "USD",
            AssetType::Cny => "CNY",
            AssetType::Btc => "BTC",
            AssetType::Gld => "GLD",
            AssetType::Eur => "EUR",
            AssetType::Jpy => "JPY",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// An amount of one asset type, 64.64 fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Asset {
    pub amount: u128,
    pub unit: AssetType,
}

impl Asset {
    pub fn new(amount: u128, unit: AssetType) -> Self {
        Self { amount, unit }
    }

    /// Whole units, e.g. `Asset::from_units(5, AssetType::Bts)` is 5 BTS.
    pub fn from_units(units: u64, unit: AssetType) -> Self {
        Self {
            amount: u128::from(units) << FRACTION_BITS,
            unit,
        }
    }

    pub fn zero(unit: AssetType) -> Self {
        Self { amount: 0, unit }
    }

    /// Integer part of the amount.
    pub fn units(&self) -> u64 {
        (self.amount >> FRACTION_BITS) as u64
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    pub fn checked_add(self, other: Asset) -> Result<Asset, AssetError> {
        self.same_unit(&other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(AssetError::Overflow)?;
        Ok(Asset::new(amount, self.unit))
    }

    pub fn checked_sub(self, other: Asset) -> Result<Asset, AssetError> {
        self.same_unit(&other)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or(AssetError::Overflow)?;
        Ok(Asset::new(amount, self.unit))
    }

    /// Scale by a 64.64 fraction (dividend percent, fee share...).
    pub fn scale(self, fraction: u128) -> Result<Asset, AssetError> {
        Ok(Asset::new(fixed_mul(self.amount, fraction)?, self.unit))
    }

    fn same_unit(&self, other: &Asset) -> Result<(), AssetError> {
        if self.unit != other.unit {
            return Err(AssetError::UnitMismatch(self.unit, other.unit));
        }
        Ok(())
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frac = (self.amount & (ONE - 1)) as u64;
        let micro = ((u128::from(frac) * 100_000_000) >> FRACTION_BITS) as u64;
        write!(f, "{}.{:08} {}", self.units(), micro, self.unit)
    }
}

/// Price of `quote_unit` expressed per one `base_unit`, 64.64 fixed point.
///
/// `base_unit < quote_unit` always holds, so a pair has exactly one
/// representation no matter which side asked for the price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    pub ratio: u128,
    pub base_unit: AssetType,
    pub quote_unit: AssetType,
}

impl Price {
    pub fn new(ratio: u128, base_unit: AssetType, quote_unit: AssetType) -> Result<Self, AssetError> {
        let price = Self {
            ratio,
            base_unit,
            quote_unit,
        };
        price.validate()?;
        Ok(price)
    }

    /// `quote` units per `base` units, e.g. `from_fraction(3, 2, Bts, Usd)` is 1.5 USD/BTS.
    pub fn from_fraction(
        quote: u64,
        base: u64,
        base_unit: AssetType,
        quote_unit: AssetType,
    ) -> Result<Self, AssetError> {
        let ratio = fixed_div(u128::from(quote), u128::from(base))?;
        Self::new(ratio, base_unit, quote_unit)
    }

    pub fn validate(&self) -> Result<(), AssetError> {
        if self.base_unit >= self.quote_unit {
            return Err(AssetError::BadOrientation(self.base_unit, self.quote_unit));
        }
        if self.ratio == 0 {
            return Err(AssetError::DivisionByZero);
        }
        Ok(())
    }

    /// Whichever side of the pair `unit` is not.
    pub fn other_unit(&self, unit: AssetType) -> Result<AssetType, AssetError> {
        if unit == self.base_unit {
            Ok(self.quote_unit)
        } else if unit == self.quote_unit {
            Ok(self.base_unit)
        } else {
            Err(AssetError::UnitMismatch(unit, self.base_unit))
        }
    }

    /// Value of `asset` in the opposite unit of this pair.
    pub fn convert(&self, asset: Asset) -> Result<Asset, AssetError> {
        if asset.unit == self.base_unit {
            asset * *self
        } else {
            asset / *self
        }
    }
}

/// `a / b` is the price of the pair, oriented by unit ordinal.
impl Div for Asset {
    type Output = Result<Price, AssetError>;

    fn div(self, rhs: Asset) -> Self::Output {
        if self.unit == rhs.unit {
            return Err(AssetError::UnitMismatch(self.unit, rhs.unit));
        }
        let (base, quote) = if self.unit < rhs.unit {
            (self, rhs)
        } else {
            (rhs, self)
        };
        Price::new(fixed_div(quote.amount, base.amount)?, base.unit, quote.unit)
    }
}

/// base amount * price = quote amount
impl Mul<Price> for Asset {
    type Output = Result<Asset, AssetError>;

    fn mul(self, rhs: Price) -> Self::Output {
        if self.unit != rhs.base_unit {
            return Err(AssetError::UnitMismatch(self.unit, rhs.base_unit));
        }
        Ok(Asset::new(fixed_mul(self.amount, rhs.ratio)?, rhs.quote_unit))
    }
}

/// quote amount / price = base amount
impl Div<Price> for Asset {
    type Output = Result<Asset, AssetError>;

    fn div(self, rhs: Price) -> Self::Output {
        if self.unit != rhs.quote_unit {
            return Err(AssetError::UnitMismatch(self.unit, rhs.quote_unit));
        }
        Ok(Asset::new(fixed_div(self.amount, rhs.ratio)?, rhs.base_unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn price_orientation_ignores_call_order() {
        let usd = Asset::from_units(300, AssetType::Usd);
        let bts = Asset::from_units(100, AssetType::Bts);
        let a = (usd / bts).unwrap();
        let b = (bts / usd).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.base_unit, AssetType::Bts);
        assert_eq!(a.quote_unit, AssetType::Usd);
        assert_eq!(a.ratio, 3 * ONE);
    }

    #[test]
    fn same_unit_has_no_price() {
        let x = Asset::from_units(1, AssetType::Usd);
        assert!(matches!(x / x, Err(AssetError::UnitMismatch(_, _))));
    }

    #[test]
    fn price_rejects_inverted_pair() {
        assert_eq!(
            Price::new(ONE, AssetType::Usd, AssetType::Bts),
            Err(AssetError::BadOrientation(AssetType::Usd, AssetType::Bts))
        );
    }

    #[test]
    fn convert_goes_both_ways() {
        let p = Price::from_fraction(3, 2, AssetType::Bts, AssetType::Usd).unwrap();
        let usd = p.convert(Asset::from_units(10, AssetType::Bts)).unwrap();
        assert_eq!(usd, Asset::from_units(15, AssetType::Usd));
        let bts = p.convert(usd).unwrap();
        assert_eq!(bts, Asset::from_units(10, AssetType::Bts));
        assert!(p.convert(Asset::from_units(1, AssetType::Gld)).is_err());
    }

    #[test]
    fn add_sub_check_unit_and_overflow() {
        let a = Asset::from_units(2, AssetType::Bts);
        let b = Asset::from_units(3, AssetType::Bts);
        assert_eq!(a.checked_add(b).unwrap(), Asset::from_units(5, AssetType::Bts));
        assert_eq!(a.checked_sub(b), Err(AssetError::Overflow));
        assert!(a.checked_add(Asset::from_units(1, AssetType::Usd)).is_err());
        let max = Asset::new(u128::MAX, AssetType::Bts);
        assert_eq!(max.checked_add(a), Err(AssetError::Overflow));
    }

    #[test]
    fn display_shows_units_and_fraction() {
        let a = Asset::new((7u128 << 64) + ONE / 4, AssetType::Usd);
        assert_eq!(a.to_string(), "7.25000000 USD");
    }

    fn any_unit() -> impl Strategy<Value = AssetType> {
        (0usize..AssetType::COUNT).prop_map(|i| AssetType::from_index(i).unwrap())
    }

    proptest! {
        #[test]
        fn base_is_always_lower_ordinal(
            ua in any_unit(),
            ub in any_unit(),
            xa in 1u64..1_000_000_000,
            xb in 1u64..1_000_000_000,
        ) {
            prop_assume!(ua != ub);
            let a = Asset::from_units(xa, ua);
            let b = Asset::from_units(xb, ub);
            let p = (a / b).unwrap();
            prop_assert_eq!(p.base_unit, ua.min(ub));
            prop_assert_eq!(p, (b / a).unwrap());
        }

        #[test]
        fn quote_round_trips_within_one_unit(
            quote in 1u64..1_000_000_000,
            base in 1u64..1_000_000,
            x in 0u64..1_000_000_000_000,
        ) {
            let p = Price::from_fraction(quote, base, AssetType::Bts, AssetType::Usd).unwrap();
            let x = Asset::from_units(x, AssetType::Usd);
            let back = ((x / p).unwrap() * p).unwrap();
            prop_assert_eq!(back.unit, AssetType::Usd);
            prop_assert!(x.amount.abs_diff(back.amount) <= ONE);
        }
    }
}
