//! 64.64 fixed-point helpers.
//!
//! Products and quotients go through a `BigUint` intermediate so no
//! precision is lost before the final truncation back to 128 bits.

use num_bigint::BigUint;

use super::model::AssetError;

pub const FRACTION_BITS: u32 = 64;

/// 1.0 in 64.64 representation.
pub const ONE: u128 = 1u128 << FRACTION_BITS;

pub fn fixed_mul(a: u128, b: u128) -> Result<u128, AssetError> {
    let product = (BigUint::from(a) * BigUint::from(b)) >> FRACTION_BITS;
    u128::try_from(&product).map_err(|_| AssetError::Overflow)
}

pub fn fixed_div(a: u128, b: u128) -> Result<u128, AssetError> {
    if b == 0 {
        return Err(AssetError::DivisionByZero);
    }
    let quotient = (BigUint::from(a) << FRACTION_BITS) / BigUint::from(b);
    u128::try_from(&quotient).map_err(|_| AssetError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_and_div_by_one_are_identity() {
        let x = 12_345u128 << 64 | 777;
        assert_eq!(fixed_mul(x, ONE).unwrap(), x);
        assert_eq!(fixed_div(x, ONE).unwrap(), x);
    }

    #[test]
    fn half_of_three() {
        let three = 3 * ONE;
        let half = ONE / 2;
        assert_eq!(fixed_mul(three, half).unwrap(), ONE + ONE / 2);
        assert_eq!(fixed_div(three, 2 * ONE).unwrap(), ONE + ONE / 2);
    }

    #[test]
    fn overflow_and_zero_are_reported() {
        assert_eq!(fixed_mul(u128::MAX, 4 * ONE), Err(AssetError::Overflow));
        assert_eq!(fixed_div(ONE, 0), Err(AssetError::DivisionByZero));
        assert_eq!(fixed_div(u128::MAX, 1), Err(AssetError::Overflow));
    }
}
