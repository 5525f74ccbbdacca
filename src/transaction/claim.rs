//! Spending conditions attached to outputs.

use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetType, Price};
use crate::error::{ChainError, ChainResult};
use crate::hash::Hash256;
use crate::wallet::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimType {
    Signature,
    Bid,
    Ask,
    Long,
    Cover,
    OptExecute,
    MultiSig,
    Escrow,
    Password,
}

/// Limit order (bid/ask) or margin offer (long).
///
/// A bid offers the price's quote unit to buy base, an ask offers base to
/// buy quote, a long offers native collateral to open a margin position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderClaim {
    pub owner: Address,
    pub price: Price,
    /// Smallest partial fill accepted, in the offered unit.
    pub min_trade: u128,
}

/// Open margin position: the output holds native collateral and the owner
/// owes `payoff` before the collateral is released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverClaim {
    pub owner: Address,
    pub payoff: Asset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionClaim {
    pub writer: Address,
    pub holder: Address,
    /// Exercising converts the locked amount at this price into the payment.
    pub strike: Price,
    pub expire_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSigClaim {
    pub required: u16,
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowClaim {
    pub payer: Address,
    pub payee: Address,
    pub agent: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordClaim {
    pub payer: Address,
    pub payee: Address,
    /// SHA-256 of the password the payee reveals.
    pub password_hash: Hash256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Claim {
    Signature { owner: Address },
    Bid(OrderClaim),
    Ask(OrderClaim),
    Long(OrderClaim),
    Cover(CoverClaim),
    OptExecute(OptionClaim),
    MultiSig(MultiSigClaim),
    Escrow(EscrowClaim),
    Password(PasswordClaim),
}

impl Claim {
    pub fn claim_type(&self) -> ClaimType {
        match self {
            Claim::Signature { .. } => ClaimType::Signature,
            Claim::Bid(_) => ClaimType::Bid,
            Claim::Ask(_) => ClaimType::Ask,
            Claim::Long(_) => ClaimType::Long,
            Claim::Cover(_) => ClaimType::Cover,
            Claim::OptExecute(_) => ClaimType::OptExecute,
            Claim::MultiSig(_) => ClaimType::MultiSig,
            Claim::Escrow(_) => ClaimType::Escrow,
            Claim::Password(_) => ClaimType::Password,
        }
    }

    /// Every address with a say over this output.
    pub fn parties(&self) -> Vec<Address> {
        match self {
            Claim::Signature { owner } => vec![*owner],
            Claim::Bid(o) | Claim::Ask(o) | Claim::Long(o) => vec![o.owner],
            Claim::Cover(c) => vec![c.owner],
            Claim::OptExecute(o) => vec![o.holder, o.writer],
            Claim::MultiSig(m) => m.addresses.clone(),
            Claim::Escrow(e) => vec![e.payer, e.payee, e.agent],
            Claim::Password(p) => vec![p.payee, p.payer],
        }
    }

    /// Checks that depend only on the output itself.
    pub fn check_structure(&self, amount: &Asset) -> ChainResult<()> {
        match self {
            Claim::Signature { .. } | Claim::Escrow(_) | Claim::Password(_) => Ok(()),
            Claim::Bid(order) => {
                order.price.validate()?;
                expect_unit(amount, order.price.quote_unit, "bid")
            }
            Claim::Ask(order) => {
                order.price.validate()?;
                expect_unit(amount, order.price.base_unit, "ask")
            }
            Claim::Long(order) => {
                order.price.validate()?;
                expect_unit(amount, AssetType::NATIVE, "long")?;
                expect_unit(amount, order.price.base_unit, "long")
            }
            Claim::Cover(cover) => {
                expect_unit(amount, AssetType::NATIVE, "cover collateral")?;
                if cover.payoff.unit == AssetType::NATIVE || cover.payoff.is_zero() {
                    return Err(ChainError::malformed("cover payoff must be a non-native amount"));
                }
                Ok(())
            }
            Claim::OptExecute(opt) => {
                opt.strike.validate()?;
                opt.strike.other_unit(amount.unit)?;
                Ok(())
            }
            Claim::MultiSig(ms) => {
                if ms.required == 0 || usize::from(ms.required) > ms.addresses.len() {
                    return Err(ChainError::malformed(format!(
                        "multi-sig requires {} of {}",
                        ms.required,
                        ms.addresses.len()
                    )));
                }
                Ok(())
            }
        }
    }
}

fn expect_unit(amount: &Asset, unit: AssetType, what: &str) -> ChainResult<()> {
    if amount.unit != unit {
        return Err(ChainError::malformed(format!(
            "{what} output holds {} but must hold {unit}",
            amount.unit
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd_per_bts() -> Price {
        Price::from_fraction(2, 1, AssetType::Bts, AssetType::Usd).unwrap()
    }

    fn order() -> OrderClaim {
        OrderClaim {
            owner: Address([1; 20]),
            price: usd_per_bts(),
            min_trade: 0,
        }
    }

    #[test]
    fn bid_and_ask_hold_opposite_units() {
        let usd = Asset::from_units(10, AssetType::Usd);
        let bts = Asset::from_units(10, AssetType::Bts);
        assert!(Claim::Bid(order()).check_structure(&usd).is_ok());
        assert!(Claim::Bid(order()).check_structure(&bts).is_err());
        assert!(Claim::Ask(order()).check_structure(&bts).is_ok());
        assert!(Claim::Ask(order()).check_structure(&usd).is_err());
        assert!(Claim::Long(order()).check_structure(&bts).is_ok());
    }

    #[test]
    fn multisig_threshold_must_be_reachable() {
        let ms = |required| {
            Claim::MultiSig(MultiSigClaim {
                required,
                addresses: vec![Address([1; 20]), Address([2; 20])],
            })
        };
        let amount = Asset::from_units(1, AssetType::Bts);
        assert!(ms(0).check_structure(&amount).is_err());
        assert!(ms(2).check_structure(&amount).is_ok());
        assert!(ms(3).check_structure(&amount).is_err());
    }

    #[test]
    fn cover_payoff_must_be_foreign() {
        let collateral = Asset::from_units(10, AssetType::Bts);
        let cover = |payoff| {
            Claim::Cover(CoverClaim {
                owner: Address([1; 20]),
                payoff,
            })
        };
        assert!(cover(Asset::from_units(5, AssetType::Usd)).check_structure(&collateral).is_ok());
        assert!(cover(Asset::from_units(5, AssetType::Bts)).check_structure(&collateral).is_err());
        assert_eq!(cover(Asset::zero(AssetType::Usd)).claim_type(), ClaimType::Cover);
    }
}
