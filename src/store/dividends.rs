//! Fee and reward split between the miner and native holders, and the
//! window over which an output may collect dividends.

use serde::{Deserialize, Serialize};

use crate::asset::{fixed_div, fixed_mul};
use crate::error::{ChainError, ChainResult};

/// How the fees and subsidy of one block are shared out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DividendSplit {
    pub fees: u128,
    pub reward: u128,
    /// Half of `fees + reward`, spread over the existing supply.
    pub dividend: u128,
    /// The rest, paid by the coinbase.
    pub miner: u128,
    /// `dividend / supply` in 64.64; zero while there is no supply, in
    /// which case the dividend half is burned.
    pub percent: u128,
}

impl DividendSplit {
    pub fn new(fees: u128, reward: u128, supply: u128) -> ChainResult<Self> {
        let total = fees
            .checked_add(reward)
            .ok_or_else(|| ChainError::malformed("fee total overflow"))?;
        let dividend = total / 2;
        let percent = if supply == 0 {
            0
        } else {
            fixed_div(dividend, supply)?
        };
        Ok(Self {
            fees,
            reward,
            dividend,
            miner: total - dividend,
            percent,
        })
    }

    /// Native supply once this block is applied.
    pub fn next_supply(&self, supply: u128) -> ChainResult<u128> {
        let paid = if self.percent > 0 { self.dividend } else { 0 };
        supply
            .checked_sub(self.fees)
            .and_then(|s| s.checked_add(self.miner))
            .and_then(|s| s.checked_add(paid))
            .ok_or_else(|| ChainError::malformed("native supply out of range"))
    }
}

/// Dividend table slot of `block_num`.
pub fn slot(block_num: u32, blocks_per_year: u32) -> u32 {
    block_num % blocks_per_year.max(1)
}

/// Accumulator entries `(from, to)` whose difference is owed to an output
/// created in block `created` when the head is `head`.
///
/// The newest `exclusion` blocks are not paid yet and nothing older than
/// one year of blocks is paid any more.
pub fn payout_window(created: u32, head: u32, blocks_per_year: u32, exclusion: u32) -> Option<(u32, u32)> {
    let to = head.checked_sub(exclusion)?;
    let oldest = head.saturating_add(1).saturating_sub(blocks_per_year.max(1));
    let from = created.max(oldest);
    (from < to).then_some((from, to))
}

/// `balance * (acc_to - acc_from)`; the accumulator wraps.
pub fn owed(balance: u128, acc_from: u128, acc_to: u128) -> ChainResult<u128> {
    Ok(fixed_mul(balance, acc_to.wrapping_sub(acc_from))?)
}
