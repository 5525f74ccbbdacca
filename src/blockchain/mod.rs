pub mod block;
pub mod fork_tracker;
pub mod miner;
pub mod time_keeper;

pub use block::{Block, BlockHeader, BlockState, FullBlock, Proof};
pub use fork_tracker::{ForkNode, ForkTracker};
pub use miner::{MinerConfig, mine};
pub use time_keeper::{TimeKeeper, TimeRecord};

/// Target seconds between blocks.
pub const BLOCK_INTERVAL_SECS: i64 = 300;

/// Number of recent blocks the time-keeper looks at.
pub const TIME_KEEPER_WINDOW: usize = 144;

/// Blocks per year at the target interval; also the size of the dividend table.
pub const BLOCKS_PER_YEAR: u32 = 365 * 24 * 60 * 60 / BLOCK_INTERVAL_SECS as u32;

/// Blocks a coinbase output must age before it can be spent.
pub const COINBASE_WAIT_PERIOD: u32 = 288;

/// The most recent blocks never pay dividends.
pub const DIVIDEND_EXCLUSION_BLOCKS: u32 = 100;

/// Upper bound on the encoded size of a block.
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// How far past the wall clock (or the scheduled time, if later) a block
/// may be stamped.
pub const MAX_FUTURE_SECS: i64 = 2 * 60 * 60;

/// Difficulty used until the time-keeper has history.
pub const INITIAL_DIFFICULTY: u64 = 1 << 20;

/// Block subsidy of the first reward era, in whole native units.
pub const INITIAL_REWARD: u64 = 100;

/// Reward halves every four years of blocks.
pub const REWARD_HALVING_YEARS: u32 = 4;

pub const BLOCK_VERSION: u8 = 1;

/// Native subsidy of block `block_num` (64.64 amount).
pub fn block_reward(block_num: u32, blocks_per_year: u32) -> u128 {
    let era = block_num / blocks_per_year.saturating_mul(REWARD_HALVING_YEARS).max(1);
    let full = u128::from(INITIAL_REWARD) << crate::asset::fixed::FRACTION_BITS;
    full.checked_shr(era).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_halves_per_era() {
        let era = BLOCKS_PER_YEAR * REWARD_HALVING_YEARS;
        let first = block_reward(0, BLOCKS_PER_YEAR);
        assert_eq!(block_reward(era - 1, BLOCKS_PER_YEAR), first);
        assert_eq!(block_reward(era, BLOCKS_PER_YEAR), first / 2);
        assert_eq!(block_reward(era * 3, BLOCKS_PER_YEAR), first / 8);
        assert_eq!(block_reward(u32::MAX, 1), 0);
    }
}
