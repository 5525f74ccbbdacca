use std::env;
use std::str::FromStr;

use crate::blockchain::{
    BLOCK_INTERVAL_SECS, BLOCKS_PER_YEAR, COINBASE_WAIT_PERIOD, DIVIDEND_EXCLUSION_BLOCKS,
    INITIAL_DIFFICULTY, MAX_BLOCK_SIZE, MAX_FUTURE_SECS, MinerConfig, TIME_KEEPER_WINDOW,
};
use crate::pow::SCRATCH_BYTES;

/// Consensus parameters of one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub block_interval_secs: i64,
    pub time_keeper_window: usize,
    pub max_future_secs: i64,
    pub blocks_per_year: u32,
    pub coinbase_wait: u32,
    pub dividend_exclusion: u32,
    pub max_block_size: usize,
    pub initial_difficulty: u64,
    pub pow_scratch_bytes: usize,
    /// When false, blocks are accepted whatever their proof difficulty.
    pub enforce_pow: bool,
    pub features: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            block_interval_secs: BLOCK_INTERVAL_SECS,
            time_keeper_window: TIME_KEEPER_WINDOW,
            max_future_secs: MAX_FUTURE_SECS,
            blocks_per_year: BLOCKS_PER_YEAR,
            coinbase_wait: COINBASE_WAIT_PERIOD,
            dividend_exclusion: DIVIDEND_EXCLUSION_BLOCKS,
            max_block_size: MAX_BLOCK_SIZE,
            initial_difficulty: INITIAL_DIFFICULTY,
            pow_scratch_bytes: SCRATCH_BYTES,
            enforce_pow: true,
            features: 0,
        }
    }
}

impl ChainConfig {
    /// Small, fast network for local runs and tests.
    pub fn testnet() -> Self {
        Self {
            block_interval_secs: 60,
            time_keeper_window: 10,
            max_future_secs: 600,
            blocks_per_year: 50,
            coinbase_wait: 3,
            dividend_exclusion: 2,
            max_block_size: 64 * 1024,
            initial_difficulty: 1,
            pow_scratch_bytes: 4096,
            enforce_pow: false,
            features: 0,
        }
    }

    /// Defaults (or the testnet when `TESTNET=true`) with `POW_SCRATCH_BYTES`
    /// and `ENFORCE_POW` overrides.
    pub fn from_env() -> Self {
        let base = if env_or("TESTNET", false) {
            Self::testnet()
        } else {
            Self::default()
        };
        Self {
            pow_scratch_bytes: env_or("POW_SCRATCH_BYTES", base.pow_scratch_bytes),
            enforce_pow: env_or("ENFORCE_POW", base.enforce_pow),
            coinbase_wait: env_or("COINBASE_WAIT", base.coinbase_wait),
            ..base
        }
    }
}

/// Settings of the service binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub chain: ChainConfig,
    pub miner: MinerConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let chain = ChainConfig::from_env();
        let miner = MinerConfig {
            threads: env_or("MINER_THREADS", 1),
            batch_size: env_or("MINER_BATCH", 16),
            scratch_bytes: chain.pow_scratch_bytes,
        };
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("PORT", 8080),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            chain,
            miner,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testnet_pays_dividends_within_a_year() {
        let cfg = ChainConfig::testnet();
        assert!(cfg.dividend_exclusion < cfg.blocks_per_year);
        assert!(!cfg.enforce_pow);
    }

    #[test]
    fn unparsable_values_fall_back() {
        assert_eq!(env_or("BTS_CHAIN_SURELY_UNSET_VAR", 42u16), 42);
    }
}
