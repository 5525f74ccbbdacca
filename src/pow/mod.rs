//! Proof-of-work primitives. Pure functions, no state.

pub mod compact;
pub mod memory_hard;

pub use compact::{CompactPow, compact_pow};
pub use memory_hard::{PowHash, SCRATCH_BYTES, memory_hard_hash, memory_hard_hash_with};

/// Difficulty of a block proof: larger for numerically smaller hashes.
pub fn difficulty(hash: &PowHash) -> u64 {
    hash.difficulty()
}
