//! Nonce search over the memory-hard hash.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use log::{debug, info};
use parking_lot::Mutex;

use super::block::{BlockHeader, pow_seed};
use crate::hash::MerkleBranch;
use crate::pow::{SCRATCH_BYTES, memory_hard_hash_with};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerConfig {
    pub threads: usize,
    /// Nonces a worker tries between checks of the cancel flag.
    pub batch_size: u64,
    pub scratch_bytes: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            batch_size: 16,
            scratch_bytes: SCRATCH_BYTES,
        }
    }
}

/// Find a nonce whose proof difficulty reaches `target`.
///
/// Worker `t` scans batches `t, t + threads, ...`. Returns `None` once
/// `cancel` is raised or the nonce space is exhausted.
pub fn mine(
    header: &BlockHeader,
    branch: &MerkleBranch,
    target: u64,
    cfg: &MinerConfig,
    cancel: &AtomicBool,
) -> Option<u64> {
    let root = branch.root_from(header.digest());
    let threads = cfg.threads.max(1) as u64;
    let batch = cfg.batch_size.max(1);
    let found: Mutex<Option<u64>> = Mutex::new(None);
    let done = AtomicBool::new(false);

    debug!(
        "mining block {} target={} threads={} batch={}",
        header.block_num, target, threads, batch
    );

    thread::scope(|s| {
        for t in 0..threads {
            let (found, done) = (&found, &done);
            s.spawn(move || {
                let mut start = t * batch;
                loop {
                    if cancel.load(Ordering::Relaxed) || done.load(Ordering::Relaxed) {
                        return;
                    }
                    for nonce in start..start.saturating_add(batch) {
                        let hash = memory_hard_hash_with(&pow_seed(&root, nonce), cfg.scratch_bytes);
                        if hash.difficulty() >= target {
                            let mut slot = found.lock();
                            if slot.is_none_or(|n| nonce < n) {
                                *slot = Some(nonce);
                            }
                            done.store(true, Ordering::Relaxed);
                            return;
                        }
                    }
                    match start.checked_add(threads * batch) {
                        Some(next) => start = next,
                        None => return,
                    }
                }
            });
        }
    });

    let nonce = found.into_inner();
    if let Some(n) = nonce {
        info!("⛏️ block {} solved with nonce {}", header.block_num, n);
    }
    nonce
}
