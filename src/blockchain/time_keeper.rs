//! Sliding window over recent blocks used to judge timestamps and to
//! retarget difficulty.

use std::collections::{BTreeSet, VecDeque};

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, ChainResult};

/// Fixed-point scale of the retarget factor.
const RETARGET_SCALE: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRecord {
    pub block_num: u32,
    pub time: i64,
    pub difficulty: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeKeeper {
    interval: i64,
    window: usize,
    initial_difficulty: u64,
    /// Timestamp of block 0; a property of the chain, not of the window.
    origin: Option<i64>,
    records: VecDeque<TimeRecord>,
    by_time: BTreeSet<(i64, u32)>,
    by_difficulty: BTreeSet<(u64, u32)>,
}

impl TimeKeeper {
    pub fn new(interval: i64, window: usize, initial_difficulty: u64, origin: Option<i64>) -> Self {
        Self {
            interval: interval.max(1),
            window: window.max(1),
            initial_difficulty: initial_difficulty.max(1),
            origin,
            records: VecDeque::new(),
            by_time: BTreeSet::new(),
            by_difficulty: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn origin(&self) -> Option<i64> {
        self.origin
    }

    /// Fix (or with `None`, forget) the genesis timestamp.
    pub fn set_origin(&mut self, origin: Option<i64>) {
        self.origin = origin;
    }

    pub fn first(&self) -> Option<&TimeRecord> {
        self.records.front()
    }

    pub fn last(&self) -> Option<&TimeRecord> {
        self.records.back()
    }

    /// Append the next block. Returns the record evicted from the front when
    /// the window was already full.
    pub fn push(&mut self, record: TimeRecord) -> ChainResult<Option<TimeRecord>> {
        if let Some(last) = self.records.back() {
            if last.block_num.checked_add(1) != Some(record.block_num) {
                return Err(ChainError::linkage(format!(
                    "time-keeper expected block {} but got {}",
                    u64::from(last.block_num) + 1,
                    record.block_num
                )));
            }
        }
        self.insert(record);
        self.records.push_back(record);

        if self.records.len() > self.window {
            let evicted = self.records.pop_front();
            if let Some(old) = evicted {
                self.remove(&old);
            }
            return Ok(evicted);
        }
        Ok(None)
    }

    /// Remove the newest record, which must be `block_num`.
    pub fn pop(&mut self, block_num: u32) -> ChainResult<TimeRecord> {
        match self.records.back() {
            Some(last) if last.block_num == block_num => {}
            other => {
                return Err(ChainError::linkage(format!(
                    "time-keeper head is {:?}, cannot pop block {block_num}",
                    other.map(|r| r.block_num)
                )));
            }
        }
        let record = self
            .records
            .pop_back()
            .ok_or_else(|| ChainError::linkage("time-keeper is empty"))?;
        self.remove(&record);
        Ok(record)
    }

    /// Put back a record evicted from the front by an undone push.
    pub fn push_front(&mut self, record: TimeRecord) -> ChainResult<()> {
        if self.records.len() >= self.window {
            return Err(ChainError::linkage("time-keeper window is full"));
        }
        if let Some(first) = self.records.front() {
            if record.block_num.checked_add(1) != Some(first.block_num) {
                return Err(ChainError::linkage(format!(
                    "block {} does not precede time-keeper front {}",
                    record.block_num, first.block_num
                )));
            }
        }
        self.insert(record);
        self.records.push_front(record);
        Ok(())
    }

    fn insert(&mut self, r: TimeRecord) {
        self.by_time.insert((r.time, r.block_num));
        self.by_difficulty.insert((r.difficulty, r.block_num));
    }

    fn remove(&mut self, r: &TimeRecord) {
        self.by_time.remove(&(r.time, r.block_num));
        self.by_difficulty.remove(&(r.difficulty, r.block_num));
    }

    fn median_index(&self) -> usize {
        self.records.len() / 2
    }

    pub fn median_time(&self) -> Option<i64> {
        self.by_time.iter().nth(self.median_index()).map(|(t, _)| *t)
    }

    /// Chain time: the median timestamp projected forward to the newest block.
    pub fn current_time(&self) -> i64 {
        match self.median_time() {
            Some(median) => {
                let len = self.records.len() as i64;
                median + self.interval * (len - 1 - len / 2)
            }
            None => self.next_time() - self.interval,
        }
    }

    pub fn current_difficulty(&self) -> u64 {
        self.by_difficulty
            .iter()
            .nth(self.median_index())
            .map(|(d, _)| *d)
            .unwrap_or(self.initial_difficulty)
    }

    pub fn next_block_num(&self) -> u32 {
        self.records
            .back()
            .map(|r| r.block_num.saturating_add(1))
            .unwrap_or(0)
    }

    /// Scheduled timestamp of the next block.
    pub fn next_time(&self) -> i64 {
        let origin = self.origin.unwrap_or(0);
        origin + self.interval * i64::from(self.next_block_num())
    }

    /// Median difficulty scaled by how far the chain runs ahead of (or
    /// behind) its schedule.
    pub fn next_difficulty(&self) -> u64 {
        if self.records.is_empty() {
            return self.initial_difficulty;
        }
        let err = self.next_time() - (self.current_time() + self.interval);
        let denom = BigUint::from(self.interval.unsigned_abs()) * 2u32 * self.window;
        let scale = BigUint::from(RETARGET_SCALE);
        let factor = &scale + BigUint::from(err.unsigned_abs()) * &scale / denom;

        let median = BigUint::from(self.current_difficulty());
        let next = if err >= 0 {
            median * factor / scale
        } else {
            median * scale / factor
        };
        u64::try_from(&next).unwrap_or(u64::MAX).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: i64 = 60;
    const ORIGIN: i64 = 10_000;

    fn keeper(window: usize) -> TimeKeeper {
        TimeKeeper::new(INTERVAL, window, 1_000, Some(ORIGIN))
    }

    fn fill(k: &mut TimeKeeper, blocks: u32, spacing: i64, difficulty: u64) {
        for n in 0..blocks {
            k.push(TimeRecord {
                block_num: n,
                time: ORIGIN + spacing * i64::from(n),
                difficulty,
            })
            .unwrap();
        }
    }

    #[test]
    fn empty_keeper_uses_initial_difficulty() {
        let k = keeper(10);
        assert_eq!(k.next_difficulty(), 1_000);
        assert_eq!(k.next_block_num(), 0);
    }

    #[test]
    fn push_requires_consecutive_numbers() {
        let mut k = keeper(4);
        fill(&mut k, 2, INTERVAL, 5);
        let skip = TimeRecord {
            block_num: 3,
            time: 0,
            difficulty: 5,
        };
        assert!(matches!(k.push(skip), Err(ChainError::ChainLinkageMismatch(_))));
    }

    #[test]
    fn window_evicts_oldest() {
        let mut k = keeper(4);
        fill(&mut k, 4, INTERVAL, 5);
        let evicted = k
            .push(TimeRecord {
                block_num: 4,
                time: 10_000 + 4 * INTERVAL,
                difficulty: 5,
            })
            .unwrap();
        assert_eq!(evicted.map(|r| r.block_num), Some(0));
        assert_eq!(k.len(), 4);
        assert_eq!(k.first().map(|r| r.block_num), Some(1));
    }

    #[test]
    fn on_schedule_keeps_difficulty() {
        for window in [4, 7, 10] {
            let mut k = keeper(window);
            fill(&mut k, 25, INTERVAL, 5_000);
            assert_eq!(k.current_time(), 10_000 + 24 * INTERVAL);
            assert_eq!(k.next_difficulty(), 5_000);
        }
    }

    #[test]
    fn fast_blocks_raise_difficulty() {
        let mut k = keeper(10);
        fill(&mut k, 25, INTERVAL / 2, 5_000);
        assert!(k.next_difficulty() > 5_000);
    }

    #[test]
    fn slow_blocks_lower_difficulty() {
        let mut k = keeper(10);
        fill(&mut k, 25, INTERVAL * 2, 5_000);
        assert!(k.next_difficulty() < 5_000);
    }

    #[test]
    fn difficulty_never_reaches_zero() {
        let mut k = keeper(4);
        fill(&mut k, 8, INTERVAL * 1_000, 1);
        assert_eq!(k.next_difficulty(), 1);
    }

    #[test]
    fn push_then_pop_is_a_round_trip() {
        let mut k = keeper(5);
        fill(&mut k, 5, INTERVAL, 7);
        let before = k.clone();
        let next = TimeRecord {
            block_num: 5,
            time: 10_000 + 5 * INTERVAL + 3,
            difficulty: 9,
        };
        let evicted = k.push(next).unwrap().unwrap();
        assert_eq!(k.pop(5).unwrap(), next);
        k.push_front(evicted).unwrap();
        assert_eq!(k, before);
    }

    #[test]
    fn pop_must_take_the_newest() {
        let mut k = keeper(5);
        fill(&mut k, 3, INTERVAL, 7);
        assert!(k.pop(1).is_err());
        assert!(k.pop(2).is_ok());
    }

    #[test]
    fn window_contents_alone_fix_the_schedule() {
        // a keeper rebuilt from the last window agrees with one that saw every block
        let mut full = keeper(10);
        fill(&mut full, 25, INTERVAL / 2, 5_000);
        let mut rebuilt = keeper(10);
        for n in 15..25u32 {
            rebuilt
                .push(TimeRecord {
                    block_num: n,
                    time: ORIGIN + INTERVAL / 2 * i64::from(n),
                    difficulty: 5_000,
                })
                .unwrap();
        }
        assert_eq!(rebuilt.next_time(), full.next_time());
        assert_eq!(rebuilt.next_difficulty(), full.next_difficulty());
        assert_eq!(rebuilt, full);
    }

    #[test]
    fn popping_everything_keeps_the_origin() {
        let mut k = keeper(4);
        fill(&mut k, 2, INTERVAL, 5);
        k.pop(1).unwrap();
        k.pop(0).unwrap();
        assert!(k.is_empty());
        assert_eq!(k.origin(), Some(ORIGIN));
        assert_eq!(k.next_time(), ORIGIN);
    }

    #[test]
    fn perturbation_settles_on_target_feed() {
        for (window, jitter) in [(4usize, -25i64), (7, 25), (10, -50)] {
            let w = window as u32;
            let mut k = TimeKeeper::new(INTERVAL, window, 1_000, Some(0));
            let mut seen = Vec::new();
            for n in 0..8 * w {
                // half a window of blocks off schedule, otherwise exactly on it
                let off = if (w..w + w / 2).contains(&n) { jitter } else { 0 };
                let difficulty = k.next_difficulty();
                k.push(TimeRecord {
                    block_num: n,
                    time: INTERVAL * i64::from(n) + off,
                    difficulty,
                })
                .unwrap();
                seen.push(k.next_difficulty());
            }
            let spans: Vec<u64> = seen
                .chunks(window)
                .map(|c| c.iter().max().unwrap() - c.iter().min().unwrap())
                .collect();
            assert!(spans[1] > 0, "window {window}: perturbation had no effect");
            for pair in spans[1..].windows(2) {
                assert!(pair[1] <= pair[0], "window {window}: spread grew {spans:?}");
            }
            assert_eq!(*spans.last().unwrap(), 0, "window {window}: never settled {spans:?}");
        }
    }
}
