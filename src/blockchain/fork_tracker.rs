//! Headers of competing chain tips, scored by cumulative difficulty.
//!
//! Nodes are linked once their ancestry reaches an anchored (committed)
//! block or a genesis header. All traversals use explicit worklists.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use log::{debug, warn};

use super::block::{Block, BlockHeader};
use crate::error::{ChainError, ChainResult};
use crate::hash::BlockId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkNode {
    pub id: BlockId,
    pub prev_id: BlockId,
    pub block_num: u32,
    pub difficulty: u64,
    pub total_difficulty: u128,
    pub children: Vec<BlockId>,
    /// `Some(false)` is sticky; `None` means not yet applied.
    pub valid: Option<bool>,
    pub linked: bool,
}

#[derive(Debug, Default)]
pub struct ForkTracker {
    min_difficulty: u64,
    nodes: HashMap<BlockId, ForkNode>,
    blocks: HashMap<BlockId, Block>,
    /// Parents referenced by cached headers but never received.
    unknown: BTreeSet<BlockId>,
    waiting: HashMap<BlockId, Vec<BlockId>>,
}

impl ForkTracker {
    pub fn new(min_difficulty: u64) -> Self {
        Self {
            min_difficulty,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &BlockId) -> Option<&ForkNode> {
        self.nodes.get(id)
    }

    /// Register a committed block as a linked root. A node already marked
    /// invalid stays invalid.
    pub fn anchor(&mut self, id: BlockId, block_num: u32, total_difficulty: u128) {
        let node = self.nodes.entry(id).or_insert_with(|| ForkNode {
            id,
            prev_id: BlockId::default(),
            block_num,
            difficulty: 0,
            total_difficulty,
            children: Vec::new(),
            valid: None,
            linked: true,
        });
        node.block_num = block_num;
        node.total_difficulty = total_difficulty;
        if node.valid != Some(false) {
            node.valid = Some(true);
        }
        node.linked = true;
        self.unknown.remove(&id);
        self.adopt_waiting(id);
        self.propagate(id);
    }

    pub fn cache_header(&mut self, id: BlockId, header: &BlockHeader, difficulty: u64) -> ChainResult<()> {
        if difficulty < self.min_difficulty {
            return Err(ChainError::ForkDifficultyInsufficient {
                required: self.min_difficulty,
                actual: difficulty,
            });
        }
        if self.nodes.contains_key(&id) {
            return Ok(());
        }

        let mut node = ForkNode {
            id,
            prev_id: header.prev,
            block_num: header.block_num,
            difficulty,
            total_difficulty: u128::from(difficulty),
            children: Vec::new(),
            valid: None,
            linked: false,
        };

        match self.nodes.get_mut(&header.prev) {
            Some(parent) => {
                if parent.block_num.checked_add(1) != Some(header.block_num) {
                    return Err(ChainError::linkage(format!(
                        "header {} claims height {} but parent is at {}",
                        id, header.block_num, parent.block_num
                    )));
                }
                node.linked = parent.linked;
                node.total_difficulty = parent.total_difficulty + u128::from(difficulty);
                if parent.valid == Some(false) {
                    node.valid = Some(false);
                }
                parent.children.push(id);
            }
            None if header.prev.is_zero() && header.block_num == 0 => node.linked = true,
            None => {
                debug!("header {} waits for unknown parent {}", id, header.prev);
                self.unknown.insert(header.prev);
                self.waiting.entry(header.prev).or_default().push(id);
            }
        }

        self.nodes.insert(id, node);
        self.unknown.remove(&id);
        self.adopt_waiting(id);
        self.propagate(id);
        Ok(())
    }

    pub fn cache_block(&mut self, block: Block, difficulty: u64) -> ChainResult<()> {
        let id = block.id();
        self.cache_header(id, &block.header, difficulty)?;
        self.blocks.insert(id, block);
        Ok(())
    }

    pub fn fetch_block(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn fetch_unknown(&self) -> Vec<BlockId> {
        self.unknown.iter().copied().collect()
    }

    /// Attach headers that arrived before `id` did.
    fn adopt_waiting(&mut self, id: BlockId) {
        let Some(children) = self.waiting.remove(&id) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(&id) {
            node.children.extend(children);
        }
    }

    /// Recompute totals, linkage and invalidity below `root`.
    fn propagate(&mut self, root: BlockId) {
        let mut work = vec![root];
        while let Some(id) = work.pop() {
            let Some(parent) = self.nodes.get(&id) else {
                continue;
            };
            let (total, linked, invalid, height) = (
                parent.total_difficulty,
                parent.linked,
                parent.valid == Some(false),
                parent.block_num,
            );
            for child_id in parent.children.clone() {
                let Some(child) = self.nodes.get_mut(&child_id) else {
                    continue;
                };
                child.total_difficulty = total + u128::from(child.difficulty);
                child.linked = linked;
                if invalid || height.checked_add(1) != Some(child.block_num) {
                    child.valid = Some(false);
                }
                work.push(child_id);
            }
        }
    }

    /// Record the outcome of applying `id`. Invalidity spreads to every
    /// descendant and is never reverted.
    pub fn set_valid(&mut self, id: &BlockId, valid: bool) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if valid {
            if node.valid.is_none() {
                node.valid = Some(true);
            }
            return;
        }
        warn!("marking fork at {} invalid", id);
        let mut work = vec![*id];
        while let Some(next) = work.pop() {
            if let Some(n) = self.nodes.get_mut(&next) {
                n.valid = Some(false);
                work.extend(n.children.iter().copied());
            }
        }
    }

    /// Linked, not-invalid node with the most cumulative work; ties go to
    /// the taller chain, then the lowest id.
    pub fn best_fork_head_id(&self) -> Option<BlockId> {
        self.nodes
            .values()
            .filter(|n| n.linked && n.valid != Some(false))
            .max_by_key(|n| (n.total_difficulty, n.block_num, Reverse(n.id)))
            .map(|n| n.id)
    }

    /// Ids from the oldest tracked ancestor of `head` up to `head`.
    pub fn fork_path(&self, head: &BlockId) -> Vec<BlockId> {
        let mut path = Vec::new();
        let mut cursor = self.nodes.get(head);
        while let Some(node) = cursor {
            path.push(node.id);
            cursor = self.nodes.get(&node.prev_id).filter(|p| p.id != node.id);
        }
        path.reverse();
        path
    }

    /// Forget nodes below `block_num` that are not anchors of live forks.
    pub fn prune_below(&mut self, block_num: u32) {
        let stale: Vec<BlockId> = self
            .nodes
            .values()
            .filter(|n| n.block_num < block_num)
            .map(|n| n.id)
            .collect();
        for id in &stale {
            self.nodes.remove(id);
            self.blocks.remove(id);
            self.waiting.remove(id);
        }
        self.unknown.retain(|id| !stale.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::hash::Hash256;

    fn id(b: u8) -> BlockId {
        BlockId([b; 28])
    }

    fn header(prev: BlockId, block_num: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev,
            block_num,
            timestamp: 0,
            state_hash: Hash256::default(),
            trx_mroot: Hash256::default(),
            dividend_percent: 0,
            features: 0,
        }
    }

    /// root(10) -> a(5) -> b(5); root -> c(8)
    fn tracker() -> ForkTracker {
        let mut f = ForkTracker::new(1);
        f.anchor(id(1), 10, 100);
        f.cache_header(id(2), &header(id(1), 11), 5).unwrap();
        f.cache_header(id(3), &header(id(2), 12), 5).unwrap();
        f.cache_header(id(4), &header(id(1), 11), 8).unwrap();
        f
    }

    #[test]
    fn heaviest_branch_wins() {
        let f = tracker();
        assert_eq!(f.best_fork_head_id(), Some(id(3)));
        assert_eq!(f.node(&id(3)).unwrap().total_difficulty, 110);
        assert_eq!(f.fork_path(&id(3)), vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn invalid_branch_is_skipped() {
        let mut f = tracker();
        f.set_valid(&id(2), false);
        assert_eq!(f.node(&id(3)).unwrap().valid, Some(false));
        assert_eq!(f.best_fork_head_id(), Some(id(4)));
        f.set_valid(&id(3), true);
        assert_eq!(f.node(&id(3)).unwrap().valid, Some(false));
    }

    #[test]
    fn anchoring_keeps_invalidity() {
        let mut f = tracker();
        f.set_valid(&id(2), false);
        f.anchor(id(2), 11, 105);
        assert_eq!(f.node(&id(2)).unwrap().valid, Some(false));
        assert_eq!(f.node(&id(3)).unwrap().valid, Some(false));
        assert_eq!(f.best_fork_head_id(), Some(id(4)));

        f.anchor(id(4), 11, 108);
        assert_eq!(f.node(&id(4)).unwrap().valid, Some(true));
    }

    #[test]
    fn tie_prefers_height_then_lowest_id() {
        let mut f = ForkTracker::new(1);
        f.anchor(id(1), 0, 0);
        f.cache_header(id(9), &header(id(1), 1), 10).unwrap();
        f.cache_header(id(5), &header(id(1), 1), 10).unwrap();
        assert_eq!(f.best_fork_head_id(), Some(id(5)));
        f.cache_header(id(6), &header(id(1), 1), 4).unwrap();
        f.cache_header(id(7), &header(id(6), 2), 6).unwrap();
        assert_eq!(f.best_fork_head_id(), Some(id(7)));
    }

    #[test]
    fn low_difficulty_is_rejected() {
        let mut f = ForkTracker::new(50);
        assert!(matches!(
            f.cache_header(id(2), &header(id(1), 1), 49),
            Err(ChainError::ForkDifficultyInsufficient { required: 50, actual: 49 })
        ));
    }

    #[test]
    fn late_parent_links_orphans() {
        let mut f = ForkTracker::new(1);
        f.anchor(id(1), 0, 10);
        f.cache_header(id(3), &header(id(2), 2), 7).unwrap();
        assert_eq!(f.fetch_unknown(), vec![id(2)]);
        assert!(!f.node(&id(3)).unwrap().linked);
        assert_eq!(f.best_fork_head_id(), Some(id(1)));

        f.cache_header(id(2), &header(id(1), 1), 3).unwrap();
        assert!(f.fetch_unknown().is_empty());
        let tip = f.node(&id(3)).unwrap();
        assert!(tip.linked);
        assert_eq!(tip.total_difficulty, 20);
        assert_eq!(f.best_fork_head_id(), Some(id(3)));
    }

    #[test]
    fn height_mismatch_is_rejected() {
        let mut f = ForkTracker::new(1);
        f.anchor(id(1), 4, 10);
        assert!(matches!(
            f.cache_header(id(2), &header(id(1), 6), 1),
            Err(ChainError::ChainLinkageMismatch(_))
        ));
    }

    proptest! {
        #[test]
        fn invalidation_never_raises_best(
            parents in proptest::collection::vec(0usize..1000, 1..30),
            diffs in proptest::collection::vec(1u64..100, 30),
            victim in 0usize..1000,
        ) {
            let mut f = ForkTracker::new(1);
            let root = BlockId([0; 28]);
            f.anchor(root, 0, 0);
            let mut ids = vec![root];
            for (i, p) in parents.iter().enumerate() {
                let parent = ids[p % ids.len()];
                let height = f.node(&parent).unwrap().block_num + 1;
                let mut raw = [0u8; 28];
                raw[..8].copy_from_slice(&(i as u64 + 1).to_be_bytes());
                let child = BlockId(raw);
                f.cache_header(child, &header(parent, height), diffs[i]).unwrap();
                ids.push(child);
            }
            let best_before = f.best_fork_head_id().unwrap();
            let total_before = f.node(&best_before).unwrap().total_difficulty;

            let bad = ids[1 + victim % (ids.len() - 1)];
            f.set_valid(&bad, false);
            if let Some(best) = f.best_fork_head_id() {
                prop_assert!(f.node(&best).unwrap().total_difficulty <= total_before);
                prop_assert!(!f.fork_path(&best).contains(&bad));
            }
        }
    }
}
