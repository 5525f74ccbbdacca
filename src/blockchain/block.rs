use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Serialize};

use super::miner::{self, MinerConfig};
use crate::asset::AssetType;
use crate::hash::{BlockId, Hash256, MerkleBranch, TrxId, merkle_root, sha224, sha256};
use crate::pow::{PowHash, memory_hard_hash_with};
use crate::transaction::SignedTransaction;

const UNITS: usize = AssetType::COUNT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u8,
    pub prev: BlockId,
    pub block_num: u32,
    pub timestamp: i64, // Unix timestamp (UTC)
    /// Digest of the `BlockState` after this block is applied.
    pub state_hash: Hash256,
    pub trx_mroot: Hash256,
    /// Dividend per unit of native supply paid by this block, 64.64.
    pub dividend_percent: u128,
    /// Protocol feature flags the miner supports.
    pub features: u64,
}

impl BlockHeader {
    /// Hash of the header alone; the leaf the proof's merkle branch starts from.
    pub fn digest(&self) -> Hash256 {
        sha256(&bincode::serialize(self).expect("serialize header"))
    }
}

/// Ties a header to the seed of the memory-hard hash. A solo miner uses an
/// empty branch; a merged miner proves the header digest is a leaf of a
/// larger tree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Proof {
    pub branch: MerkleBranch,
    pub nonce: u64,
}

impl Proof {
    pub fn seed(&self, header: &BlockHeader) -> [u8; 32] {
        pow_seed(&self.branch.root_from(header.digest()), self.nonce)
    }
}

pub(crate) fn pow_seed(root: &Hash256, nonce: u64) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(40);
    preimage.extend_from_slice(&root.0);
    preimage.extend_from_slice(&nonce.to_le_bytes());
    sha256(&preimage).0
}

/// A block: header, proof of work and the transactions it applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub proof: Proof,
    pub trxs: Vec<SignedTransaction>,
}

impl Block {
    pub fn id(&self) -> BlockId {
        block_id(&self.header, &self.proof)
    }

    pub fn trx_ids(&self) -> Vec<TrxId> {
        self.trxs.iter().map(SignedTransaction::id).collect()
    }

    pub fn compute_mroot(&self) -> Hash256 {
        merkle_root(&self.trx_ids())
    }

    pub fn pow_hash(&self, scratch_bytes: usize) -> PowHash {
        memory_hard_hash_with(&self.proof.seed(&self.header), scratch_bytes)
    }

    pub fn difficulty(&self, scratch_bytes: usize) -> u64 {
        self.pow_hash(scratch_bytes).difficulty()
    }

    pub fn size_bytes(&self) -> usize {
        bincode::serialized_size(self)
            .map(|n| n as usize)
            .unwrap_or(usize::MAX)
    }

    /// Search nonces until the proof reaches `target`. Returns `false` when
    /// `cancel` was raised first.
    pub fn mine(&mut self, target: u64, cfg: &MinerConfig, cancel: &AtomicBool) -> bool {
        match miner::mine(&self.header, &self.proof.branch, target, cfg, cancel) {
            Some(nonce) => {
                self.proof.nonce = nonce;
                true
            }
            None => false,
        }
    }
}

/// Block id: SHA-224 over the encoded header and proof.
pub fn block_id(header: &BlockHeader, proof: &Proof) -> BlockId {
    let mut bytes = bincode::serialize(header).expect("serialize header");
    bytes.extend(bincode::serialize(proof).expect("serialize proof"));
    sha224(&bytes)
}

/// A block together with the ids of its transactions, as served to peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullBlock {
    pub id: BlockId,
    pub block: Block,
    pub trx_ids: Vec<TrxId>,
}

impl From<Block> for FullBlock {
    fn from(block: Block) -> Self {
        Self {
            id: block.id(),
            trx_ids: block.trx_ids(),
            block,
        }
    }
}

/// Ledger totals committed to by every header.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockState {
    /// Native units in existence, counting dividends owed but not yet claimed.
    pub supply: u128,
    /// Outstanding debt issued through cover outputs, per asset.
    pub issuance: [u128; UNITS],
    /// Native collateral locked behind that debt, per asset.
    pub backing: [u128; UNITS],
    pub features: u64,
}

impl BlockState {
    pub fn digest(&self) -> Hash256 {
        sha256(&bincode::serialize(self).expect("serialize block state"))
    }
}
