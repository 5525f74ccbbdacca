use serde::{Deserialize, Serialize};

use super::model::{Output, SignedTransaction};
use crate::asset::Asset;
use crate::hash::TrxId;

/// Identifies a specific transaction output by its trx id and index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub trx_id: TrxId,
    pub output_idx: u16,
}

impl OutputRef {
    pub fn new(trx_id: TrxId, output_idx: u16) -> Self {
        Self { trx_id, output_idx }
    }
}

/// Block number of a transaction that is not yet part of the chain.
pub const INVALID_BLOCK_NUM: u32 = u32::MAX;

/// Where a committed transaction lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrxNum {
    pub block_num: u32,
    pub trx_idx: u16,
}

impl TrxNum {
    pub fn new(block_num: u32, trx_idx: u16) -> Self {
        Self { block_num, trx_idx }
    }

    pub fn pending() -> Self {
        Self {
            block_num: INVALID_BLOCK_NUM,
            trx_idx: 0,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.block_num != INVALID_BLOCK_NUM
    }
}

/// The input that consumed an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpentRef {
    pub trx: TrxNum,
    pub input_idx: u16,
}

/// Spend status attached to every stored output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetaTrxOutput {
    pub spent_by: Option<SpentRef>,
}

impl MetaTrxOutput {
    pub fn is_spent(&self) -> bool {
        self.spent_by.is_some()
    }
}

/// A stored transaction plus the spend status of each of its outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaTrx {
    pub trx: SignedTransaction,
    pub location: TrxNum,
    pub meta_outputs: Vec<MetaTrxOutput>,
}

impl MetaTrx {
    pub fn new(trx: SignedTransaction, location: TrxNum) -> Self {
        let meta_outputs = vec![MetaTrxOutput::default(); trx.trx.outputs.len()];
        Self {
            trx,
            location,
            meta_outputs,
        }
    }

    pub fn output(&self, idx: u16) -> Option<(&Output, &MetaTrxOutput)> {
        let i = usize::from(idx);
        Some((self.trx.trx.outputs.get(i)?, self.meta_outputs.get(i)?))
    }
}

/// An input resolved against the chain: the output it references, where
/// that output was created, its spend status and the dividends it has earned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaTrxInput {
    pub output_ref: OutputRef,
    pub source: TrxNum,
    pub source_is_coinbase: bool,
    pub output: Output,
    pub meta: MetaTrxOutput,
    pub dividends: Asset,
}
