use std::collections::HashSet;

use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};

use super::claim::Claim;
use super::utxo::OutputRef;
use crate::asset::Asset;
use crate::error::{ChainError, ChainResult};
use crate::hash::{TrxId, sha256};
use crate::wallet::{Address, CompactSignature, recover_address, sign_compact};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    /// References a previous output.
    pub output_ref: OutputRef,
    /// Claim-specific unlocking data (password preimage, ...).
    pub input_data: Vec<u8>,
}

impl Input {
    pub fn new(output_ref: OutputRef) -> Self {
        Self {
            output_ref,
            input_data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub amount: Asset,
    pub claim: Claim,
}

impl Output {
    pub fn new(amount: Asset, claim: Claim) -> Self {
        Self { amount, claim }
    }

    /// Plain payment to `owner`.
    pub fn to(owner: Address, amount: Asset) -> Self {
        Self {
            amount,
            claim: Claim::Signature { owner },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u8,
    /// First block number this transaction may be included in.
    pub valid_after: Option<u32>,
    /// Number of blocks after `valid_after` during which it stays valid.
    pub valid_blocks: Option<u32>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
}

impl Transaction {
    pub const VERSION: u8 = 1;

    pub fn new(inputs: Vec<Input>, outputs: Vec<Output>) -> Self {
        Self {
            version: Self::VERSION,
            valid_after: None,
            valid_blocks: None,
            inputs,
            outputs,
        }
    }

    /// Reward transaction of block `block_num`. Pinned to its block so two
    /// identical payouts in different blocks never share an id.
    pub fn coinbase(block_num: u32, outputs: Vec<Output>) -> Self {
        Self {
            version: Self::VERSION,
            valid_after: Some(block_num),
            valid_blocks: Some(1),
            inputs: Vec::new(),
            outputs,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Canonical encoding of the unsigned transaction.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("serialize transaction")
    }

    /// Hash of the unsigned contents; also the digest every signature covers.
    pub fn id(&self) -> TrxId {
        sha256(&self.encode())
    }

    pub fn sign(self, keys: &[&SecretKey]) -> SignedTransaction {
        let mut signed = SignedTransaction::unsigned(self);
        for sk in keys {
            signed.sign(sk);
        }
        signed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub trx: Transaction,
    pub sigs: Vec<CompactSignature>,
}

impl SignedTransaction {
    pub fn unsigned(trx: Transaction) -> Self {
        Self {
            trx,
            sigs: Vec::new(),
        }
    }

    pub fn id(&self) -> TrxId {
        self.trx.id()
    }

    pub fn sign(&mut self, sk: &SecretKey) {
        let digest = self.trx.id();
        self.sigs.push(sign_compact(sk, &digest));
    }

    /// Addresses recovered from every attached signature.
    pub fn signed_addresses(&self) -> ChainResult<HashSet<Address>> {
        let digest = self.trx.id();
        self.sigs
            .iter()
            .map(|sig| recover_address(sig, &digest).map_err(ChainError::malformed))
            .collect()
    }

    pub fn size_bytes(&self) -> usize {
        bincode::serialized_size(self).map(|n| n as usize).unwrap_or(usize::MAX)
    }
}
