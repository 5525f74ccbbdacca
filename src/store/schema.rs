//! Key layout of the chain store. One prefix byte per table, integers in
//! big-endian so keys sort numerically; values carry a schema version
//! byte in front of the bincode payload.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::asset::AssetType;
use crate::error::{ChainError, ChainResult};
use crate::hash::{BlockId, TrxId};
use crate::transaction::TrxNum;

pub const SCHEMA_VERSION: u8 = 1;

pub const META: u8 = 0x00;
pub const BLOCK_ID_TO_NUM: u8 = 0x01;
pub const TRX_ID_TO_NUM: u8 = 0x02;
pub const META_TRXS: u8 = 0x03;
pub const BLOCKS: u8 = 0x04;
pub const BLOCK_TRXS: u8 = 0x05;
pub const DIVIDENDS: u8 = 0x06;
pub const BLOCK_META: u8 = 0x07;

pub const SCHEMA_KEY: &[u8] = b"schema";

pub fn meta_key(name: &[u8]) -> Vec<u8> {
    prefixed(META, name)
}

pub fn block_id_key(id: &BlockId) -> Vec<u8> {
    prefixed(BLOCK_ID_TO_NUM, &id.0)
}

pub fn trx_id_key(id: &TrxId) -> Vec<u8> {
    prefixed(TRX_ID_TO_NUM, &id.0)
}

pub fn meta_trx_key(num: TrxNum) -> Vec<u8> {
    let mut key = prefixed(META_TRXS, &num.block_num.to_be_bytes());
    key.extend_from_slice(&num.trx_idx.to_be_bytes());
    key
}

pub fn block_key(block_num: u32) -> Vec<u8> {
    prefixed(BLOCKS, &block_num.to_be_bytes())
}

pub fn block_trxs_key(block_num: u32) -> Vec<u8> {
    prefixed(BLOCK_TRXS, &block_num.to_be_bytes())
}

pub fn dividend_key(unit: AssetType, slot: u32) -> Vec<u8> {
    let mut key = vec![DIVIDENDS, unit.index() as u8];
    key.extend_from_slice(&slot.to_be_bytes());
    key
}

pub fn block_meta_key(block_num: u32) -> Vec<u8> {
    prefixed(BLOCK_META, &block_num.to_be_bytes())
}

/// Block number encoded in a `block_key`/`block_meta_key`.
pub fn block_num_of(key: &[u8]) -> ChainResult<u32> {
    let raw: [u8; 4] = key
        .get(1..5)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| ChainError::storage("short block key"))?;
    Ok(u32::from_be_bytes(raw))
}

fn prefixed(table: u8, rest: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + rest.len());
    key.push(table);
    key.extend_from_slice(rest);
    key
}

pub fn encode<T: Serialize>(value: &T) -> ChainResult<Vec<u8>> {
    let mut out = vec![SCHEMA_VERSION];
    out.extend(bincode::serialize(value)?);
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ChainResult<T> {
    match bytes.split_first() {
        Some((&SCHEMA_VERSION, payload)) => Ok(bincode::deserialize(payload)?),
        Some((v, _)) => Err(ChainError::storage(format!("unsupported schema version {v}"))),
        None => Err(ChainError::storage("empty value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_keys_sort_by_number() {
        assert!(block_key(9) < block_key(10));
        assert!(block_key(255) < block_key(256));
        assert!(meta_trx_key(TrxNum::new(1, 300)) < meta_trx_key(TrxNum::new(2, 0)));
        assert_eq!(block_num_of(&block_meta_key(77)).unwrap(), 77);
    }

    #[test]
    fn values_are_versioned() {
        let bytes = encode(&42u32).unwrap();
        assert_eq!(bytes[0], SCHEMA_VERSION);
        assert_eq!(decode::<u32>(&bytes).unwrap(), 42);

        let mut future = bytes.clone();
        future[0] = SCHEMA_VERSION + 1;
        assert!(matches!(decode::<u32>(&future), Err(ChainError::StorageFailure(_))));
        assert!(decode::<u32>(&[]).is_err());
    }
}
