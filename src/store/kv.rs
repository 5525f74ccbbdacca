//! Ordered key-value backends. Everything the chain store persists goes
//! through this trait, and every block is committed as one `WriteBatch`.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

use crate::error::ChainResult;

pub type KvPair = (Vec<u8>, Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Writes applied all-or-nothing by `KvStore::apply`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

pub trait KvStore {
    fn get(&self, key: &[u8]) -> ChainResult<Option<Vec<u8>>>;
    fn put(&mut self, key: &[u8], value: &[u8]) -> ChainResult<()>;
    fn delete(&mut self, key: &[u8]) -> ChainResult<()>;
    /// Entries with `start <= key < end`, ascending.
    fn range(&self, start: &[u8], end: &[u8]) -> ChainResult<Vec<KvPair>>;
    /// Entry with the greatest key starting with `prefix`.
    fn last(&self, prefix: &[u8]) -> ChainResult<Option<KvPair>>;
    fn apply(&mut self, batch: WriteBatch) -> ChainResult<()>;
}

/// In-memory backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Smallest key greater than every key starting with `prefix`, if any.
fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> ChainResult<Option<Vec<u8>>> {
        Ok(self.map.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> ChainResult<()> {
        self.map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> ChainResult<()> {
        self.map.remove(key);
        Ok(())
    }

    fn range(&self, start: &[u8], end: &[u8]) -> ChainResult<Vec<KvPair>> {
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(self
            .map
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn last(&self, prefix: &[u8]) -> ChainResult<Option<KvPair>> {
        let upper = prefix_end(prefix);
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = match &upper {
            Some(end) => (Bound::Included(prefix), Bound::Excluded(end.as_slice())),
            None => (Bound::Included(prefix), Bound::Unbounded),
        };
        Ok(self
            .map
            .range::<[u8], _>(bounds)
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn apply(&mut self, batch: WriteBatch) -> ChainResult<()> {
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(k, v) => {
                    self.map.insert(k, v);
                }
                BatchOp::Delete(k) => {
                    self.map.remove(&k);
                }
            }
        }
        Ok(())
    }
}

/// Durable backend on a single sled tree.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> ChainResult<Self> {
        let db = sled::Config::new().path(path).open()?;
        Ok(Self { db })
    }

    /// Store removed when dropped.
    pub fn temporary() -> ChainResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> ChainResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> ChainResult<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> ChainResult<()> {
        self.db.remove(key)?;
        Ok(())
    }

    fn range(&self, start: &[u8], end: &[u8]) -> ChainResult<Vec<KvPair>> {
        if start >= end {
            return Ok(Vec::new());
        }
        self.db
            .range(start..end)
            .map(|item| {
                let (k, v) = item?;
                Ok((k.to_vec(), v.to_vec()))
            })
            .collect()
    }

    fn last(&self, prefix: &[u8]) -> ChainResult<Option<KvPair>> {
        match self.db.scan_prefix(prefix).next_back() {
            Some(item) => {
                let (k, v) = item?;
                Ok(Some((k.to_vec(), v.to_vec())))
            }
            None => Ok(None),
        }
    }

    fn apply(&mut self, batch: WriteBatch) -> ChainResult<()> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(k, v) => sled_batch.insert(k, v),
                BatchOp::Delete(k) => sled_batch.remove(k),
            }
        }
        self.db.apply_batch(sled_batch)?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise<S: KvStore>(store: &mut S) {
        store.put(&[1, 0], b"a").unwrap();
        store.put(&[1, 5], b"b").unwrap();
        store.put(&[2, 0], b"c").unwrap();
        store.put(&[1, 255, 255], b"z").unwrap();

        assert_eq!(store.get(&[1, 5]).unwrap(), Some(b"b".to_vec()));
        assert_eq!(store.range(&[1], &[2]).unwrap().len(), 3);
        assert_eq!(
            store.last(&[1]).unwrap().map(|(k, _)| k),
            Some(vec![1, 255, 255])
        );
        assert!(store.last(&[3]).unwrap().is_none());

        let mut batch = WriteBatch::default();
        batch.delete(vec![1, 0]);
        batch.put(vec![3, 1], b"d".to_vec());
        store.apply(batch).unwrap();
        assert!(store.get(&[1, 0]).unwrap().is_none());
        assert_eq!(store.get(&[3, 1]).unwrap(), Some(b"d".to_vec()));

        store.delete(&[3, 1]).unwrap();
        assert!(store.get(&[3, 1]).unwrap().is_none());
    }

    #[test]
    fn memory_store_contract() {
        exercise(&mut MemoryStore::new());
    }

    #[test]
    fn sled_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SledStore::open(dir.path().join("kv")).unwrap();
        exercise(&mut store);
    }

    #[test]
    fn prefix_end_carries() {
        assert_eq!(prefix_end(&[1, 2]), Some(vec![1, 3]));
        assert_eq!(prefix_end(&[1, 255]), Some(vec![2]));
        assert_eq!(prefix_end(&[255]), None);
    }
}
