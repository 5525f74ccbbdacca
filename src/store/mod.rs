pub mod chain_store;
pub mod dividends;
pub mod kv;
pub mod schema;


pub use chain_store::{BlockMeta, ChainHead, ChainStore};
pub use dividends::DividendSplit;
pub use kv::{KvStore, MemoryStore, SledStore, WriteBatch};
