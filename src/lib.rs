//! Proof-of-work dividend ledger: consensus and validation core, with a
//! small actix-web adapter on top.

pub mod api;
pub mod asset;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod hash;
pub mod pow;
pub mod store;
pub mod transaction;
pub mod wallet;

pub use error::{ChainError, ChainResult};
