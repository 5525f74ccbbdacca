use thiserror::Error;

use crate::asset::AssetError;

/// Every way a block, header or transaction can be refused.
///
/// Kinds are kept distinct so callers can decide between retrying (after
/// fetching a missing ancestor), rejecting, and punishing the peer that sent
/// the data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error("timestamp out of range: {0}")]
    StaleOrFutureTimestamp(String),

    #[error("unresolved input {trx_id}:{output_idx}")]
    UnresolvedInput { trx_id: String, output_idx: u16 },

    #[error("output {trx_id}:{output_idx} already spent")]
    AlreadySpent { trx_id: String, output_idx: u16 },

    #[error("unbalanced {unit}: inputs {inputs} vs outputs {outputs}")]
    Unbalanced {
        unit: String,
        inputs: u128,
        outputs: u128,
    },

    #[error("claim condition unmet: {0}")]
    ClaimConditionUnmet(String),

    #[error("insufficient difficulty: required {required}, got {actual}")]
    ForkDifficultyInsufficient { required: u64, actual: u64 },

    #[error("chain linkage mismatch: {0}")]
    ChainLinkageMismatch(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

pub type ChainResult<T> = Result<T, ChainError>;

impl ChainError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        ChainError::MalformedData(msg.into())
    }

    pub fn unmet(msg: impl Into<String>) -> Self {
        ChainError::ClaimConditionUnmet(msg.into())
    }

    pub fn linkage(msg: impl Into<String>) -> Self {
        ChainError::ChainLinkageMismatch(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        ChainError::StorageFailure(msg.into())
    }

    /// Whether the sender of the offending data broke protocol rules, as
    /// opposed to merely being behind or ahead of us.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ChainError::MalformedData(_)
                | ChainError::ChainLinkageMismatch(_)
                | ChainError::ForkDifficultyInsufficient { .. }
        )
    }
}

impl From<AssetError> for ChainError {
    fn from(err: AssetError) -> Self {
        ChainError::MalformedData(err.to_string())
    }
}

impl From<bincode::Error> for ChainError {
    fn from(err: bincode::Error) -> Self {
        ChainError::StorageFailure(format!("encoding: {err}"))
    }
}

impl From<sled::Error> for ChainError {
    fn from(err: sled::Error) -> Self {
        ChainError::StorageFailure(format!("sled: {err}"))
    }
}
