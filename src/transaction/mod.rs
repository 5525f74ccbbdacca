pub mod claim;
pub mod model;
pub mod utxo;
pub mod validation;

pub use claim::{
    Claim, ClaimType, CoverClaim, EscrowClaim, MultiSigClaim, OptionClaim, OrderClaim,
    PasswordClaim,
};
pub use model::{Input, Output, SignedTransaction, Transaction};
pub use utxo::{
    INVALID_BLOCK_NUM, MetaTrx, MetaTrxInput, MetaTrxOutput, OutputRef, SpentRef, TrxNum,
};
pub use validation::{BalanceSheet, TrxEvaluation, ValidationContext, validate_transaction};
