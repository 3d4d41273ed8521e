use thiserror::Error;

use crate::chain::ChainStage;

/// Everything that can go wrong between selecting a UTXO and getting a txid
/// back from the node. Node-level rejections keep the node's own message so
/// the caller sees the reason verbatim.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient funds: have {available} sat, need {required} sat")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("signing failed: {0}")]
    Signature(String),

    #[error(
        "replacement rate {replacement} sat/vB must exceed parent {parent} + child {child} sat/vB"
    )]
    FeeTooLow {
        replacement: u64,
        parent: u64,
        child: u64,
    },

    #[error("rejected, fee below relay minimum: {0}")]
    RejectedLowFee(String),

    #[error("rejected, conflicting transaction does not signal replaceability: {0}")]
    RejectedConflict(String),

    #[error("rejected, replacement does not satisfy BIP125 rules: {0}")]
    RejectedDoubleSpend(String),

    #[error("node connection failed: {0}")]
    Connection(String),

    #[error("{op} is not allowed while the chain is {stage}")]
    InvalidChainState {
        op: &'static str,
        stage: ChainStage,
    },

    #[error("node error: {0}")]
    Node(String),
}

impl ChainError {
    /// Whether retrying the same operation with identical inputs can succeed.
    /// Building is deterministic and signing is idempotent per input, so a
    /// retry after a transient failure is always safe.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChainError::RejectedLowFee(_) | ChainError::Connection(_)
        )
    }
}

impl From<bitcoin::secp256k1::Error> for ChainError {
    fn from(err: bitcoin::secp256k1::Error) -> Self {
        ChainError::Signature(err.to_string())
    }
}

impl From<bitcoin::sighash::Error> for ChainError {
    fn from(err: bitcoin::sighash::Error) -> Self {
        ChainError::Signature(err.to_string())
    }
}
