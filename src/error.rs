use super::invoice::InvoiceStatus;
use sled::transaction::TransactionError;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invoice {0} not found")]
    NotFound(u64),
    #[error("Invoice {id} is {status:?}, transition requires {expected}")]
    InvalidState {
        id: u64,
        status: InvoiceStatus,
        expected: &'static str,
    },
    #[error("Caller {caller} is not allowed to {action}")]
    Unauthorized { caller: String, action: &'static str },
    #[error("A business cannot factor its own invoice")]
    SelfDealing,
    #[error("Payment must be exactly {expected}, got {got}")]
    AmountMismatch { expected: u64, got: u64 },
    #[error("Collateral must be exactly {expected}, got {got}")]
    CollateralMismatch { expected: u64, got: u64 },
    #[error("Invoice {0} already holds its collateral")]
    AlreadyCollateralized(u64),
    #[error("Invoice {0} has no collateral deposited")]
    CollateralRequired(u64),
    #[error("Invoice {0} is not yet past its due date")]
    NotYetDue(u64),
    #[error("Invoice {0} is past its due date and can no longer be factored")]
    Expired(u64),
    #[error("Platform is paused")]
    Paused,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Platform has already been initialized")]
    AlreadyInitialized,
    #[error("Platform has not been initialized")]
    NotInitialized,
    #[error("Requested {requested} but only {available} in platform fees")]
    InsufficientPlatformFees { requested: u64, available: u64 },
    #[error("Arithmetic overflow")]
    Overflow,
    #[error("Event log broken at sequence {0}")]
    CorruptEventLog(u64),
    #[error("Encoding failure: {0}")]
    Codec(String),
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
}

impl From<TransactionError<EngineError>> for EngineError {
    fn from(value: TransactionError<EngineError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => EngineError::Storage(err),
        }
    }
}

impl From<minicbor::decode::Error> for EngineError {
    fn from(value: minicbor::decode::Error) -> Self {
        EngineError::Codec(value.to_string())
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for EngineError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        EngineError::Codec(value.to_string())
    }
}
