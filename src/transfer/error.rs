//! Transfer Error Types

use num_bigint::BigUint;
use thiserror::Error;

use super::types::{Address, ChainId, TransferId};
use crate::action::{ActionError, ExecuteError};

/// Attempt to overwrite an already observed write-once fact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactError {
    #[error("Fact {0} has already been observed with a different value")]
    Overwrite(&'static str),
}

/// Errors raised by chain collaborators (wallet, RPC, event queries).
///
/// Propagated unmodified; the engine never retries them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Rejected by wallet: {0}")]
    Rejected(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Watch cancelled")]
    Cancelled,
}

/// Transfer error types
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Protocol Guards ===
    #[error("Wrong account: transfer belongs to {expected}, connected account is {actual}")]
    WrongAccount { expected: Address, actual: Address },

    #[error("No wallet connected")]
    NoWallet,

    #[error("Insufficient allowance: required {required}, available {available}")]
    InsufficientAllowance {
        required: BigUint,
        available: BigUint,
    },

    #[error("Transfer has no request information")]
    MissingRequestInformation,

    #[error("Request transaction has not been confirmed yet")]
    NoTransactionYet,

    #[error("Request identifier has not been observed yet")]
    NoIdentifier,

    // === Expiration ===
    #[error("Request expired")]
    RequestExpired,

    // === Withdraw ===
    #[error("Transfer has not expired")]
    NotExpired,

    #[error("Transfer has already been withdrawn")]
    AlreadyWithdrawn,

    #[error("Transfer has {0} active claims")]
    ActiveClaims(u64),

    #[error("Cannot switch wallet to chain {0}")]
    CannotSwitch(ChainId),

    // === Claim listeners ===
    #[error("Claim listeners are already running")]
    AlreadyListening,

    #[error("Claim listeners need a running tokio runtime")]
    NoRuntime,

    // === Supervisor ===
    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    // === Wrapped ===
    #[error(transparent)]
    Fact(#[from] FactError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl TransferError {
    /// Stable error code for logs and callers
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::WrongAccount { .. } => "WRONG_ACCOUNT",
            TransferError::NoWallet => "NO_WALLET",
            TransferError::InsufficientAllowance { .. } => "INSUFFICIENT_ALLOWANCE",
            TransferError::MissingRequestInformation => "MISSING_REQUEST_INFORMATION",
            TransferError::NoTransactionYet => "NO_TRANSACTION_YET",
            TransferError::NoIdentifier => "NO_IDENTIFIER",
            TransferError::RequestExpired => "REQUEST_EXPIRED",
            TransferError::NotExpired => "NOT_EXPIRED",
            TransferError::AlreadyWithdrawn => "ALREADY_WITHDRAWN",
            TransferError::ActiveClaims(_) => "ACTIVE_CLAIMS",
            TransferError::CannotSwitch(_) => "CANNOT_SWITCH",
            TransferError::AlreadyListening => "ALREADY_LISTENING",
            TransferError::NoRuntime => "NO_RUNTIME",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::Fact(_) => "FACT_OVERWRITE",
            TransferError::Action(ActionError::AlreadyFailed) => "ALREADY_FAILED",
            TransferError::Action(ActionError::AlreadyActive) => "ALREADY_ACTIVE",
            TransferError::Action(ActionError::MissingExecutors(_)) => "MISSING_EXECUTORS",
            TransferError::Action(ActionError::Transition(_)) => "INVALID_TRANSITION",
            TransferError::Chain(_) => "CHAIN_ERROR",
        }
    }

    #[inline]
    pub fn is_expiration(&self) -> bool {
        matches!(self, TransferError::RequestExpired)
    }
}

impl From<ExecuteError<TransferError>> for TransferError {
    fn from(e: ExecuteError<TransferError>) -> Self {
        match e {
            ExecuteError::Action(a) => TransferError::Action(a),
            ExecuteError::Step(s) => s,
        }
    }
}

/// Persistence decoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported record version {0}")]
    UnsupportedVersion(u32),

    #[error("Malformed transfer record: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
