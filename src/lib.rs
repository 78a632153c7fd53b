//! Bridge Transfer - Resumable cross-chain transfer engine
//!
//! # Modules
//!
//! - [`action`] - Generic resumable multi-step action engine
//! - [`transfer`] - Cross-chain transfer protocol, persistence and supervision
//! - [`config`] - YAML application configuration
//! - [`logging`] - Tracing subscriber setup

pub mod action;
pub mod config;
pub mod logging;
pub mod transfer;

// Convenient re-exports at crate root
pub use action::{MultiStepAction, Step};
pub use config::{AppConfig, ConfigError, EngineConfig, StoreConfig};
pub use transfer::{
    Environment, Transfer, TransferError, TransferId, TransferKind, TransferParams,
    TransferStatus, TransferSupervisor, WithdrawOutcome,
};
