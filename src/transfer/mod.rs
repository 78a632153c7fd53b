//! Cross-chain Transfer Engine
//!
//! Moves tokens from a source chain to a target chain through an on-chain
//! request registry. The user locks funds by creating a request; a filler
//! delivers on the target chain; if nobody fills before the request's
//! validity period ends, the user withdraws the locked funds.
//!
//! # Flow
//!
//! ```text
//! ensureTokenAllowance → sendRequestTransaction → waitForRequestEvent → waitForFulfillment
//!                                                                        ↓            ↓
//!                                                                    fulfilled     expired
//!                                                                                     ↓
//!                                                         claim listeners → withdraw
//! ```
//!
//! # Invariants
//!
//! 1. **Resumable**: every step is idempotent with respect to recorded facts,
//!    so a transfer decoded from storage can simply be executed again
//! 2. **Write-once facts**: hashes, identifiers and timestamps are never
//!    overwritten once observed
//! 3. **Single signer**: every on-chain action comes from the account that
//!    created the request
//! 4. **Withdrawable** ⇔ expired ∧ no active claims

pub mod adapters;
pub mod claims;
pub mod codec;
pub mod error;
pub mod facts;
pub mod protocol;
pub mod store;
pub mod supervisor;
pub mod types;
pub mod watch;
pub mod withdraw;


pub use adapters::{ChainClient, Environment, RequestWatcher, Subscription, Wallet};
pub use codec::{RECORD_VERSION, TransferRecord};
pub use error::{ChainError, CodecError, FactError, StoreError, TransferError};
pub use protocol::{Transfer, TransferParams, TransferStatus};
pub use store::{JsonFileStore, TransferStore};
pub use supervisor::{SyncReport, TransferSupervisor};
pub use types::{Address, ChainId, ChainInfo, RequestId, TokenAmount, TransferId, TransferKind};
pub use watch::{PollingWatcher, WatchConfig};
pub use withdraw::WithdrawOutcome;
