//! Chain Adapters
//!
//! Collaborators the transfer engine talks to: the signing wallet, read-only
//! chain clients for the source and target chains, and the request watcher
//! used to race fulfillment against expiration.
//!
//! Errors from adapters are passed through unmodified. Retry policy, if any,
//! belongs to the adapter.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigUint;
use tokio_util::sync::CancellationToken;

use super::error::ChainError;
use super::types::{Address, ChainId, RequestId, TxHash};
use super::watch::{PollingWatcher, WatchConfig};
use crate::config::EngineConfig;

/// Transactions the engine asks the wallet to sign and send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRequest {
    /// ERC-20 approve
    Approve {
        token: Address,
        spender: Address,
        amount: BigUint,
    },
    /// Create a request on the source chain
    CreateRequest {
        contract: Address,
        target_chain: ChainId,
        source_token: Address,
        target_token: Address,
        target_account: Address,
        amount: BigUint,
        validity_period: u64,
    },
    /// Withdraw an expired, unclaimed request
    Withdraw {
        request_manager: Address,
        request_id: RequestId,
    },
}

impl TransactionRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            TransactionRequest::Approve { .. } => "approve",
            TransactionRequest::CreateRequest { .. } => "createRequest",
            TransactionRequest::Withdraw { .. } => "withdraw",
        }
    }
}

/// Signing wallet connected to one chain at a time.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Currently selected account
    async fn account(&self) -> Result<Address, ChainError>;

    /// Chain the wallet is connected to
    async fn chain_id(&self) -> Result<ChainId, ChainError>;

    /// Ask the wallet to switch networks.
    ///
    /// `Ok(false)` means the wallet declined without raising an error.
    async fn switch_chain(&self, chain: ChainId) -> Result<bool, ChainError>;

    /// Sign and broadcast; returns the hash of the pending transaction.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, ChainError>;

    /// Wait until `hash` has `confirmations` confirmations.
    ///
    /// Returns the hash of the mined transaction, which differs from `hash`
    /// if the transaction was replaced (e.g. sped up).
    async fn wait_for_transaction(
        &self,
        hash: &TxHash,
        confirmations: u32,
    ) -> Result<TxHash, ChainError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub timestamp: i64,
}

/// Request registry entry on the source chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRecord {
    pub withdrawn: bool,
    pub active_claims: u64,
    pub valid_until: i64,
}

/// `RequestCreated` event decoded from a request transaction's logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCreated {
    pub identifier: RequestId,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FulfillmentEvent {
    pub block_number: u64,
    pub timestamp: i64,
}

/// Events that change a request's active claim count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimEvent {
    ClaimMade,
    ClaimResolved,
}

pub type ClaimHandler = Arc<dyn Fn(ClaimEvent) + Send + Sync>;

/// Handle to a live event subscription.
///
/// Unsubscribes when dropped.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Read access to one chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> ChainId;

    async fn latest_block(&self) -> Result<Block, ChainError>;

    async fn allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<BigUint, ChainError>;

    async fn request_record(
        &self,
        request_manager: &Address,
        identifier: &RequestId,
    ) -> Result<RequestRecord, ChainError>;

    /// Decode the `RequestCreated` event from a mined request transaction.
    async fn request_created(
        &self,
        request_manager: &Address,
        tx_hash: &TxHash,
    ) -> Result<RequestCreated, ChainError>;

    /// Fulfillment events for `identifier` in `[from_block, to_block]`.
    async fn fulfillment_events(
        &self,
        fill_manager: &Address,
        identifier: &RequestId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<FulfillmentEvent>, ChainError>;

    /// Subscribe to claim-count changes of one request.
    async fn subscribe_claims(
        &self,
        request_manager: &Address,
        identifier: &RequestId,
        handler: ClaimHandler,
    ) -> Result<Subscription, ChainError>;
}

/// A request being watched for fulfillment or expiration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedRequest {
    pub identifier: RequestId,
    pub request_manager: Address,
    pub fill_manager: Address,
    /// First target-chain block to search for fulfillment
    pub from_block: u64,
}

/// Cancellable watches raced by `waitForFulfillment`.
///
/// Implementations must stop all polling and subscriptions once `cancel`
/// fires. The returned future may also simply be dropped.
#[async_trait]
pub trait RequestWatcher: Send + Sync {
    async fn wait_for_fulfillment(
        &self,
        request: &WatchedRequest,
        cancel: CancellationToken,
    ) -> Result<FulfillmentEvent, ChainError>;

    /// Resolves once the request is observed expired.
    async fn wait_for_expiration(
        &self,
        request: &WatchedRequest,
        cancel: CancellationToken,
    ) -> Result<(), ChainError>;
}

/// Everything a transfer needs to talk to the outside world.
#[derive(Clone)]
pub struct Environment {
    /// Connected signer, if any
    pub wallet: Option<Arc<dyn Wallet>>,
    pub source: Arc<dyn ChainClient>,
    pub target: Arc<dyn ChainClient>,
    pub watcher: Arc<dyn RequestWatcher>,
    pub confirmations: u32,
}

impl Environment {
    pub fn new(
        source: Arc<dyn ChainClient>,
        target: Arc<dyn ChainClient>,
        watcher: Arc<dyn RequestWatcher>,
    ) -> Self {
        Self {
            wallet: None,
            source,
            target,
            watcher,
            confirmations: 1,
        }
    }

    /// Environment using the polling watcher over `source` and `target`
    pub fn polling(
        source: Arc<dyn ChainClient>,
        target: Arc<dyn ChainClient>,
        config: WatchConfig,
    ) -> Self {
        let watcher = Arc::new(PollingWatcher::new(source.clone(), target.clone(), config));
        Self::new(source, target, watcher)
    }

    /// Polling environment tuned by the `engine` config section
    pub fn from_config(
        source: Arc<dyn ChainClient>,
        target: Arc<dyn ChainClient>,
        config: &EngineConfig,
    ) -> Self {
        Self::polling(source, target, config.watch_config())
            .with_confirmations(config.confirmations)
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations;
        self
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("wallet", &self.wallet.is_some())
            .field("source", &self.source.chain_id())
            .field("target", &self.target.chain_id())
            .field("confirmations", &self.confirmations)
            .finish()
    }
}


#[cfg(test)]
pub use mock::{MockChain, MockWallet, MockWatcher};
