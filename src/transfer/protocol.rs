//! Transfer Protocol
//!
//! A [`Transfer`] drives the request protocol through its [`MultiStepAction`].
//! Each step consumes facts recorded by its predecessors and records new
//! ones, so a transfer rebuilt from storage resumes where it stopped.
//!
//! # Steps
//!
//! ```text
//! ensureTokenAllowance → sendRequestTransaction → waitForRequestEvent → waitForFulfillment
//!                                                                            ↓
//!                                                                  expired (step fails)
//! ```
//!
//! Every executor is idempotent with respect to already observed facts: a
//! recorded pending hash is waited for, never re-sent.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use super::adapters::{
    ChainClient, Environment, FulfillmentEvent, RequestWatcher, TransactionRequest, Wallet,
    WatchedRequest,
};
use super::claims::ClaimListener;
use super::codec::TransferRecord;
use super::error::{ChainError, TransferError};
use super::facts::{AllowanceInformation, RequestFulfillment, RequestInformation, WriteOnce};
use super::store::TransferStore;
use super::types::{
    Address, ChainInfo, RequestId, TokenAmount, TransferId, TransferKind, TransferStep, TxHash,
    max_uint256,
};
use crate::action::{MultiStepAction, Step, StepExecutor, StepFuture};

/// Parameters of a new transfer
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub kind: TransferKind,
    pub source_chain: ChainInfo,
    pub target_chain: ChainInfo,
    pub source_amount: TokenAmount,
    pub target_amount: TokenAmount,
    pub fees: TokenAmount,
    pub target_account: Address,
    /// Seconds the request stays valid
    pub validity_period: u64,
    pub approve_infinite_amount: bool,
}

/// Coarse lifecycle summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    Executing,
    Failed,
    Completed,
    Expired,
    Withdrawn,
}

/// Registry state mirrored from the source chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RegistryView {
    pub withdrawn: bool,
    pub claim_count: u64,
}

/// Shared cell for [`RegistryView`].
///
/// Claim listeners refresh it from background tasks while the owner keeps
/// using the transfer; both fields are replaced together. Changes are
/// published to receivers from [`RegistryState::subscribe`].
#[derive(Debug)]
pub(crate) struct RegistryState {
    view: watch::Sender<RegistryView>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self::new(RegistryView::default())
    }
}

impl RegistryState {
    pub fn new(view: RegistryView) -> Self {
        let (view, _) = watch::channel(view);
        Self { view }
    }

    pub fn get(&self) -> RegistryView {
        *self.view.borrow()
    }

    pub fn set(&self, view: RegistryView) {
        self.view.send_replace(view);
    }

    pub fn mark_withdrawn(&self) {
        self.view.send_modify(|view| view.withdrawn = true);
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistryView> {
        self.view.subscribe()
    }

    /// Overwrite the local view with the registry's record.
    pub async fn refresh(
        &self,
        source: &dyn ChainClient,
        request_manager: &Address,
        identifier: &RequestId,
    ) -> Result<RegistryView, ChainError> {
        let record = source.request_record(request_manager, identifier).await?;
        let view = RegistryView {
            withdrawn: record.withdrawn,
            claim_count: record.active_claims,
        };
        self.set(view);
        debug!(
            request_id = %identifier,
            withdrawn = view.withdrawn,
            claim_count = view.claim_count,
            "Registry state refreshed"
        );
        Ok(view)
    }
}

/// Transfer data the step executors operate on.
#[derive(Debug)]
pub(crate) struct TransferCore {
    pub id: TransferId,
    pub kind: TransferKind,
    pub source_chain: ChainInfo,
    pub target_chain: ChainInfo,
    pub source_amount: TokenAmount,
    pub target_amount: TokenAmount,
    pub fees: TokenAmount,
    pub target_account: Address,
    pub validity_period: u64,
    pub approve_infinite_amount: bool,
    pub date: DateTime<Utc>,
    pub request_information: Option<RequestInformation>,
    pub allowance_information: Option<AllowanceInformation>,
    pub fulfillment: WriteOnce<RequestFulfillment>,
    pub expired: bool,
    pub registry: Arc<RegistryState>,
}

impl TransferCore {
    fn request_info(&self) -> Result<&RequestInformation, TransferError> {
        self.request_information
            .as_ref()
            .ok_or(TransferError::MissingRequestInformation)
    }

    fn request_info_mut(&mut self) -> Result<&mut RequestInformation, TransferError> {
        self.request_information
            .as_mut()
            .ok_or(TransferError::MissingRequestInformation)
    }

    pub fn identifier(&self) -> Option<&RequestId> {
        self.request_information
            .as_ref()
            .and_then(RequestInformation::identifier)
    }

    /// Amount the request actually spends
    fn spend_amount(&self) -> BigUint {
        &self.source_amount.amount + &self.fees.amount
    }

    /// Amount to approve
    fn approval_amount(&self) -> BigUint {
        if self.approve_infinite_amount {
            max_uint256()
        } else {
            self.spend_amount()
        }
    }

    pub async fn check_and_update_state(
        &self,
        source: &dyn ChainClient,
    ) -> Result<(), TransferError> {
        let identifier = self.identifier().ok_or(TransferError::NoIdentifier)?;
        self.registry
            .refresh(source, &self.source_chain.request_manager, identifier)
            .await?;
        Ok(())
    }
}

/// A cross-chain transfer and its resumable step sequence.
#[derive(Debug)]
pub struct Transfer {
    pub(crate) core: TransferCore,
    pub(crate) action: MultiStepAction,
    pub(crate) claim_listener: Arc<ClaimListener>,
}

impl Transfer {
    /// Create a fresh transfer initiated by `request_account`.
    pub fn new(params: TransferParams, request_account: Address) -> Self {
        let core = TransferCore {
            id: TransferId::new(),
            kind: params.kind,
            source_chain: params.source_chain,
            target_chain: params.target_chain,
            source_amount: params.source_amount,
            target_amount: params.target_amount,
            fees: params.fees,
            target_account: params.target_account,
            validity_period: params.validity_period,
            approve_infinite_amount: params.approve_infinite_amount,
            date: Utc::now(),
            request_information: Some(RequestInformation::new(request_account)),
            allowance_information: None,
            fulfillment: WriteOnce::Unobserved,
            expired: false,
            registry: Arc::new(RegistryState::default()),
        };
        Self {
            core,
            action: MultiStepAction::new(TransferStep::canonical_steps()),
            claim_listener: Arc::default(),
        }
    }

    pub fn id(&self) -> TransferId {
        self.core.id
    }

    pub fn kind(&self) -> &TransferKind {
        &self.core.kind
    }

    pub fn source_chain(&self) -> &ChainInfo {
        &self.core.source_chain
    }

    pub fn target_chain(&self) -> &ChainInfo {
        &self.core.target_chain
    }

    pub fn source_amount(&self) -> &TokenAmount {
        &self.core.source_amount
    }

    pub fn target_amount(&self) -> &TokenAmount {
        &self.core.target_amount
    }

    pub fn fees(&self) -> &TokenAmount {
        &self.core.fees
    }

    pub fn target_account(&self) -> &Address {
        &self.core.target_account
    }

    pub fn validity_period(&self) -> u64 {
        self.core.validity_period
    }

    pub fn approve_infinite_amount(&self) -> bool {
        self.core.approve_infinite_amount
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.core.date
    }

    pub fn request_information(&self) -> Option<&RequestInformation> {
        self.core.request_information.as_ref()
    }

    pub fn allowance_information(&self) -> Option<&AllowanceInformation> {
        self.core.allowance_information.as_ref()
    }

    pub fn fulfillment(&self) -> Option<&RequestFulfillment> {
        self.core.fulfillment.get()
    }

    pub fn action(&self) -> &MultiStepAction {
        &self.action
    }

    pub fn is_expired(&self) -> bool {
        self.core.expired
    }

    pub fn is_withdrawn(&self) -> bool {
        self.core.registry.get().withdrawn
    }

    pub fn claim_count(&self) -> u64 {
        self.core.registry.get().claim_count
    }

    /// Expired and no filler has an active claim.
    pub fn withdrawable(&self) -> bool {
        self.is_expired() && self.claim_count() == 0
    }

    pub fn status(&self) -> TransferStatus {
        if self.is_withdrawn() {
            TransferStatus::Withdrawn
        } else if self.is_expired() {
            TransferStatus::Expired
        } else if self.action.is_active() {
            TransferStatus::Executing
        } else if self.action.is_failed() {
            TransferStatus::Failed
        } else if self.action.is_completed() {
            TransferStatus::Completed
        } else {
            TransferStatus::Pending
        }
    }

    /// Run (or resume) the protocol steps against `env`.
    ///
    /// Already completed steps are skipped. A failed transfer stays failed.
    /// Nothing is persisted; see [`Transfer::execute_with_checkpoints`].
    pub async fn execute(&mut self, env: &Environment) -> Result<(), TransferError> {
        self.run(env, None).await
    }

    /// [`Transfer::execute`], saving the transfer to `store` after every
    /// recorded fact and settled step.
    ///
    /// A pending transaction hash is on disk before its confirmation is
    /// awaited, so a process that dies mid-wait resumes the wait instead of
    /// sending again.
    pub async fn execute_with_checkpoints(
        &mut self,
        env: &Environment,
        store: &dyn TransferStore,
    ) -> Result<(), TransferError> {
        self.run(env, Some(store)).await
    }

    pub(crate) async fn run(
        &mut self,
        env: &Environment,
        store: Option<&dyn TransferStore>,
    ) -> Result<(), TransferError> {
        info!(
            transfer_id = %self.core.id,
            kind = self.core.kind.as_str(),
            checkpoints = store.is_some(),
            "Executing transfer"
        );

        let mut runner = StepRunner {
            core: &mut self.core,
            steps: self.action.steps().to_vec(),
            env,
            store,
        };
        let result = self.action.execute_steps(&mut runner).await;

        match result {
            Ok(()) => {
                info!(transfer_id = %self.core.id, "Transfer completed");
                Ok(())
            }
            Err(e) => {
                let e = TransferError::from(e);
                warn!(
                    transfer_id = %self.core.id,
                    code = e.code(),
                    error = %e,
                    "Transfer stopped"
                );
                Err(e)
            }
        }
    }

    /// Reconcile `withdrawn` and `claim_count` with the source registry.
    ///
    /// Safe to call repeatedly and concurrently with claim listeners.
    pub async fn check_and_update_state(
        &self,
        source: &dyn ChainClient,
    ) -> Result<(), TransferError> {
        self.core.check_and_update_state(source).await
    }
}

fn connected_wallet(env: &Environment) -> Result<&dyn Wallet, TransferError> {
    env.wallet.as_deref().ok_or(TransferError::NoWallet)
}

/// Sign and broadcast `tx`, returning the pending hash.
pub(crate) async fn submit(
    wallet: &dyn Wallet,
    transfer_id: TransferId,
    tx: TransactionRequest,
) -> Result<TxHash, TransferError> {
    let kind = tx.kind();
    let pending = wallet.send_transaction(tx).await?;
    info!(transfer_id = %transfer_id, tx_kind = kind, tx_hash = %pending, "Transaction sent");
    Ok(pending)
}

/// Binds the protocol steps of one transfer to an environment.
struct StepRunner<'a> {
    core: &'a mut TransferCore,
    /// Step list as of the last settled step
    steps: Vec<Step>,
    env: &'a Environment,
    store: Option<&'a dyn TransferStore>,
}

impl StepExecutor for StepRunner<'_> {
    type Error = TransferError;

    fn supports(&self, identifier: &str) -> bool {
        TransferStep::from_identifier(identifier).is_some()
    }

    fn execute(&mut self, identifier: &str) -> Option<StepFuture<'_, TransferError>> {
        let step = TransferStep::from_identifier(identifier)?;
        Some(Box::pin(self.run(step)))
    }

    fn step_settled<'a>(&'a mut self, steps: &'a [Step]) -> BoxFuture<'a, ()> {
        self.steps = steps.to_vec();
        Box::pin(self.checkpoint())
    }
}

impl StepRunner<'_> {
    /// Save the current state if a store is attached.
    ///
    /// A failed save is logged and the run continues; the next checkpoint
    /// writes the full record again.
    async fn checkpoint(&self) {
        let Some(store) = self.store else {
            return;
        };
        let record = TransferRecord::capture(&*self.core, &self.steps);
        let saved = match record.to_json() {
            Ok(value) => store.save(value).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = saved {
            error!(transfer_id = %self.core.id, error = %e, "Checkpoint failed");
        }
    }

    async fn run(&mut self, step: TransferStep) -> Result<(), TransferError> {
        debug!(transfer_id = %self.core.id, step = %step, "Running step");
        match step {
            TransferStep::EnsureTokenAllowance => self.ensure_token_allowance().await,
            TransferStep::SendRequestTransaction => self.send_request_transaction().await,
            TransferStep::WaitForRequestEvent => self.wait_for_request_event().await,
            TransferStep::WaitForFulfillment => self.wait_for_fulfillment().await,
        }
    }

    /// Connected account, which must be the transfer's request account.
    async fn ensure_request_account(&self) -> Result<Address, TransferError> {
        let wallet = connected_wallet(self.env)?;
        let account = wallet.account().await?;
        let expected = self.core.request_info()?.request_account();
        if account != *expected {
            return Err(TransferError::WrongAccount {
                expected: expected.clone(),
                actual: account,
            });
        }
        Ok(account)
    }

    async fn verify_allowance(&self, owner: &Address) -> Result<(), TransferError> {
        let core = &*self.core;
        let spender = core.kind.allowance_spender(&core.source_chain);
        let required = core.spend_amount();
        let available = self
            .env
            .source
            .allowance(&core.source_amount.token.address, owner, spender)
            .await?;
        if available < required {
            return Err(TransferError::InsufficientAllowance {
                required,
                available,
            });
        }
        Ok(())
    }

    async fn ensure_token_allowance(&mut self) -> Result<(), TransferError> {
        let account = self.ensure_request_account().await?;
        let env = self.env;
        let wallet = connected_wallet(env)?;

        if self.core.allowance_information.is_none() {
            let tx = TransactionRequest::Approve {
                token: self.core.source_amount.token.address.clone(),
                spender: self
                    .core
                    .kind
                    .allowance_spender(&self.core.source_chain)
                    .clone(),
                amount: self.core.approval_amount(),
            };
            let pending = submit(wallet, self.core.id, tx).await?;
            self.core.allowance_information = Some(AllowanceInformation::sent(pending));
            self.checkpoint().await;
        }

        if let Some(allowance) = self.core.allowance_information.as_mut()
            && allowance.transaction_hash().is_none()
            && let Some(pending) = allowance.internal_transaction_hash().cloned()
        {
            let mined = wallet
                .wait_for_transaction(&pending, env.confirmations)
                .await?;
            debug!(transfer_id = %self.core.id, tx_hash = %mined, "Approval confirmed");
            allowance.set_transaction_hash(mined)?;
            self.checkpoint().await;
        }

        self.verify_allowance(&account).await
    }

    async fn send_request_transaction(&mut self) -> Result<(), TransferError> {
        let account = self.ensure_request_account().await?;
        let env = self.env;
        let wallet = connected_wallet(env)?;

        let info = self.core.request_info()?;
        if info.transaction_hash().is_some() {
            return Ok(());
        }
        if let Some(pending) = info.internal_transaction_hash().cloned() {
            debug!(transfer_id = %self.core.id, tx_hash = %pending, "Resuming pending request");
            let mined = wallet
                .wait_for_transaction(&pending, env.confirmations)
                .await?;
            self.core.request_info_mut()?.set_transaction_hash(mined)?;
            return Ok(());
        }

        self.verify_allowance(&account).await?;

        if self.core.request_info()?.block_number_on_target_chain().is_none() {
            let block = env.target.latest_block().await?;
            self.core
                .request_info_mut()?
                .set_block_number_on_target_chain(block.number)?;
        }

        let core = &*self.core;
        let tx = TransactionRequest::CreateRequest {
            contract: core.kind.request_beneficiary(&core.source_chain).clone(),
            target_chain: core.target_chain.identifier,
            source_token: core.source_amount.token.address.clone(),
            target_token: core.target_amount.token.address.clone(),
            target_account: core.target_account.clone(),
            amount: core.source_amount.amount.clone(),
            validity_period: core.validity_period,
        };
        let pending = submit(wallet, self.core.id, tx).await?;
        self.core
            .request_info_mut()?
            .set_internal_transaction_hash(pending.clone())?;
        self.checkpoint().await;

        let mined = wallet
            .wait_for_transaction(&pending, env.confirmations)
            .await?;
        info!(transfer_id = %self.core.id, tx_hash = %mined, "Request transaction confirmed");
        self.core.request_info_mut()?.set_transaction_hash(mined)?;
        Ok(())
    }

    async fn wait_for_request_event(&mut self) -> Result<(), TransferError> {
        let info = self.core.request_info()?;
        let hash = info
            .transaction_hash()
            .cloned()
            .ok_or(TransferError::NoTransactionYet)?;
        if info.identifier().is_some() {
            return Ok(());
        }

        let created = self
            .env
            .source
            .request_created(&self.core.source_chain.request_manager, &hash)
            .await?;
        info!(
            transfer_id = %self.core.id,
            request_id = %created.identifier,
            "Request created"
        );

        let info = self.core.request_info_mut()?;
        info.set_identifier(created.identifier)?;
        info.set_timestamp(created.timestamp)?;
        Ok(())
    }

    async fn wait_for_fulfillment(&mut self) -> Result<(), TransferError> {
        if self.core.fulfillment.is_observed() {
            return Ok(());
        }
        let info = self.core.request_info()?;
        let identifier = info.identifier().cloned().ok_or(TransferError::NoIdentifier)?;
        let request = WatchedRequest {
            identifier,
            request_manager: self.core.source_chain.request_manager.clone(),
            fill_manager: self.core.target_chain.fill_manager.clone(),
            from_block: info.block_number_on_target_chain().unwrap_or(0),
        };

        match race_fulfillment(self.env.watcher.as_ref(), &request).await? {
            RaceOutcome::Fulfilled(event) => {
                info!(
                    transfer_id = %self.core.id,
                    request_id = %request.identifier,
                    block = event.block_number,
                    "Request fulfilled"
                );
                self.core.fulfillment.observe(
                    "fulfillment",
                    RequestFulfillment {
                        timestamp: event.timestamp,
                    },
                )?;
                Ok(())
            }
            RaceOutcome::Expired => {
                info!(
                    transfer_id = %self.core.id,
                    request_id = %request.identifier,
                    "Request expired before fulfillment"
                );
                self.core.expired = true;
                if let Err(e) = self
                    .core
                    .check_and_update_state(self.env.source.as_ref())
                    .await
                {
                    warn!(
                        transfer_id = %self.core.id,
                        error = %e,
                        "State refresh after expiration failed"
                    );
                }
                Err(TransferError::RequestExpired)
            }
        }
    }
}

/// Which watch settled first
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RaceOutcome {
    Fulfilled(FulfillmentEvent),
    Expired,
}

/// Race fulfillment against expiration; the loser is always cancelled.
///
/// Each watch owns a cancellation token guarded by a drop guard. The winner's
/// guard is disarmed, the loser's fires when it goes out of scope, and both
/// fire if this future itself is dropped.
pub(crate) async fn race_fulfillment(
    watcher: &dyn RequestWatcher,
    request: &WatchedRequest,
) -> Result<RaceOutcome, ChainError> {
    let fulfillment_cancel = CancellationToken::new();
    let expiration_cancel = CancellationToken::new();
    let fulfillment_guard = fulfillment_cancel.clone().drop_guard();
    let expiration_guard = expiration_cancel.clone().drop_guard();

    tokio::select! {
        biased;

        result = watcher.wait_for_fulfillment(request, fulfillment_cancel) => {
            fulfillment_guard.disarm();
            drop(expiration_guard);
            result.map(RaceOutcome::Fulfilled)
        }
        result = watcher.wait_for_expiration(request, expiration_cancel) => {
            expiration_guard.disarm();
            drop(fulfillment_guard);
            result.map(|()| RaceOutcome::Expired)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::adapters::mock::{WatchScript, eventually};
    use crate::transfer::adapters::{MockChain, MockWatcher};
    use crate::transfer::types::ChainId;
    use std::time::Duration;

    fn request() -> WatchedRequest {
        WatchedRequest {
            identifier: RequestId::from("1"),
            request_manager: Address::new("0xRM"),
            fill_manager: Address::new("0xFM"),
            from_block: 0,
        }
    }

    fn fill() -> FulfillmentEvent {
        FulfillmentEvent {
            block_number: 3,
            timestamp: 500,
        }
    }

    #[tokio::test]
    async fn test_race_fulfillment_wins() {
        let watcher = MockWatcher::new(
            WatchScript::After(Duration::from_millis(1), Ok(fill())),
            WatchScript::Pending,
        );
        let outcome = race_fulfillment(&watcher, &request()).await.unwrap();
        assert_eq!(outcome, RaceOutcome::Fulfilled(fill()));

        assert!(eventually(|| watcher.expiration_cancels() == 1).await);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(watcher.expiration_cancels(), 1);
        assert_eq!(watcher.fulfillment_cancels(), 0);
    }

    #[tokio::test]
    async fn test_race_expiration_wins() {
        let watcher = MockWatcher::new(
            WatchScript::Pending,
            WatchScript::After(Duration::from_millis(1), Ok(())),
        );
        let outcome = race_fulfillment(&watcher, &request()).await.unwrap();
        assert_eq!(outcome, RaceOutcome::Expired);

        assert!(eventually(|| watcher.fulfillment_cancels() == 1).await);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(watcher.fulfillment_cancels(), 1);
        assert_eq!(watcher.expiration_cancels(), 0);
    }

    #[tokio::test]
    async fn test_race_error_still_cancels_other_watch() {
        let watcher = MockWatcher::new(
            WatchScript::After(
                Duration::from_millis(1),
                Err(ChainError::Network("down".into())),
            ),
            WatchScript::Pending,
        );
        let err = race_fulfillment(&watcher, &request()).await.unwrap_err();
        assert_eq!(err, ChainError::Network("down".into()));
        assert!(eventually(|| watcher.expiration_cancels() == 1).await);
    }

    #[tokio::test]
    async fn test_abandoned_race_cancels_both_watches() {
        let watcher = MockWatcher::new(WatchScript::Pending, WatchScript::Pending);
        let request = request();
        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            race_fulfillment(&watcher, &request),
        )
        .await;
        assert!(timed_out.is_err());

        assert!(eventually(|| watcher.fulfillment_cancels() == 1).await);
        assert!(eventually(|| watcher.expiration_cancels() == 1).await);
    }

    #[tokio::test]
    async fn test_registry_refresh_overwrites_view() {
        let chain = MockChain::new(ChainId(1));
        chain.set_record(crate::transfer::adapters::RequestRecord {
            withdrawn: true,
            active_claims: 2,
            valid_until: 0,
        });
        let state = RegistryState::default();
        let view = state
            .refresh(&chain, &Address::new("0xRM"), &RequestId::from("1"))
            .await
            .unwrap();
        assert_eq!(
            view,
            RegistryView {
                withdrawn: true,
                claim_count: 2
            }
        );
        assert_eq!(state.get(), view);
    }
}
