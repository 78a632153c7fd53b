//! Transfer Supervisor
//!
//! Owns a collection of transfers keyed by [`TransferId`], persists them
//! through a [`TransferStore`] and keeps claim listeners in line with each
//! transfer's `expired`/`withdrawn` state.
//!
//! Every started listener gets a watchdog task that stops it as soon as the
//! transfer's registry view reports `withdrawn`, whether that came from a
//! claim event, a resync or a local withdraw.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::adapters::{ChainClient, Environment};
use super::error::{StoreError, TransferError};
use super::protocol::Transfer;
use super::store::TransferStore;
use super::types::{ChainId, TransferId};
use super::withdraw::WithdrawOutcome;

/// Listener changes made by one [`TransferSupervisor::sync_claim_listeners`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub started: usize,
    pub stopped: usize,
}

enum ListenerChange {
    Started,
    Stopped,
}

#[derive(Default)]
pub struct TransferSupervisor {
    transfers: BTreeMap<TransferId, Transfer>,
    /// Clients used for claim subscriptions, by source chain
    sources: FxHashMap<ChainId, Arc<dyn ChainClient>>,
    /// Withdrawal watchdogs of running listeners
    watchdogs: FxHashMap<TransferId, JoinHandle<()>>,
    /// Checkpoint target for `execute` and `withdraw`
    store: Option<Arc<dyn TransferStore>>,
}

impl TransferSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checkpoint every transfer this supervisor executes or withdraws to
    /// `store`.
    pub fn with_store(mut self, store: Arc<dyn TransferStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn register_source(&mut self, client: Arc<dyn ChainClient>) {
        self.sources.insert(client.chain_id(), client);
    }

    pub fn insert(&mut self, transfer: Transfer) -> TransferId {
        let id = transfer.id();
        if let Some(mut previous) = self.transfers.insert(id, transfer) {
            previous.stop_event_listeners();
        }
        self.abort_watchdog(id);
        id
    }

    pub fn get(&self, id: TransferId) -> Option<&Transfer> {
        self.transfers.get(&id)
    }

    /// Remove a transfer, stopping its listeners.
    pub fn remove(&mut self, id: TransferId) -> Option<Transfer> {
        let mut transfer = self.transfers.remove(&id)?;
        transfer.stop_event_listeners();
        self.abort_watchdog(id);
        Some(transfer)
    }

    pub fn transfers(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.values()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    fn transfer_mut(&mut self, id: TransferId) -> Result<&mut Transfer, TransferError> {
        self.transfers
            .get_mut(&id)
            .ok_or(TransferError::TransferNotFound(id))
    }

    fn abort_watchdog(&mut self, id: TransferId) {
        if let Some(watchdog) = self.watchdogs.remove(&id) {
            watchdog.abort();
        }
    }

    /// Execute a transfer, then bring its listeners in line with the outcome.
    ///
    /// With a store attached, progress is checkpointed while the steps run.
    pub async fn execute(
        &mut self,
        id: TransferId,
        env: &Environment,
    ) -> Result<(), TransferError> {
        let store = self.store.clone();
        let result = self.transfer_mut(id)?.run(env, store.as_deref()).await;
        self.sync_one(id).await;
        result
    }

    pub async fn withdraw(
        &mut self,
        id: TransferId,
        env: &Environment,
    ) -> Result<WithdrawOutcome, TransferError> {
        let result = self.transfer_mut(id)?.withdraw(env).await;
        if matches!(result, Ok(WithdrawOutcome::Withdrawn(_))) {
            self.checkpoint(id).await;
        }
        self.sync_one(id).await;
        result
    }

    /// Save one transfer to the attached store, if any.
    pub async fn checkpoint(&self, id: TransferId) {
        let (Some(store), Some(transfer)) = (&self.store, self.transfers.get(&id)) else {
            return;
        };
        let saved = match transfer.to_json() {
            Ok(record) => store.save(record).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = saved {
            error!(transfer_id = %id, error = %e, "Checkpoint failed");
        }
    }

    async fn sync_one(&mut self, id: TransferId) {
        if let Some(transfer) = self.transfers.get_mut(&id) {
            Self::sync_listener(&self.sources, &mut self.watchdogs, transfer).await;
        }
    }

    /// Start listeners for expired, unwithdrawn transfers and stop them for
    /// withdrawn ones.
    pub async fn sync_claim_listeners(&mut self) -> SyncReport {
        let mut report = SyncReport::default();
        for transfer in self.transfers.values_mut() {
            match Self::sync_listener(&self.sources, &mut self.watchdogs, transfer).await {
                Some(ListenerChange::Started) => report.started += 1,
                Some(ListenerChange::Stopped) => report.stopped += 1,
                None => {}
            }
        }
        if report != SyncReport::default() {
            info!(
                started = report.started,
                stopped = report.stopped,
                "Claim listeners synced"
            );
        }
        report
    }

    async fn sync_listener(
        sources: &FxHashMap<ChainId, Arc<dyn ChainClient>>,
        watchdogs: &mut FxHashMap<TransferId, JoinHandle<()>>,
        transfer: &mut Transfer,
    ) -> Option<ListenerChange> {
        if transfer.is_withdrawn() {
            if let Some(watchdog) = watchdogs.remove(&transfer.id()) {
                watchdog.abort();
            }
            if transfer.is_listening() {
                transfer.stop_event_listeners();
                return Some(ListenerChange::Stopped);
            }
            return None;
        }
        if !transfer.is_expired() || transfer.is_listening() {
            return None;
        }

        let chain = transfer.source_chain().identifier;
        let Some(source) = sources.get(&chain) else {
            warn!(
                transfer_id = %transfer.id(),
                chain = %chain,
                "No client registered for source chain, claim listeners not started"
            );
            return None;
        };
        if let Err(e) = transfer.start_claim_event_listeners(source.clone()).await {
            error!(
                transfer_id = %transfer.id(),
                code = e.code(),
                error = %e,
                "Failed to start claim listeners"
            );
            return None;
        }
        if let Some(watchdog) = Self::watch_withdrawal(transfer)
            && let Some(previous) = watchdogs.insert(transfer.id(), watchdog)
        {
            previous.abort();
        }
        Some(ListenerChange::Started)
    }

    /// Stop `transfer`'s listeners once its registry view turns withdrawn.
    fn watch_withdrawal(transfer: &Transfer) -> Option<JoinHandle<()>> {
        let runtime = Handle::try_current().ok()?;
        let transfer_id = transfer.id();
        let mut view = transfer.core.registry.subscribe();
        let listener = transfer.claim_listener();
        Some(runtime.spawn(async move {
            loop {
                if view.borrow_and_update().withdrawn {
                    break;
                }
                if view.changed().await.is_err() {
                    return;
                }
            }
            if listener.stop() {
                info!(transfer_id = %transfer_id, "Claim listeners stopped after withdrawal");
            }
        }))
    }

    pub fn stop_all(&mut self) {
        for transfer in self.transfers.values_mut() {
            transfer.stop_event_listeners();
        }
        for (_, watchdog) in self.watchdogs.drain() {
            watchdog.abort();
        }
    }

    /// Load every decodable record from `store`.
    ///
    /// Records that fail to decode are logged and skipped.
    pub async fn load(&mut self, store: &dyn TransferStore) -> Result<usize, StoreError> {
        let records = store.load_all().await?;
        let total = records.len();
        let mut loaded = 0;

        for (index, record) in records.into_iter().enumerate() {
            match Transfer::from_json(record) {
                Ok(transfer) => {
                    debug!(
                        transfer_id = %transfer.id(),
                        status = ?transfer.status(),
                        "Transfer loaded"
                    );
                    self.insert(transfer);
                    loaded += 1;
                }
                Err(e) => {
                    error!(index, error = %e, "Skipping undecodable transfer record");
                }
            }
        }

        info!(loaded, skipped = total - loaded, "Transfers loaded");
        Ok(loaded)
    }

    pub async fn persist(&self, store: &dyn TransferStore) -> Result<(), StoreError> {
        let records = self
            .transfers
            .values()
            .map(Transfer::to_json)
            .collect::<Result<Vec<_>, _>>()?;
        store.save_all(&records).await?;
        info!(count = records.len(), "Transfers persisted");
        Ok(())
    }
}
