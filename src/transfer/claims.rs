//! Claim event listeners
//!
//! While a request is expired but not withdrawn, fillers may still hold
//! claims on it. A listener re-reads the registry state on every claim event
//! so `claim_count` and `withdrawable` stay current.
//!
//! Events are queued and applied by one worker task per listener, in the
//! order they arrived, so a slow refresh never overwrites a newer one.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::adapters::{ChainClient, ClaimEvent, ClaimHandler, Subscription};
use super::error::TransferError;
use super::protocol::Transfer;

#[derive(Debug)]
struct ActiveListener {
    subscription: Subscription,
    worker: JoinHandle<()>,
}

/// Claim subscription slot of one transfer.
///
/// Shared so that the supervisor can stop a listener from a background task.
#[derive(Debug, Default)]
pub(crate) struct ClaimListener {
    active: Mutex<Option<ActiveListener>>,
}

impl ClaimListener {
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn install(&self, listener: ActiveListener) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Unsubscribe and stop the worker. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        let taken = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(listener) => {
                listener.subscription.unsubscribe();
                listener.worker.abort();
                true
            }
            None => false,
        }
    }
}

impl Transfer {
    pub fn is_listening(&self) -> bool {
        self.claim_listener.is_active()
    }

    pub(crate) fn claim_listener(&self) -> Arc<ClaimListener> {
        self.claim_listener.clone()
    }

    /// Subscribe to claim events of this transfer's request on `source`.
    ///
    /// Each event triggers a registry refresh on the current tokio runtime.
    pub async fn start_claim_event_listeners(
        &mut self,
        source: Arc<dyn ChainClient>,
    ) -> Result<(), TransferError> {
        if self.is_listening() {
            return Err(TransferError::AlreadyListening);
        }
        let identifier = self
            .core
            .identifier()
            .cloned()
            .ok_or(TransferError::NoIdentifier)?;
        let runtime = Handle::try_current().map_err(|_| TransferError::NoRuntime)?;
        let request_manager = self.core.source_chain.request_manager.clone();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ClaimEvent>();
        let handler: ClaimHandler = Arc::new(move |event| {
            // Closed only after the worker is gone
            let _ = events_tx.send(event);
        });
        let subscription = source
            .subscribe_claims(&request_manager, &identifier, handler)
            .await?;

        let transfer_id = self.core.id;
        let registry = self.core.registry.clone();
        let request_id = identifier.clone();
        let worker = runtime.spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match registry
                    .refresh(source.as_ref(), &request_manager, &request_id)
                    .await
                {
                    Ok(view) => debug!(
                        transfer_id = %transfer_id,
                        ?event,
                        claim_count = view.claim_count,
                        withdrawn = view.withdrawn,
                        "Claim event processed"
                    ),
                    Err(e) => warn!(
                        transfer_id = %transfer_id,
                        ?event,
                        error = %e,
                        "Refresh after claim event failed"
                    ),
                }
            }
        });

        self.claim_listener.install(ActiveListener {
            subscription,
            worker,
        });
        info!(transfer_id = %self.core.id, request_id = %identifier, "Claim listeners started");
        Ok(())
    }

    /// Release the claim subscription, if any.
    pub fn stop_event_listeners(&mut self) {
        if self.claim_listener.stop() {
            info!(transfer_id = %self.core.id, "Claim listeners stopped");
        }
    }
}
