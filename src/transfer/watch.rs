//! Polling Request Watcher
//!
//! Default [`RequestWatcher`] built on plain [`ChainClient`] queries.
//!
//! - Fulfillment: scan history from the recorded target block in chunks,
//!   halving the chunk when a range query fails, then follow new blocks.
//! - Expiration: poll the source chain until its latest block is past the
//!   request's `valid_until`.
//!
//! Both stop issuing queries as soon as their cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::adapters::{ChainClient, FulfillmentEvent, RequestWatcher, WatchedRequest};
use super::error::ChainError;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub poll_interval: Duration,
    /// Block range of the first history query
    pub initial_chunk_size: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            initial_chunk_size: 5_000,
        }
    }
}

pub struct PollingWatcher {
    source: Arc<dyn ChainClient>,
    target: Arc<dyn ChainClient>,
    config: WatchConfig,
}

impl PollingWatcher {
    pub fn new(
        source: Arc<dyn ChainClient>,
        target: Arc<dyn ChainClient>,
        config: WatchConfig,
    ) -> Self {
        Self {
            source,
            target,
            config,
        }
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<(), ChainError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ChainError::Cancelled),
            _ = tokio::time::sleep(self.config.poll_interval) => Ok(()),
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), ChainError> {
    if cancel.is_cancelled() {
        Err(ChainError::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait]
impl RequestWatcher for PollingWatcher {
    async fn wait_for_fulfillment(
        &self,
        request: &WatchedRequest,
        cancel: CancellationToken,
    ) -> Result<FulfillmentEvent, ChainError> {
        let mut next = request.from_block;
        let mut chunk = self.config.initial_chunk_size.max(1);

        loop {
            ensure_live(&cancel)?;
            let head = self.target.latest_block().await?.number;

            while next <= head {
                ensure_live(&cancel)?;
                let to = next.saturating_add(chunk - 1).min(head);
                match self
                    .target
                    .fulfillment_events(&request.fill_manager, &request.identifier, next, to)
                    .await
                {
                    Ok(events) => {
                        if let Some(event) = events.into_iter().min_by_key(|e| e.block_number) {
                            debug!(
                                request_id = %request.identifier,
                                block = event.block_number,
                                "Fulfillment found"
                            );
                            return Ok(event);
                        }
                        next = to + 1;
                    }
                    Err(e) if chunk > 1 => {
                        chunk /= 2;
                        warn!(
                            request_id = %request.identifier,
                            error = %e,
                            chunk,
                            "Fulfillment query failed, shrinking block range"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }

            self.pause(&cancel).await?;
        }
    }

    async fn wait_for_expiration(
        &self,
        request: &WatchedRequest,
        cancel: CancellationToken,
    ) -> Result<(), ChainError> {
        loop {
            ensure_live(&cancel)?;
            let record = self
                .source
                .request_record(&request.request_manager, &request.identifier)
                .await?;
            ensure_live(&cancel)?;
            let block = self.source.latest_block().await?;

            if block.timestamp > record.valid_until {
                debug!(
                    request_id = %request.identifier,
                    valid_until = record.valid_until,
                    block_time = block.timestamp,
                    "Request expired"
                );
                return Ok(());
            }

            self.pause(&cancel).await?;
        }
    }
}
