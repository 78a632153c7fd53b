//! Withdrawal of expired requests

use tracing::{info, warn};

use super::adapters::{Environment, TransactionRequest};
use super::error::TransferError;
use super::protocol::Transfer;
use super::types::TxHash;

/// Result of a successful [`Transfer::withdraw`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// Withdraw transaction sent
    Withdrawn(TxHash),
    /// The wallet was moved to the source chain; call `withdraw` again.
    NetworkSwitched,
}

impl Transfer {
    /// Reclaim the funds of an expired, unclaimed request.
    ///
    /// Guards are checked in order and nothing is sent unless all pass.
    pub async fn withdraw(&mut self, env: &Environment) -> Result<WithdrawOutcome, TransferError> {
        if !self.is_expired() {
            return Err(TransferError::NotExpired);
        }
        let identifier = self
            .core
            .identifier()
            .cloned()
            .ok_or(TransferError::NoIdentifier)?;

        if !self.is_withdrawn() {
            self.check_and_update_state(env.source.as_ref()).await?;
        }
        if self.is_withdrawn() {
            return Err(TransferError::AlreadyWithdrawn);
        }
        let claims = self.claim_count();
        if claims > 0 {
            return Err(TransferError::ActiveClaims(claims));
        }

        let wallet = env.wallet.as_deref().ok_or(TransferError::NoWallet)?;
        let source_chain = self.core.source_chain.identifier;
        if wallet.chain_id().await? != source_chain {
            let switched = match wallet.switch_chain(source_chain).await {
                Ok(switched) => switched,
                Err(e) => {
                    warn!(
                        transfer_id = %self.core.id,
                        chain = %source_chain,
                        error = %e,
                        "Wallet refused network switch"
                    );
                    false
                }
            };
            if !switched || wallet.chain_id().await? != source_chain {
                return Err(TransferError::CannotSwitch(source_chain));
            }
            info!(
                transfer_id = %self.core.id,
                chain = %source_chain,
                "Switched wallet to source chain"
            );
            return Ok(WithdrawOutcome::NetworkSwitched);
        }

        let tx = TransactionRequest::Withdraw {
            request_manager: self.core.source_chain.request_manager.clone(),
            request_id: identifier,
        };
        let hash = wallet.send_transaction(tx).await?;
        self.core.registry.mark_withdrawn();
        info!(transfer_id = %self.core.id, tx_hash = %hash, "Withdraw sent");
        Ok(WithdrawOutcome::Withdrawn(hash))
    }
}
