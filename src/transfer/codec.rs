//! Transfer persistence codec
//!
//! A transfer is stored as one flat, versioned [`TransferRecord`]. Fields a
//! newer engine added are optional, so snapshots written by older versions
//! still decode into a valid transfer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::CodecError;
use super::facts::{AllowanceInformation, RequestFulfillment, RequestInformation, WriteOnce};
use super::protocol::{RegistryState, RegistryView, Transfer, TransferCore};
use super::types::{Address, ChainInfo, TokenAmount, TransferId, TransferKind, TransferStep};
use crate::action::{MultiStepAction, Step};

/// Current record version
pub const RECORD_VERSION: u32 = 1;

fn default_version() -> u32 {
    RECORD_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TransferId>,
    #[serde(default = "TransferRecord::default_kind")]
    pub kind: TransferKind,
    pub source_chain: ChainInfo,
    pub target_chain: ChainInfo,
    pub source_amount: TokenAmount,
    pub target_amount: TokenAmount,
    pub fees: TokenAmount,
    pub target_account: Address,
    pub validity_period: u64,
    #[serde(default)]
    pub approve_infinite_amount: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_information: Option<RequestInformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowance_information: Option<AllowanceInformation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_fulfillment: Option<RequestFulfillment>,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub withdrawn: bool,
    #[serde(default)]
    pub claim_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,
}

impl TransferRecord {
    fn default_kind() -> TransferKind {
        TransferKind::Standard
    }

    pub fn to_json(&self) -> Result<Value, CodecError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: Value) -> Result<Self, CodecError> {
        let record: TransferRecord = serde_json::from_value(value)?;
        if record.version > RECORD_VERSION {
            return Err(CodecError::UnsupportedVersion(record.version));
        }
        Ok(record)
    }
}

impl TransferRecord {
    /// Snapshot of `core` with `steps` as the step list.
    pub(crate) fn capture(core: &TransferCore, steps: &[Step]) -> Self {
        let registry = core.registry.get();
        Self {
            version: RECORD_VERSION,
            id: Some(core.id),
            kind: core.kind.clone(),
            source_chain: core.source_chain.clone(),
            target_chain: core.target_chain.clone(),
            source_amount: core.source_amount.clone(),
            target_amount: core.target_amount.clone(),
            fees: core.fees.clone(),
            target_account: core.target_account.clone(),
            validity_period: core.validity_period,
            approve_infinite_amount: core.approve_infinite_amount,
            date: Some(core.date),
            request_information: core.request_information.clone(),
            allowance_information: core.allowance_information.clone(),
            request_fulfillment: core.fulfillment.get().copied(),
            expired: core.expired,
            withdrawn: registry.withdrawn,
            claim_count: registry.claim_count,
            steps: Some(steps.to_vec()),
        }
    }
}

impl Transfer {
    pub fn encode(&self) -> TransferRecord {
        TransferRecord::capture(&self.core, self.action.steps())
    }

    /// Rebuild a transfer from a stored record.
    ///
    /// Missing identity fields are assigned fresh; a missing step list means
    /// the record predates step tracking and starts from the canonical steps.
    pub fn decode(record: TransferRecord) -> Result<Self, CodecError> {
        if record.version > RECORD_VERSION {
            return Err(CodecError::UnsupportedVersion(record.version));
        }
        let steps = record.steps.unwrap_or_else(TransferStep::canonical_steps);
        let core = TransferCore {
            id: record.id.unwrap_or_default(),
            kind: record.kind,
            source_chain: record.source_chain,
            target_chain: record.target_chain,
            source_amount: record.source_amount,
            target_amount: record.target_amount,
            fees: record.fees,
            target_account: record.target_account,
            validity_period: record.validity_period,
            approve_infinite_amount: record.approve_infinite_amount,
            date: record.date.unwrap_or_else(Utc::now),
            request_information: record.request_information,
            allowance_information: record.allowance_information,
            fulfillment: WriteOnce::from(record.request_fulfillment),
            expired: record.expired,
            registry: Arc::new(RegistryState::new(RegistryView {
                withdrawn: record.withdrawn,
                claim_count: record.claim_count,
            })),
        };
        Ok(Self {
            core,
            action: MultiStepAction::new(steps),
            claim_listener: Arc::default(),
        })
    }

    pub fn to_json(&self) -> Result<Value, CodecError> {
        self.encode().to_json()
    }

    pub fn from_json(value: Value) -> Result<Self, CodecError> {
        Self::decode(TransferRecord::from_json(value)?)
    }
}
