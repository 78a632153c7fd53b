//! Write-once fact records
//!
//! Observations about a transfer's on-chain evidence. Each field moves from
//! `Unobserved` to `Observed` exactly once and is never overwritten.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::FactError;
use super::types::{Address, RequestId, TxHash};

/// A value that may be observed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOnce<T> {
    Unobserved,
    Observed(T),
}

impl<T: PartialEq> WriteOnce<T> {
    /// Record `value`.
    ///
    /// Re-observing the identical value is a no-op; a different value is an
    /// [`FactError::Overwrite`].
    pub fn observe(&mut self, field: &'static str, value: T) -> Result<(), FactError> {
        match self {
            WriteOnce::Unobserved => {
                *self = WriteOnce::Observed(value);
                Ok(())
            }
            WriteOnce::Observed(current) if *current == value => Ok(()),
            WriteOnce::Observed(_) => Err(FactError::Overwrite(field)),
        }
    }
}

impl<T> WriteOnce<T> {
    pub fn get(&self) -> Option<&T> {
        match self {
            WriteOnce::Unobserved => None,
            WriteOnce::Observed(v) => Some(v),
        }
    }

    pub fn is_observed(&self) -> bool {
        matches!(self, WriteOnce::Observed(_))
    }

    pub fn is_unobserved(&self) -> bool {
        !self.is_observed()
    }
}

impl<T> Default for WriteOnce<T> {
    fn default() -> Self {
        WriteOnce::Unobserved
    }
}

impl<T> From<Option<T>> for WriteOnce<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => WriteOnce::Observed(v),
            None => WriteOnce::Unobserved,
        }
    }
}

impl<T: Serialize> Serialize for WriteOnce<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for WriteOnce<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(WriteOnce::from)
    }
}

/// Everything known about the request transaction on the source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInformation {
    /// Account that must perform every on-chain action of this transfer.
    request_account: Address,
    #[serde(default, skip_serializing_if = "WriteOnce::is_unobserved")]
    transaction_hash: WriteOnce<TxHash>,
    /// Set before confirmation so a pending send can be resumed.
    #[serde(default, skip_serializing_if = "WriteOnce::is_unobserved")]
    internal_transaction_hash: WriteOnce<TxHash>,
    #[serde(default, skip_serializing_if = "WriteOnce::is_unobserved")]
    identifier: WriteOnce<RequestId>,
    /// Lower bound for the fulfillment search.
    #[serde(default, skip_serializing_if = "WriteOnce::is_unobserved")]
    block_number_on_target_chain: WriteOnce<u64>,
    #[serde(default, skip_serializing_if = "WriteOnce::is_unobserved")]
    timestamp: WriteOnce<i64>,
}

impl RequestInformation {
    pub fn new(request_account: Address) -> Self {
        Self {
            request_account,
            transaction_hash: WriteOnce::Unobserved,
            internal_transaction_hash: WriteOnce::Unobserved,
            identifier: WriteOnce::Unobserved,
            block_number_on_target_chain: WriteOnce::Unobserved,
            timestamp: WriteOnce::Unobserved,
        }
    }

    pub fn request_account(&self) -> &Address {
        &self.request_account
    }

    pub fn transaction_hash(&self) -> Option<&TxHash> {
        self.transaction_hash.get()
    }

    pub fn internal_transaction_hash(&self) -> Option<&TxHash> {
        self.internal_transaction_hash.get()
    }

    pub fn identifier(&self) -> Option<&RequestId> {
        self.identifier.get()
    }

    pub fn block_number_on_target_chain(&self) -> Option<u64> {
        self.block_number_on_target_chain.get().copied()
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp.get().copied()
    }

    pub fn set_transaction_hash(&mut self, hash: TxHash) -> Result<(), FactError> {
        self.transaction_hash.observe("transactionHash", hash)
    }

    pub fn set_internal_transaction_hash(&mut self, hash: TxHash) -> Result<(), FactError> {
        self.internal_transaction_hash
            .observe("internalTransactionHash", hash)
    }

    pub fn set_identifier(&mut self, identifier: RequestId) -> Result<(), FactError> {
        self.identifier.observe("identifier", identifier)
    }

    pub fn set_block_number_on_target_chain(&mut self, block: u64) -> Result<(), FactError> {
        self.block_number_on_target_chain
            .observe("blockNumberOnTargetChain", block)
    }

    pub fn set_timestamp(&mut self, timestamp: i64) -> Result<(), FactError> {
        self.timestamp.observe("timestamp", timestamp)
    }
}

/// Token approval sent for this transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowanceInformation {
    #[serde(default, skip_serializing_if = "WriteOnce::is_unobserved")]
    internal_transaction_hash: WriteOnce<TxHash>,
    #[serde(default, skip_serializing_if = "WriteOnce::is_unobserved")]
    transaction_hash: WriteOnce<TxHash>,
}

impl AllowanceInformation {
    /// Created the moment the approval transaction has been sent.
    pub fn sent(internal_transaction_hash: TxHash) -> Self {
        Self {
            internal_transaction_hash: WriteOnce::Observed(internal_transaction_hash),
            transaction_hash: WriteOnce::Unobserved,
        }
    }

    pub fn internal_transaction_hash(&self) -> Option<&TxHash> {
        self.internal_transaction_hash.get()
    }

    pub fn transaction_hash(&self) -> Option<&TxHash> {
        self.transaction_hash.get()
    }

    pub fn set_transaction_hash(&mut self, hash: TxHash) -> Result<(), FactError> {
        self.transaction_hash.observe("allowanceTransactionHash", hash)
    }
}

/// Proof that a filler delivered funds on the target chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFulfillment {
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> RequestInformation {
        RequestInformation::new(Address::new("0xSender"))
    }

    #[test]
    fn test_write_once_observe() {
        let mut fact = WriteOnce::<u64>::Unobserved;
        assert!(fact.is_unobserved());
        fact.observe("n", 7).unwrap();
        assert_eq!(fact.get(), Some(&7));
        // Same value again is accepted
        fact.observe("n", 7).unwrap();
        assert_eq!(fact.observe("n", 8), Err(FactError::Overwrite("n")));
        assert_eq!(fact.get(), Some(&7));
    }

    #[test]
    fn test_request_information_rejects_overwrites() {
        let mut info = info();
        info.set_identifier(RequestId::from("1")).unwrap();
        info.set_transaction_hash(TxHash::from("0xaa")).unwrap();
        info.set_internal_transaction_hash(TxHash::from("0xbb")).unwrap();

        assert_eq!(
            info.set_identifier(RequestId::from("2")),
            Err(FactError::Overwrite("identifier"))
        );
        assert_eq!(
            info.set_transaction_hash(TxHash::from("0xcc")),
            Err(FactError::Overwrite("transactionHash"))
        );
        assert_eq!(
            info.set_internal_transaction_hash(TxHash::from("0xdd")),
            Err(FactError::Overwrite("internalTransactionHash"))
        );

        assert_eq!(info.identifier(), Some(&RequestId::from("1")));
        assert_eq!(info.transaction_hash(), Some(&TxHash::from("0xaa")));
        assert_eq!(info.internal_transaction_hash(), Some(&TxHash::from("0xbb")));
    }

    #[test]
    fn test_unobserved_fields_are_omitted() {
        let mut info = info();
        info.set_block_number_on_target_chain(42).unwrap();

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["requestAccount"], "0xsender");
        assert_eq!(json["blockNumberOnTargetChain"], 42);
        assert!(json.get("identifier").is_none());
        assert!(json.get("transactionHash").is_none());

        let back: RequestInformation = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_allowance_information_sent() {
        let mut allowance = AllowanceInformation::sent(TxHash::from("0x01"));
        assert_eq!(allowance.internal_transaction_hash(), Some(&TxHash::from("0x01")));
        assert!(allowance.transaction_hash().is_none());

        allowance.set_transaction_hash(TxHash::from("0x02")).unwrap();
        assert!(allowance.set_transaction_hash(TxHash::from("0x03")).is_err());
    }
}
