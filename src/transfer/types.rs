//! Transfer Core Types
//!
//! Identifiers, amounts and chain descriptions shared by the transfer FSM.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::action::Step;

/// Transfer ID - ULID-based local identifier
///
/// Assigned when the transfer is created and persisted with it. Unrelated to
/// the protocol-assigned [`RequestId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// EVM account or contract address, normalised to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl From<&str> for TxHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Protocol-assigned request identifier on the source chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// EIP-155 chain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chain endpoint together with the protocol contracts deployed on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub identifier: ChainId,
    pub name: String,
    pub rpc_url: String,
    /// Request registry (source side)
    pub request_manager: Address,
    /// Fulfillment contract (target side)
    pub fill_manager: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// Token plus raw integer amount (base units).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub token: Token,
    #[serde(with = "decimal_string")]
    pub amount: BigUint,
}

impl TokenAmount {
    pub fn new(token: Token, amount: impl Into<BigUint>) -> Self {
        Self {
            token,
            amount: amount.into(),
        }
    }
}

/// Largest value of a 256-bit unsigned integer, used for infinite approvals.
pub fn max_uint256() -> BigUint {
    (BigUint::from(1u8) << 256u32) - 1u8
}

/// Serialises a [`BigUint`] as a base-10 string.
pub(crate) mod decimal_string {
    use std::str::FromStr;

    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        BigUint::from_str(&s).map_err(de::Error::custom)
    }
}

/// Who the allowance is granted to and who submits the request.
///
/// Subsidized transfers route both through a fee-subsidy contract instead of
/// the request registry; the step sequence is identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferKind {
    Standard,
    #[serde(rename_all = "camelCase")]
    Subsidized { fee_sub_address: Address },
}

impl TransferKind {
    pub fn allowance_spender<'a>(&'a self, source: &'a ChainInfo) -> &'a Address {
        match self {
            TransferKind::Standard => &source.request_manager,
            TransferKind::Subsidized { fee_sub_address } => fee_sub_address,
        }
    }

    /// Contract the request transaction is sent to.
    pub fn request_beneficiary<'a>(&'a self, source: &'a ChainInfo) -> &'a Address {
        match self {
            TransferKind::Standard => &source.request_manager,
            TransferKind::Subsidized { fee_sub_address } => fee_sub_address,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Standard => "standard",
            TransferKind::Subsidized { .. } => "subsidized",
        }
    }
}

/// Transfer protocol steps.
///
/// Identifiers are persisted and must never be renamed or removed; new steps
/// are only ever appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStep {
    EnsureTokenAllowance,
    SendRequestTransaction,
    WaitForRequestEvent,
    WaitForFulfillment,
}

impl TransferStep {
    pub const ALL: [TransferStep; 4] = [
        TransferStep::EnsureTokenAllowance,
        TransferStep::SendRequestTransaction,
        TransferStep::WaitForRequestEvent,
        TransferStep::WaitForFulfillment,
    ];

    pub fn identifier(&self) -> &'static str {
        match self {
            TransferStep::EnsureTokenAllowance => "ensureTokenAllowance",
            TransferStep::SendRequestTransaction => "sendRequestTransaction",
            TransferStep::WaitForRequestEvent => "waitForRequestEvent",
            TransferStep::WaitForFulfillment => "waitForFulfillment",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransferStep::EnsureTokenAllowance => "Ensure Token Allowance",
            TransferStep::SendRequestTransaction => "Please confirm the transaction",
            TransferStep::WaitForRequestEvent => "Waiting for Request Confirmation",
            TransferStep::WaitForFulfillment => "Waiting for Fulfillment",
        }
    }

    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.identifier() == identifier)
    }

    /// Fresh step list for a new transfer.
    pub fn canonical_steps() -> Vec<Step> {
        Self::ALL
            .iter()
            .map(|s| Step::new(s.identifier(), s.label()))
            .collect()
    }
}

impl fmt::Display for TransferStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> ChainInfo {
        ChainInfo {
            identifier: ChainId(10),
            name: "Optimism".into(),
            rpc_url: "http://localhost:8545".into(),
            request_manager: Address::new("0xRequestManager"),
            fill_manager: Address::new("0xFillManager"),
        }
    }

    #[test]
    fn test_address_is_case_insensitive() {
        assert_eq!(Address::new("0xABCdef"), Address::new("0xabcDEF"));
        let json = serde_json::to_string(&Address::new("0xABC")).unwrap();
        assert_eq!(json, "\"0xabc\"");
        let back: Address = serde_json::from_str("\"0xAbC\"").unwrap();
        assert_eq!(back, Address::new("0xabc"));
    }

    #[test]
    fn test_step_identifiers_roundtrip() {
        for step in TransferStep::ALL {
            assert_eq!(TransferStep::from_identifier(step.identifier()), Some(step));
        }
        assert_eq!(TransferStep::from_identifier("retiredStep"), None);
    }

    #[test]
    fn test_canonical_steps_order() {
        let steps = TransferStep::canonical_steps();
        let ids: Vec<&str> = steps.iter().map(|s| s.identifier()).collect();
        assert_eq!(
            ids,
            vec![
                "ensureTokenAllowance",
                "sendRequestTransaction",
                "waitForRequestEvent",
                "waitForFulfillment"
            ]
        );
    }

    #[test]
    fn test_spend_targets() {
        let source = chain();
        let standard = TransferKind::Standard;
        assert_eq!(standard.allowance_spender(&source), &source.request_manager);
        assert_eq!(standard.request_beneficiary(&source), &source.request_manager);

        let fee_sub = Address::new("0xFeeSub");
        let subsidized = TransferKind::Subsidized {
            fee_sub_address: fee_sub.clone(),
        };
        assert_eq!(subsidized.allowance_spender(&source), &fee_sub);
        assert_eq!(subsidized.request_beneficiary(&source), &fee_sub);
    }

    #[test]
    fn test_amount_serialises_as_decimal_string() {
        let token = Token {
            address: Address::new("0xToken"),
            symbol: "USDC".into(),
            decimals: 6,
        };
        let amount = TokenAmount::new(token, max_uint256());
        let json = serde_json::to_value(&amount).unwrap();
        assert_eq!(
            json["amount"],
            "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        );
        let back: TokenAmount = serde_json::from_value(json).unwrap();
        assert_eq!(back, amount);
    }
}
