//! Core identifier and scalar types shared by every hub crate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Monetary/credit amount. Exact base-10 arithmetic, never floating point.
pub type Amount = rust_decimal::Decimal;

/// Wall-clock timestamp, UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Participant identifier: base58(SHA-256(ed25519 public key)).
///
/// Derivation is one-way; there is no `from_public_key` round trip back to
/// the key, only forward derivation and opaque (de)serialization of the
/// digest itself.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid([u8; 32]);

impl Pid {
    pub fn from_public_key_bytes(pubkey: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(pubkey);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Pid(out)
    }

    pub fn to_b58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    pub fn from_b58(s: &str) -> Result<Self, Bs58DecodeError> {
        let bytes = bs58::decode(s).into_vec().map_err(|_| Bs58DecodeError)?;
        if bytes.len() != 32 {
            return Err(Bs58DecodeError);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Pid(out))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

#[derive(Debug)]
pub struct Bs58DecodeError;

impl fmt::Display for Bs58DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid base58 participant identifier")
    }
}

impl std::error::Error for Bs58DecodeError {}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.to_b58())
    }
}

impl FromStr for Pid {
    type Err = Bs58DecodeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pid::from_b58(s)
    }
}

/// Transaction identifier. UUID rather than a content hash: transactions
/// here have no DAG-parent chain to address by digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(uuid::Uuid);

impl TxId {
    pub fn new_v4() -> Self {
        TxId(uuid::Uuid::new_v4())
    }

    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }

    pub fn from_hex(s: &str) -> Result<Self, uuid::Error> {
        Ok(TxId(uuid::Uuid::parse_str(s)?))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.0)
    }
}

/// Unique id for an audit/event record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(uuid::Uuid);

impl EventId {
    pub fn new_v4() -> Self {
        EventId(uuid::Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

/// Equivalent code: 1–16 chars, `[A-Z0-9_]`, unique across the hub.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EquivalentCode(String);

impl EquivalentCode {
    pub fn parse(s: &str) -> Result<Self, EquivalentCodeError> {
        if s.is_empty() || s.len() > 16 {
            return Err(EquivalentCodeError::BadLength);
        }
        if !s.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_') {
            return Err(EquivalentCodeError::BadChars);
        }
        Ok(EquivalentCode(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
pub enum EquivalentCodeError {
    BadLength,
    BadChars,
}

impl fmt::Display for EquivalentCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EquivalentCodeError::BadLength => write!(f, "equivalent code must be 1-16 characters"),
            EquivalentCodeError::BadChars => write!(f, "equivalent code must match [A-Z0-9_]"),
        }
    }
}

impl std::error::Error for EquivalentCodeError {}

impl fmt::Display for EquivalentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for EquivalentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a participant account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Suspended,
    Left,
    Deleted,
}

/// Kind of equivalent (unit of account).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquivalentKind {
    Fiat,
    Time,
    Commodity,
    Custom,
}

/// Lifecycle status of a trust line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLineStatus {
    Active,
    Frozen,
    Closed,
}
