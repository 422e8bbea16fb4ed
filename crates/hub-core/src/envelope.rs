//! The transport-agnostic signed message envelope (SPEC_FULL.md §6).
//!
//! Nothing in this workspace opens a socket; this module only defines the
//! shape of what a transport crate hands the engines and what the engines
//! hand back. Canonical JSON encoding and signature verification live in
//! `hub-crypto`, which depends on these types rather than the reverse.

use crate::types::{Amount, EquivalentCode, Pid, Timestamp, TxId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A detached Ed25519 signature plus the public key it verifies against.
///
/// Carried on `Transaction` (possibly more than one signer, e.g. admin
/// `COMPENSATION`) and on the envelope itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachedSignature {
    pub public_key: [u8; 32],
    pub signature: [u8; 64],
}

/// Message types the core consumes from, and emits to, a transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    // ── Consumed ──────────────────────────────────────────────────────
    TrustLineCreate,
    TrustLineUpdate,
    TrustLineClose,
    PaymentRequest,
    PaymentPrepareAck,
    ClearingAccept,
    ClearingReject,
    Ping,
    // ── Emitted ───────────────────────────────────────────────────────
    PaymentPrepare,
    PaymentCommit,
    PaymentAbort,
    ClearingPropose,
    Pong,
    Error,
}

/// `{ msg_id, msg_type, tx_id|null, from, to|null, payload, signature }`.
///
/// `signature = Ed25519_sign(canonical_json(payload))` — the envelope's own
/// `signature` field is never part of what gets signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_id: Uuid,
    pub msg_type: MessageType,
    pub tx_id: Option<TxId>,
    pub from: Pid,
    pub to: Option<Pid>,
    pub payload: serde_json::Value,
    pub signature: DetachedSignature,
}

/// Correlation identifiers propagated verbatim from the ingress request
/// through every cascading event (SPEC_FULL.md §6, §4.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationIds {
    pub run_id: Option<String>,
    pub scenario_id: Option<String>,
    pub request_id: String,
}

// ── Request payloads ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustLineCreatePayload {
    pub from: Pid,
    pub to: Pid,
    pub equivalent: EquivalentCode,
    pub limit: Amount,
    #[serde(default)]
    pub auto_clearing: bool,
    #[serde(default)]
    pub can_be_intermediate: bool,
    #[serde(default)]
    pub blocked: BTreeSet<Pid>,
    #[serde(default)]
    pub daily_limit: Option<Amount>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustLineUpdatePayload {
    pub from: Pid,
    pub to: Pid,
    pub equivalent: EquivalentCode,
    pub limit: Option<Amount>,
    pub auto_clearing: Option<bool>,
    pub can_be_intermediate: Option<bool>,
    pub blocked: Option<BTreeSet<Pid>>,
    pub daily_limit: Option<Amount>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustLineClosePayload {
    pub from: Pid,
    pub to: Pid,
    pub equivalent: EquivalentCode,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentConstraints {
    pub max_hops: Option<u8>,
    pub max_paths: Option<u8>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub avoid: BTreeSet<Pid>,
    /// Opt into Edmonds-Karp max-flow routing (SPEC_FULL.md §4.4 step 4).
    #[serde(default)]
    pub large_payment_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequestPayload {
    pub from: Pid,
    pub to: Pid,
    pub equivalent: EquivalentCode,
    pub amount: Amount,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub constraints: PaymentConstraints,
    /// Caller-supplied idempotency key (SPEC_FULL.md §4.5).
    pub idempotency_key: Option<String>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearingAcceptPayload {
    pub tx_id: TxId,
    pub participant: Pid,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearingRejectPayload {
    pub tx_id: TxId,
    pub participant: Pid,
    pub reason: Option<String>,
    pub timestamp: Timestamp,
}

// ── Caller-facing error shape (SPEC_FULL.md §7) ─────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    pub details: serde_json::Value,
}

impl From<&crate::error::HubError> for ErrorPayload {
    fn from(err: &crate::error::HubError) -> Self {
        ErrorPayload {
            code: err.code(),
            message: err.to_string(),
            details: serde_json::Value::Null,
        }
    }
}
