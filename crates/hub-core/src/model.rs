//! Entity types for the data model: participants, equivalents, trust
//! lines, debts, transactions, prepare-locks and integrity checkpoints.

use crate::types::{
    Amount, EquivalentCode, EquivalentKind, ParticipantStatus, Pid, Timestamp, TrustLineStatus,
    TxId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub pid: Pid,
    pub public_key: [u8; 32],
    pub status: ParticipantStatus,
    pub verification_level: u8,
    pub profile: serde_json::Value,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Equivalent {
    pub code: EquivalentCode,
    pub precision: u8,
    pub kind: EquivalentKind,
    pub active: bool,
    pub created_at: Timestamp,
}

/// Per-line policy. `daily_limit` is stored and serialized but never
/// enforced by any engine (see open question (b) in SPEC_FULL.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustLinePolicy {
    #[serde(default = "default_true")]
    pub auto_clearing: bool,
    #[serde(default = "default_true")]
    pub can_be_intermediate: bool,
    #[serde(default)]
    pub blocked: BTreeSet<Pid>,
    #[serde(default)]
    pub daily_limit: Option<Amount>,
}

fn default_true() -> bool {
    true
}

impl Default for TrustLinePolicy {
    fn default() -> Self {
        TrustLinePolicy {
            auto_clearing: true,
            can_be_intermediate: true,
            blocked: BTreeSet::new(),
            daily_limit: None,
        }
    }
}

/// Directed credit ceiling: `from` extends up to `limit` of credit to `to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustLine {
    pub from: Pid,
    pub to: Pid,
    pub equivalent: EquivalentCode,
    pub limit: Amount,
    pub policy: TrustLinePolicy,
    pub status: TrustLineStatus,
    pub updated_at: Timestamp,
}

impl TrustLine {
    pub fn key(&self) -> (Pid, Pid, EquivalentCode) {
        (self.from, self.to, self.equivalent.clone())
    }
}

/// Obligation from `debtor` to `creditor`. Rows with `amount == 0` do not
/// exist; they are deleted by whichever operation brought them to zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debt {
    pub debtor: Pid,
    pub creditor: Pid,
    pub equivalent: EquivalentCode,
    pub amount: Amount,
    pub updated_at: Timestamp,
}

impl Debt {
    pub fn key(&self) -> (Pid, Pid, EquivalentCode) {
        (self.debtor, self.creditor, self.equivalent.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    TrustLineCreate,
    TrustLineUpdate,
    TrustLineClose,
    Payment,
    Clearing,
    Compensation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    New,
    Routed,
    Preparing,
    Prepared,
    Committed,
    Aborted,
    Proposed,
    Waiting,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: TxId,
    pub tx_type: TransactionType,
    pub initiator: Pid,
    pub payload: serde_json::Value,
    pub signatures: Vec<crate::envelope::DetachedSignature>,
    pub state: TransactionState,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Reservation created during PREPARE; the delta is applied on COMMIT and
/// discarded on ABORT or expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareLock {
    pub tx_id: TxId,
    pub participant: Pid,
    pub debtor: Pid,
    pub creditor: Pid,
    pub equivalent: EquivalentCode,
    pub delta: Amount,
    pub expires_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityCheckpoint {
    pub equivalent: EquivalentCode,
    pub checksum: String,
    pub total_debt: Amount,
    pub debt_row_count: u64,
    pub taken_at: Timestamp,
}

/// Append-only domain event (SPEC_FULL.md §4.8). Written in the same
/// storage transaction as the mutation that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: crate::types::EventId,
    pub event_type: EventType,
    pub timestamp: Timestamp,
    pub run_id: Option<String>,
    pub scenario_id: Option<String>,
    pub request_id: String,
    pub tx_id: Option<TxId>,
    pub actor: Pid,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ParticipantCreated,
    ParticipantFrozen,
    ParticipantUnfrozen,
    TrustlineCreated,
    TrustlineUpdated,
    TrustlineClosed,
    PaymentCommitted,
    PaymentAborted,
    PaymentInconsistencyCandidate,
    ClearingExecuted,
    ClearingSkipped,
    IntegrityViolation,
    ConfigChanged,
}

impl EventType {
    /// Stable dotted wire name, e.g. `payment.committed`.
    pub fn wire_name(&self) -> &'static str {
        match self {
            EventType::ParticipantCreated => "participant.created",
            EventType::ParticipantFrozen => "participant.frozen",
            EventType::ParticipantUnfrozen => "participant.unfrozen",
            EventType::TrustlineCreated => "trustline.created",
            EventType::TrustlineUpdated => "trustline.updated",
            EventType::TrustlineClosed => "trustline.closed",
            EventType::PaymentCommitted => "payment.committed",
            EventType::PaymentAborted => "payment.aborted",
            EventType::PaymentInconsistencyCandidate => "payment.inconsistency_candidate",
            EventType::ClearingExecuted => "clearing.executed",
            EventType::ClearingSkipped => "clearing.skipped",
            EventType::IntegrityViolation => "integrity.violation",
            EventType::ConfigChanged => "config.changed",
        }
    }
}

/// Severity of a recorded integrity violation (SPEC_FULL.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegritySeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityViolation {
    pub equivalent: EquivalentCode,
    pub severity: IntegritySeverity,
    pub check: String,
    pub message: String,
    pub detected_at: Timestamp,
}

/// Operator-facing detail captured alongside an `IntegrityViolation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub violation: IntegrityViolation,
    pub offending_rows: serde_json::Value,
}
