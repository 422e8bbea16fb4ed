use crate::types::{Amount, Pid};
use thiserror::Error;

/// Stable error taxonomy surfaced across every engine boundary.
///
/// Variants are grouped by subsystem; the `details` carried on each one
/// is what callers are expected to render, not a debug aid.
#[derive(Debug, Error)]
pub enum HubError {
    // ── Identity / signature errors ─────────────────────────────────────
    #[error("invalid signature")]
    InvalidSignature,

    #[error("request expired: timestamp drift {drift_seconds}s exceeds allowed {max_seconds}s")]
    ExpiredRequest { drift_seconds: i64, max_seconds: i64 },

    #[error("participant {0} is not authorized for this operation")]
    Unauthorized(Pid),

    #[error("malformed participant identifier")]
    BadPid,

    // ── Validation errors ────────────────────────────────────────────────
    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("unknown equivalent {0}")]
    UnknownEquivalent(String),

    #[error("unknown participant {0}")]
    UnknownParticipant(Pid),

    // ── Trust-line errors ────────────────────────────────────────────────
    #[error("trust line {from} -> {to} is not active")]
    TrustLineNotActive { from: Pid, to: Pid },

    #[error("trust line {from} -> {to} already exists")]
    TrustLineExists { from: Pid, to: Pid },

    #[error("cannot close trust line {from} -> {to}: outstanding debt {amount}")]
    TrustLineHasDebt { from: Pid, to: Pid, amount: Amount },

    #[error("trust limit exceeded: requested {requested}, limit {limit}")]
    TrustLimitExceeded { requested: Amount, limit: Amount },

    // ── Routing errors ───────────────────────────────────────────────────
    #[error("no route found from {from} to {to}")]
    RouteNotFound { from: Pid, to: Pid },

    #[error("insufficient capacity: requested {requested}, available {available}")]
    InsufficientCapacity { requested: Amount, available: Amount },

    #[error("routing exceeded timeout")]
    RoutingTimeout,

    // ── Payment / 2PC errors ─────────────────────────────────────────────
    #[error("operation timed out during {stage}")]
    OperationTimeout { stage: &'static str },

    #[error("state conflict: transaction is in state {state}, expected {expected}")]
    StateConflict { state: String, expected: String },

    #[error("idempotency conflict: tx_id already used with a different payload")]
    Conflict,

    // ── Clearing errors ──────────────────────────────────────────────────
    #[error("clearing cycle rejected by {0}")]
    ClearingRejected(Pid),

    #[error("clearing amount {amount} below minimum {minimum}")]
    ClearingBelowMinimum { amount: Amount, minimum: Amount },

    // ── Integrity errors ─────────────────────────────────────────────────
    #[error("equivalent {0} is integrity-locked")]
    IntegrityLocked(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    // ── Storage / internal errors ────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl HubError {
    /// Stable machine-readable code for the error taxonomy (§6).
    pub fn code(&self) -> &'static str {
        match self {
            HubError::InvalidSignature => "InvalidSignature",
            HubError::ExpiredRequest { .. } => "ExpiredRequest",
            HubError::Unauthorized(_) => "Unauthorized",
            HubError::BadPid => "ValidationError",
            HubError::ValidationError(_) => "ValidationError",
            HubError::UnknownEquivalent(_) => "ValidationError",
            HubError::UnknownParticipant(_) => "ValidationError",
            HubError::TrustLineNotActive { .. } => "TrustLineNotActive",
            HubError::TrustLineExists { .. } => "ValidationError",
            HubError::TrustLineHasDebt { .. } => "ValidationError",
            HubError::TrustLimitExceeded { .. } => "TrustLimitExceeded",
            HubError::RouteNotFound { .. } => "RouteNotFound",
            HubError::InsufficientCapacity { .. } => "InsufficientCapacity",
            HubError::RoutingTimeout => "OperationTimeout",
            HubError::OperationTimeout { .. } => "OperationTimeout",
            HubError::StateConflict { .. } => "StateConflict",
            HubError::Conflict => "Conflict",
            HubError::ClearingRejected(_) => "StateConflict",
            HubError::ClearingBelowMinimum { .. } => "ValidationError",
            HubError::IntegrityLocked(_) => "IntegrityLocked",
            HubError::IntegrityViolation(_) => "InternalError",
            HubError::Storage(_) => "InternalError",
            HubError::InternalError(_) => "InternalError",
        }
    }
}
