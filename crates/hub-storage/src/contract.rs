//! The storage contract every engine depends on (SPEC_FULL.md §4.2).
//! Object-safe and `Send + Sync` so engines hold a `dyn StorageContract`
//! and never know `sled` exists. This workspace ships exactly one
//! implementation, [`crate::sled_store::SledStorage`].

use async_trait::async_trait;
use hub_core::error::HubError;
use hub_core::model::{
    Debt, Equivalent, Event, IntegrityCheckpoint, IntegrityReport, Participant, PrepareLock,
    Transaction, TrustLine,
};
use hub_core::types::{Amount, EquivalentCode, Pid, Timestamp, TxId};
use std::collections::BTreeSet;

/// Sparse update to an existing trust line's mutable fields — mirrors
/// `hub_core::envelope::TrustLineUpdatePayload`'s optional fields, kept
/// as its own type so the storage contract doesn't depend on the
/// envelope's wire shape (the same separation `PrepareEdgeRequest` keeps
/// from `PaymentRequestPayload`).
#[derive(Debug, Clone, Default)]
pub struct TrustLineUpdate {
    pub limit: Option<Amount>,
    pub auto_clearing: Option<bool>,
    pub can_be_intermediate: Option<bool>,
    pub blocked: Option<BTreeSet<Pid>>,
    pub daily_limit: Option<Amount>,
}

/// One edge's requested debt increase, supplied to `prepare_edges`.
/// `participant` is the account the reservation is attributed to for
/// consent/accounting purposes — the debtor of the edge, whose
/// obligation is about to grow.
#[derive(Debug, Clone)]
pub struct PrepareEdgeRequest {
    pub participant: Pid,
    pub debtor: Pid,
    pub creditor: Pid,
    pub delta: Amount,
}

#[async_trait]
pub trait StorageContract: Send + Sync {
    // ── Participants ─────────────────────────────────────────────────
    async fn get_participant(&self, pid: &Pid) -> Result<Option<Participant>, HubError>;
    async fn put_participant(&self, participant: &Participant) -> Result<(), HubError>;

    // ── Equivalents ──────────────────────────────────────────────────
    async fn get_equivalent(&self, code: &EquivalentCode) -> Result<Option<Equivalent>, HubError>;
    async fn put_equivalent(&self, equivalent: &Equivalent) -> Result<(), HubError>;
    async fn list_equivalents(&self) -> Result<Vec<Equivalent>, HubError>;

    // ── Trust lines ──────────────────────────────────────────────────
    async fn get_trust_line(
        &self,
        equivalent: &EquivalentCode,
        from: &Pid,
        to: &Pid,
    ) -> Result<Option<TrustLine>, HubError>;
    async fn put_trust_line(&self, line: &TrustLine) -> Result<(), HubError>;
    async fn list_trust_lines(&self, equivalent: &EquivalentCode) -> Result<Vec<TrustLine>, HubError>;

    /// Create a new active trust line, locking `(from,to,equivalent)`
    /// first. Fails with `TrustLineExists` if that directed pair already
    /// has an active line — SPEC_FULL.md §3's "at most one active line
    /// per ordered triple" invariant. A pair whose only row is `Closed`
    /// may be recreated.
    async fn create_trust_line(&self, line: TrustLine) -> Result<(), HubError>;

    /// Apply `patch` to the active line `(from,to,equivalent)` under the
    /// same row lock. A lowered `limit` that would fall below the
    /// dependent debt `debt[to,from,equivalent]` is rejected with
    /// `TrustLimitExceeded` and the row is left untouched (SPEC_FULL.md
    /// §3's "limit update must not violate existing debt").
    async fn update_trust_line(
        &self,
        equivalent: &EquivalentCode,
        from: &Pid,
        to: &Pid,
        patch: TrustLineUpdate,
    ) -> Result<TrustLine, HubError>;

    /// Close the active line `(from,to,equivalent)`. Fails with
    /// `TrustLineHasDebt` if `debt[to,from,equivalent] > 0` (SPEC_FULL.md
    /// §3's "close only when the dependent debt is zero").
    async fn close_trust_line(
        &self,
        equivalent: &EquivalentCode,
        from: &Pid,
        to: &Pid,
    ) -> Result<TrustLine, HubError>;

    // ── Debts (read-only access; mutation only through the 2PC/clearing
    //    entry points below, which own lock acquisition) ──────────────
    async fn get_debt(
        &self,
        equivalent: &EquivalentCode,
        debtor: &Pid,
        creditor: &Pid,
    ) -> Result<Option<Debt>, HubError>;
    async fn list_debts(&self, equivalent: &EquivalentCode) -> Result<Vec<Debt>, HubError>;

    // ── Two-phase commit over edges (SPEC_FULL.md §4.5) ──────────────
    /// Acquire row locks on every `(debtor,creditor)` pair in `edges`
    /// (sorted, deterministic order), verify the trust-limit/policy
    /// checks for each, and insert one `PrepareLock` per edge. Either
    /// every edge's lock is created or none are (checks run before any
    /// write).
    async fn prepare_edges(
        &self,
        tx_id: TxId,
        equivalent: EquivalentCode,
        edges: Vec<PrepareEdgeRequest>,
        expires_at: Timestamp,
    ) -> Result<Vec<PrepareLock>, HubError>;

    /// Apply every `PrepareLock` delta held for `tx_id` to the debt rows
    /// (netting opposite-direction debt first), delete the locks, and
    /// return the resulting debt rows. Idempotent: a `tx_id` with no
    /// remaining locks is a no-op returning `Ok(vec![])`.
    async fn commit_prepared(&self, tx_id: &TxId) -> Result<Vec<Debt>, HubError>;

    /// Delete every `PrepareLock` held for `tx_id` without mutating any
    /// debt row. Idempotent.
    async fn abort_prepared(&self, tx_id: &TxId) -> Result<(), HubError>;

    async fn list_prepare_locks_for_tx(&self, tx_id: &TxId) -> Result<Vec<PrepareLock>, HubError>;

    /// Sum of all live `PrepareLock` deltas reserved against edge
    /// `(debtor,creditor,equivalent)`, excluding `exclude_tx` if given
    /// (so a retry of the same `tx_id` doesn't double-count its own
    /// reservation).
    async fn reserved_amount(
        &self,
        equivalent: &EquivalentCode,
        debtor: &Pid,
        creditor: &Pid,
        exclude_tx: Option<&TxId>,
    ) -> Result<Amount, HubError>;

    /// Return (and remove) every `PrepareLock` whose `expires_at` is at
    /// or before `now`.
    async fn sweep_expired_prepare_locks(&self, now: Timestamp) -> Result<Vec<PrepareLock>, HubError>;

    /// Directly adjust one edge outside the 2PC protocol. The only
    /// caller is the admin-authorized `COMPENSATION` path (open question
    /// (c), SPEC_FULL.md §9) — never routed payments.
    async fn apply_direct_delta(
        &self,
        equivalent: &EquivalentCode,
        debtor: &Pid,
        creditor: &Pid,
        delta: Amount,
    ) -> Result<Debt, HubError>;

    // ── Clearing (SPEC_FULL.md §4.6) ─────────────────────────────────
    /// Within one locked, serializable operation: decrement every edge
    /// of `cycle` by `amount`, deleting rows that hit zero, after
    /// verifying every participant's net position is unchanged.
    async fn apply_clearing_cycle(
        &self,
        equivalent: &EquivalentCode,
        cycle: &[Pid],
        amount: Amount,
    ) -> Result<(), HubError>;

    // ── Transactions ─────────────────────────────────────────────────
    async fn get_transaction(&self, tx_id: &TxId) -> Result<Option<Transaction>, HubError>;
    async fn put_transaction(&self, tx: &Transaction) -> Result<(), HubError>;

    // ── Idempotency keys ─────────────────────────────────────────────
    /// Returns `(tx_id, payload_hash)` recorded for `key`, if any.
    async fn find_idempotency(&self, key: &str) -> Result<Option<(TxId, [u8; 32])>, HubError>;
    async fn record_idempotency(
        &self,
        key: &str,
        tx_id: TxId,
        payload_hash: [u8; 32],
    ) -> Result<(), HubError>;

    // ── Events / audit log ───────────────────────────────────────────
    async fn append_event(&self, event: &Event) -> Result<(), HubError>;
    async fn list_recent_events(&self, limit: usize) -> Result<Vec<Event>, HubError>;

    // ── Integrity ─────────────────────────────────────────────────────
    async fn is_integrity_locked(&self, equivalent: &EquivalentCode) -> Result<bool, HubError>;
    async fn set_integrity_locked(&self, equivalent: &EquivalentCode, locked: bool) -> Result<(), HubError>;
    async fn put_checkpoint(&self, checkpoint: &IntegrityCheckpoint) -> Result<(), HubError>;
    async fn latest_checkpoint(
        &self,
        equivalent: &EquivalentCode,
    ) -> Result<Option<IntegrityCheckpoint>, HubError>;
    async fn record_violation(&self, report: &IntegrityReport) -> Result<(), HubError>;
    async fn list_violations(&self, equivalent: &EquivalentCode) -> Result<Vec<IntegrityReport>, HubError>;
}
