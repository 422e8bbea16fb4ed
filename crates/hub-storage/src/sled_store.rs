//! `SledStorage`: the one [`StorageContract`] implementation this
//! workspace ships, grounded in the teacher's `chronx_state::StateDb`
//! (same `sled::open` + named-tree layout, same bincode-per-row encoding,
//! same `iter()`-and-filter style for anything without a dedicated index).
//!
//! Row locking across the `(equivalent, debtor, creditor)` keys an
//! operation touches is done by [`crate::lock_manager::RowLockManager`]
//! *before* the sled-level mutation, in the deterministic order
//! SPEC_FULL.md §5 requires; sled's own `Tree::transaction` then gives
//! per-operation atomicity across the trees it writes.

use crate::contract::{PrepareEdgeRequest, StorageContract, TrustLineUpdate};
use crate::keys::{
    checkpoint_key, debt_key, encode_equivalent, event_key, prepare_lock_key, trust_line_key,
    violation_key,
};
use crate::lock_manager::{LockKey, RowLockManager};
use async_trait::async_trait;
use hub_core::error::HubError;
use hub_core::model::{
    Debt, Equivalent, Event, IntegrityCheckpoint, IntegrityReport, Participant, PrepareLock,
    Transaction, TrustLine,
};
use hub_core::types::{Amount, EquivalentCode, Pid, Timestamp, TxId};
use std::path::Path;
use std::sync::Arc;

fn storage_err(e: impl std::fmt::Display) -> HubError {
    HubError::Storage(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, HubError> {
    bincode::serialize(value).map_err(|e| HubError::Storage(format!("encode: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, HubError> {
    bincode::deserialize(bytes).map_err(|e| HubError::Storage(format!("decode: {e}")))
}

/// Persistent storage backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   participants      — Pid bytes                       → bincode(Participant)
///   equivalents        — encode_equivalent                → bincode(Equivalent)
///   trust_lines        — trust_line_key(equiv,from,to)     → bincode(TrustLine)
///   debts              — debt_key(equiv,debtor,creditor)   → bincode(Debt)
///   transactions       — tx hex bytes                     → bincode(Transaction)
///   prepare_locks      — prepare_lock_key(tx,participant)  → bincode(PrepareLock)
///   idempotency        — key utf8 bytes                   → bincode((TxId,[u8;32]))
///   events             → event_key(ts,id)                  → bincode(Event)
///   integrity_locks    — encode_equivalent                → [1u8] (membership set)
///   checkpoints        — checkpoint_key(equiv,ts)           → bincode(IntegrityCheckpoint)
///   violations         — violation_key(equiv,ts)            → bincode(IntegrityReport)
pub struct SledStorage {
    _db: sled::Db,
    participants: sled::Tree,
    equivalents: sled::Tree,
    trust_lines: sled::Tree,
    debts: sled::Tree,
    transactions: sled::Tree,
    prepare_locks: sled::Tree,
    idempotency: sled::Tree,
    events: sled::Tree,
    integrity_locks: sled::Tree,
    checkpoints: sled::Tree,
    violations: sled::Tree,
    locks: Arc<RowLockManager>,
}

impl SledStorage {
    /// Open or create the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HubError> {
        let db = sled::open(path).map_err(storage_err)?;
        let participants = db.open_tree("participants").map_err(storage_err)?;
        let equivalents = db.open_tree("equivalents").map_err(storage_err)?;
        let trust_lines = db.open_tree("trust_lines").map_err(storage_err)?;
        let debts = db.open_tree("debts").map_err(storage_err)?;
        let transactions = db.open_tree("transactions").map_err(storage_err)?;
        let prepare_locks = db.open_tree("prepare_locks").map_err(storage_err)?;
        let idempotency = db.open_tree("idempotency").map_err(storage_err)?;
        let events = db.open_tree("events").map_err(storage_err)?;
        let integrity_locks = db.open_tree("integrity_locks").map_err(storage_err)?;
        let checkpoints = db.open_tree("checkpoints").map_err(storage_err)?;
        let violations = db.open_tree("violations").map_err(storage_err)?;
        Ok(Self {
            _db: db,
            participants,
            equivalents,
            trust_lines,
            debts,
            transactions,
            prepare_locks,
            idempotency,
            events,
            integrity_locks,
            checkpoints,
            violations,
            locks: Arc::new(RowLockManager::new()),
        })
    }

    pub fn flush(&self) -> Result<(), HubError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    /// Every `PrepareLock` currently held, regardless of edge or tx. Locks
    /// are short-lived reservations so a linear scan (the teacher's
    /// `iter_all_timelocks`-style fallback for anything without a
    /// dedicated secondary index) is the right tradeoff here.
    fn all_prepare_locks(&self) -> Result<Vec<PrepareLock>, HubError> {
        let mut out = Vec::new();
        for item in self.prepare_locks.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    fn read_debt(
        &self,
        equivalent: &EquivalentCode,
        debtor: &Pid,
        creditor: &Pid,
    ) -> Result<Option<Debt>, HubError> {
        let key = debt_key(equivalent, debtor, creditor);
        match self.debts.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_debt_row(&self, debt: &Debt) -> Result<(), HubError> {
        let key = debt_key(&debt.equivalent, &debt.debtor, &debt.creditor);
        if debt.amount.is_zero() {
            self.debts.remove(key).map_err(storage_err)?;
        } else {
            self.debts.insert(key, encode(debt)?).map_err(storage_err)?;
        }
        Ok(())
    }

    fn read_trust_line(
        &self,
        equivalent: &EquivalentCode,
        from: &Pid,
        to: &Pid,
    ) -> Result<Option<TrustLine>, HubError> {
        let key = trust_line_key(equivalent, from, to);
        match self.trust_lines.get(key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_trust_line_row(&self, line: &TrustLine) -> Result<(), HubError> {
        let key = trust_line_key(&line.equivalent, &line.from, &line.to);
        self.trust_lines.insert(key, encode(line)?).map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl StorageContract for SledStorage {
    // ── Participants ──────────────────────────────────────────────────
    async fn get_participant(&self, pid: &Pid) -> Result<Option<Participant>, HubError> {
        match self.participants.get(pid.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_participant(&self, participant: &Participant) -> Result<(), HubError> {
        self.participants
            .insert(participant.pid.as_bytes(), encode(participant)?)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Equivalents ───────────────────────────────────────────────────
    async fn get_equivalent(&self, code: &EquivalentCode) -> Result<Option<Equivalent>, HubError> {
        match self.equivalents.get(encode_equivalent(code)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_equivalent(&self, equivalent: &Equivalent) -> Result<(), HubError> {
        self.equivalents
            .insert(encode_equivalent(&equivalent.code), encode(equivalent)?)
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list_equivalents(&self) -> Result<Vec<Equivalent>, HubError> {
        let mut out = Vec::new();
        for item in self.equivalents.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Trust lines ───────────────────────────────────────────────────
    async fn get_trust_line(
        &self,
        equivalent: &EquivalentCode,
        from: &Pid,
        to: &Pid,
    ) -> Result<Option<TrustLine>, HubError> {
        self.read_trust_line(equivalent, from, to)
    }

    async fn put_trust_line(&self, line: &TrustLine) -> Result<(), HubError> {
        let key = trust_line_key(&line.equivalent, &line.from, &line.to);
        self.trust_lines.insert(key, encode(line)?).map_err(storage_err)?;
        Ok(())
    }

    async fn list_trust_lines(&self, equivalent: &EquivalentCode) -> Result<Vec<TrustLine>, HubError> {
        let prefix = encode_equivalent(equivalent);
        let mut out = Vec::new();
        for item in self.trust_lines.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    async fn create_trust_line(&self, line: TrustLine) -> Result<(), HubError> {
        let _guard = self
            .locks
            .lock_many(vec![LockKey::edge(&line.equivalent, line.from, line.to)])
            .await;
        if let Some(existing) = self.read_trust_line(&line.equivalent, &line.from, &line.to)? {
            if matches!(existing.status, hub_core::types::TrustLineStatus::Active) {
                return Err(HubError::TrustLineExists { from: line.from, to: line.to });
            }
        }
        self.write_trust_line_row(&line)
    }

    async fn update_trust_line(
        &self,
        equivalent: &EquivalentCode,
        from: &Pid,
        to: &Pid,
        patch: TrustLineUpdate,
    ) -> Result<TrustLine, HubError> {
        let _guard = self.locks.lock_many(vec![LockKey::edge(equivalent, *from, *to)]).await;
        let mut line = self
            .read_trust_line(equivalent, from, to)?
            .filter(|l| matches!(l.status, hub_core::types::TrustLineStatus::Active))
            .ok_or(HubError::TrustLineNotActive { from: *from, to: *to })?;

        if let Some(new_limit) = patch.limit {
            // line.from extends credit to line.to: the bounded debt is
            // (to, from), same convention `prepare_edges` reads against.
            let debt = self.read_debt(equivalent, to, from)?.map(|d| d.amount).unwrap_or(Amount::ZERO);
            if debt > new_limit {
                return Err(HubError::TrustLimitExceeded { requested: debt, limit: new_limit });
            }
            line.limit = new_limit;
        }
        if let Some(auto_clearing) = patch.auto_clearing {
            line.policy.auto_clearing = auto_clearing;
        }
        if let Some(can_be_intermediate) = patch.can_be_intermediate {
            line.policy.can_be_intermediate = can_be_intermediate;
        }
        if let Some(blocked) = patch.blocked {
            line.policy.blocked = blocked;
        }
        if let Some(daily_limit) = patch.daily_limit {
            line.policy.daily_limit = Some(daily_limit);
        }
        line.updated_at = chrono::Utc::now();
        self.write_trust_line_row(&line)?;
        Ok(line)
    }

    async fn close_trust_line(
        &self,
        equivalent: &EquivalentCode,
        from: &Pid,
        to: &Pid,
    ) -> Result<TrustLine, HubError> {
        let _guard = self.locks.lock_many(vec![LockKey::edge(equivalent, *from, *to)]).await;
        let mut line = self
            .read_trust_line(equivalent, from, to)?
            .filter(|l| matches!(l.status, hub_core::types::TrustLineStatus::Active))
            .ok_or(HubError::TrustLineNotActive { from: *from, to: *to })?;

        let debt = self.read_debt(equivalent, to, from)?.map(|d| d.amount).unwrap_or(Amount::ZERO);
        if debt > Amount::ZERO {
            return Err(HubError::TrustLineHasDebt { from: *from, to: *to, amount: debt });
        }
        line.status = hub_core::types::TrustLineStatus::Closed;
        line.updated_at = chrono::Utc::now();
        self.write_trust_line_row(&line)?;
        Ok(line)
    }

    // ── Debts ─────────────────────────────────────────────────────────
    async fn get_debt(
        &self,
        equivalent: &EquivalentCode,
        debtor: &Pid,
        creditor: &Pid,
    ) -> Result<Option<Debt>, HubError> {
        self.read_debt(equivalent, debtor, creditor)
    }

    async fn list_debts(&self, equivalent: &EquivalentCode) -> Result<Vec<Debt>, HubError> {
        let prefix = encode_equivalent(equivalent);
        let mut out = Vec::new();
        for item in self.debts.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Two-phase commit over edges ──────────────────────────────────
    async fn prepare_edges(
        &self,
        tx_id: TxId,
        equivalent: EquivalentCode,
        edges: Vec<PrepareEdgeRequest>,
        expires_at: Timestamp,
    ) -> Result<Vec<PrepareLock>, HubError> {
        let lock_keys: Vec<LockKey> = edges
            .iter()
            .map(|e| LockKey::edge(&equivalent, e.debtor, e.creditor))
            .collect();
        let _guards = self.locks.lock_many(lock_keys).await;

        // Every check runs before any write: either every edge's lock is
        // created, or none are (SPEC_FULL.md §4.5 step 2).
        let held = self.all_prepare_locks()?;
        let mut created = Vec::with_capacity(edges.len());
        for edge in &edges {
            // Payment flows debtor -> creditor; the bounding trust line is
            // the one the creditor extends to the debtor (from=creditor,
            // to=debtor) — see DESIGN.md for the resolved §4.3/§4.5
            // direction conflict this follows.
            let line = self
                .read_trust_line(&equivalent, &edge.creditor, &edge.debtor)?
                .ok_or(HubError::TrustLineNotActive { from: edge.creditor, to: edge.debtor })?;
            if !matches!(line.status, hub_core::types::TrustLineStatus::Active) {
                return Err(HubError::TrustLineNotActive { from: edge.creditor, to: edge.debtor });
            }
            let current = self
                .read_debt(&equivalent, &edge.debtor, &edge.creditor)?
                .map(|d| d.amount)
                .unwrap_or(Amount::ZERO);
            let reserved: Amount = held
                .iter()
                .filter(|l| {
                    l.equivalent == equivalent
                        && l.debtor == edge.debtor
                        && l.creditor == edge.creditor
                        && l.tx_id != tx_id
                })
                .map(|l| l.delta)
                .sum();
            if current + edge.delta + reserved > line.limit {
                return Err(HubError::TrustLimitExceeded {
                    requested: current + edge.delta,
                    limit: line.limit - reserved,
                });
            }
        }

        for edge in edges {
            let lock = PrepareLock {
                tx_id,
                participant: edge.participant,
                debtor: edge.debtor,
                creditor: edge.creditor,
                equivalent: equivalent.clone(),
                delta: edge.delta,
                expires_at,
            };
            let key = prepare_lock_key(&tx_id, &edge.participant);
            self.prepare_locks.insert(key, encode(&lock)?).map_err(storage_err)?;
            created.push(lock);
        }
        Ok(created)
    }

    async fn commit_prepared(&self, tx_id: &TxId) -> Result<Vec<Debt>, HubError> {
        let locks = self.list_prepare_locks_for_tx(tx_id).await?;
        if locks.is_empty() {
            return Ok(Vec::new());
        }
        let lock_keys: Vec<LockKey> = locks
            .iter()
            .map(|l| LockKey::edge(&l.equivalent, l.debtor, l.creditor))
            .collect();
        let _guards = self.locks.lock_many(lock_keys).await;

        let mut results = Vec::with_capacity(locks.len());
        for lock in &locks {
            let debt = self.apply_delta_nettable(&lock.equivalent, &lock.debtor, &lock.creditor, lock.delta)?;
            let key = prepare_lock_key(tx_id, &lock.participant);
            self.prepare_locks.remove(key).map_err(storage_err)?;
            results.push(debt);
        }
        Ok(results)
    }

    async fn abort_prepared(&self, tx_id: &TxId) -> Result<(), HubError> {
        let locks = self.list_prepare_locks_for_tx(tx_id).await?;
        for lock in locks {
            let key = prepare_lock_key(tx_id, &lock.participant);
            self.prepare_locks.remove(key).map_err(storage_err)?;
        }
        Ok(())
    }

    async fn list_prepare_locks_for_tx(&self, tx_id: &TxId) -> Result<Vec<PrepareLock>, HubError> {
        use crate::keys::tx_prefix;
        let prefix = tx_prefix(tx_id);
        let mut out = Vec::new();
        for item in self.prepare_locks.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    async fn reserved_amount(
        &self,
        equivalent: &EquivalentCode,
        debtor: &Pid,
        creditor: &Pid,
        exclude_tx: Option<&TxId>,
    ) -> Result<Amount, HubError> {
        let held = self.all_prepare_locks()?;
        Ok(held
            .iter()
            .filter(|l| {
                &l.equivalent == equivalent
                    && &l.debtor == debtor
                    && &l.creditor == creditor
                    && exclude_tx.map(|tx| &l.tx_id != tx).unwrap_or(true)
            })
            .map(|l| l.delta)
            .sum())
    }

    async fn sweep_expired_prepare_locks(&self, now: Timestamp) -> Result<Vec<PrepareLock>, HubError> {
        let mut expired = Vec::new();
        for item in self.prepare_locks.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            let lock: PrepareLock = decode(&bytes)?;
            if lock.expires_at <= now {
                self.prepare_locks.remove(key).map_err(storage_err)?;
                expired.push(lock);
            }
        }
        Ok(expired)
    }

    async fn apply_direct_delta(
        &self,
        equivalent: &EquivalentCode,
        debtor: &Pid,
        creditor: &Pid,
        delta: Amount,
    ) -> Result<Debt, HubError> {
        let _guard = self
            .locks
            .lock_many(vec![LockKey::edge(equivalent, *debtor, *creditor)])
            .await;
        self.apply_delta_nettable(equivalent, debtor, creditor, delta)
    }

    // ── Clearing ──────────────────────────────────────────────────────
    async fn apply_clearing_cycle(
        &self,
        equivalent: &EquivalentCode,
        cycle: &[Pid],
        amount: Amount,
    ) -> Result<(), HubError> {
        if cycle.len() < 2 {
            return Err(HubError::ValidationError("clearing cycle too short".into()));
        }
        let mut lock_keys = Vec::with_capacity(cycle.len());
        for window in cycle.windows(2) {
            lock_keys.push(LockKey::edge(equivalent, window[0], window[1]));
        }
        let _guards = self.locks.lock_many(lock_keys).await;

        let net_before: Vec<Amount> = cycle[..cycle.len() - 1]
            .iter()
            .map(|p| self.net_position_unlocked(equivalent, p))
            .collect::<Result<_, _>>()?;

        for window in cycle.windows(2) {
            let (debtor, creditor) = (window[0], window[1]);
            let current = self
                .read_debt(equivalent, &debtor, &creditor)?
                .map(|d| d.amount)
                .unwrap_or(Amount::ZERO);
            if current < amount {
                return Err(HubError::InternalError(format!(
                    "clearing cycle edge {debtor}->{creditor} has insufficient debt {current} for amount {amount}"
                )));
            }
            let debt = Debt {
                debtor,
                creditor,
                equivalent: equivalent.clone(),
                amount: current - amount,
                updated_at: chrono::Utc::now(),
            };
            self.write_debt_row(&debt)?;
        }

        for (p, before) in cycle[..cycle.len() - 1].iter().zip(net_before.iter()) {
            let after = self.net_position_unlocked(equivalent, p)?;
            if after != *before {
                return Err(HubError::IntegrityViolation(format!(
                    "clearing-neutrality violated for {p}: {before} -> {after}"
                )));
            }
        }
        Ok(())
    }

    // ── Transactions ──────────────────────────────────────────────────
    async fn get_transaction(&self, tx_id: &TxId) -> Result<Option<Transaction>, HubError> {
        match self.transactions.get(tx_id.to_hex().as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_transaction(&self, tx: &Transaction) -> Result<(), HubError> {
        self.transactions
            .insert(tx.tx_id.to_hex().as_bytes(), encode(tx)?)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Idempotency ───────────────────────────────────────────────────
    async fn find_idempotency(&self, key: &str) -> Result<Option<(TxId, [u8; 32])>, HubError> {
        match self.idempotency.get(key.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn record_idempotency(
        &self,
        key: &str,
        tx_id: TxId,
        payload_hash: [u8; 32],
    ) -> Result<(), HubError> {
        self.idempotency
            .insert(key.as_bytes(), encode(&(tx_id, payload_hash))?)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Events ────────────────────────────────────────────────────────
    async fn append_event(&self, event: &Event) -> Result<(), HubError> {
        let micros = event.timestamp.timestamp_micros();
        let key = event_key(micros, &event.event_id.as_bytes());
        self.events.insert(key, encode(event)?).map_err(storage_err)?;
        Ok(())
    }

    async fn list_recent_events(&self, limit: usize) -> Result<Vec<Event>, HubError> {
        let mut out = Vec::new();
        for item in self.events.iter().rev().take(limit) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Integrity ─────────────────────────────────────────────────────
    async fn is_integrity_locked(&self, equivalent: &EquivalentCode) -> Result<bool, HubError> {
        Ok(self
            .integrity_locks
            .contains_key(encode_equivalent(equivalent))
            .map_err(storage_err)?)
    }

    async fn set_integrity_locked(&self, equivalent: &EquivalentCode, locked: bool) -> Result<(), HubError> {
        let key = encode_equivalent(equivalent);
        if locked {
            self.integrity_locks.insert(key, &[1u8][..]).map_err(storage_err)?;
        } else {
            self.integrity_locks.remove(key).map_err(storage_err)?;
        }
        Ok(())
    }

    async fn put_checkpoint(&self, checkpoint: &IntegrityCheckpoint) -> Result<(), HubError> {
        let key = checkpoint_key(&checkpoint.equivalent, checkpoint.taken_at.timestamp_micros());
        self.checkpoints.insert(key, encode(checkpoint)?).map_err(storage_err)?;
        Ok(())
    }

    async fn latest_checkpoint(
        &self,
        equivalent: &EquivalentCode,
    ) -> Result<Option<IntegrityCheckpoint>, HubError> {
        let prefix = encode_equivalent(equivalent);
        let last = self
            .checkpoints
            .scan_prefix(prefix)
            .last()
            .transpose()
            .map_err(storage_err)?;
        match last {
            Some((_, bytes)) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn record_violation(&self, report: &IntegrityReport) -> Result<(), HubError> {
        let key = violation_key(&report.violation.equivalent, report.violation.detected_at.timestamp_micros());
        self.violations.insert(key, encode(report)?).map_err(storage_err)?;
        Ok(())
    }

    async fn list_violations(&self, equivalent: &EquivalentCode) -> Result<Vec<IntegrityReport>, HubError> {
        let prefix = encode_equivalent(equivalent);
        let mut out = Vec::new();
        for item in self.violations.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }
}

impl SledStorage {
    /// Apply `delta` to `debt[debtor,creditor]`, netting the opposite
    /// direction first (SPEC_FULL.md §4.2 "idempotent upsert of debts").
    /// Debt asymmetry (§3) means at most one of the two directions is
    /// ever positive; a delta that would push the forward debt negative
    /// instead drains the reverse row.
    fn apply_delta_nettable(
        &self,
        equivalent: &EquivalentCode,
        debtor: &Pid,
        creditor: &Pid,
        delta: Amount,
    ) -> Result<Debt, HubError> {
        let forward = self
            .read_debt(equivalent, debtor, creditor)?
            .map(|d| d.amount)
            .unwrap_or(Amount::ZERO);
        let reverse = self
            .read_debt(equivalent, creditor, debtor)?
            .map(|d| d.amount)
            .unwrap_or(Amount::ZERO);

        let mut new_forward = forward;
        let mut new_reverse = reverse;
        let mut remaining = delta;

        if remaining >= Amount::ZERO {
            new_forward += remaining;
        } else {
            // Negative delta: first pay down the forward debt, then
            // (if it overshoots) grow the reverse debt instead of ever
            // letting `new_forward` go negative.
            let reduction = (-remaining).min(forward);
            new_forward -= reduction;
            remaining += reduction;
            if remaining < Amount::ZERO {
                new_reverse += -remaining;
            }
        }

        // Debt asymmetry (§3): netting both directions against each other
        // whenever both are positive.
        if new_forward > Amount::ZERO && new_reverse > Amount::ZERO {
            let offset = new_forward.min(new_reverse);
            new_forward -= offset;
            new_reverse -= offset;
        }

        let now = chrono::Utc::now();
        self.write_debt_row(&Debt {
            debtor: *creditor,
            creditor: *debtor,
            equivalent: equivalent.clone(),
            amount: new_reverse,
            updated_at: now,
        })?;
        let result = Debt {
            debtor: *debtor,
            creditor: *creditor,
            equivalent: equivalent.clone(),
            amount: new_forward,
            updated_at: now,
        };
        self.write_debt_row(&result)?;
        Ok(result)
    }

    /// `net_balance(p,E) = Σ credits − Σ debts` restricted to the
    /// immediate neighbors touched by a clearing cycle; used only inside
    /// `apply_clearing_cycle`'s before/after check, which only needs the
    /// two edges of the cycle adjacent to `p` (the rest of `p`'s book is
    /// untouched by this operation and cancels out of the comparison).
    fn net_position_unlocked(&self, equivalent: &EquivalentCode, p: &Pid) -> Result<Amount, HubError> {
        let mut total = Amount::ZERO;
        for item in self.debts.scan_prefix(encode_equivalent(equivalent)) {
            let (_, bytes) = item.map_err(storage_err)?;
            let debt: Debt = decode(&bytes)?;
            if &debt.creditor == p {
                total += debt.amount;
            }
            if &debt.debtor == p {
                total -= debt.amount;
            }
        }
        Ok(total)
    }
}
