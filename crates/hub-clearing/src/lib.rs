//! The clearing engine (SPEC_FULL.md §4.6): triggered cycle search after
//! every debt-changing commit, a periodic background sweep for longer
//! cycles, and an explicit-consent round for cycles touching a
//! non-auto-clearing intermediary.

pub mod consent;
pub mod cycles;

use chrono::Duration as ChronoDuration;
use consent::{ConsentOutcome, ConsentTracker};
use cycles::Candidate;
use hub_core::error::HubError;
use hub_core::model::{EventType, Transaction, TransactionState, TransactionType};
use hub_core::types::{Amount, EquivalentCode, Pid, TxId};
use hub_core::{ClearingConfig, PERIODIC_CYCLE_MAX_LENGTH, TRIGGER_CYCLE_MIN_LENGTH};
use hub_events::{Correlation, EventBus};
use hub_graph::GraphIndex;
use hub_storage::StorageContract;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// What happened when a candidate cycle was examined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Committed immediately (auto-clearing mode).
    Committed,
    /// Below `min_clearing_amount`, or the cycle's debt no longer exists
    /// as read (stale candidate from a sweep snapshot).
    Skipped,
    /// Awaiting `CLEARING_ACCEPT`/`CLEARING_REJECT` from every
    /// non-auto-clearing intermediary.
    AwaitingConsent { tx_id: TxId },
}

pub struct ClearingEngine {
    storage: Arc<dyn StorageContract>,
    graph: Arc<GraphIndex>,
    events: Arc<dyn EventBus>,
    config: ClearingConfig,
    consent: Mutex<ConsentTracker>,
    sweep_tenancy: Mutex<HashMap<EquivalentCode, Arc<Mutex<()>>>>,
}

impl ClearingEngine {
    pub fn new(
        storage: Arc<dyn StorageContract>,
        graph: Arc<GraphIndex>,
        events: Arc<dyn EventBus>,
        config: ClearingConfig,
    ) -> Self {
        ClearingEngine {
            storage,
            graph,
            events,
            config,
            consent: Mutex::new(ConsentTracker::new()),
            sweep_tenancy: Mutex::new(HashMap::new()),
        }
    }

    /// Call after every committed mutation of edge `(debtor, creditor)`
    /// (SPEC_FULL.md §4.6: "on every debt-changing commit ... search for
    /// cycles of length 3 and 4 that include it"). Processes candidates
    /// highest-`S` first, capped at `cycles_per_sweep_cap`.
    pub async fn on_debt_changed(
        &self,
        equivalent: &EquivalentCode,
        debtor: Pid,
        creditor: Pid,
        correlation: &Correlation,
    ) -> Result<Vec<CycleOutcome>, HubError> {
        let debts = self.storage.list_debts(equivalent).await?;
        let adjacency = cycles::build_adjacency(&debts);

        let mut candidates = Vec::new();
        for len in TRIGGER_CYCLE_MIN_LENGTH..=self.config.trigger_cycles_max_length {
            candidates.extend(cycles::find_cycles(
                &adjacency,
                debtor,
                len as usize,
                Some(creditor),
                self.config.cycles_per_sweep_cap,
            ));
        }
        self.settle_candidates(equivalent, candidates, correlation).await
    }

    /// Background periodic sweep for longer cycles (SPEC_FULL.md §4.6:
    /// length 5 hourly, length 6 daily). Serialized per equivalent so at
    /// most one sweep runs at a time (§5); a sweep already in flight is
    /// skipped rather than queued.
    pub async fn sweep_periodic(
        &self,
        equivalent: &EquivalentCode,
        len: u8,
        correlation: &Correlation,
    ) -> Result<Vec<CycleOutcome>, HubError> {
        if !(TRIGGER_CYCLE_MIN_LENGTH..=PERIODIC_CYCLE_MAX_LENGTH).contains(&len) {
            return Err(HubError::ValidationError(format!("invalid periodic cycle length {len}")));
        }
        let lock = self.tenancy_lock(equivalent).await;
        let Ok(_guard) = lock.try_lock() else {
            info!(equivalent = %equivalent, len, "periodic sweep already in flight, skipping");
            return Ok(vec![]);
        };

        let debts = self.storage.list_debts(equivalent).await?;
        let adjacency = cycles::build_adjacency(&debts);

        let mut candidates = Vec::new();
        let mut budget = self.config.cycles_per_sweep_cap;
        for &start in adjacency.keys() {
            if budget == 0 {
                break;
            }
            let found = cycles::find_cycles(&adjacency, start, len as usize, None, budget);
            budget = budget.saturating_sub(found.len().max(1));
            candidates.extend(found);
        }
        self.settle_candidates(equivalent, candidates, correlation).await
    }

    async fn tenancy_lock(&self, equivalent: &EquivalentCode) -> Arc<Mutex<()>> {
        let mut table = self.sweep_tenancy.lock().await;
        table.entry(equivalent.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Ordering: highest-`S` first (SPEC_FULL.md §4.6).
    async fn settle_candidates(
        &self,
        equivalent: &EquivalentCode,
        mut candidates: Vec<Candidate>,
        correlation: &Correlation,
    ) -> Result<Vec<CycleOutcome>, HubError> {
        candidates.sort_by(|a, b| b.bottleneck.cmp(&a.bottleneck));
        let mut outcomes = Vec::with_capacity(candidates.len());
        for candidate in candidates.into_iter().take(self.config.cycles_per_sweep_cap) {
            let outcome = self.settle_cycle(equivalent, candidate, correlation).await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn settle_cycle(
        &self,
        equivalent: &EquivalentCode,
        candidate: Candidate,
        correlation: &Correlation,
    ) -> Result<CycleOutcome, HubError> {
        if candidate.bottleneck < self.config.min_clearing_amount {
            return Ok(CycleOutcome::Skipped);
        }

        let required = self.required_consent(equivalent, &candidate.hops).await?;
        let initiator = candidate.hops[0];

        if required.is_empty() {
            match self.commit_cycle(equivalent, &candidate.hops, candidate.bottleneck, initiator, correlation).await
            {
                Ok(()) => Ok(CycleOutcome::Committed),
                Err(HubError::IntegrityViolation(_)) | Err(HubError::InternalError(_)) => {
                    Ok(CycleOutcome::Skipped)
                }
                Err(err) => Err(err),
            }
        } else {
            let tx_id = self.open_consent_round(equivalent, &candidate, required, initiator, correlation).await?;
            Ok(CycleOutcome::AwaitingConsent { tx_id })
        }
    }

    /// SPEC_FULL.md §4.6 step 2: a cycle member's governing trust line
    /// (the one whose creditor extends the edge leaving that member)
    /// with `policy.auto_clearing = false` puts that creditor into the
    /// required-consent set.
    async fn required_consent(
        &self,
        equivalent: &EquivalentCode,
        cycle: &[Pid],
    ) -> Result<BTreeSet<Pid>, HubError> {
        let mut required = BTreeSet::new();
        for window in cycle.windows(2) {
            let (debtor, creditor) = (window[0], window[1]);
            if let Some(line) = self.storage.get_trust_line(equivalent, &creditor, &debtor).await? {
                if !line.policy.auto_clearing {
                    required.insert(creditor);
                }
            }
        }
        Ok(required)
    }

    async fn commit_cycle(
        &self,
        equivalent: &EquivalentCode,
        cycle: &[Pid],
        amount: Amount,
        initiator: Pid,
        correlation: &Correlation,
    ) -> Result<(), HubError> {
        self.storage.apply_clearing_cycle(equivalent, cycle, amount).await?;
        for window in cycle.windows(2) {
            let (debtor, creditor) = (window[0], window[1]);
            if let Some(debt) = self.storage.get_debt(equivalent, &debtor, &creditor).await? {
                self.graph.set_debt(equivalent, debtor, creditor, debt.amount).await;
            } else {
                self.graph.set_debt(equivalent, debtor, creditor, Amount::ZERO).await;
            }
        }

        let now = chrono::Utc::now();
        let tx = Transaction {
            tx_id: TxId::new_v4(),
            tx_type: TransactionType::Clearing,
            initiator,
            payload: serde_json::json!({
                "equivalent": equivalent.as_str(),
                "cycle": cycle.iter().map(|p| p.to_b58()).collect::<Vec<_>>(),
                "amount": amount.to_string(),
            }),
            signatures: vec![],
            state: TransactionState::Committed,
            created_at: now,
            updated_at: now,
        };
        self.storage.put_transaction(&tx).await?;
        self.events
            .publish_in_tx(
                EventType::ClearingExecuted,
                initiator,
                Some(tx.tx_id),
                correlation,
                serde_json::json!({
                    "equivalent": equivalent.as_str(),
                    "cycle_len": cycle.len() - 1,
                    "amount": amount.to_string(),
                }),
            )
            .await?;
        info!(tx_id = %tx.tx_id, equivalent = %equivalent, amount = %amount, "clearing cycle committed");
        Ok(())
    }

    async fn open_consent_round(
        &self,
        equivalent: &EquivalentCode,
        candidate: &Candidate,
        required: BTreeSet<Pid>,
        initiator: Pid,
        correlation: &Correlation,
    ) -> Result<TxId, HubError> {
        let tx_id = TxId::new_v4();
        let now = chrono::Utc::now();
        let expires_at = now + ChronoDuration::seconds(self.config.clearing_consent_window_secs as i64);
        let tx = Transaction {
            tx_id,
            tx_type: TransactionType::Clearing,
            initiator,
            payload: serde_json::json!({
                "equivalent": equivalent.as_str(),
                "cycle": candidate.hops.iter().map(|p| p.to_b58()).collect::<Vec<_>>(),
                "amount": candidate.bottleneck.to_string(),
                "required": required.iter().map(|p| p.to_b58()).collect::<Vec<_>>(),
            }),
            signatures: vec![],
            state: TransactionState::Proposed,
            created_at: now,
            updated_at: now,
        };
        self.storage.put_transaction(&tx).await?;

        {
            let mut tracker = self.consent.lock().await;
            tracker.begin(tx_id, required, expires_at);
        }

        let mut waiting = tx;
        waiting.state = TransactionState::Waiting;
        waiting.updated_at = chrono::Utc::now();
        self.storage.put_transaction(&waiting).await?;

        info!(tx_id = %tx_id, equivalent = %equivalent, "clearing cycle awaiting explicit consent");
        Ok(tx_id)
    }

    /// Called from the dispatch layer when a `CLEARING_ACCEPT` arrives.
    pub async fn record_accept(
        &self,
        tx_id: TxId,
        participant: Pid,
        correlation: &Correlation,
    ) -> Result<CycleOutcome, HubError> {
        let outcome = {
            let mut tracker = self.consent.lock().await;
            tracker.record_accept(tx_id, participant)
        };
        match outcome {
            ConsentOutcome::Pending => Ok(CycleOutcome::AwaitingConsent { tx_id }),
            ConsentOutcome::Rejected { .. } => unreachable!("record_accept never rejects"),
            ConsentOutcome::Accepted => self.finalize_consented(tx_id, correlation).await,
        }
    }

    /// Called from the dispatch layer when a `CLEARING_REJECT` arrives.
    pub async fn record_reject(
        &self,
        tx_id: TxId,
        participant: Pid,
        correlation: &Correlation,
    ) -> Result<CycleOutcome, HubError> {
        {
            let mut tracker = self.consent.lock().await;
            tracker.record_reject(tx_id, participant);
        }
        if let Some(mut tx) = self.storage.get_transaction(&tx_id).await? {
            tx.state = TransactionState::Rejected;
            tx.updated_at = chrono::Utc::now();
            self.storage.put_transaction(&tx).await?;
            self.events
                .publish_in_tx(
                    EventType::ClearingSkipped,
                    participant,
                    Some(tx_id),
                    correlation,
                    serde_json::json!({"reason": "rejected", "by": participant.to_b58()}),
                )
                .await?;
        }
        Ok(CycleOutcome::Skipped)
    }

    /// Sweep consent rounds whose window has elapsed, marking each
    /// transaction `ABORTED` (SPEC_FULL.md §4.6: "timeout aborts").
    pub async fn sweep_expired_consents(&self, correlation: &Correlation) -> Result<usize, HubError> {
        let expired = {
            let mut tracker = self.consent.lock().await;
            tracker.sweep_expired(chrono::Utc::now())
        };
        for tx_id in &expired {
            if let Some(mut tx) = self.storage.get_transaction(tx_id).await? {
                tx.state = TransactionState::Aborted;
                tx.updated_at = chrono::Utc::now();
                self.storage.put_transaction(&tx).await?;
                self.events
                    .publish_in_tx(
                        EventType::ClearingSkipped,
                        tx.initiator,
                        Some(*tx_id),
                        correlation,
                        serde_json::json!({"reason": "consent_window_expired"}),
                    )
                    .await?;
                warn!(tx_id = %tx_id, "clearing consent round expired");
            }
        }
        Ok(expired.len())
    }

    async fn finalize_consented(&self, tx_id: TxId, correlation: &Correlation) -> Result<CycleOutcome, HubError> {
        let Some(tx) = self.storage.get_transaction(&tx_id).await? else {
            return Ok(CycleOutcome::Skipped);
        };
        let equivalent = EquivalentCode::parse(
            tx.payload["equivalent"].as_str().ok_or_else(|| HubError::InternalError("missing equivalent".into()))?,
        )
        .map_err(|e| HubError::InternalError(e.to_string()))?;
        let cycle: Vec<Pid> = tx.payload["cycle"]
            .as_array()
            .ok_or_else(|| HubError::InternalError("missing cycle".into()))?
            .iter()
            .map(|v| v.as_str().unwrap_or_default().parse::<Pid>())
            .collect::<Result<_, _>>()
            .map_err(|_| HubError::InternalError("malformed cycle pid".into()))?;
        let amount: Amount = tx.payload["amount"]
            .as_str()
            .ok_or_else(|| HubError::InternalError("missing amount".into()))?
            .parse()
            .map_err(|_| HubError::InternalError("malformed amount".into()))?;

        match self.commit_cycle(&equivalent, &cycle, amount, tx.initiator, correlation).await {
            Ok(()) => Ok(CycleOutcome::Committed),
            Err(HubError::IntegrityViolation(_)) | Err(HubError::InternalError(_)) => {
                let mut aborted = tx;
                aborted.state = TransactionState::Aborted;
                aborted.updated_at = chrono::Utc::now();
                self.storage.put_transaction(&aborted).await?;
                Ok(CycleOutcome::Skipped)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::model::{Equivalent, Participant, TrustLine, TrustLinePolicy};
    use hub_core::types::{EquivalentKind, ParticipantStatus, TrustLineStatus};
    use hub_events::StorageEventBus;
    use hub_storage::SledStorage;

    fn pid(b: u8) -> Pid {
        Pid::from_public_key_bytes(&[b; 32])
    }

    fn temp_store(name: &str) -> Arc<SledStorage> {
        let dir = std::env::temp_dir().join(format!("hub_clearing_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        Arc::new(SledStorage::open(&dir).expect("open sled store"))
    }

    async fn seed_line(storage: &Arc<SledStorage>, equiv: &EquivalentCode, from: Pid, to: Pid, limit: &str, auto: bool) {
        for p in [from, to] {
            storage
                .put_participant(&Participant {
                    pid: p,
                    public_key: [0u8; 32],
                    status: ParticipantStatus::Active,
                    verification_level: 1,
                    profile: serde_json::Value::Null,
                    created_at: chrono::Utc::now(),
                })
                .await
                .unwrap();
        }
        let mut policy = TrustLinePolicy::default();
        policy.auto_clearing = auto;
        storage
            .put_trust_line(&TrustLine {
                from,
                to,
                equivalent: equiv.clone(),
                limit: limit.parse().unwrap(),
                policy,
                status: TrustLineStatus::Active,
                updated_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
    }

    async fn seed_debt(storage: &Arc<SledStorage>, equiv: &EquivalentCode, debtor: Pid, creditor: Pid, amount: &str) {
        storage
            .apply_direct_delta(equiv, &debtor, &creditor, amount.parse().unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn auto_clearing_triangle_commits_immediately() {
        let storage = temp_store("auto_triangle");
        let graph = Arc::new(GraphIndex::new());
        let equiv = EquivalentCode::parse("UAH").unwrap();
        storage
            .put_equivalent(&Equivalent { code: equiv.clone(), precision: 2, kind: EquivalentKind::Custom, active: true, created_at: chrono::Utc::now() })
            .await
            .unwrap();
        let (a, b, c) = (pid(1), pid(2), pid(3));
        seed_line(&storage, &equiv, b, a, "100", true).await;
        seed_line(&storage, &equiv, c, b, "100", true).await;
        seed_line(&storage, &equiv, a, c, "100", true).await;
        seed_debt(&storage, &equiv, a, b, "30").await;
        seed_debt(&storage, &equiv, b, c, "20").await;
        seed_debt(&storage, &equiv, c, a, "10").await;

        let events: Arc<dyn EventBus> = Arc::new(StorageEventBus::new(storage.clone() as Arc<dyn StorageContract>));
        let engine = ClearingEngine::new(storage.clone(), graph, events, ClearingConfig::default());

        let outcomes = engine
            .on_debt_changed(&equiv, a, b, &Correlation { request_id: "r1".into(), ..Default::default() })
            .await
            .unwrap();
        assert!(outcomes.contains(&CycleOutcome::Committed));

        let ab = storage.get_debt(&equiv, &a, &b).await.unwrap().unwrap();
        assert_eq!(ab.amount, "20".parse().unwrap());
        let bc = storage.get_debt(&equiv, &b, &c).await.unwrap().unwrap();
        assert_eq!(bc.amount, "10".parse().unwrap());
        assert!(storage.get_debt(&equiv, &c, &a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn below_minimum_bottleneck_is_skipped() {
        let storage = temp_store("below_min");
        let graph = Arc::new(GraphIndex::new());
        let equiv = EquivalentCode::parse("UAH").unwrap();
        storage
            .put_equivalent(&Equivalent { code: equiv.clone(), precision: 2, kind: EquivalentKind::Custom, active: true, created_at: chrono::Utc::now() })
            .await
            .unwrap();
        let (a, b, c) = (pid(4), pid(5), pid(6));
        seed_line(&storage, &equiv, b, a, "100", true).await;
        seed_line(&storage, &equiv, c, b, "100", true).await;
        seed_line(&storage, &equiv, a, c, "100", true).await;
        seed_debt(&storage, &equiv, a, b, "30").await;
        seed_debt(&storage, &equiv, b, c, "20").await;
        seed_debt(&storage, &equiv, c, a, "0.001").await;

        let events: Arc<dyn EventBus> = Arc::new(StorageEventBus::new(storage.clone() as Arc<dyn StorageContract>));
        let mut config = ClearingConfig::default();
        config.min_clearing_amount = "0.01".parse().unwrap();
        let engine = ClearingEngine::new(storage.clone(), graph, events, config);

        let outcomes = engine
            .on_debt_changed(&equiv, a, b, &Correlation::default())
            .await
            .unwrap();
        assert!(outcomes.iter().all(|o| *o == CycleOutcome::Skipped));
        let ab = storage.get_debt(&equiv, &a, &b).await.unwrap().unwrap();
        assert_eq!(ab.amount, "30".parse().unwrap());
    }

    #[tokio::test]
    async fn non_auto_clearing_line_opens_a_consent_round() {
        let storage = temp_store("consent_round");
        let graph = Arc::new(GraphIndex::new());
        let equiv = EquivalentCode::parse("UAH").unwrap();
        storage
            .put_equivalent(&Equivalent { code: equiv.clone(), precision: 2, kind: EquivalentKind::Custom, active: true, created_at: chrono::Utc::now() })
            .await
            .unwrap();
        let (a, b, c) = (pid(7), pid(8), pid(9));
        seed_line(&storage, &equiv, b, a, "100", true).await;
        seed_line(&storage, &equiv, c, b, "100", false).await;
        seed_line(&storage, &equiv, a, c, "100", true).await;
        seed_debt(&storage, &equiv, a, b, "30").await;
        seed_debt(&storage, &equiv, b, c, "20").await;
        seed_debt(&storage, &equiv, c, a, "10").await;

        let events: Arc<dyn EventBus> = Arc::new(StorageEventBus::new(storage.clone() as Arc<dyn StorageContract>));
        let engine = ClearingEngine::new(storage.clone(), graph, events, ClearingConfig::default());

        let outcomes = engine
            .on_debt_changed(&equiv, a, b, &Correlation::default())
            .await
            .unwrap();
        assert!(matches!(outcomes[0], CycleOutcome::AwaitingConsent { .. }));

        let ab = storage.get_debt(&equiv, &a, &b).await.unwrap().unwrap();
        assert_eq!(ab.amount, "30".parse().unwrap(), "no debt moves until consent resolves");

        let CycleOutcome::AwaitingConsent { tx_id } = outcomes[0] else { unreachable!() };
        let outcome = engine.record_accept(tx_id, c, &Correlation::default()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Committed);
        let ab = storage.get_debt(&equiv, &a, &b).await.unwrap().unwrap();
        assert_eq!(ab.amount, "20".parse().unwrap());
    }
}
