//! The payment engine (SPEC_FULL.md §4.5): routing, two-phase commit over
//! debt edges, idempotency, and the admin-authorized `COMPENSATION` escape
//! hatch. Mirrors the validate-then-commit shape of the teacher's
//! `StateEngine::apply` — nothing is written until every check upstream of
//! it has passed — but the commit itself is two RPCs (PREPARE, COMMIT)
//! instead of one, since edges span two accounts that must each see their
//! reservation before either one's balance moves.

use hub_core::envelope::PaymentRequestPayload;
use hub_core::error::HubError;
use hub_core::model::{EventType, Transaction, TransactionState, TransactionType};
use hub_core::types::{Amount, EquivalentCode, Pid, TxId};
use hub_core::{HubConfig, PaymentConfig};
use hub_crypto::canonical::canonical_json;
use hub_events::{Correlation, EventBus};
use hub_graph::GraphIndex;
use hub_router::{route, RouteConstraints};
use hub_storage::{PrepareEdgeRequest, StorageContract};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One leg of a committed payment, as reported back to the caller.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub hops: Vec<Pid>,
    pub amount: Amount,
}

#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub tx_id: TxId,
    pub state: TransactionState,
    pub routes: Vec<RouteOutcome>,
}

pub struct PaymentEngine {
    storage: Arc<dyn StorageContract>,
    graph: Arc<GraphIndex>,
    events: Arc<dyn EventBus>,
    config: HubConfig,
}

impl PaymentEngine {
    pub fn new(
        storage: Arc<dyn StorageContract>,
        graph: Arc<GraphIndex>,
        events: Arc<dyn EventBus>,
        config: HubConfig,
    ) -> Self {
        PaymentEngine { storage, graph, events, config }
    }

    fn payment_cfg(&self) -> &PaymentConfig {
        &self.config.payment
    }

    /// SPEC_FULL.md §4.5, full lifecycle: idempotency → integrity lock →
    /// NEW → ROUTED → PREPARED → COMMITTED, or ABORTED at any checkpoint.
    pub async fn execute_payment(
        &self,
        request: PaymentRequestPayload,
        initiator: Pid,
        correlation: Correlation,
    ) -> Result<PaymentOutcome, HubError> {
        let payload_hash = hash_payload(&request)?;

        if let Some(key) = &request.idempotency_key {
            if let Some((existing_tx, existing_hash)) = self.storage.find_idempotency(key).await? {
                if existing_hash != payload_hash {
                    return Err(HubError::Conflict);
                }
                let tx = self
                    .storage
                    .get_transaction(&existing_tx)
                    .await?
                    .ok_or_else(|| HubError::InternalError("idempotent transaction vanished".into()))?;
                return Ok(PaymentOutcome { tx_id: tx.tx_id, state: tx.state, routes: vec![] });
            }
        }

        if self.storage.is_integrity_locked(&request.equivalent).await? {
            return Err(HubError::IntegrityLocked(request.equivalent.as_str().to_string()));
        }

        let tx_id = TxId::new_v4();
        let now = chrono::Utc::now();
        let mut tx = Transaction {
            tx_id,
            tx_type: TransactionType::Payment,
            initiator,
            payload: serde_json::to_value(&request).map_err(|e| HubError::InternalError(e.to_string()))?,
            signatures: vec![],
            state: TransactionState::New,
            created_at: now,
            updated_at: now,
        };
        self.storage.put_transaction(&tx).await?;

        let outcome = self.route_and_settle(&mut tx, &request, &correlation).await;

        if let Some(key) = &request.idempotency_key {
            self.storage.record_idempotency(key, tx_id, payload_hash).await?;
        }

        outcome
    }

    async fn route_and_settle(
        &self,
        tx: &mut Transaction,
        request: &PaymentRequestPayload,
        correlation: &Correlation,
    ) -> Result<PaymentOutcome, HubError> {
        let constraints = RouteConstraints {
            max_hops: request.constraints.max_hops.unwrap_or(self.config.routing.max_path_length),
            max_paths: request.constraints.max_paths.unwrap_or(self.config.routing.max_paths_per_payment),
            avoid: request.constraints.avoid.clone(),
            timeout: Duration::from_millis(
                request.constraints.timeout_ms.unwrap_or(self.config.routing.routing_timeout_ms),
            ),
            large_payment_mode: request.constraints.large_payment_mode
                || self.config.routing.large_payment_mode_default,
        };

        let snapshot = self.graph.snapshot(&request.equivalent).await;
        let route_set = match route(snapshot, request.from, request.to, request.amount, constraints).await {
            Ok(set) => set,
            Err(err) => {
                return self.abort(tx, request, correlation, EventType::PaymentAborted, &err.to_string()).await.and(Err(err));
            }
        };

        tx.state = TransactionState::Routed;
        tx.updated_at = chrono::Utc::now();
        self.storage.put_transaction(tx).await?;

        match self.prepare(tx, request, &route_set, correlation).await {
            Ok(()) => {}
            Err(err) => return Err(err),
        }

        self.commit(tx, request, &route_set, correlation).await
    }

    /// Merge same-edge deltas across every chosen route before calling
    /// `prepare_edges` — `sled_store`'s trust-limit check sees one entry
    /// per `(debtor,creditor)` pair, never a partial total (SPEC_FULL.md
    /// §4.5, "PREPARE validates the full requested delta per edge").
    async fn prepare(
        &self,
        tx: &mut Transaction,
        request: &PaymentRequestPayload,
        route_set: &hub_router::RouteSet,
        correlation: &Correlation,
    ) -> Result<(), HubError> {
        let mut merged: BTreeMap<(Pid, Pid), Amount> = BTreeMap::new();
        for r in &route_set.routes {
            for window in r.hops.windows(2) {
                let (debtor, creditor) = (window[0], window[1]);
                *merged.entry((debtor, creditor)).or_insert(Amount::ZERO) += r.amount;
            }
        }
        let edges: Vec<PrepareEdgeRequest> = merged
            .iter()
            .map(|(&(debtor, creditor), &delta)| PrepareEdgeRequest { participant: debtor, debtor, creditor, delta })
            .collect();

        let cfg = self.payment_cfg().clone();
        let expires_at = chrono::Utc::now() + chrono::Duration::milliseconds(cfg.prepare_timeout_ms as i64);

        let mut attempt = 0u8;
        loop {
            match self.storage.prepare_edges(tx.tx_id, request.equivalent.clone(), edges.clone(), expires_at).await {
                Ok(locks) => {
                    for lock in &locks {
                        self.graph.reserve(&request.equivalent, lock.debtor, lock.creditor, lock.delta).await;
                    }
                    tx.state = TransactionState::Prepared;
                    tx.updated_at = chrono::Utc::now();
                    self.storage.put_transaction(tx).await?;
                    return Ok(());
                }
                Err(err) if is_transient(&err) && attempt < cfg.prepare_max_retries => {
                    attempt += 1;
                    warn!(tx_id = %tx.tx_id, attempt, "prepare retry after transient storage error");
                    continue;
                }
                Err(err) => {
                    self.storage.abort_prepared(&tx.tx_id).await.ok();
                    self.abort(tx, request, correlation, EventType::PaymentAborted, &err.to_string()).await?;
                    return Err(err);
                }
            }
        }
    }

    async fn commit(
        &self,
        tx: &mut Transaction,
        request: &PaymentRequestPayload,
        route_set: &hub_router::RouteSet,
        correlation: &Correlation,
    ) -> Result<PaymentOutcome, HubError> {
        let cfg = self.payment_cfg().clone();
        let mut attempt = 0u8;
        let committed = loop {
            match self.storage.commit_prepared(&tx.tx_id).await {
                Ok(debts) => break debts,
                Err(err) if is_transient(&err) && attempt < cfg.commit_max_retries => {
                    attempt += 1;
                    warn!(tx_id = %tx.tx_id, attempt, "commit retry after transient storage error");
                    continue;
                }
                Err(err) => {
                    let locks = self.storage.list_prepare_locks_for_tx(&tx.tx_id).await.unwrap_or_default();
                    if locks.is_empty() {
                        // Locks already expired and swept: COMMIT never succeeded
                        // and never will. Manual reconciliation territory.
                        self.abort(
                            tx,
                            request,
                            correlation,
                            EventType::PaymentInconsistencyCandidate,
                            &err.to_string(),
                        )
                        .await?;
                    } else {
                        self.storage.abort_prepared(&tx.tx_id).await.ok();
                        for lock in &locks {
                            self.graph.release(&request.equivalent, lock.debtor, lock.creditor, lock.delta).await;
                        }
                        self.abort(tx, request, correlation, EventType::PaymentAborted, &err.to_string()).await?;
                    }
                    return Err(err);
                }
            }
        };

        for debt in &committed {
            self.graph.set_debt(&request.equivalent, debt.debtor, debt.creditor, debt.amount).await;
        }
        // Release every edge's reservation now that its delta is applied.
        for route in &route_set.routes {
            for window in route.hops.windows(2) {
                self.graph.release(&request.equivalent, window[0], window[1], route.amount).await;
            }
        }

        tx.state = TransactionState::Committed;
        tx.updated_at = chrono::Utc::now();
        self.storage.put_transaction(tx).await?;

        self.events
            .publish_in_tx(
                EventType::PaymentCommitted,
                request.from,
                Some(tx.tx_id),
                correlation,
                serde_json::json!({
                    "equivalent": request.equivalent.as_str(),
                    "amount": request.amount.to_string(),
                    "routes": route_set.routes.len(),
                }),
            )
            .await?;

        info!(tx_id = %tx.tx_id, "payment committed");

        Ok(PaymentOutcome {
            tx_id: tx.tx_id,
            state: tx.state,
            routes: route_set
                .routes
                .iter()
                .map(|r| RouteOutcome { hops: r.hops.clone(), amount: r.amount })
                .collect(),
        })
    }

    async fn abort(
        &self,
        tx: &mut Transaction,
        request: &PaymentRequestPayload,
        correlation: &Correlation,
        event_type: EventType,
        reason: &str,
    ) -> Result<(), HubError> {
        tx.state = TransactionState::Aborted;
        tx.updated_at = chrono::Utc::now();
        self.storage.put_transaction(tx).await?;
        self.events
            .publish_in_tx(
                event_type,
                request.from,
                Some(tx.tx_id),
                correlation,
                serde_json::json!({"reason": reason}),
            )
            .await?;
        warn!(tx_id = %tx.tx_id, reason, event = event_type.wire_name(), "payment aborted");
        Ok(())
    }

    /// Admin-authorized direct edge adjustment, bypassing routing and 2PC
    /// entirely (open question (c), SPEC_FULL.md §9). The caller is
    /// responsible for having authenticated `admin_pid` against
    /// `self.config.admin_pid` before calling this.
    pub async fn compensate(
        &self,
        admin_pid: Pid,
        equivalent: EquivalentCode,
        debtor: Pid,
        creditor: Pid,
        delta: Amount,
        correlation: Correlation,
    ) -> Result<PaymentOutcome, HubError> {
        if admin_pid != self.config.admin_pid {
            return Err(HubError::Unauthorized(admin_pid));
        }
        if self.storage.is_integrity_locked(&equivalent).await? {
            return Err(HubError::IntegrityLocked(equivalent.as_str().to_string()));
        }

        let debt = self.storage.apply_direct_delta(&equivalent, &debtor, &creditor, delta).await?;
        self.graph.set_debt(&equivalent, debt.debtor, debt.creditor, debt.amount).await;

        let now = chrono::Utc::now();
        let tx_id = TxId::new_v4();
        let tx = Transaction {
            tx_id,
            tx_type: TransactionType::Compensation,
            initiator: admin_pid,
            payload: serde_json::json!({
                "equivalent": equivalent.as_str(),
                "debtor": debtor.to_b58(),
                "creditor": creditor.to_b58(),
                "delta": delta.to_string(),
            }),
            signatures: vec![],
            state: TransactionState::Committed,
            created_at: now,
            updated_at: now,
        };
        self.storage.put_transaction(&tx).await?;

        self.events
            .publish_in_tx(
                EventType::PaymentCommitted,
                admin_pid,
                Some(tx_id),
                &correlation,
                serde_json::json!({
                    "equivalent": equivalent.as_str(),
                    "compensation": true,
                    "delta": delta.to_string(),
                }),
            )
            .await?;

        Ok(PaymentOutcome { tx_id, state: TransactionState::Committed, routes: vec![] })
    }
}

fn hash_payload(request: &PaymentRequestPayload) -> Result<[u8; 32], HubError> {
    let bytes = canonical_json(request).map_err(|e| HubError::InternalError(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Transient storage errors are retried; validation/capacity errors are
/// permanent and abort immediately (SPEC_FULL.md §4.5).
fn is_transient(err: &HubError) -> bool {
    matches!(err, HubError::Storage(_) | HubError::InternalError(_))
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
        let dir = std::env::temp_dir().join(format!("hub_payment_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        Arc::new(SledStorage::open(&dir).expect("open sled store"))
    }

    fn test_config(admin: Pid) -> HubConfig {
        HubConfig {
            routing: Default::default(),
            payment: Default::default(),
            clearing: Default::default(),
            integrity: Default::default(),
            max_clock_drift_seconds: 300,
            admin_pid: admin,
        }
    }

    async fn seed(
        storage: &Arc<SledStorage>,
        graph: &Arc<GraphIndex>,
        equiv: &EquivalentCode,
        from: Pid,
        to: Pid,
        limit: &str,
    ) {
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
        storage
            .put_equivalent(&Equivalent {
                code: equiv.clone(),
                precision: 2,
                kind: EquivalentKind::Custom,
                active: true,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        let line = TrustLine {
            from,
            to,
            equivalent: equiv.clone(),
            limit: limit.parse().unwrap(),
            policy: TrustLinePolicy::default(),
            status: TrustLineStatus::Active,
            updated_at: chrono::Utc::now(),
        };
        storage.put_trust_line(&line).await.unwrap();
        graph.upsert_trust_line(&line).await;
        graph.rebuild(equiv, storage.as_ref()).await.unwrap();
    }

    #[tokio::test]
    async fn direct_payment_commits_and_moves_debt() {
        let storage = temp_store("direct_commit");
        let graph = Arc::new(GraphIndex::new());
        let equiv = EquivalentCode::parse("UAH").unwrap();
        let (alice, bob) = (pid(1), pid(2));
        // bob extends credit to alice: alice (debtor) can pay bob (creditor).
        seed(&storage, &graph, &equiv, bob, alice, "100").await;

        let events: Arc<dyn EventBus> = Arc::new(StorageEventBus::new(storage.clone() as Arc<dyn StorageContract>));
        let engine = PaymentEngine::new(storage.clone(), graph.clone(), events, test_config(pid(99)));

        let request = PaymentRequestPayload {
            from: alice,
            to: bob,
            equivalent: equiv.clone(),
            amount: "30".parse().unwrap(),
            description: String::new(),
            constraints: Default::default(),
            idempotency_key: Some("key-1".into()),
            timestamp: chrono::Utc::now(),
        };

        let outcome = engine
            .execute_payment(request, alice, Correlation { request_id: "r1".into(), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(outcome.state, TransactionState::Committed);

        let debt = storage.get_debt(&equiv, &alice, &bob).await.unwrap().unwrap();
        assert_eq!(debt.amount, "30".parse().unwrap());
    }

    #[tokio::test]
    async fn repeated_idempotency_key_returns_same_outcome() {
        let storage = temp_store("idempotent");
        let graph = Arc::new(GraphIndex::new());
        let equiv = EquivalentCode::parse("UAH").unwrap();
        let (alice, bob) = (pid(3), pid(4));
        seed(&storage, &graph, &equiv, bob, alice, "100").await;

        let events: Arc<dyn EventBus> = Arc::new(StorageEventBus::new(storage.clone() as Arc<dyn StorageContract>));
        let engine = PaymentEngine::new(storage.clone(), graph.clone(), events, test_config(pid(99)));

        let request = PaymentRequestPayload {
            from: alice,
            to: bob,
            equivalent: equiv.clone(),
            amount: "10".parse().unwrap(),
            description: String::new(),
            constraints: Default::default(),
            idempotency_key: Some("dup-key".into()),
            timestamp: chrono::Utc::now(),
        };

        let first = engine
            .execute_payment(request.clone(), alice, Correlation { request_id: "r1".into(), ..Default::default() })
            .await
            .unwrap();
        let second = engine
            .execute_payment(request, alice, Correlation { request_id: "r2".into(), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(first.tx_id, second.tx_id);

        let debt = storage.get_debt(&equiv, &alice, &bob).await.unwrap().unwrap();
        assert_eq!(debt.amount, "10".parse().unwrap());
    }

    #[tokio::test]
    async fn insufficient_capacity_aborts_without_mutating_debt() {
        let storage = temp_store("insufficient");
        let graph = Arc::new(GraphIndex::new());
        let equiv = EquivalentCode::parse("UAH").unwrap();
        let (alice, bob) = (pid(5), pid(6));
        seed(&storage, &graph, &equiv, bob, alice, "10").await;

        let events: Arc<dyn EventBus> = Arc::new(StorageEventBus::new(storage.clone() as Arc<dyn StorageContract>));
        let engine = PaymentEngine::new(storage.clone(), graph.clone(), events, test_config(pid(99)));

        let request = PaymentRequestPayload {
            from: alice,
            to: bob,
            equivalent: equiv.clone(),
            amount: "500".parse().unwrap(),
            description: String::new(),
            constraints: Default::default(),
            idempotency_key: None,
            timestamp: chrono::Utc::now(),
        };

        let err = engine
            .execute_payment(request, alice, Correlation { request_id: "r1".into(), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::InsufficientCapacity { .. }));
        assert!(storage.get_debt(&equiv, &alice, &bob).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compensation_requires_admin_authorization() {
        let storage = temp_store("compensation_auth");
        let graph = Arc::new(GraphIndex::new());
        let equiv = EquivalentCode::parse("UAH").unwrap();
        let (alice, bob, admin) = (pid(7), pid(8), pid(9));
        seed(&storage, &graph, &equiv, bob, alice, "100").await;

        let events: Arc<dyn EventBus> = Arc::new(StorageEventBus::new(storage.clone() as Arc<dyn StorageContract>));
        let engine = PaymentEngine::new(storage.clone(), graph.clone(), events, test_config(admin));

        let err = engine
            .compensate(alice, equiv, alice, bob, "5".parse().unwrap(), Correlation::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn compensation_applies_direct_delta() {
        let storage = temp_store("compensation_apply");
        let graph = Arc::new(GraphIndex::new());
        let equiv = EquivalentCode::parse("UAH").unwrap();
        let (alice, bob, admin) = (pid(10), pid(11), pid(12));
        seed(&storage, &graph, &equiv, bob, alice, "100").await;

        let events: Arc<dyn EventBus> = Arc::new(StorageEventBus::new(storage.clone() as Arc<dyn StorageContract>));
        let engine = PaymentEngine::new(storage.clone(), graph.clone(), events, test_config(admin));

        let outcome = engine
            .compensate(admin, equiv.clone(), alice, bob, "15".parse().unwrap(), Correlation::default())
            .await
            .unwrap();
        assert_eq!(outcome.state, TransactionState::Committed);

        let debt = storage.get_debt(&equiv, &alice, &bob).await.unwrap().unwrap();
        assert_eq!(debt.amount, "15".parse().unwrap());
    }
}
