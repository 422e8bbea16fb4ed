//! Trust-line create/update/close (SPEC_FULL.md §3, §4.3, §4.8). The
//! three invariants — at most one active line per `(from,to,equivalent)`,
//! close only at zero dependent debt, limit update never below existing
//! debt — are enforced inside `StorageContract`'s row-locked
//! `create_trust_line`/`update_trust_line`/`close_trust_line`, the same
//! place `prepare_edges` enforces the trust-limit check for payments;
//! this engine only sequences that call against the graph index, the
//! transaction log, and the event bus, the way `PaymentEngine` does
//! around `prepare_edges`/`commit_prepared`.

use hub_core::envelope::{TrustLineClosePayload, TrustLineCreatePayload, TrustLineUpdatePayload};
use hub_core::error::HubError;
use hub_core::model::{EventType, Transaction, TransactionState, TransactionType, TrustLine, TrustLinePolicy};
use hub_core::types::{Pid, TrustLineStatus, TxId};
use hub_events::{Correlation, EventBus};
use hub_graph::GraphIndex;
use hub_storage::contract::TrustLineUpdate;
use hub_storage::StorageContract;
use std::sync::Arc;
use tracing::info;

pub struct TrustLineEngine {
    storage: Arc<dyn StorageContract>,
    graph: Arc<GraphIndex>,
    events: Arc<dyn EventBus>,
}

impl TrustLineEngine {
    pub fn new(storage: Arc<dyn StorageContract>, graph: Arc<GraphIndex>, events: Arc<dyn EventBus>) -> Self {
        TrustLineEngine { storage, graph, events }
    }

    /// Create a new active trust line. Fails with `TrustLineExists` if
    /// `(from,to,equivalent)` already has one.
    pub async fn create(
        &self,
        request: TrustLineCreatePayload,
        initiator: Pid,
        correlation: Correlation,
    ) -> Result<TrustLine, HubError> {
        let line = TrustLine {
            from: request.from,
            to: request.to,
            equivalent: request.equivalent.clone(),
            limit: request.limit,
            policy: TrustLinePolicy {
                auto_clearing: request.auto_clearing,
                can_be_intermediate: request.can_be_intermediate,
                blocked: request.blocked.clone(),
                daily_limit: request.daily_limit,
            },
            status: TrustLineStatus::Active,
            updated_at: chrono::Utc::now(),
        };

        self.storage.create_trust_line(line.clone()).await?;
        self.graph.upsert_trust_line(&line).await;

        self.record(TransactionType::TrustLineCreate, initiator, &line).await?;
        self.events
            .publish_in_tx(
                EventType::TrustlineCreated,
                initiator,
                None,
                &correlation,
                serde_json::json!({
                    "from": line.from.to_b58(),
                    "to": line.to.to_b58(),
                    "equivalent": line.equivalent.as_str(),
                    "limit": line.limit.to_string(),
                }),
            )
            .await?;

        info!(from = %line.from, to = %line.to, equivalent = %line.equivalent, "trust line created");
        Ok(line)
    }

    /// Patch an existing active line. Fails with `TrustLimitExceeded` if
    /// a lowered `limit` would fall below the dependent debt.
    pub async fn update(
        &self,
        request: TrustLineUpdatePayload,
        initiator: Pid,
        correlation: Correlation,
    ) -> Result<TrustLine, HubError> {
        let patch = TrustLineUpdate {
            limit: request.limit,
            auto_clearing: request.auto_clearing,
            can_be_intermediate: request.can_be_intermediate,
            blocked: request.blocked,
            daily_limit: request.daily_limit,
        };

        let line = self
            .storage
            .update_trust_line(&request.equivalent, &request.from, &request.to, patch)
            .await?;
        self.graph.upsert_trust_line(&line).await;

        self.record(TransactionType::TrustLineUpdate, initiator, &line).await?;
        self.events
            .publish_in_tx(
                EventType::TrustlineUpdated,
                initiator,
                None,
                &correlation,
                serde_json::json!({
                    "from": line.from.to_b58(),
                    "to": line.to.to_b58(),
                    "equivalent": line.equivalent.as_str(),
                    "limit": line.limit.to_string(),
                }),
            )
            .await?;

        info!(from = %line.from, to = %line.to, equivalent = %line.equivalent, "trust line updated");
        Ok(line)
    }

    /// Close an active line. Fails with `TrustLineHasDebt` if the
    /// dependent debt is nonzero.
    pub async fn close(
        &self,
        request: TrustLineClosePayload,
        initiator: Pid,
        correlation: Correlation,
    ) -> Result<TrustLine, HubError> {
        let line = self.storage.close_trust_line(&request.equivalent, &request.from, &request.to).await?;
        self.graph.upsert_trust_line(&line).await;

        self.record(TransactionType::TrustLineClose, initiator, &line).await?;
        self.events
            .publish_in_tx(
                EventType::TrustlineClosed,
                initiator,
                None,
                &correlation,
                serde_json::json!({
                    "from": line.from.to_b58(),
                    "to": line.to.to_b58(),
                    "equivalent": line.equivalent.as_str(),
                }),
            )
            .await?;

        info!(from = %line.from, to = %line.to, equivalent = %line.equivalent, "trust line closed");
        Ok(line)
    }

    /// Every create/update/close is single-lock and atomic, so the
    /// transaction row is always written in its terminal `Committed`
    /// state — there is no PREPARED phase to pass through, unlike
    /// `PaymentEngine`'s routed 2PC.
    async fn record(&self, tx_type: TransactionType, initiator: Pid, line: &TrustLine) -> Result<(), HubError> {
        let now = chrono::Utc::now();
        let tx = Transaction {
            tx_id: TxId::new_v4(),
            tx_type,
            initiator,
            payload: serde_json::to_value(line).map_err(|e| HubError::InternalError(e.to_string()))?,
            signatures: vec![],
            state: TransactionState::Committed,
            created_at: now,
            updated_at: now,
        };
        self.storage.put_transaction(&tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::types::{Amount, EquivalentCode};
    use hub_events::StorageEventBus;
    use hub_storage::SledStorage;
    use std::collections::BTreeSet;

    fn pid(b: u8) -> Pid {
        Pid::from_public_key_bytes(&[b; 32])
    }

    fn equiv() -> EquivalentCode {
        EquivalentCode::parse("UAH").unwrap()
    }

    fn harness(name: &str) -> (TrustLineEngine, Arc<dyn StorageContract>, Arc<GraphIndex>) {
        let dir = std::env::temp_dir().join(format!("hub_registry_trustline_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        let storage: Arc<dyn StorageContract> = Arc::new(SledStorage::open(&dir).expect("open sled store"));
        let graph = Arc::new(GraphIndex::new());
        let events: Arc<dyn EventBus> = Arc::new(StorageEventBus::new(storage.clone()));
        let engine = TrustLineEngine::new(storage.clone(), graph.clone(), events);
        (engine, storage, graph)
    }

    fn create_request(from: Pid, to: Pid, limit: &str) -> TrustLineCreatePayload {
        TrustLineCreatePayload {
            from,
            to,
            equivalent: equiv(),
            limit: limit.parse().unwrap(),
            auto_clearing: true,
            can_be_intermediate: true,
            blocked: BTreeSet::new(),
            daily_limit: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_persists_updates_graph_and_emits() {
        let (engine, storage, graph) = harness("create");
        let (a, b) = (pid(1), pid(2));

        engine.create(create_request(a, b, "100"), a, Correlation::default()).await.unwrap();

        let line = storage.get_trust_line(&equiv(), &a, &b).await.unwrap().unwrap();
        assert_eq!(line.limit, "100".parse::<Amount>().unwrap());
        assert_eq!(graph.available_credit(&equiv(), b, a).await, Some("100".parse().unwrap()));

        let events = storage.list_recent_events(10).await.unwrap();
        assert_eq!(events[0].event_type.wire_name(), "trustline.created");
    }

    #[tokio::test]
    async fn create_rejects_duplicate_active_line() {
        let (engine, _storage, _graph) = harness("duplicate");
        let (a, b) = (pid(3), pid(4));
        engine.create(create_request(a, b, "100"), a, Correlation::default()).await.unwrap();

        let err = engine.create(create_request(a, b, "50"), a, Correlation::default()).await.unwrap_err();
        assert!(matches!(err, HubError::TrustLineExists { .. }));
    }

    #[tokio::test]
    async fn update_rejects_limit_below_debt_without_locking() {
        let (engine, storage, _graph) = harness("update_reject");
        let (a, b) = (pid(5), pid(6));
        engine.create(create_request(a, b, "100"), a, Correlation::default()).await.unwrap();
        storage.apply_direct_delta(&equiv(), &b, &a, "40".parse().unwrap()).await.unwrap();

        let payload = TrustLineUpdatePayload {
            from: a,
            to: b,
            equivalent: equiv(),
            limit: Some("10".parse().unwrap()),
            auto_clearing: None,
            can_be_intermediate: None,
            blocked: None,
            daily_limit: None,
            timestamp: chrono::Utc::now(),
        };
        let err = engine.update(payload, a, Correlation::default()).await.unwrap_err();
        assert!(matches!(err, HubError::TrustLimitExceeded { .. }));
        assert!(!storage.is_integrity_locked(&equiv()).await.unwrap(), "a rejected update must not lock the equivalent");

        let line = storage.get_trust_line(&equiv(), &a, &b).await.unwrap().unwrap();
        assert_eq!(line.limit, "100".parse::<Amount>().unwrap());
    }

    #[tokio::test]
    async fn close_rejects_outstanding_debt_then_succeeds_once_cleared() {
        let (engine, storage, graph) = harness("close");
        let (a, b) = (pid(7), pid(8));
        engine.create(create_request(a, b, "100"), a, Correlation::default()).await.unwrap();
        storage.apply_direct_delta(&equiv(), &b, &a, "30".parse().unwrap()).await.unwrap();

        let close_request = TrustLineClosePayload { from: a, to: b, equivalent: equiv(), timestamp: chrono::Utc::now() };
        let err = engine.close(close_request.clone(), a, Correlation::default()).await.unwrap_err();
        assert!(matches!(err, HubError::TrustLineHasDebt { .. }));

        storage.apply_direct_delta(&equiv(), &a, &b, "30".parse().unwrap()).await.unwrap();
        let closed = engine.close(close_request, a, Correlation::default()).await.unwrap();
        assert!(matches!(closed.status, TrustLineStatus::Closed));
        assert_eq!(graph.available_credit(&equiv(), b, a).await, None);
    }
}
