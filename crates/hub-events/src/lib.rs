//! Event bus / audit log (SPEC_FULL.md §4.8). `publish_in_tx` is only
//! ever called from inside an already-open storage transaction, so the
//! event row and the mutation it describes land atomically — the same
//! "no lost writes" property the teacher gets from writing a vertex and
//! its account deltas in one `apply()` call.

use async_trait::async_trait;
use hub_core::error::HubError;
use hub_core::model::{Event, EventType};
use hub_core::types::{EventId, Pid, TxId};
use hub_storage::StorageContract;
use std::sync::Arc;
use tracing::info;

/// Correlation identifiers carried from ingress through every cascading
/// event (SPEC_FULL.md §4.8, §6).
#[derive(Debug, Clone, Default)]
pub struct Correlation {
    pub run_id: Option<String>,
    pub scenario_id: Option<String>,
    pub request_id: String,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish_in_tx(
        &self,
        event_type: EventType,
        actor: Pid,
        tx_id: Option<TxId>,
        correlation: &Correlation,
        payload: serde_json::Value,
    ) -> Result<(), HubError>;
}

/// Default implementation: appends to the storage `events` tree and emits
/// a structured `tracing` log line, mirroring the way every module in
/// this workspace logs through `tracing` rather than ad hoc `println!`.
pub struct StorageEventBus {
    storage: Arc<dyn StorageContract>,
}

impl StorageEventBus {
    pub fn new(storage: Arc<dyn StorageContract>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl EventBus for StorageEventBus {
    async fn publish_in_tx(
        &self,
        event_type: EventType,
        actor: Pid,
        tx_id: Option<TxId>,
        correlation: &Correlation,
        payload: serde_json::Value,
    ) -> Result<(), HubError> {
        let event = Event {
            event_id: EventId::new_v4(),
            event_type,
            timestamp: chrono::Utc::now(),
            run_id: correlation.run_id.clone(),
            scenario_id: correlation.scenario_id.clone(),
            request_id: correlation.request_id.clone(),
            tx_id,
            actor,
            payload,
        };
        self.storage.append_event(&event).await?;
        info!(
            event_id = %event.event_id,
            event_type = event.event_type.wire_name(),
            tx_id = ?tx_id.map(|t| t.to_string()),
            request_id = %correlation.request_id,
            "domain event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_storage::SledStorage;

    fn temp_store(name: &str) -> SledStorage {
        let dir = std::env::temp_dir().join(format!("hub_events_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        SledStorage::open(&dir).expect("open sled store")
    }

    #[tokio::test]
    async fn publish_appends_retrievable_event() {
        let storage: Arc<dyn StorageContract> = Arc::new(temp_store("publish"));
        let bus = StorageEventBus::new(storage.clone());
        let actor = Pid::from_public_key_bytes(&[1u8; 32]);
        let correlation = Correlation { request_id: "req-1".into(), ..Default::default() };

        bus.publish_in_tx(
            EventType::PaymentCommitted,
            actor,
            Some(TxId::new_v4()),
            &correlation,
            serde_json::json!({"amount": "10"}),
        )
        .await
        .unwrap();

        let events = storage.list_recent_events(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type.wire_name(), "payment.committed");
        assert_eq!(events[0].request_id, "req-1");
    }
}
