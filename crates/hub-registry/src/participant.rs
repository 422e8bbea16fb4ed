//! Participant registration (SPEC_FULL.md §2 "registration", §4.8
//! `participant.created`). Grounded in `hub-genesis::apply_genesis`'s
//! admin-row write — same `Pid::from_public_key_bytes` derivation and
//! `Participant` shape — minus the "database must be empty" guard,
//! since ordinary registration is expected to run for every new member.

use hub_core::error::HubError;
use hub_core::model::{EventType, Participant};
use hub_core::types::{ParticipantStatus, Pid};
use hub_events::{Correlation, EventBus};
use hub_storage::StorageContract;
use std::sync::Arc;
use tracing::info;

pub struct ParticipantRegistry {
    storage: Arc<dyn StorageContract>,
    events: Arc<dyn EventBus>,
}

impl ParticipantRegistry {
    pub fn new(storage: Arc<dyn StorageContract>, events: Arc<dyn EventBus>) -> Self {
        ParticipantRegistry { storage, events }
    }

    /// Register a participant from their public key. Idempotent on the
    /// derived PID: a second registration of the same key returns the
    /// existing row and does not re-emit `participant.created` — a
    /// profile change is a separate, owner-signed update, not a
    /// re-registration.
    pub async fn register(
        &self,
        public_key: [u8; 32],
        profile: serde_json::Value,
        correlation: &Correlation,
    ) -> Result<Participant, HubError> {
        let pid = Pid::from_public_key_bytes(&public_key);
        if let Some(existing) = self.storage.get_participant(&pid).await? {
            return Ok(existing);
        }

        let participant = Participant {
            pid,
            public_key,
            status: ParticipantStatus::Active,
            verification_level: 0,
            profile,
            created_at: chrono::Utc::now(),
        };
        self.storage.put_participant(&participant).await?;

        self.events
            .publish_in_tx(
                EventType::ParticipantCreated,
                pid,
                None,
                correlation,
                serde_json::json!({"pid": pid.to_b58()}),
            )
            .await?;

        info!(pid = %pid, "participant registered");
        Ok(participant)
    }
}
