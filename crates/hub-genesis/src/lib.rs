//! Bootstrap (SPEC_FULL.md §4.9): writes the initial equivalent(s) and
//! one admin participant directly through [`StorageContract`], bypassing
//! every engine, the way the teacher's `chronx-genesis` writes accounts
//! directly into `StateDb` — "genesis transactions have no parents and
//! no signatures to check". Unlike the teacher's crate this allocates no
//! supply: a mutual-credit hub has nothing to pre-mint, only an admin
//! identity and a unit of account for participants to extend trust in.

use hub_core::error::HubError;
use hub_core::model::{Equivalent, Participant};
use hub_core::types::{EquivalentCode, EquivalentKind, ParticipantStatus, Pid};
use hub_storage::StorageContract;
use tracing::info;

/// One equivalent to seed at genesis.
#[derive(Debug, Clone)]
pub struct EquivalentSeed {
    pub code: EquivalentCode,
    pub precision: u8,
    pub kind: EquivalentKind,
}

/// Operator-supplied genesis parameters. The admin key is supplied by the
/// operator, never generated on the node (SPEC_FULL.md §4.9).
#[derive(Debug, Clone)]
pub struct GenesisParams {
    pub admin_public_key: [u8; 32],
    pub equivalents: Vec<EquivalentSeed>,
}

#[derive(Debug, Clone)]
pub struct GenesisOutcome {
    pub admin_pid: Pid,
    pub equivalents: Vec<EquivalentCode>,
}

/// Apply genesis once. Refuses to run against a database that already
/// has at least one equivalent — this workspace's analogue of the
/// teacher's "panics if the DB isn't empty", except a config/ops mistake
/// here should be a recoverable error, not a process abort.
pub async fn apply_genesis(
    storage: &dyn StorageContract,
    params: &GenesisParams,
) -> Result<GenesisOutcome, HubError> {
    if !storage.list_equivalents().await?.is_empty() {
        return Err(HubError::ValidationError(
            "genesis may only be applied to a database with no equivalents".into(),
        ));
    }
    if params.equivalents.is_empty() {
        return Err(HubError::ValidationError("genesis requires at least one equivalent".into()));
    }

    let admin_pid = Pid::from_public_key_bytes(&params.admin_public_key);
    let now = chrono::Utc::now();

    storage
        .put_participant(&Participant {
            pid: admin_pid,
            public_key: params.admin_public_key,
            status: ParticipantStatus::Active,
            verification_level: u8::MAX,
            profile: serde_json::json!({"role": "admin"}),
            created_at: now,
        })
        .await?;
    info!(admin_pid = %admin_pid, "genesis: admin participant created");

    let mut codes = Vec::with_capacity(params.equivalents.len());
    for seed in &params.equivalents {
        storage
            .put_equivalent(&Equivalent {
                code: seed.code.clone(),
                precision: seed.precision,
                kind: seed.kind,
                active: true,
                created_at: now,
            })
            .await?;
        info!(equivalent = %seed.code, precision = seed.precision, "genesis: equivalent created");
        codes.push(seed.code.clone());
    }

    Ok(GenesisOutcome { admin_pid, equivalents: codes })
}
