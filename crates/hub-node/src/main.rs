//! hub-node — the mutual-credit hub coordinator binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the state database
//!   2. Apply genesis if the DB has no equivalents yet
//!   3. Rebuild the in-memory graph index from storage
//!   4. Spawn the background workers: prepare-lock expiry sweep, periodic
//!      clearing sweeps, consent-round expiry sweep, and the integrity
//!      check schedule
//!
//! There is no transport layer here — no P2P, no RPC server. Ingress
//! (submitting a `PaymentRequestPayload`, a trust line change, a
//! `CLEARING_ACCEPT`/`REJECT`) is someone else's problem; this binary
//! only owns the engines and the clock-driven maintenance that has to
//! run regardless of whether anything is currently being submitted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use hub_clearing::ClearingEngine;
use hub_core::types::Pid;
use hub_core::{HubConfig, PREPARE_LOCK_SWEEP_INTERVAL_SECS};
use hub_events::{Correlation, EventBus, StorageEventBus};
use hub_genesis::{apply_genesis, EquivalentSeed, GenesisParams};
use hub_graph::GraphIndex;
use hub_integrity::IntegrityChecker;
use hub_payment::PaymentEngine;
use hub_registry::{ParticipantRegistry, TrustLineEngine};
use hub_storage::{SledStorage, StorageContract};

#[derive(Parser, Debug)]
#[command(
    name = "hub-node",
    version,
    about = "Mutual-credit hub coordinator — trust-line graph, 2PC payments, cycle clearing"
)]
struct Args {
    /// Directory for the persistent state database.
    #[arg(long, default_value = "~/.hub/data")]
    data_dir: PathBuf,

    /// Hex-encoded Ed25519 public key authorized to sign COMPENSATION
    /// transactions and to run genesis.
    #[arg(long)]
    admin_pubkey: String,

    /// Path to genesis params JSON (only required on first run against a
    /// fresh database — one equivalent seed per entry).
    #[arg(long)]
    genesis_params: Option<PathBuf>,
}

/// On-disk shape of `--genesis-params`: the equivalents to seed. The
/// admin key always comes from `--admin-pubkey`, never from this file,
/// so genesis and every later COMPENSATION share one authority.
#[derive(Debug, serde::Deserialize)]
struct GenesisParamsFile {
    equivalents: Vec<GenesisEquivalentFile>,
}

#[derive(Debug, serde::Deserialize)]
struct GenesisEquivalentFile {
    code: String,
    precision: u8,
    kind: hub_core::types::EquivalentKind,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hub=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("hub-node starting");

    // ── Admin identity ──────────────────────────────────────────────────────
    let admin_public_key = parse_pubkey_hex(&args.admin_pubkey).context("parsing --admin-pubkey")?;
    let admin_pid = Pid::from_public_key_bytes(&admin_public_key);

    // ── State database ──────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let storage: Arc<dyn StorageContract> =
        Arc::new(SledStorage::open(&data_dir).context("opening state database")?);

    // ── Genesis if fresh ─────────────────────────────────────────────────────
    if storage.list_equivalents().await?.is_empty() {
        info!("fresh database — applying genesis");
        let params = load_genesis_params(args.genesis_params.as_deref(), admin_public_key)
            .context("loading genesis params")?;
        let outcome = apply_genesis(storage.as_ref(), &params).await.context("applying genesis")?;
        info!(admin_pid = %outcome.admin_pid, equivalents = ?outcome.equivalents, "genesis applied");
    } else {
        info!("existing database found — skipping genesis");
    }

    let equivalents = storage.list_equivalents().await?;
    if equivalents.is_empty() {
        anyhow::bail!("no equivalents configured after genesis check — refusing to start");
    }

    // ── Config ───────────────────────────────────────────────────────────────
    let config = default_config(admin_pid);
    config.validate().context("validating hub configuration")?;

    // ── Graph index ──────────────────────────────────────────────────────────
    let graph = Arc::new(GraphIndex::new());
    for equivalent in &equivalents {
        graph.rebuild(&equivalent.code, storage.as_ref()).await.context("rebuilding graph index")?;
    }
    info!(count = equivalents.len(), "graph index rebuilt");

    // ── Engines ──────────────────────────────────────────────────────────────
    let events: Arc<dyn EventBus> = Arc::new(StorageEventBus::new(Arc::clone(&storage)));
    let _payment = Arc::new(PaymentEngine::new(
        Arc::clone(&storage),
        Arc::clone(&graph),
        Arc::clone(&events),
        config.clone(),
    ));
    let clearing = Arc::new(ClearingEngine::new(
        Arc::clone(&storage),
        Arc::clone(&graph),
        Arc::clone(&events),
        config.clearing.clone(),
    ));
    let integrity = Arc::new(IntegrityChecker::new(Arc::clone(&storage), Arc::clone(&events)));
    let _registry = Arc::new(ParticipantRegistry::new(Arc::clone(&storage), Arc::clone(&events)));
    let _trust_lines = Arc::new(TrustLineEngine::new(Arc::clone(&storage), Arc::clone(&graph), Arc::clone(&events)));

    let equivalent_codes: Vec<_> = equivalents.iter().map(|e| e.code.clone()).collect();

    spawn_prepare_lock_sweep(Arc::clone(&storage), Arc::clone(&graph));
    spawn_clearing_sweeps(Arc::clone(&clearing), equivalent_codes.clone(), &config);
    spawn_consent_sweep(Arc::clone(&clearing));
    spawn_integrity_schedule(Arc::clone(&integrity), equivalent_codes, &config);

    info!("hub-node ready — payment ingress is driven by the caller, not this binary");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received, exiting");
    Ok(())
}

/// A starter config: everything but `admin_pid` at its spec default.
/// Loading a full config from file/env is the excluded "configuration
/// loading" concern — this binary only needs a complete, valid shape.
fn default_config(admin_pid: Pid) -> HubConfig {
    HubConfig {
        routing: Default::default(),
        payment: Default::default(),
        clearing: Default::default(),
        integrity: Default::default(),
        max_clock_drift_seconds: hub_core::DEFAULT_MAX_CLOCK_DRIFT_SECS,
        admin_pid,
    }
}

/// Every `PrepareLock` whose window elapsed releases its graph
/// reservation and is dropped from storage, at the §5 floor interval.
fn spawn_prepare_lock_sweep(storage: Arc<dyn StorageContract>, graph: Arc<GraphIndex>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(PREPARE_LOCK_SWEEP_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            match storage.sweep_expired_prepare_locks(now).await {
                Ok(expired) if !expired.is_empty() => {
                    for lock in &expired {
                        graph.release(&lock.equivalent, lock.debtor, lock.creditor, lock.delta).await;
                    }
                    warn!(count = expired.len(), "expired prepare locks swept");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "prepare lock sweep failed"),
            }
        }
    });
}

/// One background task per periodic cycle length (5 and 6), mirroring the
/// teacher's one-task-per-concern `tokio::spawn` pattern rather than a
/// single loop juggling multiple cadences.
fn spawn_clearing_sweeps(clearing: Arc<ClearingEngine>, equivalents: Vec<hub_core::types::EquivalentCode>, config: &HubConfig) {
    let lengths = [(5u8, config.clearing.periodic_sweep_5_interval_secs), (6u8, config.clearing.periodic_sweep_6_interval_secs)];
    for (len, interval_secs) in lengths {
        let clearing = Arc::clone(&clearing);
        let equivalents = equivalents.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                for equivalent in &equivalents {
                    let correlation = Correlation {
                        run_id: None,
                        scenario_id: None,
                        request_id: format!("periodic-clearing-{len}"),
                    };
                    match clearing.sweep_periodic(equivalent, len, &correlation).await {
                        Ok(outcomes) if !outcomes.is_empty() => {
                            info!(equivalent = %equivalent, len, count = outcomes.len(), "periodic clearing sweep found cycles");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(equivalent = %equivalent, len, error = %e, "periodic clearing sweep failed"),
                    }
                }
            }
        });
    }
}

/// Expired `CLEARING_PROPOSE` rounds abort on their own schedule,
/// independent of any triggered or periodic sweep.
fn spawn_consent_sweep(clearing: Arc<ClearingEngine>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            ticker.tick().await;
            let correlation = Correlation { run_id: None, scenario_id: None, request_id: "consent-sweep".into() };
            match clearing.sweep_expired_consents(&correlation).await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "expired consent rounds aborted"),
                Err(e) => warn!(error = %e, "consent sweep failed"),
            }
        }
    });
}

/// One task per check, each on its own spec-mandated floor interval, the
/// cheapest checks ticking most often and the full audit least.
fn spawn_integrity_schedule(checker: Arc<IntegrityChecker>, equivalents: Vec<hub_core::types::EquivalentCode>, config: &HubConfig) {
    let schedule = [
        ("zero_sum", config.integrity.zero_sum_interval_secs),
        ("trust_limits", config.integrity.trust_limit_interval_secs),
        ("debt_symmetry", config.integrity.debt_symmetry_interval_secs),
        ("checksum", config.integrity.checksum_interval_secs),
        ("full_audit", config.integrity.full_audit_interval_secs),
    ];
    for (check, interval_secs) in schedule {
        let checker = Arc::clone(&checker);
        let equivalents = equivalents.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                for equivalent in &equivalents {
                    let correlation =
                        Correlation { run_id: None, scenario_id: None, request_id: format!("integrity-{check}") };
                    let result = match check {
                        "zero_sum" => checker.check_zero_sum(equivalent, &correlation).await,
                        "trust_limits" => checker.check_trust_limits(equivalent, &correlation).await,
                        "debt_symmetry" => checker.check_debt_symmetry(equivalent, &correlation).await,
                        "checksum" => checker.run_checksum(equivalent).await.map(|_| ()),
                        "full_audit" => checker.run_full_audit(equivalent, &correlation).await,
                        _ => unreachable!(),
                    };
                    if let Err(e) = result {
                        warn!(equivalent = %equivalent, check, error = %e, "integrity check failed to run");
                    }
                }
            }
        });
    }
}

fn parse_pubkey_hex(s: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = hex::decode(s).context("invalid hex")?;
    bytes.try_into().map_err(|v: Vec<u8>| anyhow::anyhow!("expected 32 bytes, got {}", v.len()))
}

fn load_genesis_params(path: Option<&Path>, admin_public_key: [u8; 32]) -> anyhow::Result<GenesisParams> {
    let Some(path) = path else {
        anyhow::bail!("--genesis-params is required on first run against a fresh database");
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading genesis params from {}", path.display()))?;
    let file: GenesisParamsFile = serde_json::from_str(&json).context("parsing genesis params JSON")?;
    let equivalents = file
        .equivalents
        .into_iter()
        .map(|e| {
            Ok(EquivalentSeed {
                code: hub_core::types::EquivalentCode::parse(&e.code)
                    .map_err(|err| anyhow::anyhow!("invalid equivalent code {}: {err}", e.code))?,
                precision: e.precision,
                kind: e.kind,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(GenesisParams { admin_public_key, equivalents })
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
