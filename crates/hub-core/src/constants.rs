//! Protocol-wide defaults. Every value here is a *default*; the runtime
//! configuration in [`crate::config::HubConfig`] may override the
//! runtime-mutable subset (see SPEC_FULL.md §9).

// ── Routing ──────────────────────────────────────────────────────────────
/// Hard cap on hop count for any single route, regardless of config.
pub const MAX_PATH_LENGTH_CAP: u8 = 8;
pub const DEFAULT_MAX_PATH_LENGTH: u8 = 6;
pub const MAX_PATHS_PER_PAYMENT_CAP: u8 = 10;
pub const DEFAULT_MAX_PATHS_PER_PAYMENT: u8 = 3;
pub const DEFAULT_ROUTING_TIMEOUT_MS: u64 = 500;

// ── Payment / 2PC ────────────────────────────────────────────────────────
pub const DEFAULT_PREPARE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_PREPARE_MAX_RETRIES: u8 = 2;
pub const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_COMMIT_MAX_RETRIES: u8 = 3;
pub const DEFAULT_OVERALL_TIMEOUT_MS: u64 = 10_000;

// ── Clearing ─────────────────────────────────────────────────────────────
pub const TRIGGER_CYCLE_MIN_LENGTH: u8 = 3;
pub const TRIGGER_CYCLE_MAX_LENGTH: u8 = 4;
pub const PERIODIC_CYCLE_MIN_LENGTH: u8 = 5;
pub const PERIODIC_CYCLE_MAX_LENGTH: u8 = 6;
pub const CYCLE_LENGTH_CAP: u8 = 6;
pub const DEFAULT_MIN_CLEARING_AMOUNT: &str = "0.01";
pub const DEFAULT_CLEARING_CONSENT_WINDOW_SECS: u64 = 60;
pub const PERIODIC_SWEEP_5_INTERVAL_SECS: u64 = 3_600;
pub const PERIODIC_SWEEP_6_INTERVAL_SECS: u64 = 86_400;

// ── Integrity ────────────────────────────────────────────────────────────
pub const INTEGRITY_ZERO_SUM_INTERVAL_SECS: u64 = 300;
pub const INTEGRITY_TRUST_LIMIT_INTERVAL_SECS: u64 = 300;
pub const INTEGRITY_DEBT_SYMMETRY_INTERVAL_SECS: u64 = 900;
pub const INTEGRITY_CHECKSUM_INTERVAL_SECS: u64 = 3_600;
pub const INTEGRITY_FULL_AUDIT_INTERVAL_SECS: u64 = 86_400;

// ── Identity / replay guard ──────────────────────────────────────────────
pub const DEFAULT_MAX_CLOCK_DRIFT_SECS: i64 = 300;

// ── Equivalent ───────────────────────────────────────────────────────────
pub const MIN_EQUIVALENT_PRECISION: u8 = 0;
pub const MAX_EQUIVALENT_PRECISION: u8 = 8;
pub const MIN_EQUIVALENT_CODE_LEN: usize = 1;
pub const MAX_EQUIVALENT_CODE_LEN: usize = 16;

// ── Lock expiry sweep ────────────────────────────────────────────────────
pub const PREPARE_LOCK_SWEEP_INTERVAL_SECS: u64 = 1;
