//! `HubConfig`: the enumerated, range-validated option set from
//! SPEC_FULL.md §9. Loading this shape from a file/env/admin API is the
//! excluded "configuration loading" concern (§1) — this struct only
//! defines and validates the shape, the way the teacher's `Args`/
//! `P2pConfig` define shape while `clap` does the loading.

use crate::constants::*;
use crate::error::HubError;
use crate::types::{Amount, Pid};
use serde::{Deserialize, Serialize};

/// Routing options (`routing.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// `[1..8]`, hard cap `MAX_PATH_LENGTH_CAP`. Runtime-mutable.
    #[serde(default = "default_max_path_length")]
    pub max_path_length: u8,
    /// `[1..10]`. Runtime-mutable.
    #[serde(default = "default_max_paths_per_payment")]
    pub max_paths_per_payment: u8,
    #[serde(default = "default_routing_timeout_ms")]
    pub routing_timeout_ms: u64,
    /// Enables Edmonds-Karp max-flow feasibility/decomposition (§4.4 step 4).
    #[serde(default)]
    pub large_payment_mode_default: bool,
}

fn default_max_path_length() -> u8 {
    DEFAULT_MAX_PATH_LENGTH
}
fn default_max_paths_per_payment() -> u8 {
    DEFAULT_MAX_PATHS_PER_PAYMENT
}
fn default_routing_timeout_ms() -> u64 {
    DEFAULT_ROUTING_TIMEOUT_MS
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            max_path_length: default_max_path_length(),
            max_paths_per_payment: default_max_paths_per_payment(),
            routing_timeout_ms: default_routing_timeout_ms(),
            large_payment_mode_default: false,
        }
    }
}

impl RoutingConfig {
    /// Requires restart (not runtime-mutable): the hard cap itself. Everything
    /// else here is validated but may be changed live.
    pub fn validate(&self) -> Result<(), HubError> {
        if !(1..=MAX_PATH_LENGTH_CAP).contains(&self.max_path_length) {
            return Err(HubError::ValidationError(format!(
                "routing.max_path_length must be in [1,{}], got {}",
                MAX_PATH_LENGTH_CAP, self.max_path_length
            )));
        }
        if !(1..=MAX_PATHS_PER_PAYMENT_CAP).contains(&self.max_paths_per_payment) {
            return Err(HubError::ValidationError(format!(
                "routing.max_paths_per_payment must be in [1,{}], got {}",
                MAX_PATHS_PER_PAYMENT_CAP, self.max_paths_per_payment
            )));
        }
        Ok(())
    }
}

/// Payment / 2PC options (`payment.*`). Runtime-mutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    #[serde(default = "default_prepare_timeout_ms")]
    pub prepare_timeout_ms: u64,
    #[serde(default = "default_prepare_max_retries")]
    pub prepare_max_retries: u8,
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,
    #[serde(default = "default_commit_max_retries")]
    pub commit_max_retries: u8,
    #[serde(default = "default_overall_timeout_ms")]
    pub overall_timeout_ms: u64,
}

fn default_prepare_timeout_ms() -> u64 {
    DEFAULT_PREPARE_TIMEOUT_MS
}
fn default_prepare_max_retries() -> u8 {
    DEFAULT_PREPARE_MAX_RETRIES
}
fn default_commit_timeout_ms() -> u64 {
    DEFAULT_COMMIT_TIMEOUT_MS
}
fn default_commit_max_retries() -> u8 {
    DEFAULT_COMMIT_MAX_RETRIES
}
fn default_overall_timeout_ms() -> u64 {
    DEFAULT_OVERALL_TIMEOUT_MS
}

impl Default for PaymentConfig {
    fn default() -> Self {
        PaymentConfig {
            prepare_timeout_ms: default_prepare_timeout_ms(),
            prepare_max_retries: default_prepare_max_retries(),
            commit_timeout_ms: default_commit_timeout_ms(),
            commit_max_retries: default_commit_max_retries(),
            overall_timeout_ms: default_overall_timeout_ms(),
        }
    }
}

/// Clearing options (`clearing.*`). Trigger/periodic cadences require
/// restart; thresholds are runtime-mutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearingConfig {
    /// `[3..6]`.
    #[serde(default = "default_trigger_cycles_max_length")]
    pub trigger_cycles_max_length: u8,
    #[serde(default = "default_min_clearing_amount")]
    pub min_clearing_amount: Amount,
    #[serde(default = "default_clearing_consent_window_secs")]
    pub clearing_consent_window_secs: u64,
    #[serde(default = "default_periodic_sweep_5_interval_secs")]
    pub periodic_sweep_5_interval_secs: u64,
    #[serde(default = "default_periodic_sweep_6_interval_secs")]
    pub periodic_sweep_6_interval_secs: u64,
    #[serde(default = "default_cycles_per_sweep_cap")]
    pub cycles_per_sweep_cap: usize,
}

fn default_trigger_cycles_max_length() -> u8 {
    TRIGGER_CYCLE_MAX_LENGTH
}
fn default_min_clearing_amount() -> Amount {
    DEFAULT_MIN_CLEARING_AMOUNT.parse().expect("valid decimal literal")
}
fn default_clearing_consent_window_secs() -> u64 {
    DEFAULT_CLEARING_CONSENT_WINDOW_SECS
}
fn default_periodic_sweep_5_interval_secs() -> u64 {
    PERIODIC_SWEEP_5_INTERVAL_SECS
}
fn default_periodic_sweep_6_interval_secs() -> u64 {
    PERIODIC_SWEEP_6_INTERVAL_SECS
}
fn default_cycles_per_sweep_cap() -> usize {
    256
}

impl Default for ClearingConfig {
    fn default() -> Self {
        ClearingConfig {
            trigger_cycles_max_length: default_trigger_cycles_max_length(),
            min_clearing_amount: default_min_clearing_amount(),
            clearing_consent_window_secs: default_clearing_consent_window_secs(),
            periodic_sweep_5_interval_secs: default_periodic_sweep_5_interval_secs(),
            periodic_sweep_6_interval_secs: default_periodic_sweep_6_interval_secs(),
            cycles_per_sweep_cap: default_cycles_per_sweep_cap(),
        }
    }
}

impl ClearingConfig {
    pub fn validate(&self) -> Result<(), HubError> {
        if !(TRIGGER_CYCLE_MIN_LENGTH..=PERIODIC_CYCLE_MAX_LENGTH)
            .contains(&self.trigger_cycles_max_length)
        {
            return Err(HubError::ValidationError(format!(
                "clearing.trigger_cycles_max_length must be in [3,6], got {}",
                self.trigger_cycles_max_length
            )));
        }
        Ok(())
    }
}

/// Integrity check schedule floors (`integrity.*`). Requires restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    #[serde(default = "default_zero_sum_interval_secs")]
    pub zero_sum_interval_secs: u64,
    #[serde(default = "default_trust_limit_interval_secs")]
    pub trust_limit_interval_secs: u64,
    #[serde(default = "default_debt_symmetry_interval_secs")]
    pub debt_symmetry_interval_secs: u64,
    #[serde(default = "default_checksum_interval_secs")]
    pub checksum_interval_secs: u64,
    #[serde(default = "default_full_audit_interval_secs")]
    pub full_audit_interval_secs: u64,
}

fn default_zero_sum_interval_secs() -> u64 {
    INTEGRITY_ZERO_SUM_INTERVAL_SECS
}
fn default_trust_limit_interval_secs() -> u64 {
    INTEGRITY_TRUST_LIMIT_INTERVAL_SECS
}
fn default_debt_symmetry_interval_secs() -> u64 {
    INTEGRITY_DEBT_SYMMETRY_INTERVAL_SECS
}
fn default_checksum_interval_secs() -> u64 {
    INTEGRITY_CHECKSUM_INTERVAL_SECS
}
fn default_full_audit_interval_secs() -> u64 {
    INTEGRITY_FULL_AUDIT_INTERVAL_SECS
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        IntegrityConfig {
            zero_sum_interval_secs: default_zero_sum_interval_secs(),
            trust_limit_interval_secs: default_trust_limit_interval_secs(),
            debt_symmetry_interval_secs: default_debt_symmetry_interval_secs(),
            checksum_interval_secs: default_checksum_interval_secs(),
            full_audit_interval_secs: default_full_audit_interval_secs(),
        }
    }
}

/// Top-level configuration snapshot, constructed once at startup and
/// passed explicitly to every engine (SPEC_FULL.md §9 "Global state").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub clearing: ClearingConfig,
    #[serde(default)]
    pub integrity: IntegrityConfig,
    #[serde(default = "default_max_clock_drift_seconds")]
    pub max_clock_drift_seconds: i64,
    /// Authorizes `COMPENSATION` transactions (open question (c), §9).
    pub admin_pid: Pid,
}

fn default_max_clock_drift_seconds() -> i64 {
    DEFAULT_MAX_CLOCK_DRIFT_SECS
}

impl HubConfig {
    pub fn validate(&self) -> Result<(), HubError> {
        self.routing.validate()?;
        self.clearing.validate()?;
        if self.max_clock_drift_seconds <= 0 {
            return Err(HubError::ValidationError(
                "max_clock_drift_seconds must be positive".into(),
            ));
        }
        Ok(())
    }
}
