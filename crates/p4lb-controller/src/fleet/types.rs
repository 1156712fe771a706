//! Fleet orchestration reports.

use p4lb_pipeline::{PipelineResult, RuleBatch};
use std::fmt;
use std::time::Duration;

use crate::device::{SessionConfig, WriteKind, DEFAULT_ELECTION_ID, DEFAULT_RPC_TIMEOUT};
use crate::error::ControlResult;

/// Default number of devices driven at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Fleet orchestrator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetOrchConfig {
    pub rpc_timeout: Duration,
    /// Upper bound on devices bootstrapped or written concurrently.
    pub max_concurrency: usize,
    pub election_id: u64,
}

impl Default for FleetOrchConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            election_id: DEFAULT_ELECTION_ID,
        }
    }
}

impl FleetOrchConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            rpc_timeout: self.rpc_timeout,
            election_id: self.election_id,
        }
    }
}

/// Fleet orchestrator statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetOrchStats {
    pub devices_ready: u64,
    pub devices_failed: u64,
    pub rules_applied: u64,
    pub rules_failed: u64,
    pub batches_failed: u64,
}

/// Bootstrap outcome of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBootstrap {
    pub device: String,
    pub result: ControlResult<()>,
}

/// Bootstrap outcome of the whole fleet, in configured device order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub devices: Vec<DeviceBootstrap>,
    /// True if the bootstrap was cancelled before every device finished.
    pub cancelled: bool,
}

impl BootstrapReport {
    /// Names of devices that reached `Ready`.
    pub fn ready(&self) -> Vec<&str> {
        self.devices
            .iter()
            .filter(|d| d.result.is_ok())
            .map(|d| d.device.as_str())
            .collect()
    }

    /// Devices that failed, with their errors.
    pub fn failed(&self) -> Vec<&DeviceBootstrap> {
        self.devices.iter().filter(|d| d.result.is_err()).collect()
    }

    pub fn all_ready(&self) -> bool {
        !self.cancelled && self.devices.iter().all(|d| d.result.is_ok())
    }

    pub fn get(&self, device: &str) -> Option<&DeviceBootstrap> {
        self.devices.iter().find(|d| d.device == device)
    }
}

/// Outcome of one rule record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    /// Position of the record in its batch.
    pub index: usize,
    /// Table and action names as written in the record, when present.
    pub table: Option<String>,
    pub action: Option<String>,
    pub result: ControlResult<WriteKind>,
}

impl RuleOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for RuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rule #{} {} -> {}: ",
            self.index,
            self.table.as_deref().unwrap_or("?"),
            self.action.as_deref().unwrap_or("?")
        )?;
        match &self.result {
            Ok(kind) => write!(f, "ok ({})", kind),
            Err(e) => write!(f, "FAILED: {}", e),
        }
    }
}

/// A rule batch destined for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRuleSet {
    pub device: String,
    /// Where the batch came from (usually a file path).
    pub source: String,
    /// The parsed batch, or why it could not be read.
    pub batch: PipelineResult<RuleBatch>,
}

/// Outcome of applying one rule batch to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub device: String,
    pub source: String,
    /// Per-record outcomes, or the batch-level error that prevented
    /// applying any record.
    pub result: ControlResult<Vec<RuleOutcome>>,
}

impl ApplyReport {
    /// True if the batch was applied and every record succeeded.
    pub fn is_clean(&self) -> bool {
        matches!(&self.result, Ok(outcomes) if outcomes.iter().all(RuleOutcome::is_ok))
    }

    /// Number of failed records; a batch-level failure counts as one.
    pub fn failure_count(&self) -> usize {
        match &self.result {
            Ok(outcomes) => outcomes.iter().filter(|o| !o.is_ok()).count(),
            Err(_) => 1,
        }
    }
}

/// Outcome of a full fleet run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetReport {
    pub bootstrap: BootstrapReport,
    pub applies: Vec<ApplyReport>,
    pub cancelled: bool,
}

impl FleetReport {
    /// True if any device failed to reach `Ready`, any batch or rule failed,
    /// or the run was cancelled.
    pub fn has_failures(&self) -> bool {
        self.cancelled || !self.bootstrap.all_ready() || self.applies.iter().any(|a| !a.is_clean())
    }
}
