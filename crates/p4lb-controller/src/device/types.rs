//! Device session types.

use p4lb_pipeline::TableEntry;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Default per-RPC timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Default election ID used for master arbitration.
pub const DEFAULT_ELECTION_ID: u64 = 1;

/// Static identity of a managed switch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceIdentity {
    /// Operator-facing name, e.g. "s1".
    pub name: String,
    /// Control endpoint, e.g. "127.0.0.1:50051".
    pub address: String,
    /// P4Runtime device ID.
    pub device_id: u64,
    /// Name of the pipeline profile this device runs.
    pub pipeline: String,
}

impl DeviceIdentity {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        device_id: u64,
        pipeline: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            device_id,
            pipeline: pipeline.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, device_id={})", self.name, self.address, self.device_id)
    }
}

/// Lifecycle state of a device session.
///
/// `Unclaimed → Arbitrated → PipelineInstalled → Ready`; any state may move
/// to `Closed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unclaimed,
    Arbitrated,
    PipelineInstalled,
    Ready,
    Closed,
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unclaimed => "unclaimed",
            SessionState::Arbitrated => "arbitrated",
            SessionState::PipelineInstalled => "pipeline_installed",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteKind {
    Insert,
    Modify,
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteKind::Insert => write!(f, "INSERT"),
            WriteKind::Modify => write!(f, "MODIFY"),
        }
    }
}

/// A single table write as sent to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryUpdate {
    pub kind: WriteKind,
    pub entry: TableEntry,
}

/// One cell of a counter array as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterData {
    pub index: u64,
    pub packet_count: u64,
    pub byte_count: u64,
}

/// A counter cell tagged with the counter's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSample {
    pub counter_name: String,
    pub index: u64,
    pub packet_count: u64,
    pub byte_count: u64,
}

impl CounterSample {
    pub fn new(counter_name: impl Into<String>, data: CounterData) -> Self {
        Self {
            counter_name: counter_name.into(),
            index: data.index,
            packet_count: data.packet_count,
            byte_count: data.byte_count,
        }
    }
}

impl fmt::Display for CounterSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]: {} packets, {} bytes",
            self.counter_name, self.index, self.packet_count, self.byte_count
        )
    }
}

/// Per-session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Deadline applied to every RPC (and every counter page).
    pub rpc_timeout: Duration,
    pub election_id: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            election_id: DEFAULT_ELECTION_ID,
        }
    }
}

/// Session statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub entries_inserted: u64,
    pub entries_modified: u64,
    /// INSERTs answered with AlreadyExists and re-sent as MODIFY.
    pub insert_fallbacks: u64,
    pub write_failures: u64,
    pub counter_reads: u64,
    pub timeouts: u64,
}
