//! P4lb controller
//!
//! Brings a fleet of P4Runtime switches up to a known forwarding state:
//! claims mastership on each device, installs its compiled pipeline, writes
//! the device's rule batches and reads counters back.
//!
//! - [`device`]: one control session per switch, over a pluggable transport
//! - [`fleet`]: concurrent bootstrap, rule application and shutdown
//! - [`config`]: TOML fleet description
//! - [`audit`]: structured audit records and logging setup

pub mod audit;
pub mod config;
pub mod device;
pub mod error;
pub mod fleet;

pub use audit::{init_logging, AuditCategory, AuditOutcome, AuditRecord, AuditSubject, LogFormat};
pub use config::{ConfigError, ConfigResult, DeviceConfig, FleetConfig, PipelineConfig, RuntimeConfig};
pub use device::{
    CounterSample, DeviceIdentity, DeviceRpc, DeviceSession, DumpingRpc, InFlightGauge,
    SessionConfig, SessionState, SimOp, SimulatedSwitch, WriteKind,
};
pub use error::{ControlError, ControlResult, RpcCode, RpcResult, RpcStatus};
pub use fleet::{
    ApplyReport, BootstrapReport, DeviceRuleSet, FleetOrch, FleetOrchConfig, FleetOrchStats,
    FleetReport, RuleOutcome,
};
