//! FleetOrch - bootstrap and rule application across a fleet of switches.
//!
//! # Architecture
//!
//! ```text
//! FleetConfig ──> pipeline profiles (Arc, shared read-only)
//!      │
//!      ▼
//!   FleetOrch ──> DeviceSession (s1) ──> DeviceRpc
//!      │     ├──> DeviceSession (s2) ──> DeviceRpc
//!      │     └──> ...
//!      └──> BootstrapReport / ApplyReport (every device and rule outcome)
//! ```
//!
//! Bootstrap runs arbitration then pipeline push per device; devices that
//! fail are closed and skipped by rule application. Attach claims
//! mastership only, for devices already running their pipeline.
//! Cancellation stops every device at its current step, keeps the outcomes
//! reached so far and shuts every session down.

mod orch;
mod types;

pub use orch::FleetOrch;
pub use types::{
    ApplyReport, BootstrapReport, DeviceBootstrap, DeviceRuleSet, FleetOrchConfig,
    FleetOrchStats, FleetReport, RuleOutcome, DEFAULT_MAX_CONCURRENCY,
};
