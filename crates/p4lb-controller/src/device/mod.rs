//! Per-device control sessions.
//!
//! A [`DeviceSession`] owns one switch's control connection and walks it
//! through mastership, pipeline install and steady-state writes. The wire is
//! abstracted behind [`DeviceRpc`]; [`SimulatedSwitch`] is an in-process
//! implementation and [`DumpingRpc`] records requests made through any other.

mod dump;
mod rpc;
mod session;
pub mod sim;
mod types;

pub use dump::{dump_path, DumpingRpc};
pub use rpc::{CounterPages, DeviceRpc};
pub use session::{DeviceSession, SampleStream};
pub use sim::{InFlightGauge, SimOp, SimulatedSwitch};
pub use types::{
    CounterData, CounterSample, DeviceIdentity, EntryUpdate, SessionConfig, SessionState,
    SessionStats, WriteKind, DEFAULT_ELECTION_ID, DEFAULT_RPC_TIMEOUT,
};
