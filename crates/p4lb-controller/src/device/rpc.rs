//! Device transport abstraction.
//!
//! [`DeviceRpc`] is the seam between a [`DeviceSession`](super::DeviceSession)
//! and the wire. Each method maps to one P4Runtime call on the switch's
//! control endpoint; implementations report failures as [`RpcStatus`] and do
//! no retrying or state tracking of their own.

use async_trait::async_trait;
use futures::stream::BoxStream;
use p4lb_pipeline::CounterId;

use super::types::{CounterData, EntryUpdate};
use crate::error::RpcResult;

/// A stream of counter response pages.
pub type CounterPages = BoxStream<'static, RpcResult<Vec<CounterData>>>;

/// Remote calls a device session makes.
#[async_trait]
pub trait DeviceRpc: Send + Sync {
    /// Claims mastership with the given election ID.
    async fn arbitrate(&self, device_id: u64, election_id: u64) -> RpcResult<()>;

    /// Installs a forwarding pipeline (verify and commit).
    async fn push_pipeline(
        &self,
        device_id: u64,
        election_id: u64,
        schema_blob: &[u8],
        artifact: &[u8],
    ) -> RpcResult<()>;

    /// Writes one table entry.
    async fn write_table_entry(
        &self,
        device_id: u64,
        election_id: u64,
        update: &EntryUpdate,
    ) -> RpcResult<()>;

    /// Reads a counter. `index == 0` requests every cell.
    async fn read_counters(
        &self,
        device_id: u64,
        counter_id: CounterId,
        index: u64,
    ) -> RpcResult<CounterPages>;

    /// Closes the underlying connection.
    async fn close(&self) -> RpcResult<()>;
}
