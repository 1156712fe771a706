//! In-process simulated switch.
//!
//! [`SimulatedSwitch`] implements [`DeviceRpc`] with the same ordering rules a
//! P4Runtime server enforces: writes need mastership and an installed
//! pipeline, INSERT of an existing key is `ALREADY_EXISTS`, MODIFY of a
//! missing key is `NOT_FOUND`. Faults and latency can be injected per
//! operation for testing failure handling.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use p4lb_pipeline::{CounterId, PipelineSchema, TableEntry, TableId};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::rpc::{CounterPages, DeviceRpc};
use super::types::{CounterData, EntryUpdate, WriteKind};
use crate::error::{RpcResult, RpcStatus};

/// Default number of counter cells per response page.
pub const DEFAULT_PAGE_SIZE: usize = 4;

/// RPC kinds, for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Arbitrate,
    SetPipeline,
    Write,
    ReadCounters,
    Close,
}

/// Counts RPCs in progress and remembers the highest count seen. One gauge
/// may be shared by several switches to observe fleet-wide concurrency.
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn track(&self) -> InFlight<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }
}

struct InFlight<'a>(&'a InFlightGauge);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct SimState {
    master: Option<u64>,
    pipeline: Option<PipelineSchema>,
    entries: Vec<TableEntry>,
    defaults: HashMap<TableId, TableEntry>,
    counters: BTreeMap<(u32, u64), (u64, u64)>,
    faults: HashMap<SimOp, VecDeque<RpcStatus>>,
    latency: HashMap<SimOp, Duration>,
    calls: HashMap<SimOp, usize>,
    ignore_counter_index: bool,
    closed: bool,
}

/// A simulated P4Runtime switch.
#[derive(Debug)]
pub struct SimulatedSwitch {
    device_id: u64,
    page_size: usize,
    in_flight: Arc<InFlightGauge>,
    state: Mutex<SimState>,
}

fn same_key(a: &TableEntry, b: &TableEntry) -> bool {
    a.table_id == b.table_id && a.match_key == b.match_key && a.priority == b.priority
}

impl SimulatedSwitch {
    pub fn new(device_id: u64) -> Self {
        Self {
            device_id,
            page_size: DEFAULT_PAGE_SIZE,
            in_flight: Arc::new(InFlightGauge::default()),
            state: Mutex::new(SimState::default()),
        }
    }

    /// Starts the switch with `schema` already running, as left behind by an
    /// earlier controller. Mastership is still unclaimed.
    pub fn with_pipeline(self, schema: PipelineSchema) -> Self {
        self.lock().pipeline = Some(schema);
        self
    }

    /// Reports in-flight RPCs to `gauge` instead of a private one.
    pub fn with_in_flight_gauge(mut self, gauge: Arc<InFlightGauge>) -> Self {
        self.in_flight = gauge;
        self
    }

    /// Sets the number of counter cells per response page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a one-shot failure for the next call of `op`.
    pub fn inject_fault(&self, op: SimOp, status: RpcStatus) {
        self.lock().faults.entry(op).or_default().push_back(status);
    }

    /// Delays every call of `op` by `latency`.
    pub fn set_latency(&self, op: SimOp, latency: Duration) {
        self.lock().latency.insert(op, latency);
    }

    /// Sets one counter cell.
    pub fn set_counter(&self, counter_id: u32, index: u64, packets: u64, bytes: u64) {
        self.lock().counters.insert((counter_id, index), (packets, bytes));
    }

    /// Makes counter reads answer with every cell whatever index was asked
    /// for, like a target without single-cell reads.
    pub fn ignore_counter_index(&self) {
        self.lock().ignore_counter_index = true;
    }

    /// Highest number of RPCs seen in progress at once on this switch's gauge.
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }

    /// Number of calls of `op` received, including failed ones.
    pub fn rpc_count(&self, op: SimOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn master_election_id(&self) -> Option<u64> {
        self.lock().master
    }

    pub fn pipeline_installed(&self) -> bool {
        self.lock().pipeline.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of keyed entries installed.
    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Keyed entries, in insertion order.
    pub fn entries(&self) -> Vec<TableEntry> {
        self.lock().entries.clone()
    }

    /// The default entry written for a table, if any.
    pub fn default_entry(&self, table_id: TableId) -> Option<TableEntry> {
        self.lock().defaults.get(&table_id).cloned()
    }

    /// Records the call, applies latency and returns a queued fault or a
    /// connection error if the switch was closed.
    async fn enter(&self, op: SimOp, device_id: u64) -> RpcResult<()> {
        let _in_flight = self.in_flight.track();
        let latency = {
            let mut state = self.lock();
            *state.calls.entry(op).or_insert(0) += 1;
            state.latency.get(&op).copied()
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if let Some(status) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            debug!(device_id = self.device_id, ?op, %status, "Injected fault");
            return Err(status);
        }
        if state.closed && op != SimOp::Close {
            return Err(RpcStatus::unavailable("connection closed"));
        }
        if device_id != self.device_id {
            return Err(RpcStatus::not_found(format!("unknown device id {}", device_id)));
        }
        Ok(())
    }

    fn check_master(state: &SimState, election_id: u64) -> RpcResult<()> {
        match state.master {
            Some(master) if master == election_id => Ok(()),
            _ => Err(RpcStatus::permission_denied(format!(
                "election id {} is not the primary",
                election_id
            ))),
        }
    }

    fn counter_size(state: &SimState, counter_id: u32) -> Option<u64> {
        let schema = state.pipeline.as_ref()?;
        let declared = schema.counters().find(|c| c.id.as_raw() == counter_id)?;
        Some(declared.size.unwrap_or_else(|| {
            state
                .counters
                .keys()
                .filter(|(id, _)| *id == counter_id)
                .map(|(_, index)| index + 1)
                .max()
                .unwrap_or(0)
        }))
    }
}

#[async_trait]
impl DeviceRpc for SimulatedSwitch {
    async fn arbitrate(&self, device_id: u64, election_id: u64) -> RpcResult<()> {
        self.enter(SimOp::Arbitrate, device_id).await?;
        let mut state = self.lock();
        match state.master {
            Some(current) if current > election_id => Err(RpcStatus::permission_denied(format!(
                "election id {} is lower than primary {}",
                election_id, current
            ))),
            _ => {
                state.master = Some(election_id);
                Ok(())
            }
        }
    }

    async fn push_pipeline(
        &self,
        device_id: u64,
        election_id: u64,
        schema_blob: &[u8],
        artifact: &[u8],
    ) -> RpcResult<()> {
        self.enter(SimOp::SetPipeline, device_id).await?;
        let mut state = self.lock();
        Self::check_master(&state, election_id)?;
        if artifact.is_empty() {
            return Err(RpcStatus::invalid_argument("empty device config"));
        }
        let schema = PipelineSchema::load(schema_blob)
            .map_err(|e| RpcStatus::invalid_argument(e.to_string()))?;
        state.pipeline = Some(schema);
        state.entries.clear();
        state.defaults.clear();
        Ok(())
    }

    async fn write_table_entry(
        &self,
        device_id: u64,
        election_id: u64,
        update: &EntryUpdate,
    ) -> RpcResult<()> {
        self.enter(SimOp::Write, device_id).await?;
        let mut state = self.lock();
        Self::check_master(&state, election_id)?;
        let known_table = match &state.pipeline {
            Some(schema) => schema.tables().any(|t| t.id == update.entry.table_id),
            None => return Err(RpcStatus::failed_precondition("no forwarding pipeline")),
        };
        if !known_table {
            return Err(RpcStatus::not_found(format!(
                "table {} does not exist",
                update.entry.table_id
            )));
        }

        let entry = &update.entry;
        if entry.is_default {
            if update.kind != WriteKind::Modify {
                return Err(RpcStatus::invalid_argument(
                    "default entries can only be modified",
                ));
            }
            state.defaults.insert(entry.table_id, entry.clone());
            return Ok(());
        }

        let existing = state.entries.iter().position(|e| same_key(e, entry));
        match (update.kind, existing) {
            (WriteKind::Insert, Some(_)) => Err(RpcStatus::already_exists(format!(
                "entry already exists in table {}",
                entry.table_id
            ))),
            (WriteKind::Insert, None) => {
                state.entries.push(entry.clone());
                Ok(())
            }
            (WriteKind::Modify, Some(pos)) => {
                state.entries[pos] = entry.clone();
                Ok(())
            }
            (WriteKind::Modify, None) => Err(RpcStatus::not_found(format!(
                "no such entry in table {}",
                entry.table_id
            ))),
        }
    }

    async fn read_counters(
        &self,
        device_id: u64,
        counter_id: CounterId,
        index: u64,
    ) -> RpcResult<CounterPages> {
        self.enter(SimOp::ReadCounters, device_id).await?;
        let state = self.lock();
        let raw_id = counter_id.as_raw();
        let size = Self::counter_size(&state, raw_id)
            .ok_or_else(|| RpcStatus::not_found(format!("counter {} does not exist", raw_id)))?;

        let cell = |i: u64| {
            let (packet_count, byte_count) = state.counters.get(&(raw_id, i)).copied().unwrap_or((0, 0));
            CounterData {
                index: i,
                packet_count,
                byte_count,
            }
        };

        let cells: Vec<CounterData> = if index == 0 || state.ignore_counter_index {
            (0..size).map(cell).collect()
        } else if index < size {
            vec![cell(index)]
        } else {
            return Err(RpcStatus::new(
                crate::error::RpcCode::OutOfRange,
                format!("index {} is beyond counter size {}", index, size),
            ));
        };

        let pages: Vec<RpcResult<Vec<CounterData>>> = cells
            .chunks(self.page_size)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(stream::iter(pages).boxed())
    }

    async fn close(&self) -> RpcResult<()> {
        let result = self.enter(SimOp::Close, self.device_id).await;
        let mut state = self.lock();
        state.closed = true;
        state.master = None;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcCode;
    use futures::TryStreamExt;

    const P4INFO: &str = r#"{
      "tables": [{
        "preamble": { "id": 10, "name": "t" },
        "matchFields": [{ "id": 1, "name": "f", "bitwidth": 8, "matchType": "EXACT" }],
        "actionRefs": [{ "id": 20 }]
      }],
      "actions": [{ "preamble": { "id": 20, "name": "a" } }],
      "counters": [{ "preamble": { "id": 30, "name": "c" }, "size": "10" }]
    }"#;

    fn entry(value: u8) -> TableEntry {
        use p4lb_pipeline::{ActionId, FieldId, FieldMatch, FieldMatchValue};
        TableEntry {
            table_id: TableId::from_raw(10).unwrap(),
            match_key: vec![FieldMatch {
                field_id: FieldId::from_raw(1).unwrap(),
                value: FieldMatchValue::Exact { value: vec![value] },
            }],
            is_default: false,
            action_id: ActionId::from_raw(20).unwrap(),
            action_params: Vec::new(),
            priority: None,
        }
    }

    async fn ready_switch() -> SimulatedSwitch {
        let switch = SimulatedSwitch::new(1);
        switch.arbitrate(1, 5).await.unwrap();
        switch.push_pipeline(1, 5, P4INFO.as_bytes(), b"{}").await.unwrap();
        switch
    }

    #[tokio::test]
    async fn test_write_requires_master_and_pipeline() {
        let switch = SimulatedSwitch::new(1);
        let update = EntryUpdate {
            kind: WriteKind::Insert,
            entry: entry(1),
        };
        let err = switch.write_table_entry(1, 5, &update).await.unwrap_err();
        assert_eq!(err.code, RpcCode::PermissionDenied);

        switch.arbitrate(1, 5).await.unwrap();
        let err = switch.write_table_entry(1, 5, &update).await.unwrap_err();
        assert_eq!(err.code, RpcCode::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_insert_modify_semantics() {
        let switch = ready_switch().await;
        let insert = EntryUpdate {
            kind: WriteKind::Insert,
            entry: entry(1),
        };
        switch.write_table_entry(1, 5, &insert).await.unwrap();
        let err = switch.write_table_entry(1, 5, &insert).await.unwrap_err();
        assert_eq!(err.code, RpcCode::AlreadyExists);

        let modify_missing = EntryUpdate {
            kind: WriteKind::Modify,
            entry: entry(2),
        };
        let err = switch.write_table_entry(1, 5, &modify_missing).await.unwrap_err();
        assert_eq!(err.code, RpcCode::NotFound);
        assert_eq!(switch.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_lower_election_id_rejected() {
        let switch = SimulatedSwitch::new(1);
        switch.arbitrate(1, 5).await.unwrap();
        let err = switch.arbitrate(1, 4).await.unwrap_err();
        assert_eq!(err.code, RpcCode::PermissionDenied);
        assert_eq!(switch.master_election_id(), Some(5));
    }

    #[tokio::test]
    async fn test_wrong_device_id() {
        let switch = SimulatedSwitch::new(1);
        let err = switch.arbitrate(2, 1).await.unwrap_err();
        assert_eq!(err.code, RpcCode::NotFound);
    }

    #[tokio::test]
    async fn test_counter_paging() {
        let switch = ready_switch().await.with_page_size(3);
        switch.set_counter(30, 9, 1, 64);
        let counter = CounterId::from_raw(30).unwrap();

        let pages: Vec<Vec<CounterData>> = switch
            .read_counters(1, counter, 0)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages.len(), 4);
        assert_eq!(pages[3][0].index, 9);
        assert_eq!(pages[3][0].byte_count, 64);

        let err = switch.read_counters(1, counter, 10).await.err().unwrap();
        assert_eq!(err.code, RpcCode::OutOfRange);
    }

    #[tokio::test]
    async fn test_faults_are_one_shot() {
        let switch = SimulatedSwitch::new(1);
        switch.inject_fault(SimOp::Arbitrate, RpcStatus::unavailable("down"));
        assert!(switch.arbitrate(1, 1).await.is_err());
        assert!(switch.arbitrate(1, 1).await.is_ok());
        assert_eq!(switch.rpc_count(SimOp::Arbitrate), 2);
    }

    #[tokio::test]
    async fn test_preloaded_pipeline_serves_counters() {
        let schema = PipelineSchema::load(P4INFO.as_bytes()).unwrap();
        let switch = SimulatedSwitch::new(1).with_pipeline(schema);
        assert!(switch.pipeline_installed());
        assert_eq!(switch.master_election_id(), None);

        let pages: Vec<Vec<CounterData>> = switch
            .read_counters(1, CounterId::from_raw(30).unwrap(), 2)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages, vec![vec![CounterData { index: 2, packet_count: 0, byte_count: 0 }]]);
    }

    #[tokio::test]
    async fn test_shared_gauge_sees_overlapping_calls() {
        let gauge = Arc::new(InFlightGauge::default());
        let a = SimulatedSwitch::new(1).with_in_flight_gauge(gauge.clone());
        let b = SimulatedSwitch::new(2).with_in_flight_gauge(gauge.clone());
        a.set_latency(SimOp::Arbitrate, Duration::from_millis(30));
        b.set_latency(SimOp::Arbitrate, Duration::from_millis(30));

        let (ra, rb) = tokio::join!(a.arbitrate(1, 1), b.arbitrate(2, 1));
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(gauge.peak(), 2);
        assert_eq!(gauge.current(), 0);

        a.arbitrate(1, 1).await.unwrap();
        assert_eq!(a.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_closed_switch_is_unavailable() {
        let switch = ready_switch().await;
        switch.close().await.unwrap();
        assert!(switch.is_closed());
        let err = switch.arbitrate(1, 5).await.unwrap_err();
        assert_eq!(err.code, RpcCode::Unavailable);
    }
}
