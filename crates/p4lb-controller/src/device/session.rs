//! Device session: one switch's control connection and its lifecycle.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use p4lb_pipeline::{EntryBuilder, PipelineProfile, PipelineSchema, RuleRecord, TableEntry};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::rpc::{CounterPages, DeviceRpc};
use super::types::{
    CounterSample, DeviceIdentity, EntryUpdate, SessionConfig, SessionState, SessionStats,
    WriteKind,
};
use crate::audit::{AuditCategory, AuditRecord};
use crate::audit_log;
use crate::error::{ControlError, ControlResult, RpcCode, RpcResult, RpcStatus};

const SOURCE: &str = "DeviceSession";

/// A lazily produced, single-pass stream of counter samples.
pub type SampleStream = BoxStream<'static, ControlResult<CounterSample>>;

/// Runs one RPC under a deadline.
async fn with_deadline<T>(
    device: &str,
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = RpcResult<T>>,
) -> ControlResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(status)) => Err(ControlError::rpc(device, operation, status)),
        Err(_) => Err(ControlError::timeout(device, operation, timeout)),
    }
}

fn connection_lost(err: &ControlError) -> bool {
    matches!(err, ControlError::Rpc { status, .. } if status.code.is_connection_lost())
}

/// Control session for a single switch.
///
/// Writes and counter reads are only accepted once the session is `Ready`,
/// i.e. mastership is held and the pipeline is installed. Calls in any other
/// state fail with [`ControlError::NotReady`] before reaching the transport.
pub struct DeviceSession {
    identity: DeviceIdentity,
    rpc: Arc<dyn DeviceRpc>,
    config: SessionConfig,
    state: SessionState,
    profile: Option<Arc<PipelineProfile>>,
    transport_closed: bool,
    stats: SessionStats,
}

impl DeviceSession {
    pub fn new(identity: DeviceIdentity, rpc: Arc<dyn DeviceRpc>, config: SessionConfig) -> Self {
        Self {
            identity,
            rpc,
            config,
            state: SessionState::Unclaimed,
            profile: None,
            transport_closed: false,
            stats: SessionStats::default(),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the installed pipeline profile, once the pipeline is pushed.
    pub fn profile(&self) -> Option<&Arc<PipelineProfile>> {
        self.profile.as_ref()
    }

    /// Returns the installed pipeline's schema, once the pipeline is pushed.
    pub fn schema(&self) -> Option<&PipelineSchema> {
        self.profile.as_deref().map(|p| &p.schema)
    }

    fn require(&self, expected: SessionState, operation: &'static str) -> ControlResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ControlError::not_ready(&self.identity.name, operation, self.state))
        }
    }

    fn mark_closed(&mut self, reason: &str) {
        if self.state.is_closed() {
            return;
        }
        warn!(device = %self.identity.name, state = %self.state, reason, "Session closed");
        self.state = SessionState::Closed;
        audit_log!(AuditRecord::new(AuditCategory::SessionLifecycle, SOURCE, "session_lost")
            .device(&self.identity.name)
            .failed(reason));
    }

    fn note_failure(&mut self, err: &ControlError) {
        if matches!(err, ControlError::Timeout { .. }) {
            self.stats.timeouts += 1;
        }
        if connection_lost(err) {
            self.mark_closed(&err.to_string());
        }
    }

    /// Claims mastership. Valid only from `Unclaimed`.
    pub async fn arbitrate(&mut self) -> ControlResult<()> {
        self.require(SessionState::Unclaimed, "arbitrate")?;

        let rpc = Arc::clone(&self.rpc);
        let result = with_deadline(
            &self.identity.name,
            "arbitrate",
            self.config.rpc_timeout,
            rpc.arbitrate(self.identity.device_id, self.config.election_id),
        )
        .await;

        audit_log!(AuditRecord::new(AuditCategory::Mastership, SOURCE, "arbitrate")
            .device(&self.identity.name)
            .detail("device_id", self.identity.device_id)
            .detail("election_id", self.config.election_id)
            .result(&result));

        match result {
            Ok(()) => {
                self.state = SessionState::Arbitrated;
                info!(
                    device = %self.identity.name,
                    election_id = self.config.election_id,
                    "Mastership acquired"
                );
                Ok(())
            }
            Err(err) => {
                self.note_failure(&err);
                if matches!(err, ControlError::Timeout { .. }) {
                    self.mark_closed("arbitration timed out");
                }
                Err(err)
            }
        }
    }

    /// Pushes the pipeline. Valid only from `Arbitrated`; on success the
    /// session is `Ready`.
    pub async fn install_pipeline(&mut self, profile: Arc<PipelineProfile>) -> ControlResult<()> {
        self.require(SessionState::Arbitrated, "install_pipeline")?;

        let rpc = Arc::clone(&self.rpc);
        let result = with_deadline(
            &self.identity.name,
            "install_pipeline",
            self.config.rpc_timeout,
            rpc.push_pipeline(
                self.identity.device_id,
                self.config.election_id,
                &profile.schema_blob,
                &profile.artifact,
            ),
        )
        .await;

        audit_log!(AuditRecord::new(AuditCategory::PipelineInstall, SOURCE, "set_pipeline")
            .device(&self.identity.name)
            .subject("pipeline", &profile.name)
            .detail("schema_bytes", profile.schema_blob.len())
            .detail("artifact_bytes", profile.artifact.len())
            .result(&result));

        match result {
            Ok(()) => {
                self.state = SessionState::PipelineInstalled;
                info!(device = %self.identity.name, pipeline = %profile.name, "Pipeline installed");
                self.profile = Some(profile);
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(err) => {
                self.note_failure(&err);
                if matches!(err, ControlError::Timeout { .. }) {
                    self.mark_closed("pipeline install timed out");
                }
                Err(err)
            }
        }
    }

    /// Arbitrates and installs the pipeline, in that order.
    pub async fn bootstrap(&mut self, profile: Arc<PipelineProfile>) -> ControlResult<()> {
        self.arbitrate().await?;
        self.install_pipeline(profile).await
    }

    /// Claims mastership and adopts `profile` as the pipeline the device is
    /// already running, without pushing it. Leaves the session `Ready`.
    ///
    /// Entries and counters on the device are left untouched. Whether the
    /// device really runs `profile` is not checked; a mismatch shows up as
    /// NOT_FOUND from later calls.
    pub async fn attach(&mut self, profile: Arc<PipelineProfile>) -> ControlResult<()> {
        self.arbitrate().await?;
        info!(device = %self.identity.name, pipeline = %profile.name, "Attached to running pipeline");
        self.profile = Some(profile);
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Writes one entry and returns the kind of write that took effect.
    ///
    /// Default entries are written as MODIFY. Keyed entries are written as
    /// INSERT and re-sent once as MODIFY if the device reports the key
    /// already exists.
    pub async fn write_entry(&mut self, entry: TableEntry) -> ControlResult<WriteKind> {
        self.require(SessionState::Ready, "write_entry")?;

        let first = if entry.is_default {
            WriteKind::Modify
        } else {
            WriteKind::Insert
        };
        let mut update = EntryUpdate { kind: first, entry };
        let mut result = self.send_update(&update).await;

        if update.kind == WriteKind::Insert
            && matches!(result.as_ref().err().and_then(ControlError::rpc_code), Some(RpcCode::AlreadyExists))
        {
            debug!(
                device = %self.identity.name,
                entry = %update.entry,
                "Entry exists, re-sending as MODIFY"
            );
            self.stats.insert_fallbacks += 1;
            update.kind = WriteKind::Modify;
            result = self.send_update(&update).await;
        }

        audit_log!(AuditRecord::new(AuditCategory::TableWrite, SOURCE, "write_entry")
            .device(&self.identity.name)
            .subject("table", update.entry.table_id)
            .detail("kind", update.kind)
            .detail("is_default", update.entry.is_default)
            .detail("action_id", update.entry.action_id)
            .result(&result));

        match result {
            Ok(()) => {
                match update.kind {
                    WriteKind::Insert => self.stats.entries_inserted += 1,
                    WriteKind::Modify => self.stats.entries_modified += 1,
                }
                Ok(update.kind)
            }
            Err(err) => {
                self.stats.write_failures += 1;
                self.note_failure(&err);
                Err(err)
            }
        }
    }

    async fn send_update(&self, update: &EntryUpdate) -> ControlResult<()> {
        let rpc = Arc::clone(&self.rpc);
        with_deadline(
            &self.identity.name,
            "write_entry",
            self.config.rpc_timeout,
            rpc.write_table_entry(self.identity.device_id, self.config.election_id, update),
        )
        .await
    }

    /// Builds an entry from `rule` against the installed schema and writes it.
    pub async fn apply_rule(&mut self, rule: &RuleRecord) -> ControlResult<WriteKind> {
        self.require(SessionState::Ready, "apply_rule")?;
        let entry = match self.schema() {
            Some(schema) => EntryBuilder::new(schema).build(rule)?,
            None => return Err(ControlError::not_ready(&self.identity.name, "apply_rule", self.state)),
        };
        self.write_entry(entry).await
    }

    /// Reads a counter by name. `index == 0` reads every cell, otherwise
    /// only cell `index`.
    ///
    /// For `index == 0` the returned stream pulls response pages on demand;
    /// each page is subject to the session's RPC timeout. A single-cell read
    /// is collected up front and fails with DATA_LOSS unless the device
    /// answered with exactly that one cell.
    pub async fn read_counter(&mut self, counter: &str, index: u64) -> ControlResult<SampleStream> {
        self.require(SessionState::Ready, "read_counter")?;
        let (counter_id, counter_name) = match self.schema() {
            Some(schema) => {
                let counter = schema.counter(counter)?;
                (counter.id, counter.name.clone())
            }
            None => {
                return Err(ControlError::not_ready(&self.identity.name, "read_counter", self.state))
            }
        };

        let rpc = Arc::clone(&self.rpc);
        let result = with_deadline(
            &self.identity.name,
            "read_counters",
            self.config.rpc_timeout,
            rpc.read_counters(self.identity.device_id, counter_id, index),
        )
        .await;

        audit_log!(AuditRecord::new(AuditCategory::CounterRead, SOURCE, "read_counters")
            .device(&self.identity.name)
            .subject("counter", &counter_name)
            .detail("index", index)
            .result(&result));

        let pages = match result {
            Ok(pages) => pages,
            Err(err) => {
                self.note_failure(&err);
                return Err(err);
            }
        };
        self.stats.counter_reads += 1;

        let samples = sample_stream(
            self.identity.name.clone(),
            counter_name,
            self.config.rpc_timeout,
            pages,
        );
        if index == 0 {
            return Ok(samples);
        }

        let cells: Vec<CounterSample> = samples.try_collect().await?;
        if cells.len() == 1 && cells[0].index == index {
            return Ok(stream::iter(cells.into_iter().map(Ok)).boxed());
        }
        let returned: Vec<u64> = cells.iter().map(|c| c.index).collect();
        Err(ControlError::rpc(
            &self.identity.name,
            "read_counters",
            RpcStatus::new(
                RpcCode::DataLoss,
                format!("asked for cell {}, device returned cells {:?}", index, returned),
            ),
        ))
    }

    /// Closes the session. Safe to call in any state and more than once;
    /// only the first call reaches the transport.
    pub async fn close(&mut self) -> ControlResult<()> {
        if self.transport_closed {
            return Ok(());
        }
        self.transport_closed = true;
        let previous = self.state;
        self.state = SessionState::Closed;

        let rpc = Arc::clone(&self.rpc);
        let result = with_deadline(&self.identity.name, "close", self.config.rpc_timeout, rpc.close()).await;

        audit_log!(AuditRecord::new(AuditCategory::SessionLifecycle, SOURCE, "close")
            .device(&self.identity.name)
            .detail("previous_state", previous.to_string())
            .result(&result));

        match &result {
            Ok(()) => info!(device = %self.identity.name, %previous, "Session closed"),
            Err(e) => warn!(device = %self.identity.name, error = %e, "Error while closing session"),
        }
        result
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.transport_closed
    }
}

fn sample_stream(
    device: String,
    counter_name: String,
    timeout: Duration,
    pages: CounterPages,
) -> SampleStream {
    stream::unfold(Some(pages), move |state| {
        let device = device.clone();
        async move {
            let mut pages = state?;
            match tokio::time::timeout(timeout, pages.next()).await {
                Ok(Some(Ok(page))) => Some((Ok(page), Some(pages))),
                Ok(Some(Err(status))) => {
                    Some((Err(ControlError::rpc(device, "read_counters", status)), None))
                }
                Ok(None) => None,
                Err(_) => Some((
                    Err(ControlError::timeout(device, "read_counters", timeout)),
                    None,
                )),
            }
        }
    })
    .flat_map(move |page| {
        let items: Vec<ControlResult<CounterSample>> = match page {
            Ok(cells) => cells
                .into_iter()
                .map(|cell| Ok(CounterSample::new(counter_name.as_str(), cell)))
                .collect(),
            Err(err) => vec![Err(err)],
        };
        stream::iter(items)
    })
    .boxed()
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("pipeline", &self.profile.as_ref().map(|p| p.name.as_str()))
            .field("stats", &self.stats)
            .finish()
    }
}
