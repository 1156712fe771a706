//! FleetOrch implementation.

use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use p4lb_pipeline::{rules, PipelineProfile};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::types::{
    ApplyReport, BootstrapReport, DeviceBootstrap, DeviceRuleSet, FleetOrchConfig,
    FleetOrchStats, FleetReport, RuleOutcome,
};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::device::{CounterSample, DeviceIdentity, DeviceRpc, DeviceSession};
use crate::error::{ControlError, ControlResult};

const SOURCE: &str = "FleetOrch";

/// Drives `work` to completion unless `cancel` fires first. Returns the
/// items produced and whether cancellation cut the work short.
async fn drain_until_cancelled<T>(
    work: impl Stream<Item = T>,
    cancel: &CancellationToken,
) -> (Vec<T>, bool) {
    let mut work = std::pin::pin!(work);
    let mut done = Vec::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return (done, true),
            next = work.next() => match next {
                Some(item) => done.push(item),
                None => return (done, false),
            },
        }
    }
}

fn raw_str(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Decodes and applies `raw_records` in order, one outcome per record.
///
/// Once `cancel` fires, the write in flight is abandoned and it and every
/// later record are reported as cancelled.
async fn apply_records(
    session: &mut DeviceSession,
    raw_records: &[Value],
    cancel: &CancellationToken,
) -> Vec<RuleOutcome> {
    let mut outcomes = Vec::with_capacity(raw_records.len());
    for (index, raw) in raw_records.iter().enumerate() {
        let result = match rules::decode_record(index, raw) {
            _ if cancel.is_cancelled() => Err(ControlError::Cancelled),
            Ok(rule) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ControlError::Cancelled),
                applied = session.apply_rule(&rule) => applied,
            },
            Err(e) => Err(e.into()),
        };
        match &result {
            Err(ControlError::Cancelled) => {}
            Err(e) => warn!(device = %session.name(), rule = index, error = %e, "Rule failed"),
            Ok(_) => {}
        }
        outcomes.push(RuleOutcome {
            index,
            table: raw_str(raw, "table"),
            action: raw_str(raw, "action_name"),
            result,
        });
    }
    outcomes
}

/// How [`FleetOrch`] brings an unclaimed session to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BringUp {
    /// Arbitrate, then push the pipeline.
    Install,
    /// Arbitrate and adopt the pipeline the device already runs.
    Attach,
}

impl BringUp {
    fn as_str(self) -> &'static str {
        match self {
            BringUp::Install => "bootstrap",
            BringUp::Attach => "attach",
        }
    }
}

/// Owns every device session and sequences fleet-wide operations.
///
/// Per device, work is strictly sequential: arbitration, then pipeline push,
/// then rule writes in input order. Across devices, work runs concurrently
/// up to `max_concurrency`.
pub struct FleetOrch {
    config: FleetOrchConfig,
    sessions: Vec<DeviceSession>,
    stats: FleetOrchStats,
}

impl fmt::Debug for FleetOrch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetOrch")
            .field("config", &self.config)
            .field("devices", &self.sessions.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl FleetOrch {
    pub fn new(config: FleetOrchConfig) -> Self {
        Self {
            config,
            sessions: Vec::new(),
            stats: FleetOrchStats::default(),
        }
    }

    pub fn config(&self) -> &FleetOrchConfig {
        &self.config
    }

    pub fn stats(&self) -> &FleetOrchStats {
        &self.stats
    }

    /// Registers a device. Names must be unique.
    pub fn add_device(&mut self, identity: DeviceIdentity, rpc: Arc<dyn DeviceRpc>) -> ControlResult<()> {
        if self.sessions.iter().any(|s| s.name() == identity.name) {
            return Err(ControlError::InvalidFleet(format!(
                "duplicate device name '{}'",
                identity.name
            )));
        }
        info!(device = %identity, pipeline = %identity.pipeline, "Device registered");
        self.sessions
            .push(DeviceSession::new(identity, rpc, self.config.session_config()));
        Ok(())
    }

    pub fn device_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions in registration order.
    pub fn sessions(&self) -> impl Iterator<Item = &DeviceSession> {
        self.sessions.iter()
    }

    pub fn session(&self, device: &str) -> Option<&DeviceSession> {
        self.sessions.iter().find(|s| s.name() == device)
    }

    fn session_mut(&mut self, device: &str) -> ControlResult<&mut DeviceSession> {
        self.sessions
            .iter_mut()
            .find(|s| s.name() == device)
            .ok_or_else(|| ControlError::UnknownDevice(device.to_string()))
    }

    fn max_concurrency(&self) -> usize {
        self.config.max_concurrency.max(1)
    }

    /// Arbitrates and installs the pipeline on every device.
    ///
    /// Devices that fail are closed and reported; the rest continue. Sessions
    /// already `Ready` are left alone and reported as ready. If `cancel`
    /// fires, in-flight work is dropped, every session is shut down and
    /// unfinished devices are reported as cancelled.
    pub async fn bootstrap(
        &mut self,
        profiles: &HashMap<String, Arc<PipelineProfile>>,
        cancel: &CancellationToken,
    ) -> BootstrapReport {
        self.bring_up(profiles, cancel, BringUp::Install).await
    }

    /// Like [`bootstrap`](Self::bootstrap), but claims mastership without
    /// pushing pipelines: each device is assumed to already run its
    /// configured pipeline. Used to observe a fleet without disturbing its
    /// forwarding state.
    pub async fn attach(
        &mut self,
        profiles: &HashMap<String, Arc<PipelineProfile>>,
        cancel: &CancellationToken,
    ) -> BootstrapReport {
        self.bring_up(profiles, cancel, BringUp::Attach).await
    }

    async fn bring_up(
        &mut self,
        profiles: &HashMap<String, Arc<PipelineProfile>>,
        cancel: &CancellationToken,
        mode: BringUp,
    ) -> BootstrapReport {
        let max = self.max_concurrency();
        let already_ready: HashSet<usize> = self
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state().is_ready())
            .map(|(position, _)| position)
            .collect();
        info!(
            devices = self.sessions.len(),
            already_ready = already_ready.len(),
            max_concurrency = max,
            mode = mode.as_str(),
            "Bringing up fleet"
        );

        let work = stream::iter(
            self.sessions
                .iter_mut()
                .enumerate()
                .filter(|(position, _)| !already_ready.contains(position)),
        )
        .map(|(position, session)| async move {
            let pipeline = session.identity().pipeline.clone();
            let result = match (profiles.get(&pipeline), mode) {
                (Some(profile), BringUp::Install) => session.bootstrap(Arc::clone(profile)).await,
                (Some(profile), BringUp::Attach) => session.attach(Arc::clone(profile)).await,
                (None, _) => Err(ControlError::UnknownPipeline {
                    device: session.name().to_string(),
                    pipeline,
                }),
            };
            if let Err(e) = &result {
                warn!(device = %session.name(), error = %e, "Bring-up failed, closing session");
                // Close errors are already logged by the session.
                let _ = session.close().await;
            }
            (position, result)
        })
        .buffer_unordered(max);

        let (finished, cancelled) = drain_until_cancelled(work, cancel).await;
        let mut results: HashMap<usize, ControlResult<()>> = finished.into_iter().collect();
        for result in results.values() {
            match result {
                Ok(()) => self.stats.devices_ready += 1,
                Err(_) => self.stats.devices_failed += 1,
            }
        }
        let devices: Vec<DeviceBootstrap> = self
            .sessions
            .iter()
            .enumerate()
            .map(|(position, session)| DeviceBootstrap {
                device: session.name().to_string(),
                result: if already_ready.contains(&position) {
                    Ok(())
                } else {
                    results.remove(&position).unwrap_or(Err(ControlError::Cancelled))
                },
            })
            .collect();

        let report = BootstrapReport { devices, cancelled };
        let failed: Vec<&str> = report.failed().iter().map(|d| d.device.as_str()).collect();
        audit_log!(AuditRecord::new(AuditCategory::SessionLifecycle, SOURCE, mode.as_str())
            .detail("ready", report.ready())
            .detail("failed", &failed)
            .detail("cancelled", cancelled)
            .outcome(if report.all_ready() {
                AuditOutcome::Success
            } else {
                AuditOutcome::Failure
            }));

        if cancelled {
            warn!(mode = mode.as_str(), "Bring-up cancelled, shutting down fleet");
            self.shutdown().await;
        }
        report
    }

    /// Decodes and applies a rule batch to one device, in input order.
    ///
    /// Fails as a whole only if the device is unknown or not `Ready`;
    /// otherwise returns one outcome per record.
    pub async fn apply_rule_set(
        &mut self,
        device: &str,
        raw_records: &[Value],
    ) -> ControlResult<Vec<RuleOutcome>> {
        let session = self.session_mut(device)?;
        if !session.state().is_ready() {
            return Err(ControlError::not_ready(device, "apply_rule_set", session.state()));
        }
        let outcomes = apply_records(session, raw_records, &CancellationToken::new()).await;
        self.record_outcomes(&outcomes);
        Ok(outcomes)
    }

    fn record_outcomes(&mut self, outcomes: &[RuleOutcome]) {
        for outcome in outcomes {
            if outcome.is_ok() {
                self.stats.rules_applied += 1;
            } else {
                self.stats.rules_failed += 1;
            }
        }
    }

    /// Applies every rule set. Batches for the same device run sequentially
    /// in the given order; devices run concurrently.
    ///
    /// On cancellation each device stops at its current record: batches in
    /// progress are reported with the outcomes reached so far and the rest
    /// of their records as cancelled, and batches not yet started are
    /// reported as cancelled. The fleet is then shut down.
    pub async fn apply_all(
        &mut self,
        rule_sets: Vec<DeviceRuleSet>,
        cancel: &CancellationToken,
    ) -> Vec<ApplyReport> {
        let mut reports = Vec::new();
        let mut pending: Vec<Vec<DeviceRuleSet>> = self.sessions.iter().map(|_| Vec::new()).collect();
        for set in rule_sets {
            match self.sessions.iter().position(|s| s.name() == set.device) {
                Some(position) => pending[position].push(set),
                None => reports.push(ApplyReport {
                    result: Err(ControlError::UnknownDevice(set.device.clone())),
                    device: set.device,
                    source: set.source,
                }),
            }
        }

        let max = self.max_concurrency();
        let work = stream::iter(
            self.sessions
                .iter_mut()
                .zip(pending)
                .filter(|(_, sets)| !sets.is_empty()),
        )
        .map(|(session, sets)| async move {
            let mut device_reports = Vec::with_capacity(sets.len());
            for set in sets {
                let result = match set.batch {
                    _ if cancel.is_cancelled() => Err(ControlError::Cancelled),
                    Err(e) => Err(ControlError::from(e)),
                    Ok(_) if !session.state().is_ready() => Err(ControlError::not_ready(
                        session.name(),
                        "apply_rule_set",
                        session.state(),
                    )),
                    Ok(batch) => {
                        info!(
                            device = %session.name(),
                            source = %set.source,
                            rules = batch.entries.len(),
                            "Applying rule batch"
                        );
                        Ok(apply_records(session, &batch.entries, cancel).await)
                    }
                };
                device_reports.push(ApplyReport {
                    device: set.device,
                    source: set.source,
                    result,
                });
            }
            device_reports
        })
        .buffer_unordered(max);

        // Every device future winds down by itself once `cancel` fires.
        let finished: Vec<Vec<ApplyReport>> = work.collect().await;
        reports.extend(finished.into_iter().flatten());
        let cancelled = cancel.is_cancelled();

        for report in &reports {
            match &report.result {
                Ok(outcomes) => {
                    let failed = outcomes.iter().filter(|o| !o.is_ok()).count() as u64;
                    self.stats.rules_failed += failed;
                    self.stats.rules_applied += outcomes.len() as u64 - failed;
                }
                Err(_) => self.stats.batches_failed += 1,
            }
        }

        if cancelled {
            warn!("Rule application cancelled, shutting down fleet");
            self.shutdown().await;
        }
        reports
    }

    /// Reads a counter from one device and collects every sample.
    pub async fn read_counters(
        &mut self,
        device: &str,
        counter: &str,
        index: u64,
    ) -> ControlResult<Vec<CounterSample>> {
        let session = self.session_mut(device)?;
        session.read_counter(counter, index).await?.try_collect().await
    }

    /// Closes every session, whatever its state. Close errors are logged and
    /// swallowed. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        let max = self.max_concurrency();
        let open = self.sessions.iter().filter(|s| !s.is_shut_down()).count();
        if open == 0 {
            return;
        }
        info!(sessions = open, "Shutting down fleet");

        stream::iter(self.sessions.iter_mut())
            .for_each_concurrent(max, |session| async move {
                if let Err(e) = session.close().await {
                    warn!(device = %session.name(), error = %e, "Ignoring close failure during shutdown");
                }
            })
            .await;

        audit_log!(AuditRecord::new(AuditCategory::SessionLifecycle, SOURCE, "shutdown")
            .detail("sessions", open)
            .outcome(AuditOutcome::Success));
    }

    /// Bootstraps the fleet, applies every rule set to the devices that
    /// reached `Ready`, and shuts down. Shutdown runs on every path.
    pub async fn run(
        &mut self,
        profiles: &HashMap<String, Arc<PipelineProfile>>,
        rule_sets: Vec<DeviceRuleSet>,
        cancel: &CancellationToken,
    ) -> FleetReport {
        let bootstrap = self.bootstrap(profiles, cancel).await;
        let mut report = FleetReport {
            cancelled: bootstrap.cancelled,
            bootstrap,
            applies: Vec::new(),
        };

        if !report.cancelled {
            report.applies = self.apply_all(rule_sets, cancel).await;
            report.cancelled = cancel.is_cancelled();
        }

        self.shutdown().await;
        report
    }
}

impl Drop for FleetOrch {
    fn drop(&mut self) {
        let open: Vec<&str> = self
            .sessions
            .iter()
            .filter(|s| !s.is_shut_down())
            .map(|s| s.name())
            .collect();
        if !open.is_empty() {
            warn!(devices = ?open, "FleetOrch dropped without shutdown");
        }
    }
}
