//! Audit trail and logging setup.
//!
//! Operations that change or observe device state (mastership, pipeline
//! push, table writes, counter reads, teardown) each leave one
//! [`AuditRecord`] on the `audit` tracing target. The event message is a one
//! line summary; the `record` field holds the whole record as JSON.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Mastership,
    PipelineInstall,
    TableWrite,
    CounterRead,
    /// Session teardown and fleet-wide bootstrap/shutdown.
    SessionLifecycle,
}

impl AuditCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditCategory::Mastership => "mastership",
            AuditCategory::PipelineInstall => "pipeline_install",
            AuditCategory::TableWrite => "table_write",
            AuditCategory::CounterRead => "counter_read",
            AuditCategory::SessionLifecycle => "session_lifecycle",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides the level a record is logged at: `Pending` at DEBUG, `Success`
/// at INFO, `Failure` at WARN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Pending,
    Success,
    Failure,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditOutcome::Pending => "pending",
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        })
    }
}

/// The object an audited operation acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditSubject {
    pub kind: &'static str,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub category: AuditCategory,
    /// Emitting component, e.g. "DeviceSession".
    pub component: &'static str,
    pub operation: String,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<AuditSubject>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Starts a `Pending` record stamped now.
    pub fn new(category: AuditCategory, component: &'static str, operation: &str) -> Self {
        Self {
            at: Utc::now(),
            category,
            component,
            operation: operation.to_string(),
            outcome: AuditOutcome::Pending,
            device: None,
            subject: None,
            details: Map::new(),
            error: None,
        }
    }

    pub fn device(mut self, name: &str) -> Self {
        self.device = Some(name.to_string());
        self
    }

    pub fn subject(mut self, kind: &'static str, id: impl ToString) -> Self {
        self.subject = Some(AuditSubject {
            kind,
            id: id.to_string(),
        });
        self
    }

    /// Adds one detail field. Values that fail to serialize are stored as null.
    pub fn detail(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.details.insert(key.to_string(), value);
        self
    }

    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn failed(mut self, error: impl fmt::Display) -> Self {
        self.outcome = AuditOutcome::Failure;
        self.error = Some(error.to_string());
        self
    }

    pub fn result<T, E: fmt::Display>(self, result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => self.outcome(AuditOutcome::Success),
            Err(e) => self.failed(e),
        }
    }

    pub fn device_name(&self) -> &str {
        self.device.as_deref().unwrap_or("-")
    }

    /// `"<category> <operation> [on <device>]: <outcome>"`
    pub fn summary(&self) -> String {
        match &self.device {
            Some(device) => format!(
                "{} {} on {}: {}",
                self.category, self.operation, device, self.outcome
            ),
            None => format!("{} {}: {}", self.category, self.operation, self.outcome),
        }
    }

    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => Value::String(format!("unserializable audit record: {}", e)).to_string(),
        }
    }
}

/// Logs an [`AuditRecord`] on the `audit` target at the level its outcome
/// calls for.
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {{
        let record: $crate::audit::AuditRecord = $record;
        let json = record.to_json();
        match record.outcome {
            $crate::audit::AuditOutcome::Pending => tracing::debug!(
                target: "audit",
                category = record.category.as_str(),
                device = record.device_name(),
                record = %json,
                "{}",
                record.summary()
            ),
            $crate::audit::AuditOutcome::Success => tracing::info!(
                target: "audit",
                category = record.category.as_str(),
                device = record.device_name(),
                record = %json,
                "{}",
                record.summary()
            ),
            $crate::audit::AuditOutcome::Failure => tracing::warn!(
                target: "audit",
                category = record.category.as_str(),
                device = record.device_name(),
                error = record.error.as_deref().unwrap_or_default(),
                record = %json,
                "{}",
                record.summary()
            ),
        }
    }};
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per event
    #[default]
    Json,
    /// Multi-line human-readable events
    Pretty,
}

/// Installs the global subscriber. A set `RUST_LOG` wins over `log_level`.
pub fn init_logging(
    log_level: &str,
    format: LogFormat,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(layer.with_thread_ids(true).json()).try_init(),
        LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
    }
}
