//! Controller error types.
//!
//! Device transports report failures as an [`RpcStatus`]: a gRPC status code
//! plus message, as returned by a P4Runtime server. Sessions and the fleet
//! orchestrator wrap those in [`ControlError`] together with the device and
//! operation they belong to.

use p4lb_pipeline::PipelineError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::device::SessionState;

/// gRPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RpcCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl RpcCode {
    /// Converts a raw status code. Unrecognized values map to `Unknown`.
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => RpcCode::Ok,
            1 => RpcCode::Cancelled,
            3 => RpcCode::InvalidArgument,
            4 => RpcCode::DeadlineExceeded,
            5 => RpcCode::NotFound,
            6 => RpcCode::AlreadyExists,
            7 => RpcCode::PermissionDenied,
            8 => RpcCode::ResourceExhausted,
            9 => RpcCode::FailedPrecondition,
            10 => RpcCode::Aborted,
            11 => RpcCode::OutOfRange,
            12 => RpcCode::Unimplemented,
            13 => RpcCode::Internal,
            14 => RpcCode::Unavailable,
            15 => RpcCode::DataLoss,
            16 => RpcCode::Unauthenticated,
            _ => RpcCode::Unknown,
        }
    }

    pub fn as_raw(&self) -> i32 {
        *self as i32
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcCode::Unavailable
                | RpcCode::ResourceExhausted
                | RpcCode::Aborted
                | RpcCode::DeadlineExceeded
        )
    }

    /// Returns true if the connection can no longer be used.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, RpcCode::Unavailable | RpcCode::Cancelled)
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RpcCode::Ok => "OK",
            RpcCode::Cancelled => "CANCELLED",
            RpcCode::Unknown => "UNKNOWN",
            RpcCode::InvalidArgument => "INVALID_ARGUMENT",
            RpcCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            RpcCode::NotFound => "NOT_FOUND",
            RpcCode::AlreadyExists => "ALREADY_EXISTS",
            RpcCode::PermissionDenied => "PERMISSION_DENIED",
            RpcCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            RpcCode::FailedPrecondition => "FAILED_PRECONDITION",
            RpcCode::Aborted => "ABORTED",
            RpcCode::OutOfRange => "OUT_OF_RANGE",
            RpcCode::Unimplemented => "UNIMPLEMENTED",
            RpcCode::Internal => "INTERNAL",
            RpcCode::Unavailable => "UNAVAILABLE",
            RpcCode::DataLoss => "DATA_LOSS",
            RpcCode::Unauthenticated => "UNAUTHENTICATED",
        };
        f.write_str(s)
    }
}

/// Status returned by a failed device RPC.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RpcStatus {
    pub code: RpcCode,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RpcCode::Unavailable, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(RpcCode::AlreadyExists, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RpcCode::NotFound, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(RpcCode::PermissionDenied, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(RpcCode::FailedPrecondition, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(RpcCode::InvalidArgument, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// Result type for transport calls.
pub type RpcResult<T> = Result<T, RpcStatus>;

/// Error type for device sessions and the fleet orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// The session is not in a state that allows the operation.
    #[error("Device {device} is not ready for {operation} (state: {state})")]
    NotReady {
        device: String,
        operation: &'static str,
        state: SessionState,
    },

    /// The device rejected an RPC.
    #[error("Device {device}: {operation} failed: {status}")]
    Rpc {
        device: String,
        operation: &'static str,
        status: RpcStatus,
    },

    /// An RPC did not complete in time.
    #[error("Device {device}: {operation} timed out after {timeout:?}")]
    Timeout {
        device: String,
        operation: &'static str,
        timeout: Duration,
    },

    /// A rule or counter name could not be resolved or encoded.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Unknown pipeline profile '{pipeline}' for device {device}")]
    UnknownPipeline { device: String, pipeline: String },

    #[error("Invalid fleet: {0}")]
    InvalidFleet(String),

    /// The operation was abandoned because the fleet run was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

impl ControlError {
    pub fn not_ready(device: impl Into<String>, operation: &'static str, state: SessionState) -> Self {
        ControlError::NotReady {
            device: device.into(),
            operation,
            state,
        }
    }

    pub fn rpc(device: impl Into<String>, operation: &'static str, status: RpcStatus) -> Self {
        ControlError::Rpc {
            device: device.into(),
            operation,
            status,
        }
    }

    pub fn timeout(device: impl Into<String>, operation: &'static str, timeout: Duration) -> Self {
        ControlError::Timeout {
            device: device.into(),
            operation,
            timeout,
        }
    }

    /// Returns the RPC status code, if this error came from the device.
    pub fn rpc_code(&self) -> Option<RpcCode> {
        match self {
            ControlError::Rpc { status, .. } => Some(status.code),
            _ => None,
        }
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ControlError::Rpc { status, .. } => status.is_retryable(),
            ControlError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, ControlError::NotReady { .. })
    }
}

/// Result type for controller operations.
pub type ControlResult<T> = Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;
    use p4lb_pipeline::Namespace;

    #[test]
    fn test_code_round_trip() {
        for raw in 0..=16 {
            assert_eq!(RpcCode::from_raw(raw).as_raw(), raw);
        }
        assert_eq!(RpcCode::from_raw(99), RpcCode::Unknown);
    }

    #[test]
    fn test_classification() {
        assert!(RpcCode::Unavailable.is_retryable());
        assert!(RpcCode::Unavailable.is_connection_lost());
        assert!(RpcCode::Cancelled.is_connection_lost());
        assert!(!RpcCode::Cancelled.is_retryable());
        assert!(!RpcCode::AlreadyExists.is_retryable());
        assert!(!RpcCode::InvalidArgument.is_connection_lost());
    }

    #[test]
    fn test_display() {
        let status = RpcStatus::unavailable("connection refused");
        assert_eq!(status.to_string(), "UNAVAILABLE: connection refused");

        let err = ControlError::rpc("s1", "arbitrate", status);
        assert_eq!(
            err.to_string(),
            "Device s1: arbitrate failed: UNAVAILABLE: connection refused"
        );
        assert!(err.is_retryable());
        assert_eq!(err.rpc_code(), Some(RpcCode::Unavailable));

        let err = ControlError::not_ready("s2", "write_entry", SessionState::Arbitrated);
        assert_eq!(
            err.to_string(),
            "Device s2 is not ready for write_entry (state: arbitrated)"
        );
        assert!(err.is_not_ready());
    }

    #[test]
    fn test_pipeline_error_is_transparent() {
        let err: ControlError = PipelineError::unknown_name(Namespace::Counter, "c").into();
        assert_eq!(err.to_string(), "Unknown counter 'c'");
        assert!(!err.is_retryable());
    }
}
