//! Request dumping.
//!
//! [`DumpingRpc`] wraps any transport and appends one JSON line per request
//! to `<dir>/<device>-p4runtime-requests.txt`, including the status the
//! device answered with. Dump failures are logged and never fail the RPC.

use async_trait::async_trait;
use chrono::Utc;
use p4lb_pipeline::CounterId;
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

use super::rpc::{CounterPages, DeviceRpc};
use super::types::EntryUpdate;
use crate::error::RpcResult;

/// Returns the dump file path for a device.
pub fn dump_path(dir: &Path, device: &str) -> PathBuf {
    dir.join(format!("{}-p4runtime-requests.txt", device))
}

/// A transport decorator that records every request.
pub struct DumpingRpc {
    device: String,
    path: PathBuf,
    inner: Arc<dyn DeviceRpc>,
    file: Mutex<File>,
}

impl DumpingRpc {
    /// Creates the dump directory if needed and opens the device's dump file
    /// for appending.
    pub fn new(dir: &Path, device: impl Into<String>, inner: Arc<dyn DeviceRpc>) -> io::Result<Self> {
        let device = device.into();
        std::fs::create_dir_all(dir)?;
        let path = dump_path(dir, &device);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            device,
            path,
            inner,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record<T>(&self, rpc: &str, request: Value, result: &RpcResult<T>) {
        let status = match result {
            Ok(_) => "OK".to_string(),
            Err(status) => status.to_string(),
        };
        let line = json!({
            "ts": Utc::now().to_rfc3339(),
            "device": self.device,
            "rpc": rpc,
            "request": request,
            "status": status,
        });
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(file, "{}", line) {
            warn!(device = %self.device, path = %self.path.display(), error = %e, "Failed to write request dump");
        }
    }
}

#[async_trait]
impl DeviceRpc for DumpingRpc {
    async fn arbitrate(&self, device_id: u64, election_id: u64) -> RpcResult<()> {
        let result = self.inner.arbitrate(device_id, election_id).await;
        self.record(
            "MasterArbitrationUpdate",
            json!({ "device_id": device_id, "election_id": election_id }),
            &result,
        );
        result
    }

    async fn push_pipeline(
        &self,
        device_id: u64,
        election_id: u64,
        schema_blob: &[u8],
        artifact: &[u8],
    ) -> RpcResult<()> {
        let result = self
            .inner
            .push_pipeline(device_id, election_id, schema_blob, artifact)
            .await;
        self.record(
            "SetForwardingPipelineConfig",
            json!({
                "device_id": device_id,
                "election_id": election_id,
                "action": "VERIFY_AND_COMMIT",
                "p4info_bytes": schema_blob.len(),
                "device_config_bytes": artifact.len(),
            }),
            &result,
        );
        result
    }

    async fn write_table_entry(
        &self,
        device_id: u64,
        election_id: u64,
        update: &EntryUpdate,
    ) -> RpcResult<()> {
        let result = self
            .inner
            .write_table_entry(device_id, election_id, update)
            .await;
        let request = json!({
            "device_id": device_id,
            "election_id": election_id,
            "update": update,
        });
        self.record("Write", request, &result);
        result
    }

    async fn read_counters(
        &self,
        device_id: u64,
        counter_id: CounterId,
        index: u64,
    ) -> RpcResult<CounterPages> {
        let result = self.inner.read_counters(device_id, counter_id, index).await;
        self.record(
            "Read",
            json!({ "device_id": device_id, "counter_id": counter_id, "index": index }),
            &result,
        );
        result
    }

    async fn close(&self) -> RpcResult<()> {
        let result = self.inner.close().await;
        self.record("Close", json!({}), &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::SimulatedSwitch;

    #[tokio::test]
    async fn test_dump_lines() {
        let dir = tempfile::tempdir().unwrap();
        let switch = Arc::new(SimulatedSwitch::new(0));
        let rpc = DumpingRpc::new(dir.path(), "s1", switch).unwrap();

        rpc.arbitrate(0, 1).await.unwrap();
        assert!(rpc.arbitrate(7, 1).await.is_err());
        rpc.close().await.unwrap();

        let text = std::fs::read_to_string(dump_path(dir.path(), "s1")).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["rpc"], "MasterArbitrationUpdate");
        assert_eq!(lines[0]["status"], "OK");
        assert_eq!(lines[0]["request"]["election_id"], 1);
        assert!(lines[1]["status"].as_str().unwrap().starts_with("NOT_FOUND"));
        assert_eq!(lines[2]["rpc"], "Close");
    }

    #[test]
    fn test_dump_path() {
        assert_eq!(
            dump_path(Path::new("logs"), "s2"),
            PathBuf::from("logs/s2-p4runtime-requests.txt")
        );
    }
}
