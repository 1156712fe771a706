//! Pipeline profiles: a parsed schema plus the blobs pushed to devices.

use crate::error::{PipelineError, PipelineResult};
use crate::schema::PipelineSchema;
use std::fmt;
use std::path::Path;
use tracing::info;

/// A compiled pipeline as installed on devices.
///
/// Loaded once and shared read-only by every device that runs it.
#[derive(Clone, PartialEq, Eq)]
pub struct PipelineProfile {
    pub name: String,
    pub schema: PipelineSchema,
    /// Raw descriptor bytes, sent verbatim with the pipeline push.
    pub schema_blob: Vec<u8>,
    /// Compiled target artifact (e.g. the BMv2 JSON), sent verbatim.
    pub artifact: Vec<u8>,
}

impl PipelineProfile {
    /// Builds a profile from in-memory blobs.
    pub fn from_parts(
        name: impl Into<String>,
        schema_blob: Vec<u8>,
        artifact: Vec<u8>,
    ) -> PipelineResult<Self> {
        let schema = PipelineSchema::load(&schema_blob)?;
        Ok(Self {
            name: name.into(),
            schema,
            schema_blob,
            artifact,
        })
    }

    /// Reads the descriptor and artifact from disk.
    pub fn load(
        name: impl Into<String>,
        p4info_path: impl AsRef<Path>,
        artifact_path: impl AsRef<Path>,
    ) -> PipelineResult<Self> {
        let name = name.into();
        let p4info_path = p4info_path.as_ref();
        let artifact_path = artifact_path.as_ref();

        let schema_blob = std::fs::read(p4info_path).map_err(|e| {
            PipelineError::schema_parse(format!(
                "failed to read {}: {}",
                p4info_path.display(),
                e
            ))
        })?;
        let artifact = std::fs::read(artifact_path).map_err(|e| {
            PipelineError::schema_parse(format!(
                "failed to read pipeline artifact {}: {}",
                artifact_path.display(),
                e
            ))
        })?;

        let profile = Self::from_parts(name, schema_blob, artifact)?;
        info!(
            pipeline = %profile.name,
            tables = profile.schema.tables().count(),
            counters = profile.schema.counters().count(),
            artifact_bytes = profile.artifact.len(),
            "Loaded pipeline profile"
        );
        Ok(profile)
    }
}

impl fmt::Debug for PipelineProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineProfile")
            .field("name", &self.name)
            .field("tables", &self.schema.tables().count())
            .field("schema_blob_len", &self.schema_blob.len())
            .field("artifact_len", &self.artifact.len())
            .finish()
    }
}
