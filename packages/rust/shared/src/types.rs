//! Core domain types for ContentFlow pipeline runs.

use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ContentFlowError;

/// Boxed asynchronous byte stream used for artifact downloads and uploads.
///
/// The stream owns whatever connection backs it; dropping it releases the
/// connection on every exit path.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ContentFlowError>> + Send>>;

// ---------------------------------------------------------------------------
// ProcessId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub Uuid);

impl ProcessId {
    /// Generate a new time-sortable process identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ProcessId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ArtifactType
// ---------------------------------------------------------------------------

/// Closed set of artifact kinds. Drives storage routing and downstream lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    #[default]
    Undefined,
    ConvertedContent,
    ExtractedContent,
    SchemaMappedData,
    ScoreMergedData,
    SourceContent,
    SavedContent,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::ConvertedContent => "converted_content",
            Self::ExtractedContent => "extracted_content",
            Self::SchemaMappedData => "schema_mapped_data",
            Self::ScoreMergedData => "score_merged_data",
            Self::SourceContent => "source_content",
            Self::SavedContent => "saved_content",
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ArtifactFile
// ---------------------------------------------------------------------------

/// One audit record attached to an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineLogEntry {
    /// Step that wrote the entry.
    pub source: String,
    pub message: String,
    pub datetime_offset: DateTime<Utc>,
}

/// A file consumed or produced during a run.
///
/// Stored as `{process_id}/{name}` inside the process container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactFile {
    /// Unique artifact identifier (UUID v7).
    pub id: String,
    /// Owning run.
    pub process_id: ProcessId,
    /// Human-readable file name (e.g. `content_understanding_output.json`).
    pub name: String,
    pub artifact_type: ArtifactType,
    /// Step that produced the artifact; `None` for intake files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Size in bytes, known once the payload has been uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Append-only audit trail.
    #[serde(default)]
    pub log_entries: Vec<PipelineLogEntry>,
}

impl ArtifactFile {
    pub fn new(
        process_id: ProcessId,
        name: impl Into<String>,
        artifact_type: ArtifactType,
        processed_by: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            process_id,
            name: name.into(),
            artifact_type,
            processed_by,
            mime_type: None,
            size: None,
            log_entries: Vec::new(),
        }
    }

    /// Blob name relative to the process container.
    pub fn blob_name(&self) -> String {
        format!("{}/{}", self.process_id, self.name)
    }

    /// Append an audit entry stamped with the current time.
    ///
    /// Entries are never reordered or removed, so the log stays chronological.
    pub fn append_log(&mut self, source: impl Into<String>, message: impl Into<String>) {
        let now = Utc::now();
        // Clock skew must not break ordering.
        let datetime_offset = match self.log_entries.last() {
            Some(last) if last.datetime_offset > now => last.datetime_offset,
            _ => now,
        };
        self.log_entries.push(PipelineLogEntry {
            source: source.into(),
            message: message.into(),
            datetime_offset,
        });
    }
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// Outcome of a single handler execution. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub process_id: ProcessId,
    pub step_name: String,
    /// Step-defined payload, e.g. `{"result": "success", "file_name": "..."}`.
    pub result: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl StepResult {
    pub fn new(
        process_id: ProcessId,
        step_name: impl Into<String>,
        result: Map<String, Value>,
    ) -> Self {
        Self {
            process_id,
            step_name: step_name.into(),
            result,
            elapsed_ms: None,
        }
    }

    /// The conventional success payload for a step that produced one file.
    pub fn success(
        process_id: ProcessId,
        step_name: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        let mut result = Map::new();
        result.insert("result".into(), Value::String("success".into()));
        result.insert("file_name".into(), Value::String(file_name.into()));
        Self::new(process_id, step_name, result)
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }

    /// Read a string field from the result payload.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.result.get(key).and_then(Value::as_str)
    }
}
