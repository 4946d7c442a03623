//! Per-run pipeline state and the façade steps use to read and extend it.
//!
//! A [`DataPipeline`] is the serializable state of one document moving through
//! the configured steps. [`MessageContext`] wraps it with the operations a
//! step is allowed to perform: read source files and earlier results, and
//! append new artifacts.

use chrono::{DateTime, Utc};
use contentflow_shared::{
    ArtifactFile, ArtifactType, ContentFlowError, ProcessId, Result, StepResult,
};
use contentflow_storage::{ArtifactTransfer, BlobStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Identity and progress of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub process_id: ProcessId,
    /// Analysis profile to use; also the analyzer id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    /// Configured step names in execution order.
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_step: Option<String>,
    pub creation_time: DateTime<Utc>,
    pub last_updated_time: DateTime<Utc>,
}

/// Serializable state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPipeline {
    pub pipeline_status: PipelineStatus,
    /// Intake files. Set once; read-only afterwards.
    #[serde(default)]
    pub source_files: Vec<ArtifactFile>,
    /// Results in completion order, at most one per step name.
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    /// Artifacts produced during the run. Append-only.
    #[serde(default)]
    pub files: Vec<ArtifactFile>,
}

impl DataPipeline {
    /// Start a new run with a fresh process id.
    pub fn new(schema_id: Option<String>, steps: Vec<String>) -> Self {
        Self::with_process_id(ProcessId::new(), schema_id, steps)
    }

    pub fn with_process_id(
        process_id: ProcessId,
        schema_id: Option<String>,
        steps: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            pipeline_status: PipelineStatus {
                process_id,
                schema_id,
                steps,
                completed_steps: Vec::new(),
                active_step: None,
                creation_time: now,
                last_updated_time: now,
            },
            source_files: Vec::new(),
            step_results: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn process_id(&self) -> ProcessId {
        self.pipeline_status.process_id
    }

    /// Register an intake file under this run's process id.
    pub fn add_source_file(&mut self, name: impl Into<String>) -> &mut ArtifactFile {
        let file = ArtifactFile::new(
            self.process_id(),
            name,
            ArtifactType::SourceContent,
            None,
        );
        self.source_files.push(file);
        let last = self.source_files.len() - 1;
        &mut self.source_files[last]
    }

    /// Record a step's result. Rejects a second result for the same step or a
    /// result from another run.
    pub fn add_step_result(&mut self, result: StepResult) -> Result<()> {
        if result.process_id != self.process_id() {
            return Err(ContentFlowError::validation(format!(
                "step '{}' returned process id {} for run {}",
                result.step_name,
                result.process_id,
                self.process_id()
            )));
        }
        if self.step_results.iter().any(|r| r.step_name == result.step_name) {
            return Err(ContentFlowError::validation(format!(
                "step '{}' already has a result",
                result.step_name
            )));
        }
        self.step_results.push(result);
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.pipeline_status.last_updated_time = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// MessageContext
// ---------------------------------------------------------------------------

/// What a step sees of the run it is processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContext {
    pub data_pipeline: DataPipeline,
}

impl MessageContext {
    pub fn new(data_pipeline: DataPipeline) -> Self {
        Self { data_pipeline }
    }

    pub fn process_id(&self) -> ProcessId {
        self.data_pipeline.process_id()
    }

    pub fn schema_id(&self) -> Option<&str> {
        self.data_pipeline.pipeline_status.schema_id.as_deref()
    }

    pub fn active_step(&self) -> Option<&str> {
        self.data_pipeline.pipeline_status.active_step.as_deref()
    }

    /// Mark `step_name` as the step currently executing.
    pub fn begin_step(&mut self, step_name: &str) {
        self.data_pipeline.pipeline_status.active_step = Some(step_name.to_string());
        self.data_pipeline.touch();
    }

    /// Record `result` and mark its step completed.
    pub fn complete_step(&mut self, result: StepResult) -> Result<()> {
        let step_name = result.step_name.clone();
        self.data_pipeline.add_step_result(result)?;
        let status = &mut self.data_pipeline.pipeline_status;
        status.completed_steps.push(step_name);
        status.active_step = None;
        Ok(())
    }

    /// Result recorded by `step_name`, if that step has run.
    pub fn get_previous_step_result(&self, step_name: &str) -> Option<&StepResult> {
        self.data_pipeline
            .step_results
            .iter()
            .find(|r| r.step_name == step_name)
    }

    pub fn get_source_files(&self) -> &[ArtifactFile] {
        &self.data_pipeline.source_files
    }

    /// Allocate a new artifact attributed to the active step and append it to
    /// the run's files.
    pub fn add_file(&mut self, name: &str, artifact_type: ArtifactType) -> &mut ArtifactFile {
        let file = ArtifactFile::new(
            self.process_id(),
            name,
            artifact_type,
            self.active_step().map(str::to_string),
        );
        let files = &mut self.data_pipeline.files;
        files.push(file);
        let last = files.len() - 1;
        &mut files[last]
    }

    /// Most recent artifact of `artifact_type` produced by `processed_by`.
    pub fn find_file(
        &self,
        processed_by: &str,
        artifact_type: ArtifactType,
    ) -> Option<&ArtifactFile> {
        self.data_pipeline.files.iter().rev().find(|f| {
            f.processed_by.as_deref() == Some(processed_by) && f.artifact_type == artifact_type
        })
    }

    /// Download and parse a predecessor's JSON output artifact.
    pub async fn download_output_json(
        &self,
        store: &dyn BlobStore,
        container: &str,
        processed_by: &str,
        artifact_type: ArtifactType,
    ) -> Result<Value> {
        let file = self.find_file(processed_by, artifact_type).ok_or_else(|| {
            ContentFlowError::input_missing(format!(
                "no {artifact_type} artifact from step '{processed_by}'"
            ))
        })?;
        let text = file.download_text(store, container).await?;
        Ok(serde_json::from_str(&text)?)
    }
}
