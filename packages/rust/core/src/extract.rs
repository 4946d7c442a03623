//! Extraction step: run the first source document through the analyzer named
//! by the run's schema id and store the raw result as an artifact.

use std::time::Instant;

use async_trait::async_trait;
use contentflow_analysis::AnalyzerLookup;
use contentflow_shared::{ArtifactType, ContentFlowError, Result, StepResult};
use contentflow_storage::ArtifactTransfer;
use tracing::{debug, info, instrument};

use crate::context::MessageContext;
use crate::step::{AppContext, Handler};
use crate::template::build_analyzer_template;

/// Artifact name of the extraction output.
pub const EXTRACT_OUTPUT_NAME: &str = "content_understanding_output.json";

const RESULT_LOG_MESSAGE: &str = "Content Understanding Extraction Result has been added";

/// Analyzer states that accept documents.
const READY_STATUSES: [&str; 2] = ["ready", "succeeded"];

pub struct ExtractHandler {
    app: AppContext,
    name: String,
}

impl ExtractHandler {
    pub fn new(app: AppContext, name: impl Into<String>) -> Self {
        Self {
            app,
            name: name.into(),
        }
    }

    /// Make sure `analyzer_id` exists and is ready, creating it from its
    /// catalog schema if not.
    ///
    /// An analyzer still being created or left failed is not submitted to.
    async fn ensure_analyzer(&self, analyzer_id: &str) -> Result<()> {
        match self.app.analysis.get_analyzer_detail(analyzer_id).await? {
            AnalyzerLookup::Found(detail) => {
                let not_ready = detail.status.as_deref().filter(|status| {
                    !READY_STATUSES.iter().any(|ready| ready.eq_ignore_ascii_case(status))
                });
                if let Some(status) = not_ready {
                    return Err(ContentFlowError::provisioning(
                        analyzer_id,
                        format!("analyzer exists but is not ready (status '{status}')"),
                    ));
                }
                debug!(status = ?detail.status, "analyzer exists");
                Ok(())
            }
            AnalyzerLookup::NotFound => self.provision(analyzer_id).await,
        }
    }

    #[instrument(skip(self))]
    async fn provision(&self, schema_id: &str) -> Result<()> {
        info!("analyzer missing, provisioning from catalog schema");
        let (record, definition) = self.app.load_schema(schema_id).await?;

        let mut template = build_analyzer_template(&definition.field_schema());
        if !record.description.is_empty() {
            template.description = record.description.clone();
        }

        self.app.analysis.create_analyzer(schema_id, &template).await
    }
}

#[async_trait]
impl Handler for ExtractHandler {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(step = %self.name, process_id = %ctx.process_id()))]
    async fn execute(&self, ctx: &mut MessageContext) -> Result<StepResult> {
        let started = Instant::now();

        let source = ctx.get_source_files().first().cloned().ok_or_else(|| {
            ContentFlowError::input_missing(format!("step '{}' needs a source file", self.name))
        })?;
        let analyzer_id = ctx
            .schema_id()
            .map(str::to_string)
            .ok_or_else(|| ContentFlowError::input_missing("run has no schema id"))?;

        self.ensure_analyzer(&analyzer_id).await?;

        let container = &self.app.config.storage.process_container;
        let store = self.app.blob_store.as_ref();

        let stream = source.download_stream(store, container).await?;
        let job = self.app.analysis.begin_analyze_stream(&analyzer_id, stream).await?;
        let result = self.app.analysis.poll_result(&job).await?;
        let payload = serde_json::to_string(&result)?;

        if ctx.active_step() != Some(self.name.as_str()) {
            ctx.begin_step(&self.name);
        }
        let file = ctx.add_file(EXTRACT_OUTPUT_NAME, ArtifactType::ExtractedContent);
        file.append_log(&self.name, RESULT_LOG_MESSAGE);
        file.upload_json_text(store, container, payload).await?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(elapsed_ms, file = EXTRACT_OUTPUT_NAME, "extraction stored");

        Ok(StepResult::success(ctx.process_id(), &self.name, EXTRACT_OUTPUT_NAME)
            .with_elapsed_ms(elapsed_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataPipeline;
    use crate::testing::{FakeAnalysis, FakeCatalog, Harness, SCHEMA_ID};
    use contentflow_analysis::AnalyzedResult;

    fn handler(h: &Harness) -> ExtractHandler {
        ExtractHandler::new(h.app.clone(), "extract")
    }

    #[tokio::test]
    async fn existing_analyzer_is_used_without_provisioning() {
        let h = Harness::new(FakeAnalysis::with_existing(SCHEMA_ID), FakeCatalog::with_invoice())
            .await;
        let mut ctx = h.context_with_source(&["extract"]).await;

        let result = handler(&h).execute(&mut ctx).await.expect("extract");

        assert_eq!(result.process_id, ctx.process_id());
        assert_eq!(result.get_str("result"), Some("success"));
        assert_eq!(result.get_str("file_name"), Some(EXTRACT_OUTPUT_NAME));
        assert_eq!(FakeAnalysis::count(&h.analysis.create_calls), 0);
        assert_eq!(FakeAnalysis::count(&h.catalog.calls), 0);
        assert_eq!(&h.analysis.submitted.lock().unwrap()[0][..], b"%PDF-1.7 invoice");

        let file = &ctx.data_pipeline.files[0];
        assert_eq!(file.name, EXTRACT_OUTPUT_NAME);
        assert_eq!(file.artifact_type, ArtifactType::ExtractedContent);
        assert_eq!(file.processed_by.as_deref(), Some("extract"));
        assert_eq!(file.log_entries.len(), 1);
        assert_eq!(file.log_entries[0].source, "extract");
        assert_eq!(file.log_entries[0].message, RESULT_LOG_MESSAGE);
    }

    #[tokio::test]
    async fn missing_analyzer_is_provisioned_then_used() {
        let h = Harness::new(FakeAnalysis::default(), FakeCatalog::with_invoice()).await;
        let mut ctx = h.context_with_source(&["extract"]).await;

        handler(&h).execute(&mut ctx).await.expect("extract");

        assert_eq!(FakeAnalysis::count(&h.analysis.create_calls), 1);
        assert_eq!(FakeAnalysis::count(&h.analysis.submit_calls), 1);
        let templates = h.analysis.templates.lock().unwrap();
        assert_eq!(templates[0].description, "Commercial invoices 2025");
        assert!(templates[0].field_schema.fields.contains_key("invoice_number"));
    }

    #[tokio::test]
    async fn second_run_does_not_reprovision() {
        let h = Harness::new(FakeAnalysis::default(), FakeCatalog::with_invoice()).await;
        let step = handler(&h);

        let mut first = h.context_with_source(&["extract"]).await;
        step.execute(&mut first).await.expect("first run");
        let mut second = h.context_with_source(&["extract"]).await;
        step.execute(&mut second).await.expect("second run");

        assert_eq!(FakeAnalysis::count(&h.analysis.create_calls), 1);
        assert_eq!(FakeAnalysis::count(&h.analysis.detail_calls), 2);
        assert_ne!(first.process_id(), second.process_id());
    }

    #[tokio::test]
    async fn no_source_file_fails_before_any_call() {
        let h = Harness::new(FakeAnalysis::default(), FakeCatalog::with_invoice()).await;
        let pipeline = DataPipeline::new(Some(SCHEMA_ID.into()), vec!["extract".into()]);
        let mut ctx = MessageContext::new(pipeline);

        let err = handler(&h).execute(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ContentFlowError::InputMissing { .. }));
        assert_eq!(FakeAnalysis::count(&h.analysis.detail_calls), 0);
        assert_eq!(FakeAnalysis::count(&h.analysis.submit_calls), 0);
        assert!(ctx.data_pipeline.files.is_empty());
    }

    #[tokio::test]
    async fn failed_job_leaves_no_artifact() {
        let analysis = FakeAnalysis {
            fail_job: true,
            ..FakeAnalysis::with_existing(SCHEMA_ID)
        };
        let h = Harness::new(analysis, FakeCatalog::with_invoice()).await;
        let mut ctx = h.context_with_source(&["extract"]).await;
        let blobs_before = h.store.len().await;

        let err = handler(&h).execute(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ContentFlowError::AnalysisFailed { .. }));
        assert!(ctx.data_pipeline.files.is_empty());
        assert_eq!(h.store.len().await, blobs_before);
    }

    #[tokio::test]
    async fn lookup_error_does_not_trigger_provisioning() {
        let analysis = FakeAnalysis {
            lookup_error: true,
            ..FakeAnalysis::default()
        };
        let h = Harness::new(analysis, FakeCatalog::with_invoice()).await;
        let mut ctx = h.context_with_source(&["extract"]).await;

        let err = handler(&h).execute(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ContentFlowError::ProfileLookupFailed { .. }));
        assert_eq!(FakeAnalysis::count(&h.analysis.create_calls), 0);
        assert_eq!(FakeAnalysis::count(&h.catalog.calls), 0);
    }

    #[tokio::test]
    async fn unknown_catalog_schema_is_provisioning_failure() {
        let h = Harness::new(FakeAnalysis::default(), FakeCatalog::default()).await;
        let mut ctx = h.context_with_source(&["extract"]).await;

        let err = handler(&h).execute(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ContentFlowError::ProvisioningFailed { .. }));
        assert_eq!(FakeAnalysis::count(&h.analysis.submit_calls), 0);
    }

    #[tokio::test]
    async fn analyzer_still_being_created_is_not_submitted_to() {
        let analysis = FakeAnalysis {
            status: Some("creating"),
            ..FakeAnalysis::with_existing(SCHEMA_ID)
        };
        let h = Harness::new(analysis, FakeCatalog::with_invoice()).await;
        let mut ctx = h.context_with_source(&["extract"]).await;

        let err = handler(&h).execute(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ContentFlowError::ProvisioningFailed { .. }));
        assert!(err.to_string().contains("not ready (status 'creating')"));
        assert_eq!(FakeAnalysis::count(&h.analysis.create_calls), 0);
        assert_eq!(FakeAnalysis::count(&h.analysis.submit_calls), 0);
        assert!(ctx.data_pipeline.files.is_empty());
    }

    #[tokio::test]
    async fn failed_result_upload_keeps_the_artifact_without_size() {
        let mut h =
            Harness::new(FakeAnalysis::with_existing(SCHEMA_ID), FakeCatalog::with_invoice())
                .await;
        let mut ctx = h.context_with_source(&["extract"]).await;
        h.reject_uploads();

        let err = handler(&h).execute(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ContentFlowError::PersistenceFailed(_)));
        assert_eq!(FakeAnalysis::count(&h.analysis.submit_calls), 1);
        let files = &ctx.data_pipeline.files;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, EXTRACT_OUTPUT_NAME);
        assert_eq!(files[0].log_entries.len(), 1);
        assert!(files[0].size.is_none());
        assert!(files[0].mime_type.is_none());
        assert!(ctx.get_previous_step_result("extract").is_none());
    }

    #[tokio::test]
    async fn stored_artifact_reparses_to_the_same_result() {
        let h = Harness::new(FakeAnalysis::with_existing(SCHEMA_ID), FakeCatalog::with_invoice())
            .await;
        let mut ctx = h.context_with_source(&["extract"]).await;

        handler(&h).execute(&mut ctx).await.expect("extract");

        let json = ctx
            .download_output_json(
                &h.store,
                &h.app.config.storage.process_container,
                "extract",
                ArtifactType::ExtractedContent,
            )
            .await
            .expect("download output");
        let parsed: AnalyzedResult = serde_json::from_value(json).expect("parse");
        assert_eq!(parsed, crate::testing::sample_result(SCHEMA_ID));

        let file = &ctx.data_pipeline.files[0];
        assert_eq!(file.mime_type.as_deref(), Some("application/json"));
        assert!(file.size.unwrap_or_default() > 0);
    }
}
