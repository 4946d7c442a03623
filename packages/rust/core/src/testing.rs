//! In-memory collaborators for handler and runner tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use contentflow_analysis::{
    AnalysisPayload, AnalysisService, AnalyzedResult, AnalyzerDetail, AnalyzerLookup,
    AnalyzerTemplate, ChatCompletion, ChatOutput, ChatRequest, DocumentContent, JobHandle,
};
use contentflow_shared::{AppConfig, ByteStream, ContentFlowError, Result};
use contentflow_storage::{BlobStore, MemoryBlobStore, SchemaCatalog, SchemaRecord};
use futures::StreamExt;
use serde_json::{Value, json};

use crate::context::{DataPipeline, MessageContext};
use crate::step::AppContext;

pub const SCHEMA_ID: &str = "inv-2025";

#[derive(Default)]
pub struct FakeAnalysis {
    pub existing: Mutex<HashSet<String>>,
    /// Existence check answers with a non-404 failure.
    pub lookup_error: bool,
    /// Jobs end in the failed state.
    pub fail_job: bool,
    /// Status reported for existing analyzers instead of `ready`.
    pub status: Option<&'static str>,
    pub detail_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
    pub templates: Mutex<Vec<AnalyzerTemplate>>,
    pub submitted: Mutex<Vec<Bytes>>,
}

impl FakeAnalysis {
    pub fn with_existing(analyzer_id: &str) -> Self {
        let fake = Self::default();
        fake.existing
            .lock()
            .expect("lock")
            .insert(analyzer_id.to_string());
        fake
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisService for FakeAnalysis {
    async fn get_analyzer_detail(&self, analyzer_id: &str) -> Result<AnalyzerLookup> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.lookup_error {
            return Err(ContentFlowError::lookup(analyzer_id, "HTTP 503"));
        }
        let exists = self.existing.lock().expect("lock").contains(analyzer_id);
        Ok(if exists {
            AnalyzerLookup::Found(AnalyzerDetail {
                analyzer_id: analyzer_id.to_string(),
                description: None,
                status: Some(self.status.unwrap_or("ready").into()),
                created_at: None,
                extra: Default::default(),
            })
        } else {
            AnalyzerLookup::NotFound
        })
    }

    async fn create_analyzer(
        &self,
        analyzer_id: &str,
        template: &AnalyzerTemplate,
    ) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.templates.lock().expect("lock").push(template.clone());
        self.existing
            .lock()
            .expect("lock")
            .insert(analyzer_id.to_string());
        Ok(())
    }

    async fn begin_analyze_stream(
        &self,
        analyzer_id: &str,
        mut stream: ByteStream,
    ) -> Result<JobHandle> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        self.submitted.lock().expect("lock").push(buf.freeze());
        Ok(JobHandle {
            analyzer_id: analyzer_id.to_string(),
            operation_location: "memory://job-1".into(),
        })
    }

    async fn poll_result(&self, job: &JobHandle) -> Result<AnalyzedResult> {
        if self.fail_job {
            return Err(ContentFlowError::analysis(format!(
                "job for '{}' failed: InvalidContent: corrupt document",
                job.analyzer_id
            )));
        }
        Ok(sample_result(&job.analyzer_id))
    }
}

/// Invoice with one item whose dangerous-goods fields the analyzer left empty.
pub fn sample_result(analyzer_id: &str) -> AnalyzedResult {
    let fields = serde_json::from_value(json!({
        "invoice_number": {"type": "string", "valueString": "INV-001", "confidence": 0.97},
        "total_value": {"type": "number", "valueNumber": 100336.0},
        "items": {"type": "array", "valueArray": [
            {"type": "object", "valueObject": {
                "part_number": {"type": "string", "valueString": "66039"},
                "quantity": {"type": "integer", "valueInteger": 1},
                "is_dangerous_goods": {"type": "boolean"}
            }}
        ]}
    }))
    .expect("sample fields");
    AnalyzedResult {
        id: "job-1".into(),
        status: "Succeeded".into(),
        result: AnalysisPayload {
            analyzer_id: analyzer_id.to_string(),
            contents: vec![DocumentContent {
                markdown: "# Invoice INV-001".into(),
                fields,
                ..DocumentContent::default()
            }],
            ..AnalysisPayload::default()
        },
    }
}

/// Chat model with a canned answer. Without one, every call fails.
#[derive(Default)]
pub struct FakeChat {
    pub answer: Option<Value>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl FakeChat {
    pub fn answering(answer: Value) -> Self {
        Self {
            answer: Some(answer),
            requests: Mutex::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("lock").len()
    }
}

#[async_trait]
impl ChatCompletion for FakeChat {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatOutput> {
        self.requests.lock().expect("lock").push(request.clone());
        let content = self
            .answer
            .clone()
            .ok_or_else(|| ContentFlowError::analysis("chat completion: HTTP 429: rate limited"))?;
        Ok(ChatOutput {
            response: json!({
                "choices": [{"message": {"role": "assistant", "content": content.to_string()}}],
                "usage": {"total_tokens": 42}
            }),
            content,
        })
    }
}

/// Serves downloads from the wrapped store and rejects every upload.
pub struct RejectingUploads(pub MemoryBlobStore);

#[async_trait]
impl BlobStore for RejectingUploads {
    async fn download_stream(&self, container: &str, blob_name: &str) -> Result<ByteStream> {
        self.0.download_stream(container, blob_name).await
    }

    async fn upload(
        &self,
        container: &str,
        blob_name: &str,
        _payload: Bytes,
        _content_type: &str,
    ) -> Result<()> {
        Err(ContentFlowError::PersistenceFailed(format!(
            "upload {container}/{blob_name}: HTTP 403"
        )))
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    pub records: HashMap<String, SchemaRecord>,
    pub calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn with_invoice() -> Self {
        let mut records = HashMap::new();
        records.insert(
            SCHEMA_ID.to_string(),
            SchemaRecord {
                id: SCHEMA_ID.into(),
                class_name: "CommercialInvoice".into(),
                description: "Commercial invoices 2025".into(),
                file_name: "commercial_invoice.json".into(),
                content_type: "application/json".into(),
            },
        );
        Self {
            records,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SchemaCatalog for FakeCatalog {
    async fn get_schema(
        &self,
        _database: &str,
        _collection: &str,
        schema_id: &str,
    ) -> Result<Option<SchemaRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.get(schema_id).cloned())
    }
}

pub struct Harness {
    pub app: AppContext,
    pub store: MemoryBlobStore,
    pub analysis: Arc<FakeAnalysis>,
    pub catalog: Arc<FakeCatalog>,
    pub chat: Arc<FakeChat>,
}

impl Harness {
    /// Build an app context and seed the schema artifact and nothing else.
    pub async fn new(analysis: FakeAnalysis, catalog: FakeCatalog) -> Self {
        Self::with_chat(analysis, catalog, FakeChat::default()).await
    }

    pub async fn with_chat(analysis: FakeAnalysis, catalog: FakeCatalog, chat: FakeChat) -> Self {
        let store = MemoryBlobStore::new();
        let config = AppConfig::default();
        store
            .upload(
                &format!("{}/Schemas/{SCHEMA_ID}", config.storage.configuration_container),
                "commercial_invoice.json",
                Bytes::from_static(b"{}"),
                "application/json",
            )
            .await
            .expect("seed schema artifact");

        let analysis = Arc::new(analysis);
        let catalog = Arc::new(catalog);
        let chat = Arc::new(chat);
        let app = AppContext::new(
            config,
            Arc::new(store.clone()),
            catalog.clone(),
            analysis.clone(),
        )
        .with_chat(chat.clone());
        Self {
            app,
            store,
            analysis,
            catalog,
            chat,
        }
    }

    /// Route the app's uploads to a store that rejects them.
    pub fn reject_uploads(&mut self) {
        self.app.blob_store = Arc::new(RejectingUploads(self.store.clone()));
    }

    /// A run with one uploaded source document.
    pub async fn context_with_source(&self, steps: &[&str]) -> MessageContext {
        self.context_with_document(steps, "invoice.pdf", b"%PDF-1.7 invoice").await
    }

    pub async fn context_with_document(
        &self,
        steps: &[&str],
        file_name: &str,
        payload: &'static [u8],
    ) -> MessageContext {
        let mut pipeline = DataPipeline::new(
            Some(SCHEMA_ID.into()),
            steps.iter().map(|s| s.to_string()).collect(),
        );
        let blob = pipeline.add_source_file(file_name).blob_name();
        self.store
            .upload(
                &self.app.config.storage.process_container,
                &blob,
                Bytes::from_static(payload),
                "application/octet-stream",
            )
            .await
            .expect("seed source");
        MessageContext::new(pipeline)
    }
}
