//! Document analysis service client.
//!
//! Wraps the analyzer lifecycle (detail, create, delete, list), stream
//! submission, and the long-running-operation polling protocol. Every call is
//! async; the poll loop sleeps between status checks without blocking other
//! runs.
//!
//! The existence check returns [`AnalyzerLookup`] so callers branch on
//! `NotFound` structurally. Only HTTP 404 maps to `NotFound`; every other
//! failure is [`ContentFlowError::ProfileLookupFailed`].
//!
//! [`ChatCompletion`] is the second model-backed collaborator: a chat
//! deployment asked for the fields a schema marks as generated.

mod chat;
mod models;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::BytesMut;
use contentflow_shared::{AnalysisConfig, ByteStream, ContentFlowError, Result, read_secret_env};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

pub use chat::{AzureOpenAiClient, ChatCompletion, ChatOutput, ChatRequest, ContentPart, ImageUrl};
pub use models::{
    AnalysisPayload, AnalyzedResult, AnalyzerConfig, AnalyzerDetail, AnalyzerTemplate,
    BASE_ANALYZER_ID, DocumentContent, FieldSchemaSpec, FieldSpec, FieldValue, JobHandle,
    JobStatus,
};

/// User-Agent string for analysis requests.
const USER_AGENT: &str = concat!("ContentFlow/", env!("CARGO_PKG_VERSION"));

/// Header carrying the subscription key.
const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Header carrying the URL of a long-running operation.
const OPERATION_LOCATION: &str = "Operation-Location";

// ---------------------------------------------------------------------------
// AnalyzerLookup
// ---------------------------------------------------------------------------

/// Outcome of an analyzer existence check.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzerLookup {
    /// The analyzer exists and can be used.
    Found(AnalyzerDetail),
    /// The service reported the analyzer absent; the caller should provision it.
    NotFound,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Operations the pipeline needs from the analysis service.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Existence check. Non-404 failures are errors, never `NotFound`.
    async fn get_analyzer_detail(&self, analyzer_id: &str) -> Result<AnalyzerLookup>;

    /// Create an analyzer and wait until the service reports it ready.
    async fn create_analyzer(&self, analyzer_id: &str, template: &AnalyzerTemplate) -> Result<()>;

    /// Submit a document for analysis. The stream is consumed before returning.
    async fn begin_analyze_stream(
        &self,
        analyzer_id: &str,
        stream: ByteStream,
    ) -> Result<JobHandle>;

    /// Wait for a job to reach a terminal state and return its payload.
    async fn poll_result(&self, job: &JobHandle) -> Result<AnalyzedResult>;
}

// ---------------------------------------------------------------------------
// Poll policy
// ---------------------------------------------------------------------------

/// Timing for the status-check loop. The delay doubles up to `max_interval`.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl From<&AnalysisConfig> for PollPolicy {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            max_interval: Duration::from_millis(
                config.poll_max_interval_ms.max(config.poll_interval_ms),
            ),
            timeout: Duration::from_secs(config.poll_timeout_secs),
        }
    }
}

/// Status document returned from an `Operation-Location` URL.
#[derive(Debug, Deserialize)]
struct OperationStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<Value>,
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// HTTP client for the content understanding REST API.
pub struct ContentUnderstandingClient {
    client: Client,
    endpoint: String,
    api_version: String,
    api_key: Option<String>,
    poll: PollPolicy,
}

impl ContentUnderstandingClient {
    /// Build a client from the `[analysis]` config section.
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(ContentFlowError::config("analysis endpoint is empty"));
        }
        url::Url::parse(&config.endpoint)
            .map_err(|e| ContentFlowError::config(format!("invalid analysis endpoint: {e}")))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ContentFlowError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            api_key: read_secret_env(&config.api_key_env),
            poll: PollPolicy::from(config),
        })
    }

    /// Use an explicit subscription key (overrides the env var).
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override polling timing.
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    fn analyzer_url(&self, analyzer_id: &str) -> String {
        format!(
            "{}/contentunderstanding/analyzers/{analyzer_id}?api-version={}",
            self.endpoint, self.api_version
        )
    }

    fn analyze_url(&self, analyzer_id: &str) -> String {
        format!(
            "{}/contentunderstanding/analyzers/{analyzer_id}:analyze?api-version={}",
            self.endpoint, self.api_version
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    /// List analyzers known to the service.
    #[instrument(skip(self))]
    pub async fn list_analyzers(&self) -> Result<Vec<AnalyzerDetail>> {
        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            value: Vec<AnalyzerDetail>,
        }

        let url = format!(
            "{}/contentunderstanding/analyzers?api-version={}",
            self.endpoint, self.api_version
        );
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ContentFlowError::Network(format!("list analyzers: {e}")))?;
        let response = ensure_success(response, "list analyzers")
            .await
            .map_err(ContentFlowError::Network)?;
        let listing: Listing = response
            .json()
            .await
            .map_err(|e| ContentFlowError::Serialization(format!("list analyzers: {e}")))?;
        Ok(listing.value)
    }

    /// Delete an analyzer. Returns `false` if it did not exist.
    #[instrument(skip(self))]
    pub async fn delete_analyzer(&self, analyzer_id: &str) -> Result<bool> {
        let response = self
            .authorize(self.client.delete(self.analyzer_url(analyzer_id)))
            .send()
            .await
            .map_err(|e| ContentFlowError::Network(format!("delete {analyzer_id}: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(response, &format!("delete {analyzer_id}"))
            .await
            .map_err(ContentFlowError::Network)?;
        info!(analyzer_id, "analyzer deleted");
        Ok(true)
    }

    /// Poll an operation URL until it reaches a terminal state.
    ///
    /// Returns the raw terminal document and its status. Transport errors
    /// propagate as `Network`; exceeding the timeout yields the inner
    /// `Err(elapsed)` and the caller picks the error variant.
    async fn wait_for_operation(
        &self,
        operation_location: &str,
    ) -> Result<std::result::Result<(JobStatus, Value), Duration>> {
        let started = Instant::now();
        let mut delay = self.poll.interval;

        loop {
            let response = self
                .authorize(self.client.get(operation_location))
                .send()
                .await
                .map_err(|e| ContentFlowError::Network(format!("poll {operation_location}: {e}")))?;
            let response = ensure_success(response, "poll operation")
                .await
                .map_err(ContentFlowError::Network)?;
            let body: Value = response
                .json()
                .await
                .map_err(|e| ContentFlowError::Serialization(format!("poll body: {e}")))?;

            let status: OperationStatus = serde_json::from_value(body.clone())?;
            let job_status = JobStatus::parse(&status.status);
            debug!(
                status = %status.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "operation status"
            );

            if job_status.is_terminal() {
                if let Some(error) = &status.error {
                    debug!(%error, "operation reported error detail");
                }
                return Ok(Ok((job_status, body)));
            }

            let elapsed = started.elapsed();
            if elapsed >= self.poll.timeout {
                return Ok(Err(elapsed));
            }

            let remaining = self.poll.timeout - elapsed;
            tokio::time::sleep(delay.min(remaining)).await;
            delay = (delay * 2).min(self.poll.max_interval);
        }
    }
}

#[async_trait]
impl AnalysisService for ContentUnderstandingClient {
    #[instrument(skip(self))]
    async fn get_analyzer_detail(&self, analyzer_id: &str) -> Result<AnalyzerLookup> {
        let response = self
            .authorize(self.client.get(self.analyzer_url(analyzer_id)))
            .send()
            .await
            .map_err(|e| ContentFlowError::lookup(analyzer_id, e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("analyzer not found");
            return Ok(AnalyzerLookup::NotFound);
        }

        let response = ensure_success(response, "analyzer detail")
            .await
            .map_err(|msg| ContentFlowError::lookup(analyzer_id, msg))?;
        let detail: AnalyzerDetail = response
            .json()
            .await
            .map_err(|e| {
                ContentFlowError::lookup(analyzer_id, format!("invalid detail body: {e}"))
            })?;

        Ok(AnalyzerLookup::Found(detail))
    }

    #[instrument(skip(self, template))]
    async fn create_analyzer(&self, analyzer_id: &str, template: &AnalyzerTemplate) -> Result<()> {
        info!(fields = template.field_schema.fields.len(), "creating analyzer");

        let response = self
            .authorize(self.client.put(self.analyzer_url(analyzer_id)))
            .json(template)
            .send()
            .await
            .map_err(|e| ContentFlowError::provisioning(analyzer_id, e.to_string()))?;

        // A concurrent run may have created the same analyzer first.
        if response.status() == StatusCode::CONFLICT {
            warn!("create returned conflict, re-checking analyzer");
            return match self.get_analyzer_detail(analyzer_id).await? {
                AnalyzerLookup::Found(_) => Ok(()),
                AnalyzerLookup::NotFound => Err(ContentFlowError::provisioning(
                    analyzer_id,
                    "create returned conflict but the analyzer does not exist",
                )),
            };
        }

        let response = ensure_success(response, "create analyzer")
            .await
            .map_err(|msg| ContentFlowError::provisioning(analyzer_id, msg))?;

        let Some(location) = operation_location(&response) else {
            // Synchronous create: nothing to wait for.
            return Ok(());
        };

        match self
            .wait_for_operation(&location)
            .await
            .map_err(|e| ContentFlowError::provisioning(analyzer_id, e.to_string()))?
        {
            Ok((JobStatus::Succeeded, _)) => {
                info!("analyzer ready");
                Ok(())
            }
            Ok((_, body)) => Err(ContentFlowError::provisioning(
                analyzer_id,
                format!("create operation failed: {}", error_summary(&body)),
            )),
            Err(elapsed) => Err(ContentFlowError::provisioning(
                analyzer_id,
                format!("create operation did not finish within {}s", elapsed.as_secs()),
            )),
        }
    }

    #[instrument(skip(self, stream))]
    async fn begin_analyze_stream(
        &self,
        analyzer_id: &str,
        mut stream: ByteStream,
    ) -> Result<JobHandle> {
        let mut document = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            document.extend_from_slice(&chunk?);
        }
        drop(stream);
        debug!(bytes = document.len(), "submitting document");

        let response = self
            .authorize(self.client.post(self.analyze_url(analyzer_id)))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(document.freeze())
            .send()
            .await
            .map_err(|e| ContentFlowError::Network(format!("analyze {analyzer_id}: {e}")))?;

        let response = ensure_success(response, "analyze")
            .await
            .map_err(|msg| {
                ContentFlowError::analysis(format!("submission to '{analyzer_id}' rejected: {msg}"))
            })?;

        let operation_location = operation_location(&response).ok_or_else(|| {
            ContentFlowError::analysis(format!(
                "analyze response for '{analyzer_id}' has no {OPERATION_LOCATION} header"
            ))
        })?;

        info!(%operation_location, "analysis job submitted");
        Ok(JobHandle {
            analyzer_id: analyzer_id.to_string(),
            operation_location,
        })
    }

    #[instrument(skip(self), fields(analyzer_id = %job.analyzer_id))]
    async fn poll_result(&self, job: &JobHandle) -> Result<AnalyzedResult> {
        match self.wait_for_operation(&job.operation_location).await? {
            Ok((JobStatus::Succeeded, body)) => {
                let result: AnalyzedResult = serde_json::from_value(body).map_err(|e| {
                    ContentFlowError::analysis(format!("unreadable result payload: {e}"))
                })?;
                info!(contents = result.result.contents.len(), "analysis succeeded");
                Ok(result)
            }
            Ok((_, body)) => Err(ContentFlowError::analysis(format!(
                "job for '{}' failed: {}",
                job.analyzer_id,
                error_summary(&body)
            ))),
            Err(elapsed) => Err(ContentFlowError::analysis(format!(
                "job for '{}' did not finish within {}s",
                job.analyzer_id,
                elapsed.as_secs()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Pass successful responses through; turn others into a message with the body.
async fn ensure_success(response: Response, what: &str) -> std::result::Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(format!("{what}: HTTP {status}: {}", body.trim()))
}

fn operation_location(response: &Response) -> Option<String> {
    response
        .headers()
        .get(OPERATION_LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Short description of a failed operation's `error` member.
fn error_summary(body: &Value) -> String {
    match body.get("error") {
        Some(error) => {
            let code = error.get("code").and_then(Value::as_str).unwrap_or("unknown");
            let message = error.get("message").and_then(Value::as_str).unwrap_or("");
            format!("{code}: {message}")
        }
        None => format!(
            "status {}",
            body.get("status").and_then(Value::as_str).unwrap_or("unknown")
        ),
    }
}
