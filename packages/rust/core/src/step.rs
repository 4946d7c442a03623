//! The step contract and the shared application context steps are built with.

use std::sync::Arc;

use async_trait::async_trait;
use contentflow_analysis::{AnalysisService, ChatCompletion};
use contentflow_shared::{AppConfig, ContentFlowError, Result, StepResult};
use contentflow_storage::{BlobStore, SchemaCatalog, SchemaRecord};

use crate::context::MessageContext;
use crate::schema::{SchemaDefinition, SchemaRegistry};

/// One named stage of a pipeline.
///
/// A handler reads the run through `ctx`, may append at most one artifact,
/// and returns a [`StepResult`] carrying the run's process id. Errors are
/// returned to the caller as-is; handlers never retry.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Step name used for log attribution and result lookup.
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &mut MessageContext) -> Result<StepResult>;
}

/// Configuration and collaborators shared by every handler.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub blob_store: Arc<dyn BlobStore>,
    pub catalog: Arc<dyn SchemaCatalog>,
    pub analysis: Arc<dyn AnalysisService>,
    /// Only the `map` step needs a chat model.
    pub chat: Option<Arc<dyn ChatCompletion>>,
    pub schemas: Arc<SchemaRegistry>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        blob_store: Arc<dyn BlobStore>,
        catalog: Arc<dyn SchemaCatalog>,
        analysis: Arc<dyn AnalysisService>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            blob_store,
            catalog,
            analysis,
            chat: None,
            schemas: Arc::new(SchemaRegistry::with_builtins()),
        }
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatCompletion>) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Replace the schema registry.
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = Arc::new(schemas);
        self
    }

    /// Look up `schema_id` in the catalog, fetch its artifact, and resolve
    /// the definition. Any failure is `ProvisioningFailed` for `schema_id`.
    pub async fn load_schema(
        &self,
        schema_id: &str,
    ) -> Result<(SchemaRecord, Arc<dyn SchemaDefinition>)> {
        let config = &self.config;
        let record = self
            .catalog
            .get_schema(&config.catalog.database, &config.catalog.collection, schema_id)
            .await
            .map_err(|e| ContentFlowError::provisioning(schema_id, format!("catalog lookup: {e}")))?
            .ok_or_else(|| {
                ContentFlowError::provisioning(schema_id, "schema not found in catalog")
            })?;

        let container = format!("{}/Schemas/{schema_id}", config.storage.configuration_container);
        let artifact = self
            .blob_store
            .download(&container, &record.file_name)
            .await
            .map_err(|e| {
                ContentFlowError::provisioning(schema_id, format!("schema artifact: {e}"))
            })?;
        let artifact = String::from_utf8(artifact.to_vec()).map_err(|e| {
            ContentFlowError::provisioning(schema_id, format!("schema artifact is not UTF-8: {e}"))
        })?;

        let definition = self
            .schemas
            .resolve(&record.class_name, &artifact)
            .map_err(|e| ContentFlowError::provisioning(schema_id, e.to_string()))?;
        Ok((record, definition))
    }
}
