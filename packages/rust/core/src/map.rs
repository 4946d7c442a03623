//! Mapping step: ask a chat model for the fields a schema marks as generated
//! and merge its answer over the values the extraction step read.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use contentflow_analysis::{AnalyzedResult, ChatRequest, ContentPart};
use contentflow_shared::{ArtifactFile, ArtifactType, ContentFlowError, Result, StepResult};
use contentflow_storage::{ArtifactTransfer, BlobStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument};

use crate::context::MessageContext;
use crate::schema::{ExtractionMethod, FieldDefinition, FieldKind, FieldSchema};
use crate::step::{AppContext, Handler};

/// Artifact name of the mapping output.
pub const MAP_OUTPUT_NAME: &str = "gpt_output.json";

/// Step whose output this step reads.
const EXTRACT_STEP: &str = "extract";

const RESULT_LOG_MESSAGE: &str = "GPT Extraction Result has been added";

const SYSTEM_PROMPT: &str = "You are an AI assistant that extracts data from documents.";

const INSTRUCTIONS: &str = "Extract the data from this Document.
- If a value is not present, provide null.
- Some values must be inferred based on the rules defined in the policy and Contents.
- Dates should be in the format YYYY-MM-DD.";

/// Body of the mapping artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedDocument {
    pub schema_id: String,
    pub class_name: String,
    /// Extracted values with the generated ones merged over them.
    pub fields: Value,
    /// Top-level fields the chat model was asked for.
    #[serde(default)]
    pub generated: Vec<String>,
    /// Raw chat response. Absent when the schema generates nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<Value>,
}

pub struct MapHandler {
    app: AppContext,
    name: String,
}

impl MapHandler {
    pub fn new(app: AppContext, name: impl Into<String>) -> Self {
        Self {
            app,
            name: name.into(),
        }
    }

    async fn request(
        &self,
        generated: &FieldSchema,
        markdown: &str,
        source: &ArtifactFile,
    ) -> Result<ChatRequest> {
        let mut user = vec![ContentPart::text(INSTRUCTIONS), ContentPart::text(markdown)];
        if let Some(mime_type) = image_type(source) {
            let image = self
                .app
                .blob_store
                .download(&self.app.config.storage.process_container, &source.blob_name())
                .await?;
            debug!(mime_type, bytes = image.len(), "attaching source image");
            user.push(ContentPart::image(mime_type, &image));
        }
        Ok(ChatRequest {
            system: SYSTEM_PROMPT.into(),
            user,
            schema_name: generated.name.clone(),
            response_schema: response_schema(generated),
        })
    }
}

#[async_trait]
impl Handler for MapHandler {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(step = %self.name, process_id = %ctx.process_id()))]
    async fn execute(&self, ctx: &mut MessageContext) -> Result<StepResult> {
        let started = Instant::now();

        let source = ctx.get_source_files().first().cloned().ok_or_else(|| {
            ContentFlowError::input_missing(format!("step '{}' needs a source file", self.name))
        })?;
        let schema_id = ctx
            .schema_id()
            .map(str::to_string)
            .ok_or_else(|| ContentFlowError::input_missing("run has no schema id"))?;

        let container = &self.app.config.storage.process_container;
        let store = self.app.blob_store.as_ref();

        let extracted = ctx
            .download_output_json(store, container, EXTRACT_STEP, ArtifactType::ExtractedContent)
            .await?;
        let extracted: AnalyzedResult = serde_json::from_value(extracted).map_err(|e| {
            ContentFlowError::validation(format!("extraction output is unreadable: {e}"))
        })?;

        let (record, definition) = self.app.load_schema(&schema_id).await?;
        let mut fields = Value::Object(extracted.plain_fields());

        let (generated, completion) = match generated_only(&definition.field_schema()) {
            None => {
                info!("schema has no generated fields, nothing to ask");
                (Vec::new(), None)
            }
            Some(schema) => {
                let chat = self.app.chat.as_ref().ok_or_else(|| {
                    ContentFlowError::config(format!(
                        "step '{}' needs a chat deployment ([chat] section)",
                        self.name
                    ))
                })?;
                let request = self.request(&schema, extracted.markdown(), &source).await?;
                let output = chat.complete(&request).await?;
                merge_generated(&mut fields, output.content);
                let names = schema.fields.into_iter().map(|f| f.name).collect();
                (names, Some(output.response))
            }
        };

        let document = MappedDocument {
            schema_id,
            class_name: record.class_name,
            fields,
            generated,
            completion,
        };
        let payload = serde_json::to_string(&document)?;

        if ctx.active_step() != Some(self.name.as_str()) {
            ctx.begin_step(&self.name);
        }
        let file = ctx.add_file(MAP_OUTPUT_NAME, ArtifactType::SchemaMappedData);
        file.append_log(&self.name, RESULT_LOG_MESSAGE);
        file.upload_json_text(store, container, payload).await?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(elapsed_ms, file = MAP_OUTPUT_NAME, "mapped data stored");

        Ok(StepResult::success(ctx.process_id(), &self.name, MAP_OUTPUT_NAME)
            .with_elapsed_ms(elapsed_ms))
    }
}

/// Image types the chat model reads directly. Other documents go by markdown only.
fn image_type(source: &ArtifactFile) -> Option<&'static str> {
    let declared = source.mime_type.as_deref().map(str::to_ascii_lowercase);
    let extension = Path::new(&source.name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match (declared.as_deref(), extension.as_deref()) {
        (Some("image/png"), _) | (None, Some("png")) => Some("image/png"),
        (Some("image/jpeg"), _) | (None, Some("jpg" | "jpeg")) => Some("image/jpeg"),
        _ => None,
    }
}

/// The part of `schema` holding generated fields, with the objects and arrays
/// that lead to them. `None` when nothing is generated.
pub fn generated_only(schema: &FieldSchema) -> Option<FieldSchema> {
    let fields = prune_fields(&schema.fields);
    (!fields.is_empty()).then(|| FieldSchema {
        name: schema.name.clone(),
        description: schema.description.clone(),
        fields,
    })
}

fn prune_fields(fields: &[FieldDefinition]) -> Vec<FieldDefinition> {
    fields
        .iter()
        .filter_map(|field| {
            if field.method == Some(ExtractionMethod::Generate) {
                return Some(field.clone());
            }
            prune_kind(&field.kind).map(|kind| FieldDefinition {
                kind,
                ..field.clone()
            })
        })
        .collect()
}

fn prune_kind(kind: &FieldKind) -> Option<FieldKind> {
    match kind {
        FieldKind::Object { properties } => {
            let properties = prune_fields(properties);
            (!properties.is_empty()).then_some(FieldKind::Object { properties })
        }
        FieldKind::Array { items } => prune_kind(items).map(|items| FieldKind::Array {
            items: Box::new(items),
        }),
        _ => None,
    }
}

/// Strict JSON schema for a structured chat response. Every property is
/// required and nullable, so "not present" is an explicit `null`.
fn response_schema(schema: &FieldSchema) -> Value {
    let mut root = object_schema(&schema.fields);
    root["type"] = json!("object");
    if !schema.description.is_empty() {
        root["description"] = json!(schema.description);
    }
    root
}

fn object_schema(fields: &[FieldDefinition]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|field| {
            let mut schema = kind_schema(&field.kind);
            if let Some(description) = &field.description {
                schema["description"] = json!(description);
            }
            (field.name.clone(), schema)
        })
        .collect();
    let required: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    json!({
        "type": ["object", "null"],
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn kind_schema(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::String | FieldKind::Date => json!({"type": ["string", "null"]}),
        FieldKind::Number => json!({"type": ["number", "null"]}),
        FieldKind::Integer => json!({"type": ["integer", "null"]}),
        FieldKind::Boolean => json!({"type": ["boolean", "null"]}),
        FieldKind::Array { items } => {
            json!({"type": ["array", "null"], "items": kind_schema(items)})
        }
        FieldKind::Object { properties } => object_schema(properties),
    }
}

/// Overlay generated values on extracted ones. Objects merge by key and
/// arrays by position; a generated `null` never erases an extracted value.
fn merge_generated(base: &mut Value, generated: Value) {
    match (base, generated) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(generated)) => {
            for (key, value) in generated {
                match base.get_mut(&key) {
                    Some(slot) => merge_generated(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(generated)) => {
            for (index, value) in generated.into_iter().enumerate() {
                match base.get_mut(index) {
                    Some(slot) => merge_generated(slot, value),
                    None => base.push(value),
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DataPipeline;
    use crate::extract::ExtractHandler;
    use crate::schema::{CommercialInvoice, SchemaDefinition};
    use crate::testing::{FakeAnalysis, FakeCatalog, FakeChat, Harness, SCHEMA_ID};

    fn dangerous_goods_answer() -> Value {
        json!({
            "items": [{"is_dangerous_goods": true, "dangerous_goods_class": "3"}]
        })
    }

    async fn extracted(h: &Harness, file_name: &str, payload: &'static [u8]) -> MessageContext {
        let mut ctx = h.context_with_document(&["extract", "map"], file_name, payload).await;
        ctx.begin_step("extract");
        let result = ExtractHandler::new(h.app.clone(), "extract")
            .execute(&mut ctx)
            .await
            .expect("extract");
        ctx.complete_step(result).expect("complete extract");
        ctx
    }

    async fn stored_document(h: &Harness, ctx: &MessageContext) -> MappedDocument {
        let json = ctx
            .download_output_json(
                &h.store,
                &h.app.config.storage.process_container,
                "map",
                ArtifactType::SchemaMappedData,
            )
            .await
            .expect("mapped output");
        serde_json::from_value(json).expect("mapped document")
    }

    #[tokio::test]
    async fn generated_fields_are_merged_over_extracted_values() {
        let h = Harness::with_chat(
            FakeAnalysis::with_existing(SCHEMA_ID),
            FakeCatalog::with_invoice(),
            FakeChat::answering(dangerous_goods_answer()),
        )
        .await;
        let mut ctx = extracted(&h, "invoice.pdf", b"%PDF-1.7 invoice").await;

        let result = MapHandler::new(h.app.clone(), "map")
            .execute(&mut ctx)
            .await
            .expect("map");

        assert_eq!(result.process_id, ctx.process_id());
        assert_eq!(result.get_str("file_name"), Some(MAP_OUTPUT_NAME));

        let document = stored_document(&h, &ctx).await;
        assert_eq!(document.class_name, "CommercialInvoice");
        assert_eq!(document.generated, vec!["items"]);
        assert_eq!(document.fields["invoice_number"], "INV-001");
        let item = &document.fields["items"][0];
        assert_eq!(item["part_number"], "66039");
        assert_eq!(item["quantity"], 1);
        assert_eq!(item["is_dangerous_goods"], true);
        assert_eq!(item["dangerous_goods_class"], "3");
        assert!(document.completion.is_some());

        let file = ctx.find_file("map", ArtifactType::SchemaMappedData).expect("artifact");
        assert_eq!(file.name, MAP_OUTPUT_NAME);
        assert_eq!(file.log_entries.len(), 1);
        assert_eq!(file.log_entries[0].message, RESULT_LOG_MESSAGE);
    }

    #[tokio::test]
    async fn request_asks_only_for_generated_fields() {
        let h = Harness::with_chat(
            FakeAnalysis::with_existing(SCHEMA_ID),
            FakeCatalog::with_invoice(),
            FakeChat::answering(dangerous_goods_answer()),
        )
        .await;
        let mut ctx = extracted(&h, "invoice.pdf", b"%PDF-1.7 invoice").await;

        MapHandler::new(h.app.clone(), "map").execute(&mut ctx).await.expect("map");

        let requests = h.chat.requests.lock().unwrap();
        let request = &requests[0];
        let schema = &request.response_schema;
        assert_eq!(schema["required"], json!(["items"]));
        let item = &schema["properties"]["items"]["items"];
        assert_eq!(item["required"], json!(["is_dangerous_goods", "dangerous_goods_class"]));
        assert_eq!(item["additionalProperties"], false);
        assert_eq!(request.user[1], ContentPart::text("# Invoice INV-001"));
        assert_eq!(request.user.len(), 2);
    }

    #[tokio::test]
    async fn image_sources_are_attached() {
        let h = Harness::with_chat(
            FakeAnalysis::with_existing(SCHEMA_ID),
            FakeCatalog::with_invoice(),
            FakeChat::answering(dangerous_goods_answer()),
        )
        .await;
        let mut ctx = extracted(&h, "scan.PNG", b"png").await;

        MapHandler::new(h.app.clone(), "map").execute(&mut ctx).await.expect("map");

        let requests = h.chat.requests.lock().unwrap();
        assert_eq!(requests[0].user.last(), Some(&ContentPart::image("image/png", b"png")));
    }

    #[tokio::test]
    async fn missing_extraction_output_is_input_missing() {
        let h = Harness::with_chat(
            FakeAnalysis::with_existing(SCHEMA_ID),
            FakeCatalog::with_invoice(),
            FakeChat::answering(dangerous_goods_answer()),
        )
        .await;
        let mut ctx = h.context_with_source(&["map"]).await;

        let err = MapHandler::new(h.app.clone(), "map").execute(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ContentFlowError::InputMissing { .. }));
        assert_eq!(h.chat.calls(), 0);
        assert!(ctx.data_pipeline.files.is_empty());
    }

    #[tokio::test]
    async fn chat_failure_leaves_no_artifact() {
        let h = Harness::new(FakeAnalysis::with_existing(SCHEMA_ID), FakeCatalog::with_invoice())
            .await;
        let mut ctx = extracted(&h, "invoice.pdf", b"%PDF-1.7 invoice").await;

        let err = MapHandler::new(h.app.clone(), "map").execute(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ContentFlowError::AnalysisFailed { .. }));
        assert_eq!(h.chat.calls(), 1);
        assert!(ctx.find_file("map", ArtifactType::SchemaMappedData).is_none());
    }

    #[tokio::test]
    async fn schema_without_generated_fields_skips_chat() {
        let mut catalog = FakeCatalog::with_invoice();
        if let Some(record) = catalog.records.get_mut(SCHEMA_ID) {
            record.class_name = "Receipt".into();
        }
        let h = Harness::new(FakeAnalysis::with_existing(SCHEMA_ID), catalog).await;
        let artifact = r#"{"name": "Receipt", "fields": [
            {"name": "invoice_number", "type": "string"}
        ]}"#;
        h.store
            .upload(
                &format!("{}/Schemas/{SCHEMA_ID}", h.app.config.storage.configuration_container),
                "commercial_invoice.json",
                bytes::Bytes::from_static(artifact.as_bytes()),
                "application/json",
            )
            .await
            .unwrap();
        let mut ctx = extracted(&h, "invoice.pdf", b"%PDF-1.7 invoice").await;

        MapHandler::new(h.app.clone(), "map").execute(&mut ctx).await.expect("map");

        assert_eq!(h.chat.calls(), 0);
        let document = stored_document(&h, &ctx).await;
        assert!(document.generated.is_empty());
        assert!(document.completion.is_none());
        assert_eq!(document.fields["invoice_number"], "INV-001");
    }

    #[tokio::test]
    async fn no_source_file_fails_first() {
        let h = Harness::new(FakeAnalysis::default(), FakeCatalog::with_invoice()).await;
        let mut ctx = MessageContext::new(DataPipeline::new(Some(SCHEMA_ID.into()), vec![]));

        let err = MapHandler::new(h.app.clone(), "map").execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ContentFlowError::InputMissing { .. }));
        assert_eq!(FakeAnalysis::count(&h.catalog.calls), 0);
    }

    #[test]
    fn invoice_generates_only_dangerous_goods_fields() {
        let schema = generated_only(&CommercialInvoice.field_schema()).expect("generated");
        assert_eq!(schema.fields.len(), 1);
        let FieldKind::Array { items } = &schema.fields[0].kind else {
            panic!("items should stay an array");
        };
        let FieldKind::Object { properties } = items.as_ref() else {
            panic!("items should hold objects");
        };
        let names: Vec<&str> = properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["is_dangerous_goods", "dangerous_goods_class"]);
    }

    #[test]
    fn null_answers_do_not_erase_extracted_values() {
        let mut base = json!({"total": 12.5, "items": [{"a": 1}], "note": null});
        merge_generated(
            &mut base,
            json!({"total": null, "items": [{"b": 2}, {"b": 3}], "note": "x"}),
        );
        assert_eq!(
            base,
            json!({"total": 12.5, "items": [{"a": 1, "b": 2}, {"b": 3}], "note": "x"})
        );
    }
}
