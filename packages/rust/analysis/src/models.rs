//! Wire types for the document analysis service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Analyzer every generated template builds on.
pub const BASE_ANALYZER_ID: &str = "prebuilt-documentAnalyzer";

// ---------------------------------------------------------------------------
// Analyzer templates
// ---------------------------------------------------------------------------

/// Body of a create-analyzer request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerTemplate {
    #[serde(default)]
    pub description: String,
    pub base_analyzer_id: String,
    #[serde(default)]
    pub config: AnalyzerConfig,
    pub field_schema: FieldSchemaSpec,
}

/// Extraction switches sent with a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerConfig {
    pub return_details: bool,
    pub enable_formula: bool,
    pub disable_content_filtering: bool,
    pub estimate_field_source_and_confidence: bool,
    pub table_format: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            return_details: true,
            enable_formula: false,
            disable_content_filtering: false,
            estimate_field_source_and_confidence: true,
            table_format: "html".into(),
        }
    }
}

/// `fieldSchema` block of a template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchemaSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: BTreeMap<String, FieldSpec>,
}

/// One field (possibly nested) in a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, FieldSpec>>,
}

// ---------------------------------------------------------------------------
// Analyzer detail
// ---------------------------------------------------------------------------

/// Analyzer description returned by the detail endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerDetail {
    pub analyzer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Everything else the service returns.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A submitted long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub analyzer_id: String,
    /// Absolute URL from the `Operation-Location` response header.
    pub operation_location: String,
}

/// Status reported by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl JobStatus {
    /// Parse a status string case-insensitively.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "notstarted" => Self::NotStarted,
            "running" | "inprogress" => Self::Running,
            "succeeded" => Self::Succeeded,
            "failed" | "cancelled" | "canceled" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Analyzed result
// ---------------------------------------------------------------------------

/// Terminal payload of a successful analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedResult {
    pub id: String,
    pub status: String,
    pub result: AnalysisPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    #[serde(default)]
    pub analyzer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Value>,
    #[serde(default)]
    pub contents: Vec<DocumentContent>,
}

/// One analyzed document (or page range).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContent {
    #[serde(default)]
    pub markdown: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<Value>,
}

/// An extracted field value. Exactly one `value_*` member is usually set,
/// matching `field_type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValue {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_number: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_integer: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_array: Option<Vec<FieldValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_object: Option<BTreeMap<String, FieldValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl AnalyzedResult {
    /// Fields of the first content block, if any.
    pub fn fields(&self) -> Option<&BTreeMap<String, FieldValue>> {
        self.result.contents.first().map(|c| &c.fields)
    }

    /// Markdown of the first content block, or an empty string.
    pub fn markdown(&self) -> &str {
        self.result
            .contents
            .first()
            .map(|c| c.markdown.as_str())
            .unwrap_or_default()
    }

    /// Fields of the first content block as plain JSON, keyed by field name.
    pub fn plain_fields(&self) -> serde_json::Map<String, Value> {
        self.fields()
            .map(|fields| {
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_plain()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl FieldValue {
    /// The value without confidence and source metadata. A field the service
    /// found no value for becomes `null`.
    pub fn to_plain(&self) -> Value {
        if let Some(items) = &self.value_array {
            return Value::Array(items.iter().map(Self::to_plain).collect());
        }
        if let Some(object) = &self.value_object {
            return Value::Object(
                object
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_plain()))
                    .collect(),
            );
        }
        if let Some(text) = self.value_string.as_ref().or(self.value_date.as_ref()) {
            return Value::String(text.clone());
        }
        if let Some(integer) = self.value_integer {
            return Value::from(integer);
        }
        if let Some(number) = self.value_number {
            return serde_json::Number::from_f64(number).map_or(Value::Null, Value::Number);
        }
        self.value_boolean.map_or(Value::Null, Value::Bool)
    }
}
