//! Translate a [`FieldSchema`] into the analysis service's analyzer template.

use std::collections::BTreeMap;

use contentflow_analysis::{
    AnalyzerConfig, AnalyzerTemplate, BASE_ANALYZER_ID, FieldSchemaSpec, FieldSpec,
};

use crate::schema::{ExtractionMethod, FieldDefinition, FieldKind, FieldSchema};

/// Build the create-analyzer body for `schema`.
///
/// Top-level fields without an explicit method are extracted; nested fields
/// inherit from their parent and carry no method of their own.
pub fn build_analyzer_template(schema: &FieldSchema) -> AnalyzerTemplate {
    let fields = schema
        .fields
        .iter()
        .map(|field| {
            let mut spec = field_spec(&field.kind, field.description.as_deref());
            spec.method = Some(
                field
                    .method
                    .unwrap_or(ExtractionMethod::Extract)
                    .as_str()
                    .to_string(),
            );
            (field.name.clone(), spec)
        })
        .collect();

    AnalyzerTemplate {
        description: schema.description.clone(),
        base_analyzer_id: BASE_ANALYZER_ID.to_string(),
        config: AnalyzerConfig::default(),
        field_schema: FieldSchemaSpec {
            name: Some(schema.name.clone()),
            description: (!schema.description.is_empty()).then(|| schema.description.clone()),
            fields,
        },
    }
}

fn field_spec(kind: &FieldKind, description: Option<&str>) -> FieldSpec {
    let mut spec = FieldSpec {
        field_type: type_name(kind).to_string(),
        method: None,
        description: description.map(str::to_string),
        items: None,
        properties: None,
    };
    match kind {
        FieldKind::Array { items } => spec.items = Some(Box::new(field_spec(items, None))),
        FieldKind::Object { properties } => spec.properties = Some(nested(properties)),
        _ => {}
    }
    spec
}

fn nested(properties: &[FieldDefinition]) -> BTreeMap<String, FieldSpec> {
    properties
        .iter()
        .map(|p| {
            let mut spec = field_spec(&p.kind, p.description.as_deref());
            spec.method = p.method.map(|m| m.as_str().to_string());
            (p.name.clone(), spec)
        })
        .collect()
}

fn type_name(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::String => "string",
        FieldKind::Number => "number",
        FieldKind::Integer => "integer",
        FieldKind::Boolean => "boolean",
        FieldKind::Date => "date",
        FieldKind::Array { .. } => "array",
        FieldKind::Object { .. } => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CommercialInvoice, SchemaDefinition};

    #[test]
    fn invoice_template_shape() {
        let template = build_analyzer_template(&CommercialInvoice.field_schema());
        assert_eq!(template.base_analyzer_id, BASE_ANALYZER_ID);
        assert_eq!(template.field_schema.name.as_deref(), Some("CommercialInvoice"));

        let fields = &template.field_schema.fields;
        assert_eq!(fields["invoice_number"].field_type, "string");
        assert_eq!(fields["invoice_number"].method.as_deref(), Some("extract"));
        assert_eq!(fields["invoice_date"].field_type, "date");

        let items = &fields["items"];
        assert_eq!(items.field_type, "array");
        let item = items.items.as_ref().expect("array items");
        assert_eq!(item.field_type, "object");
        let props = item.properties.as_ref().expect("item properties");
        assert_eq!(props["quantity"].field_type, "integer");
        assert_eq!(props["dangerous_goods_class"].method.as_deref(), Some("generate"));
        assert!(props["part_number"].method.is_none());
    }

    #[test]
    fn template_json_uses_service_field_names() {
        let schema = FieldSchema {
            name: "Tiny".into(),
            description: String::new(),
            fields: vec![
                FieldDefinition::new("flag", FieldKind::Boolean, "")
                    .with_method(ExtractionMethod::Classify),
            ],
        };
        let json = serde_json::to_value(build_analyzer_template(&schema)).expect("serialize");
        assert_eq!(json["baseAnalyzerId"], "prebuilt-documentAnalyzer");
        assert_eq!(json["fieldSchema"]["fields"]["flag"]["type"], "boolean");
        assert_eq!(json["fieldSchema"]["fields"]["flag"]["method"], "classify");
        assert!(json["fieldSchema"].get("description").is_none());
        assert!(json["fieldSchema"]["fields"]["flag"].get("description").is_none());
    }
}
