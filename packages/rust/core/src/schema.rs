//! Schema definitions and the registry that resolves them by class name.
//!
//! A catalog record names a class; the registry maps that name to a compiled
//! [`SchemaDefinition`]. Unknown class names fall back to parsing the schema
//! artifact as a declarative JSON field document.

use std::collections::HashMap;
use std::sync::Arc;

use contentflow_shared::{ContentFlowError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Field model
// ---------------------------------------------------------------------------

/// How the analysis service should obtain a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Read directly from the document.
    Extract,
    /// Infer from the document content.
    Generate,
    /// Pick from a closed set.
    Classify,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Generate => "generate",
            Self::Classify => "classify",
        }
    }
}

/// Value shape of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Date,
    Array { items: Box<FieldKind> },
    Object { properties: Vec<FieldDefinition> },
}

/// One named field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<ExtractionMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            method: None,
            description: (!description.is_empty()).then(|| description.to_string()),
        }
    }

    pub fn with_method(mut self, method: ExtractionMethod) -> Self {
        self.method = Some(method);
        self
    }
}

/// A full schema: the fields the analyzer should extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub fields: Vec<FieldDefinition>,
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A schema the registry can hand out.
pub trait SchemaDefinition: Send + Sync {
    fn class_name(&self) -> &str;
    fn field_schema(&self) -> FieldSchema;
}

/// Schema parsed from a JSON artifact at provisioning time.
#[derive(Debug, Clone)]
pub struct DeclarativeSchema {
    class_name: String,
    schema: FieldSchema,
}

impl DeclarativeSchema {
    pub fn parse(class_name: &str, document: &str) -> Result<Self> {
        let schema: FieldSchema = serde_json::from_str(document).map_err(|e| {
            ContentFlowError::validation(format!(
                "schema artifact for '{class_name}' is neither a registered class \
                 nor a JSON field document: {e}"
            ))
        })?;
        if schema.fields.is_empty() {
            return Err(ContentFlowError::validation(format!(
                "schema '{class_name}' declares no fields"
            )));
        }
        Ok(Self {
            class_name: class_name.to_string(),
            schema,
        })
    }
}

impl SchemaDefinition for DeclarativeSchema {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn field_schema(&self) -> FieldSchema {
        self.schema.clone()
    }
}

/// Commercial invoice for international shipping.
pub struct CommercialInvoice;

impl CommercialInvoice {
    fn address() -> FieldKind {
        use FieldKind::String as S;
        FieldKind::Object {
            properties: vec![
                FieldDefinition::new(
                    "company_name",
                    S,
                    "Name of the company, e.g. BC Distribution B.V.",
                ),
                FieldDefinition::new("street", S, "Street address, e.g. Pelmolenlaan 15"),
                FieldDefinition::new("city", S, "City name, e.g. Woerden"),
                FieldDefinition::new("postal_code", S, "Postal code, e.g. 3447 GW"),
                FieldDefinition::new("state", S, "State or region, e.g. North Holland"),
                FieldDefinition::new("country", S, "Country name, e.g. Netherlands"),
            ],
        }
    }

    fn item() -> FieldKind {
        use FieldKind::{Boolean, Integer, Number, String as S};
        FieldKind::Object {
            properties: vec![
                FieldDefinition::new(
                    "item_description",
                    S,
                    "Details of the goods including product, size, and lot information",
                ),
                FieldDefinition::new(
                    "part_number",
                    S,
                    "Unique identifier for the product, e.g. 66039",
                ),
                FieldDefinition::new(
                    "eu_hts_no",
                    S,
                    "EU Harmonized Tariff Schedule code, e.g. 34029010",
                ),
                FieldDefinition::new(
                    "country_of_origin",
                    S,
                    "Country code where goods were manufactured, e.g. IE",
                ),
                FieldDefinition::new("quantity", Integer, "Number of units shipped, e.g. 1"),
                FieldDefinition::new("unit_price", Number, "Price per unit, e.g. 100336.00"),
                FieldDefinition::new("total_price", Number, "Total price for this item"),
                FieldDefinition::new(
                    "net_weight",
                    Number,
                    "Weight of goods excluding packaging in KG",
                ),
                FieldDefinition::new(
                    "gross_weight",
                    Number,
                    "Total weight including packaging in KG",
                ),
                FieldDefinition::new("currency", S, "Currency code, e.g. KRW, USD, EUR"),
                FieldDefinition::new(
                    "is_dangerous_goods",
                    Boolean,
                    "Whether the item is classified as dangerous goods by UN standards",
                )
                .with_method(ExtractionMethod::Generate),
                FieldDefinition::new(
                    "un_number",
                    S,
                    "UN identification number for dangerous goods",
                ),
                FieldDefinition::new(
                    "dangerous_goods_class",
                    S,
                    "UN dangerous goods class; inferred from UN standards when not printed",
                )
                .with_method(ExtractionMethod::Generate),
            ],
        }
    }
}

impl SchemaDefinition for CommercialInvoice {
    fn class_name(&self) -> &str {
        "CommercialInvoice"
    }

    fn field_schema(&self) -> FieldSchema {
        use FieldKind::{Date, Integer, Number, String as S};
        FieldSchema {
            name: "CommercialInvoice".into(),
            description: "Commercial invoice for international shipping".into(),
            fields: vec![
                FieldDefinition::new(
                    "seller_exporter",
                    Self::address(),
                    "Company responsible for selling and exporting the goods",
                ),
                FieldDefinition::new(
                    "seller_exporter_vat",
                    S,
                    "VAT identification number for EU tax purposes, e.g. NL 850641469B02",
                ),
                FieldDefinition::new(
                    "ship_to",
                    Self::address(),
                    "Consignee or final recipient of the goods",
                ),
                FieldDefinition::new(
                    "invoice_number",
                    S,
                    "Unique identifier assigned to the invoice",
                ),
                FieldDefinition::new("invoice_date", Date, "Date when the invoice was issued"),
                FieldDefinition::new(
                    "customer_number",
                    S,
                    "Internal reference number for the buyer",
                ),
                FieldDefinition::new(
                    "ship_to_site_number",
                    S,
                    "Identifier of the destination site",
                ),
                FieldDefinition::new(
                    "ship_method",
                    S,
                    "Mode of transport used to ship goods, e.g. NEF-AIR",
                ),
                FieldDefinition::new(
                    "terms_of_delivery",
                    S,
                    "Incoterm defining delivery responsibilities",
                ),
                FieldDefinition::new("payment_terms", S, "Payment conditions, e.g. IMMEDIATE"),
                FieldDefinition::new("stop_id", S, "Logistics reference for shipment stop"),
                FieldDefinition::new(
                    "items",
                    FieldKind::Array {
                        items: Box::new(Self::item()),
                    },
                    "List of items included in the invoice",
                ),
                FieldDefinition::new(
                    "number_of_boxes",
                    Integer,
                    "Total number of packages in shipment",
                ),
                FieldDefinition::new(
                    "net_value",
                    Number,
                    "Value of goods excluding additional charges",
                ),
                FieldDefinition::new(
                    "total_value",
                    Number,
                    "Final invoice value including all charges",
                ),
                FieldDefinition::new(
                    "currency",
                    S,
                    "Primary currency for the invoice, e.g. KRW, USD, EUR",
                ),
                FieldDefinition::new(
                    "total_net_weight",
                    Number,
                    "Total net weight of all items in KG",
                ),
                FieldDefinition::new(
                    "total_gross_weight",
                    Number,
                    "Total gross weight of all items in KG",
                ),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Class name → compiled schema.
#[derive(Default)]
pub struct SchemaRegistry {
    definitions: HashMap<String, Arc<dyn SchemaDefinition>>,
}

impl SchemaRegistry {
    /// An empty registry; every lookup falls back to the declarative parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in schemas.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CommercialInvoice));
        registry
    }

    pub fn register(&mut self, definition: Arc<dyn SchemaDefinition>) {
        self.definitions
            .insert(definition.class_name().to_string(), definition);
    }

    pub fn get(&self, class_name: &str) -> Option<Arc<dyn SchemaDefinition>> {
        self.definitions.get(class_name).cloned()
    }

    /// Registered class names, sorted.
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve `class_name`, parsing `artifact` when no compiled schema exists.
    pub fn resolve(&self, class_name: &str, artifact: &str) -> Result<Arc<dyn SchemaDefinition>> {
        if let Some(definition) = self.get(class_name) {
            debug!(class_name, "using registered schema");
            return Ok(definition);
        }
        debug!(class_name, "falling back to declarative schema");
        Ok(Arc::new(DeclarativeSchema::parse(class_name, artifact)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECLARATIVE: &str = r#"{
        "name": "Receipt",
        "description": "Retail receipt",
        "fields": [
            {"name": "merchant", "type": "string", "description": "Store name"},
            {"name": "total", "type": "number"},
            {"name": "lines", "type": "array", "items": {
                "type": "object",
                "properties": [{"name": "sku", "type": "string", "method": "extract"}]
            }}
        ]
    }"#;

    #[test]
    fn builtin_invoice_is_registered() {
        let registry = SchemaRegistry::with_builtins();
        assert_eq!(registry.class_names(), vec!["CommercialInvoice"]);

        let schema = registry
            .resolve("CommercialInvoice", "ignored")
            .expect("resolve")
            .field_schema();
        assert!(schema.fields.iter().any(|f| f.name == "invoice_number"));
        let items = schema.fields.iter().find(|f| f.name == "items").expect("items");
        assert!(matches!(items.kind, FieldKind::Array { .. }));
    }

    #[test]
    fn unknown_class_falls_back_to_declarative() {
        let registry = SchemaRegistry::with_builtins();
        let definition = registry.resolve("Receipt", DECLARATIVE).expect("resolve");
        assert_eq!(definition.class_name(), "Receipt");

        let schema = definition.field_schema();
        assert_eq!(schema.fields.len(), 3);
        assert_eq!(schema.fields[1].kind, FieldKind::Number);
        let FieldKind::Array { items } = &schema.fields[2].kind else {
            panic!("expected array");
        };
        let FieldKind::Object { properties } = items.as_ref() else {
            panic!("expected object items");
        };
        assert_eq!(properties[0].method, Some(ExtractionMethod::Extract));
    }

    #[test]
    fn unparseable_artifact_is_rejected() {
        let registry = SchemaRegistry::new();
        assert!(registry.resolve("Invoice", "class Invoice(BaseModel): ...").is_err());
        assert!(registry
            .resolve("Empty", r#"{"name": "Empty", "fields": []}"#)
            .is_err());
    }
}
