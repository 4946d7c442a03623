//! Pipeline orchestration and step logic for ContentFlow.
//!
//! This crate ties the object store, schema catalog, analysis service and
//! chat model together into pipeline steps ([`ExtractHandler`],
//! [`MapHandler`]) and a linear runner that executes them against one run's
//! [`MessageContext`].

pub mod context;
pub mod extract;
pub mod map;
pub mod pipeline;
pub mod schema;
pub mod step;
pub mod template;

#[cfg(test)]
mod testing;

pub use context::{DataPipeline, MessageContext, PipelineStatus};
pub use extract::{EXTRACT_OUTPUT_NAME, ExtractHandler};
pub use map::{MAP_OUTPUT_NAME, MapHandler, MappedDocument, generated_only};
pub use pipeline::{
    HandlerFactory, HandlerRegistry, Pipeline, ProgressReporter, SilentProgress,
};
pub use schema::{
    CommercialInvoice, DeclarativeSchema, ExtractionMethod, FieldDefinition, FieldKind,
    FieldSchema, SchemaDefinition, SchemaRegistry,
};
pub use step::{AppContext, Handler};
pub use template::build_analyzer_template;
