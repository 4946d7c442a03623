//! Storage collaborators for the ContentFlow pipeline.
//!
//! - [`BlobStore`]: object store client ([`HttpBlobStore`], [`MemoryBlobStore`])
//! - [`ArtifactTransfer`]: upload/download helpers on [`contentflow_shared::ArtifactFile`]
//! - [`SchemaCatalog`]: schema record lookup ([`Catalog`] over libSQL)

mod artifact;
mod blob;
mod catalog;
mod migrations;

pub use artifact::{ArtifactTransfer, JSON_CONTENT_TYPE};
pub use blob::{BlobStore, HttpBlobStore, MemoryBlobStore, StoredBlob};
pub use catalog::{Catalog, SchemaCatalog, SchemaRecord};
