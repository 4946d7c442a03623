//! Shared types, error model, and configuration for ContentFlow.
//!
//! This crate is the foundation depended on by all other ContentFlow crates.
//! It provides:
//! - [`ContentFlowError`]: the unified error type
//! - Domain types ([`ArtifactFile`], [`ArtifactType`], [`StepResult`], [`ProcessId`])
//! - Configuration ([`AppConfig`], config loading and `APP_*` overrides)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnalysisConfig, AppConfig, CatalogConfig, ChatConfig, LoggingConfig, PipelineConfig,
    StorageConfig, apply_env_overrides, config_dir, config_file_path, init_config, load_config,
    load_config_from, read_secret_env,
};
pub use error::{ContentFlowError, Result};
pub use types::{
    ArtifactFile, ArtifactType, ByteStream, PipelineLogEntry, ProcessId, StepResult,
};
