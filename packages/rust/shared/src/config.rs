//! Application configuration for ContentFlow.
//!
//! User config lives at `~/.contentflow/contentflow.toml`.
//! `APP_*` environment variables override config file values, which override defaults.
//! The loaded [`AppConfig`] is built once at process start and passed to every
//! component that needs it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ContentFlowError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "contentflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".contentflow";

// ---------------------------------------------------------------------------
// Config structs (matching contentflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Object store endpoint and containers.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Schema catalog (document database).
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Document analysis service.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Chat completion deployment used by the `map` step.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Configured step order.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging switches.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Object store account URL, e.g. `https://account.blob.core.windows.net`.
    #[serde(default)]
    pub blob_url: String,

    /// Name of the env var holding an optional SAS token (never store the token itself).
    #[serde(default = "default_sas_token_env")]
    pub sas_token_env: String,

    /// Container holding schema implementation artifacts.
    #[serde(default = "default_configuration_container")]
    pub configuration_container: String,

    /// Container holding per-run inputs and outputs.
    #[serde(default = "default_process_container")]
    pub process_container: String,

    /// HTTP timeout for a single store request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_url: String::new(),
            sas_token_env: default_sas_token_env(),
            configuration_container: default_configuration_container(),
            process_container: default_process_container(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_sas_token_env() -> String {
    "APP_STORAGE_SAS_TOKEN".into()
}
fn default_configuration_container() -> String {
    "cps-configuration".into()
}
fn default_process_container() -> String {
    "cps-processes".into()
}
fn default_request_timeout_secs() -> u64 {
    60
}

/// `[catalog]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Database location (local libSQL path).
    #[serde(default = "default_catalog_connection")]
    pub connection: String,

    /// Logical database name.
    #[serde(default = "default_catalog_database")]
    pub database: String,

    /// Collection holding schema records.
    #[serde(default = "default_catalog_collection")]
    pub collection: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            connection: default_catalog_connection(),
            database: default_catalog_database(),
            collection: default_catalog_collection(),
        }
    }
}

fn default_catalog_connection() -> String {
    "var/catalog.db".into()
}
fn default_catalog_database() -> String {
    "ContentProcess".into()
}
fn default_catalog_collection() -> String {
    "Schemas".into()
}

/// `[analysis]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Analysis service endpoint.
    #[serde(default)]
    pub endpoint: String,

    /// `api-version` query parameter sent with every request.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Name of the env var holding the subscription key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// First delay between job status checks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound for the growing delay between status checks.
    #[serde(default = "default_poll_max_interval_ms")]
    pub poll_max_interval_ms: u64,

    /// Give up waiting for a job after this many seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// HTTP timeout for a single request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_version: default_api_version(),
            api_key_env: default_api_key_env(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_max_interval_ms: default_poll_max_interval_ms(),
            poll_timeout_secs: default_poll_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_api_version() -> String {
    "2024-12-01-preview".into()
}
fn default_api_key_env() -> String {
    "APP_CONTENT_UNDERSTANDING_KEY".into()
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_poll_max_interval_ms() -> u64 {
    10_000
}
fn default_poll_timeout_secs() -> u64 {
    600
}

/// `[chat]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Azure OpenAI resource endpoint.
    #[serde(default)]
    pub endpoint: String,

    /// Model deployment name.
    #[serde(default)]
    pub deployment: String,

    #[serde(default = "default_chat_api_version")]
    pub api_version: String,

    /// Name of the env var holding the API key.
    #[serde(default = "default_chat_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_sampling")]
    pub temperature: f64,

    #[serde(default = "default_sampling")]
    pub top_p: f64,

    /// HTTP timeout for a single request.
    #[serde(default = "default_chat_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            deployment: String::new(),
            api_version: default_chat_api_version(),
            api_key_env: default_chat_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_sampling(),
            top_p: default_sampling(),
            request_timeout_secs: default_chat_timeout_secs(),
        }
    }
}

fn default_chat_api_version() -> String {
    "2024-10-21".into()
}
fn default_chat_api_key_env() -> String {
    "APP_AZURE_OPENAI_KEY".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_sampling() -> f64 {
    0.1
}
fn default_chat_timeout_secs() -> u64 {
    120
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Step names in execution order.
    #[serde(default = "default_steps")]
    pub steps: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
        }
    }
}

fn default_steps() -> Vec<String> {
    vec!["extract".into()]
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Default filter level when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable: true,
            level: default_level(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_level() -> String {
    "info".into()
}

impl AppConfig {
    /// Check that every external endpoint the pipeline talks to is set.
    pub fn validate(&self) -> Result<()> {
        if self.storage.blob_url.trim().is_empty() {
            return Err(ContentFlowError::config(
                "storage.blob_url is not set (or APP_STORAGE_BLOB_URL)",
            ));
        }
        if self.analysis.endpoint.trim().is_empty() {
            return Err(ContentFlowError::config(
                "analysis.endpoint is not set (or APP_CONTENT_UNDERSTANDING_ENDPOINT)",
            ));
        }
        for (key, value) in [
            ("storage.blob_url", &self.storage.blob_url),
            ("analysis.endpoint", &self.analysis.endpoint),
        ] {
            url::Url::parse(value)
                .map_err(|e| ContentFlowError::config(format!("{key} is not a valid URL: {e}")))?;
        }
        if self.pipeline.steps.is_empty() {
            return Err(ContentFlowError::config("pipeline.steps is empty"));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(repeated) = self.pipeline.steps.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(ContentFlowError::config(format!(
                "pipeline.steps lists '{repeated}' more than once"
            )));
        }
        if self.pipeline.steps.iter().any(|s| s == "map") {
            if self.chat.deployment.trim().is_empty() {
                return Err(ContentFlowError::config(
                    "chat.deployment is not set (or APP_AZURE_OPENAI_MODEL)",
                ));
            }
            url::Url::parse(&self.chat.endpoint).map_err(|e| {
                ContentFlowError::config(format!(
                    "chat.endpoint is not a valid URL (or APP_AZURE_OPENAI_ENDPOINT): {e}"
                ))
            })?;
        }
        if looks_like_connection_string(&self.catalog.connection) {
            return Err(ContentFlowError::config(
                "catalog.connection must be a database file path, not a connection string \
                 (set APP_CATALOG_PATH)",
            ));
        }
        Ok(())
    }
}

/// `Key=value;` pairs such as `AccountEndpoint=...;AccountKey=...;`.
fn looks_like_connection_string(value: &str) -> bool {
    value.split(';').any(|part| {
        part.split_once('=')
            .is_some_and(|(key, _)| !key.is_empty() && key.chars().all(char::is_alphanumeric))
    })
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

/// Apply `APP_*` overrides using `lookup` to read variables.
///
/// Production callers pass `|k| std::env::var(k).ok()`.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let set = |target: &mut String, key: &str| {
        if let Some(val) = lookup(key).filter(|v| !v.is_empty()) {
            tracing::debug!(key, "config override from environment");
            *target = val;
        }
    };

    set(&mut config.storage.blob_url, "APP_STORAGE_BLOB_URL");
    set(&mut config.storage.configuration_container, "APP_CPS_CONFIGURATION");
    set(&mut config.storage.process_container, "APP_CPS_PROCESSES");
    set(&mut config.catalog.connection, "APP_CATALOG_PATH");
    set(&mut config.catalog.database, "APP_COSMOS_DATABASE");
    set(&mut config.catalog.collection, "APP_COSMOS_CONTAINER_SCHEMA");
    set(&mut config.analysis.endpoint, "APP_CONTENT_UNDERSTANDING_ENDPOINT");
    set(&mut config.chat.endpoint, "APP_AZURE_OPENAI_ENDPOINT");
    set(&mut config.chat.deployment, "APP_AZURE_OPENAI_MODEL");
    set(&mut config.logging.level, "APP_LOGGING_LEVEL");

    if let Some(steps) = lookup("APP_PROCESS_STEPS").filter(|v| !v.is_empty()) {
        config.pipeline.steps = steps
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if let Some(enable) = lookup("APP_LOGGING_ENABLE") {
        config.logging.enable = match enable.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => {
                return Err(ContentFlowError::config(format!(
                    "APP_LOGGING_ENABLE: expected a boolean, got '{other}'"
                )));
            }
        };
    }

    Ok(())
}

/// Read a secret from the named env var, treating empty values as unset.
pub fn read_secret_env(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.contentflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ContentFlowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.contentflow/contentflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk and apply environment overrides.
/// Starts from defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    apply_env_overrides(&mut config, |k| std::env::var(k).ok())?;
    Ok(config)
}

/// Load the application config from a specific file path (no env overrides).
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ContentFlowError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ContentFlowError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ContentFlowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ContentFlowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ContentFlowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
