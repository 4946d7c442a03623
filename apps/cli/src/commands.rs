//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use contentflow_analysis::{AnalysisService, AzureOpenAiClient, ContentUnderstandingClient};
use contentflow_core::{
    AppContext, DataPipeline, HandlerRegistry, MessageContext, Pipeline, ProgressReporter,
};
use contentflow_shared::{
    AppConfig, LoggingConfig, ProcessId, StepResult, apply_env_overrides, init_config,
    load_config, load_config_from,
};
use contentflow_storage::{BlobStore, Catalog, HttpBlobStore, SchemaCatalog, SchemaRecord};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ContentFlow: extract structured content from documents.
#[derive(Parser)]
#[command(
    name = "contentflow",
    version,
    about = "Run documents through a schema-driven content extraction pipeline.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.contentflow/contentflow.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Upload a document and run it through the configured steps.
    Run {
        /// Local document to process.
        document: PathBuf,

        /// Schema id (selects the analyzer).
        #[arg(short, long)]
        schema: String,

        /// Reuse an existing process id instead of generating one.
        #[arg(long)]
        process_id: Option<ProcessId>,

        /// Write the final run context as JSON to this path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Schema catalog management.
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Analyzer management on the analysis service.
    Analyzer {
        #[command(subcommand)]
        action: AnalyzerAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Schema subcommands.
#[derive(Subcommand)]
pub(crate) enum SchemaAction {
    /// Register a schema: upload its artifact and write the catalog record.
    Add {
        /// Schema id.
        #[arg(long)]
        id: String,

        /// Schema class name (a built-in or the declarative schema's name).
        #[arg(long)]
        class_name: String,

        /// Schema artifact to upload.
        #[arg(long)]
        file: PathBuf,

        #[arg(long, default_value = "")]
        description: String,
    },
    /// Print a schema record.
    Show { id: String },
    /// List schema records.
    List,
}

/// Analyzer subcommands.
#[derive(Subcommand)]
pub(crate) enum AnalyzerAction {
    /// List analyzers known to the service.
    List,
    /// Delete an analyzer so the next run re-provisions it.
    Delete { id: String },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Config and tracing setup
// ---------------------------------------------------------------------------

/// Load config from `--config` or the default location, with `APP_*` overrides.
pub(crate) fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    match &cli.config {
        Some(path) => {
            let mut config = load_config_from(path)?;
            apply_env_overrides(&mut config, |k| std::env::var(k).ok())?;
            Ok(config)
        }
        None => Ok(load_config()?),
    }
}

/// Initialize tracing based on CLI flags and the `[logging]` section.
pub(crate) fn init_tracing(cli: &Cli, logging: &LoggingConfig) {
    use tracing_subscriber::{EnvFilter, fmt};

    if !logging.enable {
        return;
    }

    let filter = match cli.verbose {
        0 => format!("contentflow={}", logging.level),
        1 => "contentflow=debug".to_string(),
        _ => "contentflow=trace".to_string(),
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Command::Run {
            document,
            schema,
            process_id,
            output,
        } => cmd_run(config, &document, &schema, process_id, output.as_deref()).await,
        Command::Schema { action } => match action {
            SchemaAction::Add {
                id,
                class_name,
                file,
                description,
            } => cmd_schema_add(&config, &id, &class_name, &file, &description).await,
            SchemaAction::Show { id } => cmd_schema_show(&config, &id).await,
            SchemaAction::List => cmd_schema_list(&config).await,
        },
        Command::Analyzer { action } => match action {
            AnalyzerAction::List => cmd_analyzer_list(&config).await,
            AnalyzerAction::Delete { id } => cmd_analyzer_delete(&config, &id).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: AppConfig,
    document: &Path,
    schema_id: &str,
    process_id: Option<ProcessId>,
    output: Option<&Path>,
) -> Result<()> {
    config.validate()?;

    let name = file_name(document)?;
    let payload = std::fs::read(document)
        .map_err(|e| eyre!("cannot read {}: {e}", document.display()))?;

    let blob_store: Arc<dyn BlobStore> = Arc::new(HttpBlobStore::new(&config.storage)?);
    let catalog: Arc<dyn SchemaCatalog> =
        Arc::new(Catalog::open_readonly(Path::new(&config.catalog.connection)).await?);
    let analysis: Arc<dyn AnalysisService> =
        Arc::new(ContentUnderstandingClient::new(&config.analysis)?);

    let chat = if config.pipeline.steps.iter().any(|s| s == "map") {
        Some(Arc::new(AzureOpenAiClient::new(&config.chat)?))
    } else {
        None
    };

    let steps = config.pipeline.steps.clone();
    let process_container = config.storage.process_container.clone();
    let mut app = AppContext::new(config, blob_store.clone(), catalog, analysis);
    if let Some(chat) = chat {
        app = app.with_chat(chat);
    }
    let pipeline = Pipeline::from_config(&app, &steps, &HandlerRegistry::default())?;

    let mut data = DataPipeline::with_process_id(
        process_id.unwrap_or_default(),
        Some(schema_id.to_string()),
        steps,
    );
    let content_type = content_type_for(&name);
    let source = data.add_source_file(&name);
    source.mime_type = Some(content_type.to_string());
    blob_store
        .upload(
            &process_container,
            &source.blob_name(),
            Bytes::from(payload),
            content_type,
        )
        .await?;

    let mut ctx = MessageContext::new(data);
    info!(process_id = %ctx.process_id(), document = %name, "run started");

    let progress = CliProgress::new();
    let outcome = pipeline.run(&mut ctx, &progress).await;
    progress.spinner.finish_and_clear();

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&ctx)?;
        std::fs::write(path, json).map_err(|e| eyre!("cannot write {}: {e}", path.display()))?;
    }

    println!();
    println!("  Process: {}", ctx.process_id());
    for result in &ctx.data_pipeline.step_results {
        println!(
            "  {:<10} {} ({} ms)",
            result.step_name,
            result.get_str("file_name").unwrap_or("-"),
            result.elapsed_ms.unwrap_or_default()
        );
    }
    println!();

    outcome?;
    Ok(())
}

async fn cmd_schema_add(
    config: &AppConfig,
    id: &str,
    class_name: &str,
    file: &Path,
    description: &str,
) -> Result<()> {
    let name = file_name(file)?;
    let payload = std::fs::read(file).map_err(|e| eyre!("cannot read {}: {e}", file.display()))?;
    let content_type = content_type_for(&name);

    let store = HttpBlobStore::new(&config.storage)?;
    let container = format!("{}/Schemas/{id}", config.storage.configuration_container);
    store
        .upload(&container, &name, Bytes::from(payload), content_type)
        .await?;

    let record = SchemaRecord {
        id: id.to_string(),
        class_name: class_name.to_string(),
        description: description.to_string(),
        file_name: name,
        content_type: content_type.to_string(),
    };
    let catalog = Catalog::open(Path::new(&config.catalog.connection)).await?;
    catalog
        .put_schema(&config.catalog.database, &config.catalog.collection, &record)
        .await?;

    println!("Schema '{id}' registered ({container}/{})", record.file_name);
    Ok(())
}

async fn cmd_schema_show(config: &AppConfig, id: &str) -> Result<()> {
    let catalog = Catalog::open_readonly(Path::new(&config.catalog.connection)).await?;
    let record = catalog
        .get_schema(&config.catalog.database, &config.catalog.collection, id)
        .await?
        .ok_or_else(|| eyre!("schema '{id}' not found"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cmd_schema_list(config: &AppConfig) -> Result<()> {
    let catalog = Catalog::open_readonly(Path::new(&config.catalog.connection)).await?;
    let records = catalog
        .list_schemas(&config.catalog.database, &config.catalog.collection)
        .await?;
    if records.is_empty() {
        println!("No schemas registered.");
    }
    for record in records {
        println!("  {:<24} {:<24} {}", record.id, record.class_name, record.file_name);
    }
    Ok(())
}

async fn cmd_analyzer_list(config: &AppConfig) -> Result<()> {
    let client = ContentUnderstandingClient::new(&config.analysis)?;
    for analyzer in client.list_analyzers().await? {
        println!(
            "  {:<32} {}",
            analyzer.analyzer_id,
            analyzer.status.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn cmd_analyzer_delete(config: &AppConfig, id: &str) -> Result<()> {
    let client = ContentUnderstandingClient::new(&config.analysis)?;
    if client.delete_analyzer(id).await? {
        println!("Analyzer '{id}' deleted.");
    } else {
        println!("Analyzer '{id}' does not exist.");
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| eyre!("'{}' has no file name", path.display()))
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "txt" | "md" => "text/plain",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            let ticks = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
            spinner.set_style(style.tick_strings(&ticks));
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn step_started(&self, name: &str, index: usize, total: usize) {
        self.spinner
            .set_message(format!("[{}/{total}] {name}", index + 1));
    }

    fn step_finished(&self, result: &StepResult) {
        self.spinner.println(format!(
            "  ✓ {} ({} ms)",
            result.step_name,
            result.elapsed_ms.unwrap_or_default()
        ));
    }

    fn done(&self, _ctx: &MessageContext) {
        self.spinner.finish_and_clear();
    }
}
