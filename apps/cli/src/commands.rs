//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, bail, eyre};
use docmuse_core::{Event, EventKind, ProgressSink, RunRequest, events, sse};
use docmuse_scraper::{ProductScraper, store_new_products};
use docmuse_server::AppState;
use docmuse_shared::{
    AppConfig, DocMuseError, KnowledgeBase, init_config, load_config, validate_model_config,
};
use docmuse_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// DocMuse: grounded answers from your own documents.
#[derive(Parser)]
#[command(
    name = "docmuse",
    version,
    about = "Retrieve, summarize and critique answers from local knowledge bases.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Use the offline demo model instead of OpenRouter.
    #[arg(long, global = true)]
    pub demo: bool,

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
    /// Start the HTTP API server.
    Serve {
        /// Address to bind (overrides config).
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a question against a knowledge base.
    Query {
        /// Question to answer.
        prompt: String,

        /// Knowledge base: resumes, api_docs, recipes or supplements.
        #[arg(long)]
        kb: String,

        /// Restrict retrieval to a single document.
        #[arg(long)]
        doc_id: Option<String>,

        /// Print raw SSE frames instead of a formatted answer.
        #[arg(long)]
        raw: bool,

        /// Include token events in raw output.
        #[arg(long, requires = "raw")]
        tokens: bool,
    },

    /// Store a text file as a document with one retrievable chunk.
    Ingest {
        /// Path to a UTF-8 text file.
        file: PathBuf,

        /// Knowledge base to add it to.
        #[arg(long)]
        kb: String,

        /// Document title (defaults to the file name).
        #[arg(long)]
        title: Option<String>,
    },

    /// Inspect stored documents.
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Search the product storefront and store new products.
    SearchProducts {
        /// Search terms.
        query: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Document subcommands.
#[derive(Subcommand)]
pub(crate) enum DocAction {
    /// Print one stored document.
    Show {
        /// Document ID.
        id: String,

        /// Knowledge base the document belongs to.
        #[arg(long)]
        kb: String,
    },
    /// List the documents in a knowledge base.
    List {
        #[arg(long)]
        kb: String,
    },
    /// Remove a document and its indexed chunks.
    Delete {
        /// Document ID.
        id: String,
    },
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
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docmuse=info,tower_http=info",
        1 => "docmuse=debug,tower_http=debug",
        _ => "docmuse=trace,tower_http=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let demo = cli.demo;
    match cli.command {
        Command::Serve { host, port } => cmd_serve(host, port, demo).await,
        Command::Query {
            prompt,
            kb,
            doc_id,
            raw,
            tokens,
        } => cmd_query(&prompt, &kb, doc_id, raw, tokens, demo).await,
        Command::Ingest { file, kb, title } => cmd_ingest(&file, &kb, title.as_deref()).await,
        Command::Doc { action } => match action {
            DocAction::Show { id, kb } => cmd_doc_show(&id, &kb).await,
            DocAction::List { kb } => cmd_doc_list(&kb).await,
            DocAction::Delete { id } => cmd_doc_delete(&id).await,
        },
        Command::SearchProducts { query } => cmd_search_products(&query).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Load config, applying the `--demo` override.
fn load_effective_config(demo: bool) -> Result<AppConfig> {
    let mut config = load_config()?;
    if demo {
        config.openrouter.demo_mode = true;
    }
    Ok(config)
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let path = config.storage.resolved_db_path()?;
    Ok(Storage::open(&path).await?)
}

async fn open_storage_readonly(config: &AppConfig) -> Result<Storage> {
    let path = config.storage.resolved_db_path()?;
    Ok(Storage::open_readonly(&path).await?)
}

// ---------------------------------------------------------------------------
// serve / query
// ---------------------------------------------------------------------------

async fn cmd_serve(host: Option<String>, port: Option<u16>, demo: bool) -> Result<()> {
    let mut config = load_effective_config(demo)?;
    validate_model_config(&config)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    info!(
        host = %config.server.host,
        port = config.server.port,
        demo = config.openrouter.demo_mode,
        "starting server"
    );
    docmuse_server::start_server(&config).await?;
    Ok(())
}

async fn cmd_query(
    prompt: &str,
    kb: &str,
    doc_id: Option<String>,
    raw: bool,
    tokens: bool,
    demo: bool,
) -> Result<()> {
    let config = load_effective_config(demo)?;
    validate_model_config(&config)?;
    let request = RunRequest::new(kb, prompt, doc_id)?.with_token_stream(tokens);
    let state = AppState::from_config(&config).await?;

    if raw {
        let (sender, mut stream) = events::channel();
        let agent = state.agent.clone();
        let producer = tokio::spawn(async move { agent.stream(request, sender).await });
        while let Some(event) = stream.recv().await {
            print!("{}", sse::encode(&event));
        }
        producer.await?;
        return Ok(());
    }

    let progress = CliProgress::new();
    let outcome = state.agent.run(&request, &progress).await;
    progress.finish();
    let outcome = outcome?;

    println!();
    println!("{}", outcome.answer.trim());
    println!();
    if !outcome.sources.is_empty() {
        println!("  Sources:");
        for (i, source) in outcome.sources.iter().enumerate() {
            let title = source
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or("(untitled)");
            println!("    {}. {title}", i + 1);
        }
    }
    if outcome.partial_failures > 0 {
        println!("  Degraded summaries: {}", outcome.partial_failures);
    }
    println!(
        "  Mode: {}  Time: {:.1}s",
        outcome.mode,
        outcome.elapsed.as_secs_f64()
    );
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Shows the latest status event on an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressSink for CliProgress {
    fn emit(&self, event: Event) {
        if event.kind == EventKind::Status {
            if let Some(text) = event.text() {
                self.spinner.set_message(text.to_string());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Documents and products
// ---------------------------------------------------------------------------

async fn cmd_ingest(file: &Path, kb: &str, title: Option<&str>) -> Result<()> {
    let kb: KnowledgeBase = kb.parse()?;
    let content = std::fs::read_to_string(file).map_err(|e| DocMuseError::io(file, e))?;
    if content.trim().is_empty() {
        return Err(eyre!("'{}' is empty", file.display()));
    }
    let title = title.map(String::from).unwrap_or_else(|| {
        file.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "untitled".to_string())
    });

    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let ingested = storage
        .ingest_document(
            None,
            kb,
            &title,
            &content,
            &serde_json::json!({ "title": title, "source": file.display().to_string() }),
        )
        .await?;
    let doc = &ingested.record;

    info!(doc_id = %doc.id, chunk_id = %ingested.chunk_id, %kb, "document ingested");
    println!("Ingested '{title}' into {kb}");
    println!("  ID: {}", doc.id);
    Ok(())
}

async fn cmd_doc_show(id: &str, kb: &str) -> Result<()> {
    let kb: KnowledgeBase = kb.parse()?;
    let config = load_config()?;
    let storage = open_storage_readonly(&config).await?;
    let doc = storage
        .get_document(id, kb)
        .await?
        .ok_or_else(|| eyre!("document '{id}' not found in {kb}"))?;

    println!("{}", doc.title);
    println!("  ID:      {}", doc.id);
    println!("  Created: {}", doc.created_at.to_rfc3339());
    println!("  Hash:    {}", doc.content_hash);
    println!();
    println!("{}", doc.content);
    Ok(())
}

async fn cmd_doc_list(kb: &str) -> Result<()> {
    let kb: KnowledgeBase = kb.parse()?;
    let config = load_config()?;
    let storage = open_storage_readonly(&config).await?;
    let docs = storage.list_documents(kb).await?;

    if docs.is_empty() {
        println!("No documents in {kb}.");
        return Ok(());
    }
    for doc in docs {
        println!("{}  {}", doc.id, doc.title);
    }
    Ok(())
}

async fn cmd_doc_delete(id: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    if !storage.delete_document(id).await? {
        bail!("document '{id}' not found");
    }
    info!(doc_id = %id, "document deleted");
    println!("Deleted {id}");
    Ok(())
}

async fn cmd_search_products(query: &str) -> Result<()> {
    let config = load_config()?;
    let scraper = ProductScraper::new(&config.scraper)?;
    let storage = open_storage(&config).await?;

    let spinner = CliProgress::new();
    spinner.spinner.set_message(format!("Searching for '{query}'..."));
    let result = scraper.search(query).await;
    spinner.finish();
    let result = result?;

    let stored = store_new_products(&result.products, &storage).await?;
    if result.products.is_empty() {
        println!("No products found for '{query}'.");
        return Ok(());
    }
    for product in &result.products {
        println!("{}  {}", product.price, product.title);
        println!("    {}", product.url);
    }
    println!();
    println!("  Found {} products, {} new.", result.total, stored.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
