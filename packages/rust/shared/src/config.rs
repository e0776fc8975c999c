//! Application configuration for DocMuse.
//!
//! User config lives at `~/.docmuse/docmuse.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocMuseError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docmuse.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docmuse";

// ---------------------------------------------------------------------------
// Config structs (matching docmuse.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Retrieval tuning.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Agent run limits.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Event streaming.
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Product scraper.
    #[serde(default)]
    pub scraper: ScraperConfig,

    /// Database location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins. `"*"` allows any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for summarization and synthesis.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// OpenAI-compatible API root.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout for model calls.
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,

    /// Use the offline extractive model instead of a real backend.
    /// Every result produced this way is labelled `mode: "demo"`.
    #[serde(default)]
    pub demo_mode: bool,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            timeout_secs: default_model_timeout(),
            demo_mode: false,
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-flash-1.5".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_model_timeout() -> u64 {
    60
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks requested from the index.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Product-catalog runs with fewer hits than this trigger augmentation.
    #[serde(default = "default_augmentation_threshold")]
    pub augmentation_threshold: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            augmentation_threshold: default_augmentation_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_augmentation_threshold() -> usize {
    2
}

/// `[agent]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Overall deadline for one run.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// Concurrent summarization calls per run.
    #[serde(default = "default_summary_concurrency")]
    pub summary_concurrency: usize,

    /// Attempts per collaborator call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubled for each later one.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout(),
            summary_concurrency: default_summary_concurrency(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
        }
    }
}

fn default_run_timeout() -> u64 {
    180
}
fn default_summary_concurrency() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    500
}

/// `[streaming]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// How long the stream consumer waits for an event before re-checking the run.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Channels older than this are reaped even if never drained.
    #[serde(default = "default_channel_max_age")]
    pub channel_max_age_secs: u64,

    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,

    /// Idle seconds before a stream sends a keep-alive comment frame.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            channel_max_age_secs: default_channel_max_age(),
            reap_interval_secs: default_reap_interval(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

fn default_poll_interval() -> u64 {
    50
}
fn default_channel_max_age() -> u64 {
    900
}
fn default_reap_interval() -> u64 {
    60
}
fn default_keep_alive() -> u64 {
    15
}

/// `[scraper]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Storefront root; search lives at `{base_url}/search?q=`.
    #[serde(default = "default_scraper_base_url")]
    pub base_url: String,

    #[serde(default = "default_scraper_timeout")]
    pub timeout_secs: u64,

    /// Maximum product detail pages fetched per search.
    #[serde(default = "default_max_products")]
    pub max_products: usize,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_scraper_base_url(),
            timeout_secs: default_scraper_timeout(),
            max_products: default_max_products(),
        }
    }
}

fn default_scraper_base_url() -> String {
    "https://cymbiotika.com".into()
}
fn default_scraper_timeout() -> u64 {
    30
}
fn default_max_products() -> usize {
    5
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.docmuse/docmuse.db".into()
}

impl StorageConfig {
    /// Resolve `db_path`, expanding a leading `~`.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match self.db_path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir()
                    .ok_or_else(|| DocMuseError::config("could not determine home directory"))?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.db_path)),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docmuse/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DocMuseError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docmuse/docmuse.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocMuseError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DocMuseError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocMuseError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocMuseError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocMuseError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that a model backend is usable.
///
/// Either demo mode is switched on explicitly, or the API key env var is
/// set and non-empty. Anything else is a configuration error.
pub fn validate_model_config(config: &AppConfig) -> Result<()> {
    if config.openrouter.demo_mode {
        return Ok(());
    }
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(DocMuseError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable, \
             or enable `demo_mode` under [openrouter].\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}
