//! Shared types, error model, and configuration for DocMuse.
//!
//! This crate is the foundation depended on by all other DocMuse crates.
//! It provides:
//! - [`DocMuseError`], the unified error type
//! - Domain types ([`KnowledgeBase`], [`ChunkHit`], [`DocumentRecord`], [`ProductRecord`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AgentConfig, AppConfig, OpenRouterConfig, RetrievalConfig, ScraperConfig, ServerConfig,
    StorageConfig, StreamingConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_model_config,
};
pub use error::{DocMuseError, Result};
pub use types::{ChunkHit, DocumentRecord, KnowledgeBase, ProductRecord};
