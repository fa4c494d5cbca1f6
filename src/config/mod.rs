//! Worker configuration
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files for a worker process. Every key has a default, so an empty file is
//! a valid configuration.

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, FetchConfig, FilterConfig, FrontierConfig, PolitenessConfig,
    StorageConfig, WorkerConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
