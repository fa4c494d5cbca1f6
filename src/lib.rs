//! Swarmcrawl: a horizontally scalable polite web crawler
//!
//! Symmetric worker processes fetch pages, extract outbound links, and
//! persist page content, coordinating only through a shared coordination
//! store (frontier, seen-filter, leases) and a document store (payloads).

pub mod config;
pub mod coord;
pub mod crawler;
pub mod filter;
pub mod frontier;
pub mod politeness;
pub mod robots;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for swarmcrawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Coordination store error: {0}")]
    Coord(#[from] coord::CoordError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Robots.txt error for {host}: {message}")]
    Robots { host: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid seed URL: {0}")]
    InvalidSeed(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for swarmcrawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use coord::{CoordStore, MemoryCoordStore};
pub use filter::UrlFilter;
pub use frontier::Frontier;
pub use politeness::PolitenessController;
pub use storage::{SqliteDocumentStore, StoragePipeline};
pub use url::{host_of, normalize_url};
