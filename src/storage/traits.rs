//! Document store trait and record types
//!
//! The persistence backend sits behind this trait so that swapping it out
//! cannot affect the crawler's invariants. Batches arrive pre-compressed
//! and pre-hashed; the store's only job is idempotent upserts keyed on the
//! natural keys (normalized URL, content hash).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during document store operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Batch flush failed after {attempts} attempts: {message}")]
    BatchFailed { attempts: u32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for document store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One row of the `pages_metadata` collection, keyed by normalized URL
#[derive(Debug, Clone)]
pub struct PageMetadata {
    /// URL as fetched (after any redirects the client followed)
    pub url: String,
    /// Normalized URL; the natural key
    pub normalized_url: String,
    /// HTTP status of the final response
    pub status: u16,
    pub content_type: Option<String>,
    /// Decoded body length in bytes, after any truncation
    pub content_length: u64,
    /// Hex SHA-256 of the stored body; absent when no body was persisted
    pub content_hash: Option<String>,
    pub fetched_at: DateTime<Utc>,
    /// Worker that committed this row
    pub worker_id: String,
    pub outbound_links: u32,
    pub headers: HashMap<String, String>,
    /// Body exceeded the configured maximum and was cut short
    pub truncated: bool,
}

/// One row of the `pages_content` collection, keyed by content hash
///
/// Many metadata rows may reference the same content row.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub content_hash: String,
    pub compressed_body: Vec<u8>,
    pub original_length: u64,
    /// Compression algorithm label, e.g. "deflate"
    pub compression: String,
}

/// Persistence backend for crawled pages
///
/// Writes are unordered and idempotent; re-submitting a row with the same
/// natural key must not create a second row.
pub trait DocumentStore: Send {
    /// Upserts a batch of metadata rows in one round-trip
    fn upsert_metadata_batch(&mut self, batch: &[PageMetadata]) -> StorageResult<()>;

    /// Upserts a batch of content rows in one round-trip
    ///
    /// Content is immutable under its hash; existing rows are left alone.
    fn upsert_content_batch(&mut self, batch: &[PageContent]) -> StorageResult<()>;

    /// Whether a content row with this hash already exists
    fn content_exists(&self, content_hash: &str) -> StorageResult<bool>;

    /// Metadata row for a normalized URL
    fn get_metadata(&self, normalized_url: &str) -> StorageResult<Option<PageMetadata>>;

    /// Content row by hash
    fn get_content(&self, content_hash: &str) -> StorageResult<Option<PageContent>>;

    /// Normalized URLs of all pages referencing a content hash
    fn find_by_content_hash(&self, content_hash: &str) -> StorageResult<Vec<String>>;

    /// Total metadata rows
    fn count_pages(&self) -> StorageResult<u64>;

    /// Total distinct content rows
    fn count_contents(&self) -> StorageResult<u64>;
}
