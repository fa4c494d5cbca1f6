//! Page persistence
//!
//! A document store split across two collections: `pages_metadata` keyed by
//! normalized URL and `pages_content` keyed by content hash, so identical
//! payloads are stored once no matter how many URLs serve them. Workers
//! write through the batching pipeline; the backend is swappable behind
//! the [`DocumentStore`] trait.

mod pipeline;
mod schema;
mod sqlite;
mod traits;

pub use pipeline::{PageSubmission, StoragePipeline, SubmitOutcome};
pub use schema::initialize_schema;
pub use sqlite::SqliteDocumentStore;
pub use traits::{DocumentStore, PageContent, PageMetadata, StorageError, StorageResult};
