//! Write pipeline
//!
//! Buffers page records into batches, compresses bodies, deduplicates
//! content by SHA-256, and flushes both collections in one round-trip each
//! when a batch fills up or grows old. Failed flushes are retried with
//! exponential backoff; the final failure surfaces to the submitting
//! worker, whose URL then stays un-completed and is recovered by the
//! stale-claim sweep.

use crate::config::StorageConfig;
use crate::storage::traits::{
    DocumentStore, PageContent, PageMetadata, StorageError, StorageResult,
};
use chrono::Utc;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Compression level for stored bodies
const COMPRESSION_LEVEL: u32 = 6;
/// Label recorded on content rows
const COMPRESSION_NAME: &str = "deflate";
/// Recently written content hashes kept to skip store lookups
const HASH_CACHE_SIZE: usize = 4096;
/// Base delay for flush retries
const FLUSH_BACKOFF: Duration = Duration::from_millis(200);

/// A fetched page on its way into the document store
#[derive(Debug, Clone)]
pub struct PageSubmission {
    /// URL as fetched
    pub url: String,
    /// Normalized URL; the metadata key
    pub normalized_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
    /// Decoded body; empty when nothing should be persisted as content
    /// (error responses, non-HTML payloads)
    pub body: Vec<u8>,
    /// Body was cut at the configured maximum length
    pub truncated: bool,
    pub outbound_links: u32,
    pub worker_id: String,
}

/// What happened to a submission
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOutcome {
    /// The body matched content that is already stored
    pub duplicate_content: bool,
}

#[derive(Default)]
struct Pending {
    metadata: Vec<PageMetadata>,
    content: Vec<PageContent>,
    oldest: Option<Instant>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.metadata.is_empty() && self.content.is_empty()
    }

    fn len(&self) -> usize {
        self.metadata.len().max(self.content.len())
    }
}

/// Batched, deduplicating write path shared by a process's fetch loops
pub struct StoragePipeline {
    store: Mutex<Box<dyn DocumentStore>>,
    config: StorageConfig,
    pending: Mutex<Pending>,
    seen_hashes: Mutex<LruCache<String, ()>>,
}

impl StoragePipeline {
    pub fn new(store: Box<dyn DocumentStore>, config: StorageConfig) -> Self {
        let cache_size = NonZeroUsize::new(HASH_CACHE_SIZE).expect("cache size is nonzero");
        Self {
            store: Mutex::new(store),
            config,
            pending: Mutex::new(Pending::default()),
            seen_hashes: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Queues a page for persistence, flushing if the batch is full
    ///
    /// An empty body yields a metadata row with no content hash, so
    /// error-page metadata never dangles a reference.
    pub async fn submit(&self, page: PageSubmission) -> StorageResult<SubmitOutcome> {
        let mut outcome = SubmitOutcome::default();

        let content_hash = if page.body.is_empty() {
            None
        } else {
            Some(hex::encode(Sha256::digest(&page.body)))
        };

        if let Some(hash) = &content_hash {
            if self.is_known_hash(hash).await? {
                outcome.duplicate_content = true;
            } else {
                let compressed = compress(&page.body)?;
                let mut pending = self.pending.lock().await;
                pending.content.push(PageContent {
                    content_hash: hash.clone(),
                    compressed_body: compressed,
                    original_length: page.body.len() as u64,
                    compression: COMPRESSION_NAME.to_string(),
                });
            }
        }

        let metadata = PageMetadata {
            url: page.url,
            normalized_url: page.normalized_url,
            status: page.status,
            content_type: page.content_type,
            content_length: page.body.len() as u64,
            content_hash,
            fetched_at: Utc::now(),
            worker_id: page.worker_id,
            outbound_links: page.outbound_links,
            headers: page.headers,
            truncated: page.truncated,
        };

        let should_flush = {
            let mut pending = self.pending.lock().await;
            pending.metadata.push(metadata);
            pending.oldest.get_or_insert_with(Instant::now);
            pending.len() >= self.config.batch_size
        };

        if should_flush {
            self.flush().await?;
        }

        Ok(outcome)
    }

    /// Flushes when the oldest pending record is past the batch age
    pub async fn maybe_flush(&self) -> StorageResult<()> {
        let due = {
            let pending = self.pending.lock().await;
            match pending.oldest {
                Some(oldest) => {
                    oldest.elapsed() >= Duration::from_secs(self.config.batch_age_seconds)
                }
                None => false,
            }
        };

        if due {
            self.flush().await?;
        }
        Ok(())
    }

    /// Writes out everything pending
    ///
    /// Content commits before metadata so a crash between the two leaves
    /// orphaned content rather than dangling references.
    pub async fn flush(&self) -> StorageResult<()> {
        let batch = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending)
        };
        if batch.is_empty() {
            return Ok(());
        }

        let mut store = self.store.lock().await;
        let mut last_error = String::new();

        for attempt in 0..=self.config.flush_retries {
            if attempt > 0 {
                tokio::time::sleep(FLUSH_BACKOFF * 2u32.pow(attempt - 1)).await;
            }

            let result = store
                .upsert_content_batch(&batch.content)
                .and_then(|()| store.upsert_metadata_batch(&batch.metadata));

            match result {
                Ok(()) => {
                    tracing::debug!(
                        pages = batch.metadata.len(),
                        contents = batch.content.len(),
                        "flushed batch"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "batch flush failed");
                    last_error = e.to_string();
                }
            }
        }
        drop(store);

        // Keep the records for the next flush attempt.
        {
            let mut pending = self.pending.lock().await;
            pending.metadata.extend(batch.metadata);
            pending.content.extend(batch.content);
            pending.oldest.get_or_insert_with(Instant::now);
        }

        Err(StorageError::BatchFailed {
            attempts: self.config.flush_retries + 1,
            message: last_error,
        })
    }

    /// Reads back a page with its decompressed body
    pub async fn get_page(
        &self,
        normalized_url: &str,
    ) -> StorageResult<Option<(PageMetadata, Option<Vec<u8>>)>> {
        let store = self.store.lock().await;
        let Some(metadata) = store.get_metadata(normalized_url)? else {
            return Ok(None);
        };

        let body = match &metadata.content_hash {
            Some(hash) => store
                .get_content(hash)?
                .map(|content| decompress(&content.compressed_body))
                .transpose()?,
            None => None,
        };

        Ok(Some((metadata, body)))
    }

    /// Normalized URLs whose stored content matches `content_hash`
    pub async fn find_by_content_hash(&self, content_hash: &str) -> StorageResult<Vec<String>> {
        self.store.lock().await.find_by_content_hash(content_hash)
    }

    /// (metadata rows, content rows)
    pub async fn counts(&self) -> StorageResult<(u64, u64)> {
        let store = self.store.lock().await;
        Ok((store.count_pages()?, store.count_contents()?))
    }

    async fn is_known_hash(&self, hash: &str) -> StorageResult<bool> {
        {
            let mut cache = self.seen_hashes.lock().await;
            if cache.get(hash).is_some() {
                return Ok(true);
            }
        }

        // Also consider hashes queued but not yet flushed.
        {
            let pending = self.pending.lock().await;
            if pending.content.iter().any(|c| c.content_hash == hash) {
                self.seen_hashes.lock().await.put(hash.to_string(), ());
                return Ok(true);
            }
        }

        let exists = self.store.lock().await.content_exists(hash)?;
        self.seen_hashes.lock().await.put(hash.to_string(), ());
        Ok(exists)
    }
}

fn compress(body: &[u8]) -> StorageResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}

fn decompress(compressed: &[u8]) -> StorageResult<Vec<u8>> {
    let mut body = Vec::new();
    DeflateDecoder::new(compressed).read_to_end(&mut body)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteDocumentStore;

    fn test_pipeline(config: StorageConfig) -> StoragePipeline {
        let store = SqliteDocumentStore::new_in_memory().unwrap();
        StoragePipeline::new(Box::new(store), config)
    }

    fn submission(url: &str, body: &[u8]) -> PageSubmission {
        PageSubmission {
            url: url.to_string(),
            normalized_url: url.to_string(),
            status: 200,
            content_type: Some("text/html".to_string()),
            headers: HashMap::new(),
            body: body.to_vec(),
            truncated: false,
            outbound_links: 0,
            worker_id: "w1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_roundtrip_decompresses() {
        let pipeline = test_pipeline(StorageConfig::default());
        let body = b"<html><body>hello</body></html>".repeat(50);

        pipeline
            .submit(submission("https://a.test/", &body))
            .await
            .unwrap();
        pipeline.flush().await.unwrap();

        let (metadata, stored) = pipeline.get_page("https://a.test/").await.unwrap().unwrap();
        assert_eq!(metadata.status, 200);
        assert_eq!(metadata.content_length, body.len() as u64);
        assert_eq!(stored.unwrap(), body);
    }

    #[tokio::test]
    async fn test_duplicate_content_stored_once() {
        let pipeline = test_pipeline(StorageConfig::default());
        let body = b"identical payload";

        let first = pipeline
            .submit(submission("https://a.test/1", body))
            .await
            .unwrap();
        let second = pipeline
            .submit(submission("https://a.test/2", body))
            .await
            .unwrap();
        pipeline.flush().await.unwrap();

        assert!(!first.duplicate_content);
        assert!(second.duplicate_content);

        let (pages, contents) = pipeline.counts().await.unwrap();
        assert_eq!(pages, 2);
        assert_eq!(contents, 1);

        let hash = hex::encode(Sha256::digest(body));
        let urls = pipeline.find_by_content_hash(&hash).await.unwrap();
        assert_eq!(urls, vec!["https://a.test/1", "https://a.test/2"]);
    }

    #[tokio::test]
    async fn test_duplicate_content_across_flushes() {
        let pipeline = test_pipeline(StorageConfig::default());
        let body = b"identical payload";

        pipeline
            .submit(submission("https://a.test/1", body))
            .await
            .unwrap();
        pipeline.flush().await.unwrap();

        let outcome = pipeline
            .submit(submission("https://a.test/2", body))
            .await
            .unwrap();
        pipeline.flush().await.unwrap();

        assert!(outcome.duplicate_content);
        let (_, contents) = pipeline.counts().await.unwrap();
        assert_eq!(contents, 1);
    }

    #[tokio::test]
    async fn test_same_url_twice_one_metadata_row() {
        let pipeline = test_pipeline(StorageConfig::default());

        pipeline
            .submit(submission("https://a.test/x", b"v1"))
            .await
            .unwrap();
        pipeline
            .submit(submission("https://a.test/x", b"v1"))
            .await
            .unwrap();
        pipeline.flush().await.unwrap();

        let (pages, contents) = pipeline.counts().await.unwrap();
        assert_eq!(pages, 1);
        assert_eq!(contents, 1);
    }

    #[tokio::test]
    async fn test_batch_size_triggers_flush() {
        let mut config = StorageConfig::default();
        config.batch_size = 2;
        let pipeline = test_pipeline(config);

        pipeline
            .submit(submission("https://a.test/1", b"one"))
            .await
            .unwrap();
        let (pages, _) = pipeline.counts().await.unwrap();
        assert_eq!(pages, 0);

        pipeline
            .submit(submission("https://a.test/2", b"two"))
            .await
            .unwrap();
        let (pages, _) = pipeline.counts().await.unwrap();
        assert_eq!(pages, 2);
    }

    #[tokio::test]
    async fn test_maybe_flush_honors_age() {
        let mut config = StorageConfig::default();
        config.batch_age_seconds = 0;
        let pipeline = test_pipeline(config);

        pipeline
            .submit(submission("https://a.test/1", b"one"))
            .await
            .unwrap();
        pipeline.maybe_flush().await.unwrap();

        let (pages, _) = pipeline.counts().await.unwrap();
        assert_eq!(pages, 1);
    }

    #[tokio::test]
    async fn test_empty_body_has_no_content_row() {
        let pipeline = test_pipeline(StorageConfig::default());

        let mut page = submission("https://a.test/missing", b"");
        page.status = 404;
        pipeline.submit(page).await.unwrap();
        pipeline.flush().await.unwrap();

        let (pages, contents) = pipeline.counts().await.unwrap();
        assert_eq!(pages, 1);
        assert_eq!(contents, 0);

        let (metadata, body) = pipeline
            .get_page("https://a.test/missing")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.status, 404);
        assert!(metadata.content_hash.is_none());
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn test_truncated_flag_persists() {
        let pipeline = test_pipeline(StorageConfig::default());

        let mut page = submission("https://a.test/big", b"partial body");
        page.truncated = true;
        pipeline.submit(page).await.unwrap();
        pipeline.flush().await.unwrap();

        let (metadata, _) = pipeline.get_page("https://a.test/big").await.unwrap().unwrap();
        assert!(metadata.truncated);
    }
}
