//! SQLite document store
//!
//! Both collections live in one database file. Batch upserts run inside a
//! transaction, so a flush is one round-trip per collection.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{DocumentStore, PageContent, PageMetadata, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

/// SQLite-backed [`DocumentStore`]
pub struct SqliteDocumentStore {
    conn: Connection,
}

impl SqliteDocumentStore {
    /// Opens (or creates) the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// In-memory database, for tests and throwaway runs
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<PageMetadata> {
        let fetched_at: String = row.get(6)?;
        let headers_json: String = row.get(9)?;
        Ok(PageMetadata {
            normalized_url: row.get(0)?,
            url: row.get(1)?,
            status: row.get(2)?,
            content_type: row.get(3)?,
            content_length: row.get(4)?,
            content_hash: row.get(5)?,
            fetched_at: fetched_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
            worker_id: row.get(7)?,
            outbound_links: row.get(8)?,
            headers: serde_json::from_str::<HashMap<String, String>>(&headers_json)
                .unwrap_or_default(),
            truncated: row.get::<_, i64>(10)? != 0,
        })
    }
}

const METADATA_COLUMNS: &str = "normalized_url, url, status, content_type, content_length, \
     content_hash, fetched_at, worker_id, outbound_links, headers, truncated";

impl DocumentStore for SqliteDocumentStore {
    fn upsert_metadata_batch(&mut self, batch: &[PageMetadata]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO pages_metadata \
                 (normalized_url, url, status, content_type, content_length, content_hash, \
                  fetched_at, worker_id, outbound_links, headers, truncated) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for page in batch {
                let headers = serde_json::to_string(&page.headers)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                stmt.execute(params![
                    page.normalized_url,
                    page.url,
                    page.status,
                    page.content_type,
                    page.content_length,
                    page.content_hash,
                    page.fetched_at.to_rfc3339(),
                    page.worker_id,
                    page.outbound_links,
                    headers,
                    page.truncated as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_content_batch(&mut self, batch: &[PageContent]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO pages_content \
                 (content_hash, compressed_body, original_length, compression) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for content in batch {
                stmt.execute(params![
                    content.content_hash,
                    content.compressed_body,
                    content.original_length,
                    content.compression,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn content_exists(&self, content_hash: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM pages_content WHERE content_hash = ?1",
                params![content_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get_metadata(&self, normalized_url: &str) -> StorageResult<Option<PageMetadata>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM pages_metadata WHERE normalized_url = ?1",
                    METADATA_COLUMNS
                ),
                params![normalized_url],
                Self::metadata_from_row,
            )
            .optional()?;
        Ok(row)
    }

    fn get_content(&self, content_hash: &str) -> StorageResult<Option<PageContent>> {
        let row = self
            .conn
            .query_row(
                "SELECT content_hash, compressed_body, original_length, compression \
                 FROM pages_content WHERE content_hash = ?1",
                params![content_hash],
                |row| {
                    Ok(PageContent {
                        content_hash: row.get(0)?,
                        compressed_body: row.get(1)?,
                        original_length: row.get(2)?,
                        compression: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn find_by_content_hash(&self, content_hash: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT normalized_url FROM pages_metadata WHERE content_hash = ?1 \
             ORDER BY normalized_url",
        )?;
        let urls = stmt
            .query_map(params![content_hash], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(urls)
    }

    fn count_pages(&self) -> StorageResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pages_metadata", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_contents(&self) -> StorageResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pages_content", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
