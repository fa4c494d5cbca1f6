//! SQLite schema for the document store

use rusqlite::Connection;

/// Creates the two collections and their indexes if missing
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pages_metadata (
            normalized_url  TEXT PRIMARY KEY,
            url             TEXT NOT NULL,
            status          INTEGER NOT NULL,
            content_type    TEXT,
            content_length  INTEGER NOT NULL,
            content_hash    TEXT,
            fetched_at      TEXT NOT NULL,
            worker_id       TEXT NOT NULL,
            outbound_links  INTEGER NOT NULL,
            headers         TEXT NOT NULL,
            truncated       INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_metadata_content_hash
            ON pages_metadata(content_hash);
        CREATE INDEX IF NOT EXISTS idx_metadata_fetched_at
            ON pages_metadata(fetched_at);

        CREATE TABLE IF NOT EXISTS pages_content (
            content_hash     TEXT PRIMARY KEY,
            compressed_body  BLOB NOT NULL,
            original_length  INTEGER NOT NULL,
            compression      TEXT NOT NULL
        );
        ",
    )
}
