//! Coordination store facade
//!
//! Every piece of cross-worker shared state (frontier, seen-filter,
//! in-flight claims, host leases, domain records, robots snapshots) lives
//! behind this narrow capability trait, so the backing store is swappable
//! without touching the core. Mutations are limited to the atomic
//! primitives the coordination protocol needs: bit sets, sorted-set pop,
//! set-if-absent, and compare-and-delete.
//!
//! Key prefixes are stable for interoperability between worker builds:
//! `frontier`, `filter`, `inflight:<url>`, `retries:<url>`, `lease:<host>`,
//! `domain:<host>`, `robots:<host>`.

mod memory;

pub use memory::MemoryCoordStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by coordination store operations
///
/// Timeouts are a distinct variant so callers can treat a slow store
/// differently from a broken one.
#[derive(Debug, Error)]
pub enum CoordError {
    #[error("Coordination store operation '{op}' timed out")]
    Timeout { op: &'static str },

    #[error("Coordination store unreachable: {0}")]
    Unreachable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Malformed value at key '{key}': {message}")]
    Corrupt { key: String, message: String },
}

/// Result type for coordination store operations
pub type CoordResult<T> = std::result::Result<T, CoordError>;

/// A write batched through [`CoordStore::pipeline`]
///
/// Pipelined writes amortize round-trips; they are NOT atomic as a group.
#[derive(Debug, Clone)]
pub enum PipelineOp {
    ZsetAdd {
        key: String,
        score: f64,
        member: String,
    },
    KvSet {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
}

/// Capability set the crawler core requires from the shared store
///
/// All operations have a bounded timeout in networked implementations. The
/// in-memory implementation never blocks.
#[async_trait]
pub trait CoordStore: Send + Sync {
    /// Startup reachability probe
    async fn ping(&self) -> CoordResult<()>;

    // ===== Bitfield (seen-filter backing) =====

    /// Reads the bits at `indices`; unset or never-written bits read false
    async fn bitfield_get_bits(&self, key: &str, indices: &[u64]) -> CoordResult<Vec<bool>>;

    /// Sets the bits at `indices`; idempotent
    async fn bitfield_set_bits(&self, key: &str, indices: &[u64]) -> CoordResult<()>;

    /// Number of set bits in the bitfield (0 for a missing key)
    async fn bitfield_count_ones(&self, key: &str) -> CoordResult<u64>;

    // ===== Sorted set (frontier) =====

    /// Adds `member` with `score`, replacing any previous score
    async fn zset_add(&self, key: &str, score: f64, member: &str) -> CoordResult<()>;

    /// Atomically removes and returns the lowest-scored member
    async fn zset_pop_min(&self, key: &str) -> CoordResult<Option<(f64, String)>>;

    /// Cardinality of the sorted set
    async fn zset_card(&self, key: &str) -> CoordResult<u64>;

    // ===== KV (claims, leases, domain records, robots cache) =====

    /// Unconditional write, with optional expiry
    async fn kv_set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CoordResult<()>;

    /// Atomic set-if-absent; returns true iff the key was empty (or expired)
    async fn kv_set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CoordResult<bool>;

    /// Reads a key; expired entries read as absent
    async fn kv_get(&self, key: &str) -> CoordResult<Option<String>>;

    /// Deletes `key` only if its current value equals `expected`
    async fn kv_compare_and_delete(&self, key: &str, expected: &str) -> CoordResult<bool>;

    /// All live entries whose key starts with `prefix`
    async fn kv_scan(&self, prefix: &str) -> CoordResult<Vec<(String, String)>>;

    // ===== Batching =====

    /// Applies `ops` in order with one round-trip; no atomicity across ops
    async fn pipeline(&self, ops: Vec<PipelineOp>) -> CoordResult<()>;
}
