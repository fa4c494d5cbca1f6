//! URL frontier
//!
//! Priority-ordered delivery of URLs to workers with at-most-once-in-flight
//! semantics and crash recovery. The frontier itself is a sorted set in the
//! coordination store (lower score first); admission is gated by the shared
//! seen-filter; claims are TTL-bounded KV records that a cooperative sweep
//! returns to the frontier when their worker disappears.
//!
//! A URL is in exactly one of three places: the frontier sorted set, an
//! `inflight:<url>` record, or nowhere (completed or dropped, with the
//! filter remembering it was seen).

use crate::config::FrontierConfig;
use crate::coord::{CoordResult, CoordStore, PipelineOp};
use crate::filter::UrlFilter;
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Coordination store key of the frontier sorted set
pub const FRONTIER_KEY: &str = "frontier";
/// Key prefix for claim records
pub const INFLIGHT_PREFIX: &str = "inflight:";
/// Key prefix for per-URL retry counters
pub const RETRIES_PREFIX: &str = "retries:";

/// Priority penalty applied when a failed URL is re-admitted
const REQUEUE_PENALTY: f64 = 1.0;
/// Priority penalty applied when a stale claim is recovered
const STALE_PENALTY: f64 = 2.0;

/// Outcome of an admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// URL entered the frontier
    Admitted,
    /// Filter says the URL was already seen
    Duplicate,
    /// Frontier over its soft bound and the priority was droppable
    Dropped,
}

/// Claim record stored under `inflight:<url>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub worker: String,
    pub claimed_at_ms: i64,
    pub priority: f64,
    pub retries: u32,
}

/// A URL handed to a worker, with the token proving ownership
#[derive(Debug, Clone)]
pub struct ClaimedUrl {
    pub url: String,
    pub priority: f64,
    pub retries: u32,
    /// Exact serialized claim record; compare-and-delete against it keeps a
    /// slow worker from completing a successor's claim
    token: String,
}

/// Shared frontier handle
pub struct Frontier {
    store: Arc<dyn CoordStore>,
    filter: Arc<UrlFilter>,
    config: FrontierConfig,
}

impl Frontier {
    pub fn new(store: Arc<dyn CoordStore>, filter: Arc<UrlFilter>, config: FrontierConfig) -> Self {
        Self {
            store,
            filter,
            config,
        }
    }

    /// Admits a URL at the given priority
    ///
    /// The filter insert commits before the sorted-set add, so a crash
    /// between the two costs a URL at most one duplicate admission attempt,
    /// never a duplicate frontier entry.
    pub async fn enqueue(&self, url: &str, priority: f64) -> Result<EnqueueOutcome> {
        let url = crate::url::normalize_url(url)?;
        let url = url.as_str();

        if self.filter.contains(url).await? {
            return Ok(EnqueueOutcome::Duplicate);
        }
        self.filter.insert(url).await?;

        if priority >= self.config.drop_priority
            && self.store.zset_card(FRONTIER_KEY).await? >= self.config.soft_limit
        {
            tracing::debug!(url = %url, priority, "frontier over soft bound, dropping");
            return Ok(EnqueueOutcome::Dropped);
        }

        self.store.zset_add(FRONTIER_KEY, priority, url).await?;
        Ok(EnqueueOutcome::Admitted)
    }

    /// Admits a batch of URLs, amortizing store round-trips
    ///
    /// Returns (admitted, dropped) counts. Filter checks stay per-URL;
    /// only the sorted-set adds are pipelined.
    pub async fn enqueue_many(&self, urls: &[(String, f64)]) -> Result<(u64, u64)> {
        let over_soft_limit =
            self.store.zset_card(FRONTIER_KEY).await? >= self.config.soft_limit;

        let mut ops = Vec::new();
        let mut dropped = 0;
        for (raw, priority) in urls {
            let Ok(url) = crate::url::normalize_url(raw) else {
                continue;
            };
            let url = url.as_str();

            if self.filter.contains(url).await? {
                continue;
            }
            self.filter.insert(url).await?;

            if over_soft_limit && *priority >= self.config.drop_priority {
                dropped += 1;
                continue;
            }

            ops.push(PipelineOp::ZsetAdd {
                key: FRONTIER_KEY.to_string(),
                score: *priority,
                member: url.to_string(),
            });
        }

        let admitted = ops.len() as u64;
        if !ops.is_empty() {
            self.store.pipeline(ops).await?;
        }
        Ok((admitted, dropped))
    }

    /// Claims the lowest-priority URL, if any
    pub async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedUrl>> {
        let Some((priority, url)) = self.store.zset_pop_min(FRONTIER_KEY).await? else {
            return Ok(None);
        };

        let retries = self.retry_count(&url).await?;
        let record = ClaimRecord {
            worker: worker_id.to_string(),
            claimed_at_ms: Utc::now().timestamp_millis(),
            priority,
            retries,
        };
        let token = serde_json::to_string(&record)
            .map_err(|e| crate::coord::CoordError::Backend(e.to_string()))?;

        // The record must outlive its own staleness so the sweep can see
        // it; expiry is a backstop against sweep-less deployments.
        self.store
            .kv_set(
                &format!("{}{}", INFLIGHT_PREFIX, url),
                &token,
                Some(Duration::from_secs(self.config.claim_ttl_seconds * 2)),
            )
            .await?;

        Ok(Some(ClaimedUrl {
            url,
            priority,
            retries,
            token,
        }))
    }

    /// Marks a claimed URL done; only the claim owner succeeds
    pub async fn complete(&self, claimed: &ClaimedUrl) -> Result<bool> {
        Ok(self
            .store
            .kv_compare_and_delete(&format!("{}{}", INFLIGHT_PREFIX, claimed.url), &claimed.token)
            .await?)
    }

    /// Gives a claimed URL back after a failure
    ///
    /// With `requeue`, the URL re-enters the frontier at a penalized
    /// priority until its retry budget runs out; otherwise it is dropped
    /// and the filter keeps treating it as seen.
    pub async fn fail(&self, claimed: &ClaimedUrl, requeue: bool) -> Result<()> {
        let requeued = requeue && claimed.retries < self.config.max_retries;
        if requeued {
            self.bump_retry_count(&claimed.url, claimed.retries + 1).await?;
            self.store
                .zset_add(
                    FRONTIER_KEY,
                    claimed.priority + REQUEUE_PENALTY,
                    &claimed.url,
                )
                .await?;
        } else {
            tracing::warn!(url = %claimed.url, retries = claimed.retries, "dropping url");
        }

        self.store
            .kv_compare_and_delete(&format!("{}{}", INFLIGHT_PREFIX, claimed.url), &claimed.token)
            .await?;
        Ok(())
    }

    /// Returns a claimed URL to the frontier without charging a retry
    ///
    /// For cases where the worker never got to the fetch at all (host
    /// lease contention, shutdown), so the attempt should not count
    /// against the URL's retry budget.
    pub async fn requeue(&self, claimed: &ClaimedUrl, penalty: f64) -> Result<()> {
        self.store
            .zset_add(FRONTIER_KEY, claimed.priority + penalty, &claimed.url)
            .await?;
        self.store
            .kv_compare_and_delete(&format!("{}{}", INFLIGHT_PREFIX, claimed.url), &claimed.token)
            .await?;
        Ok(())
    }

    /// Returns stale claims to the frontier
    ///
    /// Run cooperatively by any worker at a jittered interval. The
    /// compare-and-delete on the observed record makes concurrent sweepers
    /// safe: exactly one wins each claim.
    pub async fn sweep_stale(&self) -> Result<u64> {
        let now = Utc::now().timestamp_millis();
        let ttl_ms = (self.config.claim_ttl_seconds * 1000) as i64;
        let mut recovered = 0;

        for (key, value) in self.store.kv_scan(INFLIGHT_PREFIX).await? {
            let record: ClaimRecord = match serde_json::from_str(&value) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "malformed claim record");
                    continue;
                }
            };

            if now - record.claimed_at_ms <= ttl_ms {
                continue;
            }

            if !self.store.kv_compare_and_delete(&key, &value).await? {
                // Another sweeper or the worker itself got there first.
                continue;
            }

            let url = &key[INFLIGHT_PREFIX.len()..];
            if record.retries >= self.config.max_retries {
                tracing::warn!(url = %url, retries = record.retries, "stale claim out of retries, dropping");
                continue;
            }

            self.bump_retry_count(url, record.retries + 1).await?;
            self.store
                .zset_add(FRONTIER_KEY, record.priority + STALE_PENALTY, url)
                .await?;
            tracing::info!(url = %url, worker = %record.worker, "recovered stale claim");
            recovered += 1;
        }

        Ok(recovered)
    }

    /// Current frontier cardinality
    pub async fn len(&self) -> CoordResult<u64> {
        self.store.zset_card(FRONTIER_KEY).await
    }

    pub async fn is_empty(&self) -> CoordResult<bool> {
        Ok(self.len().await? == 0)
    }

    async fn retry_count(&self, url: &str) -> CoordResult<u32> {
        let key = format!("{}{}", RETRIES_PREFIX, url);
        Ok(self
            .store
            .kv_get(&key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    async fn bump_retry_count(&self, url: &str, retries: u32) -> CoordResult<()> {
        // Counter only matters while the URL cycles through claims; let it
        // expire once the churn stops.
        let ttl = Duration::from_secs(self.config.claim_ttl_seconds * 2 * (self.config.max_retries as u64 + 1));
        self.store
            .kv_set(
                &format!("{}{}", RETRIES_PREFIX, url),
                &retries.to_string(),
                Some(ttl),
            )
            .await
    }
}
