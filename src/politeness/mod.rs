//! Per-host politeness
//!
//! Enforces the three host-level guarantees: robots.txt allow/disallow, a
//! minimum delay between fetches, and at most one concurrent fetch per
//! host. All state is in the coordination store, so the guarantees hold
//! across worker processes: the lease is a TTL-bounded set-if-absent key,
//! the last-fetch timestamp and adaptive delay live on the domain record,
//! and parsed robots snapshots are cached first-writer-wins.

use crate::config::PolitenessConfig;
use crate::coord::{CoordResult, CoordStore};
use crate::robots::RobotsRules;
use crate::{CrawlError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Key prefix for host leases
pub const LEASE_PREFIX: &str = "lease:";
/// Key prefix for domain records
pub const DOMAIN_PREFIX: &str = "domain:";
/// Key prefix for cached robots snapshots
pub const ROBOTS_PREFIX: &str = "robots:";

/// Outcome of a lease acquisition attempt
#[derive(Debug, PartialEq)]
pub enum AcquireOutcome {
    /// Caller owns the host until release or lease expiry
    Acquired,
    /// Another worker holds the lease
    Busy,
    /// Lease was free but the crawl delay has not elapsed; retry after the
    /// returned duration
    DelayNotElapsed(Duration),
}

/// How the host answered, for adaptive delay bookkeeping
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostResponse {
    /// Served the request; penalty decays
    Ok,
    /// 429 or 5xx; penalty doubles
    Throttled,
    /// Connect/read failure; penalty doubles
    Unreachable,
    /// No fetch was issued under this lease
    None,
}

/// Per-host record shared through the coordination store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Unix millis of the last completed fetch against this host
    #[serde(default)]
    pub last_fetch_ms: i64,
    /// Current adaptive delay penalty in seconds
    #[serde(default)]
    pub adaptive_delay_seconds: f64,
}

/// Cached robots.txt snapshot, JSON-encoded under `robots:<host>`
#[derive(Debug, Serialize, Deserialize)]
struct RobotsSnapshot {
    rules: RobotsRules,
    fetched_at_ms: i64,
}

/// Additive decay applied to the adaptive penalty on success
const ADAPTIVE_DECAY_SECONDS: f64 = 0.5;
/// Penalty floor used when doubling from zero
const ADAPTIVE_SEED_SECONDS: f64 = 1.0;

/// Politeness gate shared by the fetch loops of one worker process
pub struct PolitenessController {
    store: Arc<dyn CoordStore>,
    config: PolitenessConfig,
    user_agent: String,
    http: reqwest::Client,
    /// Per-host guard so one process fetches robots.txt at most once at a
    /// time; cross-process stampedes are bounded by the first-writer-wins
    /// cache insert.
    robots_inflight: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PolitenessController {
    pub fn new(
        store: Arc<dyn CoordStore>,
        config: PolitenessConfig,
        user_agent: String,
        http: reqwest::Client,
    ) -> Self {
        Self {
            store,
            config,
            user_agent,
            http,
            robots_inflight: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Attempts to take the exclusive fetch lease for `host`
    ///
    /// On success the caller must call [`release`](Self::release) as soon
    /// as its fetch completes. `robots_delay` is the crawl-delay announced
    /// by the host's robots.txt, if any.
    pub async fn try_acquire(
        &self,
        host: &str,
        worker_id: &str,
        robots_delay: Option<f64>,
    ) -> CoordResult<AcquireOutcome> {
        let lease_key = format!("{}{}", LEASE_PREFIX, host);
        let ttl = Duration::from_secs(self.config.lease_ttl_seconds);

        if !self
            .store
            .kv_set_if_absent(&lease_key, worker_id, Some(ttl))
            .await?
        {
            return Ok(AcquireOutcome::Busy);
        }

        let record = self.domain_record(host).await?;
        let delay = self.effective_delay(&record, robots_delay);
        let elapsed_ms = Utc::now().timestamp_millis() - record.last_fetch_ms;
        let delay_ms = (delay.as_secs_f64() * 1000.0) as i64;

        if record.last_fetch_ms > 0 && elapsed_ms < delay_ms {
            // Give the lease back without touching last-fetch; nothing was
            // fetched under it.
            self.store
                .kv_compare_and_delete(&lease_key, worker_id)
                .await?;
            return Ok(AcquireOutcome::DelayNotElapsed(Duration::from_millis(
                (delay_ms - elapsed_ms) as u64,
            )));
        }

        Ok(AcquireOutcome::Acquired)
    }

    /// Records the fetch outcome and returns the lease
    ///
    /// Writes last-fetch (unless no fetch happened) and the updated
    /// adaptive penalty, then deletes the lease only if this worker still
    /// owns it, so a slow worker cannot clobber a successor's lease.
    pub async fn release(
        &self,
        host: &str,
        worker_id: &str,
        response: HostResponse,
    ) -> CoordResult<()> {
        let mut record = self.domain_record(host).await?;

        match response {
            HostResponse::Ok => {
                record.last_fetch_ms = Utc::now().timestamp_millis();
                record.adaptive_delay_seconds =
                    (record.adaptive_delay_seconds - ADAPTIVE_DECAY_SECONDS).max(0.0);
            }
            HostResponse::Throttled | HostResponse::Unreachable => {
                record.last_fetch_ms = Utc::now().timestamp_millis();
                record.adaptive_delay_seconds = (record.adaptive_delay_seconds * 2.0)
                    .max(ADAPTIVE_SEED_SECONDS)
                    .min(self.config.max_adaptive_delay_seconds);
            }
            HostResponse::None => {}
        }

        if response != HostResponse::None {
            let value = serde_json::to_string(&record)
                .map_err(|e| crate::coord::CoordError::Backend(e.to_string()))?;
            self.store
                .kv_set(&format!("{}{}", DOMAIN_PREFIX, host), &value, None)
                .await?;
        }

        self.store
            .kv_compare_and_delete(&format!("{}{}", LEASE_PREFIX, host), worker_id)
            .await?;
        Ok(())
    }

    /// Robots rules for the host of `url`, from cache or a fresh fetch
    ///
    /// A failed robots fetch yields allow-all with the default crawl
    /// delay. The robots request itself bypasses the lease protocol.
    pub async fn robots_rules(&self, url: &Url) -> Result<RobotsRules> {
        let host = crate::url::host_of(url).ok_or(crate::UrlError::MissingHost)?;
        let cache_key = format!("{}{}", ROBOTS_PREFIX, host);

        if let Some(rules) = self.cached_robots(&cache_key).await? {
            return Ok(rules);
        }

        let guard = {
            let mut map = self.robots_inflight.lock().await;
            map.entry(host.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _held = guard.lock().await;

        // Another loop in this process may have fetched while we waited.
        if let Some(rules) = self.cached_robots(&cache_key).await? {
            return Ok(rules);
        }

        let robots_url = format!("{}://{}/robots.txt", url.scheme(), host);
        let rules = match self.http.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => RobotsRules::from_content(&body),
                Err(e) => {
                    tracing::debug!(host = %host, error = %e, "robots.txt body read failed");
                    RobotsRules::allow_all()
                }
            },
            Ok(response) => {
                tracing::debug!(host = %host, status = %response.status(), "robots.txt not served");
                RobotsRules::allow_all()
            }
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "robots.txt fetch failed");
                RobotsRules::allow_all()
            }
        };

        let snapshot = RobotsSnapshot {
            rules: rules.clone(),
            fetched_at_ms: Utc::now().timestamp_millis(),
        };
        let value = serde_json::to_string(&snapshot).map_err(|e| CrawlError::Robots {
            host: host.clone(),
            message: e.to_string(),
        })?;
        // First writer wins; a concurrent worker's snapshot is just as good.
        self.store
            .kv_set_if_absent(
                &cache_key,
                &value,
                Some(Duration::from_secs(self.config.robots_ttl_seconds)),
            )
            .await?;

        Ok(rules)
    }

    /// Whether `url` may be fetched under the host's robots rules
    pub async fn is_allowed(&self, url: &Url) -> Result<bool> {
        let rules = self.robots_rules(url).await?;
        Ok(rules.is_allowed(url.as_str(), &self.user_agent))
    }

    /// Current shared record for `host`; default when absent or malformed
    pub async fn domain_record(&self, host: &str) -> CoordResult<DomainRecord> {
        let key = format!("{}{}", DOMAIN_PREFIX, host);
        match self.store.kv_get(&key).await? {
            Some(value) => Ok(serde_json::from_str(&value).unwrap_or_else(|e| {
                tracing::warn!(host = %host, error = %e, "malformed domain record, resetting");
                DomainRecord::default()
            })),
            None => Ok(DomainRecord::default()),
        }
    }

    /// max(configured floor, robots crawl-delay, adaptive penalty)
    fn effective_delay(&self, record: &DomainRecord, robots_delay: Option<f64>) -> Duration {
        let secs = self
            .config
            .default_crawl_delay_seconds
            .max(robots_delay.unwrap_or(0.0))
            .max(record.adaptive_delay_seconds);
        Duration::from_secs_f64(secs)
    }

    async fn cached_robots(&self, cache_key: &str) -> CoordResult<Option<RobotsRules>> {
        match self.store.kv_get(cache_key).await? {
            Some(value) => match serde_json::from_str::<RobotsSnapshot>(&value) {
                Ok(snapshot) => Ok(Some(snapshot.rules)),
                Err(e) => {
                    tracing::warn!(key = %cache_key, error = %e, "malformed robots snapshot");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}
