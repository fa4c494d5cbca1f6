//! Worker control loop
//!
//! Symmetric, anonymous fetch loops: claim a URL, pass the politeness
//! gate, fetch, hand extracted links back to the frontier, write through
//! the storage pipeline, complete the claim. Workers share nothing with
//! each other beyond the coordination store, so any of them can pick up
//! where a crashed peer left off. Each loop also runs the stale-claim
//! sweep at a jittered interval.

use crate::config::Config;
use crate::coord::CoordStore;
use crate::crawler::fetcher::{build_http_client, HttpFetcher, PageFetcher};
use crate::crawler::metrics::{CrawlMetrics, MetricsSnapshot};
use crate::crawler::parser::{extract_links, is_htmlish};
use crate::filter::UrlFilter;
use crate::frontier::{ClaimedUrl, EnqueueOutcome, Frontier};
use crate::politeness::{AcquireOutcome, HostResponse, PolitenessController};
use crate::storage::{DocumentStore, PageSubmission, StoragePipeline};
use crate::url::host_of;
use crate::{CrawlError, Result};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use url::Url;

/// Ceiling on the host-popularity priority penalty
const MAX_HOST_PENALTY: f64 = 8.0;
/// Base backoff while another worker holds a host lease
const LEASE_BUSY_BACKOFF: Duration = Duration::from_millis(200);
/// Priority penalty when a URL goes back unfetched after lease contention
const HOST_BUSY_PENALTY: f64 = 0.5;

/// State shared by every fetch loop in this process
pub struct CrawlContext {
    pub config: Config,
    pub frontier: Frontier,
    pub politeness: PolitenessController,
    pub pipeline: StoragePipeline,
    pub fetcher: Arc<dyn PageFetcher>,
    pub metrics: CrawlMetrics,
    /// Per-host URL counts observed by this process, feeding the
    /// host-popularity penalty
    host_counts: Mutex<HashMap<String, u64>>,
}

impl CrawlContext {
    /// Records one more URL observed for `host` and returns the clamped
    /// ln(count) penalty
    fn observe_host(&self, host: &str) -> f64 {
        let mut counts = self.host_counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(host.to_string()).or_insert(0);
        *count += 1;
        (*count as f64).ln().clamp(0.0, MAX_HOST_PENALTY)
    }

    fn page_budget_reached(&self) -> bool {
        self.config.worker.max_pages > 0
            && self.metrics.persisted.load(Ordering::Relaxed) >= self.config.worker.max_pages
    }
}

/// One cooperative fetch loop
pub struct Worker {
    id: String,
    ctx: Arc<CrawlContext>,
    shutdown: watch::Receiver<bool>,
    next_sweep: Instant,
}

impl Worker {
    pub fn new(id: String, ctx: Arc<CrawlContext>, shutdown: watch::Receiver<bool>) -> Self {
        let next_sweep =
            Instant::now() + jittered(Duration::from_secs(ctx.config.frontier.sweep_interval_seconds));
        Self {
            id,
            ctx,
            shutdown,
            next_sweep,
        }
    }

    /// Runs until the frontier stays empty, the page budget is reached, or
    /// shutdown is signaled
    ///
    /// Coordination store failures abort the loop; everything this worker
    /// had in flight is recovered by its peers' stale sweeps.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(worker = %self.id, "worker loop starting");
        let idle_backoff =
            Duration::from_secs_f64(self.ctx.config.worker.idle_backoff_seconds);
        let mut idle_polls = 0u32;

        loop {
            if *self.shutdown.borrow() {
                tracing::info!(worker = %self.id, "shutdown requested, not claiming");
                break;
            }
            if self.ctx.page_budget_reached() {
                tracing::info!(worker = %self.id, "page budget reached");
                break;
            }

            self.maybe_sweep().await?;

            if let Err(e) = self.ctx.pipeline.maybe_flush().await {
                tracing::warn!(worker = %self.id, error = %e, "deferred flush failed");
            }

            let next_claim = self.ctx.frontier.claim(&self.id).await?;
            let Some(claimed) = next_claim else {
                idle_polls += 1;
                if idle_polls >= self.ctx.config.worker.max_idle_polls {
                    tracing::info!(worker = %self.id, "frontier stayed empty, exiting");
                    break;
                }
                self.sleep_or_shutdown(jittered(idle_backoff)).await;
                continue;
            };
            idle_polls = 0;

            if let Err(e) = self.process(&claimed).await {
                if matches!(e, CrawlError::Coord(_)) {
                    tracing::error!(worker = %self.id, error = %e, "coordination store failed");
                    return Err(e);
                }
                tracing::warn!(worker = %self.id, url = %claimed.url, error = %e, "processing failed");
                self.ctx.metrics.incr(&self.ctx.metrics.failed);
                let _ = self.ctx.frontier.fail(&claimed, true).await;
            }
        }

        Ok(())
    }

    /// One claim through the full pipeline
    async fn process(&mut self, claimed: &ClaimedUrl) -> Result<()> {
        let url = Url::parse(&claimed.url)?;
        let Some(host) = host_of(&url) else {
            // Cannot happen for URLs the frontier admitted; drop defensively.
            self.ctx.frontier.complete(claimed).await?;
            return Ok(());
        };

        let rules = self.ctx.politeness.robots_rules(&url).await?;
        if !rules.is_allowed(url.as_str(), self.ctx.politeness.user_agent()) {
            tracing::debug!(worker = %self.id, url = %url, "disallowed by robots.txt");
            self.ctx.metrics.incr(&self.ctx.metrics.robots_denied);
            self.ctx.frontier.complete(claimed).await?;
            return Ok(());
        }
        let robots_delay = rules.crawl_delay(self.ctx.politeness.user_agent());

        if !self.acquire_host(&host, robots_delay).await? {
            // Could not win the host within budget; back in line with a
            // small penalty, no retry charged.
            self.ctx.frontier.requeue(claimed, HOST_BUSY_PENALTY).await?;
            return Ok(());
        }

        let fetched = self.ctx.fetcher.fetch(&url).await;

        // The lease is released as soon as the exchange ends; parsing and
        // storage must not serialize other fetches against this host.
        let response_class = match &fetched {
            Ok(page) if page.is_throttle() => HostResponse::Throttled,
            Ok(_) => HostResponse::Ok,
            Err(_) => HostResponse::Unreachable,
        };
        self.ctx
            .politeness
            .release(&host, &self.id, response_class)
            .await?;

        let page = match fetched {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(worker = %self.id, url = %url, error = %e, "fetch failed");
                self.ctx.metrics.incr(&self.ctx.metrics.failed);
                self.ctx.frontier.fail(claimed, true).await?;
                return Ok(());
            }
        };
        self.ctx.metrics.incr(&self.ctx.metrics.fetched);

        if page.is_redirect() {
            if let Some(target) = &page.redirect_target {
                match self.ctx.frontier.enqueue(target, claimed.priority + 1.0).await {
                    Ok(outcome) => {
                        if outcome == EnqueueOutcome::Dropped {
                            self.ctx.metrics.incr(&self.ctx.metrics.dropped);
                        }
                        tracing::debug!(worker = %self.id, from = %url, to = %target, ?outcome, "redirect");
                    }
                    Err(CrawlError::UrlError(e)) => {
                        tracing::debug!(worker = %self.id, target = %target, error = %e, "unusable redirect target");
                    }
                    Err(e) => return Err(e),
                }
            }
            self.ctx.frontier.complete(claimed).await?;
            return Ok(());
        }

        if page.is_throttle() {
            tracing::debug!(worker = %self.id, url = %url, status = page.status, "throttled");
            self.ctx.metrics.incr(&self.ctx.metrics.failed);
            self.ctx.frontier.fail(claimed, true).await?;
            return Ok(());
        }

        let parse_links = page.is_success() && is_htmlish(page.content_type.as_deref());

        let mut outbound = Vec::new();
        if parse_links {
            let body_text = String::from_utf8_lossy(&page.body);
            for link in extract_links(&body_text, &url) {
                let penalty = Url::parse(&link)
                    .ok()
                    .and_then(|u| host_of(&u))
                    .map(|h| self.ctx.observe_host(&h))
                    .unwrap_or(0.0);
                outbound.push((link, claimed.priority + 1.0 + penalty));
            }
        }

        let outbound_count = outbound.len() as u32;
        if !outbound.is_empty() {
            let (_, dropped) = self.ctx.frontier.enqueue_many(&outbound).await?;
            if dropped > 0 {
                self.ctx.metrics.add(&self.ctx.metrics.dropped, dropped);
            }
        }

        // Non-HTML and error responses keep their metadata but no payload.
        let body = if parse_links { page.body } else { Vec::new() };
        let body_len = body.len() as u64;
        let submission = PageSubmission {
            url: page.url,
            normalized_url: claimed.url.clone(),
            status: page.status,
            content_type: page.content_type,
            headers: page.headers,
            body,
            truncated: page.truncated,
            outbound_links: outbound_count,
            worker_id: self.id.clone(),
        };

        match self.ctx.pipeline.submit(submission).await {
            Ok(outcome) => {
                if outcome.duplicate_content {
                    self.ctx.metrics.incr(&self.ctx.metrics.duplicate_content);
                }
                self.ctx.metrics.add(&self.ctx.metrics.bytes_stored, body_len);
                self.ctx.frontier.complete(claimed).await?;
                self.ctx.metrics.incr(&self.ctx.metrics.persisted);
            }
            Err(e) => {
                // Deliberately not completed: the claim goes stale and a
                // peer's sweep re-enqueues the URL.
                tracing::error!(worker = %self.id, url = %claimed.url, error = %e, "storage write failed");
                self.ctx.metrics.incr(&self.ctx.metrics.failed);
            }
        }

        Ok(())
    }

    /// Bounded attempts to win the host lease
    async fn acquire_host(&mut self, host: &str, robots_delay: Option<f64>) -> Result<bool> {
        for attempt in 0..self.ctx.config.politeness.host_claim_budget {
            if *self.shutdown.borrow() {
                return Ok(false);
            }

            let outcome = self
                .ctx
                .politeness
                .try_acquire(host, &self.id, robots_delay)
                .await?;
            match outcome {
                AcquireOutcome::Acquired => return Ok(true),
                AcquireOutcome::Busy => {
                    self.sleep_or_shutdown(jittered(LEASE_BUSY_BACKOFF * (attempt + 1)))
                        .await;
                }
                AcquireOutcome::DelayNotElapsed(wait) => {
                    self.sleep_or_shutdown(wait + jittered(Duration::from_millis(50)))
                        .await;
                }
            }
        }
        Ok(false)
    }

    async fn maybe_sweep(&mut self) -> Result<()> {
        if Instant::now() < self.next_sweep {
            return Ok(());
        }
        self.next_sweep = Instant::now()
            + jittered(Duration::from_secs(
                self.ctx.config.frontier.sweep_interval_seconds,
            ));

        let recovered = self.ctx.frontier.sweep_stale().await?;
        if recovered > 0 {
            self.ctx
                .metrics
                .add(&self.ctx.metrics.stale_recovered, recovered);
        }
        self.ctx.metrics.log_summary();
        Ok(())
    }

    async fn sleep_or_shutdown(&mut self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.changed() => {}
        }
    }
}

/// Multiplies a base duration by a factor in [0.5, 1.5)
fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    base.mul_f64(factor)
}

/// Stable-enough worker id: hostname, pid, random suffix
pub fn generate_worker_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "host".to_string());
    format!(
        "{}-{}-{:04x}",
        hostname,
        std::process::id(),
        rand::thread_rng().gen::<u16>()
    )
}

/// Wires up the components and drives the configured number of fetch loops
/// to completion
///
/// Returns the final metrics. Errors out when a loop loses the
/// coordination store; stale claims are then recovered by peer processes.
pub async fn run_crawl(
    config: Config,
    coord: Arc<dyn CoordStore>,
    docs: Box<dyn DocumentStore>,
    shutdown: watch::Receiver<bool>,
) -> Result<MetricsSnapshot> {
    let client = build_http_client(&config.fetch)?;
    let filter = Arc::new(UrlFilter::new(
        coord.clone(),
        config.filter.capacity,
        config.filter.error_rate,
    ));
    let frontier = Frontier::new(coord.clone(), filter.clone(), config.frontier.clone());
    let politeness = PolitenessController::new(
        coord.clone(),
        config.politeness.clone(),
        config.fetch.user_agent(),
        client.clone(),
    );
    let fetcher: Arc<dyn PageFetcher> =
        Arc::new(HttpFetcher::new(client, config.fetch.max_content_length));
    let pipeline = StoragePipeline::new(docs, config.storage.clone());

    let worker_base = if config.worker.worker_id.is_empty() {
        generate_worker_id()
    } else {
        config.worker.worker_id.clone()
    };
    let concurrency = config.worker.concurrency;
    let grace = Duration::from_secs(config.worker.grace_period_seconds);

    let ctx = Arc::new(CrawlContext {
        config,
        frontier,
        politeness,
        pipeline,
        fetcher,
        metrics: CrawlMetrics::new(),
        host_counts: Mutex::new(HashMap::new()),
    });

    let mut seeded = 0;
    for seed in &ctx.config.crawl.seeds {
        match ctx.frontier.enqueue(seed, 0.0).await? {
            EnqueueOutcome::Admitted => seeded += 1,
            outcome => tracing::debug!(seed = %seed, ?outcome, "seed not admitted"),
        }
    }
    tracing::info!(worker = %worker_base, seeded, loops = concurrency, "starting crawl");

    let mut handles = Vec::new();
    for i in 0..concurrency {
        let worker = Worker::new(format!("{}-{}", worker_base, i), ctx.clone(), shutdown.clone());
        handles.push(tokio::spawn(worker.run()));
    }

    let mut first_error = None;
    for handle in handles {
        let joined = if *shutdown.borrow() {
            match tokio::time::timeout(grace, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!("worker exceeded grace period");
                    continue;
                }
            }
        } else {
            handle.await
        };

        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "worker loop failed");
                first_error.get_or_insert(e);
            }
            Err(e) => tracing::error!(error = %e, "worker task panicked"),
        }
    }

    if let Err(e) = ctx.pipeline.flush().await {
        tracing::error!(error = %e, "final flush failed");
        first_error.get_or_insert(e.into());
    }

    ctx.metrics.log_summary();
    match filter.size_estimate().await {
        Ok(estimate) => tracing::info!(estimate, "seen-filter distinct URL estimate"),
        Err(e) => tracing::debug!(error = %e, "filter estimate unavailable"),
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(ctx.metrics.snapshot()),
    }
}
