use serde::Deserialize;

/// Main configuration structure for a swarmcrawl worker process
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub frontier: FrontierConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
}

/// Worker process behavior
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Stable worker id; auto-generated from hostname + pid when empty
    #[serde(rename = "worker-id", default)]
    pub worker_id: String,

    /// Number of cooperative fetch loops inside this process
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Stop after this many pages have been persisted (0 = unlimited)
    #[serde(rename = "max-pages", default)]
    pub max_pages: u64,

    /// Exit after this many consecutive empty frontier polls
    #[serde(rename = "max-idle-polls", default = "default_max_idle_polls")]
    pub max_idle_polls: u32,

    /// Base sleep between empty polls (jittered)
    #[serde(rename = "idle-backoff-seconds", default = "default_idle_backoff")]
    pub idle_backoff_seconds: f64,

    /// How long shutdown waits for in-flight fetches
    #[serde(rename = "grace-period-seconds", default = "default_grace_period")]
    pub grace_period_seconds: u64,
}

/// HTTP fetch behavior and crawler identification
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(rename = "user-agent-name", default = "default_ua_name")]
    pub user_agent_name: String,

    #[serde(rename = "user-agent-version", default = "default_ua_version")]
    pub user_agent_version: String,

    /// Contact URL or email advertised in the user agent string
    #[serde(default)]
    pub contact: String,

    #[serde(rename = "fetch-timeout-seconds", default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,

    /// Bodies beyond this many bytes are truncated and flagged
    #[serde(rename = "max-content-length", default = "default_max_content_length")]
    pub max_content_length: usize,
}

/// Per-host politeness knobs
#[derive(Debug, Clone, Deserialize)]
pub struct PolitenessConfig {
    /// Floor for the inter-fetch delay on a single host
    #[serde(
        rename = "default-crawl-delay-seconds",
        default = "default_crawl_delay"
    )]
    pub default_crawl_delay_seconds: f64,

    #[serde(rename = "lease-ttl-seconds", default = "default_lease_ttl")]
    pub lease_ttl_seconds: u64,

    /// How long a parsed robots.txt snapshot stays valid
    #[serde(rename = "robots-ttl-seconds", default = "default_robots_ttl")]
    pub robots_ttl_seconds: u64,

    /// Cap on the adaptive delay penalty
    #[serde(
        rename = "max-adaptive-delay-seconds",
        default = "default_max_adaptive_delay"
    )]
    pub max_adaptive_delay_seconds: f64,

    /// Attempts to win a host lease before the URL goes back to the frontier
    #[serde(rename = "host-claim-budget", default = "default_host_claim_budget")]
    pub host_claim_budget: u32,
}

/// Frontier and claim-tracking knobs
#[derive(Debug, Clone, Deserialize)]
pub struct FrontierConfig {
    #[serde(rename = "claim-ttl-seconds", default = "default_claim_ttl")]
    pub claim_ttl_seconds: u64,

    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Base interval between cooperative stale-claim sweeps (jittered)
    #[serde(rename = "sweep-interval-seconds", default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,

    /// Soft bound on frontier cardinality; low-priority enqueues beyond it
    /// are dropped
    #[serde(rename = "soft-limit", default = "default_frontier_soft_limit")]
    pub soft_limit: u64,

    /// Enqueues at or above this priority are droppable under pressure
    #[serde(rename = "drop-priority", default = "default_drop_priority")]
    pub drop_priority: f64,
}

/// Approximate URL filter sizing
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Expected number of unique URLs
    #[serde(default = "default_filter_capacity")]
    pub capacity: u64,

    /// Target false-positive rate
    #[serde(rename = "error-rate", default = "default_filter_error_rate")]
    pub error_rate: f64,
}

/// Document store and write pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,

    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(rename = "batch-age-seconds", default = "default_batch_age")]
    pub batch_age_seconds: u64,

    /// Times a failed batch flush is retried before surfacing the error
    #[serde(rename = "flush-retries", default = "default_flush_retries")]
    pub flush_retries: u32,
}

/// Seed URLs for this deployment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrawlConfig {
    #[serde(default)]
    pub seeds: Vec<String>,
}

impl FetchConfig {
    /// Assembles the advertised user agent string
    pub fn user_agent(&self) -> String {
        if self.contact.is_empty() {
            format!("{}/{}", self.user_agent_name, self.user_agent_version)
        } else {
            format!(
                "{}/{} (+{})",
                self.user_agent_name, self.user_agent_version, self.contact
            )
        }
    }
}

fn default_concurrency() -> u32 {
    4
}

fn default_max_idle_polls() -> u32 {
    30
}

fn default_idle_backoff() -> f64 {
    1.0
}

fn default_grace_period() -> u64 {
    15
}

fn default_ua_name() -> String {
    "swarmcrawl".to_string()
}

fn default_ua_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_max_content_length() -> usize {
    2 * 1024 * 1024
}

fn default_crawl_delay() -> f64 {
    1.0
}

fn default_lease_ttl() -> u64 {
    30
}

fn default_robots_ttl() -> u64 {
    3600
}

fn default_max_adaptive_delay() -> f64 {
    60.0
}

fn default_host_claim_budget() -> u32 {
    5
}

fn default_claim_ttl() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    3
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_frontier_soft_limit() -> u64 {
    1_000_000
}

fn default_drop_priority() -> f64 {
    10.0
}

fn default_filter_capacity() -> u64 {
    10_000_000
}

fn default_filter_error_rate() -> f64 {
    0.001
}

fn default_database_path() -> String {
    "./swarmcrawl.db".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_batch_age() -> u64 {
    5
}

fn default_flush_retries() -> u32 {
    3
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: String::new(),
            concurrency: default_concurrency(),
            max_pages: 0,
            max_idle_polls: default_max_idle_polls(),
            idle_backoff_seconds: default_idle_backoff(),
            grace_period_seconds: default_grace_period(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent_name: default_ua_name(),
            user_agent_version: default_ua_version(),
            contact: String::new(),
            fetch_timeout_seconds: default_fetch_timeout(),
            max_content_length: default_max_content_length(),
        }
    }
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            default_crawl_delay_seconds: default_crawl_delay(),
            lease_ttl_seconds: default_lease_ttl(),
            robots_ttl_seconds: default_robots_ttl(),
            max_adaptive_delay_seconds: default_max_adaptive_delay(),
            host_claim_budget: default_host_claim_budget(),
        }
    }
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            claim_ttl_seconds: default_claim_ttl(),
            max_retries: default_max_retries(),
            sweep_interval_seconds: default_sweep_interval(),
            soft_limit: default_frontier_soft_limit(),
            drop_priority: default_drop_priority(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            capacity: default_filter_capacity(),
            error_rate: default_filter_error_rate(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            batch_size: default_batch_size(),
            batch_age_seconds: default_batch_age(),
            flush_retries: default_flush_retries(),
        }
    }
}
