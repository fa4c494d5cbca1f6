//! Fetch loops and their collaborators
//!
//! The worker loop ties the frontier, politeness controller, fetcher, and
//! storage pipeline together; the submodules hold the HTTP client, the
//! link extractor, and the process-local metrics.

mod fetcher;
mod metrics;
mod parser;
mod worker;

pub use fetcher::{build_http_client, FetchError, FetchedPage, HttpFetcher, PageFetcher};
pub use metrics::{CrawlMetrics, MetricsSnapshot};
pub use parser::{extract_links, is_htmlish};
pub use worker::{generate_worker_id, run_crawl, CrawlContext, Worker};
