//! HTTP fetching
//!
//! The worker loop sees fetching as a capability trait so the client can
//! be swapped without touching the loop. The shipped implementation is a
//! reqwest client that never follows redirects on its own (the frontier
//! decides whether the target gets crawled), caps body reads at the
//! configured maximum, and classifies transport failures for the adaptive
//! delay logic.

use crate::config::FetchConfig;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Transport-level fetch failure
///
/// All variants are transient from the frontier's point of view; the
/// distinction feeds logging and the per-host adaptive delay.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Connection failed for {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Fetch failed for {url}: {message}")]
    Other { url: String, message: String },
}

/// A completed HTTP exchange
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL that was requested
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
    /// Decoded body, cut at the configured maximum
    pub body: Vec<u8>,
    /// Body exceeded the maximum and was cut short
    pub truncated: bool,
    /// Absolute redirect target, when the response was a 3xx with a
    /// resolvable Location header
    pub redirect_target: Option<String>,
}

impl FetchedPage {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 429 and 5xx ask for host-level backoff
    pub fn is_throttle(&self) -> bool {
        self.status == 429 || (500..600).contains(&self.status)
    }
}

/// Fetch capability consumed by the worker loop
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

/// Builds the shared HTTP client
///
/// Redirects are handled by the caller, so the policy is none. Timeouts
/// bound every call, robots fetches included.
pub fn build_http_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent())
        .timeout(Duration::from_secs(config.fetch_timeout_seconds))
        .connect_timeout(Duration::from_secs(config.fetch_timeout_seconds))
        .redirect(Policy::none())
        .gzip(true)
        .brotli(true)
        .build()
}

/// reqwest-backed [`PageFetcher`]
pub struct HttpFetcher {
    client: Client,
    max_content_length: usize,
}

impl HttpFetcher {
    pub fn new(client: Client, max_content_length: usize) -> Self {
        Self {
            client,
            max_content_length,
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let mut response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| classify_error(url.as_str(), e))?;

        let status = response.status().as_u16();

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        let content_type = headers.get("content-type").cloned();

        let redirect_target = if (300..400).contains(&status) {
            headers
                .get("location")
                .and_then(|location| resolve_location(url, location))
        } else {
            None
        };

        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| classify_error(url.as_str(), e))?
        {
            let remaining = self.max_content_length - body.len();
            if chunk.len() > remaining {
                body.extend_from_slice(&chunk[..remaining]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedPage {
            url: url.to_string(),
            status,
            content_type,
            headers,
            body,
            truncated,
            redirect_target,
        })
    }
}

fn classify_error(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() {
        FetchError::Connect {
            url: url.to_string(),
            message: error.to_string(),
        }
    } else {
        FetchError::Other {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

/// Resolves a Location header against the requested URL
fn resolve_location(base: &Url, location: &str) -> Option<String> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Some(location.to_string());
    }
    base.join(location).ok().map(|resolved| resolved.to_string())
}
