use crate::UrlError;
use url::Url;

/// Normalizes a URL into the canonical form shared by every worker
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or non-HTTP(S)
/// 2. Lowercase the scheme and host (the parser guarantees this)
/// 3. Strip default ports (80 for http, 443 for https)
/// 4. Resolve dot segments and collapse duplicate slashes in the path
/// 5. Remove the trailing slash (except for the root path)
/// 6. Remove the fragment
///
/// Two URLs that normalize identically are treated as the same page by the
/// frontier and the seen-filter, so this must be deterministic across
/// workers.
///
/// # Examples
///
/// ```
/// use swarmcrawl::url::normalize_url;
///
/// let url = normalize_url("HTTP://Example.COM:80/a/../b/#frag").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/b");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    // The url crate already lowercases scheme and host and drops default
    // ports; a missing host is still possible for pathological inputs.
    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    Ok(url)
}

/// Resolves dot segments, collapses duplicate slashes, and strips the
/// trailing slash (except for root)
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", segments.join("/"))
}
