use url::Url;

/// Extracts the politeness host key from a URL
///
/// The key is the lowercase host, with the port appended when it is not the
/// scheme default. Two servers on the same address but different ports are
/// separate hosts for lease and crawl-delay purposes.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use swarmcrawl::url::host_of;
///
/// let url = Url::parse("https://Example.COM/path").unwrap();
/// assert_eq!(host_of(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://127.0.0.1:8080/path").unwrap();
/// assert_eq!(host_of(&url), Some("127.0.0.1:8080".to_string()));
/// ```
pub fn host_of(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}
