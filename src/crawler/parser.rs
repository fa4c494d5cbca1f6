//! Link extraction
//!
//! Pulls outbound links from fetched HTML. Parsing never fails hard: a
//! malformed document yields whatever anchors the parser could salvage,
//! and the raw bytes are persisted either way.

use scraper::{Html, Selector};
use url::Url;

/// Whether a content type should be parsed for links
pub fn is_htmlish(content_type: Option<&str>) -> bool {
    match content_type {
        Some(value) => {
            value.contains("text/html") || value.contains("application/xhtml+xml")
        }
        // Servers that send no content type mostly serve HTML.
        None => true,
    }
}

/// Extracts absolute outbound links from an HTML document
///
/// Includes `<a href>` anchors (minus those carrying a `download`
/// attribute) and the canonical link. Skips `javascript:`, `mailto:`,
/// `tel:` and `data:` targets, and anything that does not resolve to an
/// HTTP(S) URL against `base_url`.
pub fn extract_links(html: &str, base_url: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    if let Ok(selector) = Selector::parse("a[href]") {
        for element in document.select(&selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href") {
                if let Some(absolute) = resolve_link(href, base_url) {
                    links.push(absolute);
                }
            }
        }
    }

    if let Ok(selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                if let Some(absolute) = resolve_link(href, base_url) {
                    links.push(absolute);
                }
            }
        }
    }

    links
}

/// Resolves one href to an absolute HTTP(S) URL, or rejects it
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let resolved = base_url.join(href).ok()?;

    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }

    Some(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://a.test/dir/page").unwrap()
    }

    #[test]
    fn test_is_htmlish() {
        assert!(is_htmlish(Some("text/html")));
        assert!(is_htmlish(Some("text/html; charset=utf-8")));
        assert!(is_htmlish(Some("application/xhtml+xml")));
        assert!(is_htmlish(None));
        assert!(!is_htmlish(Some("application/pdf")));
        assert!(!is_htmlish(Some("image/png")));
    }

    #[test]
    fn test_extract_absolute_and_relative() {
        let html = r#"<html><body>
            <a href="https://b.test/x">abs</a>
            <a href="/root">rooted</a>
            <a href="sibling">relative</a>
        </body></html>"#;

        let links = extract_links(html, &base());
        assert_eq!(
            links,
            vec![
                "https://b.test/x",
                "https://a.test/root",
                "https://a.test/dir/sibling",
            ]
        );
    }

    #[test]
    fn test_skips_special_schemes() {
        let html = r#"<html><body>
            <a href="javascript:void(0)">js</a>
            <a href="mailto:x@a.test">mail</a>
            <a href="tel:+123">tel</a>
            <a href="data:text/plain,hi">data</a>
            <a href="ftp://a.test/file">ftp</a>
            <a href="/keep">keep</a>
        </body></html>"#;

        let links = extract_links(html, &base());
        assert_eq!(links, vec!["https://a.test/keep"]);
    }

    #[test]
    fn test_skips_download_links() {
        let html = r#"<a href="/file.zip" download>get</a><a href="/page">page</a>"#;
        let links = extract_links(html, &base());
        assert_eq!(links, vec!["https://a.test/page"]);
    }

    #[test]
    fn test_includes_canonical() {
        let html = r#"<html><head>
            <link rel="canonical" href="https://a.test/canonical">
            <link rel="stylesheet" href="/style.css">
        </head><body></body></html>"#;

        let links = extract_links(html, &base());
        assert_eq!(links, vec!["https://a.test/canonical"]);
    }

    #[test]
    fn test_malformed_html_salvages_links() {
        let html = r#"<html><body><a href="/ok">ok</a><div><span></body>"#;
        let links = extract_links(html, &base());
        assert_eq!(links, vec!["https://a.test/ok"]);
    }

    #[test]
    fn test_empty_document() {
        assert!(extract_links("", &base()).is_empty());
    }
}
