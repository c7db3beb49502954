//! HTML fragment injection.
//!
//! Inserts a configured fragment right after the first `<head>` tag of HTML
//! responses. Runs before the cache write, so stored copies already carry
//! the fragment.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::message::HttpResponse;

/// First head-opening tag: `<head>`, `< HEAD >`, `<head lang="en">`, but not `<header>`.
static HEAD_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*head(?:\s[^>]*)?>").expect("Invalid head tag pattern"));

/// Rewrites HTML responses to carry the injection fragment.
#[derive(Debug, Clone, Default)]
pub struct ResponseTransformer {
    fragment: Option<Arc<str>>,
}

impl ResponseTransformer {
    /// Creates a transformer. `None` or an empty fragment disables injection.
    pub fn new(fragment: Option<String>) -> Self {
        Self {
            fragment: fragment.filter(|f| !f.is_empty()).map(Arc::from),
        }
    }

    /// Returns the configured fragment.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Applies the fragment to `response` if it is HTML and has a head tag.
    ///
    /// Anything else is returned unchanged.
    pub fn transform(&self, mut response: HttpResponse) -> HttpResponse {
        let Some(fragment) = &self.fragment else {
            return response;
        };
        if !response.is_html() {
            return response;
        }

        if let Some(body) = inject_after_head(&response.body, fragment.as_bytes()) {
            response.body = body;
            response.headers.remove("content-length");
        } else {
            tracing::debug!("No head tag found, leaving HTML body unchanged");
        }
        response
    }
}

/// Returns a copy of `body` with `fragment` after the first head tag.
fn inject_after_head(body: &[u8], fragment: &[u8]) -> Option<Vec<u8>> {
    let end = HEAD_TAG.find(body)?.end();

    let mut out = Vec::with_capacity(body.len() + fragment.len());
    out.extend_from_slice(&body[..end]);
    out.extend_from_slice(fragment);
    out.extend_from_slice(&body[end..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &str = "<script>X</script>";

    fn html(body: &str) -> HttpResponse {
        HttpResponse::new(200)
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_header("Content-Length", body.len().to_string())
            .with_body(body)
    }

    fn transformer() -> ResponseTransformer {
        ResponseTransformer::new(Some(FRAGMENT.to_string()))
    }

    fn body_str(response: &HttpResponse) -> &str {
        std::str::from_utf8(&response.body).unwrap()
    }

    #[test]
    fn injects_after_plain_head() {
        let out = transformer().transform(html("<html><head></head><body></body></html>"));
        assert_eq!(
            body_str(&out),
            "<html><head><script>X</script></head><body></body></html>"
        );
    }

    #[test]
    fn head_match_is_case_insensitive() {
        let out = transformer().transform(html("<HTML><HEAD><title>t</title></HEAD></HTML>"));
        assert_eq!(
            body_str(&out),
            "<HTML><HEAD><script>X</script><title>t</title></HEAD></HTML>"
        );
    }

    #[test]
    fn head_with_attributes() {
        let out = transformer().transform(html(r#"<head lang="en"><meta></head>"#));
        assert_eq!(
            body_str(&out),
            r#"<head lang="en"><script>X</script><meta></head>"#
        );
    }

    #[test]
    fn only_first_head_is_used() {
        let out = transformer().transform(html("<head></head><head></head>"));
        assert_eq!(body_str(&out), "<head><script>X</script></head><head></head>");
    }

    #[test]
    fn header_element_is_not_a_head_tag() {
        let out = transformer().transform(html("<body><header>h</header></body>"));
        assert_eq!(body_str(&out), "<body><header>h</header></body>");
    }

    #[test]
    fn missing_head_leaves_body_unchanged() {
        let original = html("<html><body>no head</body></html>");
        let out = transformer().transform(original.clone());
        assert_eq!(out, original);
    }

    #[test]
    fn non_html_passes_through() {
        let css = HttpResponse::new(200)
            .with_header("Content-Type", "text/css")
            .with_body("<head>");
        let out = transformer().transform(css.clone());
        assert_eq!(out, css);
    }

    #[test]
    fn disabled_without_fragment() {
        let original = html("<head></head>");
        assert_eq!(ResponseTransformer::new(None).transform(original.clone()), original);
        assert_eq!(
            ResponseTransformer::new(Some(String::new())).transform(original.clone()),
            original
        );
        assert!(ResponseTransformer::default().fragment().is_none());
    }

    #[test]
    fn content_length_dropped_after_injection() {
        let out = transformer().transform(html("<head></head>"));
        assert!(!out.headers.contains("content-length"));
        assert!(out.headers.contains("content-type"));
    }

    #[test]
    fn non_utf8_body_is_handled() {
        let mut body = b"<head>".to_vec();
        body.extend_from_slice(&[0xff, 0xfe]);
        let response = HttpResponse::new(200)
            .with_header("Content-Type", "text/html")
            .with_body(body);
        let out = transformer().transform(response);
        assert!(out.body.starts_with(b"<head><script>X</script>"));
        assert!(out.body.ends_with(&[0xff, 0xfe]));
    }
}
