/// Path rewriting for proxied module responses
///
/// Module backends assume they are served from `/`. Behind the gateway they
/// live under `/proxy/<module>`, so root-relative references in HTML
/// (`src`, `href`, `action`), inline CSS `url(/...)` and `Location` headers
/// get the prefix added. Protocol-relative (`//host/...`), absolute and
/// already-prefixed references are left alone.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::OnceLock;

fn attribute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\b(src|href|action)(\s*=\s*)(["'])(/[^"']*)"#)
            .unwrap_or_else(|e| panic!("invalid attribute pattern: {e}"))
    })
}

fn css_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\burl\((\s*)(["']?)(/[^)"'\s]*)"#)
            .unwrap_or_else(|e| panic!("invalid css url pattern: {e}"))
    })
}

/// URL prefix for a module, e.g. `/proxy/whisper`
pub fn module_prefix(module: &str) -> String {
    format!("/proxy/{}", module)
}

fn needs_prefix(path: &str, prefix: &str) -> bool {
    if !path.starts_with('/') || path.starts_with("//") {
        return false;
    }

    match path.strip_prefix(prefix) {
        Some(rest) => !(rest.is_empty() || rest.starts_with(|c: char| matches!(c, '/' | '?' | '#'))),
        None => true,
    }
}

/// Rewrites root-relative references in an HTML document
pub fn rewrite_html<'a>(html: &'a str, prefix: &str) -> Cow<'a, str> {
    let html = attribute_pattern().replace_all(html, |caps: &Captures| {
        let path = &caps[4];
        if needs_prefix(path, prefix) {
            format!("{}{}{}{}{}", &caps[1], &caps[2], &caps[3], prefix, path)
        } else {
            caps[0].to_string()
        }
    });

    if !css_url_pattern().is_match(&html) {
        return html;
    }

    let rewritten = css_url_pattern().replace_all(&html, |caps: &Captures| {
        let path = &caps[3];
        if needs_prefix(path, prefix) {
            format!("url({}{}{}{}", &caps[1], &caps[2], prefix, path)
        } else {
            caps[0].to_string()
        }
    });

    Cow::Owned(rewritten.into_owned())
}

/// Rewritten `Location` value, or `None` when it should pass unchanged
pub fn rewrite_location(location: &str, prefix: &str) -> Option<String> {
    needs_prefix(location, prefix).then(|| format!("{}{}", prefix, location))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "/proxy/whisper";

    #[test]
    fn test_rewrites_root_relative_attributes() {
        let html = r#"<link href="/static/app.css"><script src='/static/app.js'></script><form action="/transcribe" method="post"></form>"#;
        let out = rewrite_html(html, PREFIX);

        assert!(out.contains(r#"href="/proxy/whisper/static/app.css""#));
        assert!(out.contains(r#"src='/proxy/whisper/static/app.js'"#));
        assert!(out.contains(r#"action="/proxy/whisper/transcribe""#));
    }

    #[test]
    fn test_rewrites_root_link() {
        let out = rewrite_html(r#"<a href="/">Home</a>"#, PREFIX);
        assert_eq!(out, r#"<a href="/proxy/whisper/">Home</a>"#);
    }

    #[test]
    fn test_leaves_other_references_alone() {
        let html = concat!(
            r#"<script src="//cdn.example.com/lib.js"></script>"#,
            r#"<a href="https://example.com/">x</a>"#,
            r#"<img src="logo.png">"#,
            r#"<a href="/proxy/whisper/already">y</a>"#,
            r##"<a href="#top">z</a>"##,
        );
        let out = rewrite_html(html, PREFIX);

        assert_eq!(out, html);
    }

    #[test]
    fn test_does_not_confuse_similar_prefix() {
        let out = rewrite_html(r#"<img src="/proxy/whisperx/a.png">"#, PREFIX);
        assert!(out.contains(r#"src="/proxy/whisper/proxy/whisperx/a.png""#));
    }

    #[test]
    fn test_rewrites_css_urls() {
        let html = r#"<style>body { background: url(/img/bg.png); } .a { background: url( '/img/a.svg' ); } .b { background: url(//cdn/x.png); }</style>"#;
        let out = rewrite_html(html, PREFIX);

        assert!(out.contains("url(/proxy/whisper/img/bg.png)"));
        assert!(out.contains("url( '/proxy/whisper/img/a.svg' )"));
        assert!(out.contains("url(//cdn/x.png)"));
    }

    #[test]
    fn test_attribute_case_insensitive() {
        let out = rewrite_html(r#"<IMG SRC="/a.png">"#, PREFIX);
        assert_eq!(out, r#"<IMG SRC="/proxy/whisper/a.png">"#);
    }

    #[test]
    fn test_rewrite_location() {
        assert_eq!(
            rewrite_location("/login?next=/", PREFIX),
            Some("/proxy/whisper/login?next=/".to_string())
        );
        assert_eq!(rewrite_location("/proxy/whisper/done", PREFIX), None);
        assert_eq!(rewrite_location("/proxy/whisper", PREFIX), None);
        assert_eq!(rewrite_location("https://example.com/", PREFIX), None);
        assert_eq!(rewrite_location("//example.com/", PREFIX), None);
        assert_eq!(rewrite_location("relative", PREFIX), None);
    }

    #[test]
    fn test_module_prefix() {
        assert_eq!(module_prefix("stablediffusion"), "/proxy/stablediffusion");
    }
}
