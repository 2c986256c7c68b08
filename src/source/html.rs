//! Small scraping helpers shared by the adapters

use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Collects the text of an element, trimmed and with runs of whitespace collapsed
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first match of `css` under `scope`, or an empty string
pub fn first_text(scope: ElementRef<'_>, css: &str) -> String {
    first(scope, css).map(element_text).unwrap_or_default()
}

/// Text of the first match of `css` in the whole document, or an empty string
pub fn doc_text(document: &Html, css: &str) -> String {
    doc_first(document, css)
        .map(element_text)
        .unwrap_or_default()
}

/// First match of `css` under `scope`
pub fn first<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    scope.select(&selector).next()
}

/// First match of `css` in the whole document
pub fn doc_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

/// Every match of `css` under `scope`
pub fn all<'a>(scope: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => scope.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

/// Every match of `css` in the whole document
pub fn doc_all<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => document.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

/// Attribute of the first match of `css` under `scope`
pub fn first_attr(scope: ElementRef<'_>, css: &str, attr: &str) -> Option<String> {
    first(scope, css)
        .and_then(|e| e.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Keeps only the outer HTML of the first element matching `root`
///
/// Returns the input unchanged when the selector is invalid or matches
/// nothing.
pub fn extract_root(html: &str, root: &str) -> String {
    let document = Html::parse_document(html);
    match doc_first(&document, root) {
        Some(element) => element.html(),
        None => html.to_string(),
    }
}

/// Resolves a listing href against the source's base URL
///
/// Returns None for empty, fragment-only and non-http(s) links.
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    if absolute.scheme() == "http" || absolute.scheme() == "https" {
        Some(absolute.to_string())
    } else {
        None
    }
}
