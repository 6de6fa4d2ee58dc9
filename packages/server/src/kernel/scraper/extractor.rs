//! Raw page to cleaned plain text.
//!
//! Pure and deterministic: the same input always yields the same output.

use scraper::{ElementRef, Html, Node, Selector};

use super::error::ExtractError;
use super::{FetchedPage, PageFormat};

/// Content-bearing regions, tried in order before falling back to `<body>`.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role=\"main\"]",
    "#content",
    "#main",
    ".content",
    ".main",
    ".post-content",
    ".entry-content",
];

/// Subtrees whose text is never page content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "iframe", "noscript"];

const TRUNCATION_MARKER: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Output is cut to this many characters (plus the marker)
    pub max_length: usize,
    /// A region is accepted only if its text is longer than this
    pub min_region_length: usize,
    /// Anything shorter fails with `InsufficientContent`
    pub min_content_length: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_length: 50_000,
            min_region_length: 100,
            min_content_length: 50,
        }
    }
}

/// Extract cleaned, bounded text from a fetched page.
pub fn extract_text(page: &FetchedPage, options: &ExtractOptions) -> Result<String, ExtractError> {
    let raw = match page.format {
        PageFormat::Html => html_to_text(&page.body, options.min_region_length),
        PageFormat::Text => page.body.clone(),
    };

    let cleaned = collapse_whitespace(&raw);
    let length = cleaned.chars().count();
    if length < options.min_content_length {
        return Err(ExtractError::InsufficientContent {
            length,
            minimum: options.min_content_length,
        });
    }

    Ok(truncate(cleaned, length, options.max_length))
}

fn html_to_text(html: &str, min_region_length: usize) -> String {
    let document = Html::parse_document(html);

    let mut text = String::new();
    if let Some(title) = page_title(&document) {
        text.push_str(&format!("Title: {}\n\n", title));
    }
    if let Some(description) = meta_description(&document) {
        text.push_str(&format!("Description: {}\n\n", description));
    }
    text.push_str(&main_region_text(&document, min_region_length));
    text
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

fn page_title(document: &Html) -> Option<String> {
    let title = select_first(document, "title")?;
    let text = collapse_whitespace(&title.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

fn meta_description(document: &Html) -> Option<String> {
    ["meta[name=\"description\"]", "meta[property=\"og:description\"]"]
        .iter()
        .filter_map(|css| select_first(document, css))
        .filter_map(|meta| meta.value().attr("content"))
        .map(collapse_whitespace)
        .find(|content| !content.is_empty())
}

/// Text of the first content region that clears the threshold, else the body.
///
/// A region is every element matching its selector, joined in document order.
fn main_region_text(document: &Html, min_region_length: usize) -> String {
    for css in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        let text = document
            .select(&selector)
            .map(visible_text)
            .collect::<Vec<_>>()
            .join(" ");
        if text.trim().chars().count() > min_region_length {
            return text;
        }
    }

    match select_first(document, "body") {
        Some(body) => visible_text(body),
        None => visible_text(document.root_element()),
    }
}

fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    out
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if SKIPPED_ELEMENTS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    // Block boundaries must not glue words together.
                    out.push(' ');
                    collect_text(child_element, out);
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: String, length: usize, max_length: usize) -> String {
    if length <= max_length {
        return text;
    }
    let mut cut: String = text.chars().take(max_length).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}
