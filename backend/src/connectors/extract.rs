//! HTML content extraction shared by the page and feed drivers.
//!
//! Boilerplate handling: extraction narrows to the most article-like
//! container before text conversion, so navigation, scripts and page chrome
//! outside it never reach item content.

use scraper::{ElementRef, Html, Selector};

use crate::utils::text::normalize_whitespace;

/// Render width for the text conversion; long enough that no prose wraps.
const RENDER_WIDTH: usize = 10_000;

/// Article extracted from a full page with the domain heuristic.
#[derive(Debug, Clone)]
pub struct ExtractedArticle {
    pub title: String,
    pub text: String,
}

/// One block extracted by a configured CSS selector.
#[derive(Debug, Clone)]
pub struct ExtractedBlock {
    pub title: String,
    pub text: String,
    pub link: Option<String>,
}

/// Extract the main article from a page: prefer `<article>`, then
/// `<main>`, then the whole body. Title comes from the first `<h1>` or the
/// document title.
pub fn extract_article(html: &str) -> ExtractedArticle {
    let document = Html::parse_document(html);

    let title = first_text(&document, "h1")
        .or_else(|| first_text(&document, "title"))
        .unwrap_or_default();

    let container_html = select_container(&document)
        .map(|el| el.inner_html())
        .unwrap_or_else(|| document.root_element().inner_html());

    let text = html_to_text(&container_html);

    ExtractedArticle { title, text }
}

/// Extract one block per element matched by the configured selector.
/// Malformed selectors were rejected at validate time; a parse failure here
/// yields no blocks.
pub fn extract_blocks(html: &str, selector: &str) -> Vec<ExtractedBlock> {
    let Ok(sel) = Selector::parse(selector) else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut blocks = Vec::new();

    for element in document.select(&sel) {
        let title = heading_text(element).unwrap_or_default();
        let link = first_href(element);
        let text = html_to_text(&element.inner_html());
        if title.is_empty() && text.is_empty() {
            continue;
        }
        blocks.push(ExtractedBlock { title, text, link });
    }

    blocks
}

/// Convert an HTML fragment to clean plain text.
pub fn html_to_text(fragment: &str) -> String {
    let rendered = html2text::from_read(fragment.as_bytes(), RENDER_WIDTH);
    normalize_whitespace(&rendered)
}

fn select_container(document: &Html) -> Option<ElementRef<'_>> {
    for candidate in ["article", "main", "body"] {
        let sel = Selector::parse(candidate).ok()?;
        if let Some(el) = document.select(&sel).next() {
            return Some(el);
        }
    }
    None
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .next()
        .map(|el| normalize_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        .filter(|s| !s.is_empty())
}

fn heading_text(element: ElementRef<'_>) -> Option<String> {
    for candidate in ["h1", "h2", "h3", "a"] {
        let sel = Selector::parse(candidate).ok()?;
        if let Some(el) = element.select(&sel).next() {
            let text = normalize_whitespace(&el.text().collect::<Vec<_>>().join(" "));
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn first_href(element: ElementRef<'_>) -> Option<String> {
    let sel = Selector::parse("a[href]").ok()?;
    element
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|s| s.to_string())
}
