//! HTML → plain text and link extraction.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Elements whose text never reaches the classifier.
const EXCLUDED_TAGS: &[&str] = &[
    "head", "script", "style", "nav", "footer", "header", "aside", "form", "iframe", "noscript",
    "svg", "template",
];

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("static selector"));
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("static selector"));
static LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

/// Visible text of a document with page chrome removed and whitespace
/// collapsed to single spaces.
pub fn extract_text(doc: &Html) -> String {
    let mut raw = String::new();

    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| EXCLUDED_TAGS.contains(&el.name()))
        });
        if hidden {
            continue;
        }
        raw.push_str(text);
        raw.push(' ');
    }

    collapse_whitespace(&raw)
}

/// `<title>`, falling back to the first `<h1>`.
pub fn extract_title(doc: &Html) -> Option<String> {
    let from = |el: ElementRef<'_>| collapse_whitespace(&el.text().collect::<String>());

    doc.select(&TITLE)
        .next()
        .map(from)
        .filter(|t| !t.is_empty())
        .or_else(|| doc.select(&H1).next().map(from).filter(|t| !t.is_empty()))
}

/// All link targets resolved against `base`, fragments stripped.
pub fn extract_links(doc: &Html, base: &Url) -> Vec<Url> {
    let mut links = Vec::new();

    for el in doc.select(&LINKS) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        // Skip anchors, javascript:, mailto:, tel:
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        if let Ok(mut resolved) = base.join(href) {
            resolved.set_fragment(None);
            links.push(resolved);
        }
    }

    links
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `text` to at most `max_chars` characters without splitting one.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Keywords that occur in `text` as whole words, case-insensitively.
pub fn keyword_hits(text: &str, keywords: &[String]) -> Vec<String> {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .filter(|kw| {
            let needle = kw.trim().to_lowercase();
            !needle.is_empty() && contains_word(&haystack, &needle)
        })
        .cloned()
        .collect()
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
