//! Company website fetching and text extraction.
//!
//! This crate provides:
//! - [`Fetcher`] - root page plus a bounded set of internal sub-pages
//! - [`SiteSnapshot`] - combined text and keyword hits
//! - [`extract`] - HTML → plain text helpers built on `scraper`

pub mod engine;
pub mod extract;

pub use engine::{Fetcher, PageSource, SiteCrawl, SiteSnapshot};
pub use extract::{extract_links, extract_text, extract_title, keyword_hits};
