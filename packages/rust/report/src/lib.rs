//! Printable reports over stored company records.
//!
//! [`ReportGenerator`] reads from [`radar_storage::Storage`] only; a
//! [`DocumentRenderer`] turns the resulting [`Report`] into Markdown or
//! printable HTML.

pub mod generator;
pub mod render;
pub mod score;
pub mod stats;

pub use generator::{CompanyEntry, Report, ReportGenerator, Selection};
pub use render::{Artifact, DocumentRenderer, HtmlRenderer, MarkdownRenderer, write_artifact};
pub use score::{MaturityLevel, MaturityScore, maturity_score};
pub use stats::{RosterStats, TierShare};
