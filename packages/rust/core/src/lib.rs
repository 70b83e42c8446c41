//! Pipeline orchestration for Regional Radar.
//!
//! Ties the fetcher, classifier, geocoder, store and alert dispatcher
//! together into a roster run (see [`Orchestrator::run`]).

pub mod orchestrator;
pub mod outcome;
pub mod progress;

pub use orchestrator::{Orchestrator, PipelineSettings, backfill_geo};
pub use outcome::{CompanyRun, RunOutcome, RunSummary, Stage};
pub use progress::{ProgressReporter, SilentProgress};
