//! Progress reporting hooks for front ends.

use radar_shared::{Company, CompanyId};

use crate::outcome::{CompanyRun, RunSummary, Stage};

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a company is picked up. `index` is its roster position.
    fn company_started(&self, company: &Company, index: usize, total: usize);
    /// Called when a company enters a new stage.
    fn stage(&self, company: &CompanyId, stage: Stage);
    /// Called with the terminal outcome of a company.
    fn company_finished(&self, run: &CompanyRun);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn company_started(&self, _company: &Company, _index: usize, _total: usize) {}
    fn stage(&self, _company: &CompanyId, _stage: Stage) {}
    fn company_finished(&self, _run: &CompanyRun) {}
    fn done(&self, _summary: &RunSummary) {}
}
