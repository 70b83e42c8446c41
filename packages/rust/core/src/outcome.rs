//! Per-company outcomes and the run summary.

use chrono::{DateTime, Utc};
use radar_shared::{ChangeKind, CompanyId, ErrorKind, RadarError};
use serde::{Deserialize, Serialize};

/// Pipeline stage a company is in, or failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Classifying,
    Geocoding,
    Persisting,
    Alerting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Classifying => "classifying",
            Self::Geocoding => "geocoding",
            Self::Persisting => "persisting",
            Self::Alerting => "alerting",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of one company in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Record written and an alert delivered.
    Alerted { kind: ChangeKind },
    /// Record written, no alert delivered in this run.
    Updated,
    /// Content unchanged since the stored record.
    Unchanged,
    /// No record written.
    Failed {
        stage: Stage,
        kind: ErrorKind,
        message: String,
    },
    /// Not started because the run was cancelled.
    Skipped,
}

impl RunOutcome {
    pub(crate) fn failed(stage: Stage, error: &RadarError) -> Self {
        Self::Failed {
            stage,
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// What happened to one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRun {
    pub company_id: CompanyId,
    pub name: String,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    /// Non-fatal problems: skipped sub-pages, failed geocoding, undelivered
    /// alerts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Aggregate of one pipeline run, persisted in the run journal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub alerted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub companies: Vec<CompanyRun>,
}

impl RunSummary {
    pub(crate) fn new(run_id: String, started_at: DateTime<Utc>, companies: Vec<CompanyRun>) -> Self {
        let mut summary = Self {
            run_id,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            total: companies.len(),
            ..Self::default()
        };
        for run in &companies {
            match run.outcome {
                RunOutcome::Alerted { .. } => summary.alerted += 1,
                RunOutcome::Updated => summary.updated += 1,
                RunOutcome::Unchanged => summary.unchanged += 1,
                RunOutcome::Failed { .. } => summary.failed += 1,
                RunOutcome::Skipped => summary.skipped += 1,
            }
        }
        summary.cancelled = summary.skipped > 0;
        summary.companies = companies;
        summary
    }

    /// Succeeded companies: alerted, updated or unchanged.
    pub fn succeeded(&self) -> usize {
        self.alerted + self.updated + self.unchanged
    }

    pub fn failures(&self) -> impl Iterator<Item = &CompanyRun> {
        self.companies.iter().filter(|r| r.outcome.is_failure())
    }
}
