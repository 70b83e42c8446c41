//! Report assembly from stored records.

use chrono::{DateTime, Utc};
use radar_shared::{CompanyId, CompanyRecord, RadarError, ReportConfig, Result};
use radar_storage::Storage;
use tracing::{debug, instrument};

use crate::score::{MaturityScore, maturity_score};
use crate::stats::RosterStats;

/// What to report on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Company(CompanyId),
    Roster,
}

/// One company as it appears in a report.
#[derive(Debug, Clone)]
pub struct CompanyEntry {
    pub record: CompanyRecord,
    pub score: MaturityScore,
}

/// A renderer-independent report.
#[derive(Debug, Clone)]
pub struct Report {
    pub title: String,
    pub region: String,
    pub topic: String,
    pub footer: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub selection: Selection,
    pub entries: Vec<CompanyEntry>,
    /// Present for roster reports.
    pub stats: Option<RosterStats>,
}

/// Builds reports from the store. Never writes.
pub struct ReportGenerator<'a> {
    storage: &'a Storage,
    config: ReportConfig,
}

impl<'a> ReportGenerator<'a> {
    pub fn new(storage: &'a Storage, config: ReportConfig) -> Self {
        Self { storage, config }
    }

    #[instrument(skip_all, fields(selection = ?selection))]
    pub async fn generate(&self, selection: Selection) -> Result<Report> {
        let (entries, stats) = match &selection {
            Selection::Company(id) => {
                let record = self.storage.get(id).await?.ok_or_else(|| {
                    RadarError::RenderFailed(format!("no record for company '{id}'"))
                })?;
                (vec![entry(record)?], None)
            }
            Selection::Roster => {
                let records = self.storage.list().await?;
                let stats = RosterStats::from_records(&records);
                let entries = records
                    .into_iter()
                    .map(entry)
                    .collect::<Result<Vec<_>>>()?;
                (entries, Some(stats))
            }
        };

        debug!(entries = entries.len(), "report assembled");

        Ok(Report {
            title: self.config.title.clone(),
            region: self.config.region.clone(),
            topic: self.config.topic.clone(),
            footer: self.config.footer.clone(),
            generated_at: Utc::now(),
            selection,
            entries,
            stats,
        })
    }
}

fn entry(record: CompanyRecord) -> Result<CompanyEntry> {
    let id = &record.company.id;
    if record.company.name.trim().is_empty() {
        return Err(RadarError::RenderFailed(format!(
            "company '{id}' has no name"
        )));
    }
    if record.classification.biography.trim().is_empty() {
        return Err(RadarError::RenderFailed(format!(
            "company '{id}' has no biography"
        )));
    }

    Ok(CompanyEntry {
        score: maturity_score(&record.classification),
        record,
    })
}
