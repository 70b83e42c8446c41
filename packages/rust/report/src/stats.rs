//! Roster-wide summary figures.

use std::collections::BTreeMap;

use radar_shared::{CompanyRecord, MaturityTier};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierShare {
    pub count: usize,
    /// Fraction of all companies, 0.0-1.0.
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterStats {
    pub total: usize,
    pub by_tier: BTreeMap<MaturityTier, TierShare>,
    /// Companies in production use or integration, as a fraction of all.
    pub adoption_rate: f64,
    pub geocoded: usize,
    pub geocoded_share: f64,
}

impl RosterStats {
    pub fn from_records(records: &[CompanyRecord]) -> Self {
        let total = records.len();
        let share = |n: usize| if total == 0 { 0.0 } else { n as f64 / total as f64 };

        let mut counts: BTreeMap<MaturityTier, usize> =
            MaturityTier::ALL.iter().map(|t| (*t, 0)).collect();
        for record in records {
            *counts.entry(record.classification.tier).or_default() += 1;
        }

        let adopting = counts[&MaturityTier::ProductionUse]
            + counts[&MaturityTier::IntegrationInProgress];
        let geocoded = records.iter().filter(|r| r.geo.is_some()).count();

        Self {
            total,
            by_tier: counts
                .into_iter()
                .map(|(tier, count)| {
                    (
                        tier,
                        TierShare {
                            count,
                            share: share(count),
                        },
                    )
                })
                .collect(),
            adoption_rate: share(adopting),
            geocoded,
            geocoded_share: share(geocoded),
        }
    }
}

/// Format a 0.0-1.0 fraction as a whole percentage.
pub(crate) fn percent(fraction: f64) -> String {
    format!("{:.0}%", fraction * 100.0)
}
