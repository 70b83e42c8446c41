//! 1-10 maturity score derived from a classification.

use radar_shared::{ClassificationResult, MaturityTier};
use serde::Serialize;

/// Coarse label for a [`MaturityScore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaturityLevel {
    Pioneer,
    Active,
    Beginner,
    Observer,
    None,
}

impl MaturityLevel {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Pioneer => "Pioneer",
            Self::Active => "Active",
            Self::Beginner => "Beginner",
            Self::Observer => "Observer",
            Self::None => "No adoption",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaturityScore {
    pub score: u8,
    pub level: MaturityLevel,
}

fn tier_base(tier: MaturityTier) -> i32 {
    match tier {
        MaturityTier::ProductionUse => 8,
        MaturityTier::IntegrationInProgress => 5,
        MaturityTier::BuzzwordOnly => 2,
        MaturityTier::NoSignal => 0,
    }
}

fn confidence_bonus(confidence: Option<u8>) -> i32 {
    match confidence {
        Some(90..=100) => 2,
        Some(70..=89) => 1,
        Some(50..=69) | None => 0,
        Some(_) => -1,
    }
}

/// Score a classification: tier base, confidence bonus, up to two points for
/// named applications, shifted by one and clamped to 1-10.
pub fn maturity_score(classification: &ClassificationResult) -> MaturityScore {
    let applications = classification
        .applications
        .iter()
        .filter(|a| !a.trim().is_empty())
        .count()
        .min(2) as i32;

    let raw = tier_base(classification.tier) + confidence_bonus(classification.confidence) + applications;
    let score = (raw + 1).clamp(1, 10) as u8;

    let level = match score {
        8.. => MaturityLevel::Pioneer,
        6..=7 => MaturityLevel::Active,
        4..=5 => MaturityLevel::Beginner,
        2..=3 => MaturityLevel::Observer,
        _ => MaturityLevel::None,
    };

    MaturityScore { score, level }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn classification(tier: MaturityTier, confidence: Option<u8>, apps: &[&str]) -> ClassificationResult {
        ClassificationResult {
            tier,
            rationale: String::new(),
            confidence,
            applications: apps.iter().map(|s| s.to_string()).collect(),
            biography: String::new(),
            model: String::new(),
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn production_use_with_high_confidence_caps_at_ten() {
        let c = classification(MaturityTier::ProductionUse, Some(95), &["a", "b", "c"]);
        assert_eq!(
            maturity_score(&c),
            MaturityScore { score: 10, level: MaturityLevel::Pioneer }
        );
    }

    #[test]
    fn integration_scores_active() {
        let c = classification(MaturityTier::IntegrationInProgress, Some(75), &[]);
        assert_eq!(maturity_score(&c).score, 7);
        assert_eq!(maturity_score(&c).level, MaturityLevel::Active);
    }

    #[test]
    fn low_confidence_no_signal_floors_at_one() {
        let c = classification(MaturityTier::NoSignal, Some(20), &[]);
        assert_eq!(
            maturity_score(&c),
            MaturityScore { score: 1, level: MaturityLevel::None }
        );
    }

    #[test]
    fn blank_applications_do_not_count() {
        let c = classification(MaturityTier::BuzzwordOnly, None, &[" ", ""]);
        assert_eq!(maturity_score(&c).score, 3);
        assert_eq!(maturity_score(&c).level, MaturityLevel::Observer);
    }
}
