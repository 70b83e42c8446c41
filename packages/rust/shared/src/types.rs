//! Core domain types for the radar pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{RadarError, Result};

// ---------------------------------------------------------------------------
// CompanyId
// ---------------------------------------------------------------------------

/// Identity key of a company. Exactly one persisted record exists per id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(String);

impl CompanyId {
    /// Use an explicit, region-scoped identifier supplied by the roster.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(RadarError::validation("company id must not be empty"));
        }
        Ok(Self(id))
    }

    /// Derive the identity from a canonical website URL: lowercase host
    /// without `www.`, plus the path without trailing slashes.
    pub fn from_website(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| RadarError::validation(format!("website has no host: {url}")))?
            .to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let path = url.path().trim_matches('/');

        if path.is_empty() {
            Ok(Self(host.to_string()))
        } else {
            Ok(Self(format!("{host}/{path}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Company
// ---------------------------------------------------------------------------

/// A roster entry. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub website: Url,
    /// Free-text postal address used for geocoding.
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

// ---------------------------------------------------------------------------
// PageContent
// ---------------------------------------------------------------------------

/// One fetched page. Lives only between the fetch and classify stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    /// Visible text with markup, scripts and page chrome removed.
    pub text: String,
    pub fetched_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageContent {
    pub fn ok(url: impl Into<String>, text: String) -> Self {
        Self {
            url: url.into(),
            text,
            fetched_at: Utc::now(),
            success: true,
            error: None,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            text: String::new(),
            fetched_at: Utc::now(),
            success: false,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// SHA-256 of the text a classification was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash the given text.
    pub fn of_text(text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Rehydrate a stored fingerprint.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// MaturityTier
// ---------------------------------------------------------------------------

/// How deeply a company has adopted the tracked topic. Ordered from lowest
/// to highest maturity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaturityTier {
    NoSignal,
    BuzzwordOnly,
    IntegrationInProgress,
    ProductionUse,
}

impl MaturityTier {
    pub const ALL: [MaturityTier; 4] = [
        Self::NoSignal,
        Self::BuzzwordOnly,
        Self::IntegrationInProgress,
        Self::ProductionUse,
    ];

    /// Canonical label used in storage and in the model contract.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSignal => "no_signal",
            Self::BuzzwordOnly => "buzzword_only",
            Self::IntegrationInProgress => "integration_in_progress",
            Self::ProductionUse => "production_use",
        }
    }

    /// Human-readable label for messages and documents.
    pub fn title(&self) -> &'static str {
        match self {
            Self::NoSignal => "No signal",
            Self::BuzzwordOnly => "Buzzword only",
            Self::IntegrationInProgress => "Integration in progress",
            Self::ProductionUse => "Production use",
        }
    }

    /// Parse a model- or user-supplied label. Accepts the canonical labels
    /// and the legacy labels of the earlier radar (`KEIN_KI`, `BUZZWORD`,
    /// `INTEGRATION`, `ECHTER_EINSATZ`). Anything else is rejected.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label
            .trim()
            .trim_matches('"')
            .to_ascii_lowercase()
            .replace([' ', '-'], "_");

        match normalized.as_str() {
            "no_signal" | "kein_ki" | "none" => Some(Self::NoSignal),
            "buzzword_only" | "buzzword" => Some(Self::BuzzwordOnly),
            "integration_in_progress" | "integration" => Some(Self::IntegrationInProgress),
            "production_use" | "echter_einsatz" | "production" => Some(Self::ProductionUse),
            _ => None,
        }
    }
}

impl fmt::Display for MaturityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaturityTier {
    type Err = RadarError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_label(s)
            .ok_or_else(|| RadarError::validation(format!("unknown maturity tier '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// ClassificationResult
// ---------------------------------------------------------------------------

/// Validated model verdict for one company and one fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub tier: MaturityTier,
    /// Why the model picked this tier.
    pub rationale: String,
    /// Model self-reported confidence, 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    /// Concrete uses of the topic found on the site.
    #[serde(default)]
    pub applications: Vec<String>,
    pub biography: String,
    /// Model identifier reported by the service.
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// GeoPoint
// ---------------------------------------------------------------------------

/// How precisely a geocoding hit locates the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoPrecision {
    Building,
    Street,
    Postcode,
    Locality,
    Region,
    Unknown,
}

impl GeoPrecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Street => "street",
            Self::Postcode => "postcode",
            Self::Locality => "locality",
            Self::Region => "region",
            Self::Unknown => "unknown",
        }
    }
}

/// Resolved map coordinates of a company address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub precision: GeoPrecision,
    /// The exact query string that was resolved.
    pub resolved_from: String,
    pub resolved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Why a record warrants a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Upgraded,
    Downgraded,
    Reanalyzed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Upgraded => "upgraded",
            Self::Downgraded => "downgraded",
            Self::Reanalyzed => "reanalyzed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "upgraded" => Some(Self::Upgraded),
            "downgraded" => Some(Self::Downgraded),
            "reanalyzed" => Some(Self::Reanalyzed),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of handing a message to the notification transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Failed { reason: String },
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => f.write_str("sent"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// A notification about one company at one fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// UUID v7.
    pub id: String,
    pub company_id: CompanyId,
    pub fingerprint: Fingerprint,
    pub kind: ChangeKind,
    pub subject: String,
    pub body: String,
    pub dispatched_at: DateTime<Utc>,
    pub outcome: DispatchOutcome,
}

// ---------------------------------------------------------------------------
// CompanyRecord
// ---------------------------------------------------------------------------

/// The persisted unit of truth for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub company: Company,
    pub classification: ClassificationResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,
    pub fingerprint: Fingerprint,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Successfully dispatched alerts, oldest first.
    #[serde(default)]
    pub alerts: Vec<AlertEvent>,
    /// Change kind still waiting for a successful dispatch at the current
    /// fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_alert: Option<ChangeKind>,
}

/// Outcome of a conditional upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// Stored fingerprint matched; nothing was written.
    Unchanged,
    /// The record was created or replaced. `prior` is the superseded
    /// classification, if any.
    Changed {
        prior: Option<ClassificationResult>,
    },
}

/// Outcome of the atomic alert check-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertRecordOutcome {
    Recorded,
    AlreadySent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_id_from_website() {
        let url = Url::parse("https://www.Acme-Robotics.de/").unwrap();
        assert_eq!(CompanyId::from_website(&url).unwrap().as_str(), "acme-robotics.de");

        let url = Url::parse("https://holding.example/de/tochter/").unwrap();
        assert_eq!(
            CompanyId::from_website(&url).unwrap().as_str(),
            "holding.example/de/tochter"
        );

        assert!(CompanyId::new("   ").is_err());
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        let fp = Fingerprint::of_text("hello world");
        assert_eq!(
            fp.as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(fp.short(), "b94d27b9934d");
        assert_ne!(fp, Fingerprint::of_text("hello world!"));
    }

    #[test]
    fn tier_labels() {
        assert_eq!(
            MaturityTier::from_label("production_use"),
            Some(MaturityTier::ProductionUse)
        );
        assert_eq!(
            MaturityTier::from_label("ECHTER_EINSATZ"),
            Some(MaturityTier::ProductionUse)
        );
        assert_eq!(
            MaturityTier::from_label(" Buzzword Only "),
            Some(MaturityTier::BuzzwordOnly)
        );
        assert_eq!(MaturityTier::from_label("UNBEKANNT"), None);
        assert_eq!(MaturityTier::from_label("maybe"), None);
        assert!("integration".parse::<MaturityTier>().is_ok());
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(MaturityTier::ProductionUse > MaturityTier::IntegrationInProgress);
        assert!(MaturityTier::IntegrationInProgress > MaturityTier::BuzzwordOnly);
        assert!(MaturityTier::BuzzwordOnly > MaturityTier::NoSignal);
    }

    #[test]
    fn dispatch_outcome_serialization() {
        let json = serde_json::to_string(&DispatchOutcome::Failed {
            reason: "smtp down".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"failed","reason":"smtp down"}"#);
        assert_eq!(
            DispatchOutcome::Failed {
                reason: "smtp down".into()
            }
            .to_string(),
            "failed: smtp down"
        );
    }

    #[test]
    fn change_kind_roundtrip_labels() {
        for kind in [
            ChangeKind::New,
            ChangeKind::Upgraded,
            ChangeKind::Downgraded,
            ChangeKind::Reanalyzed,
        ] {
            assert_eq!(ChangeKind::parse(kind.as_str()), Some(kind));
        }
    }
}
