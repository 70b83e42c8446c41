//! Shared types, error model, and configuration for Regional Radar.
//!
//! This crate is the foundation depended on by all other radar crates.
//! It provides:
//! - [`RadarError`] - the unified error type
//! - Domain types ([`Company`], [`CompanyRecord`], [`ClassificationResult`], [`GeoPoint`])
//! - Configuration ([`RadarConfig`], runtime configs, config and roster loading)

pub mod config;
pub mod error;
pub mod roster;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AlertConfig, AlertsSection, FetchConfig, FetchSection, GeocoderSection, LlmSection,
    PipelineSection, RadarConfig, RadarSection, RegionBounds, ReportConfig, ReportSection,
    StorageSection, TierDescriptions, TopicConfig, TransportKind, config_dir, config_file_path,
    database_path, init_config, load_config, load_config_from, read_api_key, validate_api_key,
};
pub use error::{ErrorKind, RadarError, Result};
pub use roster::{load_roster, parse_roster};
pub use types::{
    AlertEvent, AlertRecordOutcome, ChangeKind, ClassificationResult, Company, CompanyId,
    CompanyRecord, DispatchOutcome, Fingerprint, GeoPoint, GeoPrecision, MaturityTier,
    PageContent, UpsertOutcome,
};
