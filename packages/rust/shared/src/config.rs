//! Application configuration for Regional Radar.
//!
//! User config lives at `~/.radar/radar.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RadarError, Result};
use crate::types::MaturityTier;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "radar.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".radar";

// ---------------------------------------------------------------------------
// Config structs (matching radar.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RadarConfig {
    #[serde(default)]
    pub radar: RadarSection,

    /// The technology topic companies are classified against.
    #[serde(default)]
    pub topic: TopicConfig,

    #[serde(default)]
    pub fetch: FetchSection,

    #[serde(default)]
    pub llm: LlmSection,

    #[serde(default)]
    pub geocoder: GeocoderSection,

    #[serde(default)]
    pub alerts: AlertsSection,

    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub report: ReportSection,
}

/// `[radar]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarSection {
    #[serde(default = "default_radar_name")]
    pub name: String,
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for RadarSection {
    fn default() -> Self {
        Self {
            name: default_radar_name(),
            region: default_region(),
        }
    }
}

fn default_radar_name() -> String {
    "Regional Radar".into()
}
fn default_region() -> String {
    "Kreis Stormarn".into()
}

/// `[topic]` section. Passed explicitly to the classifier; never global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_topic_name")]
    pub name: String,

    /// Keywords counted in page text and used to rank sub-page links.
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// One description per tier, shown to the model.
    #[serde(default)]
    pub tiers: TierDescriptions,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            name: default_topic_name(),
            keywords: default_keywords(),
            tiers: TierDescriptions::default(),
        }
    }
}

fn default_topic_name() -> String {
    "Artificial Intelligence".into()
}
fn default_keywords() -> Vec<String> {
    [
        "Künstliche Intelligenz",
        "Machine Learning",
        "Deep Learning",
        "KI",
        "AI",
        "Computer Vision",
        "Predictive Analytics",
        "Large Language Model",
        "LLM",
        "ChatGPT",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[topic.tiers]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierDescriptions {
    #[serde(default = "default_production_use")]
    pub production_use: String,
    #[serde(default = "default_integration")]
    pub integration_in_progress: String,
    #[serde(default = "default_buzzword")]
    pub buzzword_only: String,
    #[serde(default = "default_no_signal")]
    pub no_signal: String,
}

impl TierDescriptions {
    pub fn describe(&self, tier: MaturityTier) -> &str {
        match tier {
            MaturityTier::ProductionUse => &self.production_use,
            MaturityTier::IntegrationInProgress => &self.integration_in_progress,
            MaturityTier::BuzzwordOnly => &self.buzzword_only,
            MaturityTier::NoSignal => &self.no_signal,
        }
    }
}

impl Default for TierDescriptions {
    fn default() -> Self {
        Self {
            production_use: default_production_use(),
            integration_in_progress: default_integration(),
            buzzword_only: default_buzzword(),
            no_signal: default_no_signal(),
        }
    }
}

fn default_production_use() -> String {
    "Own product, in-house development or demonstrable productive use".into()
}
fn default_integration() -> String {
    "Uses third-party tools of the topic (e.g. assistants, SaaS products)".into()
}
fn default_buzzword() -> String {
    "Mentions the topic without any concrete, verifiable use".into()
}
fn default_no_signal() -> String {
    "No reference to the topic found".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    /// Total pages per company, root included.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Link depth below the root page.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Politeness delay between sub-page requests.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Extra attempts for the root page on transient errors.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Cap on the combined text of one site.
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    #[serde(default = "default_fetch_user_agent")]
    pub user_agent: String,
    /// Substrings that make an internal link worth following first.
    #[serde(default = "default_link_hints")]
    pub link_hints: Vec<String>,
    /// Permit loopback and private-network targets.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            delay_ms: default_delay_ms(),
            retries: default_retries(),
            max_text_chars: default_max_text_chars(),
            user_agent: default_fetch_user_agent(),
            link_hints: default_link_hints(),
            allow_private_hosts: false,
        }
    }
}

fn default_fetch_timeout() -> u64 {
    15
}
fn default_max_pages() -> usize {
    3
}
fn default_max_depth() -> u32 {
    1
}
fn default_delay_ms() -> u64 {
    2000
}
fn default_retries() -> u32 {
    2
}
fn default_max_text_chars() -> usize {
    8000
}
fn default_fetch_user_agent() -> String {
    "RadarBot/1.0 (+regional company research)".into()
}
fn default_link_hints() -> Vec<String> {
    [
        "about", "ueber-uns", "uber-uns", "unternehmen", "produkt", "product", "loesung",
        "solution", "leistung", "service", "innovation", "technolog",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSection {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Page text beyond this many characters is not sent to the model.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Pause between attempts after a failed or unusable model reply.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_llm_base_url(),
            model: default_model(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_llm_timeout(),
            max_input_chars: default_max_input_chars(),
            temperature: default_temperature(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_max_input_chars() -> usize {
    4000
}
fn default_temperature() -> f32 {
    0.3
}
fn default_retry_delay_ms() -> u64 {
    1000
}

/// `[geocoder]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderSection {
    #[serde(default = "default_geocoder_base_url")]
    pub base_url: String,
    /// Minimum spacing between request starts, across the whole run.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_geocoder_timeout")]
    pub timeout_secs: u64,
    /// ISO country codes passed to the service, comma separated.
    #[serde(default = "default_country_codes")]
    pub country_codes: Option<String>,
    /// Appended to queries that do not already name the country.
    #[serde(default = "default_country_suffix")]
    pub country_suffix: Option<String>,
    #[serde(default = "default_geocoder_user_agent")]
    pub user_agent: String,
    /// Hits outside this box are logged as suspicious.
    #[serde(default)]
    pub region_bounds: Option<RegionBounds>,
}

impl Default for GeocoderSection {
    fn default() -> Self {
        Self {
            base_url: default_geocoder_base_url(),
            min_interval_ms: default_min_interval_ms(),
            timeout_secs: default_geocoder_timeout(),
            country_codes: default_country_codes(),
            country_suffix: default_country_suffix(),
            user_agent: default_geocoder_user_agent(),
            region_bounds: None,
        }
    }
}

/// Latitude/longitude box of the monitored region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl RegionBounds {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

fn default_geocoder_base_url() -> String {
    "https://nominatim.openstreetmap.org".into()
}
fn default_min_interval_ms() -> u64 {
    1000
}
fn default_geocoder_timeout() -> u64 {
    10
}
fn default_country_codes() -> Option<String> {
    Some("de".into())
}
fn default_country_suffix() -> Option<String> {
    Some("Deutschland".into())
}
fn default_geocoder_user_agent() -> String {
    "RegionalRadar/1.0".into()
}

/// `[alerts]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub recipient: String,
    /// Also notify when content changed but the tier did not.
    #[serde(default)]
    pub notify_reanalysis: bool,
    #[serde(default = "default_min_tier")]
    pub min_tier: MaturityTier,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_alert_timeout")]
    pub timeout_secs: u64,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            recipient: String::new(),
            notify_reanalysis: false,
            min_tier: default_min_tier(),
            transport: TransportKind::default(),
            webhook_url: None,
            timeout_secs: default_alert_timeout(),
        }
    }
}

/// Which notification transport the CLI wires up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Log,
    Webhook,
}

fn default_true() -> bool {
    true
}
fn default_min_tier() -> MaturityTier {
    MaturityTier::IntegrationInProgress
}
fn default_alert_timeout() -> u64 {
    10
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Companies processed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Records older than this are re-classified even when unchanged.
    /// `0` disables.
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: u32,
    /// Records whose confidence is below this percentage are re-classified
    /// even when unchanged. `0` disables.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            stale_after_days: default_stale_after_days(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}
fn default_stale_after_days() -> u32 {
    30
}
fn default_min_confidence() -> u8 {
    50
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    /// Database file. Defaults to `~/.radar/radar.db`.
    #[serde(default)]
    pub db_path: Option<String>,
}

/// `[report]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSection {
    /// Document title; defaults to the radar name.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config file + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_pages: usize,
    pub max_depth: u32,
    pub delay_ms: u64,
    pub retries: u32,
    pub max_text_chars: usize,
    pub user_agent: String,
    /// Link hints plus topic keywords, lowercased.
    pub link_hints: Vec<String>,
    /// Topic keywords counted in the page text.
    pub keywords: Vec<String>,
    pub allow_private_hosts: bool,
}

impl From<&RadarConfig> for FetchConfig {
    fn from(config: &RadarConfig) -> Self {
        let mut link_hints: Vec<String> = config
            .fetch
            .link_hints
            .iter()
            .chain(config.topic.keywords.iter())
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        link_hints.dedup();

        Self {
            timeout_secs: config.fetch.timeout_secs,
            max_pages: config.fetch.max_pages.max(1),
            max_depth: config.fetch.max_depth,
            delay_ms: config.fetch.delay_ms,
            retries: config.fetch.retries,
            max_text_chars: config.fetch.max_text_chars,
            user_agent: config.fetch.user_agent.clone(),
            link_hints,
            keywords: config.topic.keywords.clone(),
            allow_private_hosts: config.fetch.allow_private_hosts,
        }
    }
}

/// Runtime alert policy.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub enabled: bool,
    pub recipient: String,
    pub notify_reanalysis: bool,
    pub min_tier: MaturityTier,
    /// Used in subjects, e.g. "Stormarn KI-Radar".
    pub radar_name: String,
    pub topic: String,
}

impl From<&RadarConfig> for AlertConfig {
    fn from(config: &RadarConfig) -> Self {
        Self {
            enabled: config.alerts.enabled,
            recipient: config.alerts.recipient.clone(),
            notify_reanalysis: config.alerts.notify_reanalysis,
            min_tier: config.alerts.min_tier,
            radar_name: config.radar.name.clone(),
            topic: config.topic.name.clone(),
        }
    }
}

/// Runtime report settings.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub title: String,
    pub region: String,
    pub topic: String,
    pub footer: Option<String>,
}

impl From<&RadarConfig> for ReportConfig {
    fn from(config: &RadarConfig) -> Self {
        Self {
            title: config
                .report
                .title
                .clone()
                .unwrap_or_else(|| config.radar.name.clone()),
            region: config.radar.region.clone(),
            topic: config.topic.name.clone(),
            footer: config.report.footer.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.radar/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| RadarError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.radar/radar.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the database path: the configured one, else `~/.radar/radar.db`.
pub fn database_path(config: &RadarConfig) -> Result<PathBuf> {
    match &config.storage.db_path {
        Some(path) => Ok(PathBuf::from(path)),
        None => Ok(config_dir()?.join("radar.db")),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<RadarConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(RadarConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<RadarConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RadarError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RadarError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RadarError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = RadarConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RadarError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RadarError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the model API key from the env var named in the config.
pub fn read_api_key(config: &LlmSection) -> Result<String> {
    let var_name = &config.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(RadarError::config(format!(
            "model API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that the model API key env var is set and non-empty.
pub fn validate_api_key(config: &RadarConfig) -> Result<()> {
    read_api_key(&config.llm).map(|_| ())
}
