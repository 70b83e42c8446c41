//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use radar_core::{
    CompanyRun, Orchestrator, ProgressReporter, RunOutcome, RunSummary, Stage, backfill_geo,
};
use radar_geocoder::{Geocoder, GeocoderConfig, NominatimService};
use radar_report::{
    DocumentRenderer, HtmlRenderer, MarkdownRenderer, ReportGenerator, Selection, write_artifact,
};
use radar_shared::{
    Company, CompanyId, RadarConfig, ReportConfig, database_path, init_config, load_config,
    load_config_from, load_roster, validate_api_key,
};
use radar_storage::Storage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Regional Radar: track how companies in a region adopt a technology.
#[derive(Parser)]
#[command(
    name = "radar",
    version,
    about = "Classify a roster of company websites by technology maturity and alert on changes.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.radar/radar.toml).
    #[arg(long, global = true, env = "RADAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Report document format.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum ReportFormat {
    Markdown,
    Html,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the pipeline over a roster file.
    Run {
        /// Roster TOML file with `[[companies]]` entries.
        #[arg(short, long)]
        roster: PathBuf,

        /// Re-classify every company even if its website is unchanged.
        #[arg(long)]
        force: bool,

        /// Companies processed at the same time (overrides config).
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Geocode stored companies that have no location yet.
    Geocode,

    /// List stored companies.
    List,

    /// Show the stored record of one company as JSON.
    Show {
        /// Company identifier.
        id: String,
    },

    /// Render a report for one company or the whole roster.
    Report {
        /// Company identifier. Omit for a roster report.
        #[arg(long)]
        company: Option<String>,

        /// Output format.
        #[arg(short, long, default_value = "markdown")]
        format: ReportFormat,

        /// Output directory (defaults to the current directory).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show recent pipeline runs.
    Runs {
        /// Number of runs to show.
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "radar=info",
        1 => "radar=debug",
        _ => "radar=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            roster,
            force,
            concurrency,
        } => cmd_run(config_path, &roster, force, concurrency).await,
        Command::Geocode => cmd_geocode(config_path).await,
        Command::List => cmd_list(config_path).await,
        Command::Show { id } => cmd_show(config_path, &id).await,
        Command::Report {
            company,
            format,
            out,
        } => cmd_report(config_path, company.as_deref(), format, out.as_deref()).await,
        Command::Runs { limit } => cmd_runs(config_path, limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<RadarConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

async fn open_readonly(config: &RadarConfig) -> Result<Storage> {
    let db_path = database_path(config)?;
    Ok(Storage::open_readonly(&db_path).await?)
}

fn company_id(raw: &str) -> Result<CompanyId> {
    CompanyId::new(raw).map_err(|e| eyre!("invalid company id '{raw}': {e}"))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    roster_path: &Path,
    force: bool,
    concurrency: Option<usize>,
) -> Result<()> {
    // Validate API key before doing anything
    let config = resolve_config(config_path)?;
    validate_api_key(&config)?;

    let roster = load_roster(roster_path)?;
    if roster.is_empty() {
        return Err(eyre!("roster '{}' lists no companies", roster_path.display()));
    }

    let db_path = database_path(&config)?;
    let storage = Arc::new(Storage::open(&db_path).await?);

    let mut orchestrator = Orchestrator::from_config(&config, storage)?.with_force(force);
    if let Some(n) = concurrency {
        orchestrator = orchestrator.with_concurrency(n);
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing companies already started");
            on_ctrl_c.cancel();
        }
    });

    info!(
        roster = %roster_path.display(),
        companies = roster.len(),
        db = %db_path.display(),
        "starting pipeline"
    );

    let reporter = CliProgress::new(roster.len());
    let summary = orchestrator.run(&roster, &reporter, &cancel).await?;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "  Run {}: {} of {} companies ok",
        summary.run_id,
        summary.succeeded(),
        summary.total
    );
    println!("  Alerted:   {}", summary.alerted);
    println!("  Updated:   {}", summary.updated);
    println!("  Unchanged: {}", summary.unchanged);
    println!("  Failed:    {}", summary.failed);
    if summary.cancelled {
        println!("  Skipped:   {} (cancelled)", summary.skipped);
    }

    for run in &summary.companies {
        match &run.outcome {
            RunOutcome::Failed { stage, message, .. } => {
                println!("  ✗ {} [{}] {}", run.name, stage, message);
            }
            _ if !run.warnings.is_empty() => {
                for warning in &run.warnings {
                    println!("  ! {}: {}", run.name, warning);
                }
            }
            _ => {}
        }
    }
    println!();
}

async fn cmd_geocode(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open(&database_path(&config)?).await?;
    let geocoder = Geocoder::new(
        Arc::new(NominatimService::from_config(&config.geocoder)?),
        GeocoderConfig::from(&config),
    );

    let filled = backfill_geo(&storage, &geocoder).await?;
    println!("Geocoded {filled} record(s).");
    Ok(())
}

async fn cmd_list(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = open_readonly(&config).await?;
    let records = storage.list().await?;

    if records.is_empty() {
        println!("No companies stored yet. Run `radar run --roster <file>` first.");
        return Ok(());
    }

    println!(
        "{:<32} {:<28} {:<24} {:<4} {}",
        "ID", "NAME", "TIER", "GEO", "UPDATED"
    );
    for record in &records {
        println!(
            "{:<32} {:<28} {:<24} {:<4} {}",
            truncate(record.company.id.as_str(), 32),
            truncate(&record.company.name, 28),
            record.classification.tier.title(),
            if record.geo.is_some() { "yes" } else { "-" },
            record.last_updated.format("%Y-%m-%d %H:%M"),
        );
    }

    let stats = storage.stats().await?;
    println!();
    println!(
        "{} companies, {} geocoded, {} alerts sent, {} pending",
        stats.companies, stats.geocoded, stats.alerts_sent, stats.alerts_pending
    );
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

async fn cmd_show(config_path: Option<&Path>, id: &str) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = open_readonly(&config).await?;
    let id = company_id(id)?;

    let record = storage
        .get(&id)
        .await?
        .ok_or_else(|| eyre!("no record for company '{id}'"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cmd_report(
    config_path: Option<&Path>,
    company: Option<&str>,
    format: ReportFormat,
    out: Option<&Path>,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = open_readonly(&config).await?;

    let selection = match company {
        Some(id) => Selection::Company(company_id(id)?),
        None => Selection::Roster,
    };

    let generator = ReportGenerator::new(&storage, ReportConfig::from(&config));
    let report = generator.generate(selection).await?;

    let renderer: &dyn DocumentRenderer = match format {
        ReportFormat::Markdown => &MarkdownRenderer,
        ReportFormat::Html => &HtmlRenderer,
    };
    let artifact = renderer.render(&report)?;

    let dir = match out {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()
            .map_err(|e| eyre!("cannot determine working directory: {e}"))?,
    };
    let path = write_artifact(&artifact, &dir)?;

    println!("Report written to {}", path.display());
    Ok(())
}

async fn cmd_runs(config_path: Option<&Path>, limit: u32) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = open_readonly(&config).await?;
    let runs = storage.recent_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    for run in runs {
        let started = run.started_at.format("%Y-%m-%d %H:%M:%S");
        let Some(json) = run.summary_json else {
            println!("{started}  {}  (interrupted)", run.id);
            continue;
        };
        match serde_json::from_str::<RunSummary>(&json) {
            Ok(summary) => println!(
                "{started}  {}  alerted {}  updated {}  unchanged {}  failed {}{}",
                run.id,
                summary.alerted,
                summary.updated,
                summary.unchanged,
                summary.failed,
                if summary.cancelled { "  (cancelled)" } else { "" }
            ),
            Err(e) => {
                warn!(run = %run.id, error = %e, "unreadable run summary");
                println!("{started}  {}  (summary unreadable)", run.id);
            }
        }
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn company_started(&self, company: &Company, _index: usize, _total: usize) {
        self.bar.set_message(company.name.clone());
    }

    fn stage(&self, company: &CompanyId, stage: Stage) {
        self.bar.set_message(format!("{company}: {stage}"));
    }

    fn company_finished(&self, run: &CompanyRun) {
        self.bar.inc(1);
        if let RunOutcome::Alerted { kind } = &run.outcome {
            self.bar.println(format!("  ★ {} ({kind})", run.name));
        }
    }

    fn done(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}
