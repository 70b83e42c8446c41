//! Roster pipeline: fetch → classify → geocode → persist → alert.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use radar_alerts::{
    AlertDispatcher, Delivery, NotificationTransport, decide, render, transport_from_config,
};
use radar_classifier::{Classifier, ClassifierConfig, OpenAiCompatibleService};
use radar_fetcher::{Fetcher, PageSource};
use radar_geocoder::{Geocoder, GeocoderConfig, NominatimService};
use radar_shared::{
    AlertConfig, Company, CompanyRecord, FetchConfig, GeoPoint, RadarConfig, RadarError,
    Result, UpsertOutcome,
};
use radar_storage::{RecordUpdate, Storage};

use crate::outcome::{CompanyRun, RunOutcome, RunSummary, Stage};
use crate::progress::ProgressReporter;

/// Run-level knobs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Companies processed at the same time.
    pub concurrency: usize,
    /// Re-classify unchanged records whose verdict is older than this.
    pub stale_after: Option<TimeDelta>,
    /// Re-classify unchanged records whose model confidence is below this.
    pub min_confidence: Option<u8>,
    /// Re-classify and rewrite every record.
    pub force: bool,
    pub alerts: AlertConfig,
}

impl From<&RadarConfig> for PipelineSettings {
    fn from(config: &RadarConfig) -> Self {
        let days = config.pipeline.stale_after_days;
        let min_confidence = config.pipeline.min_confidence;
        Self {
            concurrency: config.pipeline.concurrency.max(1),
            stale_after: (days > 0).then(|| TimeDelta::days(i64::from(days))),
            min_confidence: (min_confidence > 0).then_some(min_confidence),
            force: false,
            alerts: AlertConfig::from(config),
        }
    }
}

/// Drives every company of a roster through the pipeline.
///
/// One company's failure is recorded in its [`CompanyRun`] and never stops
/// the others. All collaborators are injected, so a run touches no global
/// state.
pub struct Orchestrator {
    source: Arc<dyn PageSource>,
    classifier: Classifier,
    geocoder: Geocoder,
    dispatcher: AlertDispatcher,
    storage: Arc<Storage>,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn PageSource>,
        classifier: Classifier,
        geocoder: Geocoder,
        dispatcher: AlertDispatcher,
        storage: Arc<Storage>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            classifier,
            geocoder,
            dispatcher,
            storage,
            settings,
        }
    }

    /// Wire up the HTTP-backed collaborators described by `config`.
    pub fn from_config(config: &RadarConfig, storage: Arc<Storage>) -> Result<Self> {
        let source = Arc::new(Fetcher::new(FetchConfig::from(config))?);
        let model = Arc::new(OpenAiCompatibleService::from_config(&config.llm)?);
        let classifier = Classifier::new(model, ClassifierConfig::from(config));
        let geocoder = Geocoder::new(
            Arc::new(NominatimService::from_config(&config.geocoder)?),
            GeocoderConfig::from(config),
        );
        let transport: Arc<dyn NotificationTransport> =
            Arc::from(transport_from_config(&config.alerts)?);
        let dispatcher = AlertDispatcher::new(transport, config.alerts.recipient.clone());

        Ok(Self::new(
            source,
            classifier,
            geocoder,
            dispatcher,
            storage,
            PipelineSettings::from(config),
        ))
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.settings.force = force;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.settings.concurrency = concurrency.max(1);
        self
    }

    /// Process `roster` and journal the run.
    ///
    /// Companies not yet started when `cancel` fires are reported as
    /// [`RunOutcome::Skipped`]; started ones run to completion.
    #[instrument(skip_all, fields(companies = roster.len()))]
    pub async fn run(
        &self,
        roster: &[Company],
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = self.storage.insert_run().await?;
        let total = roster.len();

        info!(
            %run_id,
            total,
            concurrency = self.settings.concurrency,
            force = self.settings.force,
            "starting run"
        );

        let mut runs: Vec<(usize, CompanyRun)> = stream::iter(roster.iter().enumerate())
            .map(|(index, company)| async move {
                if cancel.is_cancelled() {
                    return (
                        index,
                        CompanyRun {
                            company_id: company.id.clone(),
                            name: company.name.clone(),
                            outcome: RunOutcome::Skipped,
                            warnings: Vec::new(),
                        },
                    );
                }
                progress.company_started(company, index, total);
                let run = self.process(company, progress).await;
                progress.company_finished(&run);
                (index, run)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        runs.sort_by_key(|(index, _)| *index);
        let summary = RunSummary::new(
            run_id.clone(),
            started_at,
            runs.into_iter().map(|(_, run)| run).collect(),
        );

        let json = serde_json::to_string(&summary)
            .map_err(|e| RadarError::Storage(format!("failed to serialize run summary: {e}")))?;
        self.storage.finish_run(&run_id, &json).await?;

        for failure in summary.failures() {
            if let RunOutcome::Failed { stage, message, .. } = &failure.outcome {
                warn!(company = %failure.company_id, %stage, error = %message, "company failed");
            }
        }
        info!(
            %run_id,
            alerted = summary.alerted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            failed = summary.failed,
            skipped = summary.skipped,
            "run complete"
        );

        progress.done(&summary);
        Ok(summary)
    }

    #[instrument(skip_all, fields(company = %company.id))]
    async fn process(&self, company: &Company, progress: &dyn ProgressReporter) -> CompanyRun {
        let mut warnings = Vec::new();
        let outcome = self.advance(company, progress, &mut warnings).await;
        CompanyRun {
            company_id: company.id.clone(),
            name: company.name.clone(),
            outcome,
            warnings,
        }
    }

    async fn advance(
        &self,
        company: &Company,
        progress: &dyn ProgressReporter,
        warnings: &mut Vec<String>,
    ) -> RunOutcome {
        // --- Fetching ---
        progress.stage(&company.id, Stage::Fetching);
        let snapshot = match self.source.fetch_site(&company.website).await {
            Ok(snapshot) => snapshot,
            Err(e) => return RunOutcome::failed(Stage::Fetching, &e),
        };
        warnings.extend(snapshot.partial_failures().iter().map(ToString::to_string));
        // Only the text the model gets to see decides whether anything changed.
        let fingerprint = self.classifier.fingerprint(&snapshot.text);

        let stored = match self.storage.get(&company.id).await {
            Ok(stored) => stored,
            Err(e) => return RunOutcome::failed(Stage::Persisting, &e),
        };
        let reanalyze = self.settings.force
            || stored
                .as_ref()
                .is_some_and(|r| self.is_stale(r) || self.is_uncertain(r));

        if let Some(record) = &stored {
            if record.fingerprint == fingerprint && !reanalyze {
                debug!(fingerprint = fingerprint.short(), "content unchanged");
                return self.revisit(company, record, progress, warnings).await;
            }
        }

        // --- Classifying ---
        progress.stage(&company.id, Stage::Classifying);
        let classification = match self
            .classifier
            .classify(company, &snapshot.text, &snapshot.keyword_hits)
            .await
        {
            Ok(classification) => classification,
            Err(e) => return RunOutcome::failed(Stage::Classifying, &e),
        };

        // --- Geocoding ---
        // A stored location stays valid while the address is the same.
        let keep_geo = stored
            .as_ref()
            .is_some_and(|r| r.geo.is_some() && r.company.address == company.address);
        let geo = if keep_geo {
            None
        } else {
            self.locate(company, progress, warnings).await
        };

        // --- Persisting ---
        progress.stage(&company.id, Stage::Persisting);
        let update = RecordUpdate {
            company: company.clone(),
            classification: Some(classification.clone()),
            geo,
            fingerprint: fingerprint.clone(),
            force: reanalyze,
        };
        let prior = match self.persist(update).await {
            Ok(UpsertOutcome::Changed { prior }) => prior,
            Ok(UpsertOutcome::Unchanged) => return RunOutcome::Unchanged,
            Err(e) => return RunOutcome::failed(Stage::Persisting, &e),
        };

        // --- Alerting ---
        let Some(kind) = decide(prior.as_ref(), &classification, &self.settings.alerts) else {
            return RunOutcome::Updated;
        };
        progress.stage(&company.id, Stage::Alerting);
        let message = render(
            kind,
            company,
            prior.as_ref(),
            &classification,
            &self.settings.alerts,
        );
        match self
            .dispatcher
            .dispatch(&self.storage, &company.id, &fingerprint, kind, &message)
            .await
        {
            Ok(Delivery::Sent(_)) => RunOutcome::Alerted { kind },
            Ok(Delivery::AlreadySent) => RunOutcome::Updated,
            Ok(Delivery::Failed(event)) => {
                warnings.push(format!("alert pending, delivery {}", event.outcome));
                RunOutcome::Updated
            }
            Err(e) => {
                warnings.push(format!("alert pending: {e}"));
                RunOutcome::Updated
            }
        }
    }

    /// Unchanged content: take over edited roster fields, fill a missing
    /// location and retry an undelivered alert, without calling the model.
    async fn revisit(
        &self,
        company: &Company,
        record: &CompanyRecord,
        progress: &dyn ProgressReporter,
        warnings: &mut Vec<String>,
    ) -> RunOutcome {
        let mut outcome = RunOutcome::Unchanged;
        let moved = record.company.address != company.address;

        if record.company != *company {
            let relocated = if moved {
                self.locate(company, progress, warnings).await
            } else {
                None
            };
            progress.stage(&company.id, Stage::Persisting);
            match self.storage.refresh_company(company, relocated.as_ref()).await {
                Ok(true) => {
                    debug!(moved, "roster entry changed");
                    outcome = RunOutcome::Updated;
                }
                Ok(false) => {}
                Err(e) => return RunOutcome::failed(Stage::Persisting, &e),
            }
        }

        if !moved && record.geo.is_none() {
            if let Some(point) = self.locate(company, progress, warnings).await {
                if let Err(e) = self.storage.fill_geo_point(&company.id, &point).await {
                    warnings.push(e.to_string());
                }
            }
        }

        match self.storage.pending_alert(&company.id).await {
            Ok(Some(pending)) => {
                progress.stage(&company.id, Stage::Alerting);
                match self.dispatcher.retry(&self.storage, &pending).await {
                    Ok(Delivery::Sent(_)) => return RunOutcome::Alerted { kind: pending.kind },
                    Ok(Delivery::AlreadySent) => {}
                    Ok(Delivery::Failed(event)) => {
                        warnings.push(format!("alert still pending, delivery {}", event.outcome))
                    }
                    Err(e) => warnings.push(format!("alert still pending: {e}")),
                }
            }
            Ok(None) => {}
            Err(e) => warnings.push(e.to_string()),
        }

        outcome
    }

    /// Geocode the roster address. A failure becomes a warning.
    async fn locate(
        &self,
        company: &Company,
        progress: &dyn ProgressReporter,
        warnings: &mut Vec<String>,
    ) -> Option<GeoPoint> {
        progress.stage(&company.id, Stage::Geocoding);
        match self.geocoder.geocode(&company.address).await {
            Ok(point) => Some(point),
            Err(e) => {
                warn!(error = %e, "continuing without location");
                warnings.push(e.to_string());
                None
            }
        }
    }

    /// Upsert, retrying once if another writer got in between.
    async fn persist(&self, update: RecordUpdate) -> Result<UpsertOutcome> {
        match self.storage.upsert(update.clone()).await {
            Err(RadarError::PersistConflict { identity }) => {
                debug!(%identity, "persist conflict, retrying once");
                self.storage.upsert(update).await
            }
            other => other,
        }
    }

    fn is_stale(&self, record: &CompanyRecord) -> bool {
        self.settings.stale_after.is_some_and(|max_age| {
            Utc::now() - record.classification.generated_at > max_age
        })
    }

    /// A verdict without a confidence is taken as is.
    fn is_uncertain(&self, record: &CompanyRecord) -> bool {
        let confidence = record.classification.confidence;
        self.settings
            .min_confidence
            .is_some_and(|min| confidence.is_some_and(|c| c < min))
    }
}

/// Geocode stored records that have no location yet. Returns how many were
/// filled.
#[instrument(skip_all)]
pub async fn backfill_geo(storage: &Storage, geocoder: &Geocoder) -> Result<usize> {
    let missing = storage.list_missing_geo().await?;
    info!(count = missing.len(), "records without location");

    let mut filled = 0;
    for record in missing {
        match geocoder.geocode(&record.company.address).await {
            Ok(point) => {
                if storage.fill_geo_point(&record.company.id, &point).await? {
                    filled += 1;
                }
            }
            Err(e) => warn!(company = %record.company.id, error = %e, "geocoding failed"),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use radar_classifier::{ModelRequest, ModelResponse, ModelService};
    use radar_fetcher::SiteSnapshot;
    use radar_geocoder::{GeoHit, GeocodingService};
    use radar_shared::{
        ChangeKind, CompanyId, ErrorKind, GeoPrecision, MaturityTier, PageContent, TopicConfig,
    };
    use url::Url;
    use uuid::Uuid;

    use super::*;
    use crate::progress::SilentProgress;

    /// Serves site text per host; hosts in `down` fail like an unreachable
    /// root page.
    #[derive(Default)]
    struct FakeWeb {
        sites: Mutex<HashMap<String, String>>,
        down: Mutex<HashSet<String>>,
    }

    impl FakeWeb {
        fn set(&self, host: &str, text: &str) {
            self.sites
                .lock()
                .unwrap()
                .insert(host.to_string(), text.to_string());
        }

        fn take_down(&self, host: &str) {
            self.down.lock().unwrap().insert(host.to_string());
        }
    }

    #[async_trait]
    impl PageSource for FakeWeb {
        async fn fetch_site(&self, root: &Url) -> Result<SiteSnapshot> {
            let host = root.host_str().unwrap_or_default().to_string();
            if self.down.lock().unwrap().contains(&host) {
                return Err(RadarError::fetch_failed(root.as_str(), "connection refused"));
            }
            let text = self
                .sites
                .lock()
                .unwrap()
                .get(&host)
                .cloned()
                .unwrap_or_else(|| format!("{host} has a plain website"));
            Ok(SiteSnapshot {
                root: root.clone(),
                title: None,
                pages: vec![PageContent::ok(root.as_str(), text.clone())],
                keyword_hits: Vec::new(),
                text,
            })
        }
    }

    /// Picks the tier from marker words in the text.
    #[derive(Default)]
    struct KeywordModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelService for KeywordModel {
        async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let confidence = if request.text.contains("maybe") { 30 } else { 80 };
            let tier = if request.text.contains("production") {
                "production_use"
            } else if request.text.contains("integration") {
                "integration_in_progress"
            } else if request.text.contains("garbage") {
                "UNBEKANNT"
            } else {
                "no_signal"
            };
            Ok(ModelResponse {
                tier_label: tier.into(),
                rationale: "marker words".into(),
                biography: format!("{} is a regional company.", request.company_name),
                confidence: Some(confidence),
                applications: Vec::new(),
                model: "keyword".into(),
            })
        }
    }

    /// Resolves everything except addresses mentioning "Nowhere".
    struct FakeGeo;

    #[async_trait]
    impl GeocodingService for FakeGeo {
        async fn lookup(&self, query: &str) -> Result<Option<GeoHit>> {
            if query.contains("Nowhere") {
                return Ok(None);
            }
            Ok(Some(GeoHit {
                latitude: 53.67,
                longitude: 10.23,
                precision: GeoPrecision::Street,
                display_name: None,
            }))
        }
    }

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<String>>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl NotificationTransport for Outbox {
        async fn send(&self, _recipient: &str, subject: &str, _body: &str) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RadarError::DispatchFailed("mail server down".into()));
            }
            self.sent.lock().unwrap().push(subject.to_string());
            Ok(())
        }
    }

    struct Harness {
        web: Arc<FakeWeb>,
        model: Arc<KeywordModel>,
        outbox: Arc<Outbox>,
        storage: Arc<Storage>,
    }

    impl Harness {
        async fn new() -> Self {
            let path = std::env::temp_dir().join(format!("radar_core_{}.db", Uuid::now_v7()));
            Self {
                web: Arc::new(FakeWeb::default()),
                model: Arc::new(KeywordModel::default()),
                outbox: Arc::new(Outbox::default()),
                storage: Arc::new(Storage::open(&path).await.unwrap()),
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            self.orchestrator_with(|_| {})
        }

        fn orchestrator_with(&self, tweak: impl FnOnce(&mut PipelineSettings)) -> Orchestrator {
            let classifier = Classifier::new(
                self.model.clone(),
                ClassifierConfig {
                    max_attempts: 2,
                    max_input_chars: 4000,
                    retry_delay: Duration::ZERO,
                    region: "Kreis Stormarn".into(),
                    topic: TopicConfig::default(),
                },
            );
            let geocoder = Geocoder::new(
                Arc::new(FakeGeo),
                GeocoderConfig {
                    min_interval: Duration::ZERO,
                    country_suffix: None,
                    region_bounds: None,
                },
            );
            let dispatcher = AlertDispatcher::new(self.outbox.clone(), "team@example.org");
            let mut settings = PipelineSettings {
                concurrency: 2,
                stale_after: None,
                min_confidence: None,
                force: false,
                alerts: AlertConfig {
                    enabled: true,
                    recipient: "team@example.org".into(),
                    notify_reanalysis: false,
                    min_tier: MaturityTier::IntegrationInProgress,
                    radar_name: "Test Radar".into(),
                    topic: "AI".into(),
                },
            };
            tweak(&mut settings);
            Orchestrator::new(
                self.web.clone(),
                classifier,
                geocoder,
                dispatcher,
                self.storage.clone(),
                settings,
            )
        }

        async fn run(&self, roster: &[Company]) -> RunSummary {
            Self::run_with(self.orchestrator(), roster).await
        }

        async fn run_with(orchestrator: Orchestrator, roster: &[Company]) -> RunSummary {
            orchestrator
                .run(roster, &SilentProgress, &CancellationToken::new())
                .await
                .unwrap()
        }
    }

    fn company(host: &str) -> Company {
        Company {
            id: CompanyId::new(host).unwrap(),
            name: format!("{host} GmbH"),
            website: Url::parse(&format!("https://{host}/")).unwrap(),
            address: "Hauptstraße 1, 22926 Ahrensburg".into(),
            industry: None,
            region: None,
        }
    }

    #[test]
    fn settings_from_config() {
        let mut config = RadarConfig::default();
        let settings = PipelineSettings::from(&config);
        assert_eq!(settings.min_confidence, Some(50));
        assert_eq!(settings.stale_after, Some(TimeDelta::days(30)));

        config.pipeline.min_confidence = 0;
        config.pipeline.stale_after_days = 0;
        let settings = PipelineSettings::from(&config);
        assert!(settings.min_confidence.is_none());
        assert!(settings.stale_after.is_none());
    }

    #[tokio::test]
    async fn second_run_over_same_content_is_unchanged() {
        let h = Harness::new().await;
        h.web.set("acme.example", "acme runs production vision models");
        let roster = [company("acme.example")];

        let first = h.run(&roster).await;
        assert_eq!(first.alerted, 1);

        let before = h.storage.get(&roster[0].id).await.unwrap().unwrap();
        let second = h.run(&roster).await;
        let after = h.storage.get(&roster[0].id).await.unwrap().unwrap();

        assert_eq!(second.unchanged, 1);
        assert_eq!(second.alerted, 0);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.outbox.sent.lock().unwrap().len(), 1);
        assert_eq!(before.last_updated, after.last_updated);
        assert_eq!(before.fingerprint, after.fingerprint);
    }

    #[tokio::test]
    async fn changed_content_is_reclassified() {
        let h = Harness::new().await;
        h.web.set("acme.example", "acme sells furniture");
        let roster = [company("acme.example")];
        h.run(&roster).await;
        let before = h.storage.get(&roster[0].id).await.unwrap().unwrap();

        h.web.set("acme.example", "acme sells furniture and a new catalogue");
        let summary = h.run(&roster).await;
        let after = h.storage.get(&roster[0].id).await.unwrap().unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 2);
        assert_ne!(before.fingerprint, after.fingerprint);
        assert!(after.last_updated >= before.last_updated);
    }

    #[tokio::test]
    async fn text_beyond_the_model_input_does_not_trigger_reclassification() {
        let h = Harness::new().await;
        let body = "acme sells furniture and kitchens. ".repeat(200);
        h.web.set("acme.example", &format!("{body} footer 2025"));
        let roster = [company("acme.example")];
        h.run(&roster).await;

        h.web.set("acme.example", &format!("{body} footer 2026"));
        let summary = h.run(&roster).await;

        assert_eq!(summary.unchanged, 1);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn edited_roster_entry_is_stored_without_reclassification() {
        let h = Harness::new().await;
        h.web.set("acme.example", "acme runs production vision models");
        let mut firm = company("acme.example");
        h.run(&[firm.clone()]).await;
        let before = h.storage.get(&firm.id).await.unwrap().unwrap();
        assert!(before.geo.is_some());

        firm.name = "Acme Vision GmbH".into();
        firm.address = "Nowhere 5, 22941 Bargteheide".into();
        let summary = h.run(&[firm.clone()]).await;

        assert_eq!(summary.companies[0].outcome, RunOutcome::Updated);
        assert_eq!(summary.companies[0].warnings.len(), 1);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 1);
        let after = h.storage.get(&firm.id).await.unwrap().unwrap();
        assert_eq!(after.company, firm);
        assert!(after.geo.is_none());
        assert_eq!(after.classification, before.classification);
        assert_eq!(h.outbox.sent.lock().unwrap().len(), 1);

        // back to a resolvable address
        firm.address = "Rathausplatz 2, 22941 Bargteheide".into();
        h.run(&[firm.clone()]).await;
        let located = h.storage.get(&firm.id).await.unwrap().unwrap();
        assert_eq!(
            located.geo.map(|g| g.resolved_from),
            Some(firm.address.clone())
        );
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_record_is_reclassified_without_duplicate_alert() {
        let h = Harness::new().await;
        h.web.set("acme.example", "acme runs production vision models");
        let roster = [company("acme.example")];
        let first = h.run(&roster).await;
        assert_eq!(first.alerted, 1);
        let before = h.storage.get(&roster[0].id).await.unwrap().unwrap();

        let orchestrator = h.orchestrator_with(|s| s.stale_after = Some(TimeDelta::zero()));
        let second = Harness::run_with(orchestrator, &roster).await;
        let after = h.storage.get(&roster[0].id).await.unwrap().unwrap();

        assert_eq!(second.companies[0].outcome, RunOutcome::Updated);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 2);
        assert!(after.classification.generated_at >= before.classification.generated_at);
        assert_eq!(after.fingerprint, before.fingerprint);
        assert_eq!(h.outbox.sent.lock().unwrap().len(), 1);

        // fresh again under the default settings
        let third = h.run(&roster).await;
        assert_eq!(third.unchanged, 1);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn low_confidence_verdict_is_reclassified() {
        let h = Harness::new().await;
        h.web.set("unsure.example", "unsure gmbh maybe uses ai somewhere");
        h.web.set("sure.example", "sure gmbh sells furniture");
        let roster = [company("unsure.example"), company("sure.example")];
        let with_threshold = |s: &mut PipelineSettings| s.min_confidence = Some(50);

        Harness::run_with(h.orchestrator_with(with_threshold), &roster).await;
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 2);

        let second = Harness::run_with(h.orchestrator_with(with_threshold), &roster).await;
        assert_eq!(second.companies[0].outcome, RunOutcome::Updated);
        assert_eq!(second.companies[1].outcome, RunOutcome::Unchanged);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 3);

        // disabled threshold leaves the uncertain verdict alone
        let third = h.run(&roster).await;
        assert_eq!(third.unchanged, 2);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn one_failing_company_does_not_stop_the_roster() {
        let h = Harness::new().await;
        let roster: Vec<Company> = (1..=5)
            .map(|i| company(&format!("firm{i}.example")))
            .collect();
        h.web.take_down("firm3.example");

        let summary = h.run(&roster).await;

        assert_eq!(summary.total, 5);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded(), 4);
        match &summary.companies[2].outcome {
            RunOutcome::Failed { stage, kind, .. } => {
                assert_eq!(*stage, Stage::Fetching);
                assert_eq!(*kind, ErrorKind::FetchFailed);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(h.storage.get(&roster[2].id).await.unwrap().is_none());
        assert_eq!(h.storage.list().await.unwrap().len(), 4);

        let runs = h.storage.recent_runs(1).await.unwrap();
        let journal: RunSummary =
            serde_json::from_str(runs[0].summary_json.as_deref().unwrap()).unwrap();
        assert_eq!(journal.failed, 1);
    }

    #[tokio::test]
    async fn invalid_model_output_fails_without_a_record() {
        let h = Harness::new().await;
        h.web.set("odd.example", "garbage");
        let roster = [company("odd.example")];

        let summary = h.run(&roster).await;

        assert!(matches!(
            summary.companies[0].outcome,
            RunOutcome::Failed {
                stage: Stage::Classifying,
                kind: ErrorKind::ClassificationFailed,
                ..
            }
        ));
        assert!(h.storage.get(&roster[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unresolvable_address_is_persisted_without_location() {
        let h = Harness::new().await;
        let mut firm = company("remote.example");
        firm.address = "Nowhere 1".into();

        let summary = h.run(&[firm.clone()]).await;

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.companies[0].warnings.len(), 1);
        let record = h.storage.get(&firm.id).await.unwrap().unwrap();
        assert!(record.geo.is_none());
    }

    #[tokio::test]
    async fn tier_upgrade_sends_one_alert() {
        let h = Harness::new().await;
        h.web.set("acme.example", "acme is reading about ai");
        let roster = [company("acme.example")];

        let first = h.run(&roster).await;
        assert_eq!(first.updated, 1);
        assert!(h.outbox.sent.lock().unwrap().is_empty());

        h.web.set("acme.example", "acme started an integration project");
        let second = h.run(&roster).await;
        assert_eq!(
            second.companies[0].outcome,
            RunOutcome::Alerted {
                kind: ChangeKind::Upgraded
            }
        );

        let sent = h.outbox.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("upgraded from No signal to Integration in progress"));
    }

    #[tokio::test]
    async fn failed_alert_is_retried_on_next_run() {
        let h = Harness::new().await;
        h.web.set("acme.example", "acme runs production vision models");
        let roster = [company("acme.example")];

        h.outbox.failing.store(true, Ordering::SeqCst);
        let first = h.run(&roster).await;
        assert_eq!(first.updated, 1);
        assert!(first.companies[0].warnings[0].contains("alert pending"));
        assert_eq!(
            h.storage.get(&roster[0].id).await.unwrap().unwrap().pending_alert,
            Some(ChangeKind::New)
        );

        h.outbox.failing.store(false, Ordering::SeqCst);
        let second = h.run(&roster).await;
        assert_eq!(
            second.companies[0].outcome,
            RunOutcome::Alerted {
                kind: ChangeKind::New
            }
        );
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 1);

        let third = h.run(&roster).await;
        assert_eq!(third.unchanged, 1);
        assert_eq!(h.outbox.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_run_skips_remaining_companies() {
        let h = Harness::new().await;
        let roster = [company("a.example"), company("b.example")];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = h
            .orchestrator()
            .run(&roster, &SilentProgress, &cancel)
            .await
            .unwrap();

        assert_eq!(summary.skipped, 2);
        assert!(summary.cancelled);
        assert!(h.storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forced_run_rewrites_unchanged_records() {
        let h = Harness::new().await;
        let roster = [company("acme.example")];
        h.run(&roster).await;

        let summary = h
            .orchestrator()
            .with_force(true)
            .run(&roster, &SilentProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(h.model.calls.load(Ordering::SeqCst), 2);
    }

    /// Resolves every address.
    struct AnyGeo;

    #[async_trait]
    impl GeocodingService for AnyGeo {
        async fn lookup(&self, _query: &str) -> Result<Option<GeoHit>> {
            Ok(Some(GeoHit {
                latitude: 53.7,
                longitude: 10.2,
                precision: GeoPrecision::Locality,
                display_name: None,
            }))
        }
    }

    #[tokio::test]
    async fn backfill_fills_missing_locations() {
        let h = Harness::new().await;
        let mut firm = company("late.example");
        firm.address = "Nowhere 7".into();
        h.run(&[firm.clone()]).await;
        assert!(h.storage.get(&firm.id).await.unwrap().unwrap().geo.is_none());

        let geocoder = Geocoder::new(
            Arc::new(AnyGeo),
            GeocoderConfig {
                min_interval: Duration::ZERO,
                country_suffix: None,
                region_bounds: None,
            },
        );
        assert_eq!(backfill_geo(&h.storage, &geocoder).await.unwrap(), 1);

        let record = h.storage.get(&firm.id).await.unwrap().unwrap();
        assert_eq!(record.geo.unwrap().precision, GeoPrecision::Locality);
        assert_eq!(backfill_geo(&h.storage, &geocoder).await.unwrap(), 0);
    }
}
