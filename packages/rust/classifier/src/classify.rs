//! Maturity classification with bounded retries and strict label validation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use radar_shared::{
    ClassificationResult, Company, Fingerprint, MaturityTier, RadarConfig, RadarError, Result,
    TopicConfig,
};
use tracing::{debug, instrument, warn};

use crate::service::{ModelRequest, ModelResponse, ModelService};

/// Runtime classifier settings.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub max_attempts: u32,
    pub max_input_chars: usize,
    pub retry_delay: Duration,
    pub region: String,
    pub topic: TopicConfig,
}

impl From<&RadarConfig> for ClassifierConfig {
    fn from(config: &RadarConfig) -> Self {
        Self {
            max_attempts: config.llm.max_attempts.max(1),
            max_input_chars: config.llm.max_input_chars,
            retry_delay: Duration::from_millis(config.llm.retry_delay_ms),
            region: config.radar.region.clone(),
            topic: config.topic.clone(),
        }
    }
}

/// Turns page text into a validated [`ClassificationResult`].
///
/// Model output is untrusted: a label outside the tier set, an empty
/// biography, malformed JSON and service errors all consume an attempt.
/// When attempts run out the company fails; a tier is never guessed.
pub struct Classifier {
    service: Arc<dyn ModelService>,
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(service: Arc<dyn ModelService>, config: ClassifierConfig) -> Self {
        Self { service, config }
    }

    /// The part of `text` the model is shown: trimmed, then cut to
    /// `max_input_chars`.
    pub fn excerpt<'t>(&self, text: &'t str) -> &'t str {
        truncate_chars(text.trim(), self.config.max_input_chars)
    }

    /// Fingerprint of exactly what [`Classifier::classify`] would send for
    /// `text`. Content beyond the excerpt never changes it.
    pub fn fingerprint(&self, text: &str) -> Fingerprint {
        Fingerprint::of_text(self.excerpt(text))
    }

    #[instrument(skip_all, fields(company = %company.id))]
    pub async fn classify(
        &self,
        company: &Company,
        text: &str,
        keyword_hits: &[String],
    ) -> Result<ClassificationResult> {
        let excerpt = self.excerpt(text);
        if excerpt.is_empty() {
            return Err(RadarError::ClassificationFailed(format!(
                "no page text to classify for {}",
                company.id
            )));
        }

        let mut request = ModelRequest::new(
            &self.config.topic,
            &self.config.region,
            &company.name,
            excerpt.to_string(),
        );
        request.industry = company.industry.clone();
        request.keyword_hits = keyword_hits.to_vec();

        let mut last_reason = String::new();
        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 && !self.config.retry_delay.is_zero() {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            let reason = match self.service.complete(&request).await {
                Ok(response) => match validate(response) {
                    Ok(result) => {
                        debug!(attempt, tier = %result.tier, "classified");
                        return Ok(result);
                    }
                    Err(reason) => reason,
                },
                Err(e) => e.to_string(),
            };

            warn!(attempt, max = self.config.max_attempts, %reason, "unusable model reply");
            last_reason = reason;
        }

        Err(RadarError::ClassificationFailed(format!(
            "no valid verdict after {} attempt(s): {last_reason}",
            self.config.max_attempts
        )))
    }
}

fn validate(response: ModelResponse) -> std::result::Result<ClassificationResult, String> {
    let tier = MaturityTier::from_label(&response.tier_label)
        .ok_or_else(|| format!("label '{}' is not a known tier", response.tier_label))?;
    if response.biography.trim().is_empty() {
        return Err("reply has an empty biography".into());
    }

    Ok(ClassificationResult {
        tier,
        rationale: response.rationale,
        confidence: response.confidence,
        applications: response.applications,
        biography: response.biography,
        model: response.model,
        generated_at: Utc::now(),
    })
}

/// Cut `text` to at most `max_chars` characters without splitting one.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use radar_shared::CompanyId;
    use url::Url;

    use super::*;

    /// Replays scripted replies and records what it was asked.
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<ModelResponse>>>,
        seen: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<ModelResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelService for ScriptedModel {
        async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RadarError::ClassificationFailed("script exhausted".into())))
        }
    }

    fn reply(label: &str) -> Result<ModelResponse> {
        Ok(ModelResponse {
            tier_label: label.into(),
            rationale: "because".into(),
            biography: "Acme Robotics GmbH builds grippers.".into(),
            confidence: Some(75),
            applications: vec!["vision QA".into()],
            model: "scripted".into(),
        })
    }

    fn config() -> ClassifierConfig {
        ClassifierConfig {
            max_attempts: 3,
            max_input_chars: 20,
            retry_delay: Duration::ZERO,
            region: "Kreis Stormarn".into(),
            topic: TopicConfig::default(),
        }
    }

    fn company() -> Company {
        Company {
            id: CompanyId::new("acme").unwrap(),
            name: "Acme Robotics GmbH".into(),
            website: Url::parse("https://acme.example").unwrap(),
            address: String::new(),
            industry: Some("Maschinenbau".into()),
            region: None,
        }
    }

    #[tokio::test]
    async fn valid_reply_is_accepted() {
        let model = ScriptedModel::new(vec![reply("integration_in_progress")]);
        let classifier = Classifier::new(model.clone(), config());

        let result = classifier
            .classify(&company(), "Wir nutzen Copilot.", &[])
            .await
            .expect("classify");
        assert_eq!(result.tier, MaturityTier::IntegrationInProgress);
        assert_eq!(result.model, "scripted");
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn empty_text_fails_without_calling_the_model() {
        let model = ScriptedModel::new(vec![reply("production_use")]);
        let classifier = Classifier::new(model.clone(), config());

        let err = classifier.classify(&company(), "  \n ", &[]).await.unwrap_err();
        assert!(matches!(err, RadarError::ClassificationFailed(_)));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_label_consumes_an_attempt() {
        let model = ScriptedModel::new(vec![reply("UNBEKANNT"), reply("ECHTER_EINSATZ")]);
        let classifier = Classifier::new(model.clone(), config());

        let result = classifier.classify(&company(), "text", &[]).await.unwrap();
        assert_eq!(result.tier, MaturityTier::ProductionUse);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_closed() {
        let model = ScriptedModel::new(vec![
            reply("maybe"),
            Err(RadarError::ClassificationFailed("HTTP 500".into())),
            reply("somewhat"),
        ]);
        let classifier = Classifier::new(model.clone(), config());

        let err = classifier.classify(&company(), "text", &[]).await.unwrap_err();
        assert_eq!(model.calls(), 3);
        assert!(err.to_string().contains("'somewhat'"));
    }

    #[tokio::test]
    async fn empty_biography_is_rejected() {
        let mut no_bio = reply("production_use").unwrap();
        no_bio.biography = " ".into();
        let model = ScriptedModel::new(vec![Ok(no_bio), reply("production_use")]);
        let classifier = Classifier::new(model.clone(), config());

        classifier.classify(&company(), "text", &[]).await.unwrap();
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn input_is_truncated_on_char_boundary() {
        let model = ScriptedModel::new(vec![reply("no_signal")]);
        let classifier = Classifier::new(model.clone(), config());
        let text = "Übergrößenfertigung für Kühlhäuser in Stormarn";

        classifier
            .classify(&company(), text, &["KI".to_string()])
            .await
            .unwrap();

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0].text.chars().count(), 20);
        assert!(text.starts_with(&seen[0].text));
        assert_eq!(seen[0].industry.as_deref(), Some("Maschinenbau"));
        assert_eq!(seen[0].keyword_hits, vec!["KI".to_string()]);
    }

    #[test]
    fn fingerprint_covers_only_the_model_input() {
        let classifier = Classifier::new(ScriptedModel::new(vec![]), config());
        let shared = "Wir fertigen Greifer in Ahrensburg.";

        let a = format!("{shared} Neu: Kantine");
        let b = format!("  {shared} Neu: Parkhaus");
        assert_eq!(classifier.excerpt(&a), classifier.excerpt(&b));
        assert_eq!(classifier.fingerprint(&a), classifier.fingerprint(&b));

        let c = "Wir fertigen Roboter in Ahrensburg.";
        assert_ne!(classifier.fingerprint(&a), classifier.fingerprint(c));
        assert_eq!(
            classifier.fingerprint(&a),
            Fingerprint::of_text(classifier.excerpt(&a))
        );
    }
}
