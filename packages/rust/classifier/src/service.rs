//! Model service seam and the OpenAI-compatible chat client.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use radar_shared::{LlmSection, MaturityTier, RadarError, Result, TopicConfig, read_api_key};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// What the model is asked about one company.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub company_name: String,
    pub industry: Option<String>,
    pub region: String,
    pub topic: String,
    /// `(canonical label, description)` for every tier, highest first.
    pub tiers: Vec<(String, String)>,
    /// Topic keywords found on the site.
    pub keyword_hits: Vec<String>,
    /// Page text, already truncated.
    pub text: String,
}

impl ModelRequest {
    pub fn new(topic: &TopicConfig, region: &str, company_name: &str, text: String) -> Self {
        let tiers = MaturityTier::ALL
            .iter()
            .rev()
            .map(|tier| {
                (
                    tier.as_str().to_string(),
                    topic.tiers.describe(*tier).to_string(),
                )
            })
            .collect();

        Self {
            company_name: company_name.to_string(),
            industry: None,
            region: region.to_string(),
            topic: topic.name.clone(),
            tiers,
            keyword_hits: Vec::new(),
            text,
        }
    }

    pub fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You analyse company websites in {} for genuine use of {}.\n\n\
             Classify the company into exactly one of the following tiers:\n",
            self.region, self.topic
        );
        for (label, description) in &self.tiers {
            prompt.push_str(&format!("- \"{label}\": {description}\n"));
        }
        prompt.push_str(&format!(
            "\nAlso write a professional short biography (at most 120 words) of the company \
             with a focus on its {} activities. Factual and informative; start directly with \
             the company name.\n\n\
             Answer ONLY as JSON:\n\
             {{\"tier\": \"...\", \"rationale\": \"...\", \"applications\": [\"...\"], \
             \"confidence\": 0-100, \"biography\": \"...\"}}",
            self.topic
        ));
        prompt
    }

    pub fn user_prompt(&self) -> String {
        let mut prompt = format!("Company: {}\nRegion: {}\n", self.company_name, self.region);
        if let Some(industry) = &self.industry {
            prompt.push_str(&format!("Industry: {industry}\n"));
        }
        prompt.push_str(&format!("Topic: {}\n", self.topic));
        if !self.keyword_hits.is_empty() {
            prompt.push_str(&format!("Keywords found: {}\n", self.keyword_hits.join(", ")));
        }
        prompt.push_str(&format!(
            "\nWebsite content (excerpt):\n{}\n\nClassify and answer as JSON.",
            self.text
        ));
        prompt
    }
}

/// Unvalidated model verdict. The tier label is free text until the
/// classifier checks it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub tier_label: String,
    pub rationale: String,
    pub biography: String,
    pub confidence: Option<u8>,
    pub applications: Vec<String>,
    /// Model identifier reported by the service.
    pub model: String,
}

/// A language model that classifies company text.
#[async_trait]
pub trait ModelService: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

/// Chat-completions client for OpenAI and compatible gateways.
#[derive(Clone)]
pub struct OpenAiCompatibleService {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl OpenAiCompatibleService {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RadarError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.3,
        })
    }

    /// Build from the `[llm]` section; the key is read from the configured
    /// env var.
    pub fn from_config(config: &LlmSection) -> Result<Self> {
        let api_key = read_api_key(config)?;
        Ok(Self::new(api_key, Duration::from_secs(config.timeout_secs))?
            .with_model(&config.model)
            .with_base_url(&config.base_url)
            .with_temperature(config.temperature))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL (for Azure, proxies, local gateways).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[async_trait]
impl ModelService for OpenAiCompatibleService {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_prompt(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.user_prompt(),
                },
            ],
            temperature: self.temperature,
            max_tokens: 1000,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RadarError::ClassificationFailed(format!("model request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let excerpt: String = error_text.chars().take(200).collect();
            return Err(RadarError::ClassificationFailed(format!(
                "model service returned HTTP {status}: {excerpt}"
            )));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            RadarError::ClassificationFailed(format!("invalid chat response: {e}"))
        })?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RadarError::ClassificationFailed("no choices in chat response".into()))?;

        let model = chat.model.unwrap_or_else(|| self.model.clone());
        debug!(%model, chars = content.len(), "model replied");
        parse_verdict(&content, model)
    }
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("static regex"));

/// JSON shape of a verdict. Also accepts the field names of the earlier
/// German prompt.
#[derive(Deserialize)]
struct RawVerdict {
    #[serde(alias = "kategorie", alias = "category")]
    tier: Option<String>,
    #[serde(default, alias = "begruendung", alias = "reason")]
    rationale: Option<String>,
    #[serde(default, alias = "ki_anwendungen")]
    applications: Value,
    #[serde(default, alias = "vertrauen")]
    confidence: Value,
    #[serde(default, alias = "biografie", alias = "bio")]
    biography: Option<String>,
}

/// Parse a model reply into a [`ModelResponse`]. Code fences and prose
/// around the JSON object are tolerated; a missing object or tier is not.
pub fn parse_verdict(content: &str, model: String) -> Result<ModelResponse> {
    let json = JSON_OBJECT
        .find(content)
        .map(|m| m.as_str())
        .ok_or_else(|| RadarError::ClassificationFailed("model reply contains no JSON object".into()))?;

    let raw: RawVerdict = serde_json::from_str(json).map_err(|e| {
        RadarError::ClassificationFailed(format!("malformed model reply: {e}"))
    })?;

    let tier_label = raw
        .tier
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RadarError::ClassificationFailed("model reply has no tier".into()))?;

    let applications = match raw.applications {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };

    let confidence = match raw.confidence {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    }
    .filter(|c| (0.0..=100.0).contains(c))
    .map(|c| c.round() as u8);

    Ok(ModelResponse {
        tier_label,
        rationale: raw.rationale.unwrap_or_default().trim().to_string(),
        biography: raw.biography.unwrap_or_default().trim().to_string(),
        confidence,
        applications,
        model,
    })
}
