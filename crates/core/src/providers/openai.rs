use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::CoreError;
use crate::models::credential::Credential;
use crate::models::data_kind::DataKind;
use crate::models::news::Sentiment;
use crate::upstream::{AuthScheme, HttpMethod, Params, UpstreamClient, UpstreamConfig};
use super::traits::MarketDataProvider;

const BASE_URL: &str = "https://api.openai.com";
const PROVIDER_ID: &str = "openai";

const SYSTEM_PROMPT: &str = "You label financial news headlines about Indian equities. \
For each numbered headline answer with exactly one word on its own line, in order: \
positive, negative or neutral.";

/// OpenAI chat completions used as a headline sentiment classifier.
pub struct OpenAiProvider {
    upstream: UpstreamClient,
    credential: Credential,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Self {
        Self::with_base_url(api_key, model, BASE_URL, timeout)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str, timeout: Duration) -> Self {
        let config =
            UpstreamConfig::new(PROVIDER_ID, base_url, AuthScheme::Bearer).with_timeout(timeout);
        Self {
            upstream: UpstreamClient::new(config),
            credential: Credential::api_key(PROVIDER_ID, api_key),
            model: model.to_string(),
        }
    }
}

/// One label per non-empty line; list markers like "1." or "-" are ignored.
fn parse_labels(content: &str) -> Result<Vec<Sentiment>, CoreError> {
    content
        .lines()
        .map(|l| l.trim().trim_start_matches(|c: char| c.is_ascii_digit() || ".)-: ".contains(c)))
        .filter(|l| !l.is_empty())
        .map(|l| {
            Sentiment::parse_label(l)
                .ok_or_else(|| CoreError::malformed(PROVIDER_ID, format!("unknown label {l:?}")))
        })
        .collect()
}

#[async_trait]
impl MarketDataProvider for OpenAiProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    fn supported_kinds(&self) -> Vec<DataKind> {
        vec![DataKind::Sentiment]
    }

    async fn classify_sentiment(&self, texts: &[String]) -> Result<Vec<Sentiment>, CoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let numbered: String = texts
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}. {}\n", i + 1, t.replace('\n', " ")))
            .collect();
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": numbered },
            ],
        });

        let resp = self
            .upstream
            .call(
                "/v1/chat/completions",
                HttpMethod::Post,
                Params::Json(body),
                Some(&self.credential),
            )
            .await?;

        let content = resp
            .body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::malformed(PROVIDER_ID, "no completion content"))?;

        let labels = parse_labels(content)?;
        if labels.len() != texts.len() {
            return Err(CoreError::malformed(
                PROVIDER_ID,
                format!("expected {} labels, got {}", texts.len(), labels.len()),
            ));
        }
        Ok(labels)
    }
}
