use std::time::Duration;

use chrono::Utc;
use log::debug;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use crate::errors::{sanitize_message, CoreError};
use crate::models::credential::Credential;

/// Minimal HTTP method set needed by provider adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Request parameters: query string for GETs, JSON body for POSTs.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    None,
    Query(Vec<(String, String)>),
    Json(Value),
}

impl Params {
    pub fn query<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Params::Query(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// How a provider expects to be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// Public endpoint.
    None,
    /// `X-Kite-Version: 3` plus `Authorization: token <api_key>:<access_token>`.
    KiteToken,
    /// API key in the named header (NewsAPI's `X-Api-Key`).
    ApiKeyHeader(&'static str),
    /// `Authorization: Bearer <api_key>`.
    Bearer,
    /// API key in the named query parameter (Alpha Vantage's `apikey`).
    QueryParam(&'static str),
}

/// Body inspection for quota errors reported with a 200 status.
pub type QuotaSignal = fn(&Value) -> bool;

/// Static, per-provider transport configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub provider: String,
    pub base_url: String,
    pub auth: AuthScheme,
    pub timeout: Duration,
    pub quota_signal: Option<QuotaSignal>,
}

impl UpstreamConfig {
    pub fn new(provider: impl Into<String>, base_url: impl Into<String>, auth: AuthScheme) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into(),
            auth,
            timeout: Duration::from_secs(10),
            quota_signal: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_quota_signal(mut self, signal: QuotaSignal) -> Self {
        self.quota_signal = Some(signal);
        self
    }
}

/// A 2xx response with a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

/// One HTTP call to one provider, with its outcome classified into the
/// error taxonomy. Never retries.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub async fn call(
        &self,
        endpoint: &str,
        method: HttpMethod,
        params: Params,
        credential: Option<&Credential>,
    ) -> Result<RawResponse, CoreError> {
        let provider = self.provider();
        self.check_credential(credential)?;

        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        debug!("{provider}: {method:?} {endpoint}");

        let mut request = match method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        }
        .timeout(self.config.timeout);

        let mut query = match &params {
            Params::Query(pairs) => pairs.clone(),
            _ => Vec::new(),
        };
        request = self.apply_auth(request, &mut query, credential);
        if !query.is_empty() {
            request = request.query(&query);
        }
        if let Params::Json(body) = &params {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(provider, e))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| classify_transport(provider, e))?;

        classify_response(&self.config, status, &text)
    }

    fn check_credential(&self, credential: Option<&Credential>) -> Result<(), CoreError> {
        if self.config.auth == AuthScheme::None {
            return Ok(());
        }
        let missing = || CoreError::MissingCredential {
            provider: self.config.provider.clone(),
        };
        let cred = credential.ok_or_else(missing)?;
        if cred.api_key.trim().is_empty() {
            return Err(missing());
        }
        if self.config.auth == AuthScheme::KiteToken
            && cred.access_token.as_deref().map_or(true, str::is_empty)
        {
            return Err(missing());
        }
        if cred.is_expired(Utc::now()) {
            return Err(CoreError::AuthExpired {
                provider: self.config.provider.clone(),
            });
        }
        Ok(())
    }

    fn apply_auth(
        &self,
        request: RequestBuilder,
        query: &mut Vec<(String, String)>,
        credential: Option<&Credential>,
    ) -> RequestBuilder {
        let Some(cred) = credential else {
            return request;
        };
        match self.config.auth {
            AuthScheme::None => request,
            AuthScheme::KiteToken => request.header("X-Kite-Version", "3").header(
                "Authorization",
                format!(
                    "token {}:{}",
                    cred.api_key,
                    cred.access_token.as_deref().unwrap_or_default()
                ),
            ),
            AuthScheme::ApiKeyHeader(name) => request.header(name, cred.api_key.as_str()),
            AuthScheme::Bearer => request.bearer_auth(&cred.api_key),
            AuthScheme::QueryParam(name) => {
                query.push((name.to_string(), cred.api_key.clone()));
                request
            }
        }
    }
}

/// Map an HTTP status and body to a response or a classified error.
pub fn classify_response(
    config: &UpstreamConfig,
    status: u16,
    text: &str,
) -> Result<RawResponse, CoreError> {
    let provider = config.provider.clone();
    match status {
        401 | 403 => Err(CoreError::AuthExpired { provider }),
        429 => Err(CoreError::QuotaExceeded {
            provider,
            message: error_message(text),
        }),
        408 | 500..=599 => Err(CoreError::Transient {
            provider,
            message: format!("HTTP {status}: {}", error_message(text)),
        }),
        400..=499 => Err(CoreError::Rejected {
            provider,
            status,
            message: error_message(text),
        }),
        200..=299 => {
            let body: Value = serde_json::from_str(text).map_err(|e| {
                CoreError::malformed(&config.provider, format!("body is not JSON: {e}"))
            })?;
            if config.quota_signal.is_some_and(|signal| signal(&body)) {
                return Err(CoreError::QuotaExceeded {
                    provider,
                    message: error_message(text),
                });
            }
            Ok(RawResponse { status, body })
        }
        _ => Err(CoreError::malformed(
            &config.provider,
            format!("unexpected HTTP status {status}"),
        )),
    }
}

fn classify_transport(provider: &str, e: reqwest::Error) -> CoreError {
    let decode = e.is_decode();
    let message = sanitize_message(&e.without_url().to_string());
    if decode {
        CoreError::malformed(provider, message)
    } else {
        CoreError::Transient {
            provider: provider.to_string(),
            message,
        }
    }
}

/// Best-effort human message from an error body: `message`, `error.message`,
/// `Note`/`Information` (Alpha Vantage), or the raw text truncated.
fn error_message(text: &str) -> String {
    let from_json = serde_json::from_str::<Value>(text).ok().and_then(|v| {
        let candidates = [
            v.get("message"),
            v.get("error").and_then(|e| e.get("message")),
            v.get("error").filter(|e| e.is_string()),
            v.get("Note"),
            v.get("Information"),
        ];
        candidates
            .into_iter()
            .flatten()
            .find_map(|m| m.as_str().map(str::to_string))
    });
    let message = from_json.unwrap_or_else(|| text.chars().take(200).collect());
    sanitize_message(message.trim())
}
