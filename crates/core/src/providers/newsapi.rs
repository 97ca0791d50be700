use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::CoreError;
use crate::models::credential::Credential;
use crate::models::data_kind::DataKind;
use crate::models::news::{NewsEvent, NewsKind};
use crate::models::quote::split_symbol;
use crate::normalize::{normalize_batch, require_identity, Normalize, NormalizeContext, Normalized};
use crate::upstream::{AuthScheme, HttpMethod, Params, UpstreamClient, UpstreamConfig};
use super::traits::MarketDataProvider;

const BASE_URL: &str = "https://newsapi.org";
const PROVIDER_ID: &str = "newsapi";
const PAGE_SIZE: &str = "50";

/// NewsAPI.org `everything` search, the primary news source.
///
/// Searches by tradingsymbol and tags each article with the symbol that
/// was queried. Articles are identified by URL.
pub struct NewsApiProvider {
    upstream: UpstreamClient,
    credential: Credential,
}

impl NewsApiProvider {
    pub fn new(api_key: &str, timeout: Duration) -> Self {
        Self::with_base_url(api_key, BASE_URL, timeout)
    }

    pub fn with_base_url(api_key: &str, base_url: &str, timeout: Duration) -> Self {
        let config =
            UpstreamConfig::new(PROVIDER_ID, base_url, AuthScheme::ApiKeyHeader("X-Api-Key"))
                .with_timeout(timeout);
        Self {
            upstream: UpstreamClient::new(config),
            credential: Credential::api_key(PROVIDER_ID, api_key),
        }
    }
}

#[derive(Deserialize)]
struct ArticleSource {
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    source: Option<ArticleSource>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    queried: String,
}

impl Normalize<NewsEvent> for Article {
    fn normalize(self, ctx: &NormalizeContext<'_>) -> Result<NewsEvent, CoreError> {
        let url = require_identity(ctx, "url", self.url)?;
        let published_at = self
            .published_at
            .ok_or_else(|| ctx.error(format!("{url}: missing publishedAt")))?;
        let title = self.title.unwrap_or_default();
        let description = self.description.unwrap_or_default();

        Ok(NewsEvent {
            id: NewsEvent::compose_id(ctx.provider, &url),
            kind: NewsKind::classify(&title, &description),
            title,
            description,
            url: Some(url),
            published_at,
            source: self.source.and_then(|s| s.name).unwrap_or_default(),
            symbols: vec![self.queried],
            sentiment: None,
        })
    }
}

#[async_trait]
impl MarketDataProvider for NewsApiProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "NewsAPI"
    }

    fn supported_kinds(&self) -> Vec<DataKind> {
        vec![DataKind::News]
    }

    async fn get_news(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Normalized<NewsEvent>, CoreError> {
        let (_, tradingsymbol) = split_symbol(symbol);
        let params = Params::query([
            ("q", tradingsymbol.to_string()),
            ("from", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("sortBy", "publishedAt".to_string()),
            ("language", "en".to_string()),
            ("pageSize", PAGE_SIZE.to_string()),
        ]);
        let resp = self
            .upstream
            .call("/v2/everything", HttpMethod::Get, params, Some(&self.credential))
            .await?;

        let articles = match resp.body {
            Value::Object(mut map) => match map.remove("articles") {
                Some(Value::Array(items)) => items,
                _ => return Err(CoreError::malformed(PROVIDER_ID, "no articles array")),
            },
            _ => return Err(CoreError::malformed(PROVIDER_ID, "response is not an object")),
        };

        let tagged = articles
            .into_iter()
            .map(|mut a| {
                if let Some(obj) = a.as_object_mut() {
                    obj.insert("queried".into(), Value::String(symbol.to_string()));
                }
                a
            })
            .collect();
        let ctx = NormalizeContext::new(PROVIDER_ID);
        Ok(normalize_batch::<Article, NewsEvent>(&ctx, tagged))
    }
}
