use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::CoreError;
use crate::services::news_service::MAX_SINCE_HOURS;

use super::credential::Credential;
use super::data_kind::DataKind;

/// Process-wide configuration, injected at start-up.
///
/// Secrets come from the environment or a config file, never from source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// API keys by name: "kite_api_key", "kite_api_secret", "kite_access_token",
    /// "newsapi", "alphavantage", "openai".
    pub api_keys: HashMap<String, String>,

    /// Provider ids in priority order, keyed by data kind ("quotes", "news", ...).
    /// Kinds missing here fall back to registration order.
    pub provider_order: HashMap<String, Vec<String>>,

    /// Per-provider timeout overrides in seconds.
    pub timeouts_secs: HashMap<String, u64>,

    pub default_timeout_secs: u64,

    /// Delay before the single retry of a transient failure.
    pub retry_delay_ms: u64,

    /// How long a fetched result is served from the cache window.
    pub cache_ttl_secs: u64,

    /// Upper bound on merged news items per request.
    pub news_limit: usize,

    /// Model used for headline sentiment.
    pub openai_model: String,

    /// Tradingsymbol → sector, used for allocation breakdowns.
    pub sector_mappings: HashMap<String, String>,

    /// Largest share of value one sector may hold before an alert, in percent.
    pub max_sector_pct: f64,

    /// Fewer sectors than this raises a diversification alert.
    pub min_sectors: usize,

    /// Herfindahl index above which the portfolio counts as concentrated.
    pub max_concentration_index: f64,

    /// Look-back for the headlines checked by portfolio alerts.
    pub alert_news_hours: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let mut provider_order = HashMap::new();
        provider_order.insert(DataKind::Holdings.as_str().to_string(), vec!["kite".into()]);
        provider_order.insert(
            DataKind::Quotes.as_str().to_string(),
            vec!["kite".into(), "yahoo".into(), "alphavantage".into()],
        );
        provider_order.insert(
            DataKind::Candles.as_str().to_string(),
            vec!["kite".into(), "yahoo".into()],
        );
        provider_order.insert(
            DataKind::News.as_str().to_string(),
            vec!["newsapi".into(), "alphavantage".into()],
        );
        provider_order.insert(
            DataKind::Sentiment.as_str().to_string(),
            vec!["openai".into(), "keywords".into()],
        );

        Self {
            api_keys: HashMap::new(),
            provider_order,
            timeouts_secs: HashMap::new(),
            default_timeout_secs: 10,
            retry_delay_ms: 500,
            cache_ttl_secs: 60,
            news_limit: 50,
            openai_model: "gpt-4o-mini".to_string(),
            sector_mappings: default_sector_mappings(),
            max_sector_pct: 30.0,
            min_sectors: 5,
            max_concentration_index: 2500.0,
            alert_news_hours: 24,
        }
    }
}

impl Settings {
    /// Load settings from a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Build settings from environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`Settings::from_env`] with an injectable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        let keys = [
            ("KITE_API_KEY", "kite_api_key"),
            ("KITE_API_SECRET", "kite_api_secret"),
            ("KITE_ACCESS_TOKEN", "kite_access_token"),
            ("NEWS_API_KEY", "newsapi"),
            ("ALPHAVANTAGE_API_KEY", "alphavantage"),
            ("OPENAI_API_KEY", "openai"),
        ];
        for (var, key) in keys {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                settings.api_keys.insert(key.to_string(), value.trim().to_string());
            }
        }

        if let Some(model) = lookup("OPENAI_MODEL").filter(|v| !v.trim().is_empty()) {
            settings.openai_model = model.trim().to_string();
        }
        if let Some(secs) = lookup("PORTIFY_TIMEOUT_SECS") {
            settings.default_timeout_secs = parse_number("PORTIFY_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("PORTIFY_CACHE_TTL_SECS") {
            settings.cache_ttl_secs = parse_number("PORTIFY_CACHE_TTL_SECS", &secs)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.default_timeout_secs == 0 {
            return Err(CoreError::Validation(
                "default_timeout_secs must be greater than zero".into(),
            ));
        }
        if let Some((provider, _)) = self.timeouts_secs.iter().find(|(_, t)| **t == 0) {
            return Err(CoreError::Validation(format!(
                "timeout for {provider} must be greater than zero"
            )));
        }
        if self.news_limit == 0 {
            return Err(CoreError::Validation(
                "news_limit must be greater than zero".into(),
            ));
        }
        if !(self.max_sector_pct > 0.0 && self.max_sector_pct <= 100.0) {
            return Err(CoreError::Validation(format!(
                "max_sector_pct must be in (0, 100], got {}",
                self.max_sector_pct
            )));
        }
        if !(self.max_concentration_index > 0.0 && self.max_concentration_index <= 10_000.0) {
            return Err(CoreError::Validation(format!(
                "max_concentration_index must be in (0, 10000], got {}",
                self.max_concentration_index
            )));
        }
        if self.alert_news_hours == 0 || self.alert_news_hours > MAX_SINCE_HOURS {
            return Err(CoreError::Validation(format!(
                "alert_news_hours must be between 1 and {MAX_SINCE_HOURS}, got {}",
                self.alert_news_hours
            )));
        }
        Ok(())
    }

    pub fn timeout_for(&self, provider: &str) -> Duration {
        let secs = self
            .timeouts_secs
            .get(provider)
            .copied()
            .unwrap_or(self.default_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn order_for(&self, kind: DataKind) -> Option<&[String]> {
        self.provider_order.get(kind.as_str()).map(Vec::as_slice)
    }

    pub fn api_key(&self, name: &str) -> Option<&str> {
        self.api_keys
            .get(name)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }

    /// The Kite credential described by configuration, if an API key is set.
    /// The access token is optional here; it usually arrives through
    /// a `CredentialProvider` after login.
    pub fn kite_credential(&self) -> Option<Credential> {
        let key = self.api_key("kite_api_key")?;
        let mut cred = Credential::api_key("kite", key);
        if let Some(secret) = self.api_key("kite_api_secret") {
            cred = cred.with_secret(secret);
        }
        if let Some(token) = self.api_key("kite_access_token") {
            cred = cred.with_access_token(token, None);
        }
        Some(cred)
    }

    pub fn sector_of(&self, tradingsymbol: &str) -> &str {
        self.sector_mappings
            .get(&tradingsymbol.to_uppercase())
            .map(String::as_str)
            .unwrap_or("Other")
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, CoreError> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::Validation(format!("{name} must be a number, got {value:?}")))
}

/// NSE tradingsymbol → sector table for common large caps, ETFs and REITs.
pub fn default_sector_mappings() -> HashMap<String, String> {
    let table: &[(&str, &str)] = &[
        ("TCS", "IT"),
        ("INFY", "IT"),
        ("WIPRO", "IT"),
        ("HCLTECH", "IT"),
        ("TECHM", "IT"),
        ("LTIM", "IT"),
        ("PERSISTENT", "IT"),
        ("HDFCBANK", "Banking"),
        ("ICICIBANK", "Banking"),
        ("SBIN", "Banking"),
        ("AXISBANK", "Banking"),
        ("KOTAKBANK", "Banking"),
        ("BAJFINANCE", "Finance"),
        ("BAJAJFINSV", "Finance"),
        ("SBILIFE", "Insurance"),
        ("HDFCLIFE", "Insurance"),
        ("SUNPHARMA", "Pharma"),
        ("DIVISLAB", "Pharma"),
        ("DRREDDY", "Pharma"),
        ("CIPLA", "Pharma"),
        ("BIOCON", "Pharma"),
        ("MARUTI", "Auto"),
        ("TATAMOTORS", "Auto"),
        ("M&M", "Auto"),
        ("HEROMOTOCO", "Auto"),
        ("BAJAJ-AUTO", "Auto"),
        ("RELIANCE", "Diversified"),
        ("ONGC", "Oil & Gas"),
        ("BPCL", "Oil & Gas"),
        ("IOC", "Oil & Gas"),
        ("NTPC", "Power"),
        ("POWERGRID", "Power"),
        ("ADANIGREEN", "Power"),
        ("TATAPOWER", "Power"),
        ("ITC", "FMCG"),
        ("HINDUNILVR", "FMCG"),
        ("NESTLEIND", "FMCG"),
        ("DABUR", "FMCG"),
        ("MARICO", "FMCG"),
        ("LT", "Engineering"),
        ("SIEMENS", "Engineering"),
        ("ABB", "Engineering"),
        ("HAVELLS", "Engineering"),
        ("BHARTIARTL", "Telecom"),
        ("IDEA", "Telecom"),
        ("TATASTEEL", "Metals"),
        ("HINDALCO", "Metals"),
        ("JSWSTEEL", "Metals"),
        ("COALINDIA", "Mining"),
        ("ADANIPORTS", "Infrastructure"),
        ("DLF", "Realty"),
        ("ASIANPAINT", "Paints"),
        ("TITAN", "Consumer Durables"),
        ("NIFTYBEES", "ETF"),
        ("BANKBEES", "ETF"),
        ("GOLDBEES", "ETF"),
        ("LIQUIDBEES", "ETF"),
        ("MINDSPACE", "REIT"),
        ("EMBASSY", "REIT"),
    ];
    table
        .iter()
        .map(|(sym, sector)| (sym.to_string(), sector.to_string()))
        .collect()
}
