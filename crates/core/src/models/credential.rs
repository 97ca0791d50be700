use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// API key/secret pair plus a possibly-expiring access token for one
/// upstream provider.
///
/// Created from configuration or a completed OAuth session, mutated on
/// refresh, and dropped when the provider reports an auth error.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Provider id this credential belongs to (e.g. "kite", "newsapi").
    pub provider: String,

    pub api_key: String,

    #[serde(default)]
    pub api_secret: Option<String>,

    /// Session token issued by the provider (Kite access token, OpenAI has none).
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub user_id: Option<String>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl Credential {
    /// A static API-key credential (news, sentiment and quote APIs).
    pub fn api_key(provider: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            api_key: api_key.into(),
            api_secret: None,
            access_token: None,
            expires_at: None,
            user_id: None,
        }
    }

    /// A Kite session credential with an access token.
    pub fn kite(
        api_key: impl Into<String>,
        access_token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token: Some(access_token.into()),
            expires_at,
            ..Self::api_key("kite", api_key)
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.api_secret = Some(secret.into());
        self
    }

    pub fn with_access_token(
        mut self,
        token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.access_token = Some(token.into());
        self.expires_at = expires_at;
        self
    }

    /// A credential without `expires_at` never expires on its own.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

fn redact(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    if value.chars().count() <= 4 {
        "<redacted>".to_string()
    } else {
        format!("{visible}…")
    }
}

/// Kite access tokens are invalidated every day at 06:00 IST.
/// Returns the first such instant strictly after `issued_at`.
pub fn kite_session_expiry(issued_at: DateTime<Utc>) -> DateTime<Utc> {
    let fallback = issued_at + Duration::hours(24);
    let (Some(ist), Some(six)) = (
        FixedOffset::east_opt(5 * 3600 + 30 * 60),
        NaiveTime::from_hms_opt(6, 0, 0),
    ) else {
        return fallback;
    };
    let local = issued_at.with_timezone(&ist);

    let mut day = local.date_naive();
    if local.time() >= six {
        day += Duration::days(1);
    }

    match ist.from_local_datetime(&day.and_time(six)).single() {
        Some(expiry) => expiry.with_timezone(&Utc),
        None => fallback,
    }
}
