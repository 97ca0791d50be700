use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::errors::CoreError;

/// Per-call context handed to every normalizer.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    /// Id of the provider whose payload is being normalized.
    pub provider: &'a str,
    pub fetched_at: DateTime<Utc>,
}

impl<'a> NormalizeContext<'a> {
    pub fn new(provider: &'a str) -> Self {
        Self {
            provider,
            fetched_at: Utc::now(),
        }
    }

    pub fn error(&self, message: impl Into<String>) -> CoreError {
        CoreError::normalization(self.provider, message)
    }
}

/// Pure mapping from one provider's raw record to a canonical entity.
///
/// Missing optional fields default to zero or empty; missing identity
/// fields fail.
pub trait Normalize<T> {
    fn normalize(self, ctx: &NormalizeContext<'_>) -> Result<T, CoreError>;
}

/// Outcome of normalizing a batch: valid entities plus the errors of the
/// elements that were dropped.
#[derive(Debug)]
pub struct Normalized<T> {
    pub items: Vec<T>,
    pub rejected: Vec<CoreError>,
}

impl<T> Normalized<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            rejected: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn push(&mut self, result: Result<T, CoreError>) {
        match result {
            Ok(item) => self.items.push(item),
            Err(e) => self.rejected.push(e),
        }
    }

    pub fn extend(&mut self, other: Normalized<T>) {
        self.items.extend(other.items);
        self.rejected.extend(other.rejected);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for Normalized<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Normalize one raw JSON element through its provider-specific shape `R`.
pub fn normalize_value<R, T>(ctx: &NormalizeContext<'_>, raw: Value) -> Result<T, CoreError>
where
    R: DeserializeOwned + Normalize<T>,
{
    let record: R = serde_json::from_value(raw)
        .map_err(|e| ctx.error(format!("unexpected record shape: {e}")))?;
    record.normalize(ctx)
}

/// Normalize every element independently. One bad element never aborts
/// the batch.
pub fn normalize_batch<R, T>(ctx: &NormalizeContext<'_>, raw: Vec<Value>) -> Normalized<T>
where
    R: DeserializeOwned + Normalize<T>,
{
    let mut out = Normalized::empty();
    for element in raw {
        out.push(normalize_value::<R, T>(ctx, element));
    }
    out
}

// ── Field helpers ───────────────────────────────────────────────────

/// Non-empty, trimmed identity field.
pub fn require_identity(
    ctx: &NormalizeContext<'_>,
    field: &str,
    value: Option<String>,
) -> Result<String, CoreError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ctx.error(format!("missing {field}"))),
    }
}

/// Reject negative or non-finite prices and quantities.
pub fn non_negative(ctx: &NormalizeContext<'_>, field: &str, value: f64) -> Result<f64, CoreError> {
    if !value.is_finite() {
        return Err(ctx.error(format!("{field} is not a finite number")));
    }
    if value < 0.0 {
        return Err(ctx.error(format!("{field} must not be negative, got {value}")));
    }
    Ok(value)
}

/// Whole-unit quantity from a number that may arrive as float.
pub fn quantity(ctx: &NormalizeContext<'_>, field: &str, value: f64) -> Result<u64, CoreError> {
    let v = non_negative(ctx, field, value)?;
    Ok(v.round() as u64)
}

/// Deserialize a number that may be encoded as a JSON string
/// ("1234.50", "-0.25%"), a number, or null. Unparseable input becomes `None`.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_f64))
}

pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}
