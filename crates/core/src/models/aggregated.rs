use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which upstream source produced an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "provider", rename_all = "snake_case")]
pub enum Provenance {
    /// Real data from the named provider id.
    Provider(String),
    /// Substituted value: every upstream source failed.
    Placeholder,
}

impl Provenance {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Provenance::Placeholder)
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Provenance::Provider(id) => Some(id),
            Provenance::Placeholder => None,
        }
    }
}

/// A normalized entity together with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub item: T,
    pub source: Provenance,
}

impl<T> Sourced<T> {
    pub fn from_provider(item: T, provider: impl Into<String>) -> Self {
        Self {
            item,
            source: Provenance::Provider(provider.into()),
        }
    }

    pub fn placeholder(item: T) -> Self {
        Self {
            item,
            source: Provenance::Placeholder,
        }
    }
}

/// One upstream source that failed while serving a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub provider: String,
    pub message: String,

    /// The source rejected the stored credential.
    #[serde(default)]
    pub requires_login: bool,
}

impl SourceFailure {
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
            requires_login: false,
        }
    }

    pub fn login(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            requires_login: true,
            ..Self::new(provider, message)
        }
    }
}

/// Terminal state of one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    /// At least one source contributed real data.
    Success,
    /// All sources failed and placeholders were returned.
    Degraded,
}

/// Ordered, deduplicated result of one logical query across upstream sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult<T> {
    pub request_id: Uuid,
    pub items: Vec<Sourced<T>>,

    /// True when every source failed and `items` are placeholders.
    pub degraded: bool,

    /// Sources that failed along the way, including ones a later source
    /// recovered from.
    pub failures: Vec<SourceFailure>,

    /// Entities dropped because they could not be normalized.
    pub rejected: usize,

    pub fetched_at: DateTime<Utc>,
}

impl<T> AggregatedResult<T> {
    pub fn success(items: Vec<Sourced<T>>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            items,
            degraded: false,
            failures: Vec::new(),
            rejected: 0,
            fetched_at: Utc::now(),
        }
    }

    pub fn degraded(placeholders: Vec<Sourced<T>>, failures: Vec<SourceFailure>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            items: placeholders,
            degraded: true,
            failures,
            rejected: 0,
            fetched_at: Utc::now(),
        }
    }

    pub fn status(&self) -> ResultStatus {
        if self.degraded {
            ResultStatus::Degraded
        } else {
            ResultStatus::Success
        }
    }

    /// Real data was returned, but at least one source failed on the way.
    pub fn is_partial(&self) -> bool {
        !self.degraded && !self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Borrow the bare entities, dropping provenance.
    pub fn entities(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|s| &s.item)
    }
}

/// A canonical record that can be merged across sources.
pub trait Entity: Clone {
    /// Key used for deduplication.
    fn identity(&self) -> String;

    /// Deterministic ordering for merged collections.
    fn canonical_cmp(&self, other: &Self) -> Ordering;

    /// Fold in data from a lower-priority duplicate. No-op by default.
    fn absorb(&mut self, _duplicate: &Self) {}
}
