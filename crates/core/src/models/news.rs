use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregated::Entity;

/// Category of a news item, derived from its headline and summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsKind {
    News,
    Macro,
    Earnings,
    CorporateAction,
    Dividend,
}

const DIVIDEND_TERMS: &[&str] = &["dividend", "record date", "ex-date", "payout"];
const CORPORATE_ACTION_TERMS: &[&str] = &[
    "stock split",
    "split",
    "bonus issue",
    "bonus",
    "buyback",
    "buy-back",
    "rights issue",
    "merger",
    "acquisition",
    "acquire",
    "demerger",
    "delisting",
];
const EARNINGS_TERMS: &[&str] = &[
    "earnings",
    "quarterly results",
    "q1 results",
    "q2 results",
    "q3 results",
    "q4 results",
    "net profit",
    "revenue",
    "ebitda",
    "guidance",
];
const MACRO_TERMS: &[&str] = &[
    "rbi",
    "repo rate",
    "interest rate",
    "inflation",
    "gdp",
    "fiscal deficit",
    "monetary policy",
    "federal reserve",
    "fed ",
    "fii",
    "dii",
    "budget",
];

impl NewsKind {
    /// Keyword classification. Precedence is
    /// dividend > corporate action > earnings > macro > plain news.
    pub fn classify(title: &str, description: &str) -> Self {
        let text = format!("{} {}", title, description).to_lowercase();
        let hit = |terms: &[&str]| terms.iter().any(|t| text.contains(t));

        if hit(DIVIDEND_TERMS) {
            NewsKind::Dividend
        } else if hit(CORPORATE_ACTION_TERMS) {
            NewsKind::CorporateAction
        } else if hit(EARNINGS_TERMS) {
            NewsKind::Earnings
        } else if hit(MACRO_TERMS) {
            NewsKind::Macro
        } else {
            NewsKind::News
        }
    }
}

/// Sentiment label attached to a news item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    /// Lenient label parser for model output and provider labels
    /// ("Somewhat-Bullish", "POSITIVE", "neutral.").
    pub fn parse_label(label: &str) -> Option<Self> {
        let l = label.trim().to_lowercase();
        if l.contains("positive") || l.contains("bullish") {
            Some(Sentiment::Positive)
        } else if l.contains("negative") || l.contains("bearish") {
            Some(Sentiment::Negative)
        } else if l.contains("neutral") {
            Some(Sentiment::Neutral)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sentiment::Positive => write!(f, "positive"),
            Sentiment::Negative => write!(f, "negative"),
            Sentiment::Neutral => write!(f, "neutral"),
        }
    }
}

/// A news item relevant to one or more tracked symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsEvent {
    /// `<provider id>:<upstream id>`; unique across merged sources.
    pub id: String,
    pub kind: NewsKind,
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,

    /// Publisher name (e.g. "Economic Times").
    pub source: String,

    /// Symbols whose query surfaced this item.
    pub symbols: Vec<String>,
    pub sentiment: Option<Sentiment>,
}

impl NewsEvent {
    pub fn compose_id(provider: &str, upstream_id: &str) -> String {
        format!("{provider}:{upstream_id}")
    }
}

impl Entity for NewsEvent {
    fn identity(&self) -> String {
        self.id.clone()
    }

    /// Newest first; ties broken by id so the order is total.
    fn canonical_cmp(&self, other: &Self) -> Ordering {
        other
            .published_at
            .cmp(&self.published_at)
            .then_with(|| self.id.cmp(&other.id))
    }

    fn absorb(&mut self, duplicate: &Self) {
        for sym in &duplicate.symbols {
            if !self.symbols.contains(sym) {
                self.symbols.push(sym.clone());
            }
        }
        self.symbols.sort();
        if self.sentiment.is_none() {
            self.sentiment = duplicate.sentiment;
        }
    }
}
