use async_trait::async_trait;

use crate::errors::CoreError;
use crate::models::data_kind::DataKind;
use crate::models::news::Sentiment;
use super::traits::MarketDataProvider;

const POSITIVE_TERMS: &[&str] = &[
    "surge", "soar", "jump", "rally", "gain", "rise", "record high", "beat", "upgrade",
    "profit", "growth", "bullish", "outperform", "strong", "wins", "order win", "dividend",
];

const NEGATIVE_TERMS: &[&str] = &[
    "plunge", "slump", "fall", "drop", "decline", "loss", "miss", "downgrade", "bearish",
    "weak", "inquiry", "penalty", "fraud", "default", "lawsuit", "crash", "cut",
];

/// Offline sentiment heuristic: counts positive and negative keywords.
/// Never fails, so it terminates the sentiment chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordSentimentProvider;

impl KeywordSentimentProvider {
    pub fn score(text: &str) -> Sentiment {
        let lower = text.to_lowercase();
        let count = |terms: &[&str]| terms.iter().filter(|t| lower.contains(*t)).count();
        let (pos, neg) = (count(POSITIVE_TERMS), count(NEGATIVE_TERMS));
        match pos.cmp(&neg) {
            std::cmp::Ordering::Greater => Sentiment::Positive,
            std::cmp::Ordering::Less => Sentiment::Negative,
            std::cmp::Ordering::Equal => Sentiment::Neutral,
        }
    }
}

#[async_trait]
impl MarketDataProvider for KeywordSentimentProvider {
    fn id(&self) -> &str {
        "keywords"
    }

    fn name(&self) -> &str {
        "Keyword heuristics"
    }

    fn supported_kinds(&self) -> Vec<DataKind> {
        vec![DataKind::Sentiment]
    }

    async fn classify_sentiment(&self, texts: &[String]) -> Result<Vec<Sentiment>, CoreError> {
        Ok(texts.iter().map(|t| Self::score(t)).collect())
    }
}
