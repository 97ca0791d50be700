use serde::{Deserialize, Serialize};

/// The logical entity a caller asks for.
/// Determines which providers (and in which order) serve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Demat holdings: broker only
    Holdings,
    /// Live quotes: broker, then public quote APIs
    Quotes,
    /// Historical OHLCV candles
    Candles,
    /// News items per symbol
    News,
    /// Sentiment labels for headlines
    Sentiment,
}

impl DataKind {
    pub const ALL: [DataKind; 5] = [
        DataKind::Holdings,
        DataKind::Quotes,
        DataKind::Candles,
        DataKind::News,
        DataKind::Sentiment,
    ];

    /// Key used in configuration maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Holdings => "holdings",
            DataKind::Quotes => "quotes",
            DataKind::Candles => "candles",
            DataKind::News => "news",
            DataKind::Sentiment => "sentiment",
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
