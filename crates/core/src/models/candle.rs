use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregated::Entity;

/// Candle width for historical data requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleInterval {
    Minute,
    FiveMinute,
    FifteenMinute,
    Hour,
    Day,
}

impl CandleInterval {
    /// Interval segment used in Kite's historical endpoint.
    pub fn kite_code(&self) -> &'static str {
        match self {
            CandleInterval::Minute => "minute",
            CandleInterval::FiveMinute => "5minute",
            CandleInterval::FifteenMinute => "15minute",
            CandleInterval::Hour => "60minute",
            CandleInterval::Day => "day",
        }
    }

    /// Interval code used by Yahoo's chart API.
    pub fn yahoo_code(&self) -> &'static str {
        match self {
            CandleInterval::Minute => "1m",
            CandleInterval::FiveMinute => "5m",
            CandleInterval::FifteenMinute => "15m",
            CandleInterval::Hour => "1h",
            CandleInterval::Day => "1d",
        }
    }
}

impl std::fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kite_code())
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Entity for Candle {
    fn identity(&self) -> String {
        self.timestamp.to_rfc3339()
    }

    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.timestamp.cmp(&other.timestamp)
    }
}
