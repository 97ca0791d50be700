use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of the user's holdings at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSummary {
    /// Sum of quantity × last price
    pub total_value: f64,

    /// Sum of quantity × average price
    pub total_investment: f64,

    /// total_value - total_investment
    pub total_pnl: f64,

    /// (total_pnl / total_investment) × 100, 0 when nothing is invested
    pub pnl_percentage: f64,

    /// Value-weighted day change across holdings, in percent
    pub day_change_percentage: f64,

    /// Sector → share of total value in percent
    pub sector_allocation: BTreeMap<String, f64>,

    /// Best holdings by return on cost, highest first
    pub top_performers: Vec<HoldingPerformance>,

    /// Worst holdings by return on cost, lowest first
    pub worst_performers: Vec<HoldingPerformance>,

    /// Herfindahl–Hirschman index of holding weights (0–10 000).
    pub concentration_index: f64,

    pub holdings_count: usize,

    /// Holdings came from placeholders or the last-known-good cache.
    pub degraded: bool,

    /// Diversification and news warnings, in rule order.
    pub alerts: Vec<PortfolioAlert>,

    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// One sector holds more than the configured share of value.
    SectorConcentration,
    /// Fewer sectors than the configured minimum.
    SectorDiversification,
    /// Herfindahl index above the configured ceiling.
    HighConcentration,
    /// A negative headline about a held symbol.
    NegativeNews,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
}

/// One finding raised while summarizing a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,

    /// Held symbols the alert is about; empty for portfolio-wide alerts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingPerformance {
    pub symbol: String,
    pub current_value: f64,
    pub return_pct: f64,
    pub allocation_pct: f64,
}

/// Trading bias derived from indicator votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Latest indicator values for one symbol, computed from daily closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub symbol: String,
    pub last_close: f64,

    /// RSI(14); `None` with fewer than 15 closes.
    pub rsi: Option<f64>,

    /// MACD(12, 26, 9); `None` with fewer than 35 closes.
    pub macd: Option<Macd>,

    /// Bollinger(20, 2σ); `None` with fewer than 20 closes.
    pub bollinger: Option<BollingerBands>,

    pub signal: Signal,

    /// Provider that served the candles.
    pub source: String,
    pub candles_used: usize,
}
