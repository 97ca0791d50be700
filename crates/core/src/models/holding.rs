use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::aggregated::Entity;

/// A position in the user's demat account, as reported by the broker.
///
/// Never persisted: every request reads it fresh from upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub tradingsymbol: String,
    pub exchange: String,
    pub isin: Option<String>,

    /// Settled plus T1 quantity; never negative.
    pub quantity: u64,

    /// Average acquisition price; never negative.
    pub average_price: f64,
    pub last_price: f64,
    pub close_price: f64,
    pub pnl: f64,
    pub day_change: f64,
    pub day_change_percentage: f64,
}

impl Holding {
    /// `EXCHANGE:TRADINGSYMBOL`, the key used for quotes as well.
    pub fn key(&self) -> String {
        format!("{}:{}", self.exchange, self.tradingsymbol)
    }

    pub fn current_value(&self) -> f64 {
        self.quantity as f64 * self.last_price
    }

    pub fn invested(&self) -> f64 {
        self.quantity as f64 * self.average_price
    }

    /// Return on cost in percent; 0 when the cost basis is zero.
    pub fn return_pct(&self) -> f64 {
        if self.average_price > 0.0 {
            (self.last_price - self.average_price) / self.average_price * 100.0
        } else {
            0.0
        }
    }

    /// Zeroed stand-in used when no source could deliver holdings and
    /// nothing was cached.
    pub fn placeholder(exchange: &str, tradingsymbol: &str) -> Self {
        Self {
            tradingsymbol: tradingsymbol.to_string(),
            exchange: exchange.to_string(),
            isin: None,
            quantity: 0,
            average_price: 0.0,
            last_price: 0.0,
            close_price: 0.0,
            pnl: 0.0,
            day_change: 0.0,
            day_change_percentage: 0.0,
        }
    }
}

impl Entity for Holding {
    fn identity(&self) -> String {
        self.key()
    }

    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}
