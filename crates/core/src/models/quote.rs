use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aggregated::Entity;

/// Default exchange when a caller passes a bare tradingsymbol.
pub const DEFAULT_EXCHANGE: &str = "NSE";

/// Canonical market quote for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// `EXCHANGE:TRADINGSYMBOL`, e.g. "NSE:RELIANCE".
    pub symbol: String,
    pub last_price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,

    /// Previous session close; the reference for change calculations.
    pub close: f64,
    pub volume: u64,
    pub change: f64,
    pub change_percent: f64,
    pub timestamp: Option<DateTime<Utc>>,

    /// Broker instrument id, when the source exposes one.
    #[serde(default)]
    pub instrument_token: Option<u64>,
}

impl Quote {
    pub fn exchange(&self) -> &str {
        split_symbol(&self.symbol).0
    }

    pub fn tradingsymbol(&self) -> &str {
        split_symbol(&self.symbol).1
    }

    pub fn placeholder(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            last_price: 0.0,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            volume: 0,
            change: 0.0,
            change_percent: 0.0,
            timestamp: None,
            instrument_token: None,
        }
    }
}

impl Entity for Quote {
    fn identity(&self) -> String {
        self.symbol.clone()
    }

    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.symbol.cmp(&other.symbol)
    }
}

/// Canonicalize a caller-supplied symbol to `EXCHANGE:TRADINGSYMBOL`.
///
/// Bare symbols get [`DEFAULT_EXCHANGE`]; both halves are trimmed and
/// uppercased. Returns `None` for an empty symbol.
pub fn canonical_symbol(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (exchange, symbol) = match raw.split_once(':') {
        Some((ex, sym)) => (ex.trim(), sym.trim()),
        None => (DEFAULT_EXCHANGE, raw),
    };
    if exchange.is_empty() || symbol.is_empty() {
        return None;
    }
    Some(format!(
        "{}:{}",
        exchange.to_uppercase(),
        symbol.to_uppercase()
    ))
}

/// Split `EXCHANGE:SYMBOL` into its halves. Bare symbols map to the default exchange.
pub fn split_symbol(symbol: &str) -> (&str, &str) {
    symbol
        .split_once(':')
        .unwrap_or((DEFAULT_EXCHANGE, symbol))
}

/// Derive `(change, change_percent)` for a quote.
///
/// A non-zero supplied value wins; otherwise both are computed from the
/// reference price. Returns `None` when a supplied value and the derived one
/// point in opposite directions, which means the upstream record is
/// inconsistent.
pub fn derive_change(
    last: f64,
    reference: f64,
    supplied_change: Option<f64>,
    supplied_pct: Option<f64>,
) -> Option<(f64, f64)> {
    let derived_change = if reference > 0.0 { last - reference } else { 0.0 };
    let derived_pct = if reference > 0.0 {
        derived_change / reference * 100.0
    } else {
        0.0
    };

    let nonzero = |v: Option<f64>| v.filter(|x| x.is_finite() && *x != 0.0);
    let change = nonzero(supplied_change);
    let pct = nonzero(supplied_pct);

    for supplied in [change, pct].into_iter().flatten() {
        if derived_change != 0.0 && supplied.signum() != derived_change.signum() {
            return None;
        }
    }
    if let (Some(c), Some(p)) = (change, pct) {
        if c.signum() != p.signum() {
            return None;
        }
    }

    let change_out = change.unwrap_or(derived_change);
    let pct_out = match pct {
        Some(p) => p,
        None if reference > 0.0 => change_out / reference * 100.0,
        None => match change {
            // No reference: back out the reference from last and the change.
            Some(c) if last - c > 0.0 => c / (last - c) * 100.0,
            _ => derived_pct,
        },
    };
    Some((change_out, pct_out))
}
