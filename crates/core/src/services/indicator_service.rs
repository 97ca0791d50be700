use crate::errors::CoreError;
use crate::models::analytics::{BollingerBands, Macd, Signal, TechnicalSnapshot};
use crate::models::candle::Candle;

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_WIDTH: f64 = 2.0;

/// Technical indicators over a candle series.
///
/// Pure computation: RSI (Wilder smoothing), MACD, Bollinger bands and a
/// vote-based BUY/SELL/HOLD signal. Indicators that need more history
/// than provided are `None`.
pub struct IndicatorService;

impl IndicatorService {
    pub fn new() -> Self {
        Self
    }

    /// Compute the latest indicator values for `candles` (any order).
    pub fn snapshot(
        &self,
        symbol: &str,
        candles: &[Candle],
        source: &str,
    ) -> Result<TechnicalSnapshot, CoreError> {
        let mut sorted: Vec<&Candle> = candles.iter().collect();
        sorted.sort_by_key(|c| c.timestamp);
        let closes: Vec<f64> = sorted.iter().map(|c| c.close).collect();

        let last_close = *closes
            .last()
            .ok_or_else(|| CoreError::Validation(format!("no candles for {symbol}")))?;

        let rsi = rsi(&closes, RSI_PERIOD);
        let macd = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        let bollinger = bollinger(&closes, BOLLINGER_PERIOD, BOLLINGER_WIDTH);

        Ok(TechnicalSnapshot {
            symbol: symbol.to_string(),
            last_close,
            rsi,
            macd,
            bollinger,
            signal: vote(last_close, rsi, macd, bollinger),
            source: source.to_string(),
            candles_used: closes.len(),
        })
    }
}

impl Default for IndicatorService {
    fn default() -> Self {
        Self::new()
    }
}

/// Relative strength index with Wilder smoothing. Needs `period + 1` closes.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = deltas[..period].iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss = -deltas[..period].iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;

    for d in &deltas[period..] {
        let (gain, loss) = if *d > 0.0 { (*d, 0.0) } else { (0.0, -*d) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Exponential moving average series seeded with the SMA of the first
/// `period` values. Element `i` corresponds to input `i + period - 1`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out.push(prev);
    for v in &values[period..] {
        prev = (v - prev) * k + prev;
        out.push(prev);
    }
    out
}

/// MACD line, signal line and histogram at the last close.
/// Needs `slow + signal - 1` closes.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast >= slow || closes.len() < slow + signal - 1 {
        return None;
    }
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    // Align: slow_ema[0] sits at close index slow - 1, fast_ema[0] at fast - 1.
    let offset = slow - fast;
    let line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, s)| fast_ema[i + offset] - s)
        .collect();

    let signal_line = ema(&line, signal);
    let macd = *line.last()?;
    let signal = *signal_line.last()?;
    Some(Macd {
        macd,
        signal,
        histogram: macd - signal,
    })
}

/// Bollinger bands over the last `period` closes (population σ).
pub fn bollinger(closes: &[f64], period: usize, width: f64) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / period as f64;
    let sd = variance.sqrt();
    Some(BollingerBands {
        upper: mean + width * sd,
        middle: mean,
        lower: mean - width * sd,
    })
}

/// One vote per indicator: oversold RSI, positive MACD histogram and a
/// close under the lower band vote BUY; the mirror conditions vote SELL.
/// Two net votes are needed for a BUY or SELL, otherwise HOLD.
pub fn vote(
    last_close: f64,
    rsi: Option<f64>,
    macd: Option<Macd>,
    bands: Option<BollingerBands>,
) -> Signal {
    let mut score = 0i32;
    if let Some(r) = rsi {
        if r < 30.0 {
            score += 1;
        } else if r > 70.0 {
            score -= 1;
        }
    }
    if let Some(m) = macd {
        if m.histogram > 0.0 {
            score += 1;
        } else if m.histogram < 0.0 {
            score -= 1;
        }
    }
    if let Some(b) = bands {
        if last_close < b.lower {
            score += 1;
        } else if last_close > b.upper {
            score -= 1;
        }
    }
    match score {
        s if s >= 2 => Signal::Buy,
        s if s <= -2 => Signal::Sell,
        _ => Signal::Hold,
    }
}
