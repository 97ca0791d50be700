use std::collections::BTreeMap;

use chrono::Utc;

use crate::models::aggregated::AggregatedResult;
use crate::models::analytics::{
    AlertKind, AlertSeverity, HoldingPerformance, PortfolioAlert, PortfolioSummary,
};
use crate::models::holding::Holding;
use crate::models::news::{NewsEvent, Sentiment};
use crate::models::settings::Settings;

/// How many holdings appear in the best/worst lists.
const PERFORMER_COUNT: usize = 3;

/// Computes portfolio analytics: P&L, day change, allocation, concentration.
///
/// All values come from the holdings as reported by the broker
/// (quantity × last price); nothing is re-priced here.
pub struct AnalyticsService;

impl AnalyticsService {
    pub fn new() -> Self {
        Self
    }

    /// Summarize a holdings result.
    ///
    /// - Total value and investment
    /// - P&L and P&L % (0 when nothing is invested)
    /// - Value-weighted day change
    /// - Sector allocation from `settings.sector_mappings`
    /// - Best/worst performers by return on cost
    /// - Herfindahl concentration index over holding weights
    /// - Alerts against the thresholds in `settings`, plus one per negative
    ///   headline in `news` about a held symbol
    pub fn portfolio_summary(
        &self,
        holdings: &AggregatedResult<Holding>,
        news: &[NewsEvent],
        settings: &Settings,
    ) -> PortfolioSummary {
        let list: Vec<&Holding> = holdings.entities().filter(|h| h.quantity > 0).collect();

        let total_value: f64 = list.iter().map(|h| h.current_value()).sum();
        let total_investment: f64 = list.iter().map(|h| h.invested()).sum();
        let total_pnl = total_value - total_investment;
        let pnl_percentage = if total_investment > 0.0 {
            total_pnl / total_investment * 100.0
        } else {
            0.0
        };

        let day_change_percentage = if total_value > 0.0 {
            list.iter()
                .map(|h| h.current_value() * h.day_change_percentage)
                .sum::<f64>()
                / total_value
        } else {
            0.0
        };

        let weight = |h: &Holding| {
            if total_value > 0.0 {
                h.current_value() / total_value * 100.0
            } else {
                0.0
            }
        };

        let mut sector_allocation: BTreeMap<String, f64> = BTreeMap::new();
        for h in &list {
            *sector_allocation
                .entry(settings.sector_of(&h.tradingsymbol).to_string())
                .or_insert(0.0) += weight(*h);
        }

        let concentration_index = list.iter().map(|h| weight(*h).powi(2)).sum();

        let mut performance: Vec<HoldingPerformance> = list
            .iter()
            .map(|h| HoldingPerformance {
                symbol: h.key(),
                current_value: h.current_value(),
                return_pct: h.return_pct(),
                allocation_pct: weight(*h),
            })
            .collect();
        performance.sort_by(|a, b| {
            b.return_pct
                .total_cmp(&a.return_pct)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        let top_performers: Vec<HoldingPerformance> =
            performance.iter().take(PERFORMER_COUNT).cloned().collect();
        let worst_performers: Vec<HoldingPerformance> =
            performance.iter().rev().take(PERFORMER_COUNT).cloned().collect();

        let held: Vec<String> = list.iter().map(|h| h.key()).collect();
        let alerts = raise_alerts(&sector_allocation, concentration_index, &held, news, settings);

        PortfolioSummary {
            total_value,
            total_investment,
            total_pnl,
            pnl_percentage,
            day_change_percentage,
            sector_allocation,
            top_performers,
            worst_performers,
            concentration_index,
            holdings_count: list.len(),
            degraded: holdings.degraded,
            alerts,
            computed_at: Utc::now(),
        }
    }
}

fn raise_alerts(
    sector_allocation: &BTreeMap<String, f64>,
    concentration_index: f64,
    held: &[String],
    news: &[NewsEvent],
    settings: &Settings,
) -> Vec<PortfolioAlert> {
    let mut alerts = Vec::new();
    if held.is_empty() {
        return alerts;
    }
    let warning = |kind, message: String| PortfolioAlert {
        kind,
        severity: AlertSeverity::Warning,
        message,
        symbols: Vec::new(),
        url: None,
    };

    for (sector, pct) in sector_allocation {
        if *pct > settings.max_sector_pct {
            alerts.push(warning(
                AlertKind::SectorConcentration,
                format!("High concentration in {sector} sector ({pct:.2}%). Consider diversifying."),
            ));
        }
    }

    if sector_allocation.len() < settings.min_sectors {
        alerts.push(warning(
            AlertKind::SectorDiversification,
            format!(
                "Portfolio is concentrated in only {} sectors. Consider adding more sectors.",
                sector_allocation.len()
            ),
        ));
    }

    if concentration_index > settings.max_concentration_index {
        alerts.push(warning(
            AlertKind::HighConcentration,
            format!(
                "Portfolio is highly concentrated (HHI: {concentration_index:.2}). Consider diversifying."
            ),
        ));
    }

    for item in news.iter().filter(|n| n.sentiment == Some(Sentiment::Negative)) {
        let symbols: Vec<String> = item
            .symbols
            .iter()
            .filter(|s| held.contains(s))
            .cloned()
            .collect();
        if symbols.is_empty() {
            continue;
        }
        alerts.push(PortfolioAlert {
            kind: AlertKind::NegativeNews,
            severity: AlertSeverity::Info,
            message: format!("Negative news for {}: {}", symbols.join(", "), item.title),
            symbols,
            url: item.url.clone(),
        });
    }

    alerts
}

impl Default for AnalyticsService {
    fn default() -> Self {
        Self::new()
    }
}
