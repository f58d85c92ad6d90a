//! Strategy Set (C7) and Strategy Selector (C8).

pub mod arbitrage;
pub mod load_balancing;
pub mod peak_shaving;
pub mod selector;
pub mod self_consumption;

pub use arbitrage::ArbitrageStrategy;
pub use load_balancing::LoadBalancingStrategy;
pub use peak_shaving::PeakShavingStrategy;
pub use selector::StrategySelector;
pub use self_consumption::SelfConsumptionStrategy;

use crate::domain::{ForecastSeries, PlantState, Schedule};
use crate::optimizer::BatteryConstraints;

/// Schedule plus the provenance the selector and API surface need (§3
/// Strategy Result).
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub schedule: Schedule,
    pub strategy_name: String,
    pub confidence: f64,
    pub metadata: serde_json::Value,
}

/// A pluggable scheduling strategy (§4.7): scores itself against the
/// current state/forecast so the selector (C8) can pick among strategies,
/// then produces a schedule when chosen.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Forecast series this strategy needs before it can evaluate/optimize.
    fn required_forecast_keys(&self) -> &'static [&'static str];

    /// Returns `None` when a required forecast series is missing.
    fn evaluate(&self, state: &PlantState, forecast: &ForecastSeries) -> Option<f64>;

    fn optimize(
        &self,
        state: &PlantState,
        forecast: &ForecastSeries,
        constraints: &BatteryConstraints,
    ) -> StrategyResult;
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

pub(crate) fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
    }
}
