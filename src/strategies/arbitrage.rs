//! Arbitrage strategy (§4.7): delegates scheduling straight to the LP
//! Optimizer (C6), scored by how wide and volatile the price spread is.

use serde_json::json;

use crate::domain::{ForecastSeries, PlantState};
use crate::optimizer::{BatteryConstraints, LpOptimizer, PricePoint};

use super::{mean, std_dev, Strategy, StrategyResult};

pub struct ArbitrageStrategy {
    /// EUR/MWh spread below which arbitrage is considered not worthwhile.
    pub min_spread_eur_per_mwh: f64,
    /// EUR profit floor below which confidence is discounted.
    pub min_profit_threshold_eur: f64,
}

impl Default for ArbitrageStrategy {
    fn default() -> Self {
        Self { min_spread_eur_per_mwh: 20.0, min_profit_threshold_eur: 5.0 }
    }
}

impl Strategy for ArbitrageStrategy {
    fn name(&self) -> &'static str {
        "arbitrage"
    }

    fn required_forecast_keys(&self) -> &'static [&'static str] {
        &["prices"]
    }

    fn evaluate(&self, _state: &PlantState, forecast: &ForecastSeries) -> Option<f64> {
        if forecast.prices.is_empty() {
            return None;
        }
        let values: Vec<f64> = forecast.prices.iter().map(|p| p.value).collect();
        let spread = values.iter().cloned().fold(f64::MIN, f64::max)
            - values.iter().cloned().fold(f64::MAX, f64::min);
        let stddev = std_dev(&values);

        let spread_term = (spread / 100.0).min(1.0)
            * if spread < self.min_spread_eur_per_mwh { 0.5 } else { 1.0 };
        let volatility_term = (stddev / 30.0).min(1.0);
        Some(0.7 * spread_term + 0.3 * volatility_term)
    }

    fn optimize(
        &self,
        state: &PlantState,
        forecast: &ForecastSeries,
        constraints: &BatteryConstraints,
    ) -> StrategyResult {
        let prices: Vec<PricePoint> = forecast
            .prices
            .iter()
            .zip(forecast.prices.iter().skip(1).map(Some).chain(std::iter::once(None)))
            .map(|(p, next)| PricePoint {
                time_start: p.timestamp,
                time_end: next.map(|n| n.timestamp).unwrap_or(p.timestamp + chrono::Duration::hours(1)),
                price_eur_per_mwh: p.value,
            })
            .collect();

        let optimizer = LpOptimizer::new(*constraints);
        let schedule = optimizer.optimize(&prices, state.soc_pct);

        let mut confidence = match schedule.status.as_str() {
            "optimal" => 1.0,
            "optimal_inaccurate" => 0.85,
            _ => 0.7,
        };
        if schedule.expected_profit < self.min_profit_threshold_eur {
            confidence *= 0.6;
        }

        StrategyResult {
            strategy_name: self.name().to_string(),
            confidence,
            metadata: json!({ "solver": schedule.solver, "status": schedule.status }),
            schedule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::domain::{Region, SeriesPoint};

    fn make_forecast(prices: &[f64]) -> ForecastSeries {
        let now = Utc::now();
        ForecastSeries {
            region: Region::At,
            generated_at: now,
            prices: prices
                .iter()
                .enumerate()
                .map(|(i, v)| SeriesPoint { timestamp: now + chrono::Duration::hours(i as i64), value: *v })
                .collect(),
            pv: Vec::new(),
            load: Vec::new(),
        }
    }

    #[test]
    fn evaluate_returns_none_without_prices() {
        let strategy = ArbitrageStrategy::default();
        let state = PlantState::new(1);
        let forecast = make_forecast(&[]);
        assert!(strategy.evaluate(&state, &forecast).is_none());
    }

    #[test]
    fn wide_spread_scores_higher_than_flat_prices() {
        let strategy = ArbitrageStrategy::default();
        let state = PlantState::new(1);
        let flat = make_forecast(&[50.0; 24]);
        let wide = make_forecast(&[10.0, 200.0, 10.0, 200.0]);
        let flat_score = strategy.evaluate(&state, &flat).unwrap();
        let wide_score = strategy.evaluate(&state, &wide).unwrap();
        assert!(wide_score > flat_score);
    }
}
