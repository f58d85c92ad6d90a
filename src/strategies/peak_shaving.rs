//! Peak shaving strategy (§4.7): discharge above a load threshold, charge
//! back up during the troughs.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::domain::{ForecastSeries, PlantState, Schedule, ScheduleEntry, Solver};
use crate::optimizer::BatteryConstraints;

use super::{mean, percentile, std_dev, Strategy, StrategyResult};

pub struct PeakShavingStrategy;

impl Strategy for PeakShavingStrategy {
    fn name(&self) -> &'static str {
        "peak_shaving"
    }

    fn required_forecast_keys(&self) -> &'static [&'static str] {
        &["load"]
    }

    fn evaluate(&self, _state: &PlantState, forecast: &ForecastSeries) -> Option<f64> {
        if forecast.load.is_empty() {
            return None;
        }
        let values: Vec<f64> = forecast.load.iter().map(|p| p.value).collect();
        let m = mean(&values);
        if m <= 0.0 {
            return Some(0.0);
        }
        let peak = values.iter().cloned().fold(f64::MIN, f64::max);
        let peak_ratio = (peak - m) / m;
        let cv = std_dev(&values) / m;
        Some(0.6 * (2.0 * peak_ratio).min(1.0) + 0.4 * (3.0 * cv).min(1.0))
    }

    fn optimize(
        &self,
        state: &PlantState,
        forecast: &ForecastSeries,
        constraints: &BatteryConstraints,
    ) -> StrategyResult {
        let values: Vec<f64> = forecast.load.iter().map(|p| p.value).collect();
        let threshold = percentile(&values, 0.75);

        let mut soc = state.soc_pct;
        let mut entries = Vec::with_capacity(forecast.load.len());

        for (i, point) in forecast.load.iter().enumerate() {
            let time_end = forecast
                .load
                .get(i + 1)
                .map(|n| n.timestamp)
                .unwrap_or(point.timestamp + chrono::Duration::hours(1));
            let dt_h = (time_end - point.timestamp).num_seconds() as f64 / 3600.0;

            let (net_kw, reason) = if point.value > threshold && soc > constraints.soc_min_percent {
                let discharge_kw = constraints.p_discharge_max_kw.min(point.value - threshold);
                soc -= (discharge_kw / constraints.efficiency_discharge * dt_h
                    / constraints.energy_capacity_kwh)
                    * 100.0;
                (discharge_kw, "peak_shaving:discharge")
            } else if point.value < 0.7 * threshold && soc < constraints.soc_max_percent {
                let charge_kw = constraints.p_charge_max_kw.min(0.5 * threshold);
                soc += (charge_kw * constraints.efficiency_charge * dt_h
                    / constraints.energy_capacity_kwh)
                    * 100.0;
                (-charge_kw, "peak_shaving:charge")
            } else {
                (0.0, "peak_shaving:idle")
            };

            soc = soc.clamp(constraints.soc_min_percent, constraints.soc_max_percent);
            entries.push(ScheduleEntry {
                time_start: point.timestamp,
                time_end,
                target_power_w: net_kw * 1000.0,
                reason: reason.to_string(),
            });
        }

        let now = Utc::now();
        let schedule = Schedule {
            id: Uuid::new_v4(),
            created_at: now,
            valid_from: entries.first().map(|e| e.time_start).unwrap_or(now),
            valid_until: entries.last().map(|e| e.time_end).unwrap_or(now),
            entries,
            optimizer_version: "peak_shaving-v1".to_string(),
            expected_revenue: 0.0,
            expected_cost: 0.0,
            expected_profit: 0.0,
            energy_charged_kwh: 0.0,
            energy_discharged_kwh: 0.0,
            cycles: 0.0,
            status: "heuristic".to_string(),
            solver: Solver::Fallback,
            soc_trajectory: None,
        };

        StrategyResult {
            strategy_name: self.name().to_string(),
            confidence: 0.8,
            metadata: json!({ "threshold_kw": threshold }),
            schedule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Region, SeriesPoint};

    fn make_forecast(load: &[f64]) -> ForecastSeries {
        let now = Utc::now();
        ForecastSeries {
            region: Region::At,
            generated_at: now,
            prices: Vec::new(),
            pv: Vec::new(),
            load: load
                .iter()
                .enumerate()
                .map(|(i, v)| SeriesPoint { timestamp: now + chrono::Duration::hours(i as i64), value: *v })
                .collect(),
        }
    }

    #[test]
    fn discharges_above_threshold_and_charges_below() {
        let strategy = PeakShavingStrategy;
        let state = PlantState::new(1);
        let forecast = make_forecast(&[1.0, 1.0, 1.0, 10.0, 0.1]);
        let constraints = BatteryConstraints::default();
        let result = strategy.optimize(&state, &forecast, &constraints);
        assert!(result.schedule.entries[3].target_power_w > 0.0);
    }

    #[test]
    fn spiky_load_scores_higher_than_flat_load() {
        let strategy = PeakShavingStrategy;
        let state = PlantState::new(1);
        let flat = make_forecast(&[5.0; 10]);
        let spiky = make_forecast(&[1.0, 1.0, 20.0, 1.0, 1.0]);
        assert!(strategy.evaluate(&state, &spiky).unwrap() > strategy.evaluate(&state, &flat).unwrap());
    }
}
