//! Load balancing strategy (§4.7): smooths `net_load = load − pv` toward a
//! centered 3-point moving average, covering the gap with the battery.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::domain::{ForecastSeries, PlantState, Schedule, ScheduleEntry, Solver};
use crate::optimizer::BatteryConstraints;

use super::{mean, std_dev, Strategy, StrategyResult};

pub struct LoadBalancingStrategy;

const WINDOW: usize = 3;

fn net_load(forecast: &ForecastSeries) -> Vec<f64> {
    let n = forecast.load.len();
    (0..n)
        .map(|i| {
            let pv = forecast.pv.get(i).map(|p| p.value).unwrap_or(0.0);
            forecast.load[i].value - pv
        })
        .collect()
}

/// Centered moving average with a window of 3, shrinking at the edges.
fn centered_moving_average(values: &[f64]) -> Vec<f64> {
    let half = WINDOW / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            mean(&values[lo..hi])
        })
        .collect()
}

impl Strategy for LoadBalancingStrategy {
    fn name(&self) -> &'static str {
        "load_balancing"
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
        let cv = std_dev(&values) / m;

        let gradients: Vec<f64> = values.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
        let gradient_term = mean(&gradients) / m;

        Some(0.5 * cv.min(1.0) + 0.5 * gradient_term.min(1.0))
    }

    fn optimize(
        &self,
        state: &PlantState,
        forecast: &ForecastSeries,
        constraints: &BatteryConstraints,
    ) -> StrategyResult {
        let net = net_load(forecast);
        let target = centered_moving_average(&net);

        let mut soc = state.soc_pct;
        let mut entries = Vec::with_capacity(forecast.load.len());

        for i in 0..forecast.load.len() {
            let timestamp = forecast.load[i].timestamp;
            let time_end = forecast
                .load
                .get(i + 1)
                .map(|next| next.timestamp)
                .unwrap_or(timestamp + chrono::Duration::hours(1));
            let dt_h = (time_end - timestamp).num_seconds() as f64 / 3600.0;

            let setpoint_kw = net[i] - target[i];
            let (net_kw, reason) = if setpoint_kw > 0.0 {
                let discharge_kw = constraints
                    .p_discharge_max_kw
                    .min(setpoint_kw)
                    .min(((soc - constraints.soc_min_percent) / 100.0 * constraints.energy_capacity_kwh
                        / dt_h.max(0.001))
                    .max(0.0));
                soc -= (discharge_kw / constraints.efficiency_discharge * dt_h / constraints.energy_capacity_kwh) * 100.0;
                (discharge_kw, "load_balancing:discharge")
            } else if setpoint_kw < 0.0 {
                let charge_kw = constraints
                    .p_charge_max_kw
                    .min(-setpoint_kw)
                    .min(((constraints.soc_max_percent - soc) / 100.0 * constraints.energy_capacity_kwh
                        / dt_h.max(0.001))
                    .max(0.0));
                soc += (charge_kw * constraints.efficiency_charge * dt_h / constraints.energy_capacity_kwh) * 100.0;
                (-charge_kw, "load_balancing:charge")
            } else {
                (0.0, "load_balancing:idle")
            };
            soc = soc.clamp(constraints.soc_min_percent, constraints.soc_max_percent);

            entries.push(ScheduleEntry {
                time_start: timestamp,
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
            optimizer_version: "load_balancing-v1".to_string(),
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
            confidence: 0.7,
            metadata: json!({ "window": WINDOW }),
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
    fn smooths_a_single_spike() {
        let strategy = LoadBalancingStrategy;
        let state = PlantState::new(1);
        let constraints = BatteryConstraints::default();
        let forecast = make_forecast(&[2.0, 2.0, 20.0, 2.0, 2.0]);
        let result = strategy.optimize(&state, &forecast, &constraints);
        assert!(result.schedule.entries[2].target_power_w > 0.0, "spike should trigger discharge");
    }

    #[test]
    fn centered_average_handles_edges() {
        let avg = centered_moving_average(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(avg.len(), 4);
    }
}
