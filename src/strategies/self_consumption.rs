//! Self-consumption strategy (§4.7): shift PV surplus into the battery and
//! draw it back down during deficits. Internally tracked charge-positive;
//! negated at the [`Schedule`] boundary to keep the crate-wide
//! discharge-positive convention (§4.7, resolved Open Question (a)).

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::domain::{ForecastSeries, PlantState, Schedule, ScheduleEntry, Solver};
use crate::forecast::GridTariffSchedule;
use crate::optimizer::BatteryConstraints;

use super::{mean, Strategy, StrategyResult};

pub struct SelfConsumptionStrategy {
    pub tariff: Option<GridTariffSchedule>,
    pub flat_grid_rate_eur_per_kwh: f64,
    pub feedin_tariff_eur_per_kwh: f64,
}

impl Default for SelfConsumptionStrategy {
    fn default() -> Self {
        Self { tariff: None, flat_grid_rate_eur_per_kwh: 0.25, feedin_tariff_eur_per_kwh: 0.08 }
    }
}

impl SelfConsumptionStrategy {
    fn grid_rate_at(&self, timestamp: chrono::DateTime<Utc>) -> f64 {
        self.tariff.as_ref().map(|t| t.rate_at(timestamp)).unwrap_or(self.flat_grid_rate_eur_per_kwh)
    }
}

impl Strategy for SelfConsumptionStrategy {
    fn name(&self) -> &'static str {
        "self_consumption"
    }

    fn required_forecast_keys(&self) -> &'static [&'static str] {
        &["pv", "load"]
    }

    fn evaluate(&self, _state: &PlantState, forecast: &ForecastSeries) -> Option<f64> {
        if forecast.pv.is_empty() || forecast.load.is_empty() {
            return None;
        }
        let n = forecast.pv.len().min(forecast.load.len());
        let avg_pv = mean(&forecast.pv[..n].iter().map(|p| p.value).collect::<Vec<_>>());

        let (surplus, deficit): (Vec<f64>, Vec<f64>) = (0..n)
            .map(|i| forecast.pv[i].value - forecast.load[i].value)
            .fold((Vec::new(), Vec::new()), |(mut s, mut d), diff| {
                if diff > 0.0 {
                    s.push(diff);
                } else {
                    d.push(-diff);
                }
                (s, d)
            });
        let avg_surplus = mean(&surplus);
        let avg_deficit = mean(&deficit);

        Some(0.6 * (avg_pv / 10.0).min(1.0) + 0.4 * ((avg_surplus + avg_deficit) / 10.0).min(1.0))
    }

    fn optimize(
        &self,
        state: &PlantState,
        forecast: &ForecastSeries,
        constraints: &BatteryConstraints,
    ) -> StrategyResult {
        let n = forecast.pv.len().min(forecast.load.len());
        let mut soc = state.soc_pct;
        let mut entries = Vec::with_capacity(n);

        let mut grid_cost_with_battery = 0.0;
        let mut grid_cost_without_battery = 0.0;

        for i in 0..n {
            let pv = forecast.pv[i].value;
            let load = forecast.load[i].value;
            let timestamp = forecast.pv[i].timestamp;
            let time_end = forecast.pv.get(i + 1).map(|next| next.timestamp).unwrap_or(timestamp + chrono::Duration::hours(1));
            let dt_h = (time_end - timestamp).num_seconds() as f64 / 3600.0;
            let grid_rate = self.grid_rate_at(timestamp);

            let without_battery_import = (load - pv).max(0.0);
            let without_battery_export = (pv - load).max(0.0);
            grid_cost_without_battery +=
                without_battery_import * dt_h * grid_rate - without_battery_export * dt_h * self.feedin_tariff_eur_per_kwh;

            let (charge_positive_kw, reason) = if pv > load && soc < constraints.soc_max_percent {
                let charge_kw = constraints.p_charge_max_kw.min(pv - load);
                soc += (charge_kw * constraints.efficiency_charge * dt_h / constraints.energy_capacity_kwh) * 100.0;
                (charge_kw, "self_consumption:charge")
            } else if pv <= load && soc > constraints.soc_min_percent {
                let discharge_kw = constraints.p_discharge_max_kw.min(load - pv);
                soc -= (discharge_kw / constraints.efficiency_discharge * dt_h / constraints.energy_capacity_kwh) * 100.0;
                (-discharge_kw, "self_consumption:discharge")
            } else {
                (0.0, "self_consumption:idle")
            };
            soc = soc.clamp(constraints.soc_min_percent, constraints.soc_max_percent);

            let net_load_after_battery = load - pv + charge_positive_kw;
            let with_battery_import = net_load_after_battery.max(0.0);
            let with_battery_export = (-net_load_after_battery).max(0.0);
            grid_cost_with_battery +=
                with_battery_import * dt_h * grid_rate - with_battery_export * dt_h * self.feedin_tariff_eur_per_kwh;

            entries.push(ScheduleEntry {
                time_start: timestamp,
                time_end,
                target_power_w: -charge_positive_kw * 1000.0,
                reason: reason.to_string(),
            });
        }

        let savings = grid_cost_without_battery - grid_cost_with_battery;
        let now = Utc::now();
        let schedule = Schedule {
            id: Uuid::new_v4(),
            created_at: now,
            valid_from: entries.first().map(|e| e.time_start).unwrap_or(now),
            valid_until: entries.last().map(|e| e.time_end).unwrap_or(now),
            entries,
            optimizer_version: "self_consumption-v1".to_string(),
            expected_revenue: 0.0,
            expected_cost: 0.0,
            expected_profit: savings,
            energy_charged_kwh: 0.0,
            energy_discharged_kwh: 0.0,
            cycles: 0.0,
            status: "heuristic".to_string(),
            solver: Solver::Fallback,
            soc_trajectory: None,
        };

        StrategyResult {
            strategy_name: self.name().to_string(),
            confidence: 0.75,
            metadata: json!({ "grid_cost_savings_eur": savings }),
            schedule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Region, SeriesPoint};

    fn make_forecast(pv: &[f64], load: &[f64]) -> ForecastSeries {
        let now = Utc::now();
        let series = |values: &[f64]| {
            values
                .iter()
                .enumerate()
                .map(|(i, v)| SeriesPoint { timestamp: now + chrono::Duration::hours(i as i64), value: *v })
                .collect::<Vec<_>>()
        };
        ForecastSeries { region: Region::At, generated_at: now, prices: Vec::new(), pv: series(pv), load: series(load) }
    }

    #[test]
    fn charges_on_surplus_discharges_on_deficit() {
        let strategy = SelfConsumptionStrategy::default();
        let state = PlantState::new(1);
        let constraints = BatteryConstraints::default();
        let forecast = make_forecast(&[10.0, 0.0], &[2.0, 5.0]);
        let result = strategy.optimize(&state, &forecast, &constraints);
        assert!(result.schedule.entries[0].target_power_w < 0.0, "surplus hour should charge (negative net)");
        assert!(result.schedule.entries[1].target_power_w > 0.0, "deficit hour should discharge (positive net)");
    }
}
