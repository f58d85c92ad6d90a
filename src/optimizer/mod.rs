//! LP Optimizer (C6): solves the arbitrage schedule over a price forecast,
//! falling back to a percentile heuristic when the LP library is disabled
//! or the solve doesn't reach an optimal/near-optimal status.

pub mod constraints;

pub use constraints::BatteryConstraints;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Schedule, ScheduleEntry, Solver};

/// One hour (or sub-hour) price point driving the optimizer, in EUR/MWh.
#[derive(Debug, Clone, Copy)]
pub struct PricePoint {
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub price_eur_per_mwh: f64,
}

pub struct LpOptimizer {
    pub constraints: BatteryConstraints,
    optimizer_version: String,
}

impl LpOptimizer {
    pub fn new(constraints: BatteryConstraints) -> Self {
        Self { constraints, optimizer_version: "lp-v1".to_string() }
    }

    /// Entry point: attempt the LP solve, fall back to the heuristic when
    /// it fails or the feature is disabled (§4.6).
    pub fn optimize(&self, prices: &[PricePoint], soc0_percent: f64) -> Schedule {
        let now = Utc::now();

        if prices.is_empty() {
            return Schedule {
                id: Uuid::new_v4(),
                created_at: now,
                valid_from: now,
                valid_until: now,
                entries: Vec::new(),
                optimizer_version: self.optimizer_version.clone(),
                expected_revenue: 0.0,
                expected_cost: 0.0,
                expected_profit: 0.0,
                energy_charged_kwh: 0.0,
                energy_discharged_kwh: 0.0,
                cycles: 0.0,
                status: "no_data".to_string(),
                solver: Solver::NoData,
                soc_trajectory: None,
            };
        }

        #[cfg(feature = "optimization")]
        if let Some(schedule) = self.solve_lp(prices, soc0_percent) {
            return schedule;
        }

        self.solve_heuristic(prices, soc0_percent)
    }

    #[cfg(feature = "optimization")]
    fn solve_lp(&self, prices: &[PricePoint], soc0_percent: f64) -> Option<Schedule> {
        use good_lp::{constraint, variable, Expression, ProblemVariables, Solution, SolverModel};

        let now = Utc::now();
        let c = &self.constraints;
        let n = prices.len();

        let durations: Vec<f64> = prices
            .iter()
            .map(|p| (p.time_end - p.time_start).num_seconds() as f64 / 3600.0)
            .collect();
        let price_eur_per_kwh: Vec<f64> = prices.iter().map(|p| p.price_eur_per_mwh / 1000.0).collect();

        let mut vars = ProblemVariables::new();
        let p_c = vars.add_vector(variable().min(0.0).max(c.p_charge_max_kw), n);
        let p_d = vars.add_vector(variable().min(0.0).max(c.p_discharge_max_kw), n);
        let e = vars.add_vector(
            variable()
                .min(c.soc_min_percent / 100.0 * c.energy_capacity_kwh)
                .max(c.soc_max_percent / 100.0 * c.energy_capacity_kwh),
            n + 1,
        );

        let profit: Expression = (0..n)
            .map(|t| (p_d[t] - p_c[t]) * durations[t] * price_eur_per_kwh[t])
            .sum();

        let mut model = vars.maximise(profit).using(good_lp::default_solver);

        model = model.with(constraint!(e[0] == (soc0_percent / 100.0) * c.energy_capacity_kwh));
        for t in 0..n {
            model = model.with(constraint!(
                e[t + 1]
                    == e[t] + (c.efficiency_charge * p_c[t] - p_d[t] / c.efficiency_discharge) * durations[t]
            ));
        }

        let solution = model.solve().ok()?;

        let mut entries = Vec::with_capacity(n);
        let mut soc_trajectory = Vec::with_capacity(n + 1);
        let mut revenue = 0.0;
        let mut cost = 0.0;
        let mut charged_kwh = 0.0;
        let mut discharged_kwh = 0.0;

        soc_trajectory.push(soc0_percent);
        for t in 0..n {
            let charge_kw = solution.value(p_c[t]);
            let discharge_kw = solution.value(p_d[t]);
            let net_kw = discharge_kw - charge_kw;

            revenue += discharge_kw * durations[t] * price_eur_per_kwh[t];
            cost += charge_kw * durations[t] * price_eur_per_kwh[t];
            charged_kwh += charge_kw * durations[t];
            discharged_kwh += discharge_kw * durations[t];

            let soc_next = 100.0 * solution.value(e[t + 1]) / c.energy_capacity_kwh;
            soc_trajectory.push(soc_next.clamp(c.soc_min_percent, c.soc_max_percent));

            let reason = if net_kw > 0.01 {
                "lp:discharge"
            } else if net_kw < -0.01 {
                "lp:charge"
            } else {
                "lp:idle"
            };
            entries.push(ScheduleEntry {
                time_start: prices[t].time_start,
                time_end: prices[t].time_end,
                target_power_w: net_kw * 1000.0,
                reason: reason.to_string(),
            });
        }

        let cycles = (charged_kwh + discharged_kwh) / 2.0 / c.energy_capacity_kwh.max(0.001);

        Some(Schedule {
            id: Uuid::new_v4(),
            created_at: now,
            valid_from: entries.first().map(|e| e.time_start).unwrap_or(now),
            valid_until: entries.last().map(|e| e.time_end).unwrap_or(now),
            entries,
            optimizer_version: self.optimizer_version.clone(),
            expected_revenue: revenue,
            expected_cost: cost,
            expected_profit: revenue - cost,
            energy_charged_kwh: charged_kwh,
            energy_discharged_kwh: discharged_kwh,
            cycles,
            status: "optimal".to_string(),
            solver: Solver::Lp,
            soc_trajectory: Some(soc_trajectory),
        })
    }

    /// Q1/Q3 price-percentile heuristic, also the path taken when the LP
    /// feature is compiled out (§4.6).
    fn solve_heuristic(&self, prices: &[PricePoint], soc0_percent: f64) -> Schedule {
        let now = Utc::now();
        let c = &self.constraints;

        let (q1, q3) = price_quartiles(prices);

        let mut soc = soc0_percent;
        let mut entries = Vec::with_capacity(prices.len());
        let mut soc_trajectory = Vec::with_capacity(prices.len() + 1);
        soc_trajectory.push(soc);

        let mut revenue = 0.0;
        let mut cost = 0.0;
        let mut charged_kwh = 0.0;
        let mut discharged_kwh = 0.0;

        for p in prices {
            let dt_h = (p.time_end - p.time_start).num_seconds() as f64 / 3600.0;
            let price_eur_per_kwh = p.price_eur_per_mwh / 1000.0;

            let (net_kw, reason) = if p.price_eur_per_mwh <= q1 && soc < c.soc_max_percent {
                let headroom_kwh = (c.soc_max_percent - soc) / 100.0 * c.energy_capacity_kwh;
                let charge_kw = c.p_charge_max_kw.min(headroom_kwh / dt_h.max(0.001));
                soc += (charge_kw * c.efficiency_charge * dt_h / c.energy_capacity_kwh) * 100.0;
                charged_kwh += charge_kw * dt_h;
                cost += charge_kw * dt_h * price_eur_per_kwh;
                (-charge_kw, "heuristic:charge")
            } else if p.price_eur_per_mwh >= q3 && soc > c.soc_min_percent {
                let available_kwh = (soc - c.soc_min_percent) / 100.0 * c.energy_capacity_kwh;
                let discharge_kw = c.p_discharge_max_kw.min(available_kwh / dt_h.max(0.001));
                soc -= (discharge_kw / c.efficiency_discharge * dt_h / c.energy_capacity_kwh) * 100.0;
                discharged_kwh += discharge_kw * dt_h;
                revenue += discharge_kw * dt_h * price_eur_per_kwh;
                (discharge_kw, "heuristic:discharge")
            } else {
                (0.0, "heuristic:idle")
            };

            soc = soc.clamp(c.soc_min_percent, c.soc_max_percent);
            soc_trajectory.push(soc);

            entries.push(ScheduleEntry {
                time_start: p.time_start,
                time_end: p.time_end,
                target_power_w: net_kw * 1000.0,
                reason: reason.to_string(),
            });
        }

        let cycles = (charged_kwh + discharged_kwh) / 2.0 / c.energy_capacity_kwh.max(0.001);

        Schedule {
            id: Uuid::new_v4(),
            created_at: now,
            valid_from: entries.first().map(|e| e.time_start).unwrap_or(now),
            valid_until: entries.last().map(|e| e.time_end).unwrap_or(now),
            entries,
            optimizer_version: self.optimizer_version.clone(),
            expected_revenue: revenue,
            expected_cost: cost,
            expected_profit: revenue - cost,
            energy_charged_kwh: charged_kwh,
            energy_discharged_kwh: discharged_kwh,
            cycles,
            status: "heuristic".to_string(),
            solver: Solver::Fallback,
            soc_trajectory: Some(soc_trajectory),
        }
    }
}

/// Returns `(Q1, Q3)` of the price window using linear interpolation between
/// closest ranks.
fn price_quartiles(prices: &[PricePoint]) -> (f64, f64) {
    let mut sorted: Vec<f64> = prices.iter().map(|p| p.price_eur_per_mwh).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    (percentile(&sorted, 0.25), percentile(&sorted, 0.75))
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_prices(values: &[f64]) -> Vec<PricePoint> {
        let now = Utc::now();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| PricePoint {
                time_start: now + chrono::Duration::hours(i as i64),
                time_end: now + chrono::Duration::hours(i as i64 + 1),
                price_eur_per_mwh: *v,
            })
            .collect()
    }

    #[test]
    fn empty_prices_yield_no_data_schedule() {
        let optimizer = LpOptimizer::new(BatteryConstraints::default());
        let schedule = optimizer.optimize(&[], 50.0);
        assert_eq!(schedule.solver, Solver::NoData);
        assert_eq!(schedule.status, "no_data");
        assert!(schedule.entries.is_empty());
    }

    #[test]
    fn heuristic_charges_on_cheap_hours_and_discharges_on_expensive_hours() {
        let optimizer = LpOptimizer::new(BatteryConstraints::default());
        let prices = make_prices(&[10.0, 20.0, 30.0, 200.0, 210.0, 220.0]);
        let schedule = optimizer.solve_heuristic(&prices, 50.0);

        assert_eq!(schedule.solver, Solver::Fallback);
        assert!(schedule.entries[0].target_power_w < 0.0, "cheapest hour should charge");
        assert!(schedule.entries[5].target_power_w > 0.0, "most expensive hour should discharge");
    }

    #[test]
    fn heuristic_keeps_soc_within_bounds() {
        let optimizer = LpOptimizer::new(BatteryConstraints::default());
        let prices = make_prices(&[vec![5.0; 20], vec![300.0; 20]].concat());
        let schedule = optimizer.solve_heuristic(&prices, 50.0);
        let trajectory = schedule.soc_trajectory.unwrap();
        assert!(trajectory.iter().all(|&s| (10.0..=95.0).contains(&s)));
    }

    #[test]
    fn percentile_matches_known_quartiles() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&sorted, 0.25) - 1.75).abs() < 1e-9);
        assert!((percentile(&sorted, 0.75) - 3.25).abs() < 1e-9);
    }
}
