//! Battery Constraints (§3): the physical envelope the LP optimizer and
//! strategies must respect.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatteryConstraints {
    pub energy_capacity_kwh: f64,
    pub p_charge_max_kw: f64,
    pub p_discharge_max_kw: f64,
    pub soc_min_percent: f64,
    pub soc_max_percent: f64,
    pub efficiency_charge: f64,
    pub efficiency_discharge: f64,
}

impl Default for BatteryConstraints {
    fn default() -> Self {
        Self {
            energy_capacity_kwh: 100.0,
            p_charge_max_kw: 50.0,
            p_discharge_max_kw: 50.0,
            soc_min_percent: 10.0,
            soc_max_percent: 95.0,
            efficiency_charge: 0.95,
            efficiency_discharge: 0.95,
        }
    }
}
