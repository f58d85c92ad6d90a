//! Telemetry Sample (§3): a timestamped, source-tagged snapshot produced by
//! the Modbus poller (C2), the MQTT ingestor (C3), or synthesized during
//! staleness fallback (C4).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySource {
    Modbus,
    Mqtt,
    Simulation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: Option<DateTime<Utc>>,
    pub soc_pct: Option<f64>,
    pub soh_pct: Option<f64>,
    pub p_bess_kw: Option<f64>,
    pub p_pv_kw: Option<f64>,
    pub p_load_kw: Option<f64>,
    pub p_grid_kw: Option<f64>,
    pub voltage_v: Option<f64>,
    pub current_a: Option<f64>,
    pub temperature_c: Option<f64>,
    pub status_code: Option<i64>,
    pub status_text: Option<String>,
    pub max_charge_power_kw: Option<f64>,
    pub max_discharge_power_kw: Option<f64>,
    pub max_charge_current_a: Option<f64>,
    pub max_discharge_current_a: Option<f64>,
    pub insulation_kohm: Option<f64>,
    pub active_alarms: Vec<String>,
    #[serde(default)]
    pub raw: HashMap<String, Value>,
}

impl TelemetrySample {
    /// Derive `p_bess_kw` from volts/amps when it wasn't supplied directly
    /// (§3 Telemetry Sample, "Derived").
    pub fn fill_derived(&mut self) {
        if self.p_bess_kw.is_none() {
            if let (Some(v), Some(a)) = (self.voltage_v, self.current_a) {
                self.p_bess_kw = Some(v * a / 1000.0);
            }
        }
    }

    pub fn has_alarm(&self) -> bool {
        !self.active_alarms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_power_from_voltage_and_current() {
        let mut s = TelemetrySample {
            voltage_v: Some(400.0),
            current_a: Some(10.0),
            ..Default::default()
        };
        s.fill_derived();
        assert_eq!(s.p_bess_kw, Some(4.0));
    }

    #[test]
    fn does_not_override_explicit_power() {
        let mut s = TelemetrySample {
            voltage_v: Some(400.0),
            current_a: Some(10.0),
            p_bess_kw: Some(99.0),
            ..Default::default()
        };
        s.fill_derived();
        assert_eq!(s.p_bess_kw, Some(99.0));
    }
}
