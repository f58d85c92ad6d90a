//! Power Control Manager (C9): safety/DSO precedence chain and feed-in
//! limitation ahead of every Modbus write.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::modbus::transport::ModbusTransport;
use crate::modbus::RegisterEngine;
use crate::optimizer::BatteryConstraints;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedInMode {
    Fixed,
    Dynamic,
}

/// A `HH:MM`–`HH:MM` window, wrapping past midnight when `start > end`
/// (mirrors the Grid Tariff Schedule's window arithmetic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedInRule {
    pub start_minute: u32,
    pub end_minute: u32,
    pub limit_pct: f64,
}

impl FeedInRule {
    fn contains(&self, minute_of_day: u32) -> bool {
        if self.start_minute <= self.end_minute {
            minute_of_day >= self.start_minute && minute_of_day < self.end_minute
        } else {
            minute_of_day >= self.start_minute || minute_of_day < self.end_minute
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedInConfig {
    pub mode: FeedInMode,
    pub fixed_limit_pct: f64,
    pub pv_integration_enabled: bool,
    pub dynamic_rules: Vec<FeedInRule>,
}

impl Default for FeedInConfig {
    fn default() -> Self {
        Self { mode: FeedInMode::Fixed, fixed_limit_pct: 100.0, pv_integration_enabled: false, dynamic_rules: Vec::new() }
    }
}

impl FeedInConfig {
    fn limit_pct_at(&self, now: DateTime<Utc>) -> f64 {
        match self.mode {
            FeedInMode::Fixed => self.fixed_limit_pct,
            FeedInMode::Dynamic => {
                let minute_of_day = now.hour() * 60 + now.minute();
                self.dynamic_rules
                    .iter()
                    .find(|r| r.contains(minute_of_day))
                    .map(|r| r.limit_pct)
                    .unwrap_or(100.0)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerControlConfig {
    pub enabled: bool,
    pub auto_write: bool,
    pub max_power_kw: Option<f64>,

    pub dso_trip_register: Option<String>,
    pub safety_alarm_register: Option<String>,

    pub dso_limit_register: Option<String>,
    pub dso_limit_scale: f64,
    pub dso_limit_min_pct: Option<f64>,
    pub dso_limit_max_pct: Option<f64>,

    pub remote_enable_register: Option<String>,
    pub active_power_set_register: Option<String>,
    pub active_power_set_scale: f64,
    pub active_power_limit_register: Option<String>,
    pub active_power_limit_scale: f64,

    pub feedin: FeedInConfig,
}

impl Default for PowerControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_write: false,
            max_power_kw: None,
            dso_trip_register: Some("dso_trip".to_string()),
            safety_alarm_register: Some("safety_alarm".to_string()),
            dso_limit_register: None,
            dso_limit_scale: 1.0,
            dso_limit_min_pct: None,
            dso_limit_max_pct: None,
            remote_enable_register: Some("remote_enable".to_string()),
            active_power_set_register: Some("active_power_set_w".to_string()),
            active_power_set_scale: 1.0,
            active_power_limit_register: Some("active_power_limit_pct".to_string()),
            active_power_limit_scale: 1.0,
            feedin: FeedInConfig::default(),
        }
    }
}

/// Safety/DSO signals read off the Modbus registers ahead of a decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct Signals {
    pub dso_trip: bool,
    pub safety_alarm: bool,
    pub dso_limit_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ControlReason {
    Plan,
    DsoTrip,
    SafetyAlarm,
    DsoLimitPct,
    FeedinLimit,
    PowerControlDisabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlDecision {
    pub requested_kw: f64,
    pub effective_kw: f64,
    pub shutdown: bool,
    pub dso_trip: bool,
    pub safety_alarm: bool,
    pub dso_limit_pct: Option<f64>,
    pub limit_kw: Option<f64>,
    pub reason: ControlReason,
    pub commands: HashMap<String, i64>,
}

pub struct PowerControlManager {
    pub config: PowerControlConfig,
}

impl PowerControlManager {
    pub fn new(config: PowerControlConfig) -> Self {
        Self { config }
    }

    /// Reads the DSO/safety signals a decision is made from (§4.9 signal
    /// extraction). Any read failure is treated as signal-absent; the next
    /// tick retries.
    pub async fn read_signals<T: ModbusTransport>(&self, engine: &mut RegisterEngine<T>) -> Signals {
        let mut signals = Signals::default();

        if let Some(name) = &self.config.dso_trip_register {
            signals.dso_trip = engine.read_alarm(name).await.unwrap_or(false);
        }
        if let Some(name) = &self.config.safety_alarm_register {
            signals.safety_alarm = engine.read_alarm(name).await.unwrap_or(false);
        }
        if let Some(name) = &self.config.dso_limit_register {
            if let Ok(raw) = engine.read(name).await {
                let mut pct = raw * self.config.dso_limit_scale;
                if let Some(min) = self.config.dso_limit_min_pct {
                    pct = pct.max(min);
                }
                if let Some(max) = self.config.dso_limit_max_pct {
                    pct = pct.min(max);
                }
                signals.dso_limit_pct = Some(pct);
            }
        }

        signals
    }

    /// Resolves the precedence chain (§4.9) into a Control Decision. Pure
    /// function of `requested_kw`/signals/time so it can be unit tested
    /// without a live transport.
    pub fn decide(
        &self,
        requested_kw: f64,
        signals: Signals,
        pv_kw: f64,
        now: DateTime<Utc>,
        constraints: &BatteryConstraints,
    ) -> ControlDecision {
        if !self.config.enabled {
            return ControlDecision {
                requested_kw,
                effective_kw: requested_kw,
                shutdown: false,
                dso_trip: signals.dso_trip,
                safety_alarm: signals.safety_alarm,
                dso_limit_pct: signals.dso_limit_pct,
                limit_kw: None,
                reason: ControlReason::PowerControlDisabled,
                commands: HashMap::new(),
            };
        }

        let max_power_kw = self.config.max_power_kw.unwrap_or_else(|| {
            constraints
                .p_discharge_max_kw
                .max(constraints.p_charge_max_kw)
                .max(requested_kw.abs())
        });

        let (effective_kw, limit_kw, reason) = if signals.dso_trip {
            (0.0, None, ControlReason::DsoTrip)
        } else if signals.safety_alarm {
            (0.0, None, ControlReason::SafetyAlarm)
        } else if let Some(dso_limit_pct) = signals.dso_limit_pct {
            let limit_kw = max_power_kw * dso_limit_pct / 100.0;
            (requested_kw.signum() * requested_kw.abs().min(limit_kw), Some(limit_kw), ControlReason::DsoLimitPct)
        } else if requested_kw < 0.0 {
            let feedin_pct = self.config.feedin.limit_pct_at(now);
            let cap_kw = if self.config.feedin.pv_integration_enabled {
                pv_kw * feedin_pct / 100.0
            } else {
                requested_kw.abs() * feedin_pct / 100.0
            };
            if feedin_pct < 100.0 {
                (-requested_kw.abs().min(cap_kw), Some(cap_kw), ControlReason::FeedinLimit)
            } else {
                (requested_kw, None, ControlReason::Plan)
            }
        } else {
            (requested_kw, None, ControlReason::Plan)
        };

        let shutdown = matches!(reason, ControlReason::DsoTrip | ControlReason::SafetyAlarm);

        let mut commands = HashMap::new();
        if let Some(name) = &self.config.remote_enable_register {
            commands.insert(name.clone(), if shutdown { 0 } else { 1 });
        }
        if let Some(name) = &self.config.active_power_set_register {
            commands.insert(name.clone(), (effective_kw * 1000.0 / self.config.active_power_set_scale).round() as i64);
        }
        if let Some(name) = &self.config.active_power_limit_register {
            let value = if signals.dso_limit_pct.is_some() && !shutdown {
                (signals.dso_limit_pct.unwrap() / self.config.active_power_limit_scale).round() as i64
            } else {
                0
            };
            commands.insert(name.clone(), value);
        }

        ControlDecision {
            requested_kw,
            effective_kw,
            shutdown,
            dso_trip: signals.dso_trip,
            safety_alarm: signals.safety_alarm,
            dso_limit_pct: signals.dso_limit_pct,
            limit_kw,
            reason,
            commands,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PowerControlManager {
        PowerControlManager::new(PowerControlConfig { max_power_kw: Some(50.0), ..PowerControlConfig::default() })
    }

    #[test]
    fn dso_trip_forces_shutdown_regardless_of_other_signals() {
        let m = manager();
        let signals = Signals { dso_trip: true, safety_alarm: false, dso_limit_pct: Some(50.0) };
        let decision = m.decide(20.0, signals, 0.0, Utc::now(), &BatteryConstraints::default());
        assert!(decision.shutdown);
        assert_eq!(decision.effective_kw, 0.0);
        assert_eq!(decision.reason, ControlReason::DsoTrip);
    }

    #[test]
    fn safety_alarm_outranks_dso_limit() {
        let m = manager();
        let signals = Signals { dso_trip: false, safety_alarm: true, dso_limit_pct: Some(50.0) };
        let decision = m.decide(20.0, signals, 0.0, Utc::now(), &BatteryConstraints::default());
        assert!(decision.shutdown);
        assert_eq!(decision.reason, ControlReason::SafetyAlarm);
    }

    #[test]
    fn dso_limit_caps_requested_power() {
        let m = manager();
        let signals = Signals { dso_trip: false, safety_alarm: false, dso_limit_pct: Some(20.0) };
        let decision = m.decide(40.0, signals, 0.0, Utc::now(), &BatteryConstraints::default());
        assert_eq!(decision.effective_kw, 10.0);
        assert_eq!(decision.reason, ControlReason::DsoLimitPct);
    }

    #[test]
    fn feedin_fixed_limit_caps_export() {
        let mut config = PowerControlConfig { max_power_kw: Some(50.0), ..PowerControlConfig::default() };
        config.feedin.fixed_limit_pct = 50.0;
        let m = PowerControlManager::new(config);
        let signals = Signals::default();
        let decision = m.decide(-20.0, signals, 0.0, Utc::now(), &BatteryConstraints::default());
        assert_eq!(decision.effective_kw, -10.0);
        assert_eq!(decision.reason, ControlReason::FeedinLimit);
    }

    #[test]
    fn pass_through_when_no_signal_active() {
        let m = manager();
        let decision = m.decide(10.0, Signals::default(), 0.0, Utc::now(), &BatteryConstraints::default());
        assert_eq!(decision.effective_kw, 10.0);
        assert_eq!(decision.reason, ControlReason::Plan);
    }

    #[test]
    fn disabled_manager_is_transparent() {
        let m = PowerControlManager::new(PowerControlConfig { enabled: false, ..PowerControlConfig::default() });
        let decision = m.decide(10.0, Signals::default(), 0.0, Utc::now(), &BatteryConstraints::default());
        assert_eq!(decision.effective_kw, 10.0);
        assert_eq!(decision.reason, ControlReason::PowerControlDisabled);
        assert!(decision.commands.is_empty());
    }

    #[test]
    fn feedin_rule_wraps_past_midnight() {
        let rule = FeedInRule { start_minute: 22 * 60, end_minute: 6 * 60, limit_pct: 50.0 };
        assert!(rule.contains(23 * 60));
        assert!(rule.contains(1 * 60));
        assert!(!rule.contains(12 * 60));
    }
}
