//! Plant State Store (C4): the fused, thread-safe current view of a site,
//! staleness detection, source fusion, and ring-buffered telemetry history
//! with power-flow aggregation.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::sample::{TelemetrySample, TelemetrySource};

const STALENESS_THRESHOLD_SECS: i64 = 120;
const HISTORY_CAPACITY: usize = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Auto,
    Manual,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    Pending,
    Success,
    Failed,
}

/// Current fused view plus control outputs (§3 Plant State).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlantState {
    pub site_id: u32,
    pub timestamp: DateTime<Utc>,
    pub telemetry_source: TelemetrySource,
    pub last_live_timestamp: Option<DateTime<Utc>>,

    pub soc_pct: f64,
    pub soh_pct: f64,
    pub p_bess_kw: f64,
    pub p_pv_kw: f64,
    pub p_load_kw: f64,
    pub p_grid_kw: f64,
    pub voltage_v: f64,
    pub current_a: f64,
    pub temperature_c: f64,
    pub status_code: Option<i64>,
    pub status_text: Option<String>,
    pub max_charge_power_kw: Option<f64>,
    pub max_discharge_power_kw: Option<f64>,
    pub active_alarms: Vec<String>,

    pub mode: ControlMode,
    pub alarm: bool,
    pub active_strategy: Option<String>,
    pub optimization_status: OptimizationStatus,
    pub setpoint_kw: f64,
    pub active_power_limit_w: Option<f64>,
    pub power_limit_reason: String,
    pub dso_trip: bool,
    pub safety_alarm: bool,
    pub dso_limit_pct: Option<f64>,
    pub remote_shutdown_requested: bool,
}

impl PlantState {
    pub fn new(site_id: u32) -> Self {
        Self {
            site_id,
            timestamp: Utc::now(),
            telemetry_source: TelemetrySource::Simulation,
            last_live_timestamp: None,
            soc_pct: 50.0,
            soh_pct: 100.0,
            p_bess_kw: 0.0,
            p_pv_kw: 0.0,
            p_load_kw: 0.0,
            p_grid_kw: 0.0,
            voltage_v: 0.0,
            current_a: 0.0,
            temperature_c: 25.0,
            status_code: None,
            status_text: None,
            max_charge_power_kw: None,
            max_discharge_power_kw: None,
            active_alarms: Vec::new(),
            mode: ControlMode::Auto,
            alarm: false,
            active_strategy: None,
            optimization_status: OptimizationStatus::Pending,
            setpoint_kw: 0.0,
            active_power_limit_w: None,
            power_limit_reason: "plan".to_string(),
            dso_trip: false,
            safety_alarm: false,
            dso_limit_pct: None,
            remote_shutdown_requested: false,
        }
    }

    fn apply_sample(&mut self, sample: &TelemetrySample, source: TelemetrySource) {
        self.telemetry_source = source;
        let now = sample.timestamp.unwrap_or_else(Utc::now);
        self.last_live_timestamp = Some(now);
        macro_rules! overlay {
            ($field:ident) => {
                if let Some(v) = sample.$field {
                    self.$field = v;
                }
            };
        }
        overlay!(soc_pct);
        overlay!(soh_pct);
        overlay!(p_bess_kw);
        overlay!(p_pv_kw);
        overlay!(p_load_kw);
        overlay!(p_grid_kw);
        overlay!(voltage_v);
        overlay!(current_a);
        overlay!(temperature_c);
        self.status_code = sample.status_code.or(self.status_code);
        if sample.status_text.is_some() {
            self.status_text = sample.status_text.clone();
        }
        self.max_charge_power_kw = sample.max_charge_power_kw.or(self.max_charge_power_kw);
        self.max_discharge_power_kw = sample.max_discharge_power_kw.or(self.max_discharge_power_kw);
        if !sample.active_alarms.is_empty() {
            self.active_alarms = sample.active_alarms.clone();
            self.alarm = true;
        } else {
            self.alarm = !self.active_alarms.is_empty();
        }
    }

    /// §4.4 staleness rule: flip to simulation when no live sample has
    /// arrived in the last 120s, and synthesize battery/grid power.
    pub fn apply_staleness(&mut self, now: DateTime<Utc>) {
        let stale = match self.last_live_timestamp {
            None => true,
            Some(last) => (now - last).num_seconds() > STALENESS_THRESHOLD_SECS,
        };
        if stale {
            self.telemetry_source = TelemetrySource::Simulation;
            self.p_bess_kw = self.setpoint_kw;
            self.p_grid_kw = self.p_load_kw - self.p_pv_kw - self.p_bess_kw;
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.last_live_timestamp {
            None => true,
            Some(last) => (now - last).num_seconds() > STALENESS_THRESHOLD_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub source: TelemetrySource,
    pub sample: TelemetrySample,
}

/// Owner of the current [`PlantState`] and its bounded telemetry ring
/// buffer, shared across the Modbus poller, MQTT ingestor, and the site
/// tick loop via an `Arc`.
#[derive(Clone)]
pub struct PlantStateStore {
    inner: Arc<RwLock<Inner>>,
}

struct Inner {
    state: PlantState,
    history: VecDeque<TelemetryHistoryEntry>,
}

impl PlantStateStore {
    pub fn new(site_id: u32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: PlantState::new(site_id),
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
            })),
        }
    }

    pub async fn snapshot(&self) -> PlantState {
        self.inner.read().await.state.clone()
    }

    pub async fn ingest(&self, sample: TelemetrySample, source: TelemetrySource) {
        let mut inner = self.inner.write().await;
        inner.state.apply_sample(&sample, source);
        let timestamp = sample.timestamp.unwrap_or_else(Utc::now);
        if inner.history.len() >= HISTORY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(TelemetryHistoryEntry {
            timestamp,
            source,
            sample,
        });
    }

    pub async fn mutate<R>(&self, f: impl FnOnce(&mut PlantState) -> R) -> R {
        let mut inner = self.inner.write().await;
        f(&mut inner.state)
    }

    /// `recent(minutes, limit)`: slice filtered by cutoff, truncated to the
    /// last `limit` entries.
    pub async fn recent(&self, minutes: i64, limit: usize) -> Vec<TelemetryHistoryEntry> {
        let inner = self.inner.read().await;
        let cutoff = Utc::now() - chrono::Duration::minutes(minutes);
        let mut filtered: Vec<_> = inner
            .history
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .cloned()
            .collect();
        if filtered.len() > limit {
            filtered = filtered.split_off(filtered.len() - limit);
        }
        filtered
    }
}

impl Clone for PlantStateStore {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Power-flow edges produced by [`decompose_flows`] (§4.4).
#[derive(Debug, Clone, Default, Serialize)]
pub struct PowerFlowSummary {
    pub pv_to_load_kwh: f64,
    pub bess_discharge_to_load_kwh: f64,
    pub grid_to_load_kwh: f64,
    pub pv_to_bess_charge_kwh: f64,
    pub grid_to_bess_charge_kwh: f64,
    pub pv_to_grid_kwh: f64,
    pub bess_discharge_to_grid_kwh: f64,
    pub pv_generated_kwh: f64,
    pub load_consumed_kwh: f64,
    pub bess_charge_kwh: f64,
    pub bess_discharge_kwh: f64,
    pub grid_import_kwh: f64,
    pub grid_export_kwh: f64,
}

impl PlantStateStore {
    /// Trapezoidally integrates the last `minutes` of history into kWh and
    /// decomposes the result into directed power flows (§6 `get_power_flow`).
    pub async fn power_flow_over(&self, minutes: i64) -> PowerFlowSummary {
        let entries = self.recent(minutes, usize::MAX).await;
        let mut pv_kwh = 0.0;
        let mut load_kwh = 0.0;
        let mut bess_kwh = 0.0;
        let mut grid_kwh = 0.0;

        for pair in entries.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let dt_h = (b.timestamp - a.timestamp).num_seconds() as f64 / 3600.0;
            if dt_h <= 0.0 {
                continue;
            }
            let avg = |x: Option<f64>, y: Option<f64>| (x.unwrap_or(0.0) + y.unwrap_or(0.0)) / 2.0;
            pv_kwh += avg(a.sample.p_pv_kw, b.sample.p_pv_kw) * dt_h;
            load_kwh += avg(a.sample.p_load_kw, b.sample.p_load_kw) * dt_h;
            bess_kwh += avg(a.sample.p_bess_kw, b.sample.p_bess_kw) * dt_h;
            grid_kwh += avg(a.sample.p_grid_kw, b.sample.p_grid_kw) * dt_h;
        }

        decompose_flows(pv_kwh, load_kwh, bess_kwh, grid_kwh)
    }
}

/// Decompose one interval's trapezoidal-integrated energies into the seven
/// directed flows, greedily, in the order given by §4.4.
pub fn decompose_flows(pv_kwh: f64, load_kwh: f64, bess_kwh: f64, grid_kwh: f64) -> PowerFlowSummary {
    let bess_discharge = bess_kwh.max(0.0);
    let bess_charge = (-bess_kwh).max(0.0);
    let grid_import = grid_kwh.max(0.0);
    let grid_export = (-grid_kwh).max(0.0);

    let mut remaining_load = load_kwh;
    let pv_to_load = pv_kwh.min(remaining_load).max(0.0);
    remaining_load -= pv_to_load;
    let bess_to_load = bess_discharge.min(remaining_load).max(0.0);
    remaining_load -= bess_to_load;
    let grid_to_load = grid_import.min(remaining_load).max(0.0);

    let pv_surplus = (pv_kwh - pv_to_load).max(0.0);
    let pv_to_bess = pv_surplus.min(bess_charge).max(0.0);
    let remaining_bess_charge = bess_charge - pv_to_bess;
    let grid_to_bess = remaining_bess_charge.min(grid_import.max(0.0)).max(0.0);
    let pv_remaining_after_bess = (pv_surplus - pv_to_bess).max(0.0);
    let pv_to_grid = pv_remaining_after_bess.min(grid_export).max(0.0);
    let bess_to_grid = (bess_discharge - bess_to_load).max(0.0).min(grid_export);

    let round3 = |v: f64| (v * 1000.0).round() / 1000.0;

    PowerFlowSummary {
        pv_to_load_kwh: round3(pv_to_load),
        bess_discharge_to_load_kwh: round3(bess_to_load),
        grid_to_load_kwh: round3(grid_to_load),
        pv_to_bess_charge_kwh: round3(pv_to_bess),
        grid_to_bess_charge_kwh: round3(grid_to_bess),
        pv_to_grid_kwh: round3(pv_to_grid),
        bess_discharge_to_grid_kwh: round3(bess_to_grid),
        pv_generated_kwh: round3(pv_kwh.max(0.0)),
        load_consumed_kwh: round3(load_kwh.max(0.0)),
        bess_charge_kwh: round3(bess_charge),
        bess_discharge_kwh: round3(bess_discharge),
        grid_import_kwh: round3(grid_import),
        grid_export_kwh: round3(grid_export),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn staleness_flips_source_after_threshold() {
        let mut state = PlantState::new(1);
        state.last_live_timestamp = Some(Utc::now() - chrono::Duration::seconds(121));
        state.setpoint_kw = 5.0;
        state.p_load_kw = 10.0;
        state.p_pv_kw = 2.0;
        state.apply_staleness(Utc::now());
        assert_eq!(state.telemetry_source, TelemetrySource::Simulation);
        assert_eq!(state.p_bess_kw, 5.0);
        assert_eq!(state.p_grid_kw, 10.0 - 2.0 - 5.0);
    }

    #[tokio::test]
    async fn recent_filters_by_cutoff_and_limit() {
        let store = PlantStateStore::new(1);
        for _ in 0..5 {
            store
                .ingest(TelemetrySample::default(), TelemetrySource::Modbus)
                .await;
        }
        let recent = store.recent(60, 3).await;
        assert_eq!(recent.len(), 3);
    }

    #[test]
    fn power_flow_decomposition_matches_scenario_7() {
        // pv=8kW, load=5kW, bess=+2kW (discharge), grid=-5kW (export), over 1h.
        let flows = decompose_flows(8.0, 5.0, 2.0, -5.0);
        assert!((flows.pv_to_load_kwh - 5.0).abs() < 1e-9);
        assert!((flows.pv_to_grid_kwh - 3.0).abs() < 1e-9);
        assert!((flows.bess_discharge_to_grid_kwh - 2.0).abs() < 1e-9);
        assert!((flows.bess_discharge_to_load_kwh - 0.0).abs() < 1e-9);
        assert!((flows.grid_to_load_kwh - 0.0).abs() < 1e-9);
    }
}
