//! Site Controller (C10): the per-site tick loop tying the Modbus engine,
//! forecast aggregator, strategy selector, and power control manager
//! together, and broadcasting state snapshots to subscribers.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{error, info, warn};

use crate::domain::{PlantState, Schedule};
use crate::forecast::ForecastAggregator;
use crate::history::HistoryStore;
use crate::modbus::transport::ModbusTransport;
use crate::modbus::RegisterEngine;
use crate::optimizer::BatteryConstraints;
use crate::power_control::PowerControlManager;
use crate::strategies::selector::SelectionMode;
use crate::strategies::StrategySelector;

#[derive(Debug, Clone)]
pub struct EmsConfig {
    pub timestep_s: u64,
    pub optimization_interval_minutes: i64,
    pub snapshot_queue_depth: usize,
    pub history_append_interval_minutes: i64,
}

impl Default for EmsConfig {
    fn default() -> Self {
        Self {
            timestep_s: 2,
            optimization_interval_minutes: 15,
            snapshot_queue_depth: 10,
            history_append_interval_minutes: 5,
        }
    }
}

pub struct SiteController<T: ModbusTransport> {
    site_id: u32,
    store: crate::domain::plant_state::PlantStateStore,
    engine: Arc<Mutex<RegisterEngine<T>>>,
    forecast: ForecastAggregator,
    selector: Mutex<StrategySelector>,
    power_control: PowerControlManager,
    constraints: BatteryConstraints,
    history: Arc<dyn HistoryStore>,
    config: EmsConfig,

    current_plan: Mutex<Option<Schedule>>,
    last_optimization: Mutex<Option<DateTime<Utc>>>,
    last_history_append: Mutex<Option<DateTime<Utc>>>,
    last_simulation_sample: Mutex<Option<DateTime<Utc>>>,

    snapshot_tx: broadcast::Sender<PlantState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<T: ModbusTransport + 'static> SiteController<T> {
    pub fn new(
        site_id: u32,
        store: crate::domain::plant_state::PlantStateStore,
        engine: Arc<Mutex<RegisterEngine<T>>>,
        forecast: ForecastAggregator,
        selector: StrategySelector,
        power_control: PowerControlManager,
        constraints: BatteryConstraints,
        history: Arc<dyn HistoryStore>,
        config: EmsConfig,
    ) -> Self {
        let (snapshot_tx, _) = broadcast::channel(config.snapshot_queue_depth.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            site_id,
            store,
            engine,
            forecast,
            selector: Mutex::new(selector),
            power_control,
            constraints,
            history,
            config,
            current_plan: Mutex::new(None),
            last_optimization: Mutex::new(None),
            last_history_append: Mutex::new(None),
            last_simulation_sample: Mutex::new(None),
            snapshot_tx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlantState> {
        self.snapshot_tx.subscribe()
    }

    pub async fn snapshot(&self) -> PlantState {
        self.store.snapshot().await
    }

    pub async fn set_manual_strategy(&self, name: String) {
        self.selector.lock().await.mode = SelectionMode::Manual(name);
    }

    pub async fn set_auto_mode(&self) {
        self.selector.lock().await.mode = SelectionMode::Auto;
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn current_plan(&self) -> Option<Schedule> {
        self.current_plan.lock().await.clone()
    }

    pub async fn recent_telemetry(&self, minutes: i64, limit: usize) -> Vec<crate::domain::plant_state::TelemetryHistoryEntry> {
        self.store.recent(minutes, limit).await
    }

    pub async fn power_flow(&self, minutes: i64) -> crate::domain::plant_state::PowerFlowSummary {
        self.store.power_flow_over(minutes).await
    }

    pub async fn strategy_names(&self) -> Vec<String> {
        self.selector.lock().await.strategies.iter().map(|s| s.name().to_string()).collect()
    }

    /// Spawns the tick loop as a background task; used to (re)start a
    /// site after an explicit stop.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let _ = self.shutdown_tx.send(false);
        tokio::spawn(async move { self.run().await })
    }

    /// Drives the tick loop at `timestep_s` cadence until [`stop`] is
    /// called (§4.10).
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(StdDuration::from_secs(self.config.timestep_s.max(1)));
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(site_id = self.site_id, error = %e, "tick failed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(site_id = self.site_id, "site controller stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let now = Utc::now();

        let needs_optimization = {
            let last = *self.last_optimization.lock().await;
            let has_plan = self.current_plan.lock().await.is_some();
            !has_plan
                || last.map(|t| (now - t).num_minutes() >= self.config.optimization_interval_minutes).unwrap_or(true)
        };
        if needs_optimization {
            self.run_optimization(now).await;
        }

        let requested_kw = {
            let plan = self.current_plan.lock().await;
            plan.as_ref().and_then(|p| p.power_at(now)).unwrap_or(0.0) / 1000.0
        };

        let signals = {
            let mut engine = self.engine.lock().await;
            self.power_control.read_signals(&mut engine).await
        };

        let (decision, state_after) = self
            .store
            .mutate(|state| {
                state.apply_staleness(now);
                let decision = self.power_control.decide(requested_kw, signals, state.p_pv_kw, now, &self.constraints);
                state.setpoint_kw = decision.effective_kw;
                state.active_power_limit_w = decision.limit_kw.map(|kw| kw * 1000.0);
                state.power_limit_reason = format!("{:?}", decision.reason).to_lowercase();
                state.dso_trip = decision.dso_trip;
                state.safety_alarm = decision.safety_alarm;
                state.dso_limit_pct = decision.dso_limit_pct;
                state.remote_shutdown_requested = decision.shutdown;

                if state.telemetry_source == crate::domain::sample::TelemetrySource::Simulation {
                    state.p_bess_kw = decision.effective_kw;
                    state.p_grid_kw = state.p_load_kw - state.p_pv_kw - state.p_bess_kw;
                }
                state.timestamp = now;
                (decision, state.clone())
            })
            .await;

        if self.power_control.config.auto_write {
            let mut engine = self.engine.lock().await;
            for (register, value) in &decision.commands {
                if let Err(e) = engine.write(register, *value as f64).await {
                    warn!(site_id = self.site_id, register, error = ?e, "command write failed, retrying next tick");
                }
            }
        }

        let should_append = {
            let mut last = self.last_history_append.lock().await;
            let due = last.map(|t| (now - t).num_minutes() >= self.config.history_append_interval_minutes).unwrap_or(true);
            if due {
                *last = Some(now);
            }
            due
        };
        if should_append {
            if let Err(e) = self.history.append_state(&state_after, None).await {
                warn!(site_id = self.site_id, error = %e, "failed to append state history");
            }
        }

        let _ = self.snapshot_tx.send(state_after);
        Ok(())
    }

    /// Fetches forecasts, lets the selector pick a strategy, and stores
    /// the resulting schedule as the current plan (§4.10 optimization
    /// cycle).
    async fn run_optimization(&self, now: DateTime<Utc>) {
        let state = self.store.snapshot().await;

        let forecast = match self.forecast.fetch_forecast().await {
            Ok(f) => f,
            Err(e) => {
                warn!(site_id = self.site_id, error = %e, "forecast fetch failed, keeping previous plan");
                self.store.mutate(|s| s.optimization_status = crate::domain::plant_state::OptimizationStatus::Failed).await;
                return;
            }
        };

        let window = self.forecast.signal_window();
        let selected = {
            let mut selector = self.selector.lock().await;
            selector.select(&state, &forecast, &*window.read().await)
        };

        let Some(strategy_name) = selected else {
            self.store.mutate(|s| s.optimization_status = crate::domain::plant_state::OptimizationStatus::Failed).await;
            return;
        };

        let result = {
            let selector = self.selector.lock().await;
            let Some(strategy) = selector.strategies.iter().find(|s| s.name() == strategy_name) else {
                drop(selector);
                self.store.mutate(|s| s.optimization_status = crate::domain::plant_state::OptimizationStatus::Failed).await;
                return;
            };
            strategy.optimize(&state, &forecast, &self.constraints)
        };

        let old_strategy = state.active_strategy.clone();
        if old_strategy.as_deref() != Some(strategy_name.as_str()) {
            let _ = self
                .history
                .append_strategy_change(old_strategy.as_deref(), &strategy_name, "selector", &json!({}))
                .await;
        }

        if let Err(e) = self.history.append_optimization(&result).await {
            warn!(site_id = self.site_id, error = %e, "failed to append optimization history");
        }

        *self.current_plan.lock().await = Some(result.schedule);
        *self.last_optimization.lock().await = Some(now);
        self.store
            .mutate(|s| {
                s.active_strategy = Some(strategy_name);
                s.optimization_status = crate::domain::plant_state::OptimizationStatus::Success;
            })
            .await;
    }
}
