mod api;
mod config;
mod domain;
mod forecast;
mod history;
mod modbus;
mod mqtt;
mod optimizer;
mod power_control;
mod site_controller;
mod strategies;
mod supervisor;
mod telemetry;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{info, warn};

use config::{AppConfig, ModbusConnectionMode, SiteConfig};
use domain::{plant_state::PlantStateStore, Region};
use forecast::{
    AwattarPriceForecaster, ClearSkyPvForecaster, DemoPvForecaster, DemoWeatherProvider, FixedPatternLoadForecaster,
    ForecastAggregator, GridTariffSchedule, LoadForecaster, PriceForecaster, PvForecaster,
};
use history::HistoryStore;
use modbus::profiles::DeviceProfile;
use modbus::transport::ModbusTransport;
use modbus::RegisterEngine;
use optimizer::BatteryConstraints;
use power_control::PowerControlManager;
use site_controller::{EmsConfig, SiteController};
use strategies::{ArbitrageStrategy, LoadBalancingStrategy, PeakShavingStrategy, SelfConsumptionStrategy, StrategySelector};
use supervisor::MultiSiteSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let cfg = AppConfig::load()?;
    let mut supervisor = MultiSiteSupervisor::new();

    for site in &cfg.sites {
        let controller = build_site(site).await.with_context(|| format!("failed to initialize site {}", site.site_id))?;
        supervisor.add_site(site.site_id, controller);
    }

    let supervisor = Arc::new(supervisor);

    let mut app = api::router(supervisor.clone());

    #[cfg(feature = "metrics")]
    {
        app = api::with_metrics(app);
    }

    let addr = cfg.server.socket_addr()?;
    info!(%addr, sites = cfg.sites.len(), "starting energy management system");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown_supervisor = supervisor.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            telemetry::shutdown_signal().await;
            shutdown_supervisor.stop_all();
        })
        .await?;

    warn!("shutdown complete");
    Ok(())
}

#[cfg(feature = "modbus")]
fn build_transport(modbus: &config::ModbusSection) -> Result<Box<dyn ModbusTransport>> {
    match modbus.mode {
        ModbusConnectionMode::Tcp => {
            let host = modbus.host.clone().context("modbus.host is required in tcp mode")?;
            Ok(Box::new(modbus::transport::TcpTransport::new(host, modbus.port, modbus.slave_id)))
        }
        ModbusConnectionMode::Rtu => {
            let serial_port = modbus.serial_port.clone().context("modbus.serial_port is required in rtu mode")?;
            Ok(Box::new(modbus::transport::RtuTransport::new(
                serial_port,
                modbus.baud_rate,
                modbus::profiles::SerialParity::None,
                modbus.slave_id,
            )))
        }
    }
}

#[cfg(not(feature = "modbus"))]
fn build_transport(_modbus: &config::ModbusSection) -> Result<Box<dyn ModbusTransport>> {
    Ok(Box::new(modbus::transport::MockTransport::new()))
}

async fn build_site(site: &SiteConfig) -> Result<Arc<SiteController<Box<dyn ModbusTransport>>>> {
    let profile: DeviceProfile =
        modbus::profiles::lookup(&site.modbus.device_profile).with_context(|| format!("unknown device profile: {}", site.modbus.device_profile))?;

    let store = PlantStateStore::new(site.site_id);

    let poller_transport = build_transport(&site.modbus)?;
    let poller_profile = profile.clone();
    let poll_interval_s = site.modbus.poll_interval_s;
    let poller_store = store.clone();
    let site_id = site.site_id;
    tokio::spawn(async move {
        let mut poller = modbus::poller::ModbusPoller::new(poller_transport, poller_profile);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs_f64(poll_interval_s.max(0.1)));
        loop {
            interval.tick().await;
            match poller.poll_once().await {
                Ok(sample) => poller_store.ingest(sample, domain::sample::TelemetrySource::Modbus).await,
                Err(e) => warn!(site_id, error = %e, "modbus poll failed"),
            }
        }
    });

    if site.mqtt.enabled {
        let mqtt_cfg = mqtt::MqttConfig {
            enabled: true,
            broker_host: site.mqtt.broker_host.clone(),
            broker_port: site.mqtt.broker_port,
            client_id: format!("{}-{}", site.mqtt.client_id, site.site_id),
            topic: site.mqtt.topic.clone(),
            qos: site.mqtt.qos,
            username: site.mqtt.username.clone(),
            password: site.mqtt.password.clone(),
            keepalive_s: site.mqtt.keepalive_s,
        };
        let mqtt_store = Arc::new(store.clone());
        tokio::spawn(async move { mqtt::run_ingestor(mqtt_cfg, mqtt_store).await });
    }

    let engine_transport = build_transport(&site.modbus)?;
    let engine = Arc::new(Mutex::new(RegisterEngine::new(engine_transport, profile)));

    let region = Region::from_str(&site.prices.region).unwrap_or(Region::At);
    let prices: Box<dyn PriceForecaster> = Box::new(
        AwattarPriceForecaster::new(std::time::Duration::from_secs(site.prices.cache_ttl_s), site.prices.demo_mode)
            .context("failed to build price forecaster")?,
    );
    let pv: Box<dyn PvForecaster> = match (site.forecast.pv_peak_kw, site.forecast.latitude, site.forecast.longitude) {
        (Some(peak), Some(lat), Some(lon)) => Box::new(ClearSkyPvForecaster::new(peak, lat, lon, DemoWeatherProvider)),
        _ => Box::new(DemoPvForecaster::default()),
    };
    let load: Box<dyn LoadForecaster> = Box::new(FixedPatternLoadForecaster::default());
    let tariff = match (&site.tariff.name, site.tariff.base_rate_eur_per_kwh) {
        (Some(name), Some(rate)) if name.eq_ignore_ascii_case("ne5") => GridTariffSchedule::ne5(rate),
        (_, Some(rate)) => GridTariffSchedule::flat(rate),
        _ => GridTariffSchedule::flat(0.25),
    };
    let forecast = ForecastAggregator::new(region, prices, pv, load, tariff);

    let strategies: Vec<Box<dyn strategies::Strategy>> = vec![
        Box::new(ArbitrageStrategy {
            min_spread_eur_per_mwh: site.strategies.min_spread_eur_per_mwh.unwrap_or(20.0),
            ..Default::default()
        }),
        Box::new(PeakShavingStrategy),
        Box::new(SelfConsumptionStrategy::default()),
        Box::new(LoadBalancingStrategy),
    ];
    let mut selector = StrategySelector::new(strategies);
    selector.switch_threshold = site.strategies.switch_threshold;

    let power_control = PowerControlManager::new(power_control::PowerControlConfig::from(&site.power_control));
    let constraints = BatteryConstraints::from(&site.bess);

    let history: Arc<dyn HistoryStore> = build_history(site).await?;

    let ems_config = EmsConfig {
        timestep_s: site.ems.timestep_s,
        optimization_interval_minutes: site.ems.optimization_interval_minutes,
        snapshot_queue_depth: site.ems.snapshot_queue_depth,
        history_append_interval_minutes: site.ems.history_append_interval_minutes,
    };

    Ok(Arc::new(SiteController::new(
        site.site_id,
        store,
        engine,
        forecast,
        selector,
        power_control,
        constraints,
        history,
        ems_config,
    )))
}

#[cfg(feature = "db")]
async fn build_history(site: &SiteConfig) -> Result<Arc<dyn HistoryStore>> {
    let store = history::SqliteHistoryStore::connect(site.site_id, &site.database.base_path).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "db"))]
async fn build_history(_site: &SiteConfig) -> Result<Arc<dyn HistoryStore>> {
    Ok(Arc::new(history::NullHistoryStore))
}
