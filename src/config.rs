#![allow(dead_code)]
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use validator::Validate;

/// Top-level application configuration: server surface plus one entry
/// per configured site (§6 Config).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,

    #[validate(nested)]
    pub logging: LoggingConfig,

    #[serde(default)]
    #[validate(length(min = 1))]
    #[validate(nested)]
    pub sites: Vec<SiteConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,

    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    #[serde(default)]
    pub enable_cors: bool,

    #[serde(default)]
    pub enable_compression: bool,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port).parse().context("failed to parse socket address")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

/// One configured site: every subsystem the Site Controller needs (§6
/// Config). `ems.*`/`bess.*` map directly onto [`crate::site_controller::EmsConfig`]
/// and [`crate::optimizer::BatteryConstraints`].
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SiteConfig {
    pub site_id: u32,

    #[serde(default)]
    #[validate(nested)]
    pub ems: EmsSection,

    #[validate(nested)]
    pub bess: BessSection,

    #[validate(nested)]
    pub modbus: ModbusSection,

    #[serde(default)]
    #[validate(nested)]
    pub mqtt: MqttSection,

    #[serde(default)]
    #[validate(nested)]
    pub power_control: PowerControlSection,

    #[serde(default)]
    pub strategies: StrategiesSection,

    #[serde(default)]
    #[validate(nested)]
    pub prices: PricesSection,

    #[serde(default)]
    pub forecast: ForecastSection,

    #[serde(default)]
    pub tariff: TariffSection,

    #[serde(default)]
    #[validate(nested)]
    pub database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct EmsSection {
    #[serde(default = "default_timestep_s")]
    #[validate(range(min = 1, max = 3600))]
    pub timestep_s: u64,

    #[serde(default = "default_optimization_interval_minutes")]
    #[validate(range(min = 1, max = 1440))]
    pub optimization_interval_minutes: i64,

    #[serde(default = "default_history_append_interval_minutes")]
    pub history_append_interval_minutes: i64,

    #[serde(default = "default_snapshot_queue_depth")]
    pub snapshot_queue_depth: usize,
}

impl Default for EmsSection {
    fn default() -> Self {
        Self {
            timestep_s: default_timestep_s(),
            optimization_interval_minutes: default_optimization_interval_minutes(),
            history_append_interval_minutes: default_history_append_interval_minutes(),
            snapshot_queue_depth: default_snapshot_queue_depth(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BessSection {
    #[validate(range(min = 0.1, max = 100000.0))]
    pub energy_capacity_kwh: f64,

    #[validate(range(min = 0.1, max = 10000.0))]
    pub p_charge_max_kw: f64,

    #[validate(range(min = 0.1, max = 10000.0))]
    pub p_discharge_max_kw: f64,

    #[serde(default = "default_soc_min_percent")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub soc_min_percent: f64,

    #[serde(default = "default_soc_max_percent")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub soc_max_percent: f64,

    #[serde(default = "default_efficiency")]
    #[validate(range(min = 0.5, max = 1.0))]
    pub efficiency_charge: f64,

    #[serde(default = "default_efficiency")]
    #[validate(range(min = 0.5, max = 1.0))]
    pub efficiency_discharge: f64,
}

impl From<&BessSection> for crate::optimizer::BatteryConstraints {
    fn from(section: &BessSection) -> Self {
        Self {
            energy_capacity_kwh: section.energy_capacity_kwh,
            p_charge_max_kw: section.p_charge_max_kw,
            p_discharge_max_kw: section.p_discharge_max_kw,
            soc_min_percent: section.soc_min_percent,
            soc_max_percent: section.soc_max_percent,
            efficiency_charge: section.efficiency_charge,
            efficiency_discharge: section.efficiency_discharge,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ModbusSection {
    #[serde(default = "default_modbus_mode")]
    pub mode: ModbusConnectionMode,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_modbus_port")]
    pub port: u16,

    #[serde(default)]
    pub serial_port: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[validate(range(min = 1, max = 247))]
    pub slave_id: u8,

    #[serde(default = "default_modbus_timeout_s")]
    pub timeout_s: f64,

    #[serde(default = "default_poll_interval_s")]
    pub poll_interval_s: f64,

    #[validate(length(min = 1))]
    pub device_profile: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModbusConnectionMode {
    Tcp,
    Rtu,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MqttSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_mqtt_host")]
    pub broker_host: String,

    #[serde(default = "default_mqtt_port")]
    pub broker_port: u16,

    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,

    #[serde(default = "default_mqtt_topic")]
    pub topic: String,

    #[serde(default = "default_mqtt_qos")]
    pub qos: u8,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_mqtt_keepalive_s")]
    pub keepalive_s: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_host: default_mqtt_host(),
            broker_port: default_mqtt_port(),
            client_id: default_mqtt_client_id(),
            topic: default_mqtt_topic(),
            qos: default_mqtt_qos(),
            username: None,
            password: None,
            keepalive_s: default_mqtt_keepalive_s(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PowerControlSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub auto_write: bool,

    #[serde(default)]
    pub max_power_kw: Option<f64>,

    #[serde(default)]
    pub dso_trip_register: Option<String>,

    #[serde(default)]
    pub safety_alarm_register: Option<String>,

    #[serde(default)]
    pub dso_limit_register: Option<String>,

    #[serde(default = "default_one")]
    pub dso_limit_scale: f64,

    #[serde(default)]
    pub dso_limit_min_pct: Option<f64>,

    #[serde(default)]
    pub dso_limit_max_pct: Option<f64>,

    #[serde(default)]
    pub remote_enable_register: Option<String>,

    #[serde(default)]
    pub active_power_set_register: Option<String>,

    #[serde(default = "default_one")]
    pub active_power_set_scale: f64,

    #[serde(default)]
    pub active_power_limit_register: Option<String>,

    #[serde(default = "default_one")]
    pub active_power_limit_scale: f64,

    #[serde(default)]
    pub feedin_mode: FeedInModeSetting,

    #[serde(default = "default_hundred")]
    pub feedin_fixed_limit_pct: f64,

    #[serde(default)]
    pub feedin_pv_integration_enabled: bool,

    #[serde(default)]
    pub feedin_dynamic_rules: Vec<FeedInRuleSection>,
}

impl Default for PowerControlSection {
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
            feedin_mode: FeedInModeSetting::default(),
            feedin_fixed_limit_pct: 100.0,
            feedin_pv_integration_enabled: false,
            feedin_dynamic_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedInModeSetting {
    #[default]
    Fixed,
    Dynamic,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedInRuleSection {
    pub start: String,
    pub end: String,
    pub limit_pct: f64,
}

impl From<&PowerControlSection> for crate::power_control::PowerControlConfig {
    fn from(section: &PowerControlSection) -> Self {
        let dynamic_rules = section
            .feedin_dynamic_rules
            .iter()
            .filter_map(|r| {
                Some(crate::power_control::FeedInRule {
                    start_minute: parse_hh_mm(&r.start)?,
                    end_minute: parse_hh_mm(&r.end)?,
                    limit_pct: r.limit_pct,
                })
            })
            .collect();

        Self {
            enabled: section.enabled,
            auto_write: section.auto_write,
            max_power_kw: section.max_power_kw,
            dso_trip_register: section.dso_trip_register.clone(),
            safety_alarm_register: section.safety_alarm_register.clone(),
            dso_limit_register: section.dso_limit_register.clone(),
            dso_limit_scale: section.dso_limit_scale,
            dso_limit_min_pct: section.dso_limit_min_pct,
            dso_limit_max_pct: section.dso_limit_max_pct,
            remote_enable_register: section.remote_enable_register.clone(),
            active_power_set_register: section.active_power_set_register.clone(),
            active_power_set_scale: section.active_power_set_scale,
            active_power_limit_register: section.active_power_limit_register.clone(),
            active_power_limit_scale: section.active_power_limit_scale,
            feedin: crate::power_control::FeedInConfig {
                mode: match section.feedin_mode {
                    FeedInModeSetting::Fixed => crate::power_control::FeedInMode::Fixed,
                    FeedInModeSetting::Dynamic => crate::power_control::FeedInMode::Dynamic,
                },
                fixed_limit_pct: section.feedin_fixed_limit_pct,
                pv_integration_enabled: section.feedin_pv_integration_enabled,
                dynamic_rules,
            },
        }
    }
}

/// Parses `"HH:MM"` into minutes-since-midnight.
fn parse_hh_mm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    Some(h.parse::<u32>().ok()? * 60 + m.parse::<u32>().ok()?)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategiesSection {
    #[serde(default = "default_switch_threshold")]
    pub switch_threshold: f64,

    #[serde(default)]
    pub min_spread_eur_per_mwh: Option<f64>,

    #[serde(default)]
    pub enable_learned_classifier: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PricesSection {
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub demo_mode: bool,

    #[serde(default = "default_price_cache_ttl_s")]
    pub cache_ttl_s: u64,
}

impl Default for PricesSection {
    fn default() -> Self {
        Self { region: default_region(), demo_mode: true, cache_ttl_s: default_price_cache_ttl_s() }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ForecastSection {
    #[serde(default)]
    pub pv_peak_kw: Option<f64>,

    #[serde(default)]
    pub latitude: Option<f64>,

    #[serde(default)]
    pub longitude: Option<f64>,

    #[serde(default)]
    pub load_base_kw: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TariffSection {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub base_rate_eur_per_kwh: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DatabaseSection {
    #[serde(default = "default_db_base_path")]
    pub base_path: String,

    #[serde(default = "default_db_pool_size")]
    #[validate(range(min = 1, max = 100))]
    pub pool_size: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self { base_path: default_db_base_path(), pool_size: default_db_pool_size() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_timestep_s() -> u64 {
    2
}
fn default_optimization_interval_minutes() -> i64 {
    15
}
fn default_history_append_interval_minutes() -> i64 {
    5
}
fn default_snapshot_queue_depth() -> usize {
    10
}
fn default_soc_min_percent() -> f64 {
    10.0
}
fn default_soc_max_percent() -> f64 {
    95.0
}
fn default_efficiency() -> f64 {
    0.95
}
fn default_modbus_mode() -> ModbusConnectionMode {
    ModbusConnectionMode::Tcp
}
fn default_modbus_port() -> u16 {
    502
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_modbus_timeout_s() -> f64 {
    3.0
}
fn default_poll_interval_s() -> f64 {
    2.0
}
fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_mqtt_client_id() -> String {
    "bess-ems".to_string()
}
fn default_mqtt_topic() -> String {
    "ems/telemetry".to_string()
}
fn default_mqtt_qos() -> u8 {
    1
}
fn default_mqtt_keepalive_s() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_one() -> f64 {
    1.0
}
fn default_hundred() -> f64 {
    100.0
}
fn default_switch_threshold() -> f64 {
    0.15
}
fn default_region() -> String {
    "AT".to_string()
}
fn default_price_cache_ttl_s() -> u64 {
    900
}
fn default_db_base_path() -> String {
    "./data".to_string()
}
fn default_db_pool_size() -> u32 {
    5
}

impl AppConfig {
    /// Layered load (§2a): compiled defaults → optional `config/default.toml`
    /// → environment variables prefixed `EMS__`, validated once.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("EMS__").split("__"));

        let config: AppConfig = figment.extract().context("failed to parse configuration")?;
        config.validate().context("configuration validation failed")?;
        Ok(config)
    }
}

pub type Config = AppConfig;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_builds_socket_addr() {
        let config = ServerConfig { host: "127.0.0.1".to_string(), port: 8080, enable_cors: false, enable_compression: false };
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn parses_hh_mm_into_minutes() {
        assert_eq!(parse_hh_mm("22:30"), Some(22 * 60 + 30));
        assert_eq!(parse_hh_mm("06:00"), Some(360));
        assert_eq!(parse_hh_mm("bad"), None);
    }

    #[test]
    fn bess_section_converts_to_battery_constraints() {
        let section = BessSection {
            energy_capacity_kwh: 100.0,
            p_charge_max_kw: 50.0,
            p_discharge_max_kw: 50.0,
            soc_min_percent: 10.0,
            soc_max_percent: 95.0,
            efficiency_charge: 0.95,
            efficiency_discharge: 0.95,
        };
        let constraints: crate::optimizer::BatteryConstraints = (&section).into();
        assert_eq!(constraints.energy_capacity_kwh, 100.0);
    }
}
