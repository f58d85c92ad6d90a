//! MQTT Ingestor (C3): subscribes to one telemetry topic, maps JSON payload
//! fields onto a [`TelemetrySample`] (§4.3), and pushes it into the
//! site's [`PlantStateStore`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::plant_state::PlantStateStore;
use crate::domain::sample::{TelemetrySample, TelemetrySource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker_host: String,
    #[serde(default = "default_port")]
    pub broker_port: u16,
    pub client_id: String,
    pub topic: String,
    #[serde(default = "default_qos")]
    pub qos: u8,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_keepalive_s")]
    pub keepalive_s: u64,
}

fn default_port() -> u16 {
    1883
}
fn default_qos() -> u8 {
    1
}
fn default_keepalive_s() -> u64 {
    60
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_host: String::new(),
            broker_port: default_port(),
            client_id: String::new(),
            topic: "ems/telemetry".to_string(),
            qos: default_qos(),
            username: None,
            password: None,
            keepalive_s: default_keepalive_s(),
        }
    }
}

/// Extracts a coercible f64 from the first key in `keys` that is present
/// and numeric/stringy-numeric; non-coercible values are ignored silently
/// per §4.3.
fn first_numeric(payload: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(v) = payload.get(key) {
            if let Some(n) = v.as_f64() {
                return Some(n);
            }
            if let Some(s) = v.as_str() {
                if let Ok(n) = s.parse::<f64>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

/// Map one JSON payload onto a [`TelemetrySample`] per the §4.3 table.
pub fn map_payload(payload: &Value) -> TelemetrySample {
    let mut sample = TelemetrySample {
        timestamp: Some(chrono::Utc::now()),
        ..Default::default()
    };

    sample.soc_pct = first_numeric(payload, &["soc", "sys_soc"]);
    sample.p_bess_kw = first_numeric(payload, &["bat_p", "sys_bat_p"]).map(|w| w / 1000.0);
    sample.p_pv_kw = first_numeric(payload, &["sys_pv_p"]).map(|w| w / 1000.0);
    sample.p_load_kw = first_numeric(payload, &["sys_load_p"]).map(|w| w / 1000.0);
    sample.p_grid_kw = first_numeric(payload, &["sys_grid_p", "grid_on_p"]).map(|w| w / 1000.0);
    sample.voltage_v = first_numeric(payload, &["voltage", "bat_v", "sys_dc_v"]);
    sample.temperature_c = first_numeric(payload, &["temperature", "bat_temp", "cell_temp"]);

    if let Some(sts) = payload.get("bat_sts").and_then(Value::as_str) {
        sample.status_text = Some(sts.to_string());
        if let Some(bits) = payload
            .get("status_bits")
            .or_else(|| payload.get("fault_code"))
            .and_then(Value::as_str)
        {
            sample.raw.insert("status_bits".to_string(), Value::String(bits.to_string()));
        }
    }

    sample.raw.insert("_payload".to_string(), payload.clone());
    sample.fill_derived();
    sample
}

#[cfg(feature = "mqtt")]
pub async fn run_ingestor(cfg: MqttConfig, store: Arc<PlantStateStore>) {
    use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};

    if !cfg.enabled || cfg.broker_host.is_empty() {
        info!("MQTT ingestor disabled or no broker configured, skipping");
        return;
    }

    let qos = match cfg.qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    };

    let mut opts = MqttOptions::new(&cfg.client_id, &cfg.broker_host, cfg.broker_port);
    opts.set_keep_alive(Duration::from_secs(cfg.keepalive_s));
    if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(user, pass);
    }

    let (client, mut event_loop) = AsyncClient::new(opts, 64);
    if let Err(e) = client.subscribe(&cfg.topic, qos).await {
        warn!(error=%e, topic=%cfg.topic, "failed to subscribe to MQTT topic");
        return;
    }

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match serde_json::from_slice::<Value>(&publish.payload) {
                    Ok(payload) => {
                        let sample = map_payload(&payload);
                        store.ingest(sample, TelemetrySource::Mqtt).await;
                    }
                    Err(e) => debug!(error=%e, "MQTT payload was not valid JSON, dropped"),
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error=%e, "MQTT connection error, rumqttc will auto-reconnect");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(not(feature = "mqtt"))]
pub async fn run_ingestor(_cfg: MqttConfig, _store: Arc<PlantStateStore>) {
    warn!("MQTT ingestor requires the 'mqtt' feature to be enabled");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_documented_field_aliases() {
        let payload = json!({
            "soc": 42.0,
            "bat_p": 1500.0,
            "sys_pv_p": 3000.0,
            "sys_load_p": 500.0,
            "grid_on_p": -1000.0,
        });
        let sample = map_payload(&payload);
        assert_eq!(sample.soc_pct, Some(42.0));
        assert_eq!(sample.p_bess_kw, Some(1.5));
        assert_eq!(sample.p_pv_kw, Some(3.0));
        assert_eq!(sample.p_load_kw, Some(0.5));
        assert_eq!(sample.p_grid_kw, Some(-1.0));
    }

    #[test]
    fn first_hit_wins_between_aliases() {
        let payload = json!({ "soc": 10.0, "sys_soc": 99.0 });
        let sample = map_payload(&payload);
        assert_eq!(sample.soc_pct, Some(10.0));
    }

    #[test]
    fn non_coercible_values_are_ignored() {
        let payload = json!({ "soc": "not-a-number" });
        let sample = map_payload(&payload);
        assert_eq!(sample.soc_pct, None);
    }
}
