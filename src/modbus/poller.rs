//! Modbus Poller (C2): connect → sync_time → read-every-register loop,
//! reconnecting with backoff on any failure.

use chrono::{Datelike, Timelike, Utc};
use tracing::{debug, error, warn};

use crate::domain::sample::TelemetrySample;

use super::profiles::DeviceProfile;
use super::registers::FunctionCode;
use super::transport::ModbusTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Disconnected,
    Connecting,
    Connected,
    Polling,
    Error,
}

pub struct ModbusPoller<T: ModbusTransport> {
    transport: T,
    profile: DeviceProfile,
    state: PollerState,
    rtc_synced_this_session: bool,
}

impl<T: ModbusTransport> ModbusPoller<T> {
    pub fn new(transport: T, profile: DeviceProfile) -> Self {
        Self {
            transport,
            profile,
            state: PollerState::Disconnected,
            rtc_synced_this_session: false,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Writes six consecutive holding registers (524..529 for the Hithium
    /// profile) with `year-2000, month, day, hour, minute, second` (§4.1).
    pub async fn sync_time(&mut self, now: chrono::DateTime<Utc>) -> anyhow::Result<()> {
        let fields = [
            ("rtc_year", (now.year() - 2000) as f64),
            ("rtc_month", now.month() as f64),
            ("rtc_day", now.day() as f64),
            ("rtc_hour", now.hour() as f64),
            ("rtc_minute", now.minute() as f64),
            ("rtc_second", now.second() as f64),
        ];
        for (name, value) in fields {
            if let Some(reg) = self.profile.register(name) {
                let words = reg.encode(value)?;
                self.transport.write(reg.normalized_address(), &words).await?;
            }
        }
        Ok(())
    }

    /// Runs one poll tick. On success returns a populated Telemetry Sample;
    /// on any transport failure transitions to `Error`/`Disconnected` and
    /// returns the error so the caller can sleep and retry (§4.2).
    pub async fn poll_once(&mut self) -> anyhow::Result<TelemetrySample> {
        if self.state != PollerState::Connected && self.state != PollerState::Polling {
            self.state = PollerState::Connecting;
            if let Err(e) = self.transport.connect().await {
                self.state = PollerState::Error;
                self.rtc_synced_this_session = false;
                return Err(e);
            }
            self.state = PollerState::Connected;
        }

        if !self.rtc_synced_this_session {
            if let Err(e) = self.sync_time(Utc::now()).await {
                warn!(error=%e, "RTC sync failed, continuing poll");
            } else {
                self.rtc_synced_this_session = true;
            }
        }

        match self.poll_registers().await {
            Ok(sample) => {
                self.state = PollerState::Polling;
                Ok(sample)
            }
            Err(e) => {
                error!(error=%e, "modbus poll tick failed, disconnecting");
                self.state = PollerState::Disconnected;
                self.rtc_synced_this_session = false;
                Err(e)
            }
        }
    }

    async fn poll_registers(&mut self) -> anyhow::Result<TelemetrySample> {
        let mut sample = TelemetrySample {
            timestamp: Some(Utc::now()),
            ..Default::default()
        };

        let register_names: Vec<String> = self.profile.registers.keys().cloned().collect();
        for name in register_names {
            let reg = self.profile.register(&name).unwrap().clone();
            match self
                .transport
                .read(reg.function, reg.normalized_address(), reg.word_count() as u16)
                .await
            {
                Ok(words) => match reg.decode(&words) {
                    Ok(value) => assign_field(&mut sample, &name, value),
                    Err(e) => debug!(register = %name, error=%e, "register decode failed"),
                },
                Err(e) => debug!(register = %name, error=%e, "register read failed"),
            }
        }

        let alarm_names: Vec<String> = self.profile.alarms.keys().cloned().collect();
        for name in alarm_names {
            let alarm = self.profile.alarm(&name).unwrap().clone();
            if let Ok(words) = self
                .transport
                .read(FunctionCode::DiscreteInput, alarm.normalized_address(), 1)
                .await
            {
                if let Some(&w) = words.first() {
                    if alarm.is_set(w) {
                        sample.active_alarms.push(name);
                    }
                }
            }
        }

        if let Some(code) = sample.status_code {
            if let Some(label) = self.profile.status_label(code) {
                sample.status_text = Some(label.to_string());
            }
        }

        sample.fill_derived();
        Ok(sample)
    }
}

fn assign_field(sample: &mut TelemetrySample, name: &str, value: f64) {
    match name {
        "soc_percent" => sample.soc_pct = Some(value),
        "soh_percent" => sample.soh_pct = Some(value),
        "voltage_v" | "dc_voltage_v" => sample.voltage_v = Some(value),
        "current_a" | "dc_current_a" => sample.current_a = Some(value),
        "temperature_c" => sample.temperature_c = Some(value),
        "status_code" | "status_word" => sample.status_code = Some(value as i64),
        "max_charge_power_kw" => sample.max_charge_power_kw = Some(value),
        "max_discharge_power_kw" => sample.max_discharge_power_kw = Some(value),
        "max_charge_current_a" => sample.max_charge_current_a = Some(value),
        "max_discharge_current_a" => sample.max_discharge_current_a = Some(value),
        "insulation_kohm" => sample.insulation_kohm = Some(value),
        "grid_power_kw" => sample.p_grid_kw = Some(value),
        other => {
            sample
                .raw
                .insert(other.to_string(), serde_json::json!(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::profiles::hithium_ess_5016;
    use crate::modbus::transport::MockTransport;

    #[tokio::test]
    async fn poll_once_decodes_soc_and_temperature() {
        let profile = hithium_ess_5016();
        let mut transport = MockTransport::new();
        transport.connect().await.unwrap();
        transport.set_word(FunctionCode::Input, 3, 32000); // soc register addr 4 normalized -> 3
        transport.set_word(FunctionCode::Input, 41, 313); // temperature_c addr 42 -> 41, 313-40=273

        let mut poller = ModbusPoller::new(transport, profile);
        let sample = poller.poll_once().await.unwrap();
        assert_eq!(sample.soc_pct, Some(32000.0));
        assert_eq!(sample.temperature_c, Some(273.0));
        assert_eq!(poller.state(), PollerState::Polling);
    }

    #[tokio::test]
    async fn connects_lazily_on_first_poll() {
        let profile = hithium_ess_5016();
        let transport = MockTransport::new();
        let mut poller = ModbusPoller::new(transport, profile);
        assert_eq!(poller.state(), PollerState::Disconnected);
        let sample = poller.poll_once().await.unwrap();
        assert_eq!(sample.soc_pct, Some(0.0));
        assert_eq!(poller.state(), PollerState::Polling);
    }
}
