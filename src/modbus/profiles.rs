//! Device Profiles: named bundles of register/alarm maps plus a default
//! connection block (§3 Device Profile). Two profiles ship as part of the
//! external contract: `hithium_ess_5016` (BMS) and `wstech_pcs` (inverter).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::registers::{AlarmDef, DataType, FunctionCode, RegisterCategory, RegisterDef};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ConnectionMode {
    Tcp,
    Rtu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub mode: ConnectionMode,
    pub host: Option<String>,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    pub serial_port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub parity: SerialParity,
    pub slave_id: u8,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,
    #[serde(default = "default_poll_interval_s")]
    pub poll_interval_s: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub enum SerialParity {
    #[default]
    None,
    Even,
    Odd,
}

fn default_tcp_port() -> u16 {
    502
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_timeout_s() -> f64 {
    3.0
}
fn default_poll_interval_s() -> f64 {
    2.0
}

impl ConnectionConfig {
    /// Poll interval is floored at 0.5s per §4.2.
    pub fn effective_poll_interval_s(&self) -> f64 {
        self.poll_interval_s.max(0.5)
    }
}

/// Named bundle of register/alarm maps and status-code labels, plus a
/// default connection block.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub name: String,
    pub registers: HashMap<String, RegisterDef>,
    pub alarms: HashMap<String, AlarmDef>,
    pub status_labels: HashMap<i64, String>,
    pub default_connection: ConnectionConfig,
}

impl DeviceProfile {
    pub fn register(&self, name: &str) -> Option<&RegisterDef> {
        self.registers.get(name)
    }

    pub fn alarm(&self, name: &str) -> Option<&AlarmDef> {
        self.alarms.get(name)
    }

    pub fn status_label(&self, code: i64) -> Option<&str> {
        self.status_labels.get(&code).map(String::as_str)
    }
}

fn reg(
    name: &str,
    address: u32,
    function: FunctionCode,
    data_type: DataType,
    scale: f64,
    offset: f64,
    unit: &str,
    category: RegisterCategory,
) -> (String, RegisterDef) {
    (
        name.to_string(),
        RegisterDef {
            name: name.to_string(),
            address,
            function,
            data_type,
            scale,
            offset,
            unit: unit.to_string(),
            signed: matches!(data_type, DataType::I16 | DataType::I32),
            zero_based: false,
            category,
            description: String::new(),
        },
    )
}

/// Hithium ESS-5016 BMS profile. Addresses/scales/offsets in this table are
/// the external contract (§6) and must remain bit-exact.
pub fn hithium_ess_5016() -> DeviceProfile {
    use DataType::*;
    use FunctionCode::*;
    use RegisterCategory::*;

    let registers = HashMap::from([
        reg("current_a", 3, Input, U16, 0.1, -3200.0, "A", Telemetry),
        reg("soc_percent", 4, Input, U16, 1.0, 0.0, "%", Telemetry),
        reg("soh_percent", 5, Input, U16, 1.0, 0.0, "%", Telemetry),
        reg("voltage_v", 6, Input, U16, 0.1, 0.0, "V", Telemetry),
        reg(
            "insulation_kohm",
            40,
            Input,
            U16,
            1.0,
            0.0,
            "kOhm",
            Diagnostics,
        ),
        reg("temperature_c", 42, Input, U16, 1.0, -40.0, "°C", Telemetry),
        reg("status_code", 43, Input, U16, 1.0, 0.0, "", Status),
        reg(
            "max_charge_power_kw",
            50,
            Input,
            U16,
            0.1,
            0.0,
            "kW",
            Limit,
        ),
        reg(
            "max_discharge_power_kw",
            51,
            Input,
            U16,
            0.1,
            0.0,
            "kW",
            Limit,
        ),
        reg(
            "max_charge_current_a",
            52,
            Input,
            U16,
            0.1,
            0.0,
            "A",
            Limit,
        ),
        reg(
            "max_discharge_current_a",
            53,
            Input,
            U16,
            0.1,
            0.0,
            "A",
            Limit,
        ),
        // Six consecutive holding registers for RTC alignment, §4.1 sync_time.
        reg("rtc_year", 524, Holding, U16, 1.0, 0.0, "", Control),
        reg("rtc_month", 525, Holding, U16, 1.0, 0.0, "", Control),
        reg("rtc_day", 526, Holding, U16, 1.0, 0.0, "", Control),
        reg("rtc_hour", 527, Holding, U16, 1.0, 0.0, "", Control),
        reg("rtc_minute", 528, Holding, U16, 1.0, 0.0, "", Control),
        reg("rtc_second", 529, Holding, U16, 1.0, 0.0, "", Control),
    ]);

    let alarms = HashMap::from([(
        "overvoltage".to_string(),
        AlarmDef {
            name: "overvoltage".into(),
            address: 1,
            bit: 0,
            function: FunctionCode::DiscreteInput,
        },
    )]);

    let status_labels = HashMap::from([
        (0, "Init".to_string()),
        (1, "Charging".to_string()),
        (2, "Discharging".to_string()),
        (3, "Ready".to_string()),
        (5, "ChargeBlock".to_string()),
        (6, "DischargeBlock".to_string()),
        (7, "Block both".to_string()),
        (8, "Fault".to_string()),
    ]);

    DeviceProfile {
        name: "hithium_ess_5016".to_string(),
        registers,
        alarms,
        status_labels,
        default_connection: ConnectionConfig {
            mode: ConnectionMode::Tcp,
            host: Some("127.0.0.1".to_string()),
            port: 502,
            serial_port: None,
            baud_rate: 9600,
            parity: SerialParity::None,
            slave_id: 1,
            timeout_s: 3.0,
            poll_interval_s: 2.0,
        },
    }
}

/// WSTECH PCS (inverter) profile.
pub fn wstech_pcs() -> DeviceProfile {
    use DataType::*;
    use FunctionCode::*;
    use RegisterCategory::*;

    let registers = HashMap::from([
        reg(
            "active_power_set_w",
            40010,
            Holding,
            I32,
            1.0,
            0.0,
            "W",
            Control,
        ),
        reg(
            "active_power_limit_pct",
            40012,
            Holding,
            U16,
            1.0,
            0.0,
            "%",
            Control,
        ),
        reg("remote_enable", 40014, Holding, U16, 1.0, 0.0, "", Control),
        reg("status_word", 30010, Input, U16, 1.0, 0.0, "", Status),
        reg("dc_voltage_v", 30012, Input, U16, 0.1, 0.0, "V", Telemetry),
        reg("dc_current_a", 30013, Input, U16, 0.1, 0.0, "A", Telemetry),
        reg("grid_power_kw", 30020, Input, I32, 0.01, 0.0, "kW", Telemetry),
    ]);

    let alarms = HashMap::from([
        (
            "dso_trip".to_string(),
            AlarmDef {
                name: "dso_trip".into(),
                address: 100,
                bit: 0,
                function: FunctionCode::DiscreteInput,
            },
        ),
        (
            "safety_alarm".to_string(),
            AlarmDef {
                name: "safety_alarm".into(),
                address: 100,
                bit: 1,
                function: FunctionCode::DiscreteInput,
            },
        ),
    ]);

    DeviceProfile {
        name: "wstech_pcs".to_string(),
        registers,
        alarms,
        status_labels: HashMap::new(),
        default_connection: ConnectionConfig {
            mode: ConnectionMode::Tcp,
            host: Some("127.0.0.1".to_string()),
            port: 502,
            serial_port: None,
            baud_rate: 9600,
            parity: SerialParity::None,
            slave_id: 2,
            timeout_s: 3.0,
            poll_interval_s: 2.0,
        },
    }
}

pub fn lookup(name: &str) -> Option<DeviceProfile> {
    match name {
        "hithium_ess_5016" => Some(hithium_ess_5016()),
        "wstech_pcs" => Some(wstech_pcs()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hithium_profile_has_documented_addresses() {
        let p = hithium_ess_5016();
        let soc = p.register("soc_percent").unwrap();
        assert_eq!(soc.address, 4);
        assert_eq!(soc.scale, 1.0);
        let current = p.register("current_a").unwrap();
        assert_eq!(current.offset, -3200.0);
    }

    #[test]
    fn hithium_status_dictionary_matches_contract() {
        let p = hithium_ess_5016();
        assert_eq!(p.status_label(1), Some("Charging"));
        assert_eq!(p.status_label(8), Some("Fault"));
    }

    #[test]
    fn wstech_active_power_register_is_writable() {
        let p = wstech_pcs();
        let reg = p.register("active_power_set_w").unwrap();
        assert!(reg.encode(1500.0).is_ok());
    }

    #[test]
    fn lookup_unknown_profile_is_none() {
        assert!(lookup("acme_widget").is_none());
    }
}
