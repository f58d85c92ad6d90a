//! Modbus Register Engine (C1) and Poller (C2).

pub mod poller;
pub mod profiles;
pub mod registers;
pub mod transport;

use registers::RegisterError;
use transport::ModbusTransport;

use self::profiles::DeviceProfile;

/// Thin name-addressed facade over a [`DeviceProfile`] and a transport:
/// `read(name)`/`write(name, value)` as described in §4.1.
pub struct RegisterEngine<T: ModbusTransport> {
    transport: T,
    profile: DeviceProfile,
}

impl<T: ModbusTransport> RegisterEngine<T> {
    pub fn new(transport: T, profile: DeviceProfile) -> Self {
        Self { transport, profile }
    }

    pub async fn read(&mut self, name: &str) -> Result<f64, RegisterError> {
        let reg = self
            .profile
            .register(name)
            .ok_or_else(|| RegisterError::UnknownRegister(name.to_string()))?
            .clone();
        let words = self
            .transport
            .read(reg.function, reg.normalized_address(), reg.word_count() as u16)
            .await
            .map_err(|_| RegisterError::UnknownRegister(name.to_string()))?;
        reg.decode(&words)
    }

    /// Reads a named alarm bit (§4.9 signal extraction): mask-or-equals
    /// tests on Modbus registers ultimately reduce to "is this bit set".
    pub async fn read_alarm(&mut self, name: &str) -> Result<bool, RegisterError> {
        let alarm = self
            .profile
            .alarm(name)
            .ok_or_else(|| RegisterError::UnknownAlarm(name.to_string()))?
            .clone();
        let words = self
            .transport
            .read(alarm.function, alarm.normalized_address(), 1)
            .await
            .map_err(|_| RegisterError::UnknownAlarm(name.to_string()))?;
        Ok(alarm.is_set(*words.first().unwrap_or(&0)))
    }

    pub async fn write(&mut self, name: &str, value: f64) -> Result<(), RegisterError> {
        let reg = self
            .profile
            .register(name)
            .ok_or_else(|| RegisterError::UnknownRegister(name.to_string()))?
            .clone();
        let words = reg.encode(value)?;
        self.transport
            .write(reg.normalized_address(), &words)
            .await
            .map_err(|_| RegisterError::NotWritable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::MockTransport;

    #[tokio::test]
    async fn read_unknown_register_fails() {
        let mut engine = RegisterEngine::new(MockTransport::new(), profiles::hithium_ess_5016());
        let err = engine.read("nonexistent").await.unwrap_err();
        assert!(matches!(err, RegisterError::UnknownRegister(_)));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let mut transport = MockTransport::new();
        transport.connect().await.unwrap();
        let mut engine = RegisterEngine::new(transport, profiles::wstech_pcs());
        engine.write("active_power_set_w", 2500.0).await.unwrap();
        let value = engine.read("active_power_set_w").await.unwrap();
        assert_eq!(value, 2500.0);
    }
}
