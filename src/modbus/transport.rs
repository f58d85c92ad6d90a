//! Minimal transport abstraction so the register engine and poller can be
//! exercised without a live device. The `modbus` feature wires a real
//! `tokio-modbus` TCP client; tests and the simulated hardware mode use
//! [`MockTransport`].

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use super::registers::FunctionCode;

#[async_trait]
pub trait ModbusTransport: Send + Sync {
    async fn connect(&mut self) -> Result<()>;
    async fn read(&mut self, function: FunctionCode, address: u32, count: u16) -> Result<Vec<u16>>;
    async fn write(&mut self, address: u32, values: &[u16]) -> Result<()>;
    fn is_connected(&self) -> bool;
}

#[async_trait]
impl ModbusTransport for Box<dyn ModbusTransport> {
    async fn connect(&mut self) -> Result<()> {
        (**self).connect().await
    }

    async fn read(&mut self, function: FunctionCode, address: u32, count: u16) -> Result<Vec<u16>> {
        (**self).read(function, address, count).await
    }

    async fn write(&mut self, address: u32, values: &[u16]) -> Result<()> {
        (**self).write(address, values).await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

#[cfg(feature = "modbus")]
pub struct TcpTransport {
    host: String,
    port: u16,
    slave_id: u8,
    ctx: Option<tokio_modbus::client::Context>,
}

#[cfg(feature = "modbus")]
impl TcpTransport {
    pub fn new(host: String, port: u16, slave_id: u8) -> Self {
        Self {
            host,
            port,
            slave_id,
            ctx: None,
        }
    }
}

#[cfg(feature = "modbus")]
#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        use tokio_modbus::prelude::*;
        let socket_addr = format!("{}:{}", self.host, self.port).parse()?;
        let mut ctx = tcp::connect(socket_addr).await?;
        ctx.set_slave(Slave(self.slave_id));
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn read(&mut self, function: FunctionCode, address: u32, count: u16) -> Result<Vec<u16>> {
        use tokio_modbus::prelude::*;
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("modbus transport not connected"))?;
        let words = match function {
            FunctionCode::Holding => ctx.read_holding_registers(address as u16, count).await??,
            FunctionCode::Input => ctx.read_input_registers(address as u16, count).await??,
            FunctionCode::DiscreteInput => {
                let bits = ctx.read_discrete_inputs(address as u16, count).await??;
                bits.into_iter().map(|b| b as u16).collect()
            }
        };
        Ok(words)
    }

    async fn write(&mut self, address: u32, values: &[u16]) -> Result<()> {
        use tokio_modbus::prelude::*;
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("modbus transport not connected"))?;
        ctx.write_multiple_registers(address as u16, values).await??;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }
}

#[cfg(feature = "modbus")]
pub struct RtuTransport {
    serial_port: String,
    baud_rate: u32,
    parity: super::profiles::SerialParity,
    slave_id: u8,
    ctx: Option<tokio_modbus::client::Context>,
}

#[cfg(feature = "modbus")]
impl RtuTransport {
    pub fn new(serial_port: String, baud_rate: u32, parity: super::profiles::SerialParity, slave_id: u8) -> Self {
        Self { serial_port, baud_rate, parity, slave_id, ctx: None }
    }
}

#[cfg(feature = "modbus")]
#[async_trait]
impl ModbusTransport for RtuTransport {
    async fn connect(&mut self) -> Result<()> {
        use tokio_modbus::prelude::*;
        use tokio_serial::SerialStream;

        let parity = match self.parity {
            super::profiles::SerialParity::None => tokio_serial::Parity::None,
            super::profiles::SerialParity::Even => tokio_serial::Parity::Even,
            super::profiles::SerialParity::Odd => tokio_serial::Parity::Odd,
        };
        let builder = tokio_serial::new(&self.serial_port, self.baud_rate).parity(parity);
        let port = SerialStream::open(&builder)?;
        let mut ctx = rtu::attach_slave(port, Slave(self.slave_id));
        // tokio-modbus RTU contexts connect lazily on first request; probe
        // the slave now so startup fails fast on a bad cable/address.
        let _ = ctx.read_holding_registers(0, 1).await;
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn read(&mut self, function: FunctionCode, address: u32, count: u16) -> Result<Vec<u16>> {
        use tokio_modbus::prelude::*;
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("modbus transport not connected"))?;
        let words = match function {
            FunctionCode::Holding => ctx.read_holding_registers(address as u16, count).await??,
            FunctionCode::Input => ctx.read_input_registers(address as u16, count).await??,
            FunctionCode::DiscreteInput => {
                let bits = ctx.read_discrete_inputs(address as u16, count).await??;
                bits.into_iter().map(|b| b as u16).collect()
            }
        };
        Ok(words)
    }

    async fn write(&mut self, address: u32, values: &[u16]) -> Result<()> {
        use tokio_modbus::prelude::*;
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("modbus transport not connected"))?;
        ctx.write_multiple_registers(address as u16, values).await??;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }
}

/// In-memory transport backing the `sim`/Mock hardware modes and unit
/// tests: registers are just a word map keyed by (function, address).
#[derive(Default)]
pub struct MockTransport {
    connected: bool,
    words: HashMap<(FunctionCode, u32), u16>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_word(&mut self, function: FunctionCode, address: u32, value: u16) {
        self.words.insert((function, address), value);
    }
}

#[async_trait]
impl ModbusTransport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn read(&mut self, function: FunctionCode, address: u32, count: u16) -> Result<Vec<u16>> {
        if !self.connected {
            anyhow::bail!("mock transport not connected");
        }
        Ok((0..count)
            .map(|i| {
                self.words
                    .get(&(function, address + i as u32))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    async fn write(&mut self, address: u32, values: &[u16]) -> Result<()> {
        if !self.connected {
            anyhow::bail!("mock transport not connected");
        }
        for (i, &v) in values.iter().enumerate() {
            self.words
                .insert((FunctionCode::Holding, address + i as u32), v);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
