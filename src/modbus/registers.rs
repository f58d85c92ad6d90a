//! Register Definitions and the decode/encode transform (C1).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Modbus function code a register is read/written through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionCode {
    DiscreteInput = 2,
    Holding = 3,
    Input = 4,
}

impl FunctionCode {
    fn base_address(self) -> u32 {
        match self {
            FunctionCode::DiscreteInput => 10001,
            FunctionCode::Holding => 40001,
            FunctionCode::Input => 30001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    U16,
    I16,
    U32,
    I32,
    Float32,
}

impl DataType {
    pub fn word_count(self) -> usize {
        match self {
            DataType::U16 | DataType::I16 => 1,
            DataType::U32 | DataType::I32 | DataType::Float32 => 2,
        }
    }

    fn is_signed(self) -> bool {
        matches!(self, DataType::I16 | DataType::I32 | DataType::Float32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterCategory {
    Telemetry,
    Limit,
    Status,
    Diagnostics,
    Alarm,
    Control,
}

/// Immutable description of one device register (§3 Register Definition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDef {
    pub name: String,
    pub address: u32,
    pub function: FunctionCode,
    pub data_type: DataType,
    pub scale: f64,
    pub offset: f64,
    pub unit: String,
    pub signed: bool,
    pub zero_based: bool,
    pub category: RegisterCategory,
    pub description: String,
}

impl RegisterDef {
    /// Resolve the wire address to read/write at, per §4.1's normalization
    /// rule: non-zero-based addresses at or above the function's base are
    /// remapped to 0-based; otherwise subtract one, floored at zero.
    pub fn normalized_address(&self) -> u32 {
        normalize_address(self.address, self.function, self.zero_based)
    }

    pub fn word_count(&self) -> usize {
        self.data_type.word_count()
    }

    /// Combine `count` big-endian (MSW-first) 16-bit words into a physical
    /// value, sign-extending when the type or the explicit `signed` flag
    /// calls for it, then applying `value = raw * scale + offset`.
    pub fn decode(&self, words: &[u16]) -> Result<f64, RegisterError> {
        if words.len() != self.word_count() {
            return Err(RegisterError::WordCountMismatch {
                expected: self.word_count(),
                actual: words.len(),
            });
        }
        let mut raw: u32 = 0;
        for &w in words {
            raw = (raw << 16) | w as u32;
        }
        let signed = self.signed || self.data_type.is_signed();
        let value = match self.data_type {
            DataType::Float32 => f32::from_bits(raw) as f64,
            _ if self.word_count() == 1 => {
                if signed {
                    (raw as u16 as i16) as f64
                } else {
                    raw as u16 as f64
                }
            }
            _ => {
                if signed {
                    raw as i32 as f64
                } else {
                    raw as f64
                }
            }
        };
        Ok(value * self.scale + self.offset)
    }

    /// Writable iff function is `Holding` (3). Inverts `decode`: rounds
    /// `(value - offset) / scale` to the nearest integer and splits it into
    /// big-endian words.
    pub fn encode(&self, value: f64) -> Result<Vec<u16>, RegisterError> {
        if self.function != FunctionCode::Holding {
            return Err(RegisterError::NotWritable(self.name.clone()));
        }
        if self.scale == 0.0 {
            return Err(RegisterError::InvalidScale(self.name.clone()));
        }
        let raw = ((value - self.offset) / self.scale).round() as i64;
        let words = match self.word_count() {
            1 => vec![(raw as i16 as u16)],
            _ => {
                let raw32 = raw as i32 as u32;
                vec![(raw32 >> 16) as u16, (raw32 & 0xFFFF) as u16]
            }
        };
        Ok(words)
    }
}

/// Address + bit index, evaluated as `true` iff the targeted bit is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmDef {
    pub name: String,
    pub address: u32,
    pub bit: u8,
    #[serde(default = "default_alarm_function")]
    pub function: FunctionCode,
}

fn default_alarm_function() -> FunctionCode {
    FunctionCode::DiscreteInput
}

impl AlarmDef {
    pub fn normalized_address(&self) -> u32 {
        normalize_address(self.address, self.function, false)
    }

    pub fn is_set(&self, word: u16) -> bool {
        (word >> self.bit) & 1 == 1
    }
}

pub fn normalize_address(address: u32, function: FunctionCode, zero_based: bool) -> u32 {
    if zero_based {
        address.saturating_sub(1)
    } else {
        let base = function.base_address();
        if address >= base {
            address - base
        } else {
            address.saturating_sub(1)
        }
    }
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("register {0} is not writable (function code is not holding/3)")]
    NotWritable(String),
    #[error("register has zero scale, cannot encode a value")]
    InvalidScale(String),
    #[error("word count mismatch: expected {expected}, got {actual}")]
    WordCountMismatch { expected: usize, actual: usize },
    #[error("unknown register: {0}")]
    UnknownRegister(String),
    #[error("unknown alarm: {0}")]
    UnknownAlarm(String),
}
