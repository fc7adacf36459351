//! OBD-II PID Definitions and Response Parsing
//!
//! Defines the Mode 01 Parameter IDs (PIDs) used by the session and the
//! fuel monitor, how to request them, and their SAE decoding formulas.

use crate::error::ObdError;
use crate::mode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Standard OBD-II PIDs for Mode 01 (current data)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// PIDs supported 01-20 (0x00)
    Supported00 = 0x00,
    /// Calculated engine load (0x04)
    EngineLoad = 0x04,
    /// Engine coolant temperature (0x05)
    CoolantTemp = 0x05,
    /// Short-term fuel trim bank 1 (0x06)
    ShortFuelTrim = 0x06,
    /// Long-term fuel trim bank 1 (0x07)
    LongFuelTrim = 0x07,
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
    /// Oxygen sensor voltage bank 1, sensor 1 (0x14)
    O2Voltage = 0x14,
    /// PIDs supported 21-40 (0x20)
    Supported20 = 0x20,
    /// Fuel tank level input (0x2F)
    FuelLevel = 0x2F,
    /// PIDs supported 41-60 (0x40)
    Supported40 = 0x40,
    /// Control module voltage (0x42)
    ControlModuleVoltage = 0x42,
}

impl Pid {
    /// PIDs read by every polling cycle, in issue order
    pub const POLLED: [Pid; 6] = [
        Pid::Rpm,
        Pid::Speed,
        Pid::CoolantTemp,
        Pid::ControlModuleVoltage,
        Pid::FuelLevel,
        Pid::EngineLoad,
    ];

    /// Get the PID hex value
    pub fn as_hex(&self) -> u8 {
        *self as u8
    }

    /// Mode 01 request text, e.g. `010C`
    pub fn encode(&self) -> String {
        format!("{:02X}{:02X}", mode::CURRENT_DATA, self.as_hex())
    }

    /// Get the number of response bytes for this PID
    pub fn response_bytes(&self) -> usize {
        match self {
            Pid::Supported00 | Pid::Supported20 | Pid::Supported40 => 4,
            Pid::Rpm | Pid::O2Voltage | Pid::ControlModuleVoltage => 2,
            _ => 1,
        }
    }

    /// Look up a PID by its hex value
    pub fn from_hex(value: u8) -> Option<Pid> {
        let pid = match value {
            0x00 => Pid::Supported00,
            0x04 => Pid::EngineLoad,
            0x05 => Pid::CoolantTemp,
            0x06 => Pid::ShortFuelTrim,
            0x07 => Pid::LongFuelTrim,
            0x0C => Pid::Rpm,
            0x0D => Pid::Speed,
            0x14 => Pid::O2Voltage,
            0x20 => Pid::Supported20,
            0x2F => Pid::FuelLevel,
            0x40 => Pid::Supported40,
            0x42 => Pid::ControlModuleVoltage,
            _ => return None,
        };
        Some(pid)
    }

    /// Apply the SAE formula to the data bytes following the header
    fn decode_value(&self, bytes: &[u8]) -> f64 {
        let a = bytes[0] as f64;
        match self {
            // RPM: ((A*256)+B)/4
            Pid::Rpm => ((a * 256.0) + bytes[1] as f64) / 4.0,
            // Speed: A (km/h)
            Pid::Speed => a,
            // Coolant Temp: A - 40 (°C)
            Pid::CoolantTemp => a - 40.0,
            // Engine Load / Fuel level: A * 100 / 255 (%)
            Pid::EngineLoad | Pid::FuelLevel => a * 100.0 / 255.0,
            // Short/Long fuel trim: (A - 128) * 100 / 128 (%), one decimal
            Pid::ShortFuelTrim | Pid::LongFuelTrim => {
                round_tenth((a - 128.0) * 100.0 / 128.0)
            }
            // O2 Voltage: A / 200 (V)
            Pid::O2Voltage => a / 200.0,
            // Control module voltage: ((A*256)+B) / 1000 (V)
            Pid::ControlModuleVoltage => ((a * 256.0) + bytes[1] as f64) / 1000.0,
            // Bitmaps have no scalar value; expose the raw word
            Pid::Supported00 | Pid::Supported20 | Pid::Supported40 => {
                u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
        }
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Response from a PID query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidResponse {
    /// The PID that was queried
    pub pid: u8,
    /// Timestamp when the response was received (Unix ms)
    pub timestamp_ms: u64,
    /// Decoded value
    pub value: f64,
    /// Raw bytes from the response
    pub raw_bytes: Vec<u8>,
}

impl PidResponse {
    /// Decode a raw adapter response for `pid`.
    ///
    /// Whitespace and echo lines are ignored and the `41 <pid>` header may
    /// appear anywhere in a line. A missing header, short payload, or
    /// non-hex payload is a `DecodeFailure`.
    pub fn parse(pid: Pid, raw: &str, timestamp_ms: u64) -> Result<Self, ObdError> {
        let header = format!("{:02X}{:02X}", mode::CURRENT_DATA + 0x40, pid.as_hex());
        let wanted = pid.response_bytes();

        for line in raw.split(['\r', '\n']) {
            let cleaned: String = line
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_uppercase();

            let Some(start) = cleaned.find(&header) else {
                continue;
            };

            let payload = &cleaned[start + header.len()..];
            if payload.len() < wanted * 2 {
                return Err(ObdError::DecodeFailure {
                    pid: pid.as_hex(),
                    reason: format!("expected {} data bytes, got {:?}", wanted, payload),
                });
            }

            let data = payload.get(..wanted * 2).unwrap_or(payload);
            let raw_bytes = parse_hex_bytes(data).ok_or_else(|| {
                ObdError::DecodeFailure {
                    pid: pid.as_hex(),
                    reason: format!("non-hex payload {:?}", payload),
                }
            })?;

            return Ok(Self {
                pid: pid.as_hex(),
                timestamp_ms,
                value: pid.decode_value(&raw_bytes),
                raw_bytes,
            });
        }

        Err(ObdError::DecodeFailure {
            pid: pid.as_hex(),
            reason: format!("header {} not found", header),
        })
    }
}

/// Parse an even-length hex string into bytes
pub(crate) fn parse_hex_bytes(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

/// Set of Mode 01 PIDs the vehicle advertises
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SupportedPids {
    pids: BTreeSet<u8>,
    /// True when probing failed and every PID is assumed readable
    assume_all: bool,
}

impl SupportedPids {
    /// Set that reports every PID as supported
    pub fn all() -> Self {
        Self {
            pids: BTreeSet::new(),
            assume_all: true,
        }
    }

    /// Merge one `01 00/20/40` bitmap. Bit 7 of A is `base + 1`.
    pub fn merge_bitmap(&mut self, base: u8, bitmap: u32) {
        for bit in 0..32u8 {
            if bitmap & (1u32 << (31 - bit)) != 0 {
                self.pids.insert(base + bit + 1);
            }
        }
    }

    /// Whether the bitmap at `base` advertises the next range
    pub fn has_next_range(&self, base: u8) -> bool {
        self.assume_all || self.pids.contains(&(base + 0x20))
    }

    pub fn supports(&self, pid: Pid) -> bool {
        self.assume_all || self.pids.contains(&pid.as_hex())
    }

    pub fn is_assumed(&self) -> bool {
        self.assume_all
    }

    /// Number of PIDs the bitmaps advertised
    pub fn advertised_count(&self) -> usize {
        self.pids.len()
    }
}
