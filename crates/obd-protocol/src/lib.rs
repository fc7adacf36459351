//! OBD-II Protocol Implementation
//!
//! This crate talks to ELM327-compatible OBD-II adapters over any
//! chunked byte transport: PID encode/decode, the serialized command
//! channel, adapter init sequences and VIN decoding.

mod channel;
mod client;
mod error;
mod pid;
mod protocol;
mod serial;
mod transport;
mod vin;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use channel::{ChannelResponse, CommandChannel};
pub use client::{now_ms, InitTiming, ObdClient, DEFAULT_TIMEOUT_MS};
pub use error::ObdError;
pub use pid::{Pid, PidResponse, SupportedPids};
pub use protocol::{full_init_sequence, light_init_sequence, ObdProtocol};
pub use serial::SerialTransport;
pub use transport::{Transport, TransportEvent};
pub use vin::{extract_vin, VehicleInfo};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
}
