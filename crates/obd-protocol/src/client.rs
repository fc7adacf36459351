//! OBD-II Client for ELM327 Adapters
//!
//! Command-level operations (init sequences, PID queries, VIN, PID
//! support probing) layered over a [`CommandChannel`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channel::{ChannelResponse, CommandChannel};
use crate::error::ObdError;
use crate::pid::{Pid, PidResponse, SupportedPids};
use crate::protocol::{self, RESET, VIN_REQUEST};
use crate::vin::{extract_vin, VehicleInfo};

/// Default timeout for OBD commands
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Timing for an init sequence
#[derive(Debug, Clone, Copy)]
pub struct InitTiming {
    /// Timeout for `ATZ`, which reboots the adapter
    pub reset_timeout: Duration,
    /// Timeout for every other step
    pub step_timeout: Duration,
    /// Pause after each step
    pub settle: Duration,
}

/// OBD-II client bound to one open channel
#[derive(Clone)]
pub struct ObdClient {
    channel: Arc<CommandChannel>,
    /// Command timeout
    timeout: Duration,
}

impl ObdClient {
    /// Create a client over a bound channel
    pub fn new(channel: Arc<CommandChannel>) -> Self {
        Self {
            channel,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Set command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn channel(&self) -> &Arc<CommandChannel> {
        &self.channel
    }

    /// Send an arbitrary command through the serialized channel
    pub async fn execute(&self, command: &str) -> Result<ChannelResponse, ObdError> {
        self.channel.send(command, self.timeout).await
    }

    /// Run an init sequence step by step. The first failing step aborts
    /// with `InitFailed`; nothing is retried.
    pub async fn run_init(&self, commands: &[&str], timing: InitTiming) -> Result<(), ObdError> {
        for &command in commands {
            let timeout = if command == RESET {
                timing.reset_timeout
            } else {
                timing.step_timeout
            };

            let failed = |message: String| ObdError::InitFailed {
                command: command.to_string(),
                message,
            };

            match self.channel.send(command, timeout).await {
                Ok(ChannelResponse::Complete(text)) if protocol::is_rejection(&text) => {
                    return Err(failed(format!("adapter rejected command ({})", text.trim())));
                }
                Ok(ChannelResponse::Complete(text)) => {
                    debug!("{} -> {:?}", command, text.trim());
                }
                Ok(ChannelResponse::Partial(text)) => {
                    return Err(failed(format!("incomplete response {:?}", text.trim())));
                }
                Ok(ChannelResponse::Timeout) => {
                    return Err(failed(format!("no response within {}ms", timeout.as_millis())));
                }
                Err(e) => return Err(failed(e.to_string())),
            }

            tokio::time::sleep(timing.settle).await;
        }

        info!("Adapter init sequence complete ({} commands)", commands.len());
        Ok(())
    }

    /// Query a PID and return the decoded response
    pub async fn query_pid(&self, pid: Pid) -> Result<PidResponse, ObdError> {
        let response = self.channel.send(&pid.encode(), self.timeout).await?;
        match response.text() {
            Some(text) => PidResponse::parse(pid, text, now_ms()),
            None => Err(ObdError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    /// Probe the `0100`/`0120`/`0140` bitmaps.
    ///
    /// Returns `SupportedPids::all()` if the first bitmap cannot be read.
    pub async fn probe_supported(&self) -> SupportedPids {
        let mut supported = SupportedPids::default();

        for (base, pid) in [
            (0x00, Pid::Supported00),
            (0x20, Pid::Supported20),
            (0x40, Pid::Supported40),
        ] {
            if base > 0 && !supported.has_next_range(base - 0x20) {
                break;
            }

            match self.query_pid(pid).await {
                Ok(response) => supported.merge_bitmap(base, response.value as u32),
                Err(e) if base == 0 => {
                    warn!("PID support probe failed ({}), assuming all PIDs supported", e);
                    return SupportedPids::all();
                }
                Err(e) => {
                    debug!("PID range {:02X} probe failed: {}", base, e);
                    break;
                }
            }
        }

        info!("Vehicle advertises {} PIDs", supported.advertised_count());
        supported
    }

    /// Request the VIN. Absence is not an error.
    pub async fn read_vin(&self) -> Option<VehicleInfo> {
        let response = match self.channel.send(VIN_REQUEST, self.timeout).await {
            Ok(response) => response,
            Err(e) => {
                warn!("VIN request failed: {}", e);
                return None;
            }
        };

        let info = response
            .text()
            .and_then(extract_vin)
            .and_then(|vin| VehicleInfo::from_vin(&vin));

        match &info {
            Some(info) => info!(
                "VIN {} ({})",
                info.vin,
                info.manufacturer.as_deref().unwrap_or("unknown manufacturer")
            ),
            None => info!("Vehicle did not report a VIN"),
        }
        info
    }
}

/// Current Unix time in milliseconds
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
