//! Session configuration

use obd_protocol::{InitTiming, ObdProtocol};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection session and polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Protocol selected at the end of the full init
    pub protocol: ObdProtocol,
    /// Timeout for ordinary commands (milliseconds)
    pub command_timeout_ms: u64,
    /// Timeout for the adapter reset
    pub init_timeout_ms: u64,
    /// Timeout for every other init step
    pub init_step_timeout_ms: u64,
    /// Pause after each init step
    pub init_settle_ms: u64,
    /// Pause between polled PIDs; adapters cannot interleave requests
    pub inter_command_delay_ms: u64,
    /// Auto-reconnect attempts per `connect()`
    pub reconnect_max_attempts: u32,
    /// Fixed delay before each reconnect attempt
    pub reconnect_backoff_ms: u64,
    /// Consecutive fully failed cycles before a warning is logged
    pub failure_warn_threshold: u32,
    /// Publish interval while the engine is off
    pub idle_publish_ms: u64,
    /// Publish interval while driving normally
    pub normal_publish_ms: u64,
    /// Publish interval above `sport_rpm`
    pub sport_publish_ms: u64,
    pub sport_rpm: f64,
    /// Request the VIN after init
    pub read_vin: bool,
    /// Probe supported PIDs after init
    pub probe_supported_pids: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol: ObdProtocol::Auto,
            command_timeout_ms: 2000,
            init_timeout_ms: 5000,
            init_step_timeout_ms: 2000,
            init_settle_ms: 100,
            inter_command_delay_ms: 50,
            reconnect_max_attempts: 3,
            reconnect_backoff_ms: 3000,
            failure_warn_threshold: 5,
            idle_publish_ms: 1000,
            normal_publish_ms: 500,
            sport_publish_ms: 200,
            sport_rpm: 4000.0,
            read_vin: true,
            probe_supported_pids: true,
        }
    }
}

impl SessionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn inter_command_delay(&self) -> Duration {
        Duration::from_millis(self.inter_command_delay_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn init_timing(&self) -> InitTiming {
        InitTiming {
            reset_timeout: Duration::from_millis(self.init_timeout_ms),
            step_timeout: Duration::from_millis(self.init_step_timeout_ms),
            settle: Duration::from_millis(self.init_settle_ms),
        }
    }
}
