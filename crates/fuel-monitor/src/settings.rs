//! Monitor settings
//!
//! Live settings are shared over a `watch` channel; a session clones them
//! once when it enters `Monitoring` and never looks at them again.

use fuel_forensics::ForensicsThresholds;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Distance to monitor before analyzing (km)
    pub target_distance_km: f64,
    /// Tick period (milliseconds)
    pub tick_ms: u64,
    /// STFT/LTFT/O2 read period
    pub trim_read_ms: u64,
    /// Fuel level read period
    pub fuel_level_read_ms: u64,
    /// Speed that counts as driving off (km/h)
    pub motion_start_kmh: f64,
    /// How long motion must last before monitoring starts
    pub motion_sustain_ms: u64,
    /// Speeds below this are noise and not integrated (km/h)
    pub min_speed_kmh: f64,
    /// |STFT| that starts the anomaly timer (%)
    pub stft_warning_pct: f64,
    /// Sustained anomaly before the first alert
    pub anomaly_min_ms: u64,
    /// Minimum gap between anomaly alerts
    pub anomaly_cooldown_ms: u64,
    /// Anomaly duration that earns a recovery notice
    pub anomaly_recovery_min_ms: u64,
    pub forensics: ForensicsThresholds,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            target_distance_km: 10.0,
            tick_ms: 500,
            trim_read_ms: 2000,
            fuel_level_read_ms: 30_000,
            motion_start_kmh: 3.0,
            motion_sustain_ms: 2000,
            min_speed_kmh: 3.0,
            stft_warning_pct: 10.0,
            anomaly_min_ms: 10_000,
            anomaly_cooldown_ms: 60_000,
            anomaly_recovery_min_ms: 5_000,
            forensics: ForensicsThresholds::default(),
        }
    }
}

impl MonitorSettings {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}
