//! Application configuration
//!
//! Loaded from an optional `obd-fuel.toml` and overridden by `OBD_FUEL__*`
//! environment variables, e.g. `OBD_FUEL__DEVICE=/dev/ttyUSB0` or
//! `OBD_FUEL__SESSION__COMMAND_TIMEOUT_MS=3000`.

use config::{Config, ConfigError, Environment, File, FileFormat};
use fuel_forensics::FuelChangeContext;
use fuel_monitor::MonitorSettings;
use obd_session::SessionConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "obd-fuel";
const ENV_PREFIX: &str = "OBD_FUEL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial device of the adapter
    pub device: String,
    pub baud_rate: u32,
    /// Emit JSON log lines instead of plain text
    pub log_json: bool,
    /// Log the snapshot at most this often
    pub snapshot_log_ms: u64,
    pub session: SessionConfig,
    pub monitor: MonitorSettings,
    pub quick_test: QuickTestConfig,
}

/// Optional quick fuel test started right after connecting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickTestConfig {
    pub enabled: bool,
    pub context: FuelChangeContext,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: "/dev/rfcomm0".to_string(),
            baud_rate: 38400,
            log_json: false,
            snapshot_log_ms: 5000,
            session: SessionConfig::default(),
            monitor: MonitorSettings::default(),
            quick_test: QuickTestConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `<path>.toml` (if present) and the environment
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parse a TOML document, missing keys take defaults
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
