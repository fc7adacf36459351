//! Post-refuel fuel monitoring
//!
//! Drives a refuel session from declaration to diagnosis: waits for the
//! vehicle to move, samples fuel trims and the O2 sensor over a fixed
//! distance, raises live anomaly alerts and hands the collected data to
//! the forensics engine.

mod announcer;
mod anomaly;
mod error;
mod monitor;
mod reader;
mod settings;

pub use announcer::{Announcer, TracingAnnouncer};
pub use anomaly::{AnomalyEvent, AnomalyTracker};
pub use error::MonitorError;
pub use monitor::{run_tick_loop, FuelMonitor, MonitorStatus, RefuelKind, RefuelMode};
pub use reader::PidReader;
pub use settings::MonitorSettings;
