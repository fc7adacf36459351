//! OBD-II connection session
//!
//! Connection lifecycle with bounded auto-reconnect, the sequential
//! polling loop and the throttled vehicle snapshot built on top of
//! `obd-protocol`.

mod config;
mod poller;
mod session;
mod snapshot;
mod state;
mod throttle;

pub use config::SessionConfig;
pub use poller::{CycleOutcome, PollingLoop};
pub use session::ConnectionSession;
pub use snapshot::VehicleSnapshot;
pub use state::ConnectionState;
pub use throttle::{PublishThrottle, PublishTier};
