//! Spoken announcements
//!
//! Fire-and-forget from the monitor's point of view. A speech backend
//! implements [`Announcer`]; the default just logs.

use tracing::info;

pub trait Announcer: Send + Sync {
    fn announce(&self, message: &str);
}

/// Logs every announcement at `info`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnnouncer;

impl Announcer for TracingAnnouncer {
    fn announce(&self, message: &str) {
        info!(target: "announcer", "{}", message);
    }
}
