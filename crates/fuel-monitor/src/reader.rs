//! PID access for the monitor
//!
//! The monitor never talks to the adapter directly. Its reads go through
//! the session's serialized channel, interleaved with ordinary polling.

use async_trait::async_trait;
use obd_protocol::Pid;
use obd_session::ConnectionSession;
use tracing::debug;

#[async_trait]
pub trait PidReader: Send + Sync {
    /// Decoded value, `None` when the read failed or timed out
    async fn read(&self, pid: Pid) -> Option<f64>;

    fn supports(&self, pid: Pid) -> bool;

    /// Latest known speed (km/h) without a round trip
    fn current_speed(&self) -> Option<f64>;
}

#[async_trait]
impl PidReader for ConnectionSession {
    async fn read(&self, pid: Pid) -> Option<f64> {
        match self.read_pid(pid).await {
            Ok(response) => Some(response.value),
            Err(e) => {
                debug!("Monitor read of PID {:02X} failed: {}", pid.as_hex(), e);
                None
            }
        }
    }

    fn supports(&self, pid: Pid) -> bool {
        ConnectionSession::supports(self, pid)
    }

    fn current_speed(&self) -> Option<f64> {
        self.snapshot().speed_kmh
    }
}
