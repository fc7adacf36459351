//! Polling loop
//!
//! Reads the tracked PID set sequentially, one round trip at a time, and
//! publishes the snapshot through the adaptive throttle.

use std::sync::Arc;

use obd_protocol::{ObdClient, ObdError, Pid, SupportedPids};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::snapshot::VehicleSnapshot;
use crate::throttle::PublishThrottle;

/// Result of one polling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    /// The channel reported the link gone; the loop must stop
    pub link_lost: bool,
}

/// Sequential reader of the polled PID set for one link
pub struct PollingLoop {
    client: ObdClient,
    pids: Vec<Pid>,
    config: SessionConfig,
    throttle: PublishThrottle,
    /// Working copy, published wholesale
    working: VehicleSnapshot,
    snapshot_tx: Arc<watch::Sender<VehicleSnapshot>>,
    consecutive_failures: u32,
}

impl PollingLoop {
    pub fn new(
        client: ObdClient,
        supported: &SupportedPids,
        config: SessionConfig,
        snapshot_tx: Arc<watch::Sender<VehicleSnapshot>>,
    ) -> Self {
        let pids: Vec<Pid> = Pid::POLLED
            .iter()
            .copied()
            .filter(|pid| supported.supports(*pid))
            .collect();

        let skipped = Pid::POLLED.len() - pids.len();
        if skipped > 0 {
            info!("Polling {} PIDs ({} unsupported, skipped)", pids.len(), skipped);
        }

        // Continue from what observers already have, e.g. after a reconnect
        let working = *snapshot_tx.borrow();

        Self {
            client,
            pids,
            throttle: PublishThrottle::new(&config),
            config,
            working,
            snapshot_tx,
            consecutive_failures: 0,
        }
    }

    /// Issue one command per tracked PID
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let mut outcome = CycleOutcome {
            attempted: 0,
            succeeded: 0,
            link_lost: false,
        };

        for &pid in &self.pids {
            outcome.attempted += 1;
            match self.client.query_pid(pid).await {
                Ok(response) => {
                    self.working.apply(&response);
                    outcome.succeeded += 1;
                }
                Err(ObdError::LinkLost) | Err(ObdError::NotConnected) => {
                    outcome.link_lost = true;
                    return outcome;
                }
                // Failed reads keep the previous value
                Err(e) => debug!("Poll of PID {:02X} failed: {}", pid.as_hex(), e),
            }
            tokio::time::sleep(self.config.inter_command_delay()).await;
        }

        if outcome.attempted == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.idle_publish_ms)).await;
        } else if outcome.succeeded == 0 {
            self.consecutive_failures += 1;
            if self.consecutive_failures == self.config.failure_warn_threshold {
                warn!(
                    "{} consecutive polling cycles failed; adapter or vehicle may be unresponsive",
                    self.consecutive_failures
                );
            }
        } else {
            self.consecutive_failures = 0;
        }

        if self.throttle.should_publish(&self.working, Instant::now()) {
            metrics::counter!("obd_snapshots_published_total").increment(1);
            self.snapshot_tx.send_replace(self.working);
        }

        outcome
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run until cancelled or the link drops
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Starting polling loop");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.run_cycle() => {
                    if outcome.link_lost {
                        warn!("Polling stopped: link lost");
                        break;
                    }
                }
            }
        }

        info!("Polling loop stopped");
    }
}
