//! Adaptive publish throttle
//!
//! The polling loop samples as fast as round trips allow; observers only
//! see a new snapshot when a field changed and the tier interval for the
//! current RPM has elapsed.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::snapshot::VehicleSnapshot;

/// Publish rate tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTier {
    /// RPM unknown or zero
    Idle,
    Normal,
    /// RPM above the sport threshold
    Sport,
}

/// Decides when a changed snapshot is pushed to observers
#[derive(Debug, Clone)]
pub struct PublishThrottle {
    idle: Duration,
    normal: Duration,
    sport: Duration,
    sport_rpm: f64,
    last_published: Option<VehicleSnapshot>,
    last_at: Option<Instant>,
}

impl PublishThrottle {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            idle: Duration::from_millis(config.idle_publish_ms),
            normal: Duration::from_millis(config.normal_publish_ms),
            sport: Duration::from_millis(config.sport_publish_ms),
            sport_rpm: config.sport_rpm,
            last_published: None,
            last_at: None,
        }
    }

    pub fn tier(&self, rpm: Option<f64>) -> PublishTier {
        match rpm {
            None => PublishTier::Idle,
            Some(rpm) if rpm <= 0.0 => PublishTier::Idle,
            Some(rpm) if rpm > self.sport_rpm => PublishTier::Sport,
            Some(_) => PublishTier::Normal,
        }
    }

    pub fn interval(&self, tier: PublishTier) -> Duration {
        match tier {
            PublishTier::Idle => self.idle,
            PublishTier::Normal => self.normal,
            PublishTier::Sport => self.sport,
        }
    }

    /// Decide whether `snapshot` goes out now; records it if so
    pub fn should_publish(&mut self, snapshot: &VehicleSnapshot, now: Instant) -> bool {
        if self.last_published.as_ref() == Some(snapshot) {
            return false;
        }

        if let Some(last_at) = self.last_at {
            let interval = self.interval(self.tier(snapshot.rpm));
            if now.saturating_duration_since(last_at) < interval {
                return false;
            }
        }

        self.last_published = Some(*snapshot);
        self.last_at = Some(now);
        true
    }
}
