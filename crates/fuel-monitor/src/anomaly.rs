//! STFT anomaly tracking with alert cooldown

use tracing::debug;

use crate::settings::MonitorSettings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnomalyEvent {
    /// |STFT| above the warning threshold for long enough
    Alert { stft: f64, duration_ms: u64 },
    /// Back under the threshold after a non-trivial anomaly
    Recovered { duration_ms: u64 },
}

/// Sustained-STFT anomaly detector for one monitoring session
#[derive(Debug, Clone)]
pub struct AnomalyTracker {
    warning_pct: f64,
    min_duration_ms: u64,
    cooldown_ms: u64,
    recovery_min_ms: u64,
    /// When the current anomaly started
    started_at: Option<u64>,
    last_alert_at: Option<u64>,
    alert_count: usize,
}

impl AnomalyTracker {
    pub fn new(settings: &MonitorSettings) -> Self {
        Self {
            warning_pct: settings.stft_warning_pct,
            min_duration_ms: settings.anomaly_min_ms,
            cooldown_ms: settings.anomaly_cooldown_ms,
            recovery_min_ms: settings.anomaly_recovery_min_ms,
            started_at: None,
            last_alert_at: None,
            alert_count: 0,
        }
    }

    /// Feed one STFT sample taken at `now_ms`
    pub fn update(&mut self, stft: f64, now_ms: u64) -> Option<AnomalyEvent> {
        if stft.abs() > self.warning_pct {
            let started = *self.started_at.get_or_insert(now_ms);
            let duration_ms = now_ms.saturating_sub(started);

            if duration_ms < self.min_duration_ms {
                return None;
            }

            let cooled = self
                .last_alert_at
                .map_or(true, |last| now_ms.saturating_sub(last) >= self.cooldown_ms);
            if !cooled {
                debug!("Anomaly alert suppressed: in cooldown period");
                return None;
            }

            self.last_alert_at = Some(now_ms);
            self.alert_count += 1;
            return Some(AnomalyEvent::Alert { stft, duration_ms });
        }

        let started = self.started_at.take()?;
        let duration_ms = now_ms.saturating_sub(started);
        (duration_ms >= self.recovery_min_ms).then_some(AnomalyEvent::Recovered { duration_ms })
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn alert_count(&self) -> usize {
        self.alert_count
    }
}
