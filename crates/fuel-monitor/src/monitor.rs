//! Fuel monitoring session
//!
//! `Inactive -> Waiting | WaitingQuick -> Monitoring -> Analyzing -> Completed`,
//! with `cancel_refuel` returning to `Inactive` from anywhere.
//! The monitor owns its [`FuelMonitoringData`] and a frozen copy of the
//! settings; both are created on entry to `Monitoring`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fuel_forensics::{
    evaluate, FuelChangeContext, FuelDiagnosticResult, FuelMonitoringData, O2Reading,
};
use obd_protocol::Pid;
use serde::{Deserialize, Serialize};
use storage::{RefuelRecord, RefuelStore};
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::announcer::Announcer;
use crate::anomaly::{AnomalyEvent, AnomalyTracker};
use crate::error::MonitorError;
use crate::reader::PidReader;
use crate::settings::MonitorSettings;

const MILESTONES: [u8; 3] = [25, 50, 75];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefuelMode {
    #[default]
    Inactive,
    /// Real refuel declared, waiting to drive off
    Waiting,
    /// Quick test declared, waiting to drive off
    WaitingQuick,
    Monitoring,
    Analyzing,
    Completed,
}

impl fmt::Display for RefuelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefuelMode::Inactive => "inactive",
            RefuelMode::Waiting => "waiting",
            RefuelMode::WaitingQuick => "waiting (quick test)",
            RefuelMode::Monitoring => "monitoring",
            RefuelMode::Analyzing => "analyzing",
            RefuelMode::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Real refuels are persisted, quick tests are not
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefuelKind {
    Real,
    Quick,
}

/// Published to observers after every tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub mode: RefuelMode,
    pub distance_km: f64,
    pub target_km: f64,
    pub last_stft: Option<f64>,
    pub ltft_delta: f64,
    pub anomaly_active: bool,
    /// Latest tank level read while monitoring (%)
    pub fuel_level_pct: Option<f64>,
}

/// State that exists only while `Monitoring`/`Analyzing`
struct ActiveMonitoring {
    settings: MonitorSettings,
    data: FuelMonitoringData,
    anomaly: AnomalyTracker,
    last_tick_ms: u64,
    last_trim_read_ms: Option<u64>,
    last_fuel_read_ms: Option<u64>,
    last_stft: Option<f64>,
    fuel_level_pct: Option<f64>,
    milestones_done: [bool; 3],
}

struct RefuelSession {
    id: Uuid,
    kind: RefuelKind,
    context: FuelChangeContext,
    started_at: DateTime<Utc>,
    ltft_baseline: Option<f64>,
    fuel_level_before: Option<f64>,
    fuel_level_after: Option<f64>,
    price_per_liter: Option<f64>,
    liters: Option<f64>,
    motion_since_ms: Option<u64>,
    active: Option<ActiveMonitoring>,
}

/// Post-refuel monitoring session driven by [`tick`](Self::tick)
pub struct FuelMonitor {
    reader: Arc<dyn PidReader>,
    announcer: Arc<dyn Announcer>,
    store: Option<Arc<dyn RefuelStore>>,
    settings: watch::Receiver<MonitorSettings>,
    status_tx: watch::Sender<MonitorStatus>,
    mode: RefuelMode,
    session: Option<RefuelSession>,
    result: Option<FuelDiagnosticResult>,
    vin: Option<String>,
    /// Fired by `cancel_refuel`; replaced for every new session
    cancel: CancellationToken,
}

impl FuelMonitor {
    pub fn new(
        reader: Arc<dyn PidReader>,
        announcer: Arc<dyn Announcer>,
        settings: watch::Receiver<MonitorSettings>,
    ) -> Self {
        let (status_tx, _) = watch::channel(MonitorStatus::default());
        Self {
            reader,
            announcer,
            store: None,
            settings,
            status_tx,
            mode: RefuelMode::Inactive,
            session: None,
            result: None,
            vin: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Persist completed real refuels here
    pub fn with_store(mut self, store: Arc<dyn RefuelStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Tag persisted records with the vehicle
    pub fn set_vin(&mut self, vin: Option<String>) {
        self.vin = vin;
    }

    pub fn mode(&self) -> RefuelMode {
        self.mode
    }

    /// Diagnosis of the last completed session
    pub fn result(&self) -> Option<&FuelDiagnosticResult> {
        self.result.as_ref()
    }

    /// Data of the session being monitored
    pub fn data(&self) -> Option<&FuelMonitoringData> {
        self.active().map(|active| &active.data)
    }

    /// Cancels the current session without taking the monitor's lock.
    /// `run_tick_loop` (or the next `tick`) completes the teardown.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<MonitorStatus> {
        self.status_tx.subscribe()
    }

    /// Current live settings (not the frozen copy)
    pub fn live_settings(&self) -> MonitorSettings {
        self.settings.borrow().clone()
    }

    /// A session that has started and not yet finished
    fn in_flight(&self) -> bool {
        matches!(
            self.mode,
            RefuelMode::Waiting | RefuelMode::WaitingQuick | RefuelMode::Monitoring | RefuelMode::Analyzing
        )
    }

    fn active(&self) -> Option<&ActiveMonitoring> {
        self.session.as_ref().and_then(|s| s.active.as_ref())
    }

    fn set_mode(&mut self, mode: RefuelMode) {
        if self.mode != mode {
            info!("Refuel mode {} -> {}", self.mode, mode);
            self.mode = mode;
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        let target_km = self
            .active()
            .map(|a| a.settings.target_distance_km)
            .unwrap_or_else(|| self.settings.borrow().target_distance_km);

        let status = MonitorStatus {
            mode: self.mode,
            distance_km: self.active().map(|a| a.data.distance_monitored_km).unwrap_or(0.0),
            target_km,
            last_stft: self.active().and_then(|a| a.last_stft),
            ltft_delta: self.active().map(|a| a.data.ltft_delta).unwrap_or(0.0),
            anomaly_active: self.active().is_some_and(|a| a.anomaly.is_active()),
            fuel_level_pct: self.active().and_then(|a| a.fuel_level_pct),
        };
        self.status_tx.send_replace(status);
    }

    /// Declare a refuel (or a quick test) and wait for the car to move.
    ///
    /// Rejected with `TrimNotSupported`, after telling the driver why,
    /// when the vehicle does not report both fuel trims.
    pub async fn start_refuel_mode(
        &mut self,
        context: FuelChangeContext,
        kind: RefuelKind,
    ) -> Result<(), MonitorError> {
        if !matches!(self.mode, RefuelMode::Inactive | RefuelMode::Completed) {
            return Err(MonitorError::InvalidTransition {
                action: "start refuel mode",
                mode: self.mode,
            });
        }

        if !self.reader.supports(Pid::ShortFuelTrim) || !self.reader.supports(Pid::LongFuelTrim) {
            self.announcer.announce(
                "This vehicle does not report fuel trims, so the fuel quality test is not available.",
            );
            return Err(MonitorError::TrimNotSupported);
        }

        let ltft_baseline = self.reader.read(Pid::LongFuelTrim).await;
        if ltft_baseline.is_none() {
            warn!("LTFT baseline unavailable; the first monitored read will be used");
        }

        let fuel_level_before = match kind {
            RefuelKind::Real if self.reader.supports(Pid::FuelLevel) => {
                self.reader.read(Pid::FuelLevel).await
            }
            _ => None,
        };

        self.result = None;
        self.cancel = CancellationToken::new();
        self.session = Some(RefuelSession {
            id: Uuid::new_v4(),
            kind,
            context,
            started_at: Utc::now(),
            ltft_baseline,
            fuel_level_before,
            fuel_level_after: None,
            price_per_liter: None,
            liters: None,
            motion_since_ms: None,
            active: None,
        });

        match kind {
            RefuelKind::Real => {
                self.set_mode(RefuelMode::Waiting);
                self.announcer.announce(
                    "Refuel mode on. Confirm price and liters after refueling, then drive off.",
                );
            }
            RefuelKind::Quick => {
                self.set_mode(RefuelMode::WaitingQuick);
                self.announcer.announce("Quick fuel test ready. Start driving to begin.");
            }
        }

        info!("Refuel session started ({:?}, {})", kind, context);
        Ok(())
    }

    /// Record price per liter and volume for a real refuel
    pub async fn confirm_refuel(&mut self, price_per_liter: f64, liters: f64) -> Result<(), MonitorError> {
        let mode = self.mode;
        let session = match self.session.as_mut() {
            Some(session) if mode != RefuelMode::Inactive => session,
            _ => return Err(MonitorError::NotActive),
        };

        let valid = session.kind == RefuelKind::Real
            && matches!(mode, RefuelMode::Waiting | RefuelMode::Monitoring);
        if !valid {
            return Err(MonitorError::InvalidTransition {
                action: "confirm refuel",
                mode,
            });
        }

        session.price_per_liter = Some(price_per_liter);
        session.liters = Some(liters);

        if self.reader.supports(Pid::FuelLevel) {
            let level = self.reader.read(Pid::FuelLevel).await;
            if let Some(session) = self.session.as_mut() {
                session.fuel_level_after = level;
            }
        }

        info!("Refuel confirmed: {:.1} L at {:.2}/L", liters, price_per_liter);
        Ok(())
    }

    /// Abandon the session without a diagnosis.
    ///
    /// A monitor behind `run_tick_loop` is better cancelled through
    /// [`cancel_handle`](Self::cancel_handle), which does not wait for the
    /// tick in progress.
    pub fn cancel_refuel(&mut self) -> Result<(), MonitorError> {
        if self.mode == RefuelMode::Inactive {
            return Err(MonitorError::NotActive);
        }
        self.cancel.cancel();

        let kind = self.session.take().map(|s| s.kind);
        self.result = None;
        self.set_mode(RefuelMode::Inactive);

        match kind {
            Some(RefuelKind::Quick) => self.announcer.announce("Quick fuel test cancelled."),
            _ => self
                .announcer
                .announce("Refuel monitoring cancelled. No diagnosis was recorded."),
        }
        Ok(())
    }

    /// Advance the session by one tick. Returns the mode afterwards.
    pub async fn tick(&mut self, now_ms: u64) -> RefuelMode {
        if self.cancel.is_cancelled() && self.in_flight() {
            let _ = self.cancel_refuel();
            return self.mode;
        }

        match self.mode {
            RefuelMode::Waiting | RefuelMode::WaitingQuick => self.detect_motion(now_ms),
            RefuelMode::Monitoring => self.monitoring_tick(now_ms).await,
            RefuelMode::Analyzing => self.analyze().await,
            RefuelMode::Inactive | RefuelMode::Completed => {}
        }
        self.mode
    }

    fn detect_motion(&mut self, now_ms: u64) {
        let speed = self.reader.current_speed().unwrap_or(0.0);
        let settings = self.settings.borrow().clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if speed < settings.motion_start_kmh {
            session.motion_since_ms = None;
            return;
        }

        let since = *session.motion_since_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(since) < settings.motion_sustain_ms {
            return;
        }

        // Settings freeze here for the rest of the session
        let target = settings.target_distance_km;
        session.active = Some(ActiveMonitoring {
            anomaly: AnomalyTracker::new(&settings),
            data: FuelMonitoringData::new(session.ltft_baseline, now_ms),
            settings,
            last_tick_ms: now_ms,
            last_trim_read_ms: None,
            last_fuel_read_ms: None,
            last_stft: None,
            fuel_level_pct: None,
            milestones_done: [false; 3],
        });

        self.set_mode(RefuelMode::Monitoring);
        self.announcer.announce(&format!(
            "Motion detected. Monitoring fuel trims over the next {:.0} km.",
            target
        ));
    }

    async fn monitoring_tick(&mut self, now_ms: u64) {
        let reader = Arc::clone(&self.reader);
        let speed = reader.current_speed().unwrap_or(0.0);

        let Some(active) = self.session.as_mut().and_then(|s| s.active.as_mut()) else {
            return;
        };
        let settings = active.settings.clone();

        // Real elapsed time, idle excluded
        let delta_ms = now_ms.saturating_sub(active.last_tick_ms);
        active.last_tick_ms = now_ms;
        if speed >= settings.min_speed_kmh {
            active.data.add_distance(speed / 3600.0 * (delta_ms as f64 / 1000.0));
        }

        let trim_due = active
            .last_trim_read_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= settings.trim_read_ms);
        let fuel_due = reader.supports(Pid::FuelLevel)
            && active
                .last_fuel_read_ms
                .map_or(true, |last| now_ms.saturating_sub(last) >= settings.fuel_level_read_ms);

        let mut announcements = Vec::new();

        if trim_due {
            active.last_trim_read_ms = Some(now_ms);

            if let Some(stft) = reader.read(Pid::ShortFuelTrim).await {
                active.data.push_stft(stft);
                active.last_stft = Some(stft);

                match active.anomaly.update(stft, now_ms) {
                    Some(AnomalyEvent::Alert { stft, duration_ms }) => {
                        warn!("Fuel trim anomaly: STFT {:.1}% for {}s", stft, duration_ms / 1000);
                        announcements.push(format!(
                            "Attention: short-term fuel trim at {:+.0}% for {} seconds.",
                            stft,
                            duration_ms / 1000
                        ));
                    }
                    Some(AnomalyEvent::Recovered { duration_ms }) => {
                        info!("Fuel trim anomaly cleared after {}s", duration_ms / 1000);
                        announcements.push("Fuel trims are back to normal.".to_string());
                    }
                    None => {}
                }
            }

            if let Some(ltft) = reader.read(Pid::LongFuelTrim).await {
                active.data.record_ltft(ltft);
            }

            if reader.supports(Pid::O2Voltage) {
                if let Some(voltage) = reader.read(Pid::O2Voltage).await {
                    let f = &settings.forensics;
                    active
                        .data
                        .push_o2(O2Reading::classify(now_ms, voltage, f.o2_midpoint_v, f.o2_margin));
                }
            }
        }

        if fuel_due {
            active.last_fuel_read_ms = Some(now_ms);
            if let Some(level) = reader.read(Pid::FuelLevel).await {
                debug!("Fuel level {:.1}%", level);
                active.fuel_level_pct = Some(level);
            }
        }

        let target = settings.target_distance_km.max(f64::EPSILON);
        let progress_pct = active.data.distance_monitored_km / target * 100.0;
        for (i, milestone) in MILESTONES.iter().enumerate() {
            if active.milestones_done[i] || progress_pct < f64::from(*milestone) {
                continue;
            }
            active.milestones_done[i] = true;
            let status = if active.anomaly.is_active() {
                "A fuel trim anomaly is still active."
            } else {
                "Fuel trims look normal so far."
            };
            announcements.push(format!("{}% of the test distance covered. {}", milestone, status));
        }

        let complete = active.data.distance_monitored_km >= settings.target_distance_km;

        for message in &announcements {
            self.announcer.announce(message);
        }

        if complete {
            self.set_mode(RefuelMode::Analyzing);
            self.analyze().await;
        } else {
            self.publish_status();
        }
    }

    async fn analyze(&mut self) {
        let reader = Arc::clone(&self.reader);
        let Some(mut session) = self.session.take() else {
            self.set_mode(RefuelMode::Inactive);
            return;
        };
        let Some(mut active) = session.active.take() else {
            self.set_mode(RefuelMode::Inactive);
            return;
        };

        // Final read, falling back to the last monitored level
        let final_level = if reader.supports(Pid::FuelLevel) {
            reader.read(Pid::FuelLevel).await
        } else {
            None
        };
        let level = final_level.or(active.fuel_level_pct);
        if session.kind == RefuelKind::Real && session.fuel_level_after.is_none() {
            session.fuel_level_after = level;
        }
        if let Some(ltft) = reader.read(Pid::LongFuelTrim).await {
            active.data.record_ltft(ltft);
        }

        let result = evaluate(&active.data, session.context, &active.settings.forensics);
        info!(
            "Refuel {} diagnosed {} ({:?} confidence, {:.1} km, {} samples)",
            session.id,
            result.state,
            result.confidence,
            active.data.distance_monitored_km,
            result.sample_count
        );

        if session.kind == RefuelKind::Real {
            self.persist(&session, &active, &result);
        }

        self.announcer.announce(&format!(
            "Fuel analysis complete: {}. {}",
            result.state, result.recommendation
        ));

        self.result = Some(result);
        self.set_mode(RefuelMode::Completed);
    }

    fn persist(&self, session: &RefuelSession, active: &ActiveMonitoring, result: &FuelDiagnosticResult) {
        let Some(store) = &self.store else {
            debug!("No refuel store configured; diagnosis not persisted");
            return;
        };

        let record = RefuelRecord {
            id: session.id,
            started_at: session.started_at,
            completed_at: Utc::now(),
            context: session.context,
            vin: self.vin.clone(),
            fuel_level_before: session.fuel_level_before,
            fuel_level_after: session.fuel_level_after,
            price_per_liter: session.price_per_liter,
            liters: session.liters,
            distance_km: active.data.distance_monitored_km,
            data: active.data.clone(),
            diagnosis: result.clone(),
        };

        // Not retried
        if let Err(e) = store.save_refuel(record) {
            error!("Failed to persist refuel {}: {}", session.id, e);
        }
    }
}

/// Millisecond clock on the tokio timer
struct TickClock {
    origin: Instant,
    base_ms: u64,
}

impl TickClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            base_ms: obd_protocol::now_ms(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.base_ms + self.origin.elapsed().as_millis() as u64
    }
}

/// Drive a shared monitor until it is `Inactive` or `Completed`.
///
/// Firing the session's [`cancel_handle`](FuelMonitor::cancel_handle)
/// abandons the tick in progress, including any PID read it is waiting on.
pub async fn run_tick_loop(monitor: Arc<Mutex<FuelMonitor>>) {
    let (period, cancel) = {
        let monitor = monitor.lock().await;
        (monitor.live_settings().tick_period(), monitor.cancel_handle())
    };
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let clock = TickClock::new();

    info!("Fuel monitor tick loop started ({}ms)", period.as_millis());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let step = async {
            let mut monitor = monitor.lock().await;
            monitor.tick(clock.now_ms()).await
        };
        let mode = tokio::select! {
            _ = cancel.cancelled() => break,
            mode = step => mode,
        };
        if matches!(mode, RefuelMode::Inactive | RefuelMode::Completed) {
            break;
        }
    }

    if cancel.is_cancelled() {
        let mut monitor = monitor.lock().await;
        if monitor.in_flight() {
            let _ = monitor.cancel_refuel();
        }
    }
    info!("Fuel monitor tick loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fuel_forensics::FuelState;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use storage::Repository;

    struct FakeReader {
        values: StdMutex<HashMap<Pid, f64>>,
        unsupported: HashSet<Pid>,
        speed: StdMutex<Option<f64>>,
    }

    impl FakeReader {
        fn new() -> Self {
            let values = HashMap::from([
                (Pid::ShortFuelTrim, 1.6),
                (Pid::LongFuelTrim, 0.8),
                (Pid::O2Voltage, 0.45),
                (Pid::FuelLevel, 50.2),
            ]);
            Self {
                values: StdMutex::new(values),
                unsupported: HashSet::new(),
                speed: StdMutex::new(Some(0.0)),
            }
        }

        fn without(mut self, pid: Pid) -> Self {
            self.unsupported.insert(pid);
            self
        }

        fn set(&self, pid: Pid, value: Option<f64>) {
            let mut values = self.values.lock().unwrap();
            match value {
                Some(v) => values.insert(pid, v),
                None => values.remove(&pid),
            };
        }

        fn set_speed(&self, kmh: f64) {
            *self.speed.lock().unwrap() = Some(kmh);
        }
    }

    #[async_trait]
    impl PidReader for FakeReader {
        async fn read(&self, pid: Pid) -> Option<f64> {
            self.values.lock().unwrap().get(&pid).copied()
        }

        fn supports(&self, pid: Pid) -> bool {
            !self.unsupported.contains(&pid)
        }

        fn current_speed(&self) -> Option<f64> {
            *self.speed.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct RecordingAnnouncer {
        messages: StdMutex<Vec<String>>,
    }

    impl RecordingAnnouncer {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }

        fn count(&self, needle: &str) -> usize {
            self.messages().iter().filter(|m| m.contains(needle)).count()
        }
    }

    impl Announcer for RecordingAnnouncer {
        fn announce(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    struct Harness {
        reader: Arc<FakeReader>,
        announcer: Arc<RecordingAnnouncer>,
        settings: watch::Sender<MonitorSettings>,
        monitor: FuelMonitor,
    }

    fn harness(reader: FakeReader, settings: MonitorSettings) -> Harness {
        harness_with_store(reader, settings, None)
    }

    fn harness_with_store(
        reader: FakeReader,
        settings: MonitorSettings,
        store: Option<Arc<Repository>>,
    ) -> Harness {
        let reader = Arc::new(reader);
        let announcer = Arc::new(RecordingAnnouncer::default());
        let (settings_tx, settings_rx) = watch::channel(settings);
        let mut monitor = FuelMonitor::new(reader.clone(), announcer.clone(), settings_rx);
        if let Some(store) = store {
            monitor = monitor.with_store(store);
        }
        Harness {
            reader,
            announcer,
            settings: settings_tx,
            monitor,
        }
    }

    /// Start a session and drive off until `Monitoring`; returns the time
    async fn drive_off(h: &mut Harness, context: FuelChangeContext, kind: RefuelKind, kmh: f64) -> u64 {
        h.monitor.start_refuel_mode(context, kind).await.unwrap();
        h.reader.set_speed(kmh);
        h.monitor.tick(0).await;
        assert_eq!(h.monitor.tick(2_000).await, RefuelMode::Monitoring);
        2_000
    }

    /// Tick every `step_ms` until the session leaves `Monitoring`
    async fn run_to_completion(h: &mut Harness, mut now: u64, step_ms: u64) -> u64 {
        for _ in 0..10_000 {
            now += step_ms;
            if h.monitor.tick(now).await != RefuelMode::Monitoring {
                return now;
            }
        }
        panic!("session never completed");
    }

    #[tokio::test]
    async fn test_distance_integration_uses_elapsed_time() {
        let mut h = harness(FakeReader::new(), MonitorSettings::default());
        let start = drive_off(&mut h, FuelChangeContext::SameFuel, RefuelKind::Quick, 60.0).await;

        h.monitor.tick(start + 500).await;
        let distance = h.monitor.data().unwrap().distance_monitored_km;
        assert!((distance - 60.0 / 3600.0 * 0.5).abs() < 1e-9);
        assert!((distance - 0.00833).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_idle_time_is_not_integrated() {
        let mut h = harness(FakeReader::new(), MonitorSettings::default());
        let start = drive_off(&mut h, FuelChangeContext::SameFuel, RefuelKind::Quick, 60.0).await;

        h.reader.set_speed(0.0);
        h.monitor.tick(start + 500).await;
        h.monitor.tick(start + 600_000).await;
        assert_eq!(h.monitor.data().unwrap().distance_monitored_km, 0.0);

        // Below the noise floor
        h.reader.set_speed(2.0);
        h.monitor.tick(start + 700_000).await;
        assert_eq!(h.monitor.data().unwrap().distance_monitored_km, 0.0);
        assert_eq!(h.monitor.mode(), RefuelMode::Monitoring);
    }

    #[tokio::test]
    async fn test_motion_must_be_sustained() {
        let mut h = harness(FakeReader::new(), MonitorSettings::default());
        h.monitor
            .start_refuel_mode(FuelChangeContext::SameFuel, RefuelKind::Quick)
            .await
            .unwrap();
        assert_eq!(h.monitor.mode(), RefuelMode::WaitingQuick);

        h.reader.set_speed(10.0);
        h.monitor.tick(0).await;
        h.reader.set_speed(0.0);
        h.monitor.tick(1_000).await;
        h.reader.set_speed(10.0);
        h.monitor.tick(2_000).await;
        assert_eq!(h.monitor.tick(3_500).await, RefuelMode::WaitingQuick);
        assert_eq!(h.monitor.tick(4_000).await, RefuelMode::Monitoring);
    }

    #[tokio::test]
    async fn test_trim_support_required() {
        let mut h = harness(FakeReader::new().without(Pid::LongFuelTrim), MonitorSettings::default());

        let err = h
            .monitor
            .start_refuel_mode(FuelChangeContext::SameFuel, RefuelKind::Quick)
            .await
            .unwrap_err();
        assert_eq!(err, MonitorError::TrimNotSupported);
        assert_eq!(h.monitor.mode(), RefuelMode::Inactive);
        assert_eq!(h.announcer.count("does not report fuel trims"), 1);
    }

    #[tokio::test]
    async fn test_milestones_fire_once_each() {
        let settings = MonitorSettings {
            target_distance_km: 1.0,
            ..Default::default()
        };
        let mut h = harness(FakeReader::new(), settings);
        let start = drive_off(&mut h, FuelChangeContext::SameFuel, RefuelKind::Quick, 72.0).await;

        // 72 km/h for 2s = 0.04 km per tick
        run_to_completion(&mut h, start, 2_000).await;

        assert_eq!(h.monitor.mode(), RefuelMode::Completed);
        assert_eq!(h.announcer.count("25% of the test distance"), 1);
        assert_eq!(h.announcer.count("50% of the test distance"), 1);
        assert_eq!(h.announcer.count("75% of the test distance"), 1);
        assert_eq!(h.announcer.count("Fuel trims look normal so far"), 3);
        assert_eq!(h.announcer.count("Fuel analysis complete"), 1);
    }

    #[tokio::test]
    async fn test_milestone_phrasing_reflects_anomaly() {
        let settings = MonitorSettings {
            target_distance_km: 1.0,
            ..Default::default()
        };
        let reader = FakeReader::new();
        reader.set(Pid::ShortFuelTrim, Some(18.0));
        let mut h = harness(reader, settings);
        let start = drive_off(&mut h, FuelChangeContext::SameFuel, RefuelKind::Quick, 72.0).await;

        run_to_completion(&mut h, start, 2_000).await;
        assert_eq!(h.announcer.count("anomaly is still active"), 3);
        // 50 s of anomaly with a 60 s cooldown: exactly one alert
        assert_eq!(h.announcer.count("Attention: short-term fuel trim"), 1);
    }

    #[tokio::test]
    async fn test_live_settings_change_does_not_affect_running_session() {
        let settings = MonitorSettings {
            target_distance_km: 1.0,
            ..Default::default()
        };
        let reader = FakeReader::new();
        reader.set(Pid::ShortFuelTrim, Some(18.0));
        reader.set(Pid::LongFuelTrim, Some(2.0));
        let mut h = harness(reader, settings);
        let start = drive_off(&mut h, FuelChangeContext::SameFuel, RefuelKind::Quick, 72.0).await;

        h.settings.send_modify(|s| {
            s.target_distance_km = 1_000.0;
            s.forensics.critical_total_pct = 100.0;
            s.forensics.warning_total_pct = 100.0;
        });

        run_to_completion(&mut h, start, 2_000).await;
        let result = h.monitor.result().unwrap();
        assert_eq!(result.state, FuelState::Contaminated);
        assert!(result.distance_km < 1.1);
    }

    #[tokio::test]
    async fn test_real_refuel_is_persisted() {
        let settings = MonitorSettings {
            target_distance_km: 0.5,
            ..Default::default()
        };
        let repo = Arc::new(Repository::new());
        let mut h = harness_with_store(FakeReader::new(), settings, Some(repo.clone()));
        h.monitor.set_vin(Some("9BWZZZ377VT004251".to_string()));

        h.monitor
            .start_refuel_mode(FuelChangeContext::SameFuel, RefuelKind::Real)
            .await
            .unwrap();
        h.reader.set(Pid::FuelLevel, Some(95.3));
        h.monitor.confirm_refuel(5.89, 40.0).await.unwrap();

        h.reader.set_speed(72.0);
        h.monitor.tick(0).await;
        h.monitor.tick(2_000).await;
        run_to_completion(&mut h, 2_000, 2_000).await;

        assert_eq!(repo.count(), 1);
        let records = repo.recent(1).unwrap();
        let record = &records[0];
        assert_eq!(record.fuel_level_before, Some(50.2));
        assert_eq!(record.fuel_level_after, Some(95.3));
        assert_eq!(record.liters, Some(40.0));
        assert_eq!(record.vin.as_deref(), Some("9BWZZZ377VT004251"));
        assert_eq!(record.diagnosis.state, FuelState::Stable);
    }

    #[tokio::test]
    async fn test_quick_test_is_not_persisted() {
        let settings = MonitorSettings {
            target_distance_km: 0.5,
            ..Default::default()
        };
        let repo = Arc::new(Repository::new());
        let mut h = harness_with_store(FakeReader::new(), settings, Some(repo.clone()));

        let start = drive_off(&mut h, FuelChangeContext::SameFuel, RefuelKind::Quick, 72.0).await;
        run_to_completion(&mut h, start, 2_000).await;

        assert_eq!(h.monitor.mode(), RefuelMode::Completed);
        assert!(h.monitor.result().is_some());
        assert_eq!(repo.count(), 0);
    }

    #[tokio::test]
    async fn test_confirm_refuel_validity() {
        let mut h = harness(FakeReader::new(), MonitorSettings::default());
        assert_eq!(h.monitor.confirm_refuel(5.0, 30.0).await, Err(MonitorError::NotActive));

        h.monitor
            .start_refuel_mode(FuelChangeContext::Unknown, RefuelKind::Quick)
            .await
            .unwrap();
        assert!(matches!(
            h.monitor.confirm_refuel(5.0, 30.0).await,
            Err(MonitorError::InvalidTransition { mode: RefuelMode::WaitingQuick, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_wording_depends_on_kind() {
        let mut h = harness(FakeReader::new(), MonitorSettings::default());
        assert_eq!(h.monitor.cancel_refuel(), Err(MonitorError::NotActive));

        drive_off(&mut h, FuelChangeContext::SameFuel, RefuelKind::Quick, 30.0).await;
        h.monitor.cancel_refuel().unwrap();
        assert_eq!(h.monitor.mode(), RefuelMode::Inactive);
        assert!(h.monitor.data().is_none());
        assert_eq!(h.announcer.count("Quick fuel test cancelled"), 1);

        h.monitor
            .start_refuel_mode(FuelChangeContext::SameFuel, RefuelKind::Real)
            .await
            .unwrap();
        h.monitor.cancel_refuel().unwrap();
        assert_eq!(h.announcer.count("Refuel monitoring cancelled"), 1);
        assert_eq!(h.announcer.count("Fuel analysis complete"), 0);
    }

    #[tokio::test]
    async fn test_missing_baseline_uses_first_monitored_read() {
        let reader = FakeReader::new();
        reader.set(Pid::LongFuelTrim, None);
        let mut h = harness(reader, MonitorSettings::default());
        let start = drive_off(&mut h, FuelChangeContext::SameFuel, RefuelKind::Quick, 40.0).await;
        assert_eq!(h.monitor.data().unwrap().ltft_initial, None);

        h.reader.set(Pid::LongFuelTrim, Some(6.3));
        h.monitor.tick(start + 500).await;
        let data = h.monitor.data().unwrap();
        assert_eq!(data.ltft_initial, Some(6.3));
        assert_eq!(data.ltft_delta, 0.0);
    }

    #[tokio::test]
    async fn test_start_rejected_while_active() {
        let mut h = harness(FakeReader::new(), MonitorSettings::default());
        h.monitor
            .start_refuel_mode(FuelChangeContext::SameFuel, RefuelKind::Quick)
            .await
            .unwrap();

        let err = h
            .monitor
            .start_refuel_mode(FuelChangeContext::SameFuel, RefuelKind::Real)
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::InvalidTransition { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_runs_to_completion() {
        let settings = MonitorSettings {
            target_distance_km: 0.2,
            ..Default::default()
        };
        let mut h = harness(FakeReader::new(), settings);
        h.monitor
            .start_refuel_mode(FuelChangeContext::SameFuel, RefuelKind::Quick)
            .await
            .unwrap();
        h.reader.set_speed(72.0);

        let mut status = h.monitor.subscribe_status();
        let monitor = Arc::new(Mutex::new(h.monitor));
        tokio::time::timeout(Duration::from_secs(600), run_tick_loop(monitor.clone()))
            .await
            .expect("tick loop did not finish");

        let monitor = monitor.lock().await;
        assert_eq!(monitor.mode(), RefuelMode::Completed);
        assert!(monitor.result().is_some());
        assert_eq!(status.borrow_and_update().mode, RefuelMode::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_loop_stops_on_cancel() {
        let mut h = harness(FakeReader::new(), MonitorSettings::default());
        h.monitor
            .start_refuel_mode(FuelChangeContext::SameFuel, RefuelKind::Quick)
            .await
            .unwrap();

        let monitor = Arc::new(Mutex::new(h.monitor));
        let handle = tokio::spawn(run_tick_loop(monitor.clone()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        monitor.lock().await.cancel_refuel().unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("tick loop did not stop")
            .unwrap();
    }
    struct SlowReader {
        inner: FakeReader,
        delay: Duration,
    }

    #[async_trait]
    impl PidReader for SlowReader {
        async fn read(&self, pid: Pid) -> Option<f64> {
            tokio::time::sleep(self.delay).await;
            self.inner.read(pid).await
        }

        fn supports(&self, pid: Pid) -> bool {
            self.inner.supports(pid)
        }

        fn current_speed(&self) -> Option<f64> {
            self.inner.current_speed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_handle_interrupts_tick_in_progress() {
        let inner = FakeReader::new();
        inner.set_speed(72.0);
        let reader = Arc::new(SlowReader {
            inner,
            delay: Duration::from_secs(2),
        });
        let announcer = Arc::new(RecordingAnnouncer::default());
        let (_settings_tx, settings_rx) = watch::channel(MonitorSettings::default());
        let mut monitor = FuelMonitor::new(reader, announcer.clone(), settings_rx);
        monitor
            .start_refuel_mode(FuelChangeContext::SameFuel, RefuelKind::Quick)
            .await
            .unwrap();

        let cancel = monitor.cancel_handle();
        let mut status = monitor.subscribe_status();
        let monitor = Arc::new(Mutex::new(monitor));
        let handle = tokio::spawn(run_tick_loop(monitor.clone()));

        status.wait_for(|s| s.mode == RefuelMode::Monitoring).await.unwrap();
        // The next tick is now parked on its first trim read
        tokio::time::sleep(Duration::from_millis(600)).await;

        let requested = Instant::now();
        cancel.cancel();
        tokio::time::timeout(Duration::from_millis(50), handle)
            .await
            .expect("tick loop waited for the read")
            .unwrap();
        assert!(requested.elapsed() < Duration::from_millis(50));

        let monitor = monitor.lock().await;
        assert_eq!(monitor.mode(), RefuelMode::Inactive);
        assert!(monitor.data().is_none());
        assert_eq!(announcer.count("Quick fuel test cancelled"), 1);
        assert_eq!(announcer.count("Fuel analysis complete"), 0);
        assert_eq!(status.borrow_and_update().mode, RefuelMode::Inactive);
    }

    #[tokio::test]
    async fn test_fired_cancel_handle_ends_session_on_next_tick() {
        let mut h = harness(FakeReader::new(), MonitorSettings::default());
        let start = drive_off(&mut h, FuelChangeContext::SameFuel, RefuelKind::Real, 40.0).await;

        h.monitor.cancel_handle().cancel();
        assert_eq!(h.monitor.tick(start + 500).await, RefuelMode::Inactive);
        assert_eq!(h.announcer.count("Refuel monitoring cancelled"), 1);

        // A new session gets a fresh handle
        h.monitor
            .start_refuel_mode(FuelChangeContext::SameFuel, RefuelKind::Quick)
            .await
            .unwrap();
        assert!(!h.monitor.cancel_handle().is_cancelled());
        assert_eq!(h.monitor.tick(0).await, RefuelMode::WaitingQuick);
    }

    #[tokio::test]
    async fn test_fuel_level_tracked_while_monitoring() {
        let mut h = harness(FakeReader::new(), MonitorSettings::default());
        let status = h.monitor.subscribe_status();
        let start = drive_off(&mut h, FuelChangeContext::SameFuel, RefuelKind::Quick, 40.0).await;
        assert_eq!(status.borrow().fuel_level_pct, None);

        h.monitor.tick(start + 500).await;
        assert_eq!(status.borrow().fuel_level_pct, Some(50.2));

        // Slow throttle: not re-read inside the interval
        h.reader.set(Pid::FuelLevel, Some(49.0));
        h.monitor.tick(start + 10_500).await;
        assert_eq!(status.borrow().fuel_level_pct, Some(50.2));

        h.monitor.tick(start + 30_500).await;
        assert_eq!(status.borrow().fuel_level_pct, Some(49.0));

        // A failed read keeps the last level
        h.reader.set(Pid::FuelLevel, None);
        h.monitor.tick(start + 61_000).await;
        assert_eq!(status.borrow().fuel_level_pct, Some(49.0));
    }

    #[tokio::test]
    async fn test_fuel_level_after_falls_back_to_monitored_reading() {
        let settings = MonitorSettings {
            target_distance_km: 0.5,
            ..Default::default()
        };
        let repo = Arc::new(Repository::new());
        let mut h = harness_with_store(FakeReader::new(), settings, Some(repo.clone()));

        h.monitor
            .start_refuel_mode(FuelChangeContext::SameFuel, RefuelKind::Real)
            .await
            .unwrap();
        h.reader.set(Pid::FuelLevel, Some(93.0));
        h.reader.set_speed(72.0);
        h.monitor.tick(0).await;
        h.monitor.tick(2_000).await;
        h.monitor.tick(2_500).await;

        // Sender drops out before the final read
        h.reader.set(Pid::FuelLevel, None);
        run_to_completion(&mut h, 2_500, 2_000).await;

        let records = repo.recent(1).unwrap();
        let record = &records[0];
        assert_eq!(record.fuel_level_before, Some(50.2));
        assert_eq!(record.fuel_level_after, Some(93.0));
    }
}
