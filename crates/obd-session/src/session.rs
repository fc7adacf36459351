//! Connection session
//!
//! Owns the adapter link: open, init, VIN, polling, and bounded
//! auto-reconnect after an unexpected drop. Every command issued through
//! the session shares one serialized [`CommandChannel`].

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use obd_protocol::{
    full_init_sequence, light_init_sequence, ChannelResponse, CommandChannel, ObdClient, ObdError,
    Pid, PidResponse, SupportedPids, Transport, VehicleInfo,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::poller::PollingLoop;
use crate::snapshot::VehicleSnapshot;
use crate::state::ConnectionState;

/// Which init sequence a link gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitKind {
    /// Reset, formatting, protocol, probe and VIN
    Full,
    /// Formatting only, used on reconnect
    Light,
}

#[derive(Default)]
struct Lifecycle {
    /// Cancelled by `disconnect()`; parent of the poll token
    connection: Option<CancellationToken>,
    poll: Option<(CancellationToken, JoinHandle<()>)>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    state_tx: watch::Sender<ConnectionState>,
    snapshot_tx: Arc<watch::Sender<VehicleSnapshot>>,
    link: Mutex<Option<ObdClient>>,
    supported: Mutex<SupportedPids>,
    vehicle: Mutex<Option<VehicleInfo>>,
    last_error: Mutex<Option<String>>,
    lifecycle: Mutex<Lifecycle>,
    /// Set by `disconnect()`; suppresses auto-reconnect
    intentional: AtomicBool,
    /// Polling was active when the link dropped
    polling_wanted: AtomicBool,
    reconnect_attempts: AtomicU32,
    /// Generation of the most recently bound channel
    generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn ensure_live(token: &CancellationToken) -> Result<(), ObdError> {
    if token.is_cancelled() {
        Err(ObdError::InvalidState("connection cancelled by disconnect".to_string()))
    } else {
        Ok(())
    }
}

/// Handle to one vehicle connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<Inner>,
}

impl ConnectionSession {
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (snapshot_tx, _) = watch::channel(VehicleSnapshot::default());

        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state_tx,
                snapshot_tx: Arc::new(snapshot_tx),
                link: Mutex::new(None),
                supported: Mutex::new(SupportedPids::default()),
                vehicle: Mutex::new(None),
                last_error: Mutex::new(None),
                lifecycle: Mutex::new(Lifecycle::default()),
                intentional: AtomicBool::new(false),
                polling_wanted: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> VehicleSnapshot {
        *self.inner.snapshot_tx.borrow()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<VehicleSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Vehicle identity, if the VIN was read
    pub fn vehicle(&self) -> Option<VehicleInfo> {
        lock(&self.inner.vehicle).clone()
    }

    pub fn supported_pids(&self) -> SupportedPids {
        lock(&self.inner.supported).clone()
    }

    pub fn supports(&self, pid: Pid) -> bool {
        lock(&self.inner.supported).supports(pid)
    }

    /// Raw message of the last connection failure
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.last_error).clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Open the transport and run the full adapter init.
    ///
    /// Valid from `Disconnected` or `Error`. A failing init step leaves the
    /// session in `Error`; it is not retried.
    pub async fn connect(&self) -> Result<(), ObdError> {
        let inner = &self.inner;

        let mut previous = ConnectionState::Disconnected;
        let claimed = inner.state_tx.send_if_modified(|state| {
            previous = *state;
            if matches!(*state, ConnectionState::Disconnected | ConnectionState::Error) {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ObdError::InvalidState(format!("cannot connect while {}", previous)));
        }
        info!("Connection state {} -> {}", previous, ConnectionState::Connecting);

        inner.intentional.store(false, Ordering::SeqCst);
        inner.polling_wanted.store(false, Ordering::SeqCst);
        inner.reconnect_attempts.store(0, Ordering::SeqCst);
        *lock(&inner.last_error) = None;

        let token = CancellationToken::new();
        if let Some(stale) = lock(&inner.lifecycle).connection.replace(token.clone()) {
            stale.cancel();
        }

        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        info!("Connecting to OBD adapter via {}", inner.transport.describe());

        match self.establish(InitKind::Full, &lost_tx, &token).await {
            Ok(()) => {
                metrics::counter!("obd_connections_total").increment(1);
                tokio::spawn(self.clone().supervise(lost_rx, lost_tx, token));
                Ok(())
            }
            Err(e) => {
                warn!("Connection failed: {}", e);
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Tear the link down. Suppresses auto-reconnect, including one
    /// waiting out its backoff.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.intentional.store(true, Ordering::SeqCst);
        inner.polling_wanted.store(false, Ordering::SeqCst);

        let connection = lock(&inner.lifecycle).connection.take();
        if let Some(token) = connection {
            token.cancel();
        }
        self.stop_poll_task().await;

        match self.take_link() {
            Some(client) => client.channel().close().await,
            None => inner.transport.close().await,
        }

        inner.snapshot_tx.send_replace(VehicleSnapshot::default());
        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected from {}", inner.transport.describe());
    }

    /// Start the polling loop. Valid from `Ready`; a no-op in `Reading`.
    pub fn start_polling(&self) -> Result<(), ObdError> {
        match self.state() {
            ConnectionState::Reading => return Ok(()),
            ConnectionState::Ready => {}
            other => {
                return Err(ObdError::InvalidState(format!("cannot start polling while {}", other)))
            }
        }

        let client = self.client()?;
        let poller = PollingLoop::new(
            client,
            &self.supported_pids(),
            self.inner.config.clone(),
            Arc::clone(&self.inner.snapshot_tx),
        );

        {
            let mut lifecycle = lock(&self.inner.lifecycle);
            let parent = lifecycle.connection.as_ref().ok_or(ObdError::NotConnected)?;
            let token = parent.child_token();
            let handle = tokio::spawn(poller.run(token.clone()));
            if let Some((stale, _)) = lifecycle.poll.replace((token, handle)) {
                stale.cancel();
            }
        }

        self.inner.polling_wanted.store(true, Ordering::SeqCst);
        self.transition(ConnectionState::Ready, ConnectionState::Reading);
        Ok(())
    }

    /// Stop polling and return to `Ready`. No further polling command is
    /// issued once this returns.
    pub async fn stop_polling(&self) {
        self.inner.polling_wanted.store(false, Ordering::SeqCst);
        self.stop_poll_task().await;
        self.transition(ConnectionState::Reading, ConnectionState::Ready);
    }

    /// Read one PID through the shared channel. Unsupported PIDs are
    /// refused without touching the adapter.
    pub async fn read_pid(&self, pid: Pid) -> Result<PidResponse, ObdError> {
        let client = self.client()?;
        if !self.supports(pid) {
            return Err(ObdError::PidNotSupported(pid.as_hex()));
        }
        client.query_pid(pid).await
    }

    /// Send an ad-hoc command, queued behind any transaction in flight
    pub async fn execute(&self, command: &str) -> Result<ChannelResponse, ObdError> {
        self.client()?.execute(command).await
    }

    fn client(&self) -> Result<ObdClient, ObdError> {
        lock(&self.inner.link).clone().ok_or(ObdError::NotConnected)
    }

    fn take_link(&self) -> Option<ObdClient> {
        lock(&self.inner.link).take()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.inner.state_tx.send_replace(next);
        if previous != next {
            info!("Connection state {} -> {}", previous, next);
        }
    }

    /// Like `set_state`, but a no-op once `token` is cancelled: the
    /// `disconnect()` that cancelled it owns the final state
    fn set_live_state(&self, next: ConnectionState, token: &CancellationToken) -> Result<(), ObdError> {
        let mut previous = next;
        let mut live = true;
        self.inner.state_tx.send_if_modified(|state| {
            if token.is_cancelled() {
                live = false;
                return false;
            }
            previous = *state;
            *state = next;
            previous != next
        });

        if !live {
            return ensure_live(token);
        }
        if previous != next {
            info!("Connection state {} -> {}", previous, next);
        }
        Ok(())
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let changed = self.inner.state_tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            info!("Connection state {} -> {}", from, to);
        }
        changed
    }

    fn record_failure(&self, err: &ObdError) {
        *lock(&self.inner.last_error) = Some(err.to_string());
        if !self.inner.intentional.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Error);
        }
    }

    async fn stop_poll_task(&self) {
        let poll = lock(&self.inner.lifecycle).poll.take();
        if let Some((token, handle)) = poll {
            token.cancel();
            let _ = handle.await;
        }
    }

    /// Open, bind and initialize a link
    async fn establish(
        &self,
        kind: InitKind,
        lost_tx: &mpsc::UnboundedSender<u64>,
        token: &CancellationToken,
    ) -> Result<(), ObdError> {
        self.set_live_state(ConnectionState::Connecting, token)?;
        let events = self.inner.transport.open().await?;

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let channel = Arc::new(CommandChannel::bind(
            Arc::clone(&self.inner.transport),
            events,
            generation,
            Some(lost_tx.clone()),
        ));
        let client = ObdClient::new(Arc::clone(&channel))
            .with_timeout(self.inner.config.command_timeout());
        *lock(&self.inner.link) = Some(client.clone());

        if let Err(e) = self.initialize(&client, kind, token).await {
            self.release_link(&channel).await;
            return Err(e);
        }
        Ok(())
    }

    async fn initialize(
        &self,
        client: &ObdClient,
        kind: InitKind,
        token: &CancellationToken,
    ) -> Result<(), ObdError> {
        let config = &self.inner.config;
        self.set_live_state(ConnectionState::Initializing, token)?;

        let sequence = match kind {
            InitKind::Full => full_init_sequence(config.protocol),
            InitKind::Light => light_init_sequence(),
        };
        client.run_init(&sequence, config.init_timing()).await?;
        ensure_live(token)?;

        if kind == InitKind::Full {
            let supported = if config.probe_supported_pids {
                client.probe_supported().await
            } else {
                SupportedPids::all()
            };
            *lock(&self.inner.supported) = supported;

            let vehicle = if config.read_vin {
                client.read_vin().await
            } else {
                None
            };
            *lock(&self.inner.vehicle) = vehicle;
            ensure_live(token)?;
        }

        self.set_live_state(ConnectionState::Ready, token)
    }

    async fn release_link(&self, channel: &Arc<CommandChannel>) {
        {
            let mut link = lock(&self.inner.link);
            let owned = link
                .as_ref()
                .is_some_and(|client| client.channel().generation() == channel.generation());
            if owned {
                *link = None;
            }
        }
        channel.close().await;
    }

    /// Watch for link loss until the connection is cancelled or the
    /// reconnect budget runs out
    async fn supervise(
        self,
        mut lost_rx: mpsc::UnboundedReceiver<u64>,
        lost_tx: mpsc::UnboundedSender<u64>,
        token: CancellationToken,
    ) {
        loop {
            let generation = tokio::select! {
                _ = token.cancelled() => return,
                lost = lost_rx.recv() => match lost {
                    Some(generation) => generation,
                    None => return,
                },
            };

            let current = self.inner.generation.load(Ordering::SeqCst);
            if generation != current || self.inner.intentional.load(Ordering::SeqCst) {
                debug!("Ignoring link loss for stale generation {} (current {})", generation, current);
                continue;
            }

            warn!("Unexpected disconnect from {}", self.inner.transport.describe());
            metrics::counter!("obd_link_drops_total").increment(1);

            let resume = self.inner.polling_wanted.load(Ordering::SeqCst);
            self.stop_poll_task().await;
            if let Some(client) = self.take_link() {
                client.channel().close().await;
            }

            if !self.reconnect(&lost_tx, &token, resume).await {
                return;
            }
        }
    }

    /// Fixed-backoff reconnect with the light init. Returns false when the
    /// session gave up or was cancelled.
    async fn reconnect(
        &self,
        lost_tx: &mpsc::UnboundedSender<u64>,
        token: &CancellationToken,
        resume: bool,
    ) -> bool {
        let config = &self.inner.config;

        loop {
            let attempts = self.inner.reconnect_attempts.load(Ordering::SeqCst);
            if attempts >= config.reconnect_max_attempts {
                warn!("Auto-reconnect gave up after {} attempts", attempts);
                if let Some(connection) = lock(&self.inner.lifecycle).connection.take() {
                    connection.cancel();
                }
                self.inner.snapshot_tx.send_replace(VehicleSnapshot::default());
                self.set_state(ConnectionState::Disconnected);
                return false;
            }

            let attempt = attempts + 1;
            self.inner.reconnect_attempts.store(attempt, Ordering::SeqCst);
            metrics::counter!("obd_reconnect_attempts_total").increment(1);
            if self.set_live_state(ConnectionState::Connecting, token).is_err() {
                return false;
            }
            info!(
                "Reconnect attempt {}/{} in {}ms",
                attempt,
                config.reconnect_max_attempts,
                config.reconnect_backoff_ms
            );

            tokio::select! {
                _ = token.cancelled() => {
                    info!("Reconnect cancelled by disconnect");
                    return false;
                }
                _ = tokio::time::sleep(config.reconnect_backoff()) => {}
            }

            match self.establish(InitKind::Light, lost_tx, token).await {
                Ok(()) => {
                    info!("Reconnected on attempt {}", attempt);
                    if resume {
                        if let Err(e) = self.start_polling() {
                            warn!("Could not resume polling after reconnect: {}", e);
                        }
                    }
                    return true;
                }
                Err(_) if token.is_cancelled() => return false,
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                    *lock(&self.inner.last_error) = Some(e.to_string());
                }
            }
        }
    }
}
