//! Command Channel
//!
//! Turns the chunked inbound stream of a [`Transport`] into strictly
//! sequential request/response transactions. A response is complete when
//! the adapter prompt `>` shows up in the buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ObdError;
use crate::protocol::{COMMAND_TERMINATOR, PROMPT};
use crate::transport::{Transport, TransportEvent};

/// Outcome of one command round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelResponse {
    /// Everything received before the prompt
    Complete(String),
    /// Bytes received before the timeout, no prompt seen
    Partial(String),
    /// Nothing at all arrived before the timeout
    Timeout,
}

impl ChannelResponse {
    /// Received text, complete or partial
    pub fn text(&self) -> Option<&str> {
        match self {
            ChannelResponse::Complete(text) | ChannelResponse::Partial(text) => Some(text),
            ChannelResponse::Timeout => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelResponse::Timeout)
    }
}

/// Inbound text kept while no prompt has arrived
const MAX_BUFFERED: usize = 4096;

/// The single pending transaction slot shared with the reader task
#[derive(Default)]
struct PendingSlot {
    buffer: String,
    waiter: Option<oneshot::Sender<String>>,
}

fn lock(slot: &Mutex<PendingSlot>) -> MutexGuard<'_, PendingSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serialized request/response channel over an open transport
pub struct CommandChannel {
    transport: Arc<dyn Transport>,
    slot: Arc<Mutex<PendingSlot>>,
    /// Held for the whole round trip; at most one transaction in flight
    gate: tokio::sync::Mutex<()>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    generation: u64,
}

impl CommandChannel {
    /// Bind a channel to an opened transport's event stream.
    ///
    /// When the stream reports a drop or ends, `generation` is sent on
    /// `link_lost` (if given).
    pub fn bind(
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
        generation: u64,
        link_lost: Option<mpsc::UnboundedSender<u64>>,
    ) -> Self {
        let slot = Arc::new(Mutex::new(PendingSlot::default()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(pump(
            events,
            Arc::clone(&slot),
            Arc::clone(&alive),
            generation,
            link_lost,
        ));

        debug!("Command channel bound to {} (generation {})", transport.describe(), generation);

        Self {
            transport,
            slot,
            gate: tokio::sync::Mutex::new(()),
            alive,
            reader,
            generation,
        }
    }

    /// Send a command and wait for its response, queueing behind any
    /// transaction already in flight.
    pub async fn send(&self, command: &str, timeout: Duration) -> Result<ChannelResponse, ObdError> {
        let _turn = self.gate.lock().await;
        self.transact(command, timeout).await
    }

    /// Like [`send`](Self::send) but fails with `ChannelBusy` instead of
    /// queueing when a transaction is pending.
    pub async fn try_send(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ChannelResponse, ObdError> {
        let _turn = self.gate.try_lock().map_err(|_| ObdError::ChannelBusy)?;
        self.transact(command, timeout).await
    }

    async fn transact(&self, command: &str, timeout: Duration) -> Result<ChannelResponse, ObdError> {
        if !self.is_alive() {
            return Err(ObdError::LinkLost);
        }

        let (tx, mut rx) = oneshot::channel();
        {
            // A waiter left here belongs to a caller that was cancelled mid-flight
            let mut slot = lock(&self.slot);
            slot.buffer.clear();
            slot.waiter = Some(tx);
        }

        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push(COMMAND_TERMINATOR);
        debug!("TX {:?}", line);

        if let Err(e) = self.transport.write(line.as_bytes()).await {
            lock(&self.slot).waiter = None;
            return Err(e);
        }

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(response)) => {
                debug!("RX {:?}", response);
                Ok(ChannelResponse::Complete(response))
            }
            Ok(Err(_)) => Err(ObdError::LinkLost),
            Err(_) => {
                // The prompt may have landed between the deadline and here
                if let Ok(response) = rx.try_recv() {
                    return Ok(ChannelResponse::Complete(response));
                }

                let mut slot = lock(&self.slot);
                slot.waiter = None;
                let partial = std::mem::take(&mut slot.buffer);

                if partial.is_empty() {
                    metrics::counter!("obd_command_timeouts_total").increment(1);
                    warn!("{} timed out after {}ms", command, timeout.as_millis());
                    Ok(ChannelResponse::Timeout)
                } else {
                    metrics::counter!("obd_partial_responses_total").increment(1);
                    warn!("{} timed out with partial response {:?}", command, partial);
                    Ok(ChannelResponse::Partial(partial))
                }
            }
        }
    }

    /// Whether the underlying link is still up
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Close the transport and stop the reader
    pub async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.transport.close().await;
        self.reader.abort();
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Reader task: accumulate chunks, resolve the pending waiter on prompt
async fn pump(
    mut events: mpsc::Receiver<TransportEvent>,
    slot: Arc<Mutex<PendingSlot>>,
    alive: Arc<AtomicBool>,
    generation: u64,
    link_lost: Option<mpsc::UnboundedSender<u64>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Data(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let mut pending = lock(&slot);
                pending.buffer.push_str(&text);

                match pending.buffer.find(PROMPT) {
                    Some(idx) => match pending.waiter.take() {
                        Some(waiter) => {
                            let response = pending.buffer[..idx].to_string();
                            pending.buffer.clear();
                            let _ = waiter.send(response);
                        }
                        None => {
                            debug!("Discarding unsolicited output {:?}", &pending.buffer[..idx]);
                            pending.buffer.drain(..idx + PROMPT.len_utf8());
                        }
                    },
                    None if pending.buffer.len() > MAX_BUFFERED => {
                        warn!("Dropping {} bytes of output without a prompt", pending.buffer.len());
                        pending.buffer.clear();
                    }
                    None => {}
                }
            }
            TransportEvent::Disconnected => break,
        }
    }

    let was_alive = alive.swap(false, Ordering::SeqCst);
    // Dropping the waiter wakes the pending caller with LinkLost
    lock(&slot).waiter = None;

    if was_alive {
        warn!("Transport link lost (generation {})", generation);
        if let Some(tx) = link_lost {
            let _ = tx.send(generation);
        }
    }
}
