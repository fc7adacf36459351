//! Scripted ELM327 adapter for tests and demos.
//!
//! Replies are looked up by command; anything unknown gets `?`. Replies
//! can be split into small chunks to exercise reassembly, and the link
//! can be dropped or refused on demand.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ObdError;
use crate::transport::{Transport, TransportEvent};

/// How the mock answers a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Send the text as-is (include the trailing `>`)
    Respond(String),
    /// Send the text with no prompt, so the caller times out
    Partial(String),
    /// Send nothing
    Silent,
}

/// VIN used by the default reply table (VW do Brasil)
pub const MOCK_VIN: &str = "9BWZZZ377VT004251";

#[derive(Default)]
struct MockState {
    replies: HashMap<String, MockReply>,
    events: Option<mpsc::Sender<TransportEvent>>,
    written: Vec<String>,
    opens: usize,
    fail_opens: usize,
    chunk_size: Option<usize>,
}

/// In-memory ELM327 transport
pub struct MockElm327 {
    state: Mutex<MockState>,
}

impl MockElm327 {
    /// Adapter with a healthy idling vehicle behind it
    pub fn new() -> Self {
        let mut replies = HashMap::new();
        let ok = |text: &str| MockReply::Respond(format!("{}\r\r>", text));

        replies.insert("ATZ".to_string(), ok("\r\rELM327 v1.5"));
        for cmd in ["ATE0", "ATL0", "ATS0", "ATH0", "ATSP0"] {
            replies.insert(cmd.to_string(), ok("OK"));
        }

        // Supported: 04-07, 0C-11, 13-15, 1C, 1F, 20 | 2F, 40 | 42
        replies.insert("0100".to_string(), ok("4100BE1FB813"));
        replies.insert("0120".to_string(), ok("412000020001"));
        replies.insert("0140".to_string(), ok("414040000000"));

        replies.insert("010C".to_string(), ok("410C1AF8")); // 1726 rpm
        replies.insert("010D".to_string(), ok("410D28")); // 40 km/h
        replies.insert("0105".to_string(), ok("41057B")); // 83 °C
        replies.insert("0142".to_string(), ok("41423138")); // 12.6 V
        replies.insert("012F".to_string(), ok("412F80")); // 50.2 %
        replies.insert("0104".to_string(), ok("410464")); // 39.2 %
        replies.insert("0106".to_string(), ok("410680")); // 0 %
        replies.insert("0107".to_string(), ok("410780")); // 0 %
        replies.insert("0114".to_string(), ok("41145AFF")); // 0.45 V

        replies.insert(
            "0902".to_string(),
            ok("014\r0:490201394257\r1:5A5A5A33373756\r2:54303034323531"),
        );

        Self {
            state: Mutex::new(MockState {
                replies,
                ..Default::default()
            }),
        }
    }

    /// Split every reply into chunks of `size` bytes
    pub fn with_chunk_size(self, size: usize) -> Self {
        self.lock().chunk_size = Some(size.max(1));
        self
    }

    /// Override the reply for one command
    pub fn set_reply(&self, command: &str, reply: MockReply) {
        self.lock().replies.insert(command.to_ascii_uppercase(), reply);
    }

    /// Refuse the next `count` calls to `open`
    pub fn fail_next_opens(&self, count: usize) {
        self.lock().fail_opens = count;
    }

    /// Simulate an unsolicited link drop
    pub async fn drop_link(&self) {
        let sender = self.lock().events.take();
        if let Some(sender) = sender {
            debug!("Mock ELM327: dropping link");
            let _ = sender.send(TransportEvent::Disconnected).await;
        }
    }

    /// Every command written so far, without terminators
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// Number of `open` calls, including refused ones
    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    pub fn is_open(&self) -> bool {
        self.lock().events.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockElm327 {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockElm327 {
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, ObdError> {
        let mut state = self.lock();
        state.opens += 1;

        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(ObdError::Transport("mock adapter refused connection".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        state.events = Some(tx);
        Ok(rx)
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), ObdError> {
        let command = String::from_utf8_lossy(bytes).trim().to_ascii_uppercase();

        let (sender, reply, chunk_size) = {
            let mut state = self.lock();
            let sender = state
                .events
                .clone()
                .ok_or_else(|| ObdError::Transport("mock adapter not open".to_string()))?;
            state.written.push(command.clone());
            let reply = state
                .replies
                .get(&command)
                .cloned()
                .unwrap_or_else(|| MockReply::Respond("?\r\r>".to_string()));
            (sender, reply, state.chunk_size)
        };

        let text = match reply {
            MockReply::Respond(text) | MockReply::Partial(text) => text,
            MockReply::Silent => return Ok(()),
        };

        let bytes = text.into_bytes();
        let size = chunk_size.unwrap_or(bytes.len()).max(1);
        for chunk in bytes.chunks(size) {
            if sender.send(TransportEvent::Data(chunk.to_vec())).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.lock().events = None;
    }

    fn describe(&self) -> String {
        "mock-elm327".to_string()
    }
}
