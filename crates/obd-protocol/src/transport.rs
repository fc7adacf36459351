//! Transport abstraction.
//!
//! A transport is a bidirectional byte stream to the adapter: Bluetooth
//! SPP serial, BLE GATT, TCP Wi-Fi dongles. The core only needs to open
//! it, write bytes, receive inbound chunks and learn about drops.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ObdError;

/// Inbound event from an open transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A chunk of bytes. Chunks carry no framing.
    Data(Vec<u8>),
    /// The link dropped without a `close()` call
    Disconnected,
}

/// Byte stream to an ELM327-class adapter
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link and return the inbound event stream.
    ///
    /// Opening again after a drop replaces the previous stream.
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, ObdError>;

    /// Write raw bytes to the adapter
    async fn write(&self, bytes: &[u8]) -> Result<(), ObdError>;

    /// Close the link. The event stream ends without a `Disconnected` event.
    async fn close(&self);

    /// Human-readable endpoint name for logs
    fn describe(&self) -> String;
}
