//! Serial transport
//!
//! Bluetooth SPP and USB ELM327 adapters show up as serial devices
//! (`/dev/rfcomm0`, `/dev/ttyUSB0`, `COM3`).

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::error::ObdError;
use crate::transport::{Transport, TransportEvent};

/// Transport over a serial port
pub struct SerialTransport {
    /// Serial port device path (e.g., "/dev/rfcomm0" or "COM3")
    device: String,
    baud_rate: u32,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SerialTransport {
    pub fn new(device: &str, baud_rate: u32) -> Self {
        Self {
            device: device.to_string(),
            baud_rate,
            writer: Mutex::new(None),
            reader: std::sync::Mutex::new(None),
        }
    }

    fn replace_reader(&self, handle: Option<JoinHandle<()>>) {
        let mut reader = self.reader.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = reader.take() {
            old.abort();
        }
        *reader = handle;
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&self) -> Result<mpsc::Receiver<TransportEvent>, ObdError> {
        info!("Opening serial port {} at {} baud", self.device, self.baud_rate);

        let stream = tokio_serial::new(&self.device, self.baud_rate).open_native_async()?;
        let (read_half, write_half) = tokio::io::split(stream);

        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(read_loop(read_half, tx, self.device.clone()));

        *self.writer.lock().await = Some(write_half);
        self.replace_reader(Some(handle));
        Ok(rx)
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), ObdError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ObdError::NotConnected)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.replace_reader(None);
        info!("Closed serial port {}", self.device);
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.device, self.baud_rate)
    }
}

async fn read_loop(
    mut port: ReadHalf<SerialStream>,
    tx: mpsc::Sender<TransportEvent>,
    device: String,
) {
    let mut buffer = [0u8; 256];
    loop {
        match port.read(&mut buffer).await {
            Ok(0) => {
                warn!("Serial port {} reached EOF", device);
                break;
            }
            Ok(n) => {
                debug!("{} bytes from {}", n, device);
                if tx.send(TransportEvent::Data(buffer[..n].to_vec())).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("Serial read error on {}: {}", device, e);
                break;
            }
        }
    }
    let _ = tx.send(TransportEvent::Disconnected).await;
}
