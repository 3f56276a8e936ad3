//! Framed TCP channel to a device.
//!
//! Requests are serialized through an async mutex around the socket, so at
//! most one exchange is on the wire at a time. Any I/O failure or timeout
//! drops the socket and marks the channel disconnected; the next request
//! dials again unless [`TcpChannel::disconnect`] was called.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use aurora_protocol::constants::{CONNECT_TIMEOUT, MessageType, REQUEST_TIMEOUT};
use aurora_protocol::envelope::Message;
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::DeviceChannel;
use crate::error::DeviceError;
use crate::locator::DeviceLocator;
use crate::wire::{read_frame, write_frame};

/// Timeouts applied by a [`TcpChannel`].
#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

struct Io {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

pub struct TcpChannel {
    device_id: String,
    addr: String,
    options: ChannelOptions,
    io: Mutex<Option<Io>>,
    connected: AtomicBool,
    closed: AtomicBool,
}

async fn open(addr: &str, timeout: Duration) -> Result<Io, DeviceError> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Err(DeviceError::Connection(format!("{addr}: {e}"))),
        Err(_) => return Err(DeviceError::Timeout),
    };
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    Ok(Io {
        reader: BufReader::new(reader),
        writer: BufWriter::new(writer),
    })
}

impl TcpChannel {
    /// Connects to the device with timeout + cancellation.
    pub async fn connect(
        locator: &DeviceLocator,
        options: ChannelOptions,
        cancel: CancellationToken,
    ) -> Result<Self, DeviceError> {
        let addr = locator.socket_addr();
        let io = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DeviceError::Connection("connect cancelled".into()));
            }
            result = open(&addr, options.connect_timeout) => result?,
        };
        info!(device = %locator, "device channel connected");

        Ok(Self {
            device_id: locator.to_string(),
            addr,
            options,
            io: Mutex::new(Some(io)),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        })
    }

    /// Drops the socket for good. Later requests fail with
    /// [`DeviceError::Connection`].
    pub async fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.io.lock().await.take().is_some() {
            info!(device = %self.device_id, "device channel closed");
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn exchange(
        &self,
        msg_type: MessageType,
        payload: Option<serde_json::Value>,
    ) -> Result<Message, DeviceError> {
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::request(&id, msg_type, payload.as_ref())?;

        let mut guard = self.io.lock().await;
        if guard.is_none() {
            if self.closed.load(Ordering::SeqCst) {
                return Err(DeviceError::Connection("channel closed".into()));
            }
            // A failed exchange dropped the socket; dial again.
            let io = open(&self.addr, self.options.connect_timeout)
                .await
                .map_err(|e| match e {
                    DeviceError::Timeout => {
                        DeviceError::Connection(format!("{}: connect timed out", self.addr))
                    }
                    other => other,
                })?;
            info!(device = %self.device_id, "device channel reconnected");
            *guard = Some(io);
            self.connected.store(true, Ordering::SeqCst);
        }
        let Some(io) = guard.as_mut() else {
            return Err(DeviceError::Connection("not connected".into()));
        };

        let result = tokio::time::timeout(self.options.request_timeout, async {
            write_frame(&mut io.writer, &msg).await?;
            read_frame(&mut io.reader).await
        })
        .await;

        let outcome = match result {
            Ok(Ok(resp)) => match resp.answers(&id) {
                Ok(()) => return Ok(resp),
                Err(mismatch) => DeviceError::Protocol(mismatch.to_string()),
            },
            Ok(Err(e)) => e,
            Err(_) => DeviceError::Timeout,
        };

        // The stream position is unknown after any failure; drop it and
        // redial on the next request.
        warn!(
            device = %self.device_id,
            ?msg_type,
            error = %outcome,
            "request failed, closing socket"
        );
        *guard = None;
        self.connected.store(false, Ordering::SeqCst);
        Err(match outcome {
            DeviceError::Connection(_) | DeviceError::Timeout | DeviceError::Protocol(_) => {
                outcome
            }
            other => DeviceError::Connection(other.to_string()),
        })
    }
}

impl DeviceChannel for TcpChannel {
    fn request(
        &self,
        msg_type: MessageType,
        payload: Option<serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Message, DeviceError>> + Send + '_>> {
        Box::pin(async move {
            let resp = self.exchange(msg_type, payload).await?;
            debug!(device = %self.device_id, ?msg_type, "response received");
            Ok(resp)
        })
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
