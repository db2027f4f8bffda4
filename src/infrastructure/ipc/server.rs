use crate::domain::models::{ConnectOutcome, DeviceAddress, StreamMessage};
use crate::domain::settings::SettingsService;
use crate::error::ConsumerGone;
use crate::infrastructure::bluetooth::stream::StreamConsumer;
use crate::infrastructure::bluetooth::{SessionManager, StreamingSession};
use crate::infrastructure::ipc::protocol::{
    encode_line, BridgeRequest, DevicesReply, ErrorReply, StatusReply,
};
use crate::infrastructure::ipc::socket_name;
use anyhow::Result;
use async_trait::async_trait;
use interprocess::local_socket::tokio::{prelude::*, RecvHalf, SendHalf, Stream};
use interprocess::local_socket::ListenerOptions;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

/// Serves requests from local clients against the shared session.
pub struct BridgeServer {
    manager: Arc<SessionManager>,
    streaming: Arc<StreamingSession>,
    settings: Arc<Mutex<SettingsService>>,
    scan_duration: Duration,
}

impl BridgeServer {
    pub fn new(
        manager: Arc<SessionManager>,
        streaming: Arc<StreamingSession>,
        settings: Arc<Mutex<SettingsService>>,
    ) -> Self {
        let scan_duration = settings
            .lock()
            .map(|s| s.get().scan_duration())
            .unwrap_or(Duration::from_secs(5));
        Self {
            manager,
            streaming,
            settings,
            scan_duration,
        }
    }

    /// Accept connections until the listener fails.
    pub async fn run(self: Arc<Self>, name: &str) -> Result<()> {
        let listener = ListenerOptions::new()
            .name(socket_name(name)?)
            .create_tokio()?;
        info!(socket = name, "Listening for requests");

        loop {
            let conn = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    continue;
                }
            };

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(conn).await {
                    error!("Connection error: {:#}", e);
                }
            });
        }
    }

    async fn handle_connection(&self, conn: Stream) -> Result<()> {
        let (recv, mut send) = conn.split();
        let mut reader = BufReader::new(recv);
        let mut line = String::new();

        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }

        let request = match serde_json::from_str::<BridgeRequest>(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                warn!("Invalid request: {}", e);
                let reply = ErrorReply {
                    error: format!("invalid request: {}", e),
                };
                return write_reply(&mut send, &reply).await;
            }
        };
        debug!(?request, "Received request");

        match request {
            BridgeRequest::Devices => {
                let reply = match self.manager.transport().scan(self.scan_duration).await {
                    Ok(devices) => DevicesReply::Devices { devices },
                    Err(e) => {
                        error!("Error scanning devices: {}", e);
                        DevicesReply::Error {
                            error: e.to_string(),
                        }
                    }
                };
                write_reply(&mut send, &reply).await
            }
            BridgeRequest::Connect { address } => {
                let outcome = self.manager.connect(DeviceAddress::new(address)).await;
                if let ConnectOutcome::Connected { device } = &outcome {
                    self.remember(device);
                }
                write_reply(&mut send, &StatusReply::from(&outcome)).await
            }
            BridgeRequest::Disconnect => {
                let outcome = self.manager.disconnect().await;
                write_reply(&mut send, &StatusReply::from(&outcome)).await
            }
            BridgeRequest::Stream => {
                let consumer = LineConsumer {
                    reader,
                    writer: send,
                };
                match self.streaming.open(consumer).await {
                    Ok(end) => debug!(?end, "Stream finished"),
                    Err(e) => debug!("Stream not started: {}", e),
                }
                Ok(())
            }
        }
    }

    fn remember(&self, device: &DeviceAddress) {
        match self.settings.lock() {
            Ok(mut settings) => {
                if let Err(e) = settings.record_connection(device.as_str()) {
                    warn!("Failed to save settings: {:#}", e);
                }
            }
            Err(_) => warn!("Settings lock poisoned"),
        }
    }
}

async fn write_reply<T: Serialize>(send: &mut SendHalf, reply: &T) -> Result<()> {
    send.write_all(encode_line(reply)?.as_bytes()).await?;
    send.flush().await?;
    Ok(())
}

/// A local-socket client acting as the stream consumer. Messages go out as
/// JSON lines; EOF from the client means it left.
struct LineConsumer {
    reader: BufReader<RecvHalf>,
    writer: SendHalf,
}

#[async_trait]
impl StreamConsumer for LineConsumer {
    async fn send(&mut self, message: &StreamMessage) -> Result<(), ConsumerGone> {
        let line = encode_line(message).map_err(|e| {
            error!("Failed to encode stream message: {}", e);
            ConsumerGone
        })?;
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|_| ConsumerGone)?;
        self.writer.flush().await.map_err(|_| ConsumerGone)
    }

    async fn closed(&mut self) {
        // Anything the client sends after the request is ignored.
        let mut buf = [0u8; 256];
        loop {
            match self.reader.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}
