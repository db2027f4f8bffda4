use crate::domain::models::{ScannedDevice, StreamMessage};
use crate::infrastructure::ipc::protocol::{encode_line, BridgeRequest, DevicesReply, StatusReply};
use crate::infrastructure::ipc::socket_name;
use anyhow::{Context, Result};
use interprocess::local_socket::tokio::{prelude::*, RecvHalf, SendHalf, Stream};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tracing::{debug, info};

/// Talks to a running bridge over its local socket.
pub struct BridgeClient {
    name: String,
}

impl BridgeClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    async fn send_request(&self, request: &BridgeRequest) -> Result<(RecvHalf, SendHalf)> {
        let stream = Stream::connect(socket_name(&self.name)?)
            .await
            .with_context(|| format!("Bridge not reachable on {}", self.name))?;
        let (recv, mut send) = stream.split();
        send.write_all(encode_line(request)?.as_bytes()).await?;
        send.flush().await?;
        Ok((recv, send))
    }

    async fn call<T: DeserializeOwned>(&self, request: &BridgeRequest) -> Result<T> {
        let (recv, _send) = self.send_request(request).await?;
        let mut line = String::new();
        BufReader::new(recv).read_line(&mut line).await?;
        if line.is_empty() {
            anyhow::bail!("Bridge closed the connection without replying");
        }
        let reply = serde_json::from_str(line.trim())
            .with_context(|| format!("Unexpected reply: {}", line.trim()))?;
        Ok(reply)
    }

    /// Poll until the bridge accepts connections.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            match Stream::connect(socket_name(&self.name)?).await {
                Ok(_) => {
                    info!("Bridge is up on {}", self.name);
                    return Ok(());
                }
                Err(e) if start.elapsed() < timeout => {
                    debug!("Bridge not ready yet: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(e) => return Err(e).context("Bridge did not come up in time"),
            }
        }
    }

    pub async fn devices(&self) -> Result<Vec<ScannedDevice>> {
        match self.call(&BridgeRequest::Devices).await? {
            DevicesReply::Devices { devices } => Ok(devices),
            DevicesReply::Error { error } => anyhow::bail!("Scan failed: {}", error),
        }
    }

    pub async fn connect(&self, address: &str) -> Result<StatusReply> {
        self.call(&BridgeRequest::Connect {
            address: address.to_string(),
        })
        .await
    }

    pub async fn disconnect(&self) -> Result<StatusReply> {
        self.call(&BridgeRequest::Disconnect).await
    }

    /// Become the stream consumer. Dropping the returned reader ends the
    /// stream on the bridge side.
    pub async fn open_stream(&self) -> Result<StreamReader> {
        let (recv, send) = self.send_request(&BridgeRequest::Stream).await?;
        Ok(StreamReader {
            lines: BufReader::new(recv).lines(),
            _send: send,
        })
    }
}

pub struct StreamReader {
    lines: Lines<BufReader<RecvHalf>>,
    // Held so the bridge does not read EOF while we are listening.
    _send: SendHalf,
}

impl StreamReader {
    /// Next message, or `None` once the bridge closed the stream.
    pub async fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        match self.lines.next_line().await? {
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }

    /// Raw JSON lines, for passing through unchanged.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }
}
