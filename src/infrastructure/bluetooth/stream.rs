//! Streaming Session
//!
//! Binds one consumer to the connected device and forwards every decoded
//! notification to it in arrival order. The stream ends when the consumer
//! leaves, the device drops, or the session is disconnected; each path runs
//! the same teardown.

use crate::domain::models::StreamMessage;
use crate::error::{ConsumerGone, StreamError};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::session::{SessionManager, StreamBinding};
use crate::infrastructure::bluetooth::transport::LinkEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// The far end of a stream.
#[async_trait]
pub trait StreamConsumer: Send {
    async fn send(&mut self, message: &StreamMessage) -> Result<(), ConsumerGone>;

    /// Resolves once the consumer has gone away. Must be cancel-safe.
    async fn closed(&mut self);

    async fn close(&mut self);
}

/// Consumer backed by an in-process channel. Dropping the receiver counts as
/// the consumer leaving.
pub struct ChannelConsumer {
    tx: mpsc::UnboundedSender<StreamMessage>,
}

impl ChannelConsumer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StreamConsumer for ChannelConsumer {
    async fn send(&mut self, message: &StreamMessage) -> Result<(), ConsumerGone> {
        self.tx.send(message.clone()).map_err(|_| ConsumerGone)
    }

    async fn closed(&mut self) {
        self.tx.closed().await
    }

    async fn close(&mut self) {}
}

/// Why a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    ConsumerGone,
    DeviceLost,
    /// The session was disconnected by request.
    SessionClosed,
}

enum Step {
    Stop,
    Gone,
    Event(Option<LinkEvent>),
}

pub struct StreamingSession {
    manager: Arc<SessionManager>,
    candidates: Vec<Uuid>,
}

impl StreamingSession {
    pub fn new(manager: Arc<SessionManager>, candidates: Vec<Uuid>) -> Self {
        Self {
            manager,
            candidates,
        }
    }

    /// Run a stream to completion for `consumer`.
    ///
    /// If the stream cannot start, the consumer gets exactly one error record
    /// and is closed.
    pub async fn open<C: StreamConsumer>(&self, mut consumer: C) -> Result<StreamEnd, StreamError> {
        let binding = match self.manager.bind_stream(&self.candidates).await {
            Ok(binding) => binding,
            Err(e) => {
                warn!("Rejecting stream consumer: {}", e);
                let _ = consumer.send(&StreamMessage::error(e.to_string())).await;
                consumer.close().await;
                return Err(e);
            }
        };

        let StreamBinding {
            session_id,
            active,
            mut events,
            mut stop,
        } = binding;
        info!(characteristic = %active, session = session_id, "Streaming started");

        let end = loop {
            let step = tokio::select! {
                biased;
                _ = &mut stop => Step::Stop,
                event = events.recv() => Step::Event(event),
                _ = consumer.closed() => Step::Gone,
            };

            match step {
                Step::Stop => break StreamEnd::SessionClosed,
                Step::Gone => break StreamEnd::ConsumerGone,
                Step::Event(Some(LinkEvent::Notification {
                    characteristic,
                    value,
                })) => {
                    if characteristic != active {
                        trace!(%characteristic, "Ignoring notification from inactive characteristic");
                        continue;
                    }
                    let message = protocol::decode_message(&value);
                    if let StreamMessage::Error { error } = &message {
                        debug!(len = value.len(), "Malformed frame: {}", error);
                    }
                    if consumer.send(&message).await.is_err() {
                        break StreamEnd::ConsumerGone;
                    }
                }
                Step::Event(Some(LinkEvent::Disconnected)) | Step::Event(None) => {
                    break StreamEnd::DeviceLost
                }
            }
        };

        self.teardown(session_id, end, &mut consumer).await;
        Ok(end)
    }

    /// Release the session, then tell the consumer why the stream ended.
    async fn teardown<C: StreamConsumer>(&self, session_id: u64, end: StreamEnd, consumer: &mut C) {
        self.manager
            .release_stream(session_id, &self.candidates)
            .await;

        match end {
            StreamEnd::ConsumerGone => info!("Stream consumer disconnected"),
            StreamEnd::DeviceLost | StreamEnd::SessionClosed => {
                if end == StreamEnd::DeviceLost {
                    warn!("Device connection lost while streaming");
                } else {
                    info!("Session closed while streaming");
                }
                let _ = consumer
                    .send(&StreamMessage::error("device disconnected"))
                    .await;
                consumer.close().await;
            }
        }
    }
}
