//! Session Manager
//!
//! Owns the single device session. Every lifecycle transition (connect,
//! disconnect, negotiate, release) runs while holding the session slot, so
//! two transitions can never interleave.

use crate::domain::models::{ConnectOutcome, DeviceAddress, DisconnectOutcome, SessionState};
use crate::error::StreamError;
use crate::infrastructure::bluetooth::negotiator;
use crate::infrastructure::bluetooth::transport::{Link, LinkEvents, Transport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct Session {
    id: u64,
    address: DeviceAddress,
    link: Arc<dyn Link>,
    active_characteristic: Option<Uuid>,
    /// Set while a consumer is bound; firing it stops the stream.
    stream_stop: Option<oneshot::Sender<()>>,
}

impl Session {
    fn stop_stream(&mut self) {
        if let Some(stop) = self.stream_stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Everything a bound stream needs once the slot is released.
pub(crate) struct StreamBinding {
    pub session_id: u64,
    pub active: Uuid,
    pub events: LinkEvents,
    pub stop: oneshot::Receiver<()>,
}

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    slot: Mutex<Option<Session>>,
    state: watch::Sender<SessionState>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            transport,
            slot: Mutex::new(None),
            state,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub async fn connected_device(&self) -> Option<DeviceAddress> {
        self.slot.lock().await.as_ref().map(|s| s.address.clone())
    }

    pub async fn active_characteristic(&self) -> Option<Uuid> {
        self.slot
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.active_characteristic)
    }

    fn advance(&self, next: SessionState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_advance_to(next) {
            warn!(from = ?current, to = ?next, "Unexpected session state transition");
        }
        debug!(from = ?current, to = ?next, "Session state changed");
        self.state.send_replace(next);
    }

    /// Connect to `address` unless a live session already exists.
    pub async fn connect(&self, address: DeviceAddress) -> ConnectOutcome {
        let mut slot = self.slot.lock().await;

        let existing = match slot.as_ref() {
            Some(session) => Some((session.link.is_connected().await, session.address.clone())),
            None => None,
        };
        match existing {
            Some((true, device)) => {
                debug!(%device, "Already connected");
                return ConnectOutcome::AlreadyConnected { device };
            }
            Some((false, device)) => {
                warn!(%device, "Releasing stale session");
                if let Some(mut stale) = slot.take() {
                    stale.stop_stream();
                }
                self.advance(SessionState::Disconnected);
            }
            None => {}
        }

        self.advance(SessionState::Connecting);
        info!(%address, "Connecting to device");

        match self.transport.connect(&address).await {
            Ok(link) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                *slot = Some(Session {
                    id,
                    address: address.clone(),
                    link: Arc::from(link),
                    active_characteristic: None,
                    stream_stop: None,
                });
                self.advance(SessionState::Connected);
                info!(%address, session = id, "Connected to device");
                ConnectOutcome::Connected { device: address }
            }
            Err(e) => {
                self.advance(SessionState::Disconnected);
                error!(%address, "Error connecting: {}", e);
                ConnectOutcome::Failed { error: e }
            }
        }
    }

    /// Disconnect the current session. Local state is cleared even when the
    /// transport refuses.
    pub async fn disconnect(&self) -> DisconnectOutcome {
        let mut slot = self.slot.lock().await;
        let Some(mut session) = slot.take() else {
            return DisconnectOutcome::NotConnected;
        };

        self.advance(SessionState::Disconnecting);
        session.stop_stream();

        if let Some(characteristic) = session.active_characteristic {
            if let Err(e) = session.link.unsubscribe(characteristic).await {
                debug!(%characteristic, "Unsubscribe before disconnect failed: {}", e);
            }
        }

        let result = session.link.disconnect().await;
        self.advance(SessionState::Disconnected);

        match result {
            Ok(()) => {
                info!(device = %session.address, "Disconnected from device");
                DisconnectOutcome::Disconnected
            }
            Err(e) => {
                error!(device = %session.address, "Error disconnecting: {}", e);
                DisconnectOutcome::Failed { error: e }
            }
        }
    }

    /// Disconnect on process exit.
    pub async fn shutdown(&self) {
        match self.disconnect().await {
            DisconnectOutcome::Disconnected => info!("Session closed on shutdown"),
            DisconnectOutcome::NotConnected => {}
            DisconnectOutcome::Failed { error } => {
                warn!("Session teardown on shutdown failed: {}", error)
            }
        }
    }

    /// Negotiate a characteristic and bind a consumer to the session.
    pub(crate) async fn bind_stream(&self, candidates: &[Uuid]) -> Result<StreamBinding, StreamError> {
        let mut slot = self.slot.lock().await;

        let alive = match slot.as_ref() {
            Some(session) => session.link.is_connected().await,
            None => return Err(StreamError::NoDevice),
        };
        if !alive {
            warn!("Session transport dropped, releasing");
            if let Some(mut stale) = slot.take() {
                stale.stop_stream();
            }
            self.advance(SessionState::Disconnected);
            return Err(StreamError::NoDevice);
        }

        let Some(session) = slot.as_mut() else {
            return Err(StreamError::NoDevice);
        };
        if session.stream_stop.is_some() {
            return Err(StreamError::AlreadyStreaming);
        }

        let events = session.link.events().await?;

        self.advance(SessionState::Negotiating);
        let negotiation = match negotiator::negotiate(session.link.as_ref(), candidates).await {
            Ok(negotiation) => negotiation,
            Err(e) => {
                self.advance(SessionState::Connected);
                return Err(e.into());
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        session.active_characteristic = Some(negotiation.active);
        session.stream_stop = Some(stop_tx);
        self.advance(SessionState::Streaming);

        Ok(StreamBinding {
            session_id: session.id,
            active: negotiation.active,
            events,
            stop: stop_rx,
        })
    }

    /// Stream teardown: unsubscribe every candidate, disconnect and drop the
    /// session the stream was bound to. Runs under the slot lock so no
    /// request observes a half torn down session. A newer session is left
    /// alone.
    pub(crate) async fn release_stream(&self, session_id: u64, candidates: &[Uuid]) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().map(|s| s.id) != Some(session_id) {
            debug!(session = session_id, "Session already released");
            return;
        }
        let Some(session) = slot.take() else {
            return;
        };

        self.advance(SessionState::Disconnecting);
        for &characteristic in candidates {
            if let Err(e) = session.link.unsubscribe(characteristic).await {
                debug!(%characteristic, "Unsubscribe during teardown failed: {}", e);
            }
        }
        if let Err(e) = session.link.disconnect().await {
            warn!(device = %session.address, "Disconnect during teardown failed: {}", e);
        }
        self.advance(SessionState::Disconnected);
        info!(device = %session.address, session = session_id, "Session released");
    }
}
