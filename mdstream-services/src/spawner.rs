//! Session construction seam

use tokio::sync::broadcast;

use mdstream_core::Endpoint;
use mdstream_session::{SessionConfig, SessionControl, SessionHandle, SessionUpdate, StreamSession};

/// Creates one session per selected endpoint
pub trait SessionSpawner: Send {
    type Session: SessionControl;

    fn spawn(&mut self, name: &str, endpoint: Endpoint) -> Self::Session;
}

/// Spawns websocket session tasks sharing one update channel
pub struct WebSocketSpawner {
    config: SessionConfig,
    updates: broadcast::Sender<SessionUpdate>,
}

impl WebSocketSpawner {
    pub fn new(config: SessionConfig, updates: broadcast::Sender<SessionUpdate>) -> Self {
        Self { config, updates }
    }
}

impl SessionSpawner for WebSocketSpawner {
    type Session = SessionHandle;

    fn spawn(&mut self, name: &str, endpoint: Endpoint) -> SessionHandle {
        StreamSession::spawn(name, endpoint, self.config.clone(), self.updates.clone())
    }
}
