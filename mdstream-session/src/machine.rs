//! Event-driven session state machine
//!
//! `SessionCore` performs no I/O. The driver feeds it connection events and
//! inbound messages one at a time and carries out the returned actions, which
//! keeps every protocol decision testable without a socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use mdstream_core::{InboundMessage, ItemRequest, LoginRequest, MessageType, OutboundMessage, Subscription, Token};

use crate::state::{CloseReason, ReconnectMode, SessionState, SessionStatus};

/// Default delay before a lost connection is re-established
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Login and subscription parameters of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub app_id: String,
    pub position: String,
    pub subscriptions: Vec<Subscription>,
    pub reconnect_delay: Duration,
    pub reconnect_mode: ReconnectMode,
    /// Send `Ping` when the server advertises a `PingTimeout`
    pub client_ping: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            app_id: "256".to_string(),
            position: "127.0.0.1/net".to_string(),
            subscriptions: Vec::new(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            reconnect_mode: ReconnectMode::default(),
            client_ping: false,
        }
    }
}

/// Work the driver must perform
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Send(OutboundMessage),
    /// Forward a market data message to listeners
    Publish(InboundMessage),
    Close(CloseReason),
}

pub struct SessionCore {
    name: String,
    settings: SessionSettings,
    state: SessionState,
    token: Option<Arc<Token>>,
    /// Login written on the current connection
    login_sent: bool,
    disconnect_requested: bool,
    login_rejected: Option<String>,
    disconnects: u64,
    last_close: Option<CloseReason>,
    last_activity: Option<Instant>,
    /// Server heartbeat timeout, armed by the login refresh
    ping_timeout: Option<Duration>,
    ping_sent_at: Option<Instant>,
    reconnect_at: Option<Instant>,
}

impl SessionCore {
    pub fn new(name: impl Into<String>, settings: SessionSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            state: SessionState::Disconnected,
            token: None,
            login_sent: false,
            disconnect_requested: false,
            login_rejected: None,
            disconnects: 0,
            last_close: None,
            last_activity: None,
            ping_timeout: None,
            ping_sent_at: None,
            reconnect_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn token(&self) -> Option<&Arc<Token>> {
        self.token.as_ref()
    }

    pub fn token_generation(&self) -> Option<u64> {
        self.token.as_ref().map(|t| t.generation())
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            token_generation: self.token_generation(),
            disconnects: self.disconnects,
            last_close: self.last_close.clone(),
            last_activity: self.last_activity,
        }
    }

    /// Whether another connection may be opened
    pub fn can_connect(&self) -> bool {
        matches!(self.state, SessionState::Disconnected | SessionState::Reconnecting)
            && !self.disconnect_requested
            && self.login_rejected.is_none()
    }

    /// Start a connection attempt. Returns false when connecting is not allowed
    /// or no token is held.
    pub fn begin_connect(&mut self, now: Instant) -> bool {
        if !self.can_connect() || self.token.is_none() {
            return false;
        }
        self.state = SessionState::Connecting;
        self.login_sent = false;
        self.ping_timeout = None;
        self.ping_sent_at = None;
        self.reconnect_at = None;
        self.last_activity = Some(now);
        true
    }

    /// Transport is open: send the login once per connection
    pub fn on_open(&mut self, now: Instant) -> Vec<Action> {
        if self.state != SessionState::Connecting || self.login_sent {
            return Vec::new();
        }
        let Some(token) = self.token.as_ref() else {
            return vec![Action::Close(CloseReason::Transport("no token to log in with".to_string()))];
        };

        info!("[{}] Sending login request", self.name);
        self.login_sent = true;
        self.last_activity = Some(now);
        let login = LoginRequest::new(&self.settings.app_id, &self.settings.position, token.access(), false);
        vec![Action::Send(OutboundMessage::Login(login))]
    }

    pub fn on_message(&mut self, message: InboundMessage, now: Instant) -> Vec<Action> {
        if matches!(self.state, SessionState::Closed | SessionState::Disconnected | SessionState::Reconnecting)
            || self.login_rejected.is_some()
        {
            return Vec::new();
        }

        self.last_activity = Some(now);
        self.ping_sent_at = None;

        match message.kind {
            MessageType::Ping => vec![Action::Send(OutboundMessage::pong())],
            MessageType::Pong => Vec::new(),
            _ if message.is_login() => self.on_login_message(&message),
            MessageType::Error => {
                warn!("[{}] Gateway error: {}", self.name, message.raw);
                Vec::new()
            }
            _ => vec![Action::Publish(message)],
        }
    }

    fn on_login_message(&mut self, message: &InboundMessage) -> Vec<Action> {
        let Some(state) = message.state.as_ref() else {
            debug!("[{}] Login {:?} without state", self.name, message.kind);
            return Vec::new();
        };

        if !state.is_open_ok() {
            let text = state.text.clone().unwrap_or_else(|| format!("{}/{}", state.stream, state.data));
            warn!("[{}] Login rejected: {}", self.name, text);
            self.login_rejected = Some(text.clone());
            return vec![Action::Close(CloseReason::LoginRejected(text))];
        }

        if self.settings.client_ping {
            if let Some(timeout) = message.ping_timeout() {
                debug!("[{}] Client heartbeat armed ({:?})", self.name, timeout);
                self.ping_timeout = Some(timeout);
            }
        }

        if self.state != SessionState::Connecting {
            debug!("[{}] Re-login accepted", self.name);
            return Vec::new();
        }

        info!("[{}] Login accepted", self.name);
        self.state = SessionState::LoggedIn;

        if self.settings.subscriptions.is_empty() {
            return Vec::new();
        }

        self.state = SessionState::Subscribed;
        self.settings
            .subscriptions
            .iter()
            .map(|sub| {
                info!("[{}] Subscribing to {}", self.name, sub.names.join(","));
                Action::Send(OutboundMessage::Item(ItemRequest::from(sub)))
            })
            .collect()
    }

    /// Adopt a newer token. Logged-in sessions re-login on the same connection.
    pub fn push_token(&mut self, token: Arc<Token>) -> Vec<Action> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        if let Some(current) = self.token_generation() {
            if token.generation() <= current {
                debug!(
                    "[{}] Ignoring token generation {} (holding {})",
                    self.name,
                    token.generation(),
                    current
                );
                return Vec::new();
            }
        }

        self.token = Some(token);
        if !self.state.is_logged_in() {
            return Vec::new();
        }

        let Some(token) = self.token.as_ref() else {
            return Vec::new();
        };
        info!("[{}] Re-login with token generation {}", self.name, token.generation());
        let login = LoginRequest::new(&self.settings.app_id, &self.settings.position, token.access(), true);
        vec![Action::Send(OutboundMessage::Login(login))]
    }

    /// Disconnect was requested; the session will not reconnect
    pub fn request_disconnect(&mut self) -> Vec<Action> {
        self.disconnect_requested = true;
        match self.state {
            SessionState::Connecting | SessionState::LoggedIn | SessionState::Subscribed => {
                vec![Action::Close(CloseReason::Requested)]
            }
            SessionState::Disconnected | SessionState::Reconnecting => {
                self.state = SessionState::Closed;
                self.reconnect_at = None;
                self.last_close = Some(CloseReason::Requested);
                Vec::new()
            }
            SessionState::Closed => Vec::new(),
        }
    }

    /// The transport is gone. Returns the resulting state.
    pub fn on_closed(&mut self, reason: CloseReason, now: Instant) -> SessionState {
        if self.state == SessionState::Closed {
            return self.state;
        }

        let reason = match (&self.login_rejected, self.disconnect_requested) {
            (Some(text), _) => CloseReason::LoginRejected(text.clone()),
            (None, true) => CloseReason::Requested,
            (None, false) => reason,
        };

        if matches!(self.state, SessionState::Connecting | SessionState::LoggedIn | SessionState::Subscribed) {
            self.disconnects += 1;
        }
        self.login_sent = false;
        self.ping_timeout = None;
        self.ping_sent_at = None;

        if reason.is_recoverable() {
            self.state = SessionState::Reconnecting;
            self.reconnect_at = Some(now + self.settings.reconnect_delay);
            info!(
                "[{}] Connection lost ({}); reconnecting in {:?}",
                self.name, reason, self.settings.reconnect_delay
            );
        } else {
            self.state = SessionState::Closed;
            self.reconnect_at = None;
            info!("[{}] Session closed ({})", self.name, reason);
        }
        self.last_close = Some(reason);
        self.state
    }

    /// Instant at which `on_heartbeat` must run next, if the client heartbeat is armed
    pub fn heartbeat_deadline(&self) -> Option<Instant> {
        if !self.state.is_logged_in() {
            return None;
        }
        let timeout = self.ping_timeout?;
        match self.ping_sent_at {
            Some(sent) => Some(sent + timeout),
            None => Some(self.last_activity? + timeout / 3),
        }
    }

    pub fn on_heartbeat(&mut self, now: Instant) -> Vec<Action> {
        let Some(deadline) = self.heartbeat_deadline() else {
            return Vec::new();
        };
        if now < deadline {
            return Vec::new();
        }
        if self.ping_sent_at.is_some() {
            warn!("[{}] No response to ping", self.name);
            return vec![Action::Close(CloseReason::HeartbeatTimeout)];
        }
        debug!("[{}] Sending ping", self.name);
        self.ping_sent_at = Some(now);
        vec![Action::Send(OutboundMessage::ping())]
    }

    /// When the session may reconnect on its own, if it may
    pub fn autonomous_reconnect_at(&self, now: Instant) -> Option<Instant> {
        if self.settings.reconnect_mode != ReconnectMode::Autonomous
            || self.state != SessionState::Reconnecting
            || !self.can_connect()
        {
            return None;
        }
        let token = self.token.as_ref()?;
        if !token.is_fresh(now) {
            return None;
        }
        Some(self.reconnect_at.unwrap_or(now))
    }
}
