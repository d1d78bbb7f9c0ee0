//! Session lifecycle states

use std::fmt;

use tokio::time::Instant;

/// Connection state of a stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    LoggedIn,
    Subscribed,
    /// Connection lost; waiting to connect again
    Reconnecting,
    /// Terminal; the session task has stopped or is stopping
    Closed,
}

impl SessionState {
    /// Logged in over a live connection
    pub fn is_logged_in(&self) -> bool {
        matches!(self, SessionState::LoggedIn | SessionState::Subscribed)
    }

    /// Whether a token pushed now is still useful to the session
    pub fn accepts_tokens(&self) -> bool {
        *self != SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::LoggedIn => "logged-in",
            SessionState::Subscribed => "subscribed",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Who drives reconnects after a connection is lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectMode {
    /// Wait for a `Connect` command from the orchestrator
    #[default]
    Orchestrated,
    /// Reconnect after the delay with the stored token while it is fresh
    Autonomous,
}

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Disconnect or shutdown was requested
    Requested,
    /// The gateway refused the login
    LoginRejected(String),
    /// Connect, read or write failure, or the server closed the socket
    Transport(String),
    /// No message arrived within the advertised ping timeout
    HeartbeatTimeout,
}

impl CloseReason {
    /// Reconnecting after this reason is allowed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CloseReason::Transport(_) | CloseReason::HeartbeatTimeout)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => write!(f, "disconnect requested"),
            CloseReason::LoginRejected(text) => write!(f, "login rejected: {}", text),
            CloseReason::Transport(e) => write!(f, "transport error: {}", e),
            CloseReason::HeartbeatTimeout => write!(f, "heartbeat timeout"),
        }
    }
}

/// Snapshot published by a session task on every state change
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Generation of the token the session currently holds
    pub token_generation: Option<u64>,
    /// Number of connections lost so far
    pub disconnects: u64,
    pub last_close: Option<CloseReason>,
    pub last_activity: Option<Instant>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            token_generation: None,
            disconnects: 0,
            last_close: None,
            last_activity: None,
        }
    }
}

impl SessionStatus {
    /// Closed because of something other than a requested disconnect
    pub fn has_failed(&self) -> bool {
        self.state == SessionState::Closed
            && !matches!(self.last_close, None | Some(CloseReason::Requested))
    }
}
