//! Streaming gateway sessions
//!
//! A session owns one websocket at a time: it logs in with the access token,
//! subscribes, answers heartbeats, re-logs in when a renewed token arrives and
//! reconnects after the connection is lost.

mod machine;
mod session;
mod state;

pub use crate::machine::{Action, SessionCore, SessionSettings, DEFAULT_RECONNECT_DELAY};
pub use session::{
    update_channel, SessionCommand, SessionConfig, SessionControl, SessionError, SessionHandle, SessionUpdate,
    StreamSession, DEFAULT_CONNECT_TIMEOUT,
};
pub use state::{CloseReason, ReconnectMode, SessionState, SessionStatus};
