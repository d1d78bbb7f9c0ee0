//! Error types shared across the workspace

use thiserror::Error;

/// Failure obtaining or refreshing an access token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Token endpoint transport error: {0}")]
    Transport(String),

    #[error("Credential rejected by token endpoint ({status}): {body}")]
    InvalidCredential { status: u16, body: String },

    #[error("Token endpoint refused the request ({status})")]
    Forbidden { status: u16 },

    #[error("Token request failed after {attempts} attempts (last status {last_status})")]
    Exhausted { attempts: u32, last_status: u16 },

    #[error("Token request exceeded {0} redirects")]
    TooManyRedirects(u32),

    #[error("Failed to parse token response: {0}")]
    Parse(String),

    #[error("Failed to build client assertion: {0}")]
    Assertion(String),
}

impl AuthError {
    pub fn transport(msg: impl Into<String>) -> Self {
        AuthError::Transport(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        AuthError::Parse(msg.into())
    }

    /// Terminal errors are never retried; they stop the whole process
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredential { .. }
                | AuthError::Forbidden { .. }
                | AuthError::TooManyRedirects(_)
                | AuthError::Assertion(_)
        )
    }
}

/// Failure querying service discovery
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Discovery transport error: {0}")]
    Transport(String),

    #[error("Discovery refused the request ({status})")]
    Forbidden { status: u16 },

    #[error("Expected {required} endpoint(s) in region {region} but found {found}")]
    InsufficientEndpoints {
        required: usize,
        found: usize,
        region: String,
    },

    #[error("Discovery request failed after {attempts} attempts (last status {last_status})")]
    Exhausted { attempts: u32, last_status: u16 },

    #[error("Discovery request exceeded {0} redirects")]
    TooManyRedirects(u32),

    #[error("Failed to parse discovery response: {0}")]
    Parse(String),
}

impl DiscoveryError {
    pub fn transport(msg: impl Into<String>) -> Self {
        DiscoveryError::Transport(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        DiscoveryError::Parse(msg.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DiscoveryError::Forbidden { .. }
                | DiscoveryError::InsufficientEndpoints { .. }
                | DiscoveryError::TooManyRedirects(_)
        )
    }
}

/// Websocket connect/read/write failure. Always recoverable by reconnecting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Transport error: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        TransportError(msg.into())
    }
}

/// Malformed or unexpected message from the streaming gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Frame is neither a message nor an array of messages")]
    UnexpectedShape,

    #[error("Message could not be decoded: {0}")]
    InvalidMessage(String),
}

/// Result type alias for token operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Result type alias for discovery operations
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
