//! Core types for mdstream
//!
//! This crate defines the data model shared across the workspace:
//! credentials, tokens, endpoints, subscriptions, the gateway message
//! protocol and the error taxonomy.

pub mod credential;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod source;
pub mod subscription;
pub mod token;

pub use credential::{AssertionKey, Credential, Grant, GrantKind};
pub use endpoint::{Endpoint, Topology};
pub use error::{
    AuthError, AuthResult, DiscoveryError, DiscoveryResult, ProtocolError, TransportError,
};
pub use protocol::{
    decode_frame, InboundMessage, ItemRequest, LoginRequest, MessageType, OutboundMessage, StreamState,
    WS_SUBPROTOCOL,
};
pub use source::{EndpointSource, TokenSource};
pub use subscription::Subscription;
pub use token::{RefreshPolicy, Token};

/// OAuth scope granting streaming pricing access
pub const DEFAULT_SCOPE: &str = "trapi.streaming.pricing.read";
