//! JSON message protocol spoken by the streaming gateway
//!
//! Every websocket frame carries an array of message objects. Outbound
//! messages are built from the types below; inbound messages are decoded
//! one by one so a malformed entry does not poison the rest of its frame.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::subscription::{Subscription, LOGIN_STREAM_ID};

/// Websocket sub-protocol negotiated with the gateway
pub const WS_SUBPROTOCOL: &str = "tr_json2";

/// Domain of the login stream
pub const LOGIN_DOMAIN: &str = "Login";

// ============================================================================
// Client -> Server Messages
// ============================================================================

/// Login request carrying the access token
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginRequest {
    #[serde(rename = "ID")]
    pub id: i64,
    pub domain: String,
    pub key: LoginKey,
    /// `Some(false)` on a re-login over an open connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginKey {
    pub name_type: String,
    pub elements: LoginElements,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginElements {
    pub application_id: String,
    pub position: String,
    pub authentication_token: String,
}

impl LoginRequest {
    pub fn new(app_id: &str, position: &str, access_token: &str, relogin: bool) -> Self {
        Self {
            id: LOGIN_STREAM_ID,
            domain: LOGIN_DOMAIN.to_string(),
            key: LoginKey {
                name_type: "AuthnToken".to_string(),
                elements: LoginElements {
                    application_id: app_id.to_string(),
                    position: position.to_string(),
                    authentication_token: access_token.to_string(),
                },
            },
            refresh: if relogin { Some(false) } else { None },
        }
    }
}

/// Item name: a single instrument or a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ItemName {
    Single(String),
    Batch(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemKey {
    pub name: ItemName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// Item (subscribe) request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemRequest {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub key: ItemKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<Vec<String>>,
    /// Omitted for streaming requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
}

impl From<&Subscription> for ItemRequest {
    fn from(sub: &Subscription) -> Self {
        let name = match sub.names.as_slice() {
            [single] => ItemName::Single(single.clone()),
            names => ItemName::Batch(names.to_vec()),
        };
        Self {
            id: sub.id,
            domain: sub.domain.clone(),
            key: ItemKey {
                name,
                service: sub.service.clone(),
            },
            view: sub.view.clone(),
            streaming: if sub.streaming { None } else { Some(false) },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeartbeatKind {
    Ping,
    Pong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Heartbeat {
    #[serde(rename = "Type")]
    pub kind: HeartbeatKind,
}

/// Any message sent to the gateway
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Login(LoginRequest),
    Item(ItemRequest),
    Heartbeat(Heartbeat),
}

impl OutboundMessage {
    pub fn ping() -> Self {
        OutboundMessage::Heartbeat(Heartbeat {
            kind: HeartbeatKind::Ping,
        })
    }

    pub fn pong() -> Self {
        OutboundMessage::Heartbeat(Heartbeat {
            kind: HeartbeatKind::Pong,
        })
    }

    pub fn is_login(&self) -> bool {
        matches!(self, OutboundMessage::Login(_))
    }

    pub fn is_pong(&self) -> bool {
        matches!(
            self,
            OutboundMessage::Heartbeat(Heartbeat {
                kind: HeartbeatKind::Pong
            })
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

/// Message `Type` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum MessageType {
    Refresh,
    Update,
    Status,
    Ping,
    Pong,
    Post,
    Ack,
    Error,
    #[serde(other)]
    Other,
}

/// `State` of a stream as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamState {
    pub stream: String,
    pub data: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl StreamState {
    pub fn is_open_ok(&self) -> bool {
        self.stream == "Open" && self.data == "Ok"
    }
}

/// Message received from the gateway
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundMessage {
    #[serde(rename = "ID", default)]
    pub id: Option<i64>,
    #[serde(rename = "Type")]
    pub kind: MessageType,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub state: Option<StreamState>,
    #[serde(default)]
    pub elements: Option<Value>,
    /// The message exactly as received
    #[serde(skip)]
    pub raw: Value,
}

impl InboundMessage {
    pub fn is_login(&self) -> bool {
        self.domain.as_deref() == Some(LOGIN_DOMAIN)
    }

    /// Server heartbeat timeout advertised in a login refresh
    pub fn ping_timeout(&self) -> Option<Duration> {
        let value = self.elements.as_ref()?.get("PingTimeout")?;
        let secs = match value {
            Value::Number(n) => n.as_u64()?,
            Value::String(s) => s.parse().ok()?,
            _ => return None,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

/// Decode a frame into its messages.
///
/// The outer error means the whole frame is unusable; inner errors belong to
/// individual messages and are reported without discarding the others.
pub fn decode_frame(text: &str) -> Result<Vec<Result<InboundMessage, ProtocolError>>, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => return Err(ProtocolError::UnexpectedShape),
    };

    Ok(items.into_iter().map(decode_message).collect())
}

fn decode_message(raw: Value) -> Result<InboundMessage, ProtocolError> {
    let mut message = InboundMessage::deserialize(&raw)
        .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;
    message.raw = raw;
    Ok(message)
}
