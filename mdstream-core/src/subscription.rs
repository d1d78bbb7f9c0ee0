//! Item subscriptions issued after a successful login

use serde::{Deserialize, Serialize};

/// Stream id used by the login request; item requests must not reuse it
pub const LOGIN_STREAM_ID: i64 = 1;

/// Item request issued on every fresh login.
///
/// No sequence state is carried across reconnects: after a new connection
/// logs in, the same request is sent again (at-least-once resubscribe).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Request stream id
    pub id: i64,
    /// Instrument identifiers; more than one makes a batch request
    pub names: Vec<String>,
    /// Service name, e.g. "ELEKTRON_DD"
    pub service: Option<String>,
    /// Restrict the response to these fields
    pub view: Option<Vec<String>>,
    /// `false` requests a one-off snapshot
    pub streaming: bool,
    /// Message domain; market price when absent
    pub domain: Option<String>,
}

impl Subscription {
    pub fn market_price(id: i64, name: impl Into<String>) -> Self {
        Self::batch(id, vec![name.into()])
    }

    pub fn batch(id: i64, names: Vec<String>) -> Self {
        Self {
            id,
            names,
            service: None,
            view: None,
            streaming: true,
            domain: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_view(mut self, fields: Vec<String>) -> Self {
        self.view = if fields.is_empty() { None } else { Some(fields) };
        self
    }

    pub fn snapshot(mut self) -> Self {
        self.streaming = false;
        self
    }

    pub fn is_batch(&self) -> bool {
        self.names.len() > 1
    }
}
