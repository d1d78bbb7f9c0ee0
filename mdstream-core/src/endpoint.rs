//! Streaming gateway endpoints

use serde::{Deserialize, Serialize};
use std::fmt;

/// How an endpoint is deployed behind discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Several locations behind one load balancer (redundant by itself)
    LoadBalanced,
    /// A single location, used in pairs for hot-standby
    Standby,
}

/// Host/port pair a streaming session connects to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub topology: Topology,
    /// Availability zones advertised for the endpoint
    pub locations: Vec<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, topology: Topology, locations: Vec<String>) -> Self {
        Self {
            host: host.into(),
            port,
            topology,
            locations,
        }
    }

    /// Endpoint supplied on the command line, bypassing discovery
    pub fn explicit(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, Topology::Standby, Vec::new())
    }

    /// First advertised location, e.g. "us-east-1a"
    pub fn region(&self) -> Option<&str> {
        self.locations.first().map(String::as_str)
    }

    /// Websocket URL of the gateway
    pub fn ws_url(&self, tls: bool) -> String {
        let scheme = if tls { "wss" } else { "ws" };
        format!("{}://{}:{}/WebSocket", scheme, self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
