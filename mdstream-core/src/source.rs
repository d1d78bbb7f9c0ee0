//! Seams between the orchestrator and its HTTP collaborators

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::endpoint::Endpoint;
use crate::error::{AuthResult, DiscoveryResult};
use crate::token::Token;

/// Issues and renews access tokens
#[async_trait]
pub trait TokenSource: Send {
    /// Full credential grant
    async fn authenticate(&mut self) -> AuthResult<Arc<Token>>;

    /// Renew `token`, using its refresh token when the grant supports one
    async fn refresh(&mut self, token: &Token) -> AuthResult<Arc<Token>>;

    /// Time left before `token` should be renewed; zero when due
    fn time_until_refresh_due(&self, token: &Token, now: Instant) -> Duration;
}

/// Produces the ordered endpoint list sessions connect to
#[async_trait]
pub trait EndpointSource: Send + Sync {
    async fn resolve(
        &self,
        token: &Token,
        region: &str,
        hotstandby: bool,
    ) -> DiscoveryResult<Vec<Endpoint>>;
}
