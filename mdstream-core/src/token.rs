//! Access tokens and the proactive refresh policy

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Access token issued by the token endpoint.
///
/// Shared between the orchestrator and sessions as `Arc<Token>`, so a reader
/// observes either the previous token or the new one, never a mix.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    access: String,
    refresh: Option<String>,
    issued_at: Instant,
    ttl: Duration,
    generation: u64,
}

impl Token {
    pub fn new(
        access: impl Into<String>,
        refresh: Option<String>,
        issued_at: Instant,
        ttl: Duration,
        generation: u64,
    ) -> Self {
        Self {
            access: access.into(),
            refresh,
            issued_at,
            ttl,
            generation,
        }
    }

    pub fn access(&self) -> &str {
        &self.access
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh.as_deref()
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Monotonic sequence number assigned by the issuing token manager
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn expires_at(&self) -> Instant {
        self.issued_at + self.ttl
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access", &"[REDACTED]")
            .field("refresh", &self.refresh.as_ref().map(|_| "[REDACTED]"))
            .field("ttl", &self.ttl)
            .field("generation", &self.generation)
            .finish()
    }
}

/// When to renew a token ahead of its expiry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    /// Minimum margin before expiry
    pub floor: Duration,
    /// Margin as a fraction of the token TTL
    pub fraction: f64,
    /// Never use more than half the TTL as margin, even below `floor`
    pub cap_at_half_ttl: bool,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(30),
            fraction: 0.10,
            cap_at_half_ttl: false,
        }
    }
}

impl RefreshPolicy {
    /// Larger of the floor and the TTL fraction.
    ///
    /// With `cap_at_half_ttl` the result is limited to `ttl / 2`, which takes
    /// precedence over `floor` for short-lived tokens.
    pub fn safety_margin(&self, ttl: Duration) -> Duration {
        let fractional = ttl.mul_f64(self.fraction.clamp(0.0, 1.0));
        let margin = self.floor.max(fractional);
        if self.cap_at_half_ttl {
            margin.min(ttl / 2)
        } else {
            margin
        }
    }

    /// Instant at which the token should be renewed
    pub fn refresh_due_at(&self, token: &Token) -> Instant {
        let margin = self.safety_margin(token.ttl());
        token
            .expires_at()
            .checked_sub(margin)
            .unwrap_or_else(|| token.issued_at())
    }

    /// `max(0, expires_at - now - safety_margin)`
    pub fn time_until_refresh_due(&self, token: &Token, now: Instant) -> Duration {
        self.refresh_due_at(token).saturating_duration_since(now)
    }
}
