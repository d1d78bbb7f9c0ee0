//! HTTP status handling shared by the token and discovery clients
//!
//! Both endpoints follow the same policy: redirects are followed (bounded)
//! and a caller-chosen set of statuses is terminal. Transport failures and
//! any other non-2xx status are retried after a fixed backoff, sharing one
//! bounded attempt budget.

use std::time::Duration;

use reqwest::{header::LOCATION, Client, RequestBuilder, Response, StatusCode};
use tracing::{info, warn};
use url::Url;

use mdstream_core::{AuthError, DiscoveryError};

/// Bounded retry and redirect policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for transport failures and retryable statuses, including the first
    pub max_attempts: u32,
    /// Fixed delay between retryable attempts
    pub backoff: Duration,
    /// Redirect hops followed per call
    pub max_redirects: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            max_redirects: 5,
        }
    }
}

/// Build an HTTP client that leaves redirects to [`execute`]
pub(crate) fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

pub(crate) fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Resolve the `Location` header of a redirect against the current URL
pub(crate) fn redirect_target(current: &Url, response: &Response) -> Option<Url> {
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}

/// Final outcome of a request that made it past the retry policy
#[derive(Debug)]
pub(crate) enum Outcome {
    Success(Response),
    /// A status the caller marked as terminal
    Rejected { status: u16, body: String },
}

#[derive(Debug)]
pub(crate) enum PolicyError {
    Transport(String),
    MissingLocation(u16),
    TooManyRedirects(u32),
    Exhausted { attempts: u32, last_status: u16 },
}

/// Send a request under the retry policy.
///
/// `build` is called for every attempt with the URL to use, which changes
/// when a redirect is followed.
pub(crate) async fn execute<F>(
    label: &str,
    policy: &RetryPolicy,
    url: &Url,
    terminal: &[u16],
    build: F,
) -> Result<Outcome, PolicyError>
where
    F: Fn(Url) -> RequestBuilder,
{
    let mut url = url.clone();
    let mut redirects = 0u32;
    let mut failures = 0u32;

    loop {
        let response = match build(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                let message = format!("{} request to {} failed: {}", label, url, e);
                failures += 1;
                if failures >= policy.max_attempts {
                    return Err(PolicyError::Transport(message));
                }
                warn!(
                    "[{}] {}; retrying in {:?} (attempt {}/{})",
                    label, message, policy.backoff, failures + 1, policy.max_attempts
                );
                tokio::time::sleep(policy.backoff).await;
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(Outcome::Success(response));
        }

        if is_redirect(status) {
            let target = redirect_target(&url, &response)
                .ok_or(PolicyError::MissingLocation(status.as_u16()))?;
            redirects += 1;
            if redirects > policy.max_redirects {
                return Err(PolicyError::TooManyRedirects(policy.max_redirects));
            }
            info!("[{}] HTTP {}; following redirect to {}", label, status, target);
            url = target;
            continue;
        }

        let code = status.as_u16();
        if terminal.contains(&code) {
            let body = response.text().await.unwrap_or_default();
            warn!("[{}] HTTP {}; not retrying", label, status);
            return Ok(Outcome::Rejected { status: code, body });
        }

        failures += 1;
        if failures >= policy.max_attempts {
            return Err(PolicyError::Exhausted {
                attempts: failures,
                last_status: code,
            });
        }
        warn!(
            "[{}] HTTP {}; retrying in {:?} (attempt {}/{})",
            label, status, policy.backoff, failures + 1, policy.max_attempts
        );
        tokio::time::sleep(policy.backoff).await;
    }
}

impl From<PolicyError> for AuthError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::Transport(msg) => AuthError::Transport(msg),
            PolicyError::MissingLocation(status) => {
                AuthError::parse(format!("redirect ({}) without Location header", status))
            }
            PolicyError::TooManyRedirects(max) => AuthError::TooManyRedirects(max),
            PolicyError::Exhausted {
                attempts,
                last_status,
            } => AuthError::Exhausted {
                attempts,
                last_status,
            },
        }
    }
}

impl From<PolicyError> for DiscoveryError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::Transport(msg) => DiscoveryError::Transport(msg),
            PolicyError::MissingLocation(status) => {
                DiscoveryError::parse(format!("redirect ({}) without Location header", status))
            }
            PolicyError::TooManyRedirects(max) => DiscoveryError::TooManyRedirects(max),
            PolicyError::Exhausted {
                attempts,
                last_status,
            } => DiscoveryError::Exhausted {
                attempts,
                last_status,
            },
        }
    }
}
