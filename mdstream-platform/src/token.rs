//! Token manager for the OAuth token endpoint
//!
//! Performs the initial credential grant, renews tokens (refresh-token grant
//! where the credential supports it) and decides when renewal is due.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use mdstream_core::{
    AuthError, AuthResult, Credential, Grant, RefreshPolicy, Token, TokenSource,
};

use crate::assertion::{sign_client_assertion, CLIENT_ASSERTION_TYPE};
use crate::http::{self, build_client, Outcome, RetryPolicy};

/// Token endpoint used by password grants
pub const AUTH_URL_V1: &str = "https://api.refinitiv.com/auth/oauth2/v1/token";

/// Token endpoint used by client-credential and assertion grants
pub const AUTH_URL_V2: &str = "https://api.refinitiv.com/auth/oauth2/v2/token";

/// Statuses after which the token request is not retried
const TERMINAL_STATUSES: &[u16] = &[400, 401, 403, 451];

/// Configuration for TokenManager
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    pub auth_url: String,
    pub refresh_policy: RefreshPolicy,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            auth_url: AUTH_URL_V1.to_string(),
            refresh_policy: RefreshPolicy::default(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(deserialize_with = "deserialize_seconds")]
    expires_in: u64,
}

/// `expires_in` arrives either as a number or as a numeric string
fn deserialize_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Owns the credential and issues tokens from it
pub struct TokenManager {
    client: Client,
    auth_url: Url,
    config: TokenManagerConfig,
    credential: Credential,
    /// Generation of the most recently issued token
    generation: u64,
    /// TTL granted by the last full credential grant
    baseline_ttl: Option<Duration>,
}

impl TokenManager {
    pub fn new(config: TokenManagerConfig, credential: Credential) -> AuthResult<Self> {
        let auth_url = Url::parse(&config.auth_url)
            .map_err(|e| AuthError::transport(format!("Invalid token endpoint {}: {}", config.auth_url, e)))?;
        let client = build_client(config.request_timeout)
            .map_err(|e| AuthError::transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            auth_url,
            config,
            credential,
            generation: 0,
            baseline_ttl: None,
        })
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Replace the credential wholesale; the next grant uses the new one
    pub fn rotate_credential(&mut self, credential: Credential) {
        info!("[Auth] Credential rotated for {}", credential.principal());
        self.credential = credential;
        self.baseline_ttl = None;
    }

    /// Perform the initial grant with `credential`, which becomes the owned credential
    pub async fn authenticate_with(&mut self, credential: Credential) -> AuthResult<Arc<Token>> {
        self.rotate_credential(credential);
        self.grant().await
    }

    /// Renew `token`.
    ///
    /// Password credentials use the refresh token; a rejected refresh token
    /// falls back to a full grant. Other grant kinds simply grant again.
    #[instrument(skip(self, token), fields(generation = token.generation()))]
    pub async fn refresh_token(&mut self, token: &Token) -> AuthResult<Arc<Token>> {
        let refresh_token = match token.refresh_token() {
            Some(refresh) if matches!(self.credential.grant, Grant::Password { .. }) => refresh.to_string(),
            _ => return self.grant().await,
        };

        info!(
            "[Auth] Sending refresh token request for {} to {}",
            self.credential.principal(),
            self.auth_url
        );

        let form = self.refresh_form(&refresh_token);
        match self.request(form).await {
            Ok(response) => {
                let ttl = Duration::from_secs(response.expires_in);
                if let Some(baseline) = self.baseline_ttl {
                    if baseline != ttl {
                        warn!(
                            "[Auth] Token lifetime changed from {:?} to {:?}; re-authenticating with credential",
                            baseline, ttl
                        );
                        return self.grant().await;
                    }
                }
                Ok(self.issue(response, Some(refresh_token)))
            }
            Err(AuthError::InvalidCredential { status, .. }) => {
                warn!(
                    "[Auth] Refresh token rejected ({}); retrying with credential",
                    status
                );
                self.grant().await
            }
            Err(e) => Err(e),
        }
    }

    pub fn time_until_refresh_due(&self, token: &Token, now: Instant) -> Duration {
        self.config.refresh_policy.time_until_refresh_due(token, now)
    }

    /// Full grant with the owned credential
    #[instrument(skip(self), fields(grant = %self.credential.grant_kind()))]
    async fn grant(&mut self) -> AuthResult<Arc<Token>> {
        info!(
            "[Auth] Sending {} authentication request for {} to {}",
            self.credential.grant_kind(),
            self.credential.principal(),
            self.auth_url
        );
        let form = self.grant_form()?;
        let response = self.request(form).await?;
        self.baseline_ttl = Some(Duration::from_secs(response.expires_in));
        Ok(self.issue(response, None))
    }

    fn issue(&mut self, response: TokenResponse, previous_refresh: Option<String>) -> Arc<Token> {
        self.generation += 1;
        let ttl = Duration::from_secs(response.expires_in);
        let token = Token::new(
            response.access_token,
            response.refresh_token.or(previous_refresh),
            Instant::now(),
            ttl,
            self.generation,
        );
        info!(
            "[Auth] Authentication succeeded (generation {}, expires in {:?})",
            self.generation, ttl
        );
        Arc::new(token)
    }

    fn grant_form(&self) -> AuthResult<Vec<(&'static str, String)>> {
        let credential = &self.credential;
        let mut form = vec![
            ("client_id", credential.client_id.clone()),
            ("scope", credential.scope.clone()),
        ];

        match &credential.grant {
            Grant::Password {
                username,
                password,
                client_secret,
                take_exclusive_sign_on,
            } => {
                form.push(("grant_type", "password".to_string()));
                form.push(("username", username.clone()));
                form.push(("password", password.clone()));
                form.push(("takeExclusiveSignOnControl", take_exclusive_sign_on.to_string()));
                if let Some(secret) = client_secret.as_ref().filter(|s| !s.is_empty()) {
                    form.push(("client_secret", secret.clone()));
                }
            }
            Grant::ClientCredentials { client_secret } => {
                form.push(("grant_type", "client_credentials".to_string()));
                form.push(("client_secret", client_secret.clone()));
            }
            Grant::SignedAssertion(key) => {
                let assertion =
                    sign_client_assertion(&credential.client_id, key, chrono::Utc::now().timestamp())?;
                form.push(("grant_type", "client_credentials".to_string()));
                form.push(("client_assertion_type", CLIENT_ASSERTION_TYPE.to_string()));
                form.push(("client_assertion", assertion));
            }
        }

        Ok(form)
    }

    fn refresh_form(&self, refresh_token: &str) -> Vec<(&'static str, String)> {
        let credential = &self.credential;
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("client_id", credential.client_id.clone()),
            ("username", credential.principal().to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        if let Grant::Password {
            client_secret: Some(secret),
            ..
        } = &credential.grant
        {
            if !secret.is_empty() {
                form.push(("client_secret", secret.clone()));
            }
        }
        form
    }

    /// Basic auth is sent alongside password grants that carry a client secret
    fn basic_auth(&self) -> Option<(String, String)> {
        match &self.credential.grant {
            Grant::Password {
                client_secret: Some(secret),
                ..
            } if !secret.is_empty() => Some((self.credential.client_id.clone(), secret.clone())),
            _ => None,
        }
    }

    async fn request(&self, form: Vec<(&'static str, String)>) -> AuthResult<TokenResponse> {
        let basic = self.basic_auth();
        let outcome = http::execute("Auth", &self.config.retry, &self.auth_url, TERMINAL_STATUSES, |url| {
            let request = self
                .client
                .post(url)
                .header(ACCEPT, "application/json")
                .form(&form);
            match &basic {
                Some((user, secret)) => request.basic_auth(user, Some(secret)),
                None => request,
            }
        })
        .await?;

        match outcome {
            Outcome::Success(response) => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| AuthError::transport(format!("Failed to read token response: {}", e)))?;
                debug!("[Auth] Token response received ({} bytes)", body.len());
                serde_json::from_str(&body)
                    .map_err(|e| AuthError::parse(format!("Failed to parse token response: {}", e)))
            }
            Outcome::Rejected { status, body } => match status {
                400 | 401 => Err(AuthError::InvalidCredential { status, body }),
                _ => Err(AuthError::Forbidden { status }),
            },
        }
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("auth_url", &self.auth_url.as_str())
            .field("credential", &self.credential)
            .field("generation", &self.generation)
            .finish()
    }
}

#[async_trait]
impl TokenSource for TokenManager {
    async fn authenticate(&mut self) -> AuthResult<Arc<Token>> {
        self.grant().await
    }

    async fn refresh(&mut self, token: &Token) -> AuthResult<Arc<Token>> {
        self.refresh_token(token).await
    }

    fn time_until_refresh_due(&self, token: &Token, now: Instant) -> Duration {
        TokenManager::time_until_refresh_due(self, token, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn config(server: &MockServer) -> TokenManagerConfig {
        TokenManagerConfig {
            auth_url: server.url("/auth/oauth2/v1/token"),
            retry: RetryPolicy {
                max_attempts: 2,
                backoff: Duration::from_millis(10),
                max_redirects: 3,
            },
            ..TokenManagerConfig::default()
        }
    }

    async fn mock_grant<'a>(
        server: &'a MockServer,
        grant_type: &str,
        status: u16,
        body: serde_json::Value,
    ) -> httpmock::Mock<'a> {
        let grant_type = grant_type.to_string();
        server
            .mock_async(move |when, then| {
                when.method(POST)
                    .path("/auth/oauth2/v1/token")
                    .x_www_form_urlencoded_tuple("grant_type", &grant_type);
                then.status(status).json_body(body);
            })
            .await
    }

    #[tokio::test]
    async fn test_password_grant() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/auth/oauth2/v1/token")
                    .header("accept", "application/json")
                    .x_www_form_urlencoded_tuple("grant_type", "password")
                    .x_www_form_urlencoded_tuple("username", "u")
                    .x_www_form_urlencoded_tuple("password", "p")
                    .x_www_form_urlencoded_tuple("takeExclusiveSignOnControl", "true")
                    .x_www_form_urlencoded_tuple("scope", "trapi.streaming.pricing.read");
                then.status(200).json_body(json!({
                    "access_token": "access-1",
                    "refresh_token": "refresh-1",
                    "expires_in": "600"
                }));
            })
            .await;

        let mut manager = TokenManager::new(config(&server), Credential::password("u", "p", "client")).unwrap();
        let token = manager.authenticate().await.unwrap();

        mock.assert_hits_async(1).await;
        assert_eq!(token.access(), "access-1");
        assert_eq!(token.refresh_token(), Some("refresh-1"));
        assert_eq!(token.ttl(), Duration::from_secs(600));
        assert_eq!(token.generation(), 1);
    }

    #[tokio::test]
    async fn test_refresh_uses_refresh_token_and_bumps_generation() {
        let server = MockServer::start_async().await;
        mock_grant(&server, "password", 200, json!({
            "access_token": "access-1", "refresh_token": "refresh-1", "expires_in": 600
        }))
        .await;
        let refresh = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/auth/oauth2/v1/token")
                    .x_www_form_urlencoded_tuple("grant_type", "refresh_token")
                    .x_www_form_urlencoded_tuple("refresh_token", "refresh-1");
                then.status(200).json_body(json!({
                    "access_token": "access-2", "refresh_token": "refresh-2", "expires_in": 600
                }));
            })
            .await;

        let mut manager = TokenManager::new(config(&server), Credential::password("u", "p", "client")).unwrap();
        let first = manager.authenticate().await.unwrap();
        let second = manager.refresh(&first).await.unwrap();

        refresh.assert_hits_async(1).await;
        assert_eq!(second.access(), "access-2");
        assert!(second.generation() > first.generation());
    }

    #[tokio::test]
    async fn test_rejected_refresh_token_falls_back_to_password() {
        let server = MockServer::start_async().await;
        let password = mock_grant(&server, "password", 200, json!({
            "access_token": "access", "refresh_token": "refresh", "expires_in": 600
        }))
        .await;
        let refresh = mock_grant(&server, "refresh_token", 400, json!({"error": "invalid_grant"})).await;

        let mut manager = TokenManager::new(config(&server), Credential::password("u", "p", "client")).unwrap();
        let first = manager.authenticate().await.unwrap();
        let second = manager.refresh(&first).await.unwrap();

        refresh.assert_hits_async(1).await;
        password.assert_hits_async(2).await;
        assert_eq!(second.generation(), 2);
    }

    #[tokio::test]
    async fn test_rejected_credential_is_terminal() {
        let server = MockServer::start_async().await;
        let mock = mock_grant(&server, "password", 401, json!({"error": "invalid_client"})).await;

        let mut manager = TokenManager::new(config(&server), Credential::password("u", "bad", "client")).unwrap();
        let err = manager.authenticate().await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredential { status: 401, .. }));
        assert!(err.is_terminal());
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_forbidden_is_terminal() {
        let server = MockServer::start_async().await;
        let mock = mock_grant(&server, "client_credentials", 403, json!({})).await;

        let mut manager =
            TokenManager::new(config(&server), Credential::client_credentials("client", "secret")).unwrap();
        let err = manager.authenticate().await.unwrap_err();

        assert_eq!(err, AuthError::Forbidden { status: 403 });
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_retries() {
        let server = MockServer::start_async().await;
        let mock = mock_grant(&server, "password", 500, json!({})).await;

        let mut manager = TokenManager::new(config(&server), Credential::password("u", "p", "client")).unwrap();
        let err = manager.authenticate().await.unwrap_err();

        assert_eq!(err, AuthError::Exhausted { attempts: 2, last_status: 500 });
        assert!(!err.is_terminal());
        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_redirect_is_followed() {
        let server = MockServer::start_async().await;
        let target = server.url("/auth/oauth2/v1/token");
        server
            .mock_async(move |when, then| {
                when.method(POST).path("/legacy/token");
                then.status(307).header("Location", &target);
            })
            .await;
        let mock = mock_grant(&server, "client_credentials", 200, json!({
            "access_token": "a", "expires_in": 300
        }))
        .await;

        let mut config = config(&server);
        config.auth_url = server.url("/legacy/token");
        let mut manager = TokenManager::new(config, Credential::client_credentials("client", "secret")).unwrap();
        let token = manager.authenticate().await.unwrap();

        mock.assert_hits_async(1).await;
        assert_eq!(token.refresh_token(), None);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_grants_again() {
        let server = MockServer::start_async().await;
        let mock = mock_grant(&server, "client_credentials", 200, json!({
            "access_token": "a", "expires_in": 300
        }))
        .await;

        let mut manager =
            TokenManager::new(config(&server), Credential::client_credentials("client", "secret")).unwrap();
        let first = manager.authenticate().await.unwrap();
        let second = manager.refresh(&first).await.unwrap();

        mock.assert_hits_async(2).await;
        assert_eq!(second.generation(), 2);
    }

    #[tokio::test]
    async fn test_lifetime_change_triggers_password_grant() {
        let server = MockServer::start_async().await;
        let password = mock_grant(&server, "password", 200, json!({
            "access_token": "a", "refresh_token": "r", "expires_in": "600"
        }))
        .await;
        mock_grant(&server, "refresh_token", 200, json!({
            "access_token": "b", "refresh_token": "r2", "expires_in": "300"
        }))
        .await;

        let mut manager = TokenManager::new(config(&server), Credential::password("u", "p", "client")).unwrap();
        let first = manager.authenticate().await.unwrap();
        let second = manager.refresh(&first).await.unwrap();

        password.assert_hits_async(2).await;
        assert_eq!(second.access(), "a");
        assert_eq!(second.ttl(), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_signed_assertion_grant() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/auth/oauth2/v1/token")
                    .x_www_form_urlencoded_tuple("grant_type", "client_credentials")
                    .x_www_form_urlencoded_tuple("client_assertion_type", CLIENT_ASSERTION_TYPE)
                    .x_www_form_urlencoded_key_exists("client_assertion");
                then.status(200).json_body(json!({"access_token": "a", "expires_in": 600}));
            })
            .await;

        let credential = Credential::signed_assertion("client", crate::assertion::tests::ec_key());
        let mut manager = TokenManager::new(config(&server), credential).unwrap();
        manager.authenticate().await.unwrap();

        mock.assert_hits_async(1).await;
    }

    #[test]
    fn test_expires_in_accepts_number_or_string() {
        let numeric: TokenResponse =
            serde_json::from_value(json!({"access_token": "a", "expires_in": 300})).unwrap();
        let text: TokenResponse =
            serde_json::from_value(json!({"access_token": "a", "expires_in": "300"})).unwrap();
        assert_eq!(numeric.expires_in, 300);
        assert_eq!(text.expires_in, 300);
        assert!(serde_json::from_value::<TokenResponse>(json!({"access_token": "a", "expires_in": "soon"})).is_err());
    }
}
