//! Command line and environment configuration

use std::net::ToSocketAddrs;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use mdstream_core::{AssertionKey, Credential, Endpoint, Grant, GrantKind, Subscription, DEFAULT_SCOPE};
use mdstream_platform::{ResolverConfig, TokenManagerConfig, AUTH_URL_V1, AUTH_URL_V2, DISCOVERY_URL};
use mdstream_services::OrchestratorConfig;
use mdstream_session::{ReconnectMode, SessionConfig, SessionSettings};

/// Audience of signed client assertions
pub const DEFAULT_AUDIENCE: &str = "https://login.ciam.refinitiv.com/as/token.oauth2";

/// Login position used when the local address cannot be determined
const FALLBACK_POSITION: &str = "127.0.0.1/net";

/// Stream id of the first item request
const ITEM_STREAM_ID: i64 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("No credential given; pass --password, --client-secret or --jwk-key-file")]
    NoGrant,

    #[error("Failed to read key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("--standby-hostname requires --hostname")]
    StandbyWithoutPrimary,
}

#[derive(Parser)]
#[command(author, version, about = "Streams real-time market data over an authenticated websocket session", long_about = None)]
pub struct Args {
    /// Application id sent in the login request
    #[arg(long, env = "MDSTREAM_APP_ID", default_value = "256")]
    pub app_id: String,

    /// Username for the password grant
    #[arg(long, env = "MDSTREAM_USER")]
    pub user: Option<String>,

    #[arg(long, env = "MDSTREAM_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long, env = "MDSTREAM_CLIENT_ID")]
    pub client_id: Option<String>,

    #[arg(long, env = "MDSTREAM_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// PEM private key used to sign client assertions
    #[arg(long, env = "MDSTREAM_JWK_KEY_FILE")]
    pub jwk_key_file: Option<PathBuf>,

    /// Key id placed in the assertion header
    #[arg(long, env = "MDSTREAM_KEY_ID")]
    pub key_id: Option<String>,

    #[arg(long, env = "MDSTREAM_ASSERTION_ALG", default_value = "RS256")]
    pub assertion_alg: String,

    #[arg(long, env = "MDSTREAM_AUDIENCE", default_value = DEFAULT_AUDIENCE)]
    pub audience: String,

    /// password, client-credentials or signed-assertion; inferred when omitted
    #[arg(long, env = "MDSTREAM_GRANT")]
    pub grant: Option<GrantKind>,

    /// Login position; `<ip>/<hostname>` when omitted
    #[arg(long, env = "MDSTREAM_POSITION")]
    pub position: Option<String>,

    #[arg(long, env = "MDSTREAM_AUTH_URL")]
    pub auth_url: Option<String>,

    #[arg(long, env = "MDSTREAM_DISCOVERY_URL", default_value = DISCOVERY_URL)]
    pub discovery_url: String,

    #[arg(long, env = "MDSTREAM_SCOPE", default_value = DEFAULT_SCOPE)]
    pub scope: String,

    #[arg(long, env = "MDSTREAM_REGION", default_value = "us-east-1")]
    pub region: String,

    #[arg(long, env = "MDSTREAM_SERVICE", default_value = "ELEKTRON_DD")]
    pub service: String,

    /// Instrument to subscribe to; repeat for a batch request
    #[arg(long, env = "MDSTREAM_RIC", value_delimiter = ',', default_value = "/TRI.N")]
    pub ric: Vec<String>,

    /// Comma separated fields to request
    #[arg(long, env = "MDSTREAM_VIEW", value_delimiter = ',')]
    pub view: Vec<String>,

    /// Request a one-off snapshot instead of a stream
    #[arg(long, env = "MDSTREAM_SNAPSHOT")]
    pub snapshot: bool,

    /// Gateway host; skips service discovery
    #[arg(long, env = "MDSTREAM_HOSTNAME")]
    pub hostname: Option<String>,

    #[arg(long, env = "MDSTREAM_PORT", default_value_t = 443)]
    pub port: u16,

    #[arg(long, env = "MDSTREAM_STANDBY_HOSTNAME")]
    pub standby_hostname: Option<String>,

    #[arg(long, env = "MDSTREAM_STANDBY_PORT", default_value_t = 443)]
    pub standby_port: u16,

    /// Run two sessions against two single-location endpoints
    #[arg(long, env = "MDSTREAM_HOTSTANDBY")]
    pub hotstandby: bool,

    /// Send pings when the gateway advertises a ping timeout
    #[arg(long, env = "MDSTREAM_CLIENT_PING")]
    pub client_ping: bool,

    /// Connect with ws:// instead of wss://
    #[arg(long, env = "MDSTREAM_NO_TLS")]
    pub no_tls: bool,

    /// Let sessions reconnect without waiting for the orchestrator
    #[arg(long, env = "MDSTREAM_AUTONOMOUS_RECONNECT")]
    pub autonomous_reconnect: bool,
}

/// Everything needed to start the orchestrator
#[derive(Debug)]
pub struct Plan {
    pub credential: Credential,
    pub token: TokenManagerConfig,
    pub resolver: ResolverConfig,
    pub session: SessionConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Args {
    pub fn grant_kind(&self) -> Result<GrantKind, ConfigError> {
        if let Some(kind) = self.grant {
            return Ok(kind);
        }
        if self.jwk_key_file.is_some() {
            Ok(GrantKind::SignedAssertion)
        } else if self.password.is_some() {
            Ok(GrantKind::Password)
        } else if self.client_secret.is_some() {
            Ok(GrantKind::ClientCredentials)
        } else {
            Err(ConfigError::NoGrant)
        }
    }

    pub fn credential(&self) -> Result<Credential, ConfigError> {
        let client_id = self.client_id.clone();

        let credential = match self.grant_kind()? {
            GrantKind::Password => {
                let user = self.user.clone().ok_or(ConfigError::MissingCredential("--user"))?;
                let password = self
                    .password
                    .clone()
                    .ok_or(ConfigError::MissingCredential("--password"))?;
                let client_id = client_id.ok_or(ConfigError::MissingCredential("--client-id"))?;
                let mut credential = Credential::password(user, password, client_id);
                if let Grant::Password { client_secret, .. } = &mut credential.grant {
                    *client_secret = self.client_secret.clone();
                }
                credential
            }
            GrantKind::ClientCredentials => {
                let client_id = client_id.ok_or(ConfigError::MissingCredential("--client-id"))?;
                let secret = self
                    .client_secret
                    .clone()
                    .ok_or(ConfigError::MissingCredential("--client-secret"))?;
                Credential::client_credentials(client_id, secret)
            }
            GrantKind::SignedAssertion => {
                let client_id = client_id.ok_or(ConfigError::MissingCredential("--client-id"))?;
                let path = self
                    .jwk_key_file
                    .clone()
                    .ok_or(ConfigError::MissingCredential("--jwk-key-file"))?;
                let key_id = self.key_id.clone().ok_or(ConfigError::MissingCredential("--key-id"))?;
                let private_key_pem =
                    std::fs::read_to_string(&path).map_err(|source| ConfigError::KeyFile { path, source })?;
                Credential::signed_assertion(
                    client_id,
                    AssertionKey {
                        audience: self.audience.clone(),
                        key_id,
                        algorithm: self.assertion_alg.clone(),
                        private_key_pem,
                    },
                )
            }
        };

        Ok(credential.with_scope(self.scope.clone()))
    }

    /// Token endpoint for the grant: password grants use v1, others v2
    pub fn auth_url(&self, kind: GrantKind) -> String {
        match (&self.auth_url, kind) {
            (Some(url), _) => url.clone(),
            (None, GrantKind::Password) => AUTH_URL_V1.to_string(),
            (None, _) => AUTH_URL_V2.to_string(),
        }
    }

    /// Endpoints given on the command line
    pub fn endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        let mut endpoints = Vec::new();
        match (&self.hostname, &self.standby_hostname) {
            (None, None) => {}
            (None, Some(_)) => return Err(ConfigError::StandbyWithoutPrimary),
            (Some(host), standby) => {
                endpoints.push(Endpoint::explicit(host.clone(), self.port));
                if let Some(standby) = standby {
                    endpoints.push(Endpoint::explicit(standby.clone(), self.standby_port));
                }
            }
        }
        Ok(endpoints)
    }

    pub fn subscription(&self) -> Subscription {
        let mut subscription = Subscription::batch(ITEM_STREAM_ID, self.ric.clone())
            .with_service(self.service.clone())
            .with_view(self.view.clone());
        if self.snapshot {
            subscription = subscription.snapshot();
        }
        subscription
    }

    pub fn plan(&self) -> Result<Plan, ConfigError> {
        let credential = self.credential()?;
        let endpoints = self.endpoints()?;

        let token = TokenManagerConfig {
            auth_url: self.auth_url(credential.grant_kind()),
            ..TokenManagerConfig::default()
        };
        let resolver = ResolverConfig {
            discovery_url: self.discovery_url.clone(),
            ..ResolverConfig::default()
        };
        let session = SessionConfig {
            settings: SessionSettings {
                app_id: self.app_id.clone(),
                position: self.position.clone().unwrap_or_else(local_position),
                subscriptions: vec![self.subscription()],
                reconnect_mode: if self.autonomous_reconnect {
                    ReconnectMode::Autonomous
                } else {
                    ReconnectMode::Orchestrated
                },
                client_ping: self.client_ping,
                ..SessionSettings::default()
            },
            tls: !self.no_tls,
            ..SessionConfig::default()
        };
        // Two configured hosts imply hot-standby
        let hotstandby = self.hotstandby || endpoints.len() > 1;
        let orchestrator = OrchestratorConfig {
            region: self.region.clone(),
            hotstandby,
            endpoints,
            ..OrchestratorConfig::default()
        };

        Ok(Plan {
            credential,
            token,
            resolver,
            session,
            orchestrator,
        })
    }
}

/// `<ip>/<hostname>` of this machine
fn local_position() -> String {
    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|h| !h.is_empty());

    let Some(hostname) = hostname else {
        return FALLBACK_POSITION.to_string();
    };

    match (hostname.as_str(), 0).to_socket_addrs() {
        Ok(mut addrs) => match addrs.find(|a| a.is_ipv4()) {
            Some(addr) => format!("{}/{}", addr.ip(), hostname),
            None => FALLBACK_POSITION.to_string(),
        },
        Err(_) => FALLBACK_POSITION.to_string(),
    }
}
