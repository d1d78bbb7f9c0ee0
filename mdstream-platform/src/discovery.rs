//! Service discovery for streaming gateway endpoints

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use mdstream_core::{DiscoveryError, DiscoveryResult, Endpoint, EndpointSource, Token, Topology};

use crate::http::{self, build_client, Outcome, RetryPolicy};

pub const DISCOVERY_URL: &str = "https://api.refinitiv.com/streaming/pricing/v1/";

const TERMINAL_STATUSES: &[u16] = &[403, 404, 410, 451];

/// Configuration for EndpointResolver
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub discovery_url: String,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            discovery_url: DISCOVERY_URL.to_string(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// One advertised service
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceEntry {
    pub endpoint: String,
    pub port: u16,
    #[serde(default)]
    pub location: Vec<String>,
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

impl ServiceEntry {
    fn in_region(&self, region: &str) -> bool {
        self.location
            .first()
            .map(|location| location.starts_with(region))
            .unwrap_or(false)
    }

    fn to_endpoint(&self) -> Endpoint {
        let topology = if self.location.len() >= 2 {
            Topology::LoadBalanced
        } else {
            Topology::Standby
        };
        Endpoint::new(self.endpoint.clone(), self.port, topology, self.location.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryResponse {
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
}

/// Pick endpoints for `region` from the discovery results.
///
/// Without hot-standby one endpoint is returned, preferring a load-balanced
/// service and falling back to a single-location one. With hot-standby every
/// distinct single-location service is returned in discovery order, and at
/// least two are required. Entries repeating a host and port are skipped.
pub fn select_endpoints(
    services: &[ServiceEntry],
    region: &str,
    hotstandby: bool,
) -> DiscoveryResult<Vec<Endpoint>> {
    let candidates: Vec<&ServiceEntry> = services.iter().filter(|s| s.in_region(region)).collect();

    if hotstandby {
        let mut standby: Vec<Endpoint> = Vec::new();
        for service in candidates.iter().filter(|s| s.location.len() == 1) {
            let endpoint = service.to_endpoint();
            if standby.iter().any(|e| e.host == endpoint.host && e.port == endpoint.port) {
                debug!("[Discovery] Skipping duplicate standby endpoint {}", endpoint);
                continue;
            }
            standby.push(endpoint);
        }
        if standby.len() < 2 {
            return Err(DiscoveryError::InsufficientEndpoints {
                required: 2,
                found: standby.len(),
                region: region.to_string(),
            });
        }
        return Ok(standby);
    }

    let chosen = candidates
        .iter()
        .find(|s| s.location.len() >= 2)
        .or_else(|| candidates.iter().find(|s| s.location.len() == 1));

    match chosen {
        Some(service) => Ok(vec![service.to_endpoint()]),
        None => Err(DiscoveryError::InsufficientEndpoints {
            required: 1,
            found: 0,
            region: region.to_string(),
        }),
    }
}

/// Queries the discovery endpoint with a bearer token
pub struct EndpointResolver {
    client: Client,
    discovery_url: Url,
    config: ResolverConfig,
}

impl EndpointResolver {
    pub fn new(config: ResolverConfig) -> DiscoveryResult<Self> {
        let mut discovery_url = Url::parse(&config.discovery_url).map_err(|e| {
            DiscoveryError::transport(format!("Invalid discovery URL {}: {}", config.discovery_url, e))
        })?;
        discovery_url
            .query_pairs_mut()
            .append_pair("transport", "websocket");
        let client = build_client(config.request_timeout)
            .map_err(|e| DiscoveryError::transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            discovery_url,
            config,
        })
    }

    /// Fetch the raw service list
    #[instrument(skip(self, token))]
    pub async fn fetch_services(&self, token: &Token) -> DiscoveryResult<Vec<ServiceEntry>> {
        info!("[Discovery] Sending service discovery request to {}", self.discovery_url);

        let bearer = format!("Bearer {}", token.access());
        let outcome = http::execute(
            "Discovery",
            &self.config.retry,
            &self.discovery_url,
            TERMINAL_STATUSES,
            |url| {
                self.client
                    .get(url)
                    .header(ACCEPT, "application/json")
                    .header(AUTHORIZATION, &bearer)
            },
        )
        .await?;

        match outcome {
            Outcome::Success(response) => {
                let body = response.text().await.map_err(|e| {
                    DiscoveryError::transport(format!("Failed to read discovery response: {}", e))
                })?;
                let parsed: DiscoveryResponse = serde_json::from_str(&body).map_err(|e| {
                    DiscoveryError::parse(format!("Failed to parse discovery response: {}", e))
                })?;
                debug!("[Discovery] {} services advertised", parsed.services.len());
                Ok(parsed.services)
            }
            Outcome::Rejected { status, .. } => Err(DiscoveryError::Forbidden { status }),
        }
    }

    pub async fn resolve_endpoints(
        &self,
        token: &Token,
        region: &str,
        hotstandby: bool,
    ) -> DiscoveryResult<Vec<Endpoint>> {
        let services = self.fetch_services(token).await?;
        let endpoints = select_endpoints(&services, region, hotstandby).inspect_err(|e| {
            warn!("[Discovery] {}", e);
        })?;
        for endpoint in &endpoints {
            info!(
                "[Discovery] Selected {} ({:?}, {})",
                endpoint,
                endpoint.topology,
                endpoint.locations.join(", ")
            );
        }
        Ok(endpoints)
    }
}

#[async_trait]
impl EndpointSource for EndpointResolver {
    async fn resolve(&self, token: &Token, region: &str, hotstandby: bool) -> DiscoveryResult<Vec<Endpoint>> {
        self.resolve_endpoints(token, region, hotstandby).await
    }
}
