//! HTTP collaborators of the streaming session manager
//!
//! - `token`: OAuth token endpoint (password, client-credential and
//!   signed-assertion grants, refresh)
//! - `discovery`: streaming service discovery and endpoint selection

pub mod assertion;
pub mod discovery;
mod http;
pub mod token;

pub use assertion::{sign_client_assertion, CLIENT_ASSERTION_TYPE};
pub use discovery::{select_endpoints, DiscoveryResponse, EndpointResolver, ResolverConfig, ServiceEntry, DISCOVERY_URL};
pub use http::RetryPolicy;
pub use token::{TokenManager, TokenManagerConfig, AUTH_URL_V1, AUTH_URL_V2};
