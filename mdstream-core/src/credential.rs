//! Credential material used to obtain access tokens

use std::fmt;

/// Which OAuth grant a credential performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantKind {
    /// Resource-owner password grant; issues refresh tokens
    Password,
    /// Client id + client secret
    ClientCredentials,
    /// Client id + signed JWT assertion
    SignedAssertion,
}

impl GrantKind {
    /// Whether tokens issued for this grant carry a refresh token
    pub fn supports_refresh(&self) -> bool {
        matches!(self, GrantKind::Password)
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GrantKind::Password => "password",
            GrantKind::ClientCredentials => "client-credentials",
            GrantKind::SignedAssertion => "signed-assertion",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for GrantKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "password" => Ok(GrantKind::Password),
            "client-credentials" | "client_credentials" => Ok(GrantKind::ClientCredentials),
            "signed-assertion" | "jwt" => Ok(GrantKind::SignedAssertion),
            _ => Err(format!("Unknown grant kind: {}", s)),
        }
    }
}

/// Private key used to sign client assertions
#[derive(Clone)]
pub struct AssertionKey {
    /// Token endpoint audience placed in the `aud` claim
    pub audience: String,
    /// Key id placed in the JWT header
    pub key_id: String,
    /// JWS algorithm name, e.g. "RS256"
    pub algorithm: String,
    /// PEM-encoded private key
    pub private_key_pem: String,
}

impl fmt::Debug for AssertionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionKey")
            .field("audience", &self.audience)
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("private_key_pem", &"[REDACTED]")
            .finish()
    }
}

/// Grant-specific secret material
#[derive(Clone)]
pub enum Grant {
    Password {
        username: String,
        password: String,
        client_secret: Option<String>,
        take_exclusive_sign_on: bool,
    },
    ClientCredentials {
        client_secret: String,
    },
    SignedAssertion(AssertionKey),
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grant::Password {
                username,
                client_secret,
                take_exclusive_sign_on,
                ..
            } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .field("client_secret", &client_secret.as_ref().map(|_| "[REDACTED]"))
                .field("take_exclusive_sign_on", take_exclusive_sign_on)
                .finish(),
            Grant::ClientCredentials { .. } => f
                .debug_struct("ClientCredentials")
                .field("client_secret", &"[REDACTED]")
                .finish(),
            Grant::SignedAssertion(key) => f.debug_tuple("SignedAssertion").field(key).finish(),
        }
    }
}

/// Credential presented to the token endpoint.
///
/// Immutable once built; rotating a secret means building a new credential.
#[derive(Debug, Clone)]
pub struct Credential {
    pub client_id: String,
    pub scope: String,
    pub grant: Grant,
}

impl Credential {
    pub fn password(
        username: impl Into<String>,
        password: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            scope: crate::DEFAULT_SCOPE.to_string(),
            grant: Grant::Password {
                username: username.into(),
                password: password.into(),
                client_secret: None,
                take_exclusive_sign_on: true,
            },
        }
    }

    pub fn client_credentials(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            scope: crate::DEFAULT_SCOPE.to_string(),
            grant: Grant::ClientCredentials {
                client_secret: client_secret.into(),
            },
        }
    }

    pub fn signed_assertion(client_id: impl Into<String>, key: AssertionKey) -> Self {
        Self {
            client_id: client_id.into(),
            scope: crate::DEFAULT_SCOPE.to_string(),
            grant: Grant::SignedAssertion(key),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn grant_kind(&self) -> GrantKind {
        match self.grant {
            Grant::Password { .. } => GrantKind::Password,
            Grant::ClientCredentials { .. } => GrantKind::ClientCredentials,
            Grant::SignedAssertion(_) => GrantKind::SignedAssertion,
        }
    }

    /// Username for password grants, client id otherwise
    pub fn principal(&self) -> &str {
        match &self.grant {
            Grant::Password { username, .. } => username,
            _ => &self.client_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let credential = Credential::password("u", "hunter2", "client-1");
        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("hunter2"));

        let credential = Credential::client_credentials("client-1", "s3cret");
        assert!(!format!("{:?}", credential).contains("s3cret"));
    }

    #[test]
    fn test_grant_kind_refresh_support() {
        assert!(Credential::password("u", "p", "c").grant_kind().supports_refresh());
        assert!(!Credential::client_credentials("c", "s").grant_kind().supports_refresh());
        assert_eq!("jwt".parse::<GrantKind>(), Ok(GrantKind::SignedAssertion));
        assert!("kerberos".parse::<GrantKind>().is_err());
    }

    #[test]
    fn test_principal() {
        assert_eq!(Credential::password("alice", "p", "c").principal(), "alice");
        assert_eq!(Credential::client_credentials("svc", "s").principal(), "svc");
    }
}
