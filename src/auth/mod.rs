//! Caller authentication
//!
//! Three credential schemes are tried in a fixed priority order by
//! [`AuthenticatorChain`]: self-issued tokens ([`OAuthJwtAuthenticator`]),
//! external identity provider tokens ([`OidcAuthenticator`]), then static API
//! keys ([`ApiKeyAuthenticator`]). The first success wins.

mod apikey;
mod chain;
mod claims;
mod oauth;
mod oidc;
pub mod signing_key;

pub use apikey::ApiKeyAuthenticator;
pub use chain::{AnonymousAuthenticator, AuthenticatorChain};
pub use claims::ClaimsExtractor;
pub use oauth::OAuthJwtAuthenticator;
pub use oidc::{JwksCache, OidcAuthenticator};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::Result;
use crate::config::Config;

/// Credentials presented with a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// `Authorization: Bearer` token
    pub bearer_token: Option<String>,
    /// API key header value
    pub api_key: Option<String>,
}

impl Credentials {
    /// Credentials carrying only a bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
            api_key: None,
        }
    }

    /// Credentials carrying only an API key.
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            bearer_token: None,
            api_key: Some(key.into()),
        }
    }

    /// The bearer token, if non-empty.
    pub fn token(&self) -> Option<&str> {
        self.bearer_token.as_deref().filter(|t| !t.is_empty())
    }

    /// The API key, falling back to the bearer token.
    pub fn key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .or_else(|| self.token())
    }
}

/// A resolved caller identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Stable user identifier
    pub user_id: String,
    /// Email, when known
    #[serde(default)]
    pub email: String,
    /// Display name, when known
    #[serde(default)]
    pub name: String,
    /// Roles used for authorization
    #[serde(default)]
    pub roles: Vec<String>,
    /// Group memberships
    #[serde(default)]
    pub groups: Vec<String>,
    /// Raw claims
    #[serde(default)]
    pub claims: Map<String, Value>,
    /// Scheme that produced this identity
    pub auth_type: String,
}

impl UserInfo {
    /// The fixed identity given to unauthenticated callers when allowed.
    pub fn anonymous() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            auth_type: "anonymous".to_string(),
            ..Default::default()
        }
    }
}

/// Why a request could not be authenticated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// This scheme found no credential it understands
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// A credential was presented but failed verification
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The API key is not known
    #[error("invalid API key")]
    InvalidApiKey,

    /// Every scheme declined and anonymous access is off
    #[error("authentication failed")]
    Unauthenticated,

    /// The identity provider could not be reached
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a caller identity from request credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Scheme name, for logs.
    fn name(&self) -> &'static str;

    /// Resolve the identity or explain why not.
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> std::result::Result<UserInfo, AuthError>;
}

/// Build the authenticator for `config`.
///
/// Schemes are added in priority order. With none enabled, every caller
/// gets the permissive [`AnonymousAuthenticator`] identity.
pub fn build_authenticator(
    config: &Config,
    signing_key: Option<&[u8]>,
) -> Result<Arc<dyn Authenticator>> {
    let mut authenticators: Vec<Arc<dyn Authenticator>> = Vec::new();

    if config.oauth.enabled {
        if let Some(key) = signing_key {
            authenticators.push(Arc::new(OAuthJwtAuthenticator::new(
                &config.oauth.issuer,
                key,
                ClaimsExtractor::with_roles(
                    &config.oauth.role_claim_path,
                    &config.oauth.role_prefix,
                ),
            )?));
        }
    }

    if config.auth.oidc.enabled {
        authenticators.push(Arc::new(OidcAuthenticator::new(&config.auth.oidc)?));
    }

    if config.auth.api_keys.enabled {
        authenticators.push(Arc::new(ApiKeyAuthenticator::new(&config.auth.api_keys.keys)));
    }

    if authenticators.is_empty() {
        info!("No authentication configured, all callers are anonymous");
        return Ok(Arc::new(AnonymousAuthenticator::default()));
    }

    info!(
        schemes = ?authenticators.iter().map(|a| a.name()).collect::<Vec<_>>(),
        allow_anonymous = config.auth.allow_anonymous,
        "Authentication configured"
    );
    Ok(Arc::new(AuthenticatorChain::new(
        authenticators,
        config.auth.allow_anonymous,
    )))
}
