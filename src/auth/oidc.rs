//! External identity provider tokens
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to get `kid` and `alg`.
//! 2. Locate the issuer's JWKS: the configured `jwks_uri`, else the one named
//!    by the issuer's discovery document.
//! 3. Find the key by `kid`; an unknown `kid` refreshes the JWKS once.
//! 4. Verify the signature, `exp`, `nbf` and `iss` with the configured clock
//!    skew as leeway.
//! 5. Check the audience (string or array) and the optional max token age.
//! 6. Extract identity fields with the [`ClaimsExtractor`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, Header, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{AuthError, Authenticator, ClaimsExtractor, Credentials, UserInfo};
use crate::config::OidcAuthConfig;
use crate::{Error, Result};

/// Cached JWKS entry.
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS cache, one entry per JWKS URI.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    ttl: Duration,
}

impl JwksCache {
    /// Create a cache whose entries go stale after `ttl`.
    pub fn new(ttl: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            inner: DashMap::new(),
            http,
            ttl,
        })
    }

    /// Seed the cache, e.g. with keys obtained out of band.
    pub fn insert(&self, jwks_uri: impl Into<String>, keys: JwkSet) {
        self.inner.insert(
            jwks_uri.into(),
            CachedJwks {
                keys,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Cached keys for `jwks_uri`, fetching when stale or when forced.
    pub async fn get_or_fetch(
        &self,
        jwks_uri: &str,
        force_refresh: bool,
    ) -> std::result::Result<JwkSet, AuthError> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(jwks_uri) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(jwks_uri, "Fetching JWKS");
        let keys: JwkSet = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AuthError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(format!("invalid JWKS: {e}")))?;
        self.insert(jwks_uri, keys.clone());
        Ok(keys)
    }

    async fn discover_jwks_uri(&self, issuer: &str) -> std::result::Result<String, AuthError> {
        #[derive(Deserialize)]
        struct Discovery {
            jwks_uri: Option<String>,
        }

        let url = format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/'));
        debug!(%url, "Fetching OIDC discovery document");
        let discovery: Discovery = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AuthError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(format!("invalid discovery document: {e}")))?;
        Ok(discovery.jwks_uri.unwrap_or_else(|| default_jwks_uri(issuer)))
    }
}

/// Verifies tokens issued by an external OIDC provider.
pub struct OidcAuthenticator {
    issuer: String,
    audiences: Vec<String>,
    leeway: Duration,
    max_token_age: Option<Duration>,
    jwks_uri: RwLock<Option<String>>,
    jwks: JwksCache,
    extractor: ClaimsExtractor,
}

impl OidcAuthenticator {
    /// Build from config. Requires an issuer.
    pub fn new(config: &OidcAuthConfig) -> Result<Self> {
        if config.issuer.trim().is_empty() {
            return Err(Error::Config("OIDC issuer is required".to_string()));
        }
        if !config.issuer.starts_with("https://") {
            warn!(issuer = %config.issuer, "OIDC issuer is not HTTPS");
        }
        let audiences = [&config.audience, &config.client_id]
            .into_iter()
            .filter(|a| !a.is_empty())
            .cloned()
            .collect();
        Ok(Self {
            issuer: config.issuer.clone(),
            audiences,
            leeway: config.clock_skew,
            max_token_age: config.max_token_age.filter(|age| !age.is_zero()),
            jwks_uri: RwLock::new(config.jwks_uri.clone().filter(|u| !u.is_empty())),
            jwks: JwksCache::new(config.jwks_cache_ttl)?,
            extractor: ClaimsExtractor::with_roles(&config.role_claim_path, &config.role_prefix),
        })
    }

    /// The JWKS cache, for seeding keys.
    pub fn jwks(&self) -> &JwksCache {
        &self.jwks
    }

    async fn jwks_uri(&self) -> std::result::Result<String, AuthError> {
        let cached = self.jwks_uri.read().clone();
        if let Some(uri) = cached {
            return Ok(uri);
        }
        let uri = self.jwks.discover_jwks_uri(&self.issuer).await?;
        *self.jwks_uri.write() = Some(uri.clone());
        Ok(uri)
    }

    async fn decoding_key(&self, kid: &str) -> std::result::Result<DecodingKey, AuthError> {
        let uri = self.jwks_uri().await?;
        let keys = self.jwks.get_or_fetch(&uri, false).await?;
        if let Some(key) = find_key_in_jwks(&keys, kid) {
            return Ok(key);
        }

        debug!(kid, "Key not found in cached JWKS, refreshing");
        let keys = self.jwks.get_or_fetch(&uri, true).await?;
        find_key_in_jwks(&keys, kid)
            .ok_or_else(|| AuthError::InvalidToken(format!("unknown key ID: {kid}")))
    }

    fn validation(&self, header: &Header) -> std::result::Result<Validation, AuthError> {
        let alg = match header.alg {
            alg @ (Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
            | Algorithm::ES256
            | Algorithm::ES384) => alg,
            other => {
                return Err(AuthError::InvalidToken(format!("unsupported algorithm {other:?}")));
            }
        };
        let mut validation = Validation::new(alg);
        validation.leeway = self.leeway.as_secs();
        validation.set_issuer(&[&self.issuer]);
        // Audience is checked by hand to accept both forms
        validation.validate_aud = false;
        Ok(validation)
    }
}

#[async_trait]
impl Authenticator for OidcAuthenticator {
    fn name(&self) -> &'static str {
        "oidc"
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> std::result::Result<UserInfo, AuthError> {
        let token = credentials
            .token()
            .ok_or_else(|| AuthError::NotAuthenticated("no token found".to_string()))?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let kid = header
            .kid
            .clone()
            .ok_or_else(|| {
                AuthError::InvalidToken("JWT missing 'kid' field in header".to_string())
            })?;
        let validation = self.validation(&header)?;
        let key = self.decoding_key(&kid).await?;

        let claims = jsonwebtoken::decode::<Map<String, Value>>(token, &key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?
            .claims;

        if !self.audiences.is_empty() && !check_audience(claims.get("aud"), &self.audiences) {
            return Err(AuthError::InvalidToken("invalid audience".to_string()));
        }
        if let Some(max_age) = self.max_token_age {
            check_token_age(&claims, max_age, jsonwebtoken::get_current_timestamp())?;
        }

        let mut user = self.extractor.extract(&claims);
        if user.user_id.is_empty() {
            return Err(AuthError::InvalidToken("missing sub claim".to_string()));
        }
        user.auth_type = "oidc".to_string();
        Ok(user)
    }
}

/// Find a JWK by `kid` and turn it into a decoding key.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    let jwk = jwks
        .keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?;
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}

/// Whether the `aud` claim names one of `expected`.
fn check_audience(aud: Option<&Value>, expected: &[String]) -> bool {
    match aud {
        Some(Value::String(s)) => expected.iter().any(|e| e == s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| expected.iter().any(|e| e == s)),
        _ => false,
    }
}

/// Reject tokens issued more than `max_age` before `now` (seconds).
fn check_token_age(
    claims: &Map<String, Value>,
    max_age: Duration,
    now: u64,
) -> std::result::Result<(), AuthError> {
    let iat = claims
        .get("iat")
        .and_then(Value::as_u64)
        .ok_or_else(|| AuthError::InvalidToken("missing iat claim".to_string()))?;
    let age = now.saturating_sub(iat);
    if age > max_age.as_secs() {
        return Err(AuthError::InvalidToken(format!(
            "token too old (issued {age}s ago, max {}s)",
            max_age.as_secs()
        )));
    }
    Ok(())
}

fn default_jwks_uri(issuer: &str) -> String {
    format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'))
}
