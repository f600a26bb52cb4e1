//! Self-issued HS256 tokens
//!
//! Tokens carry the standard `iss`, `sub`, `iat` and `exp` claims plus a
//! nested `claims` object holding the user's identity-provider claims.
//! Roles and email are read from that nested object.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{AuthError, Authenticator, ClaimsExtractor, Credentials, UserInfo};
use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    iss: String,
    #[serde(default)]
    sub: String,
    iat: u64,
    exp: u64,
    #[serde(default)]
    claims: Map<String, Value>,
}

/// Verifies (and mints) tokens signed with the platform's own key.
pub struct OAuthJwtAuthenticator {
    issuer: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    extractor: ClaimsExtractor,
}

impl OAuthJwtAuthenticator {
    /// Build for `issuer` with an HMAC `key`.
    pub fn new(issuer: &str, key: &[u8], extractor: ClaimsExtractor) -> Result<Self> {
        if issuer.is_empty() {
            return Err(Error::Config("oauth issuer is required".to_string()));
        }
        if key.is_empty() {
            return Err(Error::SigningKey("oauth signing key is required".to_string()));
        }
        Ok(Self {
            issuer: issuer.to_string(),
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            extractor,
        })
    }

    /// Mint a token for `subject` valid for `ttl`.
    pub fn issue(
        &self,
        subject: &str,
        claims: Map<String, Value>,
        ttl: Duration,
    ) -> Result<String> {
        let iat = jsonwebtoken::get_current_timestamp();
        let token = TokenClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            iat,
            exp: iat.saturating_add(ttl.as_secs()),
            claims,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &token, &self.encoding)
            .map_err(|e| Error::SigningKey(format!("signing token: {e}")))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_aud = false;
        validation
    }
}

#[async_trait]
impl Authenticator for OAuthJwtAuthenticator {
    fn name(&self) -> &'static str {
        "oauth"
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> std::result::Result<UserInfo, AuthError> {
        let token = credentials
            .token()
            .ok_or_else(|| AuthError::NotAuthenticated("no token found".to_string()))?;

        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding, &self.validation())
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("missing sub claim".to_string()));
        }

        let extracted = self.extractor.extract(&claims.claims);
        Ok(UserInfo {
            user_id: claims.sub,
            email: extracted.email,
            name: extracted.name,
            roles: extracted.roles,
            groups: extracted.groups,
            claims: claims.claims,
            auth_type: "oauth".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn authenticator(issuer: &str) -> OAuthJwtAuthenticator {
        OAuthJwtAuthenticator::new(issuer, KEY, ClaimsExtractor::default()).unwrap()
    }

    fn nested() -> Map<String, Value> {
        json!({"email": "ana@example.com", "roles": ["analyst"]})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_issue_then_authenticate() {
        let auth = authenticator("https://gw.example");
        let token = auth.issue("ana", nested(), Duration::from_secs(600)).unwrap();
        let user = auth.authenticate(&Credentials::bearer(token)).await.unwrap();
        assert_eq!(user.user_id, "ana");
        assert_eq!(user.email, "ana@example.com");
        assert_eq!(user.roles, vec!["analyst"]);
        assert_eq!(user.auth_type, "oauth");
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let token = authenticator("https://other.example")
            .issue("ana", Map::new(), Duration::from_secs(600))
            .unwrap();
        let err = authenticator("https://gw.example")
            .authenticate(&Credentials::bearer(token))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_missing_sub_rejected() {
        let auth = authenticator("https://gw.example");
        let token = auth.issue("", Map::new(), Duration::from_secs(600)).unwrap();
        assert_eq!(
            auth.authenticate(&Credentials::bearer(token)).await.unwrap_err(),
            AuthError::InvalidToken("missing sub claim".into())
        );
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let other = OAuthJwtAuthenticator::new(
            "https://gw.example",
            b"ffffffffffffffffffffffffffffffff",
            ClaimsExtractor::default(),
        )
        .unwrap();
        let token = other.issue("ana", Map::new(), Duration::from_secs(600)).unwrap();
        assert!(
            authenticator("https://gw.example")
                .authenticate(&Credentials::bearer(token))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_no_token() {
        assert!(matches!(
            authenticator("https://gw.example")
                .authenticate(&Credentials::default())
                .await,
            Err(AuthError::NotAuthenticated(_))
        ));
    }

    #[test]
    fn test_requires_issuer() {
        assert!(OAuthJwtAuthenticator::new("", KEY, ClaimsExtractor::default()).is_err());
    }
}
