//! Authenticator chain priority and anonymous policy
//!
//! Covers:
//! - self-issued tokens win over IdP tokens and API keys
//! - configured schemes without anonymous access decline everyone else
//! - zero configured schemes means a permissive anonymous identity

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Map;

use data_platform_gateway::auth::{
    ApiKeyAuthenticator, AuthError, Authenticator, AuthenticatorChain, ClaimsExtractor,
    Credentials, OAuthJwtAuthenticator, UserInfo, build_authenticator,
};
use data_platform_gateway::config::{ApiKeyDef, Config};

const SIGNING_KEY: &[u8] = b"an-hmac-signing-key-of-32-bytes!";

/// Stand-in for an external IdP that accepts any bearer token.
struct AcceptingIdp;

#[async_trait]
impl Authenticator for AcceptingIdp {
    fn name(&self) -> &'static str {
        "oidc"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<UserInfo, AuthError> {
        credentials
            .token()
            .map(|_| UserInfo {
                user_id: "idp-user".into(),
                auth_type: "oidc".into(),
                ..Default::default()
            })
            .ok_or_else(|| AuthError::NotAuthenticated("no token".into()))
    }
}

fn oauth() -> OAuthJwtAuthenticator {
    OAuthJwtAuthenticator::new("https://gateway.example", SIGNING_KEY, ClaimsExtractor::default())
        .unwrap()
}

fn api_key_for(secret: &str) -> ApiKeyDef {
    ApiKeyDef {
        key: secret.to_string(),
        name: "ci".to_string(),
        roles: vec!["automation".to_string()],
    }
}

#[tokio::test]
async fn test_self_issued_token_wins_over_idp_and_api_key() {
    let issuer = oauth();
    let token = issuer.issue("ana", Map::new(), Duration::from_secs(300)).unwrap();

    let chain = AuthenticatorChain::new(
        vec![
            Arc::new(issuer),
            Arc::new(AcceptingIdp),
            Arc::new(ApiKeyAuthenticator::new(&[api_key_for(&token)])),
        ],
        false,
    );

    let user = chain.authenticate(&Credentials::bearer(token)).await.unwrap();
    assert_eq!(user.auth_type, "oauth");
    assert_eq!(user.user_id, "ana");
}

#[tokio::test]
async fn test_later_scheme_used_when_earlier_decline() {
    let chain = AuthenticatorChain::new(
        vec![
            Arc::new(oauth()),
            Arc::new(ApiKeyAuthenticator::new(&[api_key_for("static-secret")])),
        ],
        false,
    );

    let user = chain
        .authenticate(&Credentials::api_key("static-secret"))
        .await
        .unwrap();
    assert_eq!(user.auth_type, "apikey");
    assert_eq!(user.user_id, "apikey:ci");
    assert_eq!(user.roles, vec!["automation".to_string()]);
}

#[tokio::test]
async fn test_built_chain_orders_oauth_before_api_keys() {
    let issuer = oauth();
    let token = issuer.issue("ana", Map::new(), Duration::from_secs(300)).unwrap();

    let mut config = Config::default();
    config.oauth.enabled = true;
    config.oauth.issuer = "https://gateway.example".into();
    config.auth.api_keys.enabled = true;
    config.auth.api_keys.keys.push(api_key_for(&token));

    let authenticator = build_authenticator(&config, Some(SIGNING_KEY)).unwrap();
    let user = authenticator.authenticate(&Credentials::bearer(token)).await.unwrap();
    assert_eq!(user.auth_type, "oauth");
}

#[tokio::test]
async fn test_no_scheme_matches_and_anonymous_disallowed() {
    let mut config = Config::default();
    config.auth.api_keys.enabled = true;
    config.auth.api_keys.keys.push(api_key_for("static-secret"));
    config.auth.allow_anonymous = false;

    let authenticator = build_authenticator(&config, None).unwrap();
    for credentials in [
        Credentials::default(),
        Credentials::api_key("wrong"),
        Credentials::bearer("not-a-jwt"),
    ] {
        assert!(authenticator.authenticate(&credentials).await.is_err());
    }
}

#[tokio::test]
async fn test_anonymous_allowed_gets_fixed_identity() {
    let mut config = Config::default();
    config.auth.api_keys.enabled = true;
    config.auth.api_keys.keys.push(api_key_for("static-secret"));
    config.auth.allow_anonymous = true;

    let authenticator = build_authenticator(&config, None).unwrap();
    let user = authenticator.authenticate(&Credentials::default()).await.unwrap();
    assert_eq!(user, UserInfo::anonymous());
}

#[tokio::test]
async fn test_empty_chain_declines_every_call() {
    let chain = AuthenticatorChain::new(Vec::new(), false);
    let err = chain.authenticate(&Credentials::bearer("anything")).await.unwrap_err();
    assert_eq!(err, AuthError::Unauthenticated);
}

#[tokio::test]
async fn test_zero_schemes_is_permissive() {
    let authenticator = build_authenticator(&Config::default(), None).unwrap();
    let user = authenticator.authenticate(&Credentials::default()).await.unwrap();
    assert_eq!(user.user_id, "anonymous");
    assert_eq!(user.auth_type, "anonymous");
}
