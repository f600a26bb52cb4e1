//! Ordered authenticator chain

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{AuthError, Authenticator, Credentials, UserInfo};

/// Tries each authenticator in order and returns the first success.
///
/// When every authenticator declines, the caller gets
/// [`UserInfo::anonymous`] if anonymous access is allowed, otherwise the
/// last error seen (or [`AuthError::Unauthenticated`] with nothing to try).
pub struct AuthenticatorChain {
    authenticators: Vec<Arc<dyn Authenticator>>,
    allow_anonymous: bool,
}

impl AuthenticatorChain {
    /// Build a chain. Order is priority order.
    pub fn new(authenticators: Vec<Arc<dyn Authenticator>>, allow_anonymous: bool) -> Self {
        Self {
            authenticators,
            allow_anonymous,
        }
    }

    /// Number of schemes in the chain
    pub fn len(&self) -> usize {
        self.authenticators.len()
    }

    /// True when no scheme is configured
    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }
}

#[async_trait]
impl Authenticator for AuthenticatorChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<UserInfo, AuthError> {
        let mut last_err = None;
        for authenticator in &self.authenticators {
            match authenticator.authenticate(credentials).await {
                Ok(user) => {
                    debug!(scheme = authenticator.name(), user_id = %user.user_id, "Authenticated");
                    return Ok(user);
                }
                Err(e) => {
                    debug!(scheme = authenticator.name(), error = %e, "Scheme declined");
                    last_err = Some(e);
                }
            }
        }

        if self.allow_anonymous {
            return Ok(UserInfo::anonymous());
        }
        Err(last_err.unwrap_or(AuthError::Unauthenticated))
    }
}

/// Accepts every caller as a fixed identity. Used when no scheme is configured.
#[derive(Debug, Clone)]
pub struct AnonymousAuthenticator {
    user_id: String,
    roles: Vec<String>,
}

impl AnonymousAuthenticator {
    /// Accept everyone as `user_id` with `roles`.
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles,
        }
    }
}

impl Default for AnonymousAuthenticator {
    fn default() -> Self {
        Self::new("anonymous", Vec::new())
    }
}

#[async_trait]
impl Authenticator for AnonymousAuthenticator {
    fn name(&self) -> &'static str {
        "anonymous"
    }

    async fn authenticate(&self, _credentials: &Credentials) -> Result<UserInfo, AuthError> {
        Ok(UserInfo {
            user_id: self.user_id.clone(),
            email: format!("{}@localhost", self.user_id),
            roles: self.roles.clone(),
            auth_type: "anonymous".to_string(),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Fixed(&'static str, Result<&'static str, AuthError>);

    #[async_trait]
    impl Authenticator for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn authenticate(&self, _c: &Credentials) -> Result<UserInfo, AuthError> {
            self.1.clone().map(|auth_type| UserInfo {
                user_id: format!("{auth_type}-user"),
                auth_type: auth_type.to_string(),
                ..Default::default()
            })
        }
    }

    fn arc(a: Fixed) -> Arc<dyn Authenticator> {
        Arc::new(a)
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let chain = AuthenticatorChain::new(
            vec![
                arc(Fixed("oauth", Ok("oauth"))),
                arc(Fixed("oidc", Ok("oidc"))),
                arc(Fixed("apikey", Ok("apikey"))),
            ],
            false,
        );
        let user = chain.authenticate(&Credentials::bearer("t")).await.unwrap();
        assert_eq!(user.auth_type, "oauth");
    }

    #[tokio::test]
    async fn test_falls_through_to_later_scheme() {
        let chain = AuthenticatorChain::new(
            vec![
                arc(Fixed("oauth", Err(AuthError::InvalidToken("bad".into())))),
                arc(Fixed("apikey", Ok("apikey"))),
            ],
            false,
        );
        assert_eq!(chain.authenticate(&Credentials::default()).await.unwrap().auth_type, "apikey");
    }

    #[tokio::test]
    async fn test_all_fail_returns_last_error() {
        let chain = AuthenticatorChain::new(
            vec![
                arc(Fixed("oauth", Err(AuthError::InvalidToken("bad".into())))),
                arc(Fixed("apikey", Err(AuthError::InvalidApiKey))),
            ],
            false,
        );
        assert_eq!(
            chain.authenticate(&Credentials::default()).await.unwrap_err(),
            AuthError::InvalidApiKey
        );
    }

    #[tokio::test]
    async fn test_all_fail_with_anonymous_allowed() {
        let failing = arc(Fixed("oauth", Err(AuthError::InvalidApiKey)));
        let chain = AuthenticatorChain::new(vec![failing], true);
        assert_eq!(
            chain.authenticate(&Credentials::default()).await.unwrap(),
            UserInfo::anonymous()
        );
    }

    #[tokio::test]
    async fn test_empty_chain_declines() {
        let chain = AuthenticatorChain::new(Vec::new(), false);
        assert!(chain.is_empty());
        assert_eq!(
            chain.authenticate(&Credentials::default()).await.unwrap_err(),
            AuthError::Unauthenticated
        );
    }

    #[tokio::test]
    async fn test_anonymous_authenticator_accepts_everyone() {
        let user = AnonymousAuthenticator::default()
            .authenticate(&Credentials::default())
            .await
            .unwrap();
        assert_eq!(user.user_id, "anonymous");
        assert_eq!(user.email, "anonymous@localhost");
    }
}
