//! Static API key authentication

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::{AuthError, Authenticator, Credentials, UserInfo};
use crate::config::ApiKeyDef;

struct StoredKey {
    digest: [u8; 32],
    name: String,
    roles: Vec<String>,
}

/// Matches the presented key against configured keys.
///
/// Keys are held as SHA-256 digests and compared in constant time. Every
/// configured key is compared on each attempt.
pub struct ApiKeyAuthenticator {
    keys: Vec<StoredKey>,
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

impl ApiKeyAuthenticator {
    /// Build from configured keys. Empty keys are skipped.
    pub fn new(keys: &[ApiKeyDef]) -> Self {
        let mut stored = Vec::with_capacity(keys.len());
        for def in keys {
            if def.key.is_empty() {
                warn!(name = %def.name, "Skipping API key with empty value");
                continue;
            }
            stored.push(StoredKey {
                digest: digest(&def.key),
                name: def.name.clone(),
                roles: def.roles.clone(),
            });
        }
        Self { keys: stored }
    }

    /// Number of usable keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when no key is usable
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    fn name(&self) -> &'static str {
        "apikey"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<UserInfo, AuthError> {
        let presented = credentials
            .key()
            .ok_or_else(|| AuthError::NotAuthenticated("no API key presented".to_string()))?;
        let presented = digest(presented);

        let mut matched = None;
        for key in &self.keys {
            if bool::from(key.digest[..].ct_eq(&presented[..])) && matched.is_none() {
                matched = Some(key);
            }
        }
        let key = matched.ok_or(AuthError::InvalidApiKey)?;

        let mut claims = Map::new();
        claims.insert("key_name".to_string(), Value::String(key.name.clone()));
        claims.insert(
            "key_fingerprint".to_string(),
            Value::String(hex::encode(&key.digest[..6])),
        );

        Ok(UserInfo {
            user_id: format!("apikey:{}", key.name),
            email: format!("{}@apikey.local", key.name),
            name: key.name.clone(),
            roles: key.roles.clone(),
            groups: Vec::new(),
            claims,
            auth_type: "apikey".to_string(),
        })
    }
}
