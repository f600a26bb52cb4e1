//! HMAC signing key for self-issued tokens

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::warn;

use crate::{Error, Result};

/// Minimum key length in bytes
pub const MIN_SIGNING_KEY_LEN: usize = 32;

/// Decode a base64 key, or generate a random one when none is configured.
///
/// Malformed base64 and keys shorter than [`MIN_SIGNING_KEY_LEN`] are
/// errors. A generated key does not survive restarts, so tokens issued
/// before a restart stop validating.
pub fn parse_or_generate(configured: &str) -> Result<Vec<u8>> {
    let configured = configured.trim();
    if configured.is_empty() {
        warn!(
            "No oauth.signing_key configured; generated a random key, \
             issued tokens will not survive a restart"
        );
        return Ok(generate().to_vec());
    }

    let key = STANDARD
        .decode(configured)
        .map_err(|e| Error::SigningKey(format!("decoding signing key: {e}")))?;
    if key.len() < MIN_SIGNING_KEY_LEN {
        return Err(Error::SigningKey(format!(
            "signing key must be at least {MIN_SIGNING_KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(key)
}

/// A fresh random key.
pub fn generate() -> [u8; MIN_SIGNING_KEY_LEN] {
    rand::random()
}

/// Base64 form of a key, as accepted by [`parse_or_generate`].
pub fn encode(key: &[u8]) -> String {
    STANDARD.encode(key)
}
