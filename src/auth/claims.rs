//! Claim extraction by dot path

use serde_json::{Map, Value};

use super::UserInfo;

/// Pulls identity fields out of a claims object.
///
/// Paths are dot separated (`realm_access.roles`). A missing path or a value
/// of the wrong type yields nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsExtractor {
    /// Path to the roles array
    pub role_claim_path: String,
    /// Only roles starting with this are kept
    pub role_prefix: String,
    /// Path to the groups array
    pub group_claim_path: String,
    /// Path to the email string
    pub email_claim_path: String,
    /// Path to the display name
    pub name_claim_path: String,
    /// Path to the subject
    pub subject_claim_path: String,
}

impl Default for ClaimsExtractor {
    fn default() -> Self {
        Self {
            role_claim_path: "roles".to_string(),
            role_prefix: String::new(),
            group_claim_path: "groups".to_string(),
            email_claim_path: "email".to_string(),
            name_claim_path: "name".to_string(),
            subject_claim_path: "sub".to_string(),
        }
    }
}

impl ClaimsExtractor {
    /// Defaults with a custom roles path and prefix.
    pub fn with_roles(path: &str, prefix: &str) -> Self {
        Self {
            role_claim_path: path.to_string(),
            role_prefix: prefix.to_string(),
            ..Self::default()
        }
    }

    /// Fill a [`UserInfo`] from `claims`. `auth_type` is left empty.
    pub fn extract(&self, claims: &Map<String, Value>) -> UserInfo {
        let mut roles = string_list(lookup(claims, &self.role_claim_path));
        if !self.role_prefix.is_empty() {
            roles.retain(|r| r.starts_with(&self.role_prefix));
        }
        UserInfo {
            user_id: string(lookup(claims, &self.subject_claim_path)),
            email: string(lookup(claims, &self.email_claim_path)),
            name: string(lookup(claims, &self.name_claim_path)),
            roles,
            groups: string_list(lookup(claims, &self.group_claim_path)),
            claims: claims.clone(),
            auth_type: String::new(),
        }
    }
}

fn lookup<'a>(claims: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut parts = path.split('.');
    let mut current = claims.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn string(value: Option<&Value>) -> String {
    value.and_then(Value::as_str).unwrap_or_default().to_string()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
