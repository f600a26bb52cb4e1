//! Durable client sessions
//!
//! A [`Session`] carries a free-form state map. Stores differ in how faithfully
//! they keep state values: the in-memory store hands back exactly the
//! [`SessionValue`] it was given, while the file store round-trips through
//! JSON and hands back [`SessionValue::Json`].

mod file;
mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

use crate::config::{SessionStoreKind, SessionsConfig};
use crate::Result;

/// Free-form per-session state.
pub type SessionState = BTreeMap<String, SessionValue>;

/// One value in a session's state map.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    /// Target key to the time it was last sent
    SentMarks(BTreeMap<String, DateTime<Utc>>),
    /// Anything else, or any value that came back from a JSON round trip
    Json(serde_json::Value),
}

impl Serialize for SessionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            // chrono writes RFC 3339 strings
            Self::SentMarks(marks) => marks.serialize(serializer),
            Self::Json(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for SessionValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::Json)
    }
}

impl From<serde_json::Value> for SessionValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// A client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier
    pub id: String,
    /// Owning user, empty when unknown
    #[serde(default)]
    pub user_id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last time the session was touched
    pub last_active_at: DateTime<Utc>,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
    /// Free-form state
    #[serde(default)]
    pub state: SessionState,
}

impl Session {
    /// A fresh session expiring `ttl` from now.
    #[must_use]
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            created_at: now,
            last_active_at: now,
            expires_at: expiry_from(now, ttl),
            state: SessionState::new(),
        }
    }

    /// Whether the session has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub(crate) fn touch(&mut self, ttl: Duration) {
        let now = Utc::now();
        self.last_active_at = now;
        self.expires_at = expiry_from(now, ttl);
    }
}

pub(crate) fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

pub(crate) fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(chrono_ttl(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Durable session storage.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Store name, for logs.
    fn name(&self) -> &'static str;

    /// Insert or replace a session.
    async fn create(&self, session: Session) -> Result<()>;

    /// Fetch a session. Missing and expired sessions are `None`.
    async fn get(&self, id: &str) -> Result<Option<Session>>;

    /// Refresh a session's activity time and push its expiry out.
    async fn touch(&self, id: &str) -> Result<()>;

    /// Remove a session.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Every session that has not expired.
    async fn list(&self) -> Result<Vec<Session>>;

    /// Merge keys into a session's state.
    async fn update_state(&self, id: &str, state: SessionState) -> Result<()>;

    /// Drop expired sessions, returning how many were removed.
    async fn cleanup(&self) -> Result<usize>;

    /// Release the store. Later calls fail.
    async fn close(&self) -> Result<()>;
}

/// Build the configured session store.
pub fn build_store(config: &SessionsConfig) -> Result<Arc<dyn SessionStore>> {
    Ok(match config.kind {
        SessionStoreKind::Memory => Arc::new(MemorySessionStore::new(config.ttl)),
        SessionStoreKind::File => {
            let path = match &config.path {
                Some(p) => p.clone(),
                None => FileSessionStore::default_path()?,
            };
            Arc::new(FileSessionStore::open(path, config.ttl)?)
        }
    })
}
