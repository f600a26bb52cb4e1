//! In-process session store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use super::{Session, SessionState, SessionStore};
use crate::{Error, Result};

/// Sessions held in a `DashMap`. State values come back exactly as stored.
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
    closed: AtomicBool,
}

impl MemorySessionStore {
    /// Create a store whose touches extend sessions by `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of stored sessions, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether [`SessionStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Session("memory store is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, session: Session) -> Result<()> {
        self.ensure_open()?;
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        self.ensure_open()?;
        Ok(self
            .sessions
            .get(id)
            .filter(|s| !s.is_expired())
            .map(|s| s.value().clone()))
    }

    async fn touch(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        match self.sessions.get_mut(id) {
            Some(mut session) => {
                session.touch(self.ttl);
                Ok(())
            }
            None => Err(Error::Session(format!("session {id:?} not found"))),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        self.sessions.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Session>> {
        self.ensure_open()?;
        let now = Utc::now();
        Ok(self
            .sessions
            .iter()
            .filter(|s| !s.is_expired_at(now))
            .map(|s| s.value().clone())
            .collect())
    }

    async fn update_state(&self, id: &str, state: SessionState) -> Result<()> {
        self.ensure_open()?;
        match self.sessions.get_mut(id) {
            Some(mut session) => {
                session.state.extend(state);
                Ok(())
            }
            None => Err(Error::Session(format!("session {id:?} not found"))),
        }
    }

    async fn cleanup(&self) -> Result<usize> {
        self.ensure_open()?;
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired_at(now));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(count = removed, "Removed expired sessions");
        }
        Ok(removed)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::session::SessionValue;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store() -> MemorySessionStore {
        MemorySessionStore::new(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = store();
        store
            .create(Session::new("s1", "alice", Duration::from_secs(60)))
            .await
            .unwrap();
        let got = store.get("s1").await.unwrap().unwrap();
        assert_eq!(got.user_id, "alice");

        store.delete("s1").await.unwrap();
        assert!(store.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_hidden_and_cleaned() {
        let store = store();
        let mut old = Session::new("old", "", Duration::from_secs(60));
        old.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.create(old).await.unwrap();
        store
            .create(Session::new("new", "", Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(store.get("old").await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert_eq!(store.cleanup().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_state_merges_and_keeps_native_values() {
        let store = store();
        store
            .create(Session::new("s1", "", Duration::from_secs(60)))
            .await
            .unwrap();
        let marks = BTreeMap::from([("t".to_string(), Utc::now())]);

        store
            .update_state("s1", SessionState::from([("a".to_string(), json!(1).into())]))
            .await
            .unwrap();
        store
            .update_state(
                "s1",
                SessionState::from([("marks".to_string(), SessionValue::SentMarks(marks.clone()))]),
            )
            .await
            .unwrap();

        let state = store.get("s1").await.unwrap().unwrap().state;
        assert_eq!(state.get("a"), Some(&SessionValue::Json(json!(1))));
        assert_eq!(state.get("marks"), Some(&SessionValue::SentMarks(marks)));
    }

    #[tokio::test]
    async fn test_update_state_on_missing_session_fails() {
        let store = store();
        assert!(store.update_state("nope", SessionState::new()).await.is_err());
        assert!(store.touch("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = store();
        store.close().await.unwrap();
        assert!(store.is_closed());
        assert!(store.list().await.is_err());
    }
}
