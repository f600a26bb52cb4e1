//! JSON file session store.
//!
//! All sessions live in a single JSON document that is rewritten after every
//! change (write to a sibling temp file, then rename). State values are
//! returned as generic JSON after a reload.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Session, SessionState, SessionStore};
use crate::{Error, Result};

struct Inner {
    sessions: BTreeMap<String, Session>,
    closed: bool,
}

/// Sessions persisted to one JSON file.
pub struct FileSessionStore {
    path: PathBuf,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl FileSessionStore {
    /// Default location: `~/.data-platform-gateway/sessions.json`.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Internal("Cannot determine home directory".to_string()))?;
        Ok(home.join(".data-platform-gateway").join("sessions.json"))
    }

    /// Open (or create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Session(format!(
                    "Failed to create session directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let sessions = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| {
                    Error::Session(format!("Corrupt session file {}: {e}", path.display()))
                })?
            }
        } else {
            BTreeMap::new()
        };
        info!(path = %path.display(), sessions = sessions.len(), "Opened session file");

        Ok(Self {
            path,
            ttl,
            inner: Mutex::new(Inner {
                sessions,
                closed: false,
            }),
        })
    }

    /// File backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to the open state and persist the result.
    fn mutate<T>(&self, f: impl FnOnce(&mut BTreeMap<String, Session>) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Session("file store is closed".to_string()));
        }
        let out = f(&mut inner.sessions)?;
        persist(&self.path, &inner.sessions)?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&BTreeMap<String, Session>) -> T) -> Result<T> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Session("file store is closed".to_string()));
        }
        Ok(f(&inner.sessions))
    }
}

fn persist(path: &Path, sessions: &BTreeMap<String, Session>) -> Result<()> {
    let json = serde_json::to_string_pretty(sessions)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn not_found(id: &str) -> Error {
    Error::Session(format!("session {id:?} not found"))
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn create(&self, session: Session) -> Result<()> {
        self.mutate(|sessions| {
            sessions.insert(session.id.clone(), session);
            Ok(())
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        self.read(|sessions| sessions.get(id).filter(|s| !s.is_expired()).cloned())
    }

    async fn touch(&self, id: &str) -> Result<()> {
        let ttl = self.ttl;
        self.mutate(|sessions| {
            let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
            session.touch(ttl);
            Ok(())
        })
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.mutate(|sessions| {
            sessions.remove(id);
            Ok(())
        })
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let now = Utc::now();
        self.read(|sessions| {
            sessions
                .values()
                .filter(|s| !s.is_expired_at(now))
                .cloned()
                .collect()
        })
    }

    async fn update_state(&self, id: &str, state: SessionState) -> Result<()> {
        self.mutate(|sessions| {
            let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
            session.state.extend(state);
            Ok(())
        })
    }

    async fn cleanup(&self) -> Result<usize> {
        let now = Utc::now();
        let removed = self.mutate(|sessions| {
            let before = sessions.len();
            sessions.retain(|_, s| !s.is_expired_at(now));
            Ok(before - sessions.len())
        })?;
        if removed > 0 {
            debug!(count = removed, "Removed expired sessions");
        }
        Ok(removed)
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        persist(&self.path, &inner.sessions)?;
        inner.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionValue;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_sessions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.json");

        let store = FileSessionStore::open(&path, Duration::from_secs(60)).unwrap();
        store
            .create(Session::new("s1", "bob", Duration::from_secs(60)))
            .await
            .unwrap();
        store
            .update_state("s1", SessionState::from([("k".to_string(), json!("v").into())]))
            .await
            .unwrap();
        store.close().await.unwrap();

        let reopened = FileSessionStore::open(&path, Duration::from_secs(60)).unwrap();
        let session = reopened.get("s1").await.unwrap().unwrap();
        assert_eq!(session.user_id, "bob");
        assert_eq!(session.state.get("k"), Some(&SessionValue::Json(json!("v"))));
    }

    #[tokio::test]
    async fn test_native_marks_come_back_as_json_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let at = Utc::now();

        let store = FileSessionStore::open(&path, Duration::from_secs(60)).unwrap();
        store
            .create(Session::new("s1", "", Duration::from_secs(60)))
            .await
            .unwrap();
        let marks = BTreeMap::from([("c.s.t".to_string(), at)]);
        store
            .update_state(
                "s1",
                SessionState::from([("m".to_string(), SessionValue::SentMarks(marks))]),
            )
            .await
            .unwrap();
        drop(store);

        let reopened = FileSessionStore::open(&path, Duration::from_secs(60)).unwrap();
        let state = reopened.get("s1").await.unwrap().unwrap().state;
        let Some(SessionValue::Json(serde_json::Value::Object(map))) = state.get("m") else {
            panic!("expected a JSON object, got {state:?}");
        };
        assert!(map["c.s.t"].is_string());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        fs::write(&path, "not json").unwrap();
        assert!(FileSessionStore::open(&path, Duration::from_secs(60)).is_err());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            FileSessionStore::open(dir.path().join("s.json"), Duration::from_secs(60)).unwrap();
        store.close().await.unwrap();
        assert!(
            store
                .create(Session::new("s1", "", Duration::from_secs(60)))
                .await
                .is_err()
        );
    }
}
