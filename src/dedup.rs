//! Session-scoped enrichment dedup cache
//!
//! Tracks, per client session, which enrichment targets (usually fully
//! qualified table names) were already sent and when. Enrichment consults
//! the cache to avoid re-sending the same metadata block to the same session.
//!
//! Two clocks govern the cache:
//!
//! - **entry TTL**: how long a "sent" mark stays fresh.
//! - **session timeout**: how long a session may go without a new mark
//!   before the cleanup task evicts it entirely.
//!
//! The cache survives restarts by flushing each session's marks into the
//! session store at shutdown and reading them back at startup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::session::{Session, SessionState, SessionStore, SessionValue, chrono_ttl};
use crate::tasks::PeriodicTask;
use crate::Result;

// ── Public constants ──────────────────────────────────────────────────────────

/// Session state key holding a session's dedup marks.
pub const DEDUP_STATE_KEY: &str = "enrichment_dedup";

/// Default freshness window of a mark.
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(5 * 60);

/// Default idle window before a session is evicted.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Target key to the time it was last sent.
pub type SentMarks = BTreeMap<String, DateTime<Utc>>;

// ── Cache ─────────────────────────────────────────────────────────────────────

struct SessionEntry {
    sent: SentMarks,
    last_access: DateTime<Utc>,
}

impl SessionEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            sent: SentMarks::new(),
            last_access: now,
        }
    }
}

/// Per-session record of recently sent enrichment targets.
///
/// All reads and writes go through one `RwLock`, so a mark and a concurrent
/// cleanup pass never interleave.
pub struct SessionDedupCache {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    entry_ttl: chrono::Duration,
    session_timeout: chrono::Duration,
    cleanup: Mutex<Option<PeriodicTask>>,
}

/// Outcome of flushing the cache into a session store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    /// Sessions written
    pub written: usize,
    /// Sessions that failed and were skipped
    pub failed: usize,
}

impl SessionDedupCache {
    /// Create a cache.
    #[must_use]
    pub fn new(entry_ttl: Duration, session_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            entry_ttl: chrono_ttl(entry_ttl),
            session_timeout: chrono_ttl(session_timeout),
            cleanup: Mutex::new(None),
        }
    }

    /// Freshness window of a mark.
    pub fn entry_ttl(&self) -> Duration {
        self.entry_ttl.to_std().unwrap_or(Duration::MAX)
    }

    /// Record that `target` was sent to `session` now.
    pub fn mark_sent(&self, session: &str, target: &str) {
        self.mark_sent_at(session, target, Utc::now());
    }

    /// Record that `target` was sent to `session` at `at`.
    pub fn mark_sent_at(&self, session: &str, target: &str, at: DateTime<Utc>) {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let entry = sessions
            .entry(session.to_string())
            .or_insert_with(|| SessionEntry::new(now));
        entry.sent.insert(target.to_string(), at);
        entry.last_access = now;
    }

    /// True iff `target` has a mark for `session` younger than the entry TTL.
    pub fn was_sent_recently(&self, session: &str, target: &str) -> bool {
        let now = Utc::now();
        self.sessions
            .read()
            .get(session)
            .and_then(|entry| entry.sent.get(target))
            .is_some_and(|sent_at| now.signed_duration_since(*sent_at) < self.entry_ttl)
    }

    /// True iff every target is fresh for `session`. An empty list is not.
    pub fn all_sent_recently<S: AsRef<str>>(&self, session: &str, targets: &[S]) -> bool {
        !targets.is_empty()
            && targets
                .iter()
                .all(|t| self.was_sent_recently(session, t.as_ref()))
    }

    /// Number of tracked sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Copy of every session's marks.
    pub fn export_sessions(&self) -> HashMap<String, SentMarks> {
        self.sessions
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.sent.clone()))
            .collect()
    }

    /// Seed a session with marks, merging into anything already tracked.
    /// The session counts as active now.
    pub fn load_session(&self, session: &str, marks: SentMarks) {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let entry = sessions
            .entry(session.to_string())
            .or_insert_with(|| SessionEntry::new(now));
        entry.sent.extend(marks);
        entry.last_access = now;
    }

    /// Evict idle sessions and expired marks.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    /// Evict relative to `now`: sessions idle longer than the session
    /// timeout, and marks older than the entry TTL. Returns the number of
    /// sessions evicted.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        let timeout = self.session_timeout;
        sessions.retain(|_, entry| now.signed_duration_since(entry.last_access) <= timeout);
        let evicted = before - sessions.len();
        for entry in sessions.values_mut() {
            entry
                .sent
                .retain(|_, sent_at| now.signed_duration_since(*sent_at) < self.entry_ttl);
        }
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "Dedup cache cleanup");
        }
        evicted
    }

    /// Start the periodic cleanup task. Replaces a running one.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(self);
        let task = PeriodicTask::spawn("dedup-cleanup", interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(cache) = weak.upgrade() {
                    cache.cleanup();
                }
            }
        });
        // A replaced task is cancelled when dropped.
        *self.cleanup.lock() = Some(task);
    }

    /// Stop the cleanup task and wait for it to exit.
    pub async fn stop(&self) {
        let task = self.cleanup.lock().take();
        if let Some(mut task) = task {
            task.stop().await;
        }
    }

    /// Whether the cleanup task is running.
    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup
            .lock()
            .as_ref()
            .is_some_and(PeriodicTask::is_running)
    }

    // ── Persistence ───────────────────────────────────────────────────────

    /// Write every session's marks into that session's durable state.
    ///
    /// Sessions missing from the store are created with `session_ttl`. A
    /// failure on one session is logged and the rest are still written.
    pub async fn flush_to_store(
        &self,
        store: &dyn SessionStore,
        session_ttl: Duration,
    ) -> FlushStats {
        let mut stats = FlushStats::default();
        for (id, marks) in self.export_sessions() {
            match flush_session(store, &id, marks, session_ttl).await {
                Ok(()) => stats.written += 1,
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Failed to persist dedup state; skipping");
                    stats.failed += 1;
                }
            }
        }
        info!(
            written = stats.written,
            failed = stats.failed,
            store = store.name(),
            "Flushed dedup state"
        );
        stats
    }

    /// Seed the cache from every session in the store. Returns the number of
    /// sessions loaded.
    pub async fn load_from_store(&self, store: &dyn SessionStore) -> Result<usize> {
        let sessions = store.list().await?;
        let mut loaded = 0;
        for session in sessions {
            let Some(marks) = session.state.get(DEDUP_STATE_KEY).and_then(decode_marks) else {
                continue;
            };
            if marks.is_empty() {
                continue;
            }
            self.load_session(&session.id, marks);
            loaded += 1;
        }
        info!(loaded, store = store.name(), "Loaded dedup state");
        Ok(loaded)
    }
}

async fn flush_session(
    store: &dyn SessionStore,
    id: &str,
    marks: SentMarks,
    session_ttl: Duration,
) -> Result<()> {
    let value = SessionValue::SentMarks(marks);
    if store.get(id).await?.is_some() {
        return store
            .update_state(id, SessionState::from([(DEDUP_STATE_KEY.to_string(), value)]))
            .await;
    }
    let mut session = Session::new(id, "", session_ttl);
    session.state.insert(DEDUP_STATE_KEY.to_string(), value);
    store.create(session).await
}

/// Decode a stored dedup value.
///
/// Accepts native marks and JSON objects whose values are RFC 3339 strings.
/// Entries with unparsable timestamps are skipped; any other shape yields
/// `None`.
pub fn decode_marks(value: &SessionValue) -> Option<SentMarks> {
    match value {
        SessionValue::SentMarks(marks) => Some(marks.clone()),
        SessionValue::Json(serde_json::Value::Object(map)) => Some(
            map.iter()
                .filter_map(|(target, v)| {
                    let at = DateTime::parse_from_rfc3339(v.as_str()?).ok()?;
                    Some((target.clone(), at.with_timezone(&Utc)))
                })
                .collect(),
        ),
        SessionValue::Json(_) => None,
    }
}
