//! Tool-call audit trail.
//!
//! The audit stage builds one [`AuditEvent`] per `tools/call` and hands it to
//! an [`AuditLogger`]. The logger queues events on a bounded channel and a
//! single worker drains them into an [`AuditSink`], so the request path never
//! waits on sink IO.
//!
//! # Sinks
//!
//! | Sink | Storage |
//! |------|---------|
//! | [`TracingAuditSink`] | `tracing::info!` with the event as a JSON field |
//! | [`MemoryAuditStore`] | In-process, queryable, purged by retention |
//! | [`NoopAuditSink`] | Nothing |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::chrono_ttl;
use crate::tasks::PeriodicTask;
use crate::{Error, Result};

/// Queue depth used by [`AuditLogger::new`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

fn is_empty(s: &str) -> bool {
    s.is_empty()
}

/// One audited tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event id
    pub id: String,
    /// When the call started
    pub timestamp: DateTime<Utc>,
    /// Wall time of the call
    pub duration_ms: u64,
    /// Request id shared with the rest of the pipeline
    pub request_id: String,
    /// Client session
    pub session_id: String,
    /// Resolved caller
    pub user_id: String,
    /// Caller email
    #[serde(default, skip_serializing_if = "is_empty")]
    pub user_email: String,
    /// Persona the caller was authorized under
    #[serde(default, skip_serializing_if = "is_empty")]
    pub persona: String,
    /// Tool invoked
    pub tool_name: String,
    /// Toolkit kind (`trino`, `datahub`, `s3`)
    #[serde(default, skip_serializing_if = "is_empty")]
    pub toolkit_kind: String,
    /// Toolkit instance
    #[serde(default, skip_serializing_if = "is_empty")]
    pub toolkit_name: String,
    /// Connection the call ran against
    #[serde(default, skip_serializing_if = "is_empty")]
    pub connection: String,
    /// Tool arguments
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    /// Whether the call returned a non-error result
    pub success: bool,
    /// Error text for failed calls
    #[serde(default, skip_serializing_if = "is_empty")]
    pub error_message: String,
    /// Serialized size of the arguments
    pub request_chars: usize,
    /// Total text length of the result
    pub response_chars: usize,
    /// Number of content blocks in the result
    pub content_blocks: usize,
    /// Transport label (`stdio`, `http`)
    pub transport: String,
    /// Source label
    pub source: String,
    /// Whether enrichment added anything
    pub enrichment_applied: bool,
    /// Whether authorization passed
    pub authorized: bool,
}

impl AuditEvent {
    /// An event for `tool_name` with every other field empty.
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            duration_ms: 0,
            request_id: String::new(),
            session_id: String::new(),
            user_id: String::new(),
            user_email: String::new(),
            persona: String::new(),
            tool_name: tool_name.into(),
            toolkit_kind: String::new(),
            toolkit_name: String::new(),
            connection: String::new(),
            parameters: Map::new(),
            success: false,
            error_message: String::new(),
            request_chars: 0,
            response_chars: 0,
            content_blocks: 0,
            transport: String::new(),
            source: String::new(),
            enrichment_applied: false,
            authorized: false,
        }
    }
}

/// Filter for [`MemoryAuditStore::query`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Exact user id
    pub user_id: Option<String>,
    /// Exact session id
    pub session_id: Option<String>,
    /// Exact tool name
    pub tool_name: Option<String>,
    /// Success flag
    pub success: Option<bool>,
    /// Events at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Maximum number of events, newest first
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn matches(&self, event: &AuditEvent) -> bool {
        self.user_id.as_ref().is_none_or(|u| *u == event.user_id)
            && self.session_id.as_ref().is_none_or(|s| *s == event.session_id)
            && self.tool_name.as_ref().is_none_or(|t| *t == event.tool_name)
            && self.success.is_none_or(|s| s == event.success)
            && self.since.is_none_or(|t| event.timestamp >= t)
    }
}

/// Where audit events end up.
#[async_trait]
pub trait AuditSink: Send + Sync + 'static {
    /// Sink name, for logs.
    fn name(&self) -> &'static str;

    /// Append one event.
    async fn write(&self, event: AuditEvent) -> Result<()>;

    /// Delete events older than `cutoff`, returning how many went.
    async fn purge_before(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }

    /// Release the sink.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn write(&self, _event: AuditEvent) -> Result<()> {
        Ok(())
    }
}

/// Emits each event as a structured log line.
///
/// ```text
/// INFO data_platform_gateway::audit audit={"id":"...","tool_name":"trino_query",...}
/// ```
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn write(&self, event: AuditEvent) -> Result<()> {
        let json = serde_json::to_string(&event)?;
        info!(audit = %json, "tool call audit");
        Ok(())
    }
}

/// In-process audit store.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    events: RwLock<Vec<AuditEvent>>,
    closed: AtomicBool,
}

impl MemoryAuditStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Whether [`AuditSink::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Matching events, newest first.
    pub fn query(&self, filter: &AuditQuery) -> Vec<AuditEvent> {
        let events = self.events.read();
        let matching = events.iter().rev().filter(|e| filter.matches(e)).cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }
}

#[async_trait]
impl AuditSink for MemoryAuditStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write(&self, event: AuditEvent) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Audit("audit store is closed".to_string()));
        }
        self.events.write().push(event);
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        Ok(before - events.len())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Asynchronous front of an [`AuditSink`].
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    tx: Mutex<Option<mpsc::Sender<AuditEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl AuditLogger {
    /// Start a logger over `sink` with the default queue depth.
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self::with_capacity(sink, DEFAULT_QUEUE_CAPACITY)
    }

    /// Start a logger with a queue of `capacity` events.
    pub fn with_capacity(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(capacity.max(1));
        let worker_sink = Arc::clone(&sink);
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let id = event.id.clone();
                if let Err(e) = worker_sink.write(event).await {
                    warn!(
                        sink = worker_sink.name(),
                        event_id = %id,
                        error = %e,
                        "Failed to write audit event"
                    );
                }
            }
            debug!(sink = worker_sink.name(), "Audit queue drained");
        });

        Self {
            sink,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue an event. Never blocks; a full queue drops the event.
    pub fn log(&self, event: AuditEvent) {
        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            debug!(tool = %event.tool_name, "Audit logger closed; event discarded");
            return;
        };
        if let Err(e) = tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "Audit queue full; event dropped");
        }
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The sink events drain into.
    pub fn sink(&self) -> &Arc<dyn AuditSink> {
        &self.sink
    }

    /// Flush queued events, then close the sink. Later calls only close the
    /// sink again.
    pub async fn close(&self) -> Result<()> {
        drop(self.tx.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker
                .await
                .map_err(|e| Error::Audit(format!("audit worker failed: {e}")))?;
        }
        self.sink.close().await
    }
}

/// Periodically purge events older than `retention` from `sink`.
pub fn spawn_retention(
    sink: Arc<dyn AuditSink>,
    retention: Duration,
    interval: Duration,
) -> PeriodicTask {
    PeriodicTask::spawn("audit-retention", interval, move || {
        let sink = Arc::clone(&sink);
        async move {
            let cutoff = Utc::now() - chrono_ttl(retention);
            match sink.purge_before(cutoff).await {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "Purged expired audit events"),
                Err(e) => warn!(error = %e, "Audit retention pass failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(tool: &str, user: &str, success: bool) -> AuditEvent {
        AuditEvent {
            user_id: user.into(),
            success,
            ..AuditEvent::new(tool)
        }
    }

    #[tokio::test]
    async fn test_close_flushes_queue_before_closing_sink() {
        let store = Arc::new(MemoryAuditStore::new());
        let logger = AuditLogger::new(store.clone());
        for i in 0..50 {
            logger.log(event(&format!("tool_{i}"), "u", true));
        }
        logger.close().await.unwrap();

        assert_eq!(store.len(), 50);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_log_after_close_is_discarded() {
        let store = Arc::new(MemoryAuditStore::new());
        let logger = AuditLogger::new(store.clone());
        logger.close().await.unwrap();
        logger.log(event("late", "u", true));
        assert!(store.is_empty());
        logger.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_filters_newest_first() {
        let store = MemoryAuditStore::new();
        store.write(event("a", "ana", true)).await.unwrap();
        store.write(event("b", "bo", false)).await.unwrap();
        store.write(event("c", "ana", false)).await.unwrap();

        let ana = store.query(&AuditQuery {
            user_id: Some("ana".into()),
            ..AuditQuery::default()
        });
        assert_eq!(
            ana.iter().map(|e| e.tool_name.as_str()).collect::<Vec<_>>(),
            vec!["c", "a"]
        );

        let failed = store.query(&AuditQuery {
            success: Some(false),
            limit: Some(1),
            ..AuditQuery::default()
        });
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].tool_name, "c");
    }

    #[tokio::test]
    async fn test_purge_before_cutoff() {
        let store = MemoryAuditStore::new();
        let mut old = event("old", "u", true);
        old.timestamp = Utc::now() - chrono::Duration::days(100);
        store.write(old).await.unwrap();
        store.write(event("new", "u", true)).await.unwrap();

        let purged = store
            .purge_before(Utc::now() - chrono::Duration::days(90))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.query(&AuditQuery::default())[0].tool_name, "new");
    }

    #[tokio::test]
    async fn test_retention_task_purges() {
        let store = Arc::new(MemoryAuditStore::new());
        let mut old = event("old", "u", true);
        old.timestamp = Utc::now() - chrono::Duration::days(2);
        store.write(old).await.unwrap();

        let mut task = spawn_retention(
            store.clone(),
            Duration::from_secs(24 * 60 * 60),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.stop().await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_writes() {
        let store = MemoryAuditStore::new();
        store.close().await.unwrap();
        assert!(matches!(
            store.write(event("t", "u", true)).await,
            Err(Error::Audit(_))
        ));
    }

    #[test]
    fn test_empty_fields_skipped_in_json() {
        let json = serde_json::to_value(event("trino_query", "u", true)).unwrap();
        assert!(json.get("user_email").is_none());
        assert!(json.get("parameters").is_none());
        assert_eq!(json["tool_name"], "trino_query");
    }
}
