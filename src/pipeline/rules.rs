//! Discovery-before-query workflow hints

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{Content, Handler, Method, Middleware, Request, Response};
use crate::Result;
use crate::config::WorkflowConfig;
use crate::tasks::PeriodicTask;

/// Catalog tools that count as discovery.
pub const DEFAULT_DISCOVERY_TOOLS: &[&str] = &[
    "datahub_search",
    "datahub_get_entity",
    "datahub_get_schema",
    "datahub_get_lineage",
    "datahub_get_column_lineage",
    "datahub_get_queries",
    "datahub_get_glossary_term",
    "datahub_get_data_product",
    "datahub_list_data_products",
    "datahub_list_domains",
    "datahub_list_tags",
];

/// Query engine tools that should follow discovery.
pub const DEFAULT_QUERY_TOOLS: &[&str] = &["trino_query", "trino_execute"];

/// Warning prepended to a query made before discovery.
pub const DEFAULT_WARNING_MESSAGE: &str =
    "REQUIRED: You must call datahub_search first to discover the table's \
     business context (descriptions, owners, tags, glossary terms) before running queries. \
     This ensures you understand the data semantics and any access restrictions.";

/// Warning used once the session keeps querying without discovery.
pub const DEFAULT_ESCALATION_MESSAGE: &str =
    "MANDATORY: datahub_search has not been called yet ({count} queries \
     without discovery). Call datahub_search NOW before issuing any more SQL. \
     Querying without understanding the data context risks incorrect results \
     and policy violations.";

#[derive(Debug)]
struct WorkflowState {
    discovery_calls: usize,
    warnings: u32,
    last_access: Instant,
}

impl WorkflowState {
    fn new() -> Self {
        Self {
            discovery_calls: 0,
            warnings: 0,
            last_access: Instant::now(),
        }
    }
}

/// Per-session record of discovery calls and warnings.
pub struct WorkflowTracker {
    sessions: RwLock<HashMap<String, WorkflowState>>,
    discovery: HashSet<String>,
    query: HashSet<String>,
    session_timeout: Duration,
    cleanup: Mutex<Option<PeriodicTask>>,
}

fn tool_set(configured: &[String], defaults: &[&str]) -> HashSet<String> {
    if configured.is_empty() {
        defaults.iter().map(|t| (*t).to_string()).collect()
    } else {
        configured.iter().cloned().collect()
    }
}

impl WorkflowTracker {
    /// Build from tool lists; empty lists use the defaults.
    pub fn new(discovery: &[String], query: &[String], session_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            discovery: tool_set(discovery, DEFAULT_DISCOVERY_TOOLS),
            query: tool_set(query, DEFAULT_QUERY_TOOLS),
            session_timeout,
            cleanup: Mutex::new(None),
        }
    }

    /// Build from the workflow config.
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self::new(&config.discovery_tools, &config.query_tools, config.session_timeout)
    }

    /// Note that `session` called `tool`. A discovery call clears the
    /// warning count.
    pub fn record_call(&self, session: &str, tool: &str) {
        let mut sessions = self.sessions.write();
        let state = sessions.entry(session.to_string()).or_insert_with(WorkflowState::new);
        state.last_access = Instant::now();
        if self.discovery.contains(tool) {
            state.discovery_calls += 1;
            state.warnings = 0;
        }
    }

    /// Whether `session` has made any discovery call.
    pub fn has_performed_discovery(&self, session: &str) -> bool {
        self.sessions
            .read()
            .get(session)
            .is_some_and(|s| s.discovery_calls > 0)
    }

    /// Bump and return the session's warning count.
    pub fn increment_warnings(&self, session: &str) -> u32 {
        let mut sessions = self.sessions.write();
        let state = sessions.entry(session.to_string()).or_insert_with(WorkflowState::new);
        state.last_access = Instant::now();
        state.warnings += 1;
        state.warnings
    }

    /// Current warning count.
    pub fn warning_count(&self, session: &str) -> u32 {
        self.sessions.read().get(session).map_or(0, |s| s.warnings)
    }

    /// Whether `tool` is a query tool.
    pub fn is_query_tool(&self, tool: &str) -> bool {
        self.query.contains(tool)
    }

    /// Whether `tool` is a discovery tool.
    pub fn is_discovery_tool(&self, tool: &str) -> bool {
        self.discovery.contains(tool)
    }

    /// Tracked sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Drop sessions idle longer than `idle`. Returns how many went.
    pub fn purge_idle(&self, idle: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.last_access.elapsed() <= idle);
        before - sessions.len()
    }

    /// Drop sessions idle past the session timeout.
    pub fn cleanup(&self) -> usize {
        self.purge_idle(self.session_timeout)
    }

    /// Start periodic cleanup. Replaces a running task.
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) {
        let weak = Arc::downgrade(self);
        let task = PeriodicTask::spawn("workflow-cleanup", interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(tracker) = weak.upgrade() {
                    let purged = tracker.cleanup();
                    if purged > 0 {
                        debug!(purged, "Purged idle workflow sessions");
                    }
                }
            }
        });
        *self.cleanup.lock() = Some(task);
    }

    /// Stop periodic cleanup.
    pub async fn stop(&self) {
        let task = self.cleanup.lock().take();
        if let Some(mut task) = task {
            task.stop().await;
        }
    }
}

/// Prepends workflow hints to query results made before discovery.
pub struct RulesStage {
    tracker: Arc<WorkflowTracker>,
    warning_message: String,
    escalation_after: u32,
    escalation_message: String,
}

fn or_default(configured: &str, default: &str) -> String {
    if configured.is_empty() {
        default.to_string()
    } else {
        configured.to_string()
    }
}

impl RulesStage {
    /// Build over `tracker` with the messages from `config`.
    pub fn new(tracker: Arc<WorkflowTracker>, config: &WorkflowConfig) -> Self {
        Self {
            tracker,
            warning_message: or_default(&config.warning_message, DEFAULT_WARNING_MESSAGE),
            escalation_after: config.escalation_after,
            escalation_message: or_default(&config.escalation_message, DEFAULT_ESCALATION_MESSAGE),
        }
    }

    fn hints(&self, session: &str, tool: &str) -> Vec<String> {
        if !self.tracker.is_query_tool(tool) || self.tracker.has_performed_discovery(session) {
            return Vec::new();
        }
        let count = self.tracker.increment_warnings(session);
        if self.escalation_after > 0 && count > self.escalation_after {
            vec![self.escalation_message.replace("{count}", &count.to_string())]
        } else {
            vec![self.warning_message.clone()]
        }
    }
}

#[async_trait]
impl Middleware for RulesStage {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn handle(&self, request: Request, next: &dyn Handler) -> Result<Response> {
        let hints = match &request.method {
            Method::CallTool { name, .. } => self.hints(&request.session_id, name),
            Method::ListTools => Vec::new(),
        };
        let response = next.handle(request).await?;
        if hints.is_empty() {
            return Ok(response);
        }
        Ok(match response {
            Response::CallResult(mut result) if !result.is_error => {
                let text = format!("{}\n\n---\n\n", hints.join("\n"));
                result.content.insert(0, Content::text(text));
                Response::CallResult(result)
            }
            other => other,
        })
    }
}
