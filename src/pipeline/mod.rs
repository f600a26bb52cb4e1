//! Tool-call pipeline
//!
//! A [`Request`] passes through an ordered stack of [`Middleware`] stages
//! before reaching the backend [`Handler`]. Stages share one
//! [`PlatformContext`] per call through the request's [`CallContext`].
//!
//! Stages are assembled by [`PipelineBuilder`] in their logical order:
//!
//! | Stage | Applies to |
//! |-------|------------|
//! | [`VisibilityStage`] | `tools/list` |
//! | [`UiMetadataStage`] | `tools/list` |
//! | [`AuthStage`] | `tools/call` |
//! | [`AuditStage`] | `tools/call` |
//! | [`RulesStage`] | `tools/call` |
//! | [`EnrichmentStage`] | `tools/call` |

mod audit;
mod auth;
mod builder;
mod enrichment;
mod rules;
mod sql;
mod ui_metadata;
mod visibility;

pub use audit::AuditStage;
pub use auth::{AllowAll, AuthStage, Authorization, Authorizer};
pub use builder::{Pipeline, PipelineBuilder, Stage};
pub use enrichment::{EnrichmentSettings, EnrichmentStage};
pub use rules::{
    DEFAULT_DISCOVERY_TOOLS, DEFAULT_ESCALATION_MESSAGE, DEFAULT_QUERY_TOOLS,
    DEFAULT_WARNING_MESSAGE, RulesStage, WorkflowTracker,
};
pub use sql::{TableRef, extract_tables};
pub use ui_metadata::UiMetadataStage;
pub use visibility::{VisibilityStage, is_tool_visible};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;
use crate::auth::Credentials;

/// Session id used when the transport has no session concept.
pub const DEFAULT_SESSION_ID: &str = "stdio";

/// A tool exposed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name
    pub name: String,
    /// Human-readable title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Tool description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input JSON Schema
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
    /// Client-facing metadata
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl Tool {
    /// A tool with an empty object schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
            meta: None,
        }
    }
}

/// Content item in a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    /// Text content
    #[serde(rename = "text")]
    Text {
        /// Text value
        text: String,
    },
    /// Image content
    #[serde(rename = "image")]
    Image {
        /// Base64-encoded data
        data: String,
        /// MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Resource link
    #[serde(rename = "resource_link")]
    ResourceLink {
        /// Resource URI
        uri: String,
        /// Resource name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl Content {
    /// Text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The text, for text content.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Why a call was declined or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// No scheme accepted the caller
    AuthenticationFailed,
    /// The caller may not use this tool
    AuthorizationDenied,
    /// The tool itself reported an error
    ToolError,
}

impl ErrorCategory {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::AuthorizationDenied => "authorization_denied",
            Self::ToolError => "tool_error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a `tools/call`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Content items
    pub content: Vec<Content>,
    /// Whether the result is an error
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    /// Category of the error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
}

impl CallToolResult {
    /// A successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
            error_category: None,
        }
    }

    /// An error result.
    pub fn error(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
            error_category: Some(category),
        }
    }

    /// Total length of the text content.
    pub fn text_len(&self) -> usize {
        self.content.iter().filter_map(Content::as_text).map(str::len).sum()
    }

    /// First text block, used as the error message of failed calls.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(Content::as_text)
    }

    /// Append a JSON value as a text block.
    pub fn push_json(&mut self, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.content.push(Content::text(text));
        Ok(())
    }
}

/// What the client asked for
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    /// `tools/list`
    ListTools,
    /// `tools/call`
    CallTool {
        /// Tool name
        name: String,
        /// Tool arguments
        arguments: Map<String, Value>,
    },
}

/// Per-call state shared by every stage.
#[derive(Debug, Clone)]
pub struct PlatformContext {
    /// Unique id of this call
    pub request_id: String,
    /// Client session
    pub session_id: String,
    /// When the call entered the pipeline
    pub started_at: DateTime<Utc>,
    /// Resolved caller
    pub user_id: String,
    /// Caller email
    pub user_email: String,
    /// Caller claims
    pub claims: Map<String, Value>,
    /// Caller roles
    pub roles: Vec<String>,
    /// Persona the caller was authorized under
    pub persona: String,
    /// Tool invoked
    pub tool_name: String,
    /// Toolkit kind serving the tool
    pub toolkit_kind: String,
    /// Toolkit instance serving the tool
    pub toolkit_name: String,
    /// Connection the call runs against
    pub connection: String,
    /// Whether authorization passed
    pub authorized: bool,
    /// Denial reason
    pub authz_error: String,
    /// Transport label
    pub transport: String,
    /// Source label
    pub source: String,
    /// Whether enrichment added anything
    pub enrichment_applied: bool,
    /// Whether the call succeeded
    pub success: bool,
    /// Error text of a failed call
    pub error_message: String,
}

impl PlatformContext {
    /// Fresh context for `session_id` with a new request id.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            started_at: Utc::now(),
            user_id: String::new(),
            user_email: String::new(),
            claims: Map::new(),
            roles: Vec::new(),
            persona: String::new(),
            tool_name: String::new(),
            toolkit_kind: String::new(),
            toolkit_name: String::new(),
            connection: String::new(),
            authorized: false,
            authz_error: String::new(),
            transport: String::new(),
            source: String::new(),
            enrichment_applied: false,
            success: false,
            error_message: String::new(),
        }
    }
}

/// Shared handle to a call's [`PlatformContext`].
#[derive(Debug, Clone)]
pub struct CallContext(Arc<Mutex<PlatformContext>>);

impl CallContext {
    /// Wrap a context.
    pub fn new(context: PlatformContext) -> Self {
        Self(Arc::new(Mutex::new(context)))
    }

    /// Mutate the context.
    pub fn update<R>(&self, f: impl FnOnce(&mut PlatformContext) -> R) -> R {
        f(&mut self.0.lock())
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> PlatformContext {
        self.0.lock().clone()
    }
}

/// One inbound call
#[derive(Debug, Clone)]
pub struct Request {
    /// What is being asked
    pub method: Method,
    /// Client session
    pub session_id: String,
    /// Presented credentials
    pub credentials: Credentials,
    /// Transport label (`stdio`, `http`)
    pub transport: String,
    /// Source label
    pub source: String,
    /// Context shared by every stage
    pub context: CallContext,
}

impl Request {
    fn with_method(method: Method) -> Self {
        Self {
            method,
            session_id: DEFAULT_SESSION_ID.to_string(),
            credentials: Credentials::default(),
            transport: "stdio".to_string(),
            source: "mcp".to_string(),
            context: CallContext::new(PlatformContext::new(DEFAULT_SESSION_ID)),
        }
    }

    /// A `tools/list` request.
    pub fn list_tools() -> Self {
        Self::with_method(Method::ListTools)
    }

    /// A `tools/call` request.
    pub fn call_tool(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self::with_method(Method::CallTool {
            name: name.into(),
            arguments,
        })
    }

    /// Set the session. An empty id keeps the default.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        if !session_id.is_empty() {
            self.context.update(|ctx| ctx.session_id.clone_from(&session_id));
            self.session_id = session_id;
        }
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the transport label.
    #[must_use]
    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = transport.into();
        self
    }

    /// Tool name of a `tools/call`.
    pub fn tool_name(&self) -> Option<&str> {
        match &self.method {
            Method::CallTool { name, .. } => Some(name),
            Method::ListTools => None,
        }
    }

    /// Arguments of a `tools/call`.
    pub fn arguments(&self) -> Option<&Map<String, Value>> {
        match &self.method {
            Method::CallTool { arguments, .. } => Some(arguments),
            Method::ListTools => None,
        }
    }

    /// String argument `key` of a `tools/call`, if present and non-empty.
    pub fn string_arg(&self, key: &str) -> Option<&str> {
        self.arguments()
            .and_then(|args| args.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// What the pipeline returns
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `tools/list` result
    Tools(Vec<Tool>),
    /// `tools/call` result
    CallResult(CallToolResult),
}

impl Response {
    /// The call result, if this is one.
    pub fn as_call_result(&self) -> Option<&CallToolResult> {
        match self {
            Self::CallResult(result) => Some(result),
            Self::Tools(_) => None,
        }
    }

    /// The tool list, if this is one.
    pub fn as_tools(&self) -> Option<&[Tool]> {
        match self {
            Self::Tools(tools) => Some(tools),
            Self::CallResult(_) => None,
        }
    }
}

/// Terminal request handler
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one request.
    async fn handle(&self, request: Request) -> Result<Response>;
}

/// A pipeline stage wrapping the handler that follows it.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stage name, for logs.
    fn name(&self) -> &'static str;

    /// Handle `request`, calling `next` to continue inward.
    async fn handle(&self, request: Request, next: &dyn Handler) -> Result<Response>;
}

/// Handler that lists no tools and answers every call with an error.
#[derive(Debug, Default)]
pub struct UnroutedHandler;

#[async_trait]
impl Handler for UnroutedHandler {
    async fn handle(&self, request: Request) -> Result<Response> {
        Ok(match request.method {
            Method::ListTools => Response::Tools(Vec::new()),
            Method::CallTool { name, .. } => Response::CallResult(CallToolResult::error(
                ErrorCategory::ToolError,
                format!("no backend handles tool {name:?}"),
            )),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Handler returning fixed tools and a fixed call result.
    pub struct StaticHandler {
        pub tools: Vec<Tool>,
        pub result: CallToolResult,
    }

    impl StaticHandler {
        pub fn text(text: &str) -> Self {
            Self {
                tools: Vec::new(),
                result: CallToolResult::text(text),
            }
        }

        pub fn tools(names: &[&str]) -> Self {
            Self {
                tools: names.iter().map(|n| Tool::new(*n)).collect(),
                result: CallToolResult::text("ok"),
            }
        }
    }

    #[async_trait]
    impl Handler for StaticHandler {
        async fn handle(&self, request: Request) -> Result<Response> {
            Ok(match request.method {
                Method::ListTools => Response::Tools(self.tools.clone()),
                Method::CallTool { .. } => Response::CallResult(self.result.clone()),
            })
        }
    }

    pub fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let request = Request::call_tool("trino_query", Map::new()).with_session("");
        assert_eq!(request.session_id, DEFAULT_SESSION_ID);
        assert_eq!(request.tool_name(), Some("trino_query"));
        assert_eq!(request.context.snapshot().session_id, DEFAULT_SESSION_ID);
    }

    #[test]
    fn test_with_session_updates_context() {
        let request = Request::list_tools().with_session("abc");
        assert_eq!(request.context.snapshot().session_id, "abc");
        assert_eq!(request.tool_name(), None);
    }

    #[test]
    fn test_string_arg_skips_empty_and_non_strings() {
        let request = Request::call_tool("t", testing::args(json!({"a": "x", "b": "", "c": 3})));
        assert_eq!(request.string_arg("a"), Some("x"));
        assert_eq!(request.string_arg("b"), None);
        assert_eq!(request.string_arg("c"), None);
    }

    #[test]
    fn test_result_text_len_counts_text_only() {
        let mut result = CallToolResult::text("abc");
        result.content.push(Content::Image {
            data: "AAAA".into(),
            mime_type: "image/png".into(),
        });
        result.content.push(Content::text("de"));
        assert_eq!(result.text_len(), 5);
    }

    #[test]
    fn test_tool_meta_serializes_as_underscore_meta() {
        let mut tool = Tool::new("x");
        tool.meta = Some(testing::args(json!({"ui": {}})));
        let value = serde_json::to_value(&tool).unwrap();
        assert!(value.get("_meta").is_some());
        assert_eq!(value["inputSchema"], json!({"type": "object"}));
    }

    #[test]
    fn test_error_category_wire_names() {
        assert_eq!(
            serde_json::to_value(ErrorCategory::AuthorizationDenied).unwrap(),
            json!("authorization_denied")
        );
        assert_eq!(ErrorCategory::AuthenticationFailed.to_string(), "authentication_failed");
    }

    #[tokio::test]
    async fn test_unrouted_handler() {
        let response = UnroutedHandler
            .handle(Request::call_tool("x", Map::new()))
            .await
            .unwrap();
        assert!(response.as_call_result().unwrap().is_error);
    }
}
