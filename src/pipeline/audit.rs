//! Audit stage

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Map;

use super::{Handler, Method, Middleware, PlatformContext, Request, Response};
use crate::Result;
use crate::audit::{AuditEvent, AuditLogger};

/// Records one [`AuditEvent`] per `tools/call`.
///
/// Sits inside the auth stage so the event carries the resolved identity,
/// and outside every optional stage so no enabled call goes unrecorded.
pub struct AuditStage {
    logger: Arc<AuditLogger>,
}

impl AuditStage {
    /// Log through `logger`.
    pub fn new(logger: Arc<AuditLogger>) -> Self {
        Self { logger }
    }
}

struct CallShape {
    parameters: Map<String, serde_json::Value>,
    request_chars: usize,
}

fn event_from(
    ctx: PlatformContext,
    shape: CallShape,
    outcome: &Result<Response>,
    elapsed_ms: u64,
) -> AuditEvent {
    let mut event = AuditEvent::new(ctx.tool_name);
    event.timestamp = ctx.started_at;
    event.duration_ms = elapsed_ms;
    event.request_id = ctx.request_id;
    event.session_id = ctx.session_id;
    event.user_id = ctx.user_id;
    event.user_email = ctx.user_email;
    event.persona = ctx.persona;
    event.toolkit_kind = ctx.toolkit_kind;
    event.toolkit_name = ctx.toolkit_name;
    event.connection = ctx.connection;
    event.parameters = shape.parameters;
    event.request_chars = shape.request_chars;
    event.transport = ctx.transport;
    event.source = ctx.source;
    event.enrichment_applied = ctx.enrichment_applied;
    event.authorized = ctx.authorized;

    match outcome {
        Ok(Response::CallResult(result)) => {
            event.success = !result.is_error;
            event.response_chars = result.text_len();
            event.content_blocks = result.content.len();
            if result.is_error {
                event.error_message = result.first_text().unwrap_or_default().to_string();
            }
        }
        Ok(Response::Tools(_)) => event.success = true,
        Err(e) => {
            event.success = false;
            event.error_message = e.to_string();
        }
    }
    event
}

#[async_trait]
impl Middleware for AuditStage {
    fn name(&self) -> &'static str {
        "audit"
    }

    async fn handle(&self, request: Request, next: &dyn Handler) -> Result<Response> {
        let Method::CallTool { name, arguments } = &request.method else {
            return next.handle(request).await;
        };
        request.context.update(|ctx| {
            if ctx.tool_name.is_empty() {
                ctx.tool_name.clone_from(name);
            }
        });
        let shape = CallShape {
            request_chars: serde_json::to_string(arguments).map(|s| s.len()).unwrap_or_default(),
            parameters: arguments.clone(),
        };
        let context = request.context.clone();
        let started = Instant::now();

        let outcome = next.handle(request).await;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let ctx = context.update(|ctx| {
            if let Ok(Response::CallResult(result)) = &outcome {
                ctx.success = !result.is_error;
                if result.is_error {
                    ctx.error_message = result.first_text().unwrap_or_default().to_string();
                }
            }
            ctx.clone()
        });
        self.logger.log(event_from(ctx, shape, &outcome, elapsed_ms));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::audit::{AuditQuery, MemoryAuditStore};
    use crate::pipeline::testing::{StaticHandler, args};
    use crate::pipeline::{CallToolResult, ErrorCategory};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn handle(&self, _request: Request) -> Result<Response> {
            Err(Error::Provider("backend down".into()))
        }
    }

    fn setup() -> (Arc<MemoryAuditStore>, Arc<AuditLogger>, AuditStage) {
        let store = Arc::new(MemoryAuditStore::new());
        let logger = Arc::new(AuditLogger::new(store.clone()));
        let stage = AuditStage::new(Arc::clone(&logger));
        (store, logger, stage)
    }

    #[tokio::test]
    async fn test_records_successful_call() {
        let (store, logger, stage) = setup();
        let request =
            Request::call_tool("trino_query", args(json!({"sql": "select 1"}))).with_session("s1");
        request.context.update(|ctx| {
            ctx.user_id = "ana".into();
            ctx.authorized = true;
        });

        stage.handle(request, &StaticHandler::text("12345")).await.unwrap();
        logger.close().await.unwrap();

        let events = store.query(&AuditQuery::default());
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.user_id, "ana");
        assert_eq!(event.tool_name, "trino_query");
        assert_eq!(event.session_id, "s1");
        assert!(event.success);
        assert!(event.authorized);
        assert_eq!(event.response_chars, 5);
        assert_eq!(event.content_blocks, 1);
        assert_eq!(event.request_chars, r#"{"sql":"select 1"}"#.len());
        assert_eq!(event.parameters["sql"], "select 1");
    }

    #[tokio::test]
    async fn test_records_error_result_message() {
        let (store, logger, stage) = setup();
        let handler = StaticHandler {
            tools: Vec::new(),
            result: CallToolResult::error(ErrorCategory::ToolError, "table not found"),
        };
        stage
            .handle(Request::call_tool("trino_query", Default::default()), &handler)
            .await
            .unwrap();
        logger.close().await.unwrap();

        let event = &store.query(&AuditQuery::default())[0];
        assert!(!event.success);
        assert_eq!(event.error_message, "table not found");
    }

    #[tokio::test]
    async fn test_records_handler_error_and_propagates_it() {
        let (store, logger, stage) = setup();
        let outcome = stage
            .handle(Request::call_tool("trino_query", Default::default()), &Failing)
            .await;
        assert!(outcome.is_err());
        logger.close().await.unwrap();

        let event = &store.query(&AuditQuery::default())[0];
        assert!(!event.success);
        assert!(event.error_message.contains("backend down"));
    }

    #[tokio::test]
    async fn test_listing_not_audited() {
        let (store, logger, stage) = setup();
        stage
            .handle(Request::list_tools(), &StaticHandler::tools(&["a"]))
            .await
            .unwrap();
        logger.close().await.unwrap();
        assert!(store.is_empty());
    }
}
