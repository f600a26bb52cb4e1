//! Authentication and authorization of tool calls
//!
//! Declines are returned as error results the client can read, never as
//! pipeline errors.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    CallToolResult, ErrorCategory, Handler, Method, Middleware, Request, Response, WorkflowTracker,
};
use crate::Result;
use crate::auth::{Authenticator, UserInfo};
use crate::toolkits::ToolkitRegistry;

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Whether the call may proceed
    pub allowed: bool,
    /// Persona the decision was made under
    pub persona: String,
    /// Denial reason
    pub reason: String,
}

impl Authorization {
    /// Allowed under `persona`.
    pub fn allow(persona: impl Into<String>) -> Self {
        Self {
            allowed: true,
            persona: persona.into(),
            reason: String::new(),
        }
    }

    /// Denied under `persona` for `reason`.
    pub fn deny(persona: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            persona: persona.into(),
            reason: reason.into(),
        }
    }
}

/// Decides whether an identity may call a tool.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Check `user` against `tool`.
    async fn authorize(&self, user: &UserInfo, tool: &str) -> Authorization;
}

/// Allows every call.
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _user: &UserInfo, _tool: &str) -> Authorization {
        Authorization::allow("default")
    }
}

/// Resolves the caller and the toolkit, then asks the [`Authorizer`].
pub struct AuthStage {
    authenticator: Arc<dyn Authenticator>,
    authorizer: Arc<dyn Authorizer>,
    toolkits: Arc<dyn ToolkitRegistry>,
    workflow: Option<Arc<WorkflowTracker>>,
}

impl AuthStage {
    /// Build the stage.
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        authorizer: Arc<dyn Authorizer>,
        toolkits: Arc<dyn ToolkitRegistry>,
    ) -> Self {
        Self {
            authenticator,
            authorizer,
            toolkits,
            workflow: None,
        }
    }

    /// Record authorized calls with `tracker`.
    #[must_use]
    pub fn with_workflow(mut self, tracker: Arc<WorkflowTracker>) -> Self {
        self.workflow = Some(tracker);
        self
    }

    fn populate(&self, request: &Request, tool: &str) {
        let toolkit = self.toolkits.lookup(tool);
        let connection_arg = request.string_arg("connection").map(String::from);
        request.context.update(|ctx| {
            ctx.tool_name = tool.to_string();
            ctx.session_id.clone_from(&request.session_id);
            ctx.transport.clone_from(&request.transport);
            ctx.source.clone_from(&request.source);
            if let Some(info) = toolkit {
                ctx.toolkit_kind = info.kind;
                ctx.toolkit_name = info.name;
                ctx.connection = info.connection;
            }
            if let Some(conn) = connection_arg {
                ctx.connection = conn;
            }
        });
    }
}

#[async_trait]
impl Middleware for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(&self, request: Request, next: &dyn Handler) -> Result<Response> {
        let tool = match &request.method {
            Method::CallTool { name, .. } => name.clone(),
            Method::ListTools => return next.handle(request).await,
        };
        self.populate(&request, &tool);
        let request_id = request.context.update(|ctx| ctx.request_id.clone());

        let user = match self.authenticator.authenticate(&request.credentials).await {
            Ok(user) => user,
            Err(e) => {
                warn!(
                    tool = %tool,
                    request_id = %request_id,
                    error = %e,
                    "Tool call authentication failed"
                );
                return Ok(Response::CallResult(CallToolResult::error(
                    ErrorCategory::AuthenticationFailed,
                    format!("authentication failed: {e}"),
                )));
            }
        };
        request.context.update(|ctx| {
            ctx.user_id.clone_from(&user.user_id);
            ctx.user_email.clone_from(&user.email);
            ctx.claims.clone_from(&user.claims);
            ctx.roles.clone_from(&user.roles);
        });

        let decision = self.authorizer.authorize(&user, &tool).await;
        request.context.update(|ctx| {
            ctx.authorized = decision.allowed;
            ctx.persona.clone_from(&decision.persona);
            ctx.authz_error.clone_from(&decision.reason);
        });
        if !decision.allowed {
            warn!(
                tool = %tool,
                user_id = %user.user_id,
                persona = %decision.persona,
                reason = %decision.reason,
                request_id = %request_id,
                "Tool call authorization denied"
            );
            return Ok(Response::CallResult(CallToolResult::error(
                ErrorCategory::AuthorizationDenied,
                format!("not authorized: {}", decision.reason),
            )));
        }

        debug!(
            tool = %tool,
            user_id = %user.user_id,
            persona = %decision.persona,
            auth_type = %user.auth_type,
            request_id = %request_id,
            "Tool call authorized"
        );
        if let Some(tracker) = &self.workflow {
            tracker.record_call(&request.session_id, &tool);
        }
        next.handle(request).await
    }
}
