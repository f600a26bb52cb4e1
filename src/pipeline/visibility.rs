//! `tools/list` filtering by glob pattern
//!
//! This only shapes what clients see. Calls to hidden tools are still
//! decided by the auth stage.

use async_trait::async_trait;
use glob::Pattern;
use tracing::debug;

use super::{Handler, Method, Middleware, Request, Response};
use crate::Result;
use crate::config::ToolVisibilityConfig;

/// Allow/deny filter over listed tools.
#[derive(Debug, Clone, Default)]
pub struct VisibilityStage {
    allow: Vec<Pattern>,
    deny: Vec<Pattern>,
}

fn compile(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                debug!(pattern = %p, error = %e, "Ignoring invalid tool visibility pattern");
                None
            }
        })
        .collect()
}

impl VisibilityStage {
    /// Build from config. Invalid patterns are dropped and match nothing.
    pub fn new(config: &ToolVisibilityConfig) -> Self {
        Self {
            allow: compile(&config.allow),
            deny: compile(&config.deny),
        }
    }

    /// Whether `name` survives the filter.
    pub fn is_visible(&self, name: &str) -> bool {
        if !self.allow.is_empty() && !self.allow.iter().any(|p| p.matches(name)) {
            return false;
        }
        !self.deny.iter().any(|p| p.matches(name))
    }
}

/// Whether `name` is visible under raw `allow`/`deny` patterns.
///
/// With no patterns every tool is visible. An allow list keeps only its
/// matches, then deny removes from what is left.
pub fn is_tool_visible(name: &str, allow: &[String], deny: &[String]) -> bool {
    VisibilityStage::new(&ToolVisibilityConfig {
        allow: allow.to_vec(),
        deny: deny.to_vec(),
    })
    .is_visible(name)
}

#[async_trait]
impl Middleware for VisibilityStage {
    fn name(&self) -> &'static str {
        "visibility"
    }

    async fn handle(&self, request: Request, next: &dyn Handler) -> Result<Response> {
        let listing = matches!(request.method, Method::ListTools);
        let response = next.handle(request).await?;
        Ok(match response {
            Response::Tools(tools) if listing => {
                Response::Tools(tools.into_iter().filter(|t| self.is_visible(&t.name)).collect())
            }
            other => other,
        })
    }
}
