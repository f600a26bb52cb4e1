//! UI resource metadata on listed tools

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{Handler, Method, Middleware, Request, Response, Tool};
use crate::Result;
use crate::config::McpAppsConfig;

/// Adds `_meta.ui.resourceUri` to tools that belong to an app.
#[derive(Debug, Clone, Default)]
pub struct UiMetadataStage {
    resource_by_tool: HashMap<String, String>,
}

impl UiMetadataStage {
    /// Build from config. Disabled apps are skipped; an app without a
    /// resource URI gets `ui://<app>`. When two apps claim a tool the first
    /// by name wins.
    pub fn new(config: &McpAppsConfig) -> Self {
        let mut resource_by_tool = HashMap::new();
        for (name, app) in &config.apps {
            if !app.enabled {
                continue;
            }
            let uri = if app.resource_uri.is_empty() {
                format!("ui://{name}")
            } else {
                app.resource_uri.clone()
            };
            for tool in &app.tools {
                resource_by_tool.entry(tool.clone()).or_insert_with(|| uri.clone());
            }
        }
        Self { resource_by_tool }
    }

    /// Whether any tool gets metadata.
    pub fn has_apps(&self) -> bool {
        !self.resource_by_tool.is_empty()
    }

    fn annotate(&self, tool: &mut Tool) {
        let Some(uri) = self.resource_by_tool.get(&tool.name) else {
            return;
        };
        let meta = tool.meta.get_or_insert_with(Map::new);
        let ui = meta.entry("ui").or_insert_with(|| json!({}));
        if let Value::Object(ui) = ui {
            ui.insert("resourceUri".to_string(), Value::String(uri.clone()));
        }
    }
}

#[async_trait]
impl Middleware for UiMetadataStage {
    fn name(&self) -> &'static str {
        "ui_metadata"
    }

    async fn handle(&self, request: Request, next: &dyn Handler) -> Result<Response> {
        let listing = matches!(request.method, Method::ListTools);
        let response = next.handle(request).await?;
        Ok(match response {
            Response::Tools(mut tools) if listing => {
                tools.iter_mut().for_each(|t| self.annotate(t));
                Response::Tools(tools)
            }
            other => other,
        })
    }
}
