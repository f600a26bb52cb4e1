//! Pipeline assembly
//!
//! Stages are given in logical order and each position is fixed by its
//! [`Stage`] key, so a stage that is left out never shifts the others.
//! Wrapping happens innermost first: the handler is wrapped by the last
//! stage, that by the one before, and so on out to the first.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Handler, Middleware, Request, Response};
use crate::Result;

/// Pipeline positions, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Tool list filtering
    Visibility,
    /// Client-facing tool metadata
    UiMetadata,
    /// Authentication and authorization
    Auth,
    /// Audit logging
    Audit,
    /// Workflow rules and hints
    Rules,
    /// Response enrichment
    Enrichment,
}

impl Stage {
    /// Every stage, outermost first.
    pub const ALL: [Stage; 6] = [
        Stage::Visibility,
        Stage::UiMetadata,
        Stage::Auth,
        Stage::Audit,
        Stage::Rules,
        Stage::Enrichment,
    ];

    /// Stage name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visibility => "visibility",
            Self::UiMetadata => "ui_metadata",
            Self::Auth => "auth",
            Self::Audit => "audit",
            Self::Rules => "rules",
            Self::Enrichment => "enrichment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collects stages, then wraps a handler with them.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: BTreeMap<Stage, Arc<dyn Middleware>>,
}

impl PipelineBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `middleware` at `stage`, replacing whatever was there.
    #[must_use]
    pub fn stage(mut self, stage: Stage, middleware: Arc<dyn Middleware>) -> Self {
        self.stages.insert(stage, middleware);
        self
    }

    /// Put `middleware` at `stage` only when `enabled`.
    #[must_use]
    pub fn stage_if(
        self,
        enabled: bool,
        stage: Stage,
        middleware: impl FnOnce() -> Arc<dyn Middleware>,
    ) -> Self {
        if enabled {
            self.stage(stage, middleware())
        } else {
            self
        }
    }

    /// Registered stages, outermost first.
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.keys().copied().collect()
    }

    /// Wrap `handler` with every registered stage.
    pub fn build(self, handler: Arc<dyn Handler>) -> Pipeline {
        let stages = self.stages();
        let mut current = handler;
        for (stage, middleware) in self.stages.into_iter().rev() {
            debug!(stage = %stage, middleware = middleware.name(), "Wrapping pipeline stage");
            current = Arc::new(Layer {
                middleware,
                inner: current,
            });
        }
        Pipeline {
            stages,
            entry: current,
        }
    }
}

struct Layer {
    middleware: Arc<dyn Middleware>,
    inner: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for Layer {
    async fn handle(&self, request: Request) -> Result<Response> {
        self.middleware.handle(request, self.inner.as_ref()).await
    }
}

/// An assembled pipeline.
pub struct Pipeline {
    stages: Vec<Stage>,
    entry: Arc<dyn Handler>,
}

impl Pipeline {
    /// Stages in execution order, outermost first.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

#[async_trait]
impl Handler for Pipeline {
    async fn handle(&self, request: Request) -> Result<Response> {
        self.entry.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::StaticHandler;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(&self, request: Request, next: &dyn Handler) -> Result<Response> {
            self.log.lock().push(format!("> {}", self.name));
            let response = next.handle(request).await;
            self.log.lock().push(format!("< {}", self.name));
            response
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Middleware> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn test_logical_order_regardless_of_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::new()
            .stage(Stage::Enrichment, recorder("enrichment", &log))
            .stage(Stage::Auth, recorder("auth", &log))
            .stage(Stage::Visibility, recorder("visibility", &log))
            .stage(Stage::Audit, recorder("audit", &log))
            .build(Arc::new(StaticHandler::text("ok")));

        assert_eq!(
            pipeline.stages(),
            &[Stage::Visibility, Stage::Auth, Stage::Audit, Stage::Enrichment]
        );
        pipeline.handle(Request::list_tools()).await.unwrap();
        assert_eq!(
            *log.lock(),
            vec![
                "> visibility",
                "> auth",
                "> audit",
                "> enrichment",
                "< enrichment",
                "< audit",
                "< auth",
                "< visibility",
            ]
        );
    }

    #[test]
    fn test_disabled_stage_is_absent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let builder = PipelineBuilder::new()
            .stage_if(false, Stage::Rules, || recorder("rules", &log))
            .stage_if(true, Stage::Auth, || recorder("auth", &log));
        assert_eq!(builder.stages(), vec![Stage::Auth]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_calls_handler() {
        let pipeline = PipelineBuilder::new().build(Arc::new(StaticHandler::tools(&["a"])));
        let response = pipeline.handle(Request::list_tools()).await.unwrap();
        assert_eq!(response.as_tools().unwrap().len(), 1);
        assert!(pipeline.stages().is_empty());
    }

    #[test]
    fn test_stage_order_is_total() {
        let mut sorted = Stage::ALL;
        sorted.sort();
        assert_eq!(sorted, Stage::ALL);
    }
}
