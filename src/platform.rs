//! Composition root
//!
//! [`Platform::build`] turns a validated [`Config`] plus the adapters the
//! embedding application supplies into a running pipeline.
//! [`Platform::close`] tears it down in four phases:
//!
//! 1. flush dedup marks into the session store, stop every timer, close the
//!    session store
//! 2. close the audit logger, draining its queue into the sink
//! 3. close the providers and the toolkit registry
//! 4. close the database
//!
//! Every close runs even when an earlier one fails; failures come back
//! together as [`Error::Shutdown`](crate::Error::Shutdown).

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::audit::{AuditLogger, AuditSink, TracingAuditSink, spawn_retention};
use crate::auth::{build_authenticator, signing_key};
use crate::config::Config;
use crate::dedup::SessionDedupCache;
use crate::lifecycle::{Component, Lifecycle};
use crate::pipeline::{
    AllowAll, AuditStage, AuthStage, Authorizer, EnrichmentSettings, EnrichmentStage, Handler,
    Pipeline, PipelineBuilder, Request, Response, RulesStage, Stage, UiMetadataStage,
    UnroutedHandler, VisibilityStage, WorkflowTracker,
};
use crate::providers::{ProviderFactories, QueryProvider, SemanticProvider, StorageProvider};
use crate::session::{SessionStore, build_store};
use crate::tasks::PeriodicTask;
use crate::toolkits::{StaticToolkitRegistry, ToolkitRegistry};
use crate::Result;

/// Collaborators supplied by the embedding application.
///
/// Everything has a default: no-op providers, allow-all authorization, a
/// static toolkit registry from config, a backend that routes nothing, and
/// audit records written to the log.
#[derive(Default)]
pub struct PlatformOptions {
    /// Backend adapter constructors
    pub factories: ProviderFactories,
    /// Persona/role authorization
    pub authorizer: Option<Arc<dyn Authorizer>>,
    /// Tool to toolkit lookup
    pub toolkits: Option<Arc<dyn ToolkitRegistry>>,
    /// The real tool handler behind the pipeline
    pub handler: Option<Arc<dyn Handler>>,
    /// Started first, closed last
    pub database: Option<Arc<dyn Component>>,
    /// Where audit events go
    pub audit_sink: Option<Arc<dyn AuditSink>>,
}

type Timers = Arc<Mutex<Vec<PeriodicTask>>>;

/// A wired gateway core.
pub struct Platform {
    config: Config,
    lifecycle: Lifecycle,
    wired: Wired,
}

struct Wired {
    pipeline: Pipeline,
    sessions: Arc<dyn SessionStore>,
    dedup: Option<Arc<SessionDedupCache>>,
    audit: Option<Arc<AuditLogger>>,
    workflow: Option<Arc<WorkflowTracker>>,
    timers: Timers,
}

struct Collaborators {
    authorizer: Option<Arc<dyn Authorizer>>,
    toolkits: Option<Arc<dyn ToolkitRegistry>>,
    handler: Option<Arc<dyn Handler>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl Platform {
    /// Wire everything `config` asks for.
    ///
    /// Configuration problems (unknown provider kinds, missing instances,
    /// a malformed signing key) fail here, and whatever was already opened
    /// is closed again before the error is returned.
    pub async fn build(config: Config, options: PlatformOptions) -> Result<Self> {
        config.validate()?;
        let lifecycle = Lifecycle::new();
        if let Some(database) = options.database {
            lifecycle.register_component("database", database);
        }
        lifecycle.start().await?;

        let collaborators = Collaborators {
            authorizer: options.authorizer,
            toolkits: options.toolkits,
            handler: options.handler,
            audit_sink: options.audit_sink,
        };
        match wire(&config, &options.factories, &lifecycle, collaborators).await {
            Ok(wired) => Ok(Self {
                config,
                lifecycle,
                wired,
            }),
            Err(e) => {
                let report = lifecycle.stop().await;
                if !report.is_empty() {
                    warn!(
                        failed = ?report.components(),
                        "Cleanup after failed build reported errors"
                    );
                }
                Err(e)
            }
        }
    }

    /// Run one request through the pipeline.
    pub async fn handle(&self, request: Request) -> Result<Response> {
        self.wired.pipeline.handle(request).await
    }

    /// Stages in execution order, outermost first.
    pub fn stages(&self) -> &[Stage] {
        self.wired.pipeline.stages()
    }

    /// The configuration the platform was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Durable session store.
    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.wired.sessions
    }

    /// Enrichment dedup cache, when enabled.
    pub fn dedup(&self) -> Option<&Arc<SessionDedupCache>> {
        self.wired.dedup.as_ref()
    }

    /// Audit logger, when tool calls are audited.
    pub fn audit_logger(&self) -> Option<&Arc<AuditLogger>> {
        self.wired.audit.as_ref()
    }

    /// Workflow tracker, when discovery-before-query is on.
    pub fn workflow(&self) -> Option<&Arc<WorkflowTracker>> {
        self.wired.workflow.as_ref()
    }

    /// Background timers still running.
    pub fn running_timers(&self) -> usize {
        self.wired.timers.lock().iter().filter(|t| t.is_running()).count()
    }

    /// Shut everything down. A second call does nothing.
    pub async fn close(&self) -> Result<()> {
        if !self.lifecycle.is_started() {
            return Ok(());
        }
        info!("Shutting down platform");
        let report = self.lifecycle.stop().await;
        if !report.is_empty() {
            warn!(failed = ?report.components(), "Platform shutdown finished with errors");
        }
        report.into_result()
    }
}

async fn wire(
    config: &Config,
    factories: &ProviderFactories,
    lifecycle: &Lifecycle,
    collaborators: Collaborators,
) -> Result<Wired> {
    // Closers are registered last-to-close first; stop runs them in reverse.
    let toolkits: Arc<dyn ToolkitRegistry> = collaborators
        .toolkits
        .unwrap_or_else(|| Arc::new(StaticToolkitRegistry::from_config(&config.toolkits)));
    let registry = Arc::clone(&toolkits);
    lifecycle.register_closer("toolkit-registry", move || {
        let registry = Arc::clone(&registry);
        async move { registry.close().await }
    });

    let semantic = factories.build_semantic(config)?;
    let query = factories.build_query(config)?;
    let storage = factories.build_storage(config)?;
    register_providers(lifecycle, &semantic, &query, &storage);

    let signing_key = if config.oauth.enabled {
        Some(signing_key::parse_or_generate(&config.oauth.signing_key)?)
    } else {
        None
    };
    let authenticator = build_authenticator(config, signing_key.as_deref())?;

    let timers: Timers = Arc::new(Mutex::new(Vec::new()));
    let audit = if config.audit.records_tool_calls() {
        let sink = collaborators
            .audit_sink
            .unwrap_or_else(|| Arc::new(TracingAuditSink));
        timers.lock().push(spawn_retention(
            Arc::clone(&sink),
            config.audit.retention(),
            config.audit.cleanup_interval,
        ));
        let logger = Arc::new(AuditLogger::new(sink));
        let closing = Arc::clone(&logger);
        lifecycle.register_closer("audit", move || {
            let logger = Arc::clone(&closing);
            async move { logger.close().await }
        });
        Some(logger)
    } else {
        None
    };

    // Closes before the audit logger and after every dedup closer.
    let sessions = build_store(&config.sessions)?;
    let store = Arc::clone(&sessions);
    lifecycle.register_closer("session-store", move || {
        let store = Arc::clone(&store);
        async move { store.close().await }
    });

    // Only enrichment reads the cache.
    let dedup_config = &config.injection.session_dedup;
    let dedup = if config.injection.any_enabled() && dedup_config.enabled {
        let cache = Arc::new(SessionDedupCache::new(
            dedup_config.entry_ttl,
            dedup_config.session_timeout,
        ));
        if let Err(e) = cache.load_from_store(sessions.as_ref()).await {
            warn!(error = %e, "Could not load dedup state; starting empty");
        }
        cache.start_cleanup(dedup_config.cleanup_interval);
        Some(cache)
    } else {
        None
    };

    let workflow = if config.workflow.require_discovery_before_query {
        let tracker = Arc::new(WorkflowTracker::from_config(&config.workflow));
        tracker.start_cleanup(config.workflow.cleanup_interval);
        Some(tracker)
    } else {
        None
    };

    timers.lock().push(spawn_session_cleanup(
        Arc::clone(&sessions),
        config.sessions.cleanup_interval,
    ));
    register_timers(lifecycle, &timers, workflow.clone());

    if let Some(cache) = &dedup {
        let stopping = Arc::clone(cache);
        lifecycle.register_closer("dedup-timer", move || {
            let cache = Arc::clone(&stopping);
            async move {
                cache.stop().await;
                Ok(())
            }
        });
        let flushing = Arc::clone(cache);
        let store = Arc::clone(&sessions);
        let ttl = config.sessions.ttl;
        lifecycle.register_closer("dedup-flush", move || {
            let cache = Arc::clone(&flushing);
            let store = Arc::clone(&store);
            async move {
                cache.flush_to_store(store.as_ref(), ttl).await;
                Ok(())
            }
        });
    }

    let mut auth = AuthStage::new(
        authenticator,
        collaborators.authorizer.unwrap_or_else(|| Arc::new(AllowAll)),
        toolkits,
    );
    if let Some(tracker) = &workflow {
        auth = auth.with_workflow(Arc::clone(tracker));
    }

    let planned = planned_stages(config);
    let enabled = |stage: Stage| planned.contains(&stage);
    let mut builder = PipelineBuilder::new()
        .stage_if(enabled(Stage::Visibility), Stage::Visibility, || {
            Arc::new(VisibilityStage::new(&config.tools))
        })
        .stage_if(enabled(Stage::UiMetadata), Stage::UiMetadata, || {
            Arc::new(UiMetadataStage::new(&config.mcpapps))
        })
        .stage(Stage::Auth, Arc::new(auth));
    if let Some(logger) = &audit {
        builder = builder.stage(Stage::Audit, Arc::new(AuditStage::new(Arc::clone(logger))));
    }
    if let Some(tracker) = &workflow {
        let rules = RulesStage::new(Arc::clone(tracker), &config.workflow);
        builder = builder.stage(Stage::Rules, Arc::new(rules));
    }
    if enabled(Stage::Enrichment) {
        let mut enrichment = EnrichmentStage::new(
            semantic,
            query,
            storage,
            EnrichmentSettings::from_config(&config.injection),
        );
        if let Some(cache) = &dedup {
            enrichment = enrichment.with_dedup(Arc::clone(cache));
        }
        builder = builder.stage(Stage::Enrichment, Arc::new(enrichment));
    }
    let handler = collaborators.handler.unwrap_or_else(|| Arc::new(UnroutedHandler));
    let pipeline = builder.build(handler);

    info!(
        stages = ?pipeline.stages().iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        session_store = sessions.name(),
        dedup = dedup.is_some(),
        audit = audit.is_some(),
        "Platform ready"
    );

    Ok(Wired {
        pipeline,
        sessions,
        dedup,
        audit,
        workflow,
        timers,
    })
}

/// Stages `config` switches on, outermost first. Auth is always present.
pub fn planned_stages(config: &Config) -> Vec<Stage> {
    Stage::ALL
        .iter()
        .copied()
        .filter(|stage| match stage {
            Stage::Visibility => config.tools.is_active(),
            Stage::UiMetadata => {
                config.mcpapps.enabled && UiMetadataStage::new(&config.mcpapps).has_apps()
            }
            Stage::Auth => true,
            Stage::Audit => config.audit.records_tool_calls(),
            Stage::Rules => config.workflow.require_discovery_before_query,
            Stage::Enrichment => config.injection.any_enabled(),
        })
        .collect()
}

fn register_providers(
    lifecycle: &Lifecycle,
    semantic: &Arc<dyn SemanticProvider>,
    query: &Arc<dyn QueryProvider>,
    storage: &Arc<dyn StorageProvider>,
) {
    let provider = Arc::clone(storage);
    lifecycle.register_closer("storage-provider", move || {
        let provider = Arc::clone(&provider);
        async move { provider.close().await }
    });
    let provider = Arc::clone(query);
    lifecycle.register_closer("query-provider", move || {
        let provider = Arc::clone(&provider);
        async move { provider.close().await }
    });
    let provider = Arc::clone(semantic);
    lifecycle.register_closer("semantic-provider", move || {
        let provider = Arc::clone(&provider);
        async move { provider.close().await }
    });
}

fn register_timers(lifecycle: &Lifecycle, timers: &Timers, workflow: Option<Arc<WorkflowTracker>>) {
    let timers = Arc::clone(timers);
    lifecycle.register_closer("timers", move || {
        let timers = Arc::clone(&timers);
        let workflow = workflow.clone();
        async move {
            let tasks = std::mem::take(&mut *timers.lock());
            for mut task in tasks {
                task.stop().await;
            }
            if let Some(tracker) = workflow {
                tracker.stop().await;
            }
            Ok(())
        }
    });
}

fn spawn_session_cleanup(
    store: Arc<dyn SessionStore>,
    interval: std::time::Duration,
) -> PeriodicTask {
    PeriodicTask::spawn("session-cleanup", interval, move || {
        let store = Arc::clone(&store);
        async move {
            match store.cleanup().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, store = store.name(), "Purged expired sessions"),
                Err(e) => warn!(error = %e, store = store.name(), "Session cleanup pass failed"),
            }
        }
    })
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("stages", &self.wired.pipeline.stages())
            .field("session_store", &self.wired.sessions.name())
            .field("dedup", &self.wired.dedup.is_some())
            .field("audit", &self.wired.audit.is_some())
            .finish_non_exhaustive()
    }
}
