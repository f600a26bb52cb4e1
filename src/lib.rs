//! Data Platform Gateway Library
//!
//! Request-handling core of a tool-invocation gateway sitting between AI
//! agents and a data platform (query engine, metadata catalog, object store).
//!
//! # Features
//!
//! - **Ordered pipeline**: visibility, UI metadata, auth, audit, workflow
//!   rules and enrichment stages wrapped around the backend handler
//! - **Authenticator chain**: self-issued tokens, OIDC and API keys with an
//!   anonymous-access policy
//! - **Session dedup**: per-session enrichment marks that survive restarts
//!   through the session store
//! - **Lifecycle**: ordered start with rollback, phased shutdown with a
//!   report of every close failure
//! - **Versioned config**: version registry and `apiVersion` migration

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod config_migrate;
pub mod config_version;
pub mod dedup;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod platform;
pub mod providers;
pub mod session;
pub mod tasks;
pub mod toolkits;

pub use error::{Error, Result};
pub use platform::{Platform, PlatformOptions};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("tracing already initialized: {e}")))
}
