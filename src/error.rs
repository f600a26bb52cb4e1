//! Error types for the data platform gateway

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The document declares a config version this build does not know
    #[error("unsupported config apiVersion {version:?}; supported versions: {supported}")]
    UnsupportedVersion {
        /// Version tag found in the document
        version: String,
        /// Comma separated list of supported versions
        supported: String,
    },

    /// The document declares a config version that has been removed
    #[error(
        "config apiVersion {version:?} has been removed{}; supported versions: {supported}",
        guide_suffix(.guide)
    )]
    RemovedVersion {
        /// Version tag found in the document
        version: String,
        /// Migration guide for the removed version, if one was registered
        guide: Option<String>,
        /// Comma separated list of supported versions
        supported: String,
    },

    /// The source document of a migration failed version validation
    #[error("source config: {0}")]
    SourceConfig(#[source] Box<Error>),

    /// Migration target is not a registered version
    #[error("unknown target version {version:?}; supported: {supported}")]
    UnknownTargetVersion {
        /// Requested target
        version: String,
        /// Comma separated list of supported versions
        supported: String,
    },

    /// Migration target has been removed
    #[error("target version {version:?} has been removed; supported: {supported}")]
    RemovedTargetVersion {
        /// Requested target
        version: String,
        /// Comma separated list of supported versions
        supported: String,
    },

    /// No converter exists between two versions
    #[error("migration from {from} to {to} is not yet implemented")]
    MigrationNotImplemented {
        /// Source version
        from: String,
        /// Target version
        to: String,
    },

    /// Lifecycle started twice
    #[error("lifecycle already started")]
    AlreadyStarted,

    /// A lifecycle start callback failed
    #[error("start callback {index} ({name}) failed: {source}")]
    StartFailed {
        /// Position of the failing callback
        index: usize,
        /// Component name
        name: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Provider kind string is not recognised
    #[error("unknown {domain} provider kind: {kind:?}")]
    UnknownProviderKind {
        /// Backend domain (semantic, query, storage)
        domain: &'static str,
        /// Kind found in config
        kind: String,
    },

    /// Toolkit kind has no instances configured
    #[error("{0} is not configured")]
    KindNotConfigured(String),

    /// Named instance is missing
    #[error("{kind} instance {name:?} not found")]
    InstanceNotFound {
        /// Toolkit kind
        kind: String,
        /// Requested instance name
        name: String,
    },

    /// Several instances and no declared default
    #[error("{kind} has {count} instances and no default; set `default`")]
    AmbiguousDefault {
        /// Toolkit kind
        kind: String,
        /// Number of configured instances
        count: usize,
    },

    /// Signing key could not be used
    #[error("Signing key error: {0}")]
    SigningKey(String),

    /// Session store error
    #[error("Session store error: {0}")]
    Session(String),

    /// Audit subsystem error
    #[error("Audit error: {0}")]
    Audit(String),

    /// Backend provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// One or more components failed to close
    #[error("Shutdown failed: {0}")]
    Shutdown(ShutdownReport),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn guide_suffix(guide: &Option<String>) -> String {
    match guide {
        Some(g) if !g.is_empty() => format!(" ({g})"),
        _ => String::new(),
    }
}

/// One component that failed to close during shutdown.
#[derive(Debug)]
pub struct CloseFailure {
    /// Component name as registered
    pub component: String,
    /// What went wrong
    pub error: Error,
}

/// Every close failure from one shutdown, in the order they happened.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    failures: Vec<CloseFailure>,
}

impl ShutdownReport {
    /// Create an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure.
    pub fn push(&mut self, component: impl Into<String>, error: Error) {
        self.failures.push(CloseFailure {
            component: component.into(),
            error,
        });
    }

    /// Append every failure from another report.
    pub fn extend(&mut self, other: ShutdownReport) {
        self.failures.extend(other.failures);
    }

    /// True when nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// The recorded failures.
    #[must_use]
    pub fn failures(&self) -> &[CloseFailure] {
        &self.failures
    }

    /// Names of the components that failed, in order.
    #[must_use]
    pub fn components(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.component.as_str()).collect()
    }

    /// `Ok(())` when empty, otherwise [`Error::Shutdown`].
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Shutdown(self))
        }
    }
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "no failures");
        }
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", failure.component, failure.error)?;
        }
        Ok(())
    }
}
