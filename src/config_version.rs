//! Config document versioning
//!
//! Every persisted config carries an optional `apiVersion` tag. Documents
//! that predate the tag are treated as the current version. The registry is
//! an ordinary value: build one with [`VersionRegistry::with_defaults`] and
//! pass it to whatever loads or migrates config.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::{Error, Result};

/// The config version this build writes.
pub const CURRENT_CONFIG_VERSION: &str = "v1";

/// Name of the version tag inside a config document.
pub const VERSION_FIELD: &str = "apiVersion";

/// Lifecycle state of a config version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionStatus {
    /// Actively supported
    Current,
    /// Still loads, with a warning
    Deprecated,
    /// No longer loads
    Removed,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Current => "current",
            Self::Deprecated => "deprecated",
            Self::Removed => "removed",
        })
    }
}

/// Rewrites a raw document of one version into the current schema.
pub type VersionConverter = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// A registered config version.
#[derive(Clone)]
pub struct VersionInfo {
    /// Version tag, e.g. `v1`
    pub version: String,
    /// Lifecycle state
    pub status: VersionStatus,
    /// Logged when a deprecated version is loaded
    pub deprecation_message: String,
    /// Included in the error when a removed version is loaded
    pub migration_guide: String,
    /// Converter to the current schema; `None` means the version already
    /// matches it
    pub converter: Option<VersionConverter>,
}

impl VersionInfo {
    /// A version with the given status and no messages or converter.
    #[must_use]
    pub fn new(version: impl Into<String>, status: VersionStatus) -> Self {
        Self {
            version: version.into(),
            status,
            deprecation_message: String::new(),
            migration_guide: String::new(),
            converter: None,
        }
    }

    /// Attach a converter.
    #[must_use]
    pub fn with_converter(mut self, converter: VersionConverter) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Attach a migration guide.
    #[must_use]
    pub fn with_migration_guide(mut self, guide: impl Into<String>) -> Self {
        self.migration_guide = guide.into();
        self
    }

    /// Attach a deprecation message.
    #[must_use]
    pub fn with_deprecation_message(mut self, message: impl Into<String>) -> Self {
        self.deprecation_message = message.into();
        self
    }
}

impl fmt::Debug for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionInfo")
            .field("version", &self.version)
            .field("status", &self.status)
            .field("has_converter", &self.converter.is_some())
            .finish_non_exhaustive()
    }
}

/// Known config versions.
#[derive(Debug, Clone, Default)]
pub struct VersionRegistry {
    versions: BTreeMap<String, VersionInfo>,
    current: Option<String>,
}

impl VersionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `v1` registered as current.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(VersionInfo::new(
            CURRENT_CONFIG_VERSION,
            VersionStatus::Current,
        ));
        reg
    }

    /// Add a version. The first version registered as current stays current.
    pub fn register(&mut self, info: VersionInfo) {
        if info.status == VersionStatus::Current && self.current.is_none() {
            self.current = Some(info.version.clone());
        }
        self.versions.insert(info.version.clone(), info);
    }

    /// Look up a version.
    #[must_use]
    pub fn get(&self, version: &str) -> Option<&VersionInfo> {
        self.versions.get(version)
    }

    /// The current version, falling back to [`CURRENT_CONFIG_VERSION`] on an
    /// empty registry.
    #[must_use]
    pub fn current(&self) -> &str {
        self.current.as_deref().unwrap_or(CURRENT_CONFIG_VERSION)
    }

    /// Every version that is not removed, sorted.
    #[must_use]
    pub fn list_supported(&self) -> Vec<&str> {
        self.versions
            .values()
            .filter(|info| info.status != VersionStatus::Removed)
            .map(|info| info.version.as_str())
            .collect()
    }

    /// True when the version exists and is deprecated.
    #[must_use]
    pub fn is_deprecated(&self, version: &str) -> bool {
        self.get(version)
            .is_some_and(|info| info.status == VersionStatus::Deprecated)
    }

    /// The version tag of a raw document, or the current version when the tag
    /// is absent or the document does not parse.
    #[must_use]
    pub fn peek_version(&self, raw: &str) -> String {
        match ConfigEnvelope::peek(raw) {
            Some(v) => v,
            None => self.current().to_string(),
        }
    }

    /// Validate a version tag. Unknown and removed versions fail; deprecated
    /// versions log a warning.
    pub fn resolve(&self, version: &str) -> Result<&VersionInfo> {
        let Some(info) = self.get(version) else {
            return Err(Error::UnsupportedVersion {
                version: version.to_string(),
                supported: self.supported_list(),
            });
        };
        match info.status {
            VersionStatus::Removed => Err(Error::RemovedVersion {
                version: version.to_string(),
                guide: Some(info.migration_guide.clone()).filter(|g| !g.is_empty()),
                supported: self.supported_list(),
            }),
            VersionStatus::Deprecated => {
                warn!(
                    version = %version,
                    current = %self.current(),
                    message = %info.deprecation_message,
                    "Config apiVersion is deprecated"
                );
                Ok(info)
            }
            VersionStatus::Current => Ok(info),
        }
    }

    /// Peek and validate in one step.
    pub fn resolve_document(&self, raw: &str) -> Result<&VersionInfo> {
        self.resolve(&self.peek_version(raw))
    }

    pub(crate) fn supported_list(&self) -> String {
        self.list_supported().join(", ")
    }
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// Version-only projection of a config document.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigEnvelope {
    /// Raw tag value. Any YAML shape is accepted here so that a malformed tag
    /// surfaces as an unsupported version rather than a parse failure.
    #[serde(rename = "apiVersion", default)]
    pub api_version: Option<serde_yaml::Value>,
}

impl ConfigEnvelope {
    /// The explicit version tag of a raw document, if it has one.
    ///
    /// Returns `None` for documents without the tag, with an empty tag, or
    /// that do not parse as a mapping.
    #[must_use]
    pub fn peek(raw: &str) -> Option<String> {
        let envelope: Self = serde_yaml::from_str(raw).ok()?;
        match envelope.api_version? {
            serde_yaml::Value::Null => None,
            serde_yaml::Value::String(s) if s.trim().is_empty() => None,
            serde_yaml::Value::String(s) => Some(s),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            other => Some(
                serde_yaml::to_string(&other)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| format!("{other:?}")),
            ),
        }
    }
}
