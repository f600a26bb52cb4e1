//! Backend provider seams
//!
//! Enrichment talks to three kinds of backend through traits: a catalog
//! ([`SemanticProvider`]), a query engine ([`QueryProvider`]) and an object
//! store ([`StorageProvider`]). Concrete adapters live outside this crate and
//! are plugged in through [`ProviderFactories`], keyed by provider kind.

mod cache;
mod query;
mod semantic;
mod storage;

pub use cache::{CachedSemanticProvider, DEFAULT_CACHE_TTL};
pub use query::{Column, NoopQueryProvider, QueryProvider, TableAvailability, TableSchema};
pub use semantic::{
    ColumnContext, Deprecation, Domain, GlossaryTerm, InheritedMetadata, LineageDirection,
    LineageEntity, LineageInfo, NoopSemanticProvider, Owner, SearchFilter, SemanticProvider,
    TableContext, TableIdentifier, TableSearchResult,
};
pub use storage::{DatasetAvailability, NoopStorageProvider, StorageProvider};

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::toolkits::{DataHubInstance, Resolved, S3Instance, TrinoInstance};
use crate::{Error, Result};

macro_rules! provider_kind {
    ($(#[$meta:meta])* $name:ident, $domain:literal, $variant:ident => $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            /// No backend
            Noop,
            #[doc = concat!("`", $label, "` backend")]
            $variant,
        }

        impl $name {
            /// Parse a provider kind. Empty means `noop`.
            pub fn parse(kind: &str) -> Result<Self> {
                match kind.trim() {
                    "" | "noop" => Ok(Self::Noop),
                    $label => Ok(Self::$variant),
                    other => Err(Error::UnknownProviderKind {
                        domain: $domain,
                        kind: other.to_string(),
                    }),
                }
            }

            /// Kind label
            pub fn as_str(self) -> &'static str {
                match self {
                    Self::Noop => "noop",
                    Self::$variant => $label,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

provider_kind!(
    /// Catalog provider kind
    SemanticKind, "semantic", DataHub => "datahub"
);
provider_kind!(
    /// Query engine provider kind
    QueryKind, "query", Trino => "trino"
);
provider_kind!(
    /// Object store provider kind
    StorageKind, "storage", S3 => "s3"
);

/// Builds a catalog adapter for a resolved instance.
pub type SemanticFactory =
    Arc<dyn Fn(Resolved<'_, DataHubInstance>) -> Result<Arc<dyn SemanticProvider>> + Send + Sync>;
/// Builds a query engine adapter for a resolved instance.
pub type QueryFactory =
    Arc<dyn Fn(Resolved<'_, TrinoInstance>) -> Result<Arc<dyn QueryProvider>> + Send + Sync>;
/// Builds an object store adapter for a resolved instance.
pub type StorageFactory =
    Arc<dyn Fn(Resolved<'_, S3Instance>) -> Result<Arc<dyn StorageProvider>> + Send + Sync>;

/// Adapter constructors supplied by the embedding application.
#[derive(Clone, Default)]
pub struct ProviderFactories {
    semantic: Option<SemanticFactory>,
    query: Option<QueryFactory>,
    storage: Option<StorageFactory>,
}

impl fmt::Debug for ProviderFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderFactories")
            .field("semantic", &self.semantic.is_some())
            .field("query", &self.query.is_some())
            .field("storage", &self.storage.is_some())
            .finish()
    }
}

fn missing_factory(domain: &str, kind: &str) -> Error {
    Error::Provider(format!("no {domain} provider factory registered for kind {kind:?}"))
}

impl ProviderFactories {
    /// No factories; only `noop` kinds can be built.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the `datahub` factory.
    #[must_use]
    pub fn with_semantic<F>(mut self, factory: F) -> Self
    where
        F: Fn(Resolved<'_, DataHubInstance>) -> Result<Arc<dyn SemanticProvider>>
            + Send
            + Sync
            + 'static,
    {
        self.semantic = Some(Arc::new(factory));
        self
    }

    /// Register the `trino` factory.
    #[must_use]
    pub fn with_query<F>(mut self, factory: F) -> Self
    where
        F: Fn(Resolved<'_, TrinoInstance>) -> Result<Arc<dyn QueryProvider>>
            + Send
            + Sync
            + 'static,
    {
        self.query = Some(Arc::new(factory));
        self
    }

    /// Register the `s3` factory.
    #[must_use]
    pub fn with_storage<F>(mut self, factory: F) -> Self
    where
        F: Fn(Resolved<'_, S3Instance>) -> Result<Arc<dyn StorageProvider>> + Send + Sync + 'static,
    {
        self.storage = Some(Arc::new(factory));
        self
    }

    /// Build the configured catalog provider, cached when enabled.
    pub fn build_semantic(&self, config: &Config) -> Result<Arc<dyn SemanticProvider>> {
        let kind = SemanticKind::parse(&config.semantic.provider)?;
        let provider: Arc<dyn SemanticProvider> = match kind {
            SemanticKind::Noop => Arc::new(NoopSemanticProvider),
            kind @ SemanticKind::DataHub => {
                let factory = self
                    .semantic
                    .as_ref()
                    .ok_or_else(|| missing_factory("semantic", kind.as_str()))?;
                let resolved = config
                    .toolkits
                    .datahub
                    .resolve(config.semantic.instance.as_deref())?;
                info!(kind = %kind, instance = resolved.name, "Building semantic provider");
                factory(resolved)?
            }
        };
        if config.semantic.cache.enabled {
            return Ok(Arc::new(CachedSemanticProvider::new(
                provider,
                config.semantic.cache.ttl,
            )));
        }
        Ok(provider)
    }

    /// Build the configured query engine provider.
    pub fn build_query(&self, config: &Config) -> Result<Arc<dyn QueryProvider>> {
        match QueryKind::parse(&config.query.provider)? {
            QueryKind::Noop => Ok(Arc::new(NoopQueryProvider)),
            kind @ QueryKind::Trino => {
                let factory = self
                    .query
                    .as_ref()
                    .ok_or_else(|| missing_factory("query", kind.as_str()))?;
                let resolved = config.toolkits.trino.resolve(config.query.instance.as_deref())?;
                info!(kind = %kind, instance = resolved.name, "Building query provider");
                factory(resolved)
            }
        }
    }

    /// Build the configured object store provider.
    pub fn build_storage(&self, config: &Config) -> Result<Arc<dyn StorageProvider>> {
        match StorageKind::parse(&config.storage.provider)? {
            StorageKind::Noop => Ok(Arc::new(NoopStorageProvider)),
            kind @ StorageKind::S3 => {
                let factory = self
                    .storage
                    .as_ref()
                    .ok_or_else(|| missing_factory("storage", kind.as_str()))?;
                let resolved = config.toolkits.s3.resolve(config.storage.instance.as_deref())?;
                info!(kind = %kind, instance = resolved.name, "Building storage provider");
                factory(resolved)
            }
        }
    }
}
