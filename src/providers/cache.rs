//! TTL cache in front of a [`SemanticProvider`]
//!
//! Lookups are keyed by the table identifier (plus direction and depth for
//! lineage). Errors are never cached. Search results pass straight through.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::semantic::{
    ColumnContext, GlossaryTerm, LineageDirection, LineageInfo, SearchFilter, SemanticProvider,
    TableContext, TableIdentifier, TableSearchResult,
};
use crate::Result;

/// Default entry lifetime
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct Entry<V> {
    value: V,
    cached_at: Instant,
}

struct TtlMap<V> {
    entries: DashMap<String, Entry<V>>,
}

impl<V: Clone> TtlMap<V> {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn get(&self, key: &str, ttl: Duration) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.cached_at.elapsed() > ttl {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    fn put(&self, key: String, value: V) {
        self.entries.insert(
            key,
            Entry {
                value,
                cached_at: Instant::now(),
            },
        );
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// Caching wrapper around any semantic provider.
pub struct CachedSemanticProvider {
    inner: Arc<dyn SemanticProvider>,
    ttl: Duration,
    tables: TtlMap<TableContext>,
    columns: TtlMap<BTreeMap<String, ColumnContext>>,
    lineage: TtlMap<LineageInfo>,
    terms: TtlMap<GlossaryTerm>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedSemanticProvider {
    /// Wrap `inner`. A zero TTL means the default.
    pub fn new(inner: Arc<dyn SemanticProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl: if ttl.is_zero() { DEFAULT_CACHE_TTL } else { ttl },
            tables: TtlMap::new(),
            columns: TtlMap::new(),
            lineage: TtlMap::new(),
            terms: TtlMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Entry lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Lookups served from the cache
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups sent to the wrapped provider
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Drop every cached entry.
    pub fn invalidate(&self) {
        self.tables.clear();
        self.columns.clear();
        self.lineage.clear();
        self.terms.clear();
    }

    fn hit<V>(&self, value: Option<V>) -> Option<V> {
        let counter = if value.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }
}

#[async_trait]
impl SemanticProvider for CachedSemanticProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn table_context(&self, table: &TableIdentifier) -> Result<TableContext> {
        let key = table.to_string();
        if let Some(hit) = self.hit(self.tables.get(&key, self.ttl)) {
            return Ok(hit);
        }
        let value = self.inner.table_context(table).await?;
        self.tables.put(key, value.clone());
        Ok(value)
    }

    async fn columns_context(
        &self,
        table: &TableIdentifier,
    ) -> Result<BTreeMap<String, ColumnContext>> {
        let key = table.to_string();
        if let Some(hit) = self.hit(self.columns.get(&key, self.ttl)) {
            return Ok(hit);
        }
        let value = self.inner.columns_context(table).await?;
        self.columns.put(key, value.clone());
        Ok(value)
    }

    async fn lineage(
        &self,
        table: &TableIdentifier,
        direction: LineageDirection,
        max_depth: u32,
    ) -> Result<LineageInfo> {
        let key = format!("{table}:{direction}:{max_depth}");
        if let Some(hit) = self.hit(self.lineage.get(&key, self.ttl)) {
            return Ok(hit);
        }
        let value = self.inner.lineage(table, direction, max_depth).await?;
        self.lineage.put(key, value.clone());
        Ok(value)
    }

    async fn glossary_term(&self, urn: &str) -> Result<GlossaryTerm> {
        if let Some(hit) = self.hit(self.terms.get(urn, self.ttl)) {
            return Ok(hit);
        }
        let value = self.inner.glossary_term(urn).await?;
        self.terms.put(urn.to_string(), value.clone());
        Ok(value)
    }

    async fn search_tables(&self, filter: &SearchFilter) -> Result<Vec<TableSearchResult>> {
        self.inner.search_tables(filter).await
    }

    async fn close(&self) -> Result<()> {
        self.invalidate();
        self.inner.close().await
    }
}
