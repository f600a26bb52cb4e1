//! Cross-provider enrichment of tool results
//!
//! | Toolkit  | Setting                      | Block appended      |
//! |----------|------------------------------|---------------------|
//! | trino    | `trino_semantic_enrichment`  | `semantic_context`  |
//! | datahub  | `datahub_query_enrichment`   | `query_context`     |
//! | datahub  | `datahub_storage_enrichment` | `storage_context`   |
//! | s3       | `s3_semantic_enrichment`     | `semantic_context`  |
//!
//! Enrichment is best effort: a provider failure drops the block, never the
//! result. Once a session has received the full context for a set of tables
//! the dedup cache turns later blocks into a reference or a compact summary.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{CallToolResult, Handler, Method, Middleware, Request, Response, extract_tables};
use crate::Result;
use crate::config::{DedupMode, InjectionConfig};
use crate::dedup::SessionDedupCache;
use crate::providers::{
    QueryProvider, SearchFilter, SemanticProvider, StorageProvider, TableContext, TableIdentifier,
};

const REFERENCE_NOTE: &str = "Full semantic metadata was provided earlier in this session. \
     Refer to previous responses for column descriptions, tags, owners, and glossary terms.";
const SUMMARY_NOTE: &str =
    "Compact view. Full semantic metadata was provided earlier in this session.";
const NO_COLUMNS_NOTE: &str = "No column-level metadata available";
const S3_NOTE: &str = "Semantic metadata from DataHub for S3 location";
const CRITICAL_TAG_MARKERS: &[&str] =
    &["pii", "sensitive", "quality", "restricted", "confidential"];
const S3_SEARCH_LIMIT: u32 = 5;

/// Which enrichments run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentSettings {
    /// Catalog context on query engine results
    pub trino_semantic: bool,
    /// Query availability on catalog results
    pub datahub_query: bool,
    /// Catalog context on object store results
    pub s3_semantic: bool,
    /// Storage availability on catalog results
    pub datahub_storage: bool,
    /// What repeat tables get
    pub dedup_mode: DedupMode,
}

impl EnrichmentSettings {
    /// Settings from the injection config.
    pub fn from_config(config: &InjectionConfig) -> Self {
        Self {
            trino_semantic: config.trino_semantic_enrichment,
            datahub_query: config.datahub_query_enrichment,
            s3_semantic: config.s3_semantic_enrichment,
            datahub_storage: config.datahub_storage_enrichment,
            dedup_mode: config.session_dedup.mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolkitKind {
    Trino,
    DataHub,
    S3,
}

impl ToolkitKind {
    fn resolve(kind: &str, tool: &str) -> Option<Self> {
        match kind {
            "trino" => return Some(Self::Trino),
            "datahub" => return Some(Self::DataHub),
            "s3" => return Some(Self::S3),
            "" => {}
            _ => return None,
        }
        if tool.starts_with("trino_") {
            Some(Self::Trino)
        } else if tool.starts_with("datahub_") {
            Some(Self::DataHub)
        } else if tool.starts_with("s3_") {
            Some(Self::S3)
        } else {
            None
        }
    }
}

fn arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Tables a query engine call touched, as written. SQL wins over explicit
/// table arguments.
fn table_keys(args: &Map<String, Value>) -> Vec<String> {
    if let Some(sql) = arg(args, "sql") {
        let tables: Vec<String> = extract_tables(sql).into_iter().map(|t| t.full_path).collect();
        if !tables.is_empty() {
            return tables;
        }
    }
    let Some(table) = arg(args, "table").or_else(|| arg(args, "table_name")) else {
        return Vec::new();
    };
    let key = match (arg(args, "catalog"), arg(args, "schema")) {
        (Some(catalog), Some(schema)) => format!("{catalog}.{schema}.{table}"),
        (None, Some(schema)) => format!("{schema}.{table}"),
        _ => table.to_string(),
    };
    vec![key]
}

fn critical_tags(tags: &[String]) -> Vec<&str> {
    tags.iter()
        .filter(|tag| {
            let lower = tag.to_lowercase();
            CRITICAL_TAG_MARKERS.iter().any(|m| lower.contains(m))
        })
        .map(String::as_str)
        .collect()
}

fn compact_context(ctx: &TableContext) -> Value {
    let mut compact = Map::new();
    compact.insert("urn".into(), json!(ctx.urn));
    if let Some(domain) = &ctx.domain {
        compact.insert("domain".into(), json!(domain));
    }
    if ctx.is_deprecated() {
        compact.insert("deprecation".into(), json!(ctx.deprecation));
    }
    if let Some(score) = ctx.quality_score {
        compact.insert("quality_score".into(), json!(score));
    }
    let tags = critical_tags(&ctx.tags);
    if !tags.is_empty() {
        compact.insert("critical_tags".into(), json!(tags));
    }
    Value::Object(compact)
}

/// Strings under `urn` keys anywhere in a JSON document.
fn collect_urns(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                match v {
                    Value::String(s) if (key == "urn" || key == "URN") && !s.is_empty() => {
                        out.push(s.clone());
                    }
                    _ => collect_urns(v, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_urns(v, out)),
        _ => {}
    }
}

fn result_urns(result: &CallToolResult, args: &Map<String, Value>) -> Vec<String> {
    let mut found = Vec::new();
    if let Some(urn) = arg(args, "urn") {
        found.push(urn.to_string());
    }
    for text in result.content.iter().filter_map(|c| c.as_text()) {
        if let Ok(doc) = serde_json::from_str::<Value>(text) {
            collect_urns(&doc, &mut found);
        }
    }
    let mut seen = HashSet::new();
    found.retain(|urn| seen.insert(urn.clone()));
    found
}

/// Appends catalog, query and storage context to tool results.
pub struct EnrichmentStage {
    semantic: Arc<dyn SemanticProvider>,
    query: Arc<dyn QueryProvider>,
    storage: Arc<dyn StorageProvider>,
    settings: EnrichmentSettings,
    dedup: Option<Arc<SessionDedupCache>>,
}

impl EnrichmentStage {
    /// Build over the three providers.
    pub fn new(
        semantic: Arc<dyn SemanticProvider>,
        query: Arc<dyn QueryProvider>,
        storage: Arc<dyn StorageProvider>,
        settings: EnrichmentSettings,
    ) -> Self {
        Self {
            semantic,
            query,
            storage,
            settings,
            dedup: None,
        }
    }

    /// Dedup table context per session through `cache`.
    #[must_use]
    pub fn with_dedup(mut self, cache: Arc<SessionDedupCache>) -> Self {
        self.dedup = Some(cache);
        self
    }

    /// Active settings.
    pub fn settings(&self) -> EnrichmentSettings {
        self.settings
    }

    async fn enrich_trino(
        &self,
        session: &str,
        args: &Map<String, Value>,
        result: &mut CallToolResult,
    ) -> Result<bool> {
        if !self.settings.trino_semantic {
            return Ok(false);
        }
        let keys = table_keys(args);
        if keys.is_empty() {
            return Ok(false);
        }

        let repeat = self
            .dedup
            .as_ref()
            .is_some_and(|cache| cache.all_sent_recently(session, &keys));
        if repeat {
            return self.apply_dedup_mode(&keys, result).await;
        }

        let Some(block) = self.full_semantic_context(&keys).await else {
            return Ok(false);
        };
        result.push_json(&block)?;
        if let Some(cache) = &self.dedup {
            for key in &keys {
                cache.mark_sent(session, key);
            }
        }
        Ok(true)
    }

    async fn apply_dedup_mode(&self, keys: &[String], result: &mut CallToolResult) -> Result<bool> {
        match self.settings.dedup_mode {
            DedupMode::None => Ok(false),
            DedupMode::Reference => {
                result.push_json(&json!({
                    "metadata_reference": {
                        "tables": keys,
                        "note": REFERENCE_NOTE,
                    }
                }))?;
                Ok(true)
            }
            DedupMode::Summary => {
                let mut added = false;
                for key in keys {
                    let table = TableIdentifier::parse(key);
                    let ctx = match self.semantic.table_context(&table).await {
                        Ok(ctx) => ctx,
                        Err(e) => {
                            debug!(table = %key, error = %e, "Skipping compact context");
                            continue;
                        }
                    };
                    result.push_json(&json!({
                        "compact_context": compact_context(&ctx),
                        "tables": [key],
                        "note": SUMMARY_NOTE,
                    }))?;
                    added = true;
                }
                Ok(added)
            }
        }
    }

    async fn full_semantic_context(&self, keys: &[String]) -> Option<Value> {
        let (primary, rest) = keys.split_first()?;
        let table = TableIdentifier::parse(primary);
        let ctx = match self.semantic.table_context(&table).await {
            Ok(ctx) => ctx,
            Err(e) => {
                debug!(table = %primary, error = %e, "Semantic enrichment skipped");
                return None;
            }
        };

        let mut block = Map::new();
        block.insert("semantic_context".into(), json!(ctx));

        let columns: BTreeMap<String, _> = match self.semantic.columns_context(&table).await {
            Ok(columns) => columns.into_iter().filter(|(_, c)| c.has_content()).collect(),
            Err(e) => {
                debug!(table = %primary, error = %e, "Column context unavailable");
                BTreeMap::new()
            }
        };
        if columns.is_empty() {
            block.insert("column_context_note".into(), json!(NO_COLUMNS_NOTE));
        } else {
            let mut sources: Vec<&str> = columns
                .values()
                .filter_map(|c| c.inherited_from.as_ref())
                .map(|i| i.source_urn.as_str())
                .collect();
            sources.sort_unstable();
            sources.dedup();
            if !sources.is_empty() {
                block.insert("inheritance_sources".into(), json!(sources));
            }
            block.insert("column_context".into(), json!(columns));
        }

        let mut additional = Vec::new();
        for key in rest {
            match self.semantic.table_context(&TableIdentifier::parse(key)).await {
                Ok(other) => {
                    let mut entry = Map::new();
                    entry.insert("table".into(), json!(key));
                    entry.insert("description".into(), json!(other.description));
                    entry.insert("urn".into(), json!(other.urn));
                    if let Some(deprecation) = &other.deprecation {
                        entry.insert("deprecation".into(), json!(deprecation));
                    }
                    entry.insert("tags".into(), json!(other.tags));
                    entry.insert("owners".into(), json!(other.owners));
                    additional.push(Value::Object(entry));
                }
                Err(e) => debug!(table = %key, error = %e, "Additional table context skipped"),
            }
        }
        if !additional.is_empty() {
            block.insert("additional_tables".into(), Value::Array(additional));
        }
        Some(Value::Object(block))
    }

    async fn enrich_datahub(
        &self,
        args: &Map<String, Value>,
        result: &mut CallToolResult,
    ) -> Result<bool> {
        if !self.settings.datahub_query && !self.settings.datahub_storage {
            return Ok(false);
        }
        let urns = result_urns(result, args);
        if urns.is_empty() {
            return Ok(false);
        }
        let mut added = false;

        if self.settings.datahub_query {
            let mut availability = Map::new();
            for urn in urns.iter().filter(|u| u.starts_with("urn:li:dataset:")) {
                match self.query.table_availability(urn).await {
                    Ok(a) => {
                        availability.insert(urn.clone(), json!(a));
                    }
                    Err(e) => debug!(urn = %urn, error = %e, "Query availability skipped"),
                }
            }
            if !availability.is_empty() {
                result.push_json(&json!({ "query_context": availability }))?;
                added = true;
            }
        }

        if self.settings.datahub_storage {
            let mut availability = Map::new();
            for urn in urns.iter().filter(|u| u.contains("dataPlatform:s3")) {
                match self.storage.dataset_availability(urn).await {
                    Ok(a) => {
                        availability.insert(urn.clone(), json!(a));
                    }
                    Err(e) => debug!(urn = %urn, error = %e, "Storage availability skipped"),
                }
            }
            if !availability.is_empty() {
                result.push_json(&json!({ "storage_context": availability }))?;
                added = true;
            }
        }
        Ok(added)
    }

    async fn enrich_s3(
        &self,
        args: &Map<String, Value>,
        result: &mut CallToolResult,
    ) -> Result<bool> {
        if !self.settings.s3_semantic {
            return Ok(false);
        }
        let Some(bucket) = arg(args, "bucket") else {
            return Ok(false);
        };
        let prefix = arg(args, "prefix")
            .map(String::from)
            .or_else(|| {
                arg(args, "key")
                    .and_then(|k| k.rsplit_once('/'))
                    .map(|(dir, _)| dir.to_string())
            })
            .unwrap_or_default();
        let query = if prefix.is_empty() {
            bucket.to_string()
        } else {
            format!("{bucket}/{prefix}")
        };

        let filter = SearchFilter {
            query,
            platform: "s3".to_string(),
            limit: S3_SEARCH_LIMIT,
        };
        let hits = match self.semantic.search_tables(&filter).await {
            Ok(hits) => hits,
            Err(e) => {
                debug!(bucket = %bucket, error = %e, "S3 semantic search failed");
                return Ok(false);
            }
        };
        if hits.is_empty() {
            return Ok(false);
        }

        let mut datasets = Vec::with_capacity(hits.len());
        for hit in hits {
            let ctx = self
                .semantic
                .table_context(&TableIdentifier::new("s3", bucket, hit.name.as_str()))
                .await
                .unwrap_or_default();
            let mut entry = Map::new();
            entry.insert("urn".into(), json!(hit.urn));
            entry.insert("name".into(), json!(hit.name));
            let description = if ctx.description.is_empty() {
                hit.description
            } else {
                ctx.description
            };
            if !description.is_empty() {
                entry.insert("description".into(), json!(description));
            }
            if !ctx.owners.is_empty() {
                entry.insert("owners".into(), json!(ctx.owners));
            }
            if !ctx.tags.is_empty() {
                entry.insert("tags".into(), json!(ctx.tags));
            }
            if let Some(domain) = &ctx.domain {
                entry.insert("domain".into(), json!(domain.name));
            }
            if let Some(deprecation) = &ctx.deprecation {
                entry.insert("deprecation".into(), json!(deprecation));
            }
            if let Some(score) = ctx.quality_score {
                entry.insert("quality_score".into(), json!(score));
            }
            datasets.push(Value::Object(entry));
        }

        result.push_json(&json!({
            "semantic_context": {
                "matching_datasets": datasets,
                "note": S3_NOTE,
            }
        }))?;
        Ok(true)
    }
}

#[async_trait]
impl Middleware for EnrichmentStage {
    fn name(&self) -> &'static str {
        "enrichment"
    }

    async fn handle(&self, request: Request, next: &dyn Handler) -> Result<Response> {
        let Method::CallTool { name, arguments } = &request.method else {
            return next.handle(request).await;
        };
        let tool = name.clone();
        let args = arguments.clone();
        let session = request.session_id.clone();
        let context = request.context.clone();

        let response = next.handle(request).await?;
        let mut result = match response {
            Response::CallResult(result) => result,
            other => return Ok(other),
        };
        if result.is_error {
            return Ok(Response::CallResult(result));
        }

        let kind_label = context.update(|ctx| ctx.toolkit_kind.clone());
        let added = match ToolkitKind::resolve(&kind_label, &tool) {
            Some(ToolkitKind::Trino) => self.enrich_trino(&session, &args, &mut result).await?,
            Some(ToolkitKind::DataHub) => self.enrich_datahub(&args, &mut result).await?,
            Some(ToolkitKind::S3) => self.enrich_s3(&args, &mut result).await?,
            None => false,
        };
        if added {
            context.update(|ctx| ctx.enrichment_applied = true);
            debug!(tool = %tool, session = %session, "Enrichment applied");
        }
        Ok(Response::CallResult(result))
    }
}
