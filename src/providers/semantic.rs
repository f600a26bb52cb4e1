//! Catalog (semantic metadata) provider seam

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// A table, optionally qualified by catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdentifier {
    /// Catalog, empty when unqualified
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub catalog: String,
    /// Schema
    pub schema: String,
    /// Table
    pub table: String,
}

impl TableIdentifier {
    /// Build from parts.
    pub fn new(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parse `catalog.schema.table`, `schema.table` or `table`.
    /// Empty segments are ignored.
    pub fn parse(name: &str) -> Self {
        let parts: Vec<&str> = name.split('.').filter(|p| !p.is_empty()).collect();
        match parts.as_slice() {
            [catalog, schema, table] => Self::new(*catalog, *schema, *table),
            [schema, table] => Self::new("", *schema, *table),
            _ => Self::new("", "", name),
        }
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.catalog.is_empty() {
            write!(f, "{}.{}", self.schema, self.table)
        } else {
            write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
        }
    }
}

/// Data owner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    /// Owner URN
    pub urn: String,
    /// `user` or `group`
    #[serde(rename = "type")]
    pub owner_type: String,
    /// Display name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Email
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}

/// Business glossary term
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlossaryTerm {
    /// Term URN
    pub urn: String,
    /// Term name
    pub name: String,
    /// Definition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Data domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    /// Domain URN
    pub urn: String,
    /// Domain name
    pub name: String,
    /// Description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Deprecation status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deprecation {
    /// Whether the entity is deprecated
    pub deprecated: bool,
    /// Note from whoever deprecated it
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
    /// Who deprecated it
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actor: String,
    /// Planned removal date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decommission_date: Option<DateTime<Utc>>,
}

/// Catalog context for one table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableContext {
    /// Dataset URN
    #[serde(skip_serializing_if = "String::is_empty")]
    pub urn: String,
    /// Description
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Owners
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owners: Vec<Owner>,
    /// Tags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Glossary terms
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub glossary_terms: Vec<GlossaryTerm>,
    /// Domain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    /// Deprecation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecation: Option<Deprecation>,
    /// Quality score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    /// Free-form properties
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_properties: BTreeMap<String, String>,
    /// Last modification time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl TableContext {
    /// Whether the table is marked deprecated.
    pub fn is_deprecated(&self) -> bool {
        self.deprecation.as_ref().is_some_and(|d| d.deprecated)
    }
}

/// Where inherited column metadata came from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InheritedMetadata {
    /// Upstream dataset URN
    pub source_urn: String,
    /// Upstream column
    pub source_column: String,
    /// Distance upstream, 1 for a direct parent
    pub hops: u32,
    /// How the column was matched
    pub match_method: String,
}

/// Catalog context for one column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnContext {
    /// Column name
    pub name: String,
    /// Description
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Tags
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Glossary terms
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub glossary_terms: Vec<GlossaryTerm>,
    /// Personal data
    pub is_pii: bool,
    /// Otherwise sensitive
    pub is_sensitive: bool,
    /// Business-facing name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub business_name: String,
    /// Set when metadata came from upstream lineage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherited_from: Option<InheritedMetadata>,
}

impl ColumnContext {
    /// Whether there is anything worth sending.
    pub fn has_content(&self) -> bool {
        !self.description.is_empty()
            || !self.tags.is_empty()
            || !self.glossary_terms.is_empty()
            || self.is_pii
            || self.is_sensitive
            || !self.business_name.is_empty()
            || self.inherited_from.is_some()
    }
}

/// Lineage traversal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineageDirection {
    /// Towards sources
    Upstream,
    /// Towards consumers
    Downstream,
}

impl fmt::Display for LineageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upstream => "upstream",
            Self::Downstream => "downstream",
        })
    }
}

/// One entity in a lineage graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineageEntity {
    /// Entity URN
    pub urn: String,
    /// Entity type
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Name
    pub name: String,
    /// Platform
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub platform: String,
    /// Hops from the root
    pub depth: u32,
}

/// Lineage around a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageInfo {
    /// Traversal direction
    pub direction: LineageDirection,
    /// Entities found
    pub entities: Vec<LineageEntity>,
    /// Depth limit used
    pub max_depth: u32,
}

/// Table search criteria
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilter {
    /// Free-text query
    pub query: String,
    /// Platform filter
    pub platform: String,
    /// Page size
    pub limit: u32,
}

/// One search hit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSearchResult {
    /// Dataset URN
    pub urn: String,
    /// Dataset name
    pub name: String,
    /// Platform
    #[serde(skip_serializing_if = "String::is_empty")]
    pub platform: String,
    /// Description
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Catalog lookups used for enrichment.
#[async_trait]
pub trait SemanticProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Table-level context
    async fn table_context(&self, table: &TableIdentifier) -> Result<TableContext>;

    /// Column contexts by column name
    async fn columns_context(
        &self,
        table: &TableIdentifier,
    ) -> Result<BTreeMap<String, ColumnContext>>;

    /// Lineage around a table
    async fn lineage(
        &self,
        table: &TableIdentifier,
        direction: LineageDirection,
        max_depth: u32,
    ) -> Result<LineageInfo>;

    /// One glossary term
    async fn glossary_term(&self, urn: &str) -> Result<GlossaryTerm>;

    /// Table search
    async fn search_tables(&self, filter: &SearchFilter) -> Result<Vec<TableSearchResult>>;

    /// Release resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Provider that knows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSemanticProvider;

#[async_trait]
impl SemanticProvider for NoopSemanticProvider {
    fn name(&self) -> &str {
        "noop"
    }

    async fn table_context(&self, _table: &TableIdentifier) -> Result<TableContext> {
        Ok(TableContext::default())
    }

    async fn columns_context(
        &self,
        _table: &TableIdentifier,
    ) -> Result<BTreeMap<String, ColumnContext>> {
        Ok(BTreeMap::new())
    }

    async fn lineage(
        &self,
        _table: &TableIdentifier,
        direction: LineageDirection,
        max_depth: u32,
    ) -> Result<LineageInfo> {
        Ok(LineageInfo {
            direction,
            entities: Vec::new(),
            max_depth,
        })
    }

    async fn glossary_term(&self, _urn: &str) -> Result<GlossaryTerm> {
        Ok(GlossaryTerm::default())
    }

    async fn search_tables(&self, _filter: &SearchFilter) -> Result<Vec<TableSearchResult>> {
        Ok(Vec::new())
    }
}
