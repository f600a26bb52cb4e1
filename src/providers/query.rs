//! Query engine provider seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Whether a catalog dataset can be queried, and where.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableAvailability {
    /// Queryable
    pub available: bool,
    /// Fully qualified table to query
    #[serde(skip_serializing_if = "String::is_empty")]
    pub query_table: String,
    /// Connection serving the table
    #[serde(skip_serializing_if = "String::is_empty")]
    pub connection: String,
    /// Row estimate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_rows: Option<i64>,
    /// Lookup failure
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// One column in a table schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Engine type
    #[serde(rename = "type")]
    pub data_type: String,
    /// Nullable
    pub nullable: bool,
    /// Column comment
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

/// Table schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Columns in order
    pub columns: Vec<Column>,
    /// Primary key columns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
}

/// Query engine lookups used for enrichment.
#[async_trait]
pub trait QueryProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Availability of the dataset behind a catalog URN
    async fn table_availability(&self, urn: &str) -> Result<TableAvailability>;

    /// Schema of a table
    async fn table_schema(&self, table: &super::TableIdentifier) -> Result<TableSchema>;

    /// Release resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Provider that can query nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopQueryProvider;

#[async_trait]
impl QueryProvider for NoopQueryProvider {
    fn name(&self) -> &str {
        "noop"
    }

    async fn table_availability(&self, _urn: &str) -> Result<TableAvailability> {
        Ok(TableAvailability {
            available: false,
            error: "no query provider configured".to_string(),
            ..Default::default()
        })
    }

    async fn table_schema(&self, _table: &super::TableIdentifier) -> Result<TableSchema> {
        Ok(TableSchema::default())
    }
}
