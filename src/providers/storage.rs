//! Object store provider seam

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Whether the data behind a catalog URN exists in the object store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetAvailability {
    /// Present
    pub available: bool,
    /// Bucket
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bucket: String,
    /// Key prefix
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    /// Connection serving the bucket
    #[serde(skip_serializing_if = "String::is_empty")]
    pub connection: String,
    /// Objects under the prefix
    #[serde(skip_serializing_if = "is_zero")]
    pub object_count: u64,
    /// Bytes under the prefix
    #[serde(skip_serializing_if = "is_zero")]
    pub total_size: u64,
    /// Newest object time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Lookup failure
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Object store lookups used for enrichment.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Availability of the dataset behind a catalog URN
    async fn dataset_availability(&self, urn: &str) -> Result<DatasetAvailability>;

    /// Release resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Provider with no storage behind it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorageProvider;

#[async_trait]
impl StorageProvider for NoopStorageProvider {
    fn name(&self) -> &str {
        "noop"
    }

    async fn dataset_availability(&self, _urn: &str) -> Result<DatasetAvailability> {
        Ok(DatasetAvailability::default())
    }
}
