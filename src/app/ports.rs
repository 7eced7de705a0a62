use crate::common::error::Result;
use crate::common::types::{Identifier, Job, ResolutionResult, SaleRecord};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// One registry result row: variable name -> literal value
pub type Row = BTreeMap<String, String>;

#[async_trait]
pub trait ListingExtractorPort: Send + Sync {
    /// Historical sales scraped from the listing page for `identifier`.
    async fn extract(&self, identifier: &Identifier) -> Result<Vec<SaleRecord>>;
}

#[async_trait]
pub trait RegistryClientPort: Send + Sync {
    /// Run one structured query. Timeouts and unreadable bodies come back as errors, never panics.
    async fn query(&self, query: &str) -> Result<Vec<Row>>;
}

/// Address candidates reported by the partner API
#[derive(Clone, Debug)]
pub struct PartnerRecord {
    /// `data` object of the partner response
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Full response body, kept for audit
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PartnerLookupPort: Send + Sync {
    async fn lookup(&self, identifier: &Identifier) -> Result<PartnerRecord>;
}

// Source-of-record port
#[async_trait]
pub trait PropertyStorePort: Send + Sync {
    /// Unresolved rows strictly after `after`, ascending by identifier.
    async fn fetch_unresolved(&self, after: Option<&Identifier>, limit: usize) -> Result<Vec<Job>>;
    async fn save_resolution(&self, identifier: &Identifier, result: &ResolutionResult) -> Result<()>;
}
