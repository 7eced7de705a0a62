use crate::app::ports::{ListingExtractorPort, PartnerLookupPort};
use crate::common::constants::{LISTING, PARTNER, PARTNER_CONFIDENCE, REGISTRY, REGISTRY_CONFIDENCE};
use crate::common::error::{ResolveError, Result};
use crate::common::types::{prepare_sales, Job, MatchStrategy, SourceTag};
use crate::pipeline::address::{first_plausible_address, PARTNER_ADDRESS_FIELDS};
use crate::pipeline::registry_matcher::RegistryMatcher;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// What a step hands back when it found an address
#[derive(Debug, Clone, PartialEq)]
pub struct StepSuccess {
    pub address: String,
    pub strategy: Option<MatchStrategy>,
    /// Step-specific provenance merged into the result metadata
    pub metadata: BTreeMap<String, Value>,
}

/// One ranked way of resolving an address
#[async_trait]
pub trait ResolutionStep: Send + Sync {
    fn name(&self) -> &'static str;
    fn source_tag(&self) -> SourceTag;
    fn confidence(&self) -> f64;
    /// Failures come back as values. A step never panics the pipeline.
    async fn attempt(&self, job: &Job) -> Result<StepSuccess>;
}

/// Partner API lookup (confidence 1.0)
pub struct PartnerLookupStep {
    partner: Arc<dyn PartnerLookupPort>,
}

impl PartnerLookupStep {
    pub fn new(partner: Arc<dyn PartnerLookupPort>) -> Self {
        Self { partner }
    }
}

#[async_trait]
impl ResolutionStep for PartnerLookupStep {
    fn name(&self) -> &'static str {
        PARTNER
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Partner
    }

    fn confidence(&self) -> f64 {
        PARTNER_CONFIDENCE
    }

    async fn attempt(&self, job: &Job) -> Result<StepSuccess> {
        let record = self.partner.lookup(&job.identifier).await?;
        let (field, address) = first_plausible_address(&record.data, &PARTNER_ADDRESS_FIELDS)
            .ok_or_else(|| {
                ResolveError::parse(PARTNER, "no field holds a plausible address")
            })?;
        debug!(identifier = %job.identifier, field, "partner address accepted");

        let mut metadata = BTreeMap::new();
        metadata.insert("addressField".to_string(), json!(field));
        metadata.insert("rawResponse".to_string(), record.raw);
        Ok(StepSuccess {
            address,
            strategy: None,
            metadata,
        })
    }
}

/// Listing sale history verified against the land registry (confidence 0.9)
pub struct RegistryVerificationStep {
    listing: Arc<dyn ListingExtractorPort>,
    matcher: RegistryMatcher,
}

impl RegistryVerificationStep {
    pub fn new(listing: Arc<dyn ListingExtractorPort>, matcher: RegistryMatcher) -> Self {
        Self { listing, matcher }
    }
}

#[async_trait]
impl ResolutionStep for RegistryVerificationStep {
    fn name(&self) -> &'static str {
        REGISTRY
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Registry
    }

    fn confidence(&self) -> f64 {
        REGISTRY_CONFIDENCE
    }

    async fn attempt(&self, job: &Job) -> Result<StepSuccess> {
        // nothing to filter on, so skip the slow listing fetch
        if job.hint.outcode().is_none() {
            return Err(ResolveError::no_match(REGISTRY, "no postal hint to query the registry with"));
        }

        let sales = prepare_sales(self.listing.extract(&job.identifier).await?);
        if sales.is_empty() {
            return Err(ResolveError::no_match(LISTING, "listing has no sale history"));
        }

        let report = self.matcher.find_match(&job.hint, &sales).await;
        let Some(found) = report.matched.clone() else {
            return Err(ResolveError::no_match(REGISTRY, report.failure_reason()));
        };
        if found.address.is_empty() {
            return Err(ResolveError::parse(REGISTRY, "matched row has no address parts"));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("verifiedSale".to_string(), json!(found.sale));
        metadata.insert("registryRow".to_string(), json!(found.row));
        metadata.insert("candidates".to_string(), json!(found.candidates));
        metadata.insert("queriesTried".to_string(), json!(report.attempts.len()));
        Ok(StepSuccess {
            address: found.address,
            strategy: Some(found.strategy),
            metadata,
        })
    }
}
