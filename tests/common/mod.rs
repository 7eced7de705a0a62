#![allow(dead_code)]

use address_resolver::app::ports::{
    ListingExtractorPort, PartnerLookupPort, PartnerRecord, RegistryClientPort, Row,
};
use address_resolver::common::types::{Identifier, Job, SaleRecord, SourceTag};
use address_resolver::pipeline::{
    PartnerLookupStep, QueryBuilder, RegistryMatcher, RegistryVerificationStep, ResolutionPipeline,
    ResolutionStep, StepSuccess,
};
use address_resolver::{ResolveError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub enum PartnerReply {
    Found(Value),
    Fail(&'static str),
}

/// Partner API keyed by identifier. Unknown identifiers fail with 404.
#[derive(Default)]
pub struct FakePartner {
    replies: HashMap<String, PartnerReply>,
}

impl FakePartner {
    pub fn with(mut self, identifier: &str, reply: PartnerReply) -> Self {
        self.replies.insert(identifier.to_string(), reply);
        self
    }
}

#[async_trait]
impl PartnerLookupPort for FakePartner {
    async fn lookup(&self, identifier: &Identifier) -> Result<PartnerRecord> {
        match self.replies.get(identifier.as_str()) {
            Some(PartnerReply::Found(data)) => Ok(PartnerRecord {
                data: data.as_object().cloned().unwrap_or_default(),
                raw: json!({ "success": true, "data": data }),
            }),
            Some(PartnerReply::Fail(message)) => Err(ResolveError::api("partner", None, *message)),
            None => Err(ResolveError::api("partner", Some(404), "not found")),
        }
    }
}

/// Listing pages keyed by identifier. Unknown identifiers have no history.
#[derive(Default)]
pub struct FakeListing {
    sales: HashMap<String, Vec<SaleRecord>>,
}

impl FakeListing {
    pub fn with(mut self, identifier: &str, sales: Vec<SaleRecord>) -> Self {
        self.sales.insert(identifier.to_string(), sales);
        self
    }
}

#[async_trait]
impl ListingExtractorPort for FakeListing {
    async fn extract(&self, identifier: &Identifier) -> Result<Vec<SaleRecord>> {
        Ok(self.sales.get(identifier.as_str()).cloned().unwrap_or_default())
    }
}

/// Registry that answers a query with the rows of the first rule whose
/// needles all occur in the query text. Every query is recorded.
#[derive(Default)]
pub struct FakeRegistry {
    rules: Vec<(Vec<String>, Vec<Row>)>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn answer(mut self, needles: &[&str], rows: Vec<Row>) -> Self {
        self.rules
            .push((needles.iter().map(|s| s.to_string()).collect(), rows));
        self
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl RegistryClientPort for FakeRegistry {
    async fn query(&self, query: &str) -> Result<Vec<Row>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self
            .rules
            .iter()
            .find(|(needles, _)| needles.iter().all(|n| query.contains(n.as_str())))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}

pub fn row(fields: &[(&str, &str)]) -> Row {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn sale(year: i32, raw_price: i64) -> SaleRecord {
    SaleRecord {
        year,
        raw_price,
        display_price: format!("£{}", raw_price),
    }
}

pub fn real_pipeline(partner: FakePartner, listing: FakeListing, registry: Arc<FakeRegistry>) -> ResolutionPipeline {
    let matcher = RegistryMatcher::new(registry, QueryBuilder::default());
    ResolutionPipeline::new(Duration::from_secs(5))
        .with_step(Arc::new(PartnerLookupStep::new(Arc::new(partner))))
        .with_step(Arc::new(RegistryVerificationStep::new(Arc::new(listing), matcher)))
}

/// Resolves identifiers starting with "ok" after an optional delay. Panics
/// on "boom". Tracks how many attempts are in flight at once.
pub struct ScriptedStep {
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedStep {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ResolutionStep for ScriptedStep {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Partner
    }

    fn confidence(&self) -> f64 {
        1.0
    }

    async fn attempt(&self, job: &Job) -> Result<StepSuccess> {
        if job.identifier.as_str() == "boom" {
            panic!("scripted step exploded");
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if job.identifier.as_str().starts_with("ok") {
            Ok(StepSuccess {
                address: format!("{} Test Street", job.identifier),
                strategy: None,
                metadata: BTreeMap::new(),
            })
        } else {
            Err(ResolveError::no_match("scripted", "not scripted to succeed"))
        }
    }
}

pub fn scripted_pipeline(step: Arc<ScriptedStep>) -> Arc<ResolutionPipeline> {
    Arc::new(ResolutionPipeline::new(Duration::from_secs(5)).with_step(step))
}

pub fn job(identifier: &str) -> Job {
    Job::parse(identifier, None, None).unwrap()
}
