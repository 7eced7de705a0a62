use crate::app::ports::PropertyStorePort;
use crate::common::error::{ResolveError, Result};
use crate::common::types::{Identifier, Job, ResolutionResult};
use crate::config::Config;
use crate::dispatch::{PoolReport, WorkerPool};
use crate::infra::{HtmlListingExtractor, PartnerApiClient, SparqlRegistryClient};
use crate::pipeline::{
    PartnerLookupStep, QueryBuilder, RegistryMatcher, RegistryVerificationStep, ResolutionPipeline,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Partner lookup first, then listing + registry verification.
pub fn build_pipeline(config: &Config) -> Result<ResolutionPipeline> {
    let partner = Arc::new(PartnerApiClient::new(&config.partner)?);
    let listing = Arc::new(HtmlListingExtractor::new(&config.listing)?);
    let registry = Arc::new(SparqlRegistryClient::new(&config.registry)?);
    let matcher = RegistryMatcher::new(
        registry,
        QueryBuilder::new(config.registry.row_limit, config.registry.price_band),
    );
    Ok(ResolutionPipeline::new(config.pipeline_timeout())
        .with_step(Arc::new(PartnerLookupStep::new(partner)))
        .with_step(Arc::new(RegistryVerificationStep::new(listing, matcher))))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveOneParams {
    pub identifier: String,
    pub outward: Option<String>,
    pub inward: Option<String>,
}

impl ResolveOneParams {
    pub fn into_job(self) -> Result<Job> {
        Job::parse(&self.identifier, self.outward.as_deref(), self.inward.as_deref())
    }
}

/// Resolve a single identifier. Only input validation can fail; resolution
/// failures are reported inside the result.
pub async fn resolve_one(pipeline: &ResolutionPipeline, params: ResolveOneParams) -> Result<ResolutionResult> {
    let job = params.into_job()?;
    Ok(pipeline.resolve(&job).await)
}

/// On-demand batch through an in-process worker pool, sorted by identifier.
pub async fn run_pool(pipeline: Arc<ResolutionPipeline>, workers: usize, jobs: Vec<Job>) -> anyhow::Result<PoolReport> {
    if jobs.is_empty() {
        return Err(ResolveError::Validation("no jobs to run".to_string()).into());
    }
    let report = WorkerPool::new(pipeline, workers).run(jobs).await?;
    Ok(report.sorted_by_identifier())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolvePendingParams {
    pub page_size: usize,
    pub max: Option<usize>,
    pub workers: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvePendingSummary {
    pub pages: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub save_errors: usize,
}

/// Page unresolved rows out of the source of record by ascending identifier,
/// resolve each page through a worker pool and write the results back.
pub async fn resolve_pending(
    pipeline: Arc<ResolutionPipeline>,
    store: Arc<dyn PropertyStorePort>,
    params: ResolvePendingParams,
) -> anyhow::Result<ResolvePendingSummary> {
    if params.page_size == 0 {
        return Err(ResolveError::Validation("page size must be at least 1".to_string()).into());
    }
    let mut summary = ResolvePendingSummary::default();
    let mut cursor: Option<Identifier> = None;

    loop {
        let limit = match params.max {
            Some(max) if summary.processed >= max => break,
            Some(max) => params.page_size.min(max - summary.processed),
            None => params.page_size,
        };
        let page = store.fetch_unresolved(cursor.as_ref(), limit).await?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some(last.identifier.clone());

        let report = WorkerPool::new(pipeline.clone(), params.workers).run(page).await?;
        for record in &report.results {
            if let Err(e) = store.save_resolution(&record.identifier, &record.result).await {
                warn!(identifier = %record.identifier, error = %e, "failed to save resolution");
                summary.save_errors += 1;
            }
        }
        summary.pages += 1;
        summary.processed += report.results.len();
        summary.succeeded += report.succeeded;
        summary.failed += report.failed;
        info!(
            page = summary.pages,
            processed = summary.processed,
            succeeded = summary.succeeded,
            "pending page resolved"
        );
    }
    Ok(summary)
}

/// Parse one `identifier[,outward[,inward]]` line. Blank lines and `#`
/// comments yield `None`.
pub fn parse_job_line(line: &str) -> Result<Option<Job>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut fields = line.split(',').map(str::trim);
    let identifier = fields.next().unwrap_or_default();
    let outward = fields.next().filter(|s| !s.is_empty());
    let inward = fields.next().filter(|s| !s.is_empty());
    Job::parse(identifier, outward, inward).map(Some)
}

pub fn read_jobs_file(path: &Path) -> Result<Vec<Job>> {
    let content = std::fs::read_to_string(path)?;
    let mut jobs = Vec::new();
    for (n, line) in content.lines().enumerate() {
        match parse_job_line(line) {
            Ok(Some(job)) => jobs.push(job),
            Ok(None) => {}
            Err(e) => {
                return Err(ResolveError::Validation(format!(
                    "{}:{}: {}",
                    path.display(),
                    n + 1,
                    e
                )))
            }
        }
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn job_lines_accept_optional_hints() {
        let job = parse_job_line("163926191").unwrap().unwrap();
        assert_eq!(job.hint.outcode(), None);

        let job = parse_job_line(" 42 , sw1w , 8bt ").unwrap().unwrap();
        assert_eq!(job.identifier.as_str(), "42");
        assert_eq!(job.hint.full_postcode().as_deref(), Some("SW1W 8BT"));

        let job = parse_job_line("43,,8BT").unwrap().unwrap();
        assert_eq!(job.hint.inward, None);

        assert!(parse_job_line("# comment").unwrap().is_none());
        assert!(parse_job_line("   ").unwrap().is_none());
    }

    #[test]
    fn bad_line_reports_its_position() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1,SW1W\n2,TOOLONG1").unwrap();
        let err = read_jobs_file(file.path()).unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn default_config_builds_both_steps() {
        let pipeline = build_pipeline(&Config::default()).unwrap();
        assert_eq!(pipeline.step_names(), vec!["partner", "registry"]);
    }
}
