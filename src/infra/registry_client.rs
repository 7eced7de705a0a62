use crate::app::ports::{RegistryClientPort, Row};
use crate::common::constants::REGISTRY;
use crate::common::error::{ResolveError, Result};
use crate::config::RegistryConfig;
use crate::infra::http_client::{build_client, success_body, transport_error};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// SPARQL endpoint client for the land registry price-paid data
pub struct SparqlRegistryClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl SparqlRegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: config.endpoint.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl RegistryClientPort for SparqlRegistryClient {
    async fn query(&self, query: &str) -> Result<Vec<Row>> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/sparql-query")
            .header(ACCEPT, "application/json")
            .body(query.to_string())
            .send()
            .await
            .map_err(|e| transport_error(REGISTRY, self.timeout, e))?;
        let body = success_body(REGISTRY, self.timeout, resp).await?;
        let rows = parse_bindings(&body)?;
        debug!(rows = rows.len(), "registry query returned");
        Ok(rows)
    }
}

/// Flatten `{results:{bindings:[{var:{value}}]}}` into rows of var -> value.
pub fn parse_bindings(body: &str) -> Result<Vec<Row>> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| ResolveError::parse(REGISTRY, format!("body is not JSON: {}", e)))?;
    let bindings = json["results"]["bindings"]
        .as_array()
        .ok_or_else(|| ResolveError::parse(REGISTRY, "missing results.bindings"))?;

    Ok(bindings
        .iter()
        .filter_map(Value::as_object)
        .map(|binding| {
            binding
                .iter()
                .filter_map(|(var, cell)| {
                    let value = match &cell["value"] {
                        Value::String(s) => s.clone(),
                        Value::Null => return None,
                        other => other.to_string(),
                    };
                    Some((var.clone(), value))
                })
                .collect::<Row>()
        })
        .collect())
}
