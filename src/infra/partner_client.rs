use crate::app::ports::{PartnerLookupPort, PartnerRecord};
use crate::common::constants::PARTNER;
use crate::common::error::{ResolveError, Result};
use crate::common::types::Identifier;
use crate::config::PartnerConfig;
use crate::infra::http_client::{build_client, success_body, transport_error};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct PartnerApiClient {
    client: reqwest::Client,
    base_url: String,
    user_email: String,
    timeout: Duration,
}

impl PartnerApiClient {
    pub fn new(config: &PartnerConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            client: build_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_email: config.user_email.clone(),
            timeout,
        })
    }

    fn property_url(&self, identifier: &Identifier) -> String {
        format!("{}/api/property/{}", self.base_url, identifier)
    }
}

#[async_trait]
impl PartnerLookupPort for PartnerApiClient {
    #[instrument(skip(self), fields(identifier = %identifier))]
    async fn lookup(&self, identifier: &Identifier) -> Result<PartnerRecord> {
        let url = self.property_url(identifier);
        debug!(%url, "partner lookup");
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("user", self.user_email.as_str()),
                ("spectatorFilter", self.user_email.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PARTNER, self.timeout, e))?;
        let body = success_body(PARTNER, self.timeout, resp).await?;
        parse_partner_body(&body)
    }
}

/// Decode a `{success, data?, error?}` envelope.
pub fn parse_partner_body(body: &str) -> Result<PartnerRecord> {
    let raw: Value = serde_json::from_str(body)
        .map_err(|e| ResolveError::parse(PARTNER, format!("body is not JSON: {}", e)))?;
    if !raw["success"].as_bool().unwrap_or(false) {
        let message = raw["error"]
            .as_str()
            .unwrap_or("partner reported failure")
            .to_string();
        return Err(ResolveError::api(PARTNER, None, message));
    }
    let data = raw["data"]
        .as_object()
        .cloned()
        .ok_or_else(|| ResolveError::parse(PARTNER, "response has no data object"))?;
    Ok(PartnerRecord { data, raw })
}
