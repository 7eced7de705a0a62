use crate::app::ports::ListingExtractorPort;
use crate::common::constants::LISTING;
use crate::common::error::{ResolveError, Result};
use crate::common::types::{prepare_sales, Identifier, SaleRecord};
use crate::config::ListingConfig;
use crate::infra::http_client::{build_client, success_body, transport_error};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, instrument};

static SALE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("static regex"));
static SALE_PRICE: Lazy<Regex> = Lazy::new(|| Regex::new(r"£\s?(\d[\d,]*)").expect("static regex"));

/// Scrapes the sale-history block of a listing page
pub struct HtmlListingExtractor {
    client: reqwest::Client,
    base_url: String,
    rows: Selector,
    timeout: Duration,
}

impl HtmlListingExtractor {
    pub fn new(config: &ListingConfig) -> Result<Self> {
        let rows = Selector::parse(&config.sale_row_selector).map_err(|e| {
            ResolveError::Config(format!(
                "invalid listing.sale_row_selector '{}': {:?}",
                config.sale_row_selector, e
            ))
        })?;
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            client: build_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rows,
            timeout,
        })
    }
}

#[async_trait]
impl ListingExtractorPort for HtmlListingExtractor {
    #[instrument(skip(self), fields(identifier = %identifier))]
    async fn extract(&self, identifier: &Identifier) -> Result<Vec<SaleRecord>> {
        let url = format!("{}/properties/{}", self.base_url, identifier);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(LISTING, self.timeout, e))?;
        let body = success_body(LISTING, self.timeout, resp).await?;
        let sales = parse_sales(&body, &self.rows);
        debug!(sales = sales.len(), "listing sale history extracted");
        Ok(sales)
    }
}

/// Sale rows matched by `rows`, deduplicated and newest first. Rows without
/// both a year and a price are skipped.
pub fn parse_sales(html: &str, rows: &Selector) -> Vec<SaleRecord> {
    let document = Html::parse_document(html);
    let sales = document
        .select(rows)
        .filter_map(|row| {
            let text = row.text().collect::<Vec<_>>().join(" ");
            parse_sale_text(&text)
        })
        .collect();
    prepare_sales(sales)
}

fn parse_sale_text(text: &str) -> Option<SaleRecord> {
    let year = SALE_YEAR.find(text)?.as_str().parse().ok()?;
    let price = SALE_PRICE.captures(text)?;
    let raw_price = price[1].replace(',', "").parse().ok()?;
    Some(SaleRecord {
        year,
        raw_price,
        display_price: price[0].to_string(),
    })
}
