use crate::common::constants::MAX_PLAUSIBLE_PRICE;
use crate::common::error::{ResolveError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque listing identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Trim and validate an identifier. Identifiers end up in URL paths, so
    /// whitespace and slashes are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ResolveError::Validation("identifier is empty".to_string()));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(ResolveError::Validation(format!(
                "identifier '{}' contains whitespace or '/'",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optional postal-code hint. An inward part is only kept alongside an outward part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalHint {
    pub outward: Option<String>,
    pub inward: Option<String>,
}

impl PostalHint {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(outward: Option<&str>, inward: Option<&str>) -> Result<Self> {
        let outward = outward
            .map(|o| o.trim().to_uppercase())
            .filter(|o| !o.is_empty());
        if let Some(o) = &outward {
            if !(2..=4).contains(&o.len()) || !o.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ResolveError::Validation(format!(
                    "outward postcode '{}' is not 2-4 alphanumeric characters",
                    o
                )));
            }
        }
        let inward = match outward {
            Some(_) => inward
                .map(|i| i.trim().to_uppercase())
                .filter(|i| !i.is_empty()),
            None => None,
        };
        Ok(Self { outward, inward })
    }

    /// Full postcode ("SW1W 8BT") when both parts are present.
    pub fn full_postcode(&self) -> Option<String> {
        match (&self.outward, &self.inward) {
            (Some(o), Some(i)) => Some(format!("{} {}", o, i)),
            _ => None,
        }
    }

    pub fn outcode(&self) -> Option<&str> {
        self.outward.as_deref()
    }
}

/// One historical sale scraped from a listing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub year: i32,
    pub raw_price: i64,
    pub display_price: String,
}

/// Drop implausible prices, dedupe by (year, raw_price) and order
/// newest-first. Ties keep page order.
pub fn prepare_sales(sales: Vec<SaleRecord>) -> Vec<SaleRecord> {
    let mut seen = std::collections::HashSet::new();
    let mut unique: Vec<SaleRecord> = sales
        .into_iter()
        .filter(|s| s.raw_price > 0 && s.raw_price <= MAX_PLAUSIBLE_PRICE)
        .filter(|s| seen.insert((s.year, s.raw_price)))
        .collect();
    unique.sort_by(|a, b| b.year.cmp(&a.year));
    unique
}

/// Registry query strategy, most to least restrictive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStrategy {
    #[serde(rename = "postcode-year-price")]
    PostcodeYearPrice,
    #[serde(rename = "postcode-year")]
    PostcodeYear,
    #[serde(rename = "outcode-year-price")]
    OutcodeYearPrice,
    #[serde(rename = "outcode-year")]
    OutcodeYear,
    #[serde(rename = "date-range-price-band")]
    DateRangePriceBand,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::PostcodeYearPrice => "postcode-year-price",
            MatchStrategy::PostcodeYear => "postcode-year",
            MatchStrategy::OutcodeYearPrice => "outcode-year-price",
            MatchStrategy::OutcodeYear => "outcode-year",
            MatchStrategy::DateRangePriceBand => "date-range-price-band",
        }
    }

    /// Strategies to try for a hint, in order
    pub fn plan_for(hint: &PostalHint) -> &'static [MatchStrategy] {
        use MatchStrategy::*;
        match (hint.outward.is_some(), hint.inward.is_some()) {
            (true, true) => &[
                PostcodeYearPrice,
                PostcodeYear,
                OutcodeYearPrice,
                OutcodeYear,
                DateRangePriceBand,
            ],
            (true, false) => &[OutcodeYearPrice, OutcodeYear],
            _ => &[],
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Partner,
    Registry,
    Error,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Partner => "partner",
            SourceTag::Registry => "registry",
            SourceTag::Error => "error",
        }
    }
}

/// Outcome of one resolution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub success: bool,
    pub address: Option<String>,
    pub confidence: f64,
    pub source_tag: SourceTag,
    pub strategy: Option<MatchStrategy>,
    pub response_time_ms: u64,
    pub errors: Vec<String>,
    /// Provenance: step name, verified fields, raw response for audit
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ResolutionResult {
    pub fn failure(errors: Vec<String>, response_time_ms: u64) -> Self {
        Self {
            success: false,
            address: None,
            confidence: 0.0,
            source_tag: SourceTag::Error,
            strategy: None,
            response_time_ms,
            errors,
            metadata: BTreeMap::new(),
        }
    }

    /// Every step's error joined into one message
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}

/// One unit of work for a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub identifier: Identifier,
    #[serde(default)]
    pub hint: PostalHint,
}

impl Job {
    pub fn new(identifier: Identifier, hint: PostalHint) -> Self {
        Self { identifier, hint }
    }

    pub fn parse(identifier: &str, outward: Option<&str>, inward: Option<&str>) -> Result<Self> {
        Ok(Self {
            identifier: Identifier::parse(identifier)?,
            hint: PostalHint::new(outward, inward)?,
        })
    }
}

/// Per-identifier result kept for a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub identifier: Identifier,
    pub result: ResolutionResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_rejects_blank_and_path_characters() {
        assert!(Identifier::parse("  ").is_err());
        assert!(Identifier::parse("12/34").is_err());
        assert!(Identifier::parse("12 34").is_err());
        assert_eq!(Identifier::parse(" 163926191 ").unwrap().as_str(), "163926191");
    }

    #[test]
    fn inward_without_outward_is_dropped() {
        let hint = PostalHint::new(None, Some("8BT")).unwrap();
        assert_eq!(hint, PostalHint::none());

        let hint = PostalHint::new(Some("sw1w"), Some("8bt")).unwrap();
        assert_eq!(hint.full_postcode().as_deref(), Some("SW1W 8BT"));
        assert!(PostalHint::new(Some("SW1W9"), None).is_err());
    }

    #[test]
    fn sales_are_deduplicated_and_newest_first() {
        let sale = |year, raw_price| SaleRecord {
            year,
            raw_price,
            display_price: format!("£{}", raw_price),
        };
        let prepared = prepare_sales(vec![
            sale(2015, 300_000),
            sale(2022, 450_000),
            sale(2015, 300_000),
            sale(2019, 410_000),
        ]);
        let years: Vec<i32> = prepared.iter().map(|s| s.year).collect();
        assert_eq!(years, vec![2022, 2019, 2015]);
    }

    #[test]
    fn implausible_prices_are_dropped() {
        let sale = |year, raw_price| SaleRecord {
            year,
            raw_price,
            display_price: format!("£{}", raw_price),
        };
        let prepared = prepare_sales(vec![
            sale(2021, i64::MAX),
            sale(2020, 0),
            sale(2019, -5),
            sale(2018, MAX_PLAUSIBLE_PRICE + 1),
            sale(2017, 275_000),
        ]);
        assert_eq!(prepared, vec![sale(2017, 275_000)]);
    }

    #[test]
    fn outcode_only_plan_skips_full_postcode_and_date_range() {
        let hint = PostalHint::new(Some("SW1W"), None).unwrap();
        assert_eq!(
            MatchStrategy::plan_for(&hint),
            &[MatchStrategy::OutcodeYearPrice, MatchStrategy::OutcodeYear]
        );
        assert!(MatchStrategy::plan_for(&PostalHint::none()).is_empty());
    }

    #[test]
    fn strategy_serializes_as_label() {
        let json = serde_json::to_string(&MatchStrategy::PostcodeYearPrice).unwrap();
        assert_eq!(json, "\"postcode-year-price\"");
    }
}
