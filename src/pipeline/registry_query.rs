use crate::common::types::{MatchStrategy, PostalHint, SaleRecord};

const PREFIXES: &str = "PREFIX lrppi: <http://landregistry.data.gov.uk/def/ppi/>
PREFIX lrcommon: <http://landregistry.data.gov.uk/def/common/>
PREFIX xsd: <http://www.w3.org/2001/XMLSchema#>";

/// Renders price-paid SPARQL queries for each match strategy.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    pub row_limit: usize,
    /// Fractional price tolerance for the date-range strategy (0.05 = ±5%)
    pub price_band: f64,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self {
            row_limit: 5,
            price_band: 0.05,
        }
    }
}

impl QueryBuilder {
    pub fn new(row_limit: usize, price_band: f64) -> Self {
        Self { row_limit, price_band }
    }

    /// None when the hint lacks the postcode precision the strategy needs, or
    /// when the price band cannot be represented.
    pub fn build(&self, strategy: MatchStrategy, hint: &PostalHint, sale: &SaleRecord) -> Option<String> {
        let mut filters = Vec::new();
        match strategy {
            MatchStrategy::PostcodeYearPrice | MatchStrategy::PostcodeYear => {
                let postcode = hint.full_postcode()?;
                filters.push(format!("FILTER(?postcode = \"{}\")", escape_literal(&postcode)));
            }
            MatchStrategy::OutcodeYearPrice | MatchStrategy::OutcodeYear => {
                let outcode = hint.outcode()?;
                filters.push(format!(
                    "FILTER(STRSTARTS(?postcode, \"{} \"))",
                    escape_literal(outcode)
                ));
            }
            MatchStrategy::DateRangePriceBand => {}
        }

        filters.push(format!("FILTER(YEAR(?date) = {})", sale.year));

        match strategy {
            MatchStrategy::PostcodeYearPrice | MatchStrategy::OutcodeYearPrice => {
                filters.push(format!("FILTER(?amount = {})", sale.raw_price));
            }
            MatchStrategy::DateRangePriceBand => {
                let (low, high) = self.price_range(sale.raw_price)?;
                filters.push(format!("FILTER(?amount >= {} && ?amount <= {})", low, high));
            }
            MatchStrategy::PostcodeYear | MatchStrategy::OutcodeYear => {}
        }

        Some(format!(
            "{prefixes}
SELECT ?paon ?saon ?street ?town ?postcode ?amount ?date WHERE {{
  ?transx lrppi:pricePaid ?amount ;
          lrppi:transactionDate ?date ;
          lrppi:propertyAddress ?addr .
  ?addr lrcommon:postcode ?postcode .
  OPTIONAL {{ ?addr lrcommon:paon ?paon }}
  OPTIONAL {{ ?addr lrcommon:saon ?saon }}
  OPTIONAL {{ ?addr lrcommon:street ?street }}
  OPTIONAL {{ ?addr lrcommon:town ?town }}
  {filters}
}}
ORDER BY DESC(?date)
LIMIT {limit}",
            prefixes = PREFIXES,
            filters = filters.join("\n  "),
            limit = self.row_limit,
        ))
    }

    /// Inclusive bounds of the price band, None on overflow.
    pub fn price_range(&self, price: i64) -> Option<(i64, i64)> {
        // basis points keep the bounds exact for whole-pound prices
        let band_bp = (self.price_band * 10_000.0).round() as i64;
        let delta = price.checked_mul(band_bp)? / 10_000;
        Some((price.checked_sub(delta)?, price.checked_add(delta)?))
    }
}

fn escape_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale() -> SaleRecord {
        SaleRecord {
            year: 2022,
            raw_price: 450_000,
            display_price: "£450,000".to_string(),
        }
    }

    fn full_hint() -> PostalHint {
        PostalHint::new(Some("SW1W"), Some("8BT")).unwrap()
    }

    #[test]
    fn postcode_year_price_filters_exact_values() {
        let q = QueryBuilder::default()
            .build(MatchStrategy::PostcodeYearPrice, &full_hint(), &sale())
            .unwrap();
        assert!(q.contains("FILTER(?postcode = \"SW1W 8BT\")"));
        assert!(q.contains("FILTER(YEAR(?date) = 2022)"));
        assert!(q.contains("FILTER(?amount = 450000)"));
        assert!(q.trim_end().ends_with("LIMIT 5"));
    }

    #[test]
    fn outcode_year_drops_price_and_truncates_postcode() {
        let q = QueryBuilder::default()
            .build(MatchStrategy::OutcodeYear, &full_hint(), &sale())
            .unwrap();
        assert!(q.contains("STRSTARTS(?postcode, \"SW1W \")"));
        assert!(!q.contains("?amount ="));
        assert!(!q.contains("\"SW1W 8BT\""));
    }

    #[test]
    fn date_range_has_no_postcode_filter() {
        let q = QueryBuilder::default()
            .build(MatchStrategy::DateRangePriceBand, &full_hint(), &sale())
            .unwrap();
        assert!(!q.contains("FILTER(?postcode"));
        assert!(!q.contains("STRSTARTS"));
        assert!(q.contains("?amount >= 427500 && ?amount <= 472500"));
    }

    #[test]
    fn price_band_overflow_skips_date_range() {
        let builder = QueryBuilder::default();
        assert_eq!(builder.price_range(450_000), Some((427_500, 472_500)));
        assert_eq!(builder.price_range(i64::MAX), None);

        let extreme = SaleRecord {
            raw_price: i64::MAX,
            ..sale()
        };
        assert!(builder
            .build(MatchStrategy::DateRangePriceBand, &full_hint(), &extreme)
            .is_none());
        assert!(builder
            .build(MatchStrategy::PostcodeYearPrice, &full_hint(), &extreme)
            .is_some());
    }

    #[test]
    fn full_postcode_strategy_needs_inward_part() {
        let hint = PostalHint::new(Some("SW1W"), None).unwrap();
        assert!(QueryBuilder::default()
            .build(MatchStrategy::PostcodeYear, &hint, &sale())
            .is_none());
    }
}
