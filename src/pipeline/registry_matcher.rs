use crate::app::ports::{RegistryClientPort, Row};
use crate::common::types::{MatchStrategy, PostalHint, SaleRecord};
use crate::observability::metrics;
use crate::pipeline::address::format_registry_address;
use crate::pipeline::registry_query::QueryBuilder;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// A verified registry hit
#[derive(Debug, Clone, Serialize)]
pub struct RegistryMatch {
    pub address: String,
    pub strategy: MatchStrategy,
    pub sale: SaleRecord,
    /// The row the address was built from
    pub row: Row,
    /// How many rows the winning query returned. Only the first is used.
    pub candidates: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Hit,
    Miss,
    Failed(String),
}

/// One query sent to the registry
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub strategy: MatchStrategy,
    pub year: i32,
    pub raw_price: i64,
    pub outcome: AttemptOutcome,
}

/// Result of matching one listing. `matched` is None when nothing verified.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchReport {
    pub matched: Option<RegistryMatch>,
    pub attempts: Vec<Attempt>,
}

impl MatchReport {
    pub fn failure_reason(&self) -> String {
        let failed = self
            .attempts
            .iter()
            .filter(|a| matches!(a.outcome, AttemptOutcome::Failed(_)))
            .count();
        if self.attempts.is_empty() {
            "no registry strategy applies to the postal hint".to_string()
        } else if failed > 0 {
            format!(
                "no registry match after {} queries ({} failed)",
                self.attempts.len(),
                failed
            )
        } else {
            format!("no registry match after {} queries", self.attempts.len())
        }
    }
}

/// Tries each strategy against each sale (newest first) until a query returns rows.
pub struct RegistryMatcher {
    client: Arc<dyn RegistryClientPort>,
    queries: QueryBuilder,
}

impl RegistryMatcher {
    pub fn new(client: Arc<dyn RegistryClientPort>, queries: QueryBuilder) -> Self {
        Self { client, queries }
    }

    /// `sales` must already be deduplicated and ordered newest-first.
    pub async fn find_match(&self, hint: &PostalHint, sales: &[SaleRecord]) -> MatchReport {
        let mut report = MatchReport::default();
        let plan = MatchStrategy::plan_for(hint);

        for sale in sales {
            for &strategy in plan {
                let Some(query) = self.queries.build(strategy, hint, sale) else {
                    continue;
                };
                debug!(strategy = %strategy, year = sale.year, price = sale.raw_price, "registry query");

                let outcome = match self.client.query(&query).await {
                    Ok(rows) if !rows.is_empty() => {
                        let candidates = rows.len();
                        let row = rows.into_iter().next().unwrap_or_default();
                        report.attempts.push(Attempt {
                            strategy,
                            year: sale.year,
                            raw_price: sale.raw_price,
                            outcome: AttemptOutcome::Hit,
                        });
                        metrics::registry::strategy_hit(strategy.as_str());
                        if candidates > 1 {
                            debug!(strategy = %strategy, candidates, "multiple registry candidates, taking the first");
                        }
                        report.matched = Some(RegistryMatch {
                            address: format_registry_address(&row),
                            strategy,
                            sale: sale.clone(),
                            row,
                            candidates,
                        });
                        return report;
                    }
                    Ok(_) => AttemptOutcome::Miss,
                    Err(e) => {
                        warn!(strategy = %strategy, error = %e, "registry query failed");
                        metrics::registry::query_error();
                        AttemptOutcome::Failed(e.to_string())
                    }
                };
                report.attempts.push(Attempt {
                    strategy,
                    year: sale.year,
                    raw_price: sale.raw_price,
                    outcome,
                });
            }
        }

        metrics::registry::no_match();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::{ResolveError, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers with rows when the query contains the trigger fragment.
    struct ScriptedRegistry {
        answers: Vec<(&'static str, Vec<Row>)>,
        fail_on: Option<&'static str>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedRegistry {
        fn new(answers: Vec<(&'static str, Vec<Row>)>) -> Self {
            Self { answers, fail_on: None, seen: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl RegistryClientPort for ScriptedRegistry {
        async fn query(&self, query: &str) -> Result<Vec<Row>> {
            self.seen.lock().unwrap().push(query.to_string());
            if let Some(f) = self.fail_on {
                if query.contains(f) {
                    return Err(ResolveError::timeout("registry query", 45_000));
                }
            }
            for (fragment, rows) in &self.answers {
                if query.contains(fragment) {
                    return Ok(rows.clone());
                }
            }
            Ok(Vec::new())
        }
    }

    fn row(paon: &str, street: &str, postcode: &str) -> Row {
        [("paon", paon), ("street", street), ("postcode", postcode)]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sale(year: i32, raw_price: i64) -> SaleRecord {
        SaleRecord { year, raw_price, display_price: format!("£{}", raw_price) }
    }

    fn matcher(registry: Arc<ScriptedRegistry>) -> RegistryMatcher {
        RegistryMatcher::new(registry, QueryBuilder::default())
    }

    #[tokio::test]
    async fn first_row_of_first_successful_query_wins() {
        let registry = Arc::new(ScriptedRegistry::new(vec![
            (
                "?postcode = \"SW1W 8BT\"",
                vec![row("6", "whistler square", "SW1W 8BT"), row("8", "whistler square", "SW1W 8BT")],
            ),
            ("STRSTARTS", vec![row("99", "other road", "SW1W 9ZZ")]),
        ]));
        let hint = PostalHint::new(Some("SW1W"), Some("8BT")).unwrap();
        let report = matcher(registry.clone()).find_match(&hint, &[sale(2022, 450_000)]).await;

        let m = report.matched.expect("match");
        assert_eq!(m.strategy, MatchStrategy::PostcodeYearPrice);
        assert_eq!(m.address, "6, Whistler Square, London, SW1W 8BT");
        assert_eq!(m.candidates, 2);
        assert_eq!(registry.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn strategies_run_in_documented_order_per_sale() {
        let registry = Arc::new(ScriptedRegistry::new(vec![]));
        let hint = PostalHint::new(Some("SW1W"), Some("8BT")).unwrap();
        let report = matcher(registry)
            .find_match(&hint, &[sale(2022, 450_000), sale(2015, 300_000)])
            .await;

        assert!(report.matched.is_none());
        let order: Vec<(MatchStrategy, i32)> = report.attempts.iter().map(|a| (a.strategy, a.year)).collect();
        use MatchStrategy::*;
        assert_eq!(
            order,
            vec![
                (PostcodeYearPrice, 2022),
                (PostcodeYear, 2022),
                (OutcodeYearPrice, 2022),
                (OutcodeYear, 2022),
                (DateRangePriceBand, 2022),
                (PostcodeYearPrice, 2015),
                (PostcodeYear, 2015),
                (OutcodeYearPrice, 2015),
                (OutcodeYear, 2015),
                (DateRangePriceBand, 2015),
            ]
        );
    }

    #[tokio::test]
    async fn outcode_only_hint_never_runs_full_postcode_or_date_range() {
        let registry = Arc::new(ScriptedRegistry::new(vec![]));
        let hint = PostalHint::new(Some("SW1W"), None).unwrap();
        let report = matcher(registry.clone()).find_match(&hint, &[sale(2022, 450_000)]).await;

        let strategies: Vec<MatchStrategy> = report.attempts.iter().map(|a| a.strategy).collect();
        assert_eq!(strategies, vec![MatchStrategy::OutcodeYearPrice, MatchStrategy::OutcodeYear]);
        for q in registry.seen.lock().unwrap().iter() {
            assert!(q.contains("STRSTARTS"));
            assert!(!q.contains("?amount >="));
        }
    }

    #[tokio::test]
    async fn failed_query_falls_through_to_next_strategy() {
        let mut registry = ScriptedRegistry::new(vec![("STRSTARTS", vec![row("14", "eaton terrace", "SW1W 8EZ")])]);
        registry.fail_on = Some("?postcode = \"SW1W 8BT\"");
        let registry = Arc::new(registry);
        let hint = PostalHint::new(Some("SW1W"), Some("8BT")).unwrap();
        let report = matcher(registry).find_match(&hint, &[sale(2022, 450_000)]).await;

        assert_eq!(report.attempts.len(), 3);
        assert!(matches!(report.attempts[0].outcome, AttemptOutcome::Failed(_)));
        let m = report.matched.unwrap();
        assert_eq!(m.strategy, MatchStrategy::OutcodeYearPrice);
        assert_eq!(m.address, "14, Eaton Terrace, London, SW1W 8EZ");
    }

    #[tokio::test]
    async fn extreme_price_skips_date_range_without_panicking() {
        let registry = Arc::new(ScriptedRegistry::new(vec![]));
        let hint = PostalHint::new(Some("SW1W"), Some("8BT")).unwrap();
        let report = matcher(registry.clone())
            .find_match(&hint, &[sale(2022, i64::MAX), sale(2015, 300_000)])
            .await;

        assert!(report.matched.is_none());
        use MatchStrategy::*;
        let first_sale: Vec<MatchStrategy> = report
            .attempts
            .iter()
            .filter(|a| a.year == 2022)
            .map(|a| a.strategy)
            .collect();
        assert_eq!(first_sale, vec![PostcodeYearPrice, PostcodeYear, OutcodeYearPrice, OutcodeYear]);
        // the older sale still gets every strategy
        assert_eq!(report.attempts.len(), 9);
        assert_eq!(registry.seen.lock().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn absent_hint_reports_no_applicable_strategy() {
        let registry = Arc::new(ScriptedRegistry::new(vec![]));
        let report = matcher(registry).find_match(&PostalHint::none(), &[sale(2022, 1)]).await;
        assert!(report.matched.is_none());
        assert_eq!(report.failure_reason(), "no registry strategy applies to the postal hint");
    }
}
