use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate_fulfillment, aggregate_orders};
use crate::classify::classify;
use crate::config::{MatchingConfig, ReconConfig};
use crate::error::ReconError;
use crate::fuzzy::match_fuzzy;
use crate::matcher::{duplication_ratio, match_exact};
use crate::model::{
    CustomerCoverage, CustomerFailure, FailureReason, FulfillmentAggregate, Linkage, MatchResult,
    OrderAggregate, ReconInput, ReconMeta, ReconResult,
};
use crate::summary::compute_summary;

/// Everything one customer contributes to the run.
#[derive(Debug, Default)]
struct Partition {
    customer: String,
    orders: Vec<OrderAggregate>,
    fulfillment: Vec<FulfillmentAggregate>,
}

#[derive(Debug)]
struct CustomerOutcome {
    results: Vec<MatchResult>,
    coverage: CustomerCoverage,
    failure: Option<CustomerFailure>,
}

/// Run reconciliation per config. Returns match results, summary and
/// per-customer failures. One customer's failure never aborts the batch.
pub fn run(config: &ReconConfig, input: &ReconInput) -> Result<ReconResult, ReconError> {
    config.validate()?;

    let customers = config.customer_directory();
    let orders = aggregate_orders(&input.orders, &customers);
    let fulfillment = aggregate_fulfillment(&input.fulfillment, &customers);
    let (order_groups, fulfillment_groups) = (orders.len(), fulfillment.len());

    let partitions = partition(orders, fulfillment);
    let unconfigured = partitions.iter().filter(|p| !customers.is_configured(&p.customer)).count();
    if unconfigured > 0 && !config.customers.is_empty() {
        warn!(unconfigured, "customers without matching config use the default style strategy");
    }
    info!(
        customers = partitions.len(),
        order_groups,
        fulfillment_groups,
        parallel = config.matching.parallel,
        "reconciling"
    );

    let outcomes: Vec<CustomerOutcome> = if config.matching.parallel {
        partitions.par_iter().map(|p| process_customer(p, config)).collect()
    } else {
        partitions.iter().map(|p| process_customer(p, config)).collect()
    };

    let mut results = Vec::with_capacity(fulfillment_groups);
    let mut coverage = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        results.extend(outcome.results);
        coverage.push(outcome.coverage);
        failures.extend(outcome.failure);
    }

    results.sort_by(|a, b| {
        (&a.customer, a.source, &a.style, &a.color, &a.size, &a.po, &a.alt_po)
            .cmp(&(&b.customer, b.source, &b.style, &b.color, &b.size, &b.po, &b.alt_po))
    });

    let summary = compute_summary(&results, &coverage, &failures, config.matching.fuzzy_threshold);
    info!(
        results = summary.total_results,
        exact = summary.status.exact,
        fuzzy = summary.status.fuzzy,
        no_match = summary.status.no_match,
        failed_customers = summary.failed_customers,
        "reconciliation complete"
    );

    Ok(ReconResult {
        meta: ReconMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            fuzzy_threshold: config.matching.fuzzy_threshold,
            order_rows: input.orders.len(),
            fulfillment_rows: input.fulfillment.len(),
            order_groups,
            fulfillment_groups,
        },
        summary,
        results,
        failures,
    })
}

/// Split aggregates by canonical customer. Both inputs are key-ordered, so
/// each partition stays key-ordered.
fn partition(orders: Vec<OrderAggregate>, fulfillment: Vec<FulfillmentAggregate>) -> Vec<Partition> {
    let mut by_customer: BTreeMap<String, Partition> = BTreeMap::new();
    for order in orders {
        let customer = order.key.descriptor.customer.clone();
        by_customer
            .entry(customer.clone())
            .or_insert_with(|| Partition { customer, ..Partition::default() })
            .orders
            .push(order);
    }
    for row in fulfillment {
        let customer = row.key.descriptor.customer.clone();
        by_customer
            .entry(customer.clone())
            .or_insert_with(|| Partition { customer, ..Partition::default() })
            .fulfillment
            .push(row);
    }
    by_customer.into_values().collect()
}

fn process_customer(p: &Partition, config: &ReconConfig) -> CustomerOutcome {
    isolate(p, || match_customer(p, config))
}

/// Run `f` for one customer; a panic becomes a recorded failure with no results.
fn isolate<F>(p: &Partition, f: F) -> CustomerOutcome
where
    F: FnOnce() -> CustomerOutcome,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            warn!(customer = %p.customer, panic = %message, "customer processing panicked; results dropped");
            CustomerOutcome {
                results: Vec::new(),
                coverage: coverage(p, &[]),
                failure: Some(CustomerFailure {
                    customer: p.customer.clone(),
                    reason: FailureReason::Panicked { message },
                }),
            }
        }
    }
}

fn match_customer(p: &Partition, config: &ReconConfig) -> CustomerOutcome {
    let exact = match_exact(&p.fulfillment, &p.orders);
    debug!(
        customer = %p.customer,
        fulfillment_groups = p.fulfillment.len(),
        order_groups = p.orders.len(),
        exact = exact.matched.len(),
        unmatched = exact.unmatched.len(),
        "exact stage"
    );

    let ratio = duplication_ratio(&exact.matched);
    if ratio > 1.0 {
        warn!(customer = %p.customer, ratio, "duplicate joins after exact stage");
    }

    let (rest, failure) = match_remaining(p, &exact.unmatched, &config.matching);

    let mut linkages = exact.matched;
    linkages.extend(rest);

    let results = classify(&p.fulfillment, &p.orders, &linkages, &config.quality);
    CustomerOutcome {
        coverage: coverage(p, &linkages),
        results,
        failure,
    }
}

/// Fuzzy stage on the exact stage's misses, unless the set is over the cap.
fn match_remaining(
    p: &Partition,
    unmatched: &[usize],
    config: &MatchingConfig,
) -> (Vec<Linkage>, Option<CustomerFailure>) {
    if unmatched.is_empty() {
        return (Vec::new(), None);
    }

    let limit = config.max_unmatched_per_customer;
    if unmatched.len() > limit {
        warn!(
            customer = %p.customer,
            unmatched = unmatched.len(),
            limit,
            "fuzzy stage skipped due to scale"
        );
        let rows = unmatched.iter().map(|&fi| Linkage::no_match(fi)).collect();
        let failure = CustomerFailure {
            customer: p.customer.clone(),
            reason: FailureReason::SkippedDueToScale {
                unmatched: unmatched.len(),
                limit,
            },
        };
        return (rows, Some(failure));
    }

    let fuzzy = match_fuzzy(unmatched, &p.fulfillment, &p.orders, config);
    debug!(
        customer = %p.customer,
        rows = unmatched.len(),
        chunks = fuzzy.chunks,
        matrices = fuzzy.matrices,
        peak_cells = fuzzy.peak_cells,
        "fuzzy stage"
    );
    (fuzzy.linkages, None)
}

fn coverage(p: &Partition, linkages: &[Linkage]) -> CustomerCoverage {
    let linked: HashSet<usize> = linkages.iter().filter_map(|l| l.order).collect();
    CustomerCoverage {
        customer: p.customer.clone(),
        order_groups: p.orders.len(),
        unlinked_orders: p.orders.len() - linked.len(),
        ordered_qty: p.orders.iter().map(|o| o.ordered_qty).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceType::{Packed, Shipped};
    use crate::model::{FulfillmentRecord, MatchField, MatchStatus, OrderLine, QualityFlag};

    fn config() -> ReconConfig {
        ReconConfig::default()
    }

    #[test]
    fn cross_field_scenario_is_exact_and_good() {
        let input = ReconInput {
            orders: vec![OrderLine::new("ACME", "123", "A", "RED", "M", 50).with_alt_po("NONE")],
            fulfillment: vec![
                FulfillmentRecord::new("ACME", "NONE", "A", "RED", "M", 50, Shipped).with_alt_po("123"),
            ],
        };
        let result = run(&config(), &input).unwrap();
        assert_eq!(result.results.len(), 1);
        let r = &result.results[0];
        assert_eq!(r.status, MatchStatus::Exact);
        assert_eq!(r.best_match_field, Some(MatchField::Po));
        assert_eq!(r.po_match_score, 100.0);
        assert_eq!(r.alt_po_match_score, 0.0);
        assert_eq!(r.variance_qty, 0);
        assert_eq!(r.quality, QualityFlag::Good);
        assert_eq!(r.matched_po.as_deref(), Some("123"));
        assert!(result.failures.is_empty());
    }

    #[test]
    fn exact_beats_fuzzy() {
        let input = ReconInput {
            orders: vec![
                OrderLine::new("ACME", "PO-124", "A", "RED", "M", 10),
                OrderLine::new("ACME", "PO-123", "A", "RED", "M", 10),
            ],
            fulfillment: vec![FulfillmentRecord::new("ACME", "PO-123", "A", "RED", "M", 10, Shipped)],
        };
        let result = run(&config(), &input).unwrap();
        let r = &result.results[0];
        assert_eq!(r.status, MatchStatus::Exact);
        assert_eq!(r.matched_po.as_deref(), Some("PO-123"));
        assert_eq!(r.best_score, 100.0);
    }

    #[test]
    fn shared_po_families_reconcile_as_one_group() {
        let input = ReconInput {
            orders: vec![
                OrderLine::new("ACME", "123", "A", "RED", "M", 30),
                OrderLine::new("ACME", "123", "A", "RED", "M", 20).with_alt_po("777"),
            ],
            fulfillment: vec![
                FulfillmentRecord::new("ACME", "123", "A", "RED", "M", 30, Shipped),
                FulfillmentRecord::new("ACME", "123", "A", "RED", "M", 20, Shipped).with_alt_po("777"),
            ],
        };
        let result = run(&config(), &input).unwrap();
        assert_eq!(result.results.len(), 2);
        for r in &result.results {
            assert_eq!(r.status, MatchStatus::Exact);
            assert_eq!(r.matched_alt_po, r.alt_po);
            assert_eq!(r.ordered_qty, r.fulfilled_qty);
            assert_eq!(r.group_po.as_deref(), Some("123"));
            assert_eq!(r.group_fulfilled_qty, 50);
            assert_eq!(r.group_ordered_qty, 50);
            assert_eq!(r.variance_pct, 0.0);
            assert_eq!(r.quality, QualityFlag::Good);
        }
        assert_eq!(result.summary.customers[0].unlinked_orders, 0);
    }

    #[test]
    fn customers_never_cross() {
        let input = ReconInput {
            orders: vec![OrderLine::new("ACME", "123", "A", "RED", "M", 10)],
            fulfillment: vec![FulfillmentRecord::new("BETA", "123", "A", "RED", "M", 10, Shipped)],
        };
        let result = run(&config(), &input).unwrap();
        let r = &result.results[0];
        assert_eq!(r.customer, "BETA");
        assert_eq!(r.status, MatchStatus::NoMatch);
        assert_eq!(r.best_score, 0.0);

        let names: Vec<&str> = result.summary.customers.iter().map(|c| c.customer.as_str()).collect();
        assert_eq!(names, vec!["ACME", "BETA"]);
        assert_eq!(result.summary.customers[0].unlinked_orders, 1);
    }

    #[test]
    fn scale_skip_keeps_exact_matches_and_other_customers() {
        let mut config = config();
        config.matching.fuzzy_chunk_size = 1;
        config.matching.max_unmatched_per_customer = 1;

        let input = ReconInput {
            orders: vec![
                OrderLine::new("ACME", "100", "A", "RED", "M", 10),
                OrderLine::new("ACME", "PO-200", "A", "RED", "M", 10),
                OrderLine::new("BETA", "PO-300", "A", "RED", "M", 10),
            ],
            fulfillment: vec![
                FulfillmentRecord::new("ACME", "100", "A", "RED", "M", 10, Shipped),
                FulfillmentRecord::new("ACME", "PO-201", "A", "RED", "M", 10, Shipped),
                FulfillmentRecord::new("ACME", "PO-202", "A", "RED", "M", 10, Packed),
                FulfillmentRecord::new("BETA", "PO-301", "A", "RED", "M", 10, Shipped),
            ],
        };
        let result = run(&config, &input).unwrap();

        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].customer, "ACME");
        assert_eq!(
            result.failures[0].reason,
            FailureReason::SkippedDueToScale { unmatched: 2, limit: 1 }
        );

        let acme: Vec<&MatchResult> = result.results.iter().filter(|r| r.customer == "ACME").collect();
        assert_eq!(acme.len(), 3);
        assert_eq!(acme.iter().filter(|r| r.status == MatchStatus::Exact).count(), 1);
        assert_eq!(acme.iter().filter(|r| r.status == MatchStatus::NoMatch).count(), 2);

        let beta = result.results.iter().find(|r| r.customer == "BETA").unwrap();
        assert_eq!(beta.status, MatchStatus::Fuzzy);
        assert!(result.summary.customers.iter().any(|c| c.customer == "ACME" && c.failure.is_some()));
    }

    #[test]
    fn panic_is_contained() {
        let p = Partition {
            customer: "ACME".into(),
            ..Partition::default()
        };
        let outcome = isolate(&p, || panic!("bad row"));
        assert!(outcome.results.is_empty());
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.customer, "ACME");
        assert_eq!(failure.reason, FailureReason::Panicked { message: "bad row".into() });
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let mut orders = Vec::new();
        let mut fulfillment = Vec::new();
        for c in ["ACME", "BETA", "GAMMA"] {
            for i in 0..15 {
                orders.push(OrderLine::new(c, &format!("PO-{i:03}"), "A", "RED", "M", 10));
                let po = if i % 3 == 0 { format!("PO-{i:03}") } else { format!("PO-{i:03}X") };
                fulfillment.push(FulfillmentRecord::new(c, &po, "A", "RED", "M", 9 + i % 2, Shipped));
            }
        }
        let input = ReconInput { orders, fulfillment };

        let mut seq = config();
        seq.matching.parallel = false;
        let a = run(&config(), &input).unwrap();
        let b = run(&seq, &input).unwrap();
        assert_eq!(a.results, b.results);
        assert_eq!(a.meta.order_rows, 45);
        assert_eq!(a.meta.fulfillment_groups, 45);
    }

    #[test]
    fn invalid_config_rejected() {
        let mut config = config();
        config.matching.fuzzy_threshold = 120.0;
        assert!(matches!(
            run(&config, &ReconInput::default()),
            Err(ReconError::ConfigValidation(_))
        ));
    }
}
