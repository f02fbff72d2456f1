use std::collections::{BTreeMap, HashMap};

use crate::model::{
    CustomerCoverage, CustomerFailure, CustomerSummary, FieldCounts, FieldSummary, MatchField,
    MatchResult, MatchStatus, QualityCounts, QualityFlag, ReconSummary, SourceSummary,
    SourceType, StatusCounts,
};

/// Points below the fuzzy threshold that still count as a near miss.
pub const NEAR_MISS_MARGIN: f64 = 10.0;

impl StatusCounts {
    fn record(&mut self, status: MatchStatus) {
        match status {
            MatchStatus::Exact => self.exact += 1,
            MatchStatus::Fuzzy => self.fuzzy += 1,
            MatchStatus::NoMatch => self.no_match += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.exact + self.fuzzy + self.no_match
    }

    /// Share of rows linked to an order, 0-1.
    pub fn match_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (self.exact + self.fuzzy) as f64 / total as f64
        }
    }
}

impl QualityCounts {
    fn record(&mut self, flag: QualityFlag) {
        match flag {
            QualityFlag::Good => self.good += 1,
            QualityFlag::Acceptable => self.acceptable += 1,
            QualityFlag::Questionable => self.questionable += 1,
            QualityFlag::Poor => self.poor += 1,
        }
    }
}

impl FieldCounts {
    fn record(&mut self, field: Option<MatchField>) {
        match field {
            Some(MatchField::Po) => self.po += 1,
            Some(MatchField::AltPo) => self.alt_po += 1,
            None => self.none += 1,
        }
    }
}

/// True for a NO_MATCH row whose best score fell just short of the threshold.
pub fn is_near_miss(result: &MatchResult, threshold: f64) -> bool {
    result.status == MatchStatus::NoMatch
        && result.best_score > 0.0
        && result.best_score >= threshold - NEAR_MISS_MARGIN
}

fn field_summary(results: &[MatchResult], field: MatchField) -> FieldSummary {
    let score = |r: &MatchResult| match field {
        MatchField::Po => r.po_match_score,
        MatchField::AltPo => r.alt_po_match_score,
    };
    let won: Vec<&MatchResult> = results.iter().filter(|r| r.best_match_field == Some(field)).collect();
    let mean_score = if results.is_empty() {
        0.0
    } else {
        results.iter().map(score).sum::<f64>() / results.len() as f64
    };

    FieldSummary {
        field,
        best_match_count: won.len(),
        exact: won.iter().filter(|r| r.status == MatchStatus::Exact).count(),
        fuzzy: won.iter().filter(|r| r.status == MatchStatus::Fuzzy).count(),
        perfect_scores: results.iter().filter(|r| score(r) >= 100.0).count(),
        mean_score,
    }
}

/// Field-level and customer-level statistics over the final result rows.
///
/// `coverage` carries the order-side figures the result rows cannot
/// reconstruct (order groups never linked). Customers appear if they have
/// results, coverage or a failure.
pub fn compute_summary(
    results: &[MatchResult],
    coverage: &[CustomerCoverage],
    failures: &[CustomerFailure],
    fuzzy_threshold: f64,
) -> ReconSummary {
    let mut status = StatusCounts::default();
    let mut fields = FieldCounts::default();
    let mut quality = QualityCounts::default();
    let mut by_source: BTreeMap<SourceType, SourceSummary> = BTreeMap::new();
    let mut customers: BTreeMap<&str, CustomerSummary> = BTreeMap::new();

    let blank = |name: &str| CustomerSummary {
        customer: name.to_string(),
        fulfillment_groups: 0,
        order_groups: 0,
        unlinked_orders: 0,
        fulfilled_qty: 0,
        ordered_qty: 0,
        status: StatusCounts::default(),
        fields: FieldCounts::default(),
        quality: QualityCounts::default(),
        match_rate: 0.0,
        failure: None,
    };

    for r in results {
        status.record(r.status);
        fields.record(r.best_match_field);
        quality.record(r.quality);

        let src = by_source.entry(r.source).or_insert_with(|| SourceSummary {
            source: r.source,
            rows: 0,
            status: StatusCounts::default(),
        });
        src.rows += 1;
        src.status.record(r.status);

        let c = customers.entry(&r.customer).or_insert_with(|| blank(&r.customer));
        c.fulfillment_groups += 1;
        c.fulfilled_qty += r.fulfilled_qty;
        c.status.record(r.status);
        c.fields.record(r.best_match_field);
        c.quality.record(r.quality);
    }

    for cov in coverage {
        let c = customers.entry(&cov.customer).or_insert_with(|| blank(&cov.customer));
        c.order_groups = cov.order_groups;
        c.unlinked_orders = cov.unlinked_orders;
        c.ordered_qty = cov.ordered_qty;
    }

    let failure_by_customer: HashMap<&str, &CustomerFailure> =
        failures.iter().map(|f| (f.customer.as_str(), f)).collect();
    for f in failures {
        customers.entry(&f.customer).or_insert_with(|| blank(&f.customer));
    }

    let customers: Vec<CustomerSummary> = customers
        .into_values()
        .map(|mut c| {
            c.match_rate = c.status.match_rate();
            c.failure = failure_by_customer.get(c.customer.as_str()).map(|f| f.reason.clone());
            c
        })
        .collect();

    ReconSummary {
        total_results: results.len(),
        match_rate: status.match_rate(),
        status,
        fields,
        quality,
        near_misses: results.iter().filter(|r| is_near_miss(r, fuzzy_threshold)).count(),
        field_stats: vec![
            field_summary(results, MatchField::Po),
            field_summary(results, MatchField::AltPo),
        ],
        by_source: by_source.into_values().collect(),
        failed_customers: failure_by_customer.len(),
        customers,
    }
}
