use std::collections::BTreeMap;

use tracing::info;

use crate::config::CustomerDirectory;
use crate::keys::{normalize_opt, po_token, resolve_style};
use crate::model::{
    AggregateKey, Descriptor, FulfillmentAggregate, FulfillmentRecord, GroupingFields,
    OrderAggregate, OrderLine, SourceType,
};

/// Grouping key shared by both sides. An alternate PO equal to the primary
/// carries no information and is dropped from the PO family.
pub fn aggregate_key<R: GroupingFields>(row: &R, customers: &CustomerDirectory) -> AggregateKey {
    let customer = customers.canonical(row.customer());
    let style_source = customers.strategy(&customer).style_source;
    let po = po_token(Some(row.po()));
    let alt_po = po_token(row.alt_po()).filter(|alt| po.as_ref() != Some(alt));

    AggregateKey {
        descriptor: Descriptor {
            style: resolve_style(row.style(), row.pattern_id(), style_source),
            color: normalize_opt(row.color()),
            size: normalize_opt(row.size()),
            customer,
        },
        po,
        alt_po,
    }
}

/// Group order lines by aggregate key, sum ordered quantity.
pub fn aggregate_orders(rows: &[OrderLine], customers: &CustomerDirectory) -> Vec<OrderAggregate> {
    let mut groups: BTreeMap<AggregateKey, (u64, usize)> = BTreeMap::new();

    for row in rows {
        let entry = groups.entry(aggregate_key(row, customers)).or_insert((0, 0));
        entry.0 += row.quantity;
        entry.1 += 1;
    }

    let out: Vec<OrderAggregate> = groups
        .into_iter()
        .map(|(key, (ordered_qty, record_count))| OrderAggregate {
            key,
            ordered_qty,
            record_count,
        })
        .collect();

    log_ratio("orders", rows.len(), out.len());
    out
}

/// Group fulfillment records by (aggregate key, source), sum fulfilled quantity.
pub fn aggregate_fulfillment(
    rows: &[FulfillmentRecord],
    customers: &CustomerDirectory,
) -> Vec<FulfillmentAggregate> {
    let mut groups: BTreeMap<(AggregateKey, SourceType), (u64, usize)> = BTreeMap::new();

    for row in rows {
        let key = (aggregate_key(row, customers), row.source);
        let entry = groups.entry(key).or_insert((0, 0));
        entry.0 += row.quantity;
        entry.1 += 1;
    }

    let out: Vec<FulfillmentAggregate> = groups
        .into_iter()
        .map(|((key, source), (fulfilled_qty, record_count))| FulfillmentAggregate {
            key,
            source,
            fulfilled_qty,
            record_count,
        })
        .collect();

    log_ratio("fulfillment", rows.len(), out.len());
    out
}

/// Pre/post aggregation row ratio.
pub fn aggregation_ratio(raw_rows: usize, groups: usize) -> f64 {
    if groups == 0 {
        1.0
    } else {
        raw_rows as f64 / groups as f64
    }
}

fn log_ratio(side: &str, raw_rows: usize, groups: usize) {
    info!(
        side,
        raw_rows,
        groups,
        ratio = aggregation_ratio(raw_rows, groups),
        "aggregated records"
    );
}
