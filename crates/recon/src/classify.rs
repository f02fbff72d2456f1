use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::QualityConfig;
use crate::model::{
    FulfillmentAggregate, Linkage, MatchField, MatchResult, MatchStatus, OrderAggregate,
    QualityFlag, SourceType,
};

/// Variance as a percentage of ordered quantity. Nothing ordered but
/// something fulfilled counts as 100 %.
pub fn variance_pct(fulfilled: u64, ordered: u64) -> f64 {
    if ordered == 0 {
        if fulfilled > 0 {
            100.0
        } else {
            0.0
        }
    } else {
        (fulfilled as f64 - ordered as f64) * 100.0 / ordered as f64
    }
}

/// Discrete quality flag for one row, first rule that applies:
///
/// - POOR: no match, or |variance| above the hard ceiling
/// - GOOD: exact match within the tight tolerance
/// - ACCEPTABLE: exact or fuzzy within the loose tolerance, or a
///   high-confidence fuzzy match within the tight tolerance
/// - QUESTIONABLE: everything else
///
/// The hard ceiling applies before GOOD and ACCEPTABLE.
/// For a fixed status and score the flag never improves as |variance| grows.
pub fn quality_flag(
    status: MatchStatus,
    best_score: f64,
    variance_pct: f64,
    config: &QualityConfig,
) -> QualityFlag {
    let v = variance_pct.abs();
    if status == MatchStatus::NoMatch || v > config.hard_ceiling_pct {
        return QualityFlag::Poor;
    }
    if status == MatchStatus::Exact && v <= config.tight_tolerance_pct {
        return QualityFlag::Good;
    }
    let within_loose = v <= config.loose_tolerance_pct;
    let confident_tight = status == MatchStatus::Fuzzy
        && best_score >= config.high_confidence_score
        && v <= config.tight_tolerance_pct;
    if within_loose || confident_tight {
        QualityFlag::Acceptable
    } else {
        QualityFlag::Questionable
    }
}

/// PO value that groups matched rows for variance: the order's alternate PO
/// when the match came through that field, otherwise the order's PO.
pub fn group_po(order: &OrderAggregate, field: Option<MatchField>) -> Option<String> {
    match field {
        Some(MatchField::AltPo) => order.key.alt_po.clone(),
        _ => order.key.po.clone(),
    }
}

/// Variance group. Unlinked rows are grouped alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Linked {
        customer: String,
        source: SourceType,
        group_po: Option<String>,
    },
    Unlinked(usize),
}

#[derive(Debug, Default)]
struct GroupTotals {
    fulfilled: u64,
    orders: BTreeSet<usize>,
}

/// Turn one customer's linkages into classified result rows, one per linkage,
/// in linkage order.
pub fn classify(
    fulfillment: &[FulfillmentAggregate],
    orders: &[OrderAggregate],
    linkages: &[Linkage],
    config: &QualityConfig,
) -> Vec<MatchResult> {
    let keys: Vec<(GroupKey, Option<String>)> = linkages
        .iter()
        .map(|l| {
            let row = &fulfillment[l.fulfillment];
            match l.order {
                Some(oi) => {
                    let gp = group_po(&orders[oi], l.field);
                    let key = GroupKey::Linked {
                        customer: row.key.descriptor.customer.clone(),
                        source: row.source,
                        group_po: gp.clone(),
                    };
                    (key, gp)
                }
                None => (GroupKey::Unlinked(l.fulfillment), None),
            }
        })
        .collect();

    let mut totals: HashMap<&GroupKey, GroupTotals> = HashMap::new();
    let mut linked: HashSet<(SourceType, usize)> = HashSet::new();
    for (l, (key, _)) in linkages.iter().zip(&keys) {
        let row = &fulfillment[l.fulfillment];
        let group = totals.entry(key).or_default();
        group.fulfilled += row.fulfilled_qty;
        if let Some(oi) = l.order {
            group.orders.insert(oi);
            linked.insert((row.source, oi));
        }
    }

    // An order no row of this source linked to still belongs to the group
    // of its own PO.
    let mut by_po: HashMap<(&str, &str), Vec<usize>> = HashMap::new();
    for (oi, order) in orders.iter().enumerate() {
        if let Some(po) = &order.key.po {
            by_po
                .entry((order.key.descriptor.customer.as_str(), po.as_str()))
                .or_default()
                .push(oi);
        }
    }
    for (&key, group) in totals.iter_mut() {
        if let GroupKey::Linked { customer, source, group_po: Some(gp) } = key {
            let same_po = by_po
                .get(&(customer.as_str(), gp.as_str()))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            group
                .orders
                .extend(same_po.iter().filter(|&&oi| !linked.contains(&(*source, oi))));
        }
    }

    linkages
        .iter()
        .zip(&keys)
        .map(|(l, (key, gp))| {
            let row = &fulfillment[l.fulfillment];
            let order = l.order.map(|oi| &orders[oi]);

            let (group_fulfilled, group_ordered) = match totals.get(key) {
                Some(g) => (g.fulfilled, g.orders.iter().map(|&oi| orders[oi].ordered_qty).sum()),
                None => (row.fulfilled_qty, 0),
            };
            let pct = variance_pct(group_fulfilled, group_ordered);

            MatchResult {
                customer: row.key.descriptor.customer.clone(),
                source: row.source,
                style: row.key.descriptor.style.clone(),
                color: row.key.descriptor.color.clone(),
                size: row.key.descriptor.size.clone(),
                po: row.key.po.clone(),
                alt_po: row.key.alt_po.clone(),
                record_count: row.record_count,
                fulfilled_qty: row.fulfilled_qty,
                status: l.status,
                matched_po: order.and_then(|o| o.key.po.clone()),
                matched_alt_po: order.and_then(|o| o.key.alt_po.clone()),
                ordered_qty: order.map(|o| o.ordered_qty).unwrap_or(0),
                po_match_score: l.po_score,
                alt_po_match_score: l.alt_po_score,
                best_score: l.best_score,
                best_match_field: l.field,
                group_po: gp.clone(),
                group_fulfilled_qty: group_fulfilled,
                group_ordered_qty: group_ordered,
                variance_qty: group_fulfilled as i64 - group_ordered as i64,
                variance_pct: pct,
                quality: quality_flag(l.status, l.best_score, pct, config),
            }
        })
        .collect()
}
