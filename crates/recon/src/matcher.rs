use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::keys::{build_keys, KeySet, MatchKey};
use crate::model::{ExactMatchOutput, FulfillmentAggregate, Linkage, MatchField, OrderAggregate};

/// Hash indices over order aggregates: one by canonical key (order PO),
/// one by alternate key (order alternate PO). Built once per customer.
pub struct OrderIndex {
    by_po: HashMap<MatchKey, Vec<usize>>,
    by_alt_po: HashMap<MatchKey, Vec<usize>>,
}

impl OrderIndex {
    pub fn build(orders: &[OrderAggregate]) -> Self {
        let mut by_po: HashMap<MatchKey, Vec<usize>> = HashMap::new();
        let mut by_alt_po: HashMap<MatchKey, Vec<usize>> = HashMap::new();

        for (i, order) in orders.iter().enumerate() {
            let keys = order_keys(order);
            if let Some(k) = keys.canonical {
                by_po.entry(k).or_default().push(i);
            }
            if let Some(k) = keys.alternate {
                by_alt_po.entry(k).or_default().push(i);
            }
        }

        Self { by_po, by_alt_po }
    }

    /// Candidates whose `field` carries the given key, in aggregate order.
    pub fn lookup(&self, field: MatchField, key: &MatchKey) -> Option<&[usize]> {
        let index = match field {
            MatchField::Po => &self.by_po,
            MatchField::AltPo => &self.by_alt_po,
        };
        index.get(key).map(|v| v.as_slice())
    }
}

fn order_keys(order: &OrderAggregate) -> KeySet {
    build_keys(&order.key.descriptor, order.key.po.as_deref(), order.key.alt_po.as_deref())
}

fn fulfillment_keys(row: &FulfillmentAggregate) -> KeySet {
    build_keys(&row.key.descriptor, row.key.po.as_deref(), row.key.alt_po.as_deref())
}

/// Which fulfillment key to probe with in a cross-field combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Canonical,
    Alternate,
}

/// Cross-field combinations in priority order, after f-PO × o-PO:
/// f-PO × o-AltPO, f-AltPO × o-PO, f-AltPO × o-AltPO.
/// f-PO × o-PO is the pass-1 join and cannot hit on a pass-1 miss.
const CROSS_FIELD: [(Probe, MatchField); 3] = [
    (Probe::Canonical, MatchField::AltPo),
    (Probe::Alternate, MatchField::Po),
    (Probe::Alternate, MatchField::AltPo),
];

/// Same PO family: both tokens agree, in either column order.
fn same_family(row: &FulfillmentAggregate, order: &OrderAggregate) -> bool {
    let (f, o) = (&row.key, &order.key);
    (f.po == o.po && f.alt_po == o.alt_po) || (f.po == o.alt_po && f.alt_po == o.po)
}

/// Choose among orders sharing a lookup key. The order carrying the row's own
/// PO family wins; otherwise the first in key order. The flag is true when
/// the choice was a fallback among several candidates.
fn pick(candidates: &[usize], row: &FulfillmentAggregate, orders: &[OrderAggregate]) -> (usize, bool) {
    match candidates.iter().find(|&&oi| same_family(row, &orders[oi])) {
        Some(&oi) => (oi, false),
        None => (candidates[0], candidates.len() > 1),
    }
}

/// Deterministic key join of fulfillment aggregates against order aggregates
/// of the same customer.
///
/// Pass 1 joins canonical keys. Pass 2 runs only on pass-1 misses and tries
/// the remaining PO combinations in order; the first hit wins. Every lookup is a
/// hash probe, so the stage is linear in the number of rows.
pub fn match_exact(fulfillment: &[FulfillmentAggregate], orders: &[OrderAggregate]) -> ExactMatchOutput {
    let index = OrderIndex::build(orders);
    let mut matched = Vec::new();
    let mut ambiguous_lookups = 0;

    let keys: Vec<KeySet> = fulfillment.iter().map(fulfillment_keys).collect();

    // Pass 1: canonical × canonical
    let mut misses = Vec::new();
    for (fi, key_set) in keys.iter().enumerate() {
        let hit = key_set
            .canonical
            .as_ref()
            .and_then(|k| index.lookup(MatchField::Po, k).map(|c| (k, c)));
        match hit {
            Some((key, candidates)) => {
                let (oi, ambiguous) = pick(candidates, &fulfillment[fi], orders);
                if ambiguous {
                    ambiguous_lookups += 1;
                    debug!(key = %key, candidates = candidates.len(), "ambiguous canonical key");
                }
                matched.push(Linkage::exact(fi, oi, MatchField::Po));
            }
            None => misses.push(fi),
        }
    }

    // Pass 2: cross-field on pass-1 misses
    let mut unmatched = Vec::new();
    for fi in misses {
        let key_set = &keys[fi];
        let hit = CROSS_FIELD.iter().find_map(|&(probe, field)| {
            let key = match probe {
                Probe::Canonical => key_set.canonical.as_ref(),
                Probe::Alternate => key_set.alternate.as_ref(),
            }?;
            index.lookup(field, key).map(|c| (key, field, c))
        });
        match hit {
            Some((key, field, candidates)) => {
                let (oi, ambiguous) = pick(candidates, &fulfillment[fi], orders);
                if ambiguous {
                    ambiguous_lookups += 1;
                    debug!(key = %key, field = %field, candidates = candidates.len(), "ambiguous cross-field key");
                }
                matched.push(Linkage::exact(fi, oi, field));
            }
            None => unmatched.push(fi),
        }
    }

    if ambiguous_lookups > 0 {
        warn!(
            ambiguous_lookups,
            "order keys shared by several PO families with none matching the row; first candidate taken"
        );
    }

    ExactMatchOutput {
        matched,
        unmatched,
        ambiguous_lookups,
    }
}

/// Linkage rows per distinct fulfillment row. Anything above 1.0 means a
/// fulfillment row was joined more than once.
pub fn duplication_ratio(linkages: &[Linkage]) -> f64 {
    let unique: HashSet<usize> = linkages.iter().map(|l| l.fulfillment).collect();
    if unique.is_empty() {
        1.0
    } else {
        linkages.len() as f64 / unique.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate_fulfillment, aggregate_orders};
    use crate::config::CustomerDirectory;
    use crate::model::SourceType::{Packed, Shipped};
    use crate::model::{FulfillmentRecord, MatchStatus, OrderLine};

    fn aggs(
        orders: &[OrderLine],
        fulfillment: &[FulfillmentRecord],
    ) -> (Vec<OrderAggregate>, Vec<FulfillmentAggregate>) {
        let dir = CustomerDirectory::default();
        (aggregate_orders(orders, &dir), aggregate_fulfillment(fulfillment, &dir))
    }

    #[test]
    fn canonical_match_scores_po() {
        let (orders, ful) = aggs(
            &[
                OrderLine::new("ACME", "123", "A", "RED", "M", 50),
                OrderLine::new("ACME", "456", "A", "RED", "M", 10),
            ],
            &[FulfillmentRecord::new("ACME", "123", "A", "RED", "M", 50, Shipped)],
        );
        let out = match_exact(&ful, &orders);
        assert_eq!(out.matched.len(), 1);
        assert!(out.unmatched.is_empty());
        let m = &out.matched[0];
        assert_eq!(m.status, MatchStatus::Exact);
        assert_eq!(m.field, Some(MatchField::Po));
        assert_eq!(m.po_score, 100.0);
        assert_eq!(m.alt_po_score, 0.0);
        assert_eq!(orders[m.order.unwrap()].key.po.as_deref(), Some("123"));
    }

    #[test]
    fn cross_field_alt_against_po() {
        let (orders, ful) = aggs(
            &[OrderLine::new("ACME", "123", "A", "RED", "M", 50).with_alt_po("NONE")],
            &[FulfillmentRecord::new("ACME", "NONE", "A", "RED", "M", 50, Shipped).with_alt_po("123")],
        );
        let out = match_exact(&ful, &orders);
        assert_eq!(out.matched.len(), 1);
        let m = &out.matched[0];
        assert_eq!(m.field, Some(MatchField::Po));
        assert_eq!(m.po_score, 100.0);
        assert_eq!(m.alt_po_score, 0.0);
    }

    #[test]
    fn cross_field_po_against_alt() {
        let (orders, ful) = aggs(
            &[OrderLine::new("ACME", "X-1", "A", "RED", "M", 50).with_alt_po("123")],
            &[FulfillmentRecord::new("ACME", "123", "A", "RED", "M", 50, Packed)],
        );
        let out = match_exact(&ful, &orders);
        let m = &out.matched[0];
        assert_eq!(m.field, Some(MatchField::AltPo));
        assert_eq!(m.po_score, 0.0);
        assert_eq!(m.alt_po_score, 100.0);
    }

    #[test]
    fn combination_order_prefers_fulfillment_po() {
        // f-PO hits o-AltPO of one order; f-AltPO hits o-PO of another.
        // f-PO × o-AltPO comes first in priority order.
        let (orders, ful) = aggs(
            &[
                OrderLine::new("ACME", "Z-9", "A", "RED", "M", 5).with_alt_po("111"),
                OrderLine::new("ACME", "222", "A", "RED", "M", 5),
            ],
            &[FulfillmentRecord::new("ACME", "111", "A", "RED", "M", 5, Shipped).with_alt_po("222")],
        );
        let out = match_exact(&ful, &orders);
        let m = &out.matched[0];
        assert_eq!(m.field, Some(MatchField::AltPo));
        assert_eq!(orders[m.order.unwrap()].key.po.as_deref(), Some("Z-9"));
    }

    #[test]
    fn placeholders_never_join() {
        let (orders, ful) = aggs(
            &[OrderLine::new("ACME", "NONE", "A", "RED", "M", 50)],
            &[FulfillmentRecord::new("ACME", "none", "A", "RED", "M", 50, Shipped).with_alt_po("NULL")],
        );
        let out = match_exact(&ful, &orders);
        assert!(out.matched.is_empty());
        assert_eq!(out.unmatched, vec![0]);
    }

    #[test]
    fn descriptive_mismatch_is_unmatched() {
        let (orders, ful) = aggs(
            &[OrderLine::new("ACME", "123", "A", "RED", "M", 50)],
            &[FulfillmentRecord::new("ACME", "123", "A", "BLUE", "M", 50, Shipped)],
        );
        let out = match_exact(&ful, &orders);
        assert!(out.matched.is_empty());
        assert_eq!(out.unmatched, vec![0]);
    }

    #[test]
    fn no_duplicate_join_inflation() {
        // Two order PO families share the canonical key; several fulfillment
        // rows in both sources. Each fulfillment row links exactly once.
        let (orders, ful) = aggs(
            &[
                OrderLine::new("ACME", "123", "A", "RED", "M", 30),
                OrderLine::new("ACME", "123", "A", "RED", "M", 20).with_alt_po("777"),
                OrderLine::new("ACME", "555", "B", "RED", "M", 20),
            ],
            &[
                FulfillmentRecord::new("ACME", "123", "A", "RED", "M", 20, Shipped),
                FulfillmentRecord::new("ACME", "123", "A", "RED", "M", 30, Shipped),
                FulfillmentRecord::new("ACME", "123", "A", "RED", "M", 50, Packed),
                FulfillmentRecord::new("ACME", "555", "B", "RED", "M", 20, Shipped),
            ],
        );
        let out = match_exact(&ful, &orders);
        assert_eq!(out.matched.len(), ful.len());
        assert_eq!(duplication_ratio(&out.matched), 1.0);
        // The 123 rows carry no alternate PO, so the (123, -) family resolves them
        assert_eq!(out.ambiguous_lookups, 0);
    }

    #[test]
    fn shared_po_prefers_own_family() {
        let (orders, ful) = aggs(
            &[
                OrderLine::new("ACME", "123", "A", "RED", "M", 30),
                OrderLine::new("ACME", "123", "A", "RED", "M", 20).with_alt_po("777"),
            ],
            &[
                FulfillmentRecord::new("ACME", "123", "A", "RED", "M", 30, Shipped),
                FulfillmentRecord::new("ACME", "123", "A", "RED", "M", 20, Shipped).with_alt_po("777"),
            ],
        );
        let out = match_exact(&ful, &orders);
        assert_eq!(out.ambiguous_lookups, 0);
        for m in &out.matched {
            let order = &orders[m.order.unwrap()];
            assert_eq!(order.key.alt_po, ful[m.fulfillment].key.alt_po);
            assert_eq!(order.ordered_qty, ful[m.fulfillment].fulfilled_qty);
        }
    }

    #[test]
    fn swapped_family_resolves_cross_field() {
        // f-PO × o-AltPO finds two orders with alternate PO 888; the one
        // holding the row's tokens in swapped columns wins.
        let (orders, ful) = aggs(
            &[
                OrderLine::new("ACME", "100", "A", "RED", "M", 5).with_alt_po("888"),
                OrderLine::new("ACME", "123", "A", "RED", "M", 5).with_alt_po("888"),
            ],
            &[FulfillmentRecord::new("ACME", "888", "A", "RED", "M", 5, Shipped).with_alt_po("123")],
        );
        let out = match_exact(&ful, &orders);
        let m = &out.matched[0];
        assert_eq!(m.field, Some(MatchField::AltPo));
        assert_eq!(orders[m.order.unwrap()].key.po.as_deref(), Some("123"));
        assert_eq!(out.ambiguous_lookups, 0);
    }

    #[test]
    fn foreign_family_falls_back_to_first_candidate() {
        let (orders, ful) = aggs(
            &[
                OrderLine::new("ACME", "123", "A", "RED", "M", 30),
                OrderLine::new("ACME", "123", "A", "RED", "M", 20).with_alt_po("777"),
            ],
            &[FulfillmentRecord::new("ACME", "123", "A", "RED", "M", 50, Shipped).with_alt_po("555")],
        );
        let out = match_exact(&ful, &orders);
        assert_eq!(out.ambiguous_lookups, 1);
        assert_eq!(orders[out.matched[0].order.unwrap()].key.alt_po, None);
    }

    #[test]
    fn duplication_ratio_flags_repeats() {
        let links = vec![
            Linkage::exact(0, 0, MatchField::Po),
            Linkage::exact(0, 1, MatchField::Po),
            Linkage::exact(1, 1, MatchField::Po),
        ];
        assert_eq!(duplication_ratio(&links), 1.5);
        assert_eq!(duplication_ratio(&[]), 1.0);
    }
}
