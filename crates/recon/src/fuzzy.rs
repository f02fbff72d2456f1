//! Approximate PO linkage for rows the exact matcher could not resolve.
//!
//! All four PO combinations come out of one score matrix: the distinct valid
//! tokens of the unmatched rows (PO and alternate PO together) against the
//! distinct valid tokens of the orders they could pair with. Rows only pair
//! with orders of their own descriptor, so a chunk builds one matrix per
//! descriptor, split into row batches that stay under `max_matrix_cells`.
//! Invalid tokens never enter the vocabulary, so they can never score.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::debug;

use crate::config::MatchingConfig;
use crate::keys::normalize;
use crate::model::{
    Descriptor, FulfillmentAggregate, FuzzyMatchOutput, Linkage, MatchField, MatchStatus,
    OrderAggregate,
};

/// Similarity of two raw strings in 0-100. Both sides are normalized first,
/// so case and whitespace differences never lower the score.
pub fn similarity(a: &str, b: &str) -> f64 {
    token_ratio(&normalize(a), &normalize(b))
}

/// Normalized Levenshtein ratio scaled to 0-100, on already-normalized tokens.
fn token_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Distinct tokens with stable positions.
#[derive(Debug, Default)]
struct Vocabulary {
    tokens: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Vocabulary {
    fn intern(&mut self, token: &str) -> usize {
        if let Some(&i) = self.positions.get(token) {
            return i;
        }
        let i = self.tokens.len();
        self.tokens.push(token.to_string());
        self.positions.insert(token.to_string(), i);
        i
    }

    fn position(&self, token: Option<&str>) -> Option<usize> {
        self.positions.get(token?).copied()
    }

    fn len(&self) -> usize {
        self.tokens.len()
    }
}

/// Dense `queries × choices` score matrix, row-major.
#[derive(Debug)]
pub struct SimilarityMatrix {
    scores: Vec<f64>,
    width: usize,
}

impl SimilarityMatrix {
    pub fn compute(queries: &[String], choices: &[String], parallel: bool) -> Self {
        let width = choices.len();
        let mut scores = vec![0.0; queries.len() * width];
        if width > 0 {
            let fill = |(q, row): (usize, &mut [f64])| {
                for (c, cell) in row.iter_mut().enumerate() {
                    *cell = token_ratio(&queries[q], &choices[c]);
                }
            };
            if parallel {
                scores.par_chunks_mut(width).enumerate().for_each(fill);
            } else {
                scores.chunks_mut(width).enumerate().for_each(fill);
            }
        }
        Self { scores, width }
    }

    pub fn get(&self, query: usize, choice: usize) -> f64 {
        self.scores[query * self.width + choice]
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Best candidate seen so far. Higher score wins; on equal score a PO-field
/// match beats an Alt_PO-field match; otherwise the earlier candidate stays.
#[derive(Debug, Clone, Copy)]
struct Best {
    order: usize,
    field: MatchField,
    score: f64,
}

impl Best {
    fn beats(&self, other: &Option<Best>) -> bool {
        match other {
            None => true,
            Some(cur) => {
                self.score > cur.score
                    || (self.score == cur.score
                        && self.field == MatchField::Po
                        && cur.field == MatchField::AltPo)
            }
        }
    }
}

/// Fuzzy-match the `unmatched` fulfillment rows (indices into `fulfillment`)
/// against `orders` of the same customer. Returns one linkage per input row,
/// in input order: FUZZY when the best score reaches the threshold, NO_MATCH
/// otherwise, with the best scores kept either way.
pub fn match_fuzzy(
    unmatched: &[usize],
    fulfillment: &[FulfillmentAggregate],
    orders: &[OrderAggregate],
    config: &MatchingConfig,
) -> FuzzyMatchOutput {
    let mut by_descriptor: HashMap<&Descriptor, Vec<usize>> = HashMap::new();
    for (i, order) in orders.iter().enumerate() {
        by_descriptor.entry(&order.key.descriptor).or_default().push(i);
    }

    let chunk_size = config.fuzzy_chunk_size.max(1);
    let mut out = FuzzyMatchOutput {
        linkages: Vec::with_capacity(unmatched.len()),
        ..FuzzyMatchOutput::default()
    };

    for chunk in unmatched.chunks(chunk_size) {
        out.chunks += 1;
        match_chunk(chunk, fulfillment, orders, &by_descriptor, config, &mut out);
    }

    out
}

/// Rows per matrix for a choice vocabulary of `width` tokens. Each row adds
/// at most two query tokens. One row is always allowed, so a descriptor
/// with more than `max_cells / 2` order tokens still gets scored.
fn batch_rows(width: usize, max_cells: usize) -> usize {
    (max_cells / (2 * width.max(1))).max(1)
}

fn match_chunk(
    chunk: &[usize],
    fulfillment: &[FulfillmentAggregate],
    orders: &[OrderAggregate],
    by_descriptor: &HashMap<&Descriptor, Vec<usize>>,
    config: &MatchingConfig,
    out: &mut FuzzyMatchOutput,
) {
    // Chunk rows by descriptor, first-seen order.
    let mut groups: Vec<(&Descriptor, Vec<usize>)> = Vec::new();
    let mut slots: HashMap<&Descriptor, usize> = HashMap::new();
    for &fi in chunk {
        let descriptor = &fulfillment[fi].key.descriptor;
        let slot = *slots.entry(descriptor).or_insert_with(|| {
            groups.push((descriptor, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(fi);
    }

    let mut linkages = Vec::with_capacity(chunk.len());
    for (descriptor, rows) in &groups {
        let candidates = by_descriptor.get(*descriptor).map(Vec::as_slice).unwrap_or(&[]);

        // Choice vocabulary: {o-PO, o-AltPO} of this descriptor's orders.
        let mut choices = Vocabulary::default();
        for &oi in candidates {
            let order = &orders[oi];
            for token in [&order.key.po, &order.key.alt_po].into_iter().flatten() {
                choices.intern(token);
            }
        }
        if choices.tokens.is_empty() {
            linkages.extend(rows.iter().map(|&fi| Linkage::no_match(fi)));
            continue;
        }

        for batch in rows.chunks(batch_rows(choices.len(), config.max_matrix_cells)) {
            // Query vocabulary: {f-PO, f-AltPO} of the batch.
            let mut queries = Vocabulary::default();
            for &fi in batch {
                let row = &fulfillment[fi];
                for token in [&row.key.po, &row.key.alt_po].into_iter().flatten() {
                    queries.intern(token);
                }
            }

            let matrix = SimilarityMatrix::compute(&queries.tokens, &choices.tokens, config.parallel);
            out.matrices += 1;
            out.peak_cells = out.peak_cells.max(matrix.len());
            debug!(
                rows = batch.len(),
                queries = queries.len(),
                choices = choices.len(),
                cells = matrix.len(),
                "fuzzy similarity matrix"
            );

            let resolve = |&fi: &usize| {
                resolve_row(fi, &fulfillment[fi], orders, candidates, &queries, &choices, &matrix, config)
            };
            if config.parallel {
                linkages.par_extend(batch.par_iter().map(resolve));
            } else {
                linkages.extend(batch.iter().map(resolve));
            }
        }
    }

    // Back to chunk row order
    let position: HashMap<usize, usize> = chunk.iter().enumerate().map(|(i, &fi)| (fi, i)).collect();
    linkages.sort_by_key(|l| position.get(&l.fulfillment).copied());
    out.linkages.extend(linkages);
}

#[allow(clippy::too_many_arguments)]
fn resolve_row(
    fi: usize,
    row: &FulfillmentAggregate,
    orders: &[OrderAggregate],
    candidates: &[usize],
    queries: &Vocabulary,
    choices: &Vocabulary,
    matrix: &SimilarityMatrix,
    config: &MatchingConfig,
) -> Linkage {
    let q_po = queries.position(row.key.po.as_deref());
    let q_alt = queries.position(row.key.alt_po.as_deref());

    let mut best: Option<Best> = None;
    let mut best_po_field = 0.0_f64;
    let mut best_alt_field = 0.0_f64;

    for &oi in candidates {
        let order = &orders[oi];
        let c_po = choices.position(order.key.po.as_deref());
        let c_alt = choices.position(order.key.alt_po.as_deref());

        // f-PO × o-PO, f-PO × o-AltPO, f-AltPO × o-PO, f-AltPO × o-AltPO
        let combos = [
            (q_po, c_po, MatchField::Po),
            (q_po, c_alt, MatchField::AltPo),
            (q_alt, c_po, MatchField::Po),
            (q_alt, c_alt, MatchField::AltPo),
        ];
        for (q, c, field) in combos {
            let (Some(q), Some(c)) = (q, c) else {
                continue;
            };
            let score = matrix.get(q, c);
            match field {
                MatchField::Po => best_po_field = best_po_field.max(score),
                MatchField::AltPo => best_alt_field = best_alt_field.max(score),
            }
            let candidate = Best { order: oi, field, score };
            if candidate.beats(&best) {
                best = Some(candidate);
            }
        }
    }

    match best {
        Some(b) if b.score >= config.fuzzy_threshold => Linkage {
            fulfillment: fi,
            order: Some(b.order),
            status: MatchStatus::Fuzzy,
            field: Some(b.field),
            po_score: best_po_field,
            alt_po_score: best_alt_field,
            best_score: b.score,
        },
        other => Linkage {
            fulfillment: fi,
            order: None,
            status: MatchStatus::NoMatch,
            field: None,
            po_score: best_po_field,
            alt_po_score: best_alt_field,
            best_score: other.map(|b| b.score).unwrap_or(0.0),
        },
    }
}
