use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Which warehouse stage produced a fulfillment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all(serialize = "SCREAMING_SNAKE_CASE", deserialize = "snake_case"))]
pub enum SourceType {
    Packed,
    Shipped,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Packed => write!(f, "PACKED"),
            Self::Shipped => write!(f, "SHIPPED"),
        }
    }
}

/// One line of the authoritative order book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub customer: String,
    pub po: String,
    pub alt_po: Option<String>,
    pub style: Option<String>,
    pub pattern_id: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub quantity: u64,
}

impl OrderLine {
    pub fn new(customer: &str, po: &str, style: &str, color: &str, size: &str, quantity: u64) -> Self {
        Self {
            customer: customer.into(),
            po: po.into(),
            alt_po: None,
            style: Some(style.into()),
            pattern_id: None,
            color: Some(color.into()),
            size: Some(size.into()),
            quantity,
        }
    }

    pub fn with_alt_po(mut self, alt_po: &str) -> Self {
        self.alt_po = Some(alt_po.into());
        self
    }

    pub fn with_pattern(mut self, pattern_id: &str) -> Self {
        self.pattern_id = Some(pattern_id.into());
        self
    }
}

/// One packed or shipped row reported by the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentRecord {
    pub customer: String,
    pub po: String,
    pub alt_po: Option<String>,
    pub style: Option<String>,
    pub pattern_id: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub quantity: u64,
    pub source: SourceType,
}

impl FulfillmentRecord {
    pub fn new(
        customer: &str,
        po: &str,
        style: &str,
        color: &str,
        size: &str,
        quantity: u64,
        source: SourceType,
    ) -> Self {
        Self {
            customer: customer.into(),
            po: po.into(),
            alt_po: None,
            style: Some(style.into()),
            pattern_id: None,
            color: Some(color.into()),
            size: Some(size.into()),
            quantity,
            source,
        }
    }

    pub fn with_alt_po(mut self, alt_po: &str) -> Self {
        self.alt_po = Some(alt_po.into());
        self
    }

    pub fn with_pattern(mut self, pattern_id: &str) -> Self {
        self.pattern_id = Some(pattern_id.into());
        self
    }
}

/// Descriptive fields shared by both sides of the join.
///
/// Implemented by both record types so the aggregator derives the
/// grouping key from one code path.
pub trait GroupingFields {
    fn customer(&self) -> &str;
    fn po(&self) -> &str;
    fn alt_po(&self) -> Option<&str>;
    fn style(&self) -> Option<&str>;
    fn pattern_id(&self) -> Option<&str>;
    fn color(&self) -> Option<&str>;
    fn size(&self) -> Option<&str>;
}

macro_rules! impl_grouping_fields {
    ($ty:ty) => {
        impl GroupingFields for $ty {
            fn customer(&self) -> &str {
                &self.customer
            }
            fn po(&self) -> &str {
                &self.po
            }
            fn alt_po(&self) -> Option<&str> {
                self.alt_po.as_deref()
            }
            fn style(&self) -> Option<&str> {
                self.style.as_deref()
            }
            fn pattern_id(&self) -> Option<&str> {
                self.pattern_id.as_deref()
            }
            fn color(&self) -> Option<&str> {
                self.color.as_deref()
            }
            fn size(&self) -> Option<&str> {
                self.size.as_deref()
            }
        }
    };
}

impl_grouping_fields!(OrderLine);
impl_grouping_fields!(FulfillmentRecord);

/// Pre-loaded snapshot handed to the engine.
#[derive(Debug, Clone, Default)]
pub struct ReconInput {
    pub orders: Vec<OrderLine>,
    pub fulfillment: Vec<FulfillmentRecord>,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Normalized descriptive fields: (customer, style-or-pattern, color, size).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Descriptor {
    pub customer: String,
    pub style: String,
    pub color: String,
    pub size: String,
}

/// Aggregate key = descriptor + PO family (valid tokens only).
/// Identical field set on the order and fulfillment side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateKey {
    pub descriptor: Descriptor,
    pub po: Option<String>,
    pub alt_po: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderAggregate {
    pub key: AggregateKey,
    pub ordered_qty: u64,
    pub record_count: usize,
}

#[derive(Debug, Clone)]
pub struct FulfillmentAggregate {
    pub key: AggregateKey,
    pub source: SourceType,
    pub fulfilled_qty: u64,
    pub record_count: usize,
}

// ---------------------------------------------------------------------------
// Linkage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Exact,
    Fuzzy,
    NoMatch,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "EXACT"),
            Self::Fuzzy => write!(f, "FUZZY"),
            Self::NoMatch => write!(f, "NO_MATCH"),
        }
    }
}

/// Order-side field that produced the winning match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MatchField {
    #[serde(rename = "PO")]
    Po,
    #[serde(rename = "Alt_PO")]
    AltPo,
}

impl std::fmt::Display for MatchField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Po => write!(f, "PO"),
            Self::AltPo => write!(f, "Alt_PO"),
        }
    }
}

/// Link between one fulfillment aggregate and at most one order aggregate.
/// Indices point into the customer's aggregate slices.
#[derive(Debug, Clone, PartialEq)]
pub struct Linkage {
    pub fulfillment: usize,
    pub order: Option<usize>,
    pub status: MatchStatus,
    pub field: Option<MatchField>,
    pub po_score: f64,
    pub alt_po_score: f64,
    pub best_score: f64,
}

impl Linkage {
    pub fn exact(fulfillment: usize, order: usize, field: MatchField) -> Self {
        let (po_score, alt_po_score) = match field {
            MatchField::Po => (100.0, 0.0),
            MatchField::AltPo => (0.0, 100.0),
        };
        Self {
            fulfillment,
            order: Some(order),
            status: MatchStatus::Exact,
            field: Some(field),
            po_score,
            alt_po_score,
            best_score: 100.0,
        }
    }

    pub fn no_match(fulfillment: usize) -> Self {
        Self {
            fulfillment,
            order: None,
            status: MatchStatus::NoMatch,
            field: None,
            po_score: 0.0,
            alt_po_score: 0.0,
            best_score: 0.0,
        }
    }
}

#[derive(Debug)]
pub struct ExactMatchOutput {
    pub matched: Vec<Linkage>,
    /// Fulfillment indices with no exact counterpart, ascending.
    pub unmatched: Vec<usize>,
    /// Winning lookups with several order candidates, none carrying the
    /// row's PO family.
    pub ambiguous_lookups: usize,
}

#[derive(Debug, Default)]
pub struct FuzzyMatchOutput {
    /// One linkage (FUZZY or NO_MATCH) per unmatched input row.
    pub linkages: Vec<Linkage>,
    pub chunks: usize,
    /// Similarity matrices built, and the cell count of the largest.
    pub matrices: usize,
    pub peak_cells: usize,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Ordered best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityFlag {
    Good,
    Acceptable,
    Questionable,
    Poor,
}

impl std::fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Good => write!(f, "GOOD"),
            Self::Acceptable => write!(f, "ACCEPTABLE"),
            Self::Questionable => write!(f, "QUESTIONABLE"),
            Self::Poor => write!(f, "POOR"),
        }
    }
}

/// Final per-row output: one per aggregated fulfillment row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub customer: String,
    pub source: SourceType,
    pub style: String,
    pub color: String,
    pub size: String,
    pub po: Option<String>,
    pub alt_po: Option<String>,
    pub record_count: usize,
    pub fulfilled_qty: u64,
    pub status: MatchStatus,
    pub matched_po: Option<String>,
    pub matched_alt_po: Option<String>,
    pub ordered_qty: u64,
    pub po_match_score: f64,
    pub alt_po_match_score: f64,
    pub best_score: f64,
    pub best_match_field: Option<MatchField>,
    pub group_po: Option<String>,
    pub group_fulfilled_qty: u64,
    pub group_ordered_qty: u64,
    pub variance_qty: i64,
    pub variance_pct: f64,
    pub quality: QualityFlag,
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Unmatched set exceeded `max_unmatched_per_customer`; fuzzy stage skipped.
    SkippedDueToScale { unmatched: usize, limit: usize },
    /// Processing this customer panicked; no results were kept for it.
    Panicked { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SkippedDueToScale { unmatched, limit } => {
                write!(f, "skipped due to scale ({unmatched} unmatched rows > limit {limit})")
            }
            Self::Panicked { message } => write!(f, "panicked: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerFailure {
    pub customer: String,
    pub reason: FailureReason,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub exact: usize,
    pub fuzzy: usize,
    pub no_match: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityCounts {
    pub good: usize,
    pub acceptable: usize,
    pub questionable: usize,
    pub poor: usize,
}

/// Distribution of best-match-field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldCounts {
    pub po: usize,
    pub alt_po: usize,
    pub none: usize,
}

/// Per-field score statistics across all rows.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSummary {
    pub field: MatchField,
    pub best_match_count: usize,
    pub exact: usize,
    pub fuzzy: usize,
    pub perfect_scores: usize,
    pub mean_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source: SourceType,
    pub rows: usize,
    pub status: StatusCounts,
}

/// Order-side coverage for one customer, reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerCoverage {
    pub customer: String,
    pub order_groups: usize,
    pub unlinked_orders: usize,
    pub ordered_qty: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerSummary {
    pub customer: String,
    pub fulfillment_groups: usize,
    pub order_groups: usize,
    pub unlinked_orders: usize,
    pub fulfilled_qty: u64,
    pub ordered_qty: u64,
    pub status: StatusCounts,
    pub fields: FieldCounts,
    pub quality: QualityCounts,
    pub match_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconSummary {
    pub total_results: usize,
    pub status: StatusCounts,
    pub match_rate: f64,
    pub fields: FieldCounts,
    pub quality: QualityCounts,
    pub near_misses: usize,
    pub field_stats: Vec<FieldSummary>,
    pub by_source: Vec<SourceSummary>,
    pub customers: Vec<CustomerSummary>,
    pub failed_customers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub fuzzy_threshold: f64,
    pub order_rows: usize,
    pub fulfillment_rows: usize,
    pub order_groups: usize,
    pub fulfillment_groups: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconResult {
    pub meta: ReconMeta,
    pub summary: ReconSummary,
    pub results: Vec<MatchResult>,
    pub failures: Vec<CustomerFailure>,
}
