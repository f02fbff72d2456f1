use std::collections::HashMap;

use serde::Deserialize;

use crate::error::ReconError;
use crate::keys::normalize;
use crate::model::SourceType;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ReconConfig {
    pub name: String,
    #[serde(default)]
    pub inputs: Option<InputsConfig>,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    /// Keyed by customer name as written in the config; normalized on lookup.
    #[serde(default)]
    pub customers: HashMap<String, CustomerMatchingConfig>,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            name: "recon".into(),
            inputs: None,
            matching: MatchingConfig::default(),
            quality: QualityConfig::default(),
            customers: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Customers
// ---------------------------------------------------------------------------

/// Which field supplies the "style" value for a customer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleSource {
    /// Direct style field. The fallback for customers without config.
    #[default]
    Style,
    /// Pattern identifier only.
    Pattern,
    /// Pattern identifier when present, else style.
    PatternOrStyle,
}

impl std::fmt::Display for StyleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Style => write!(f, "style"),
            Self::Pattern => write!(f, "pattern"),
            Self::PatternOrStyle => write!(f, "pattern_or_style"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CustomerMatchingConfig {
    #[serde(default)]
    pub style_source: StyleSource,
    /// Raw spellings that canonicalize to this customer.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Read-only customer lookup built once per run from [`ReconConfig::customers`].
#[derive(Debug, Clone, Default)]
pub struct CustomerDirectory {
    canonical: HashMap<String, String>,
    strategies: HashMap<String, CustomerMatchingConfig>,
    fallback: CustomerMatchingConfig,
}

impl CustomerDirectory {
    pub fn new(customers: &HashMap<String, CustomerMatchingConfig>) -> Self {
        let mut canonical = HashMap::new();
        let mut strategies = HashMap::new();
        for (name, cfg) in customers {
            let name = normalize(name);
            for alias in &cfg.aliases {
                canonical.insert(normalize(alias), name.clone());
            }
            canonical.insert(name.clone(), name.clone());
            strategies.insert(name, cfg.clone());
        }
        Self {
            canonical,
            strategies,
            fallback: CustomerMatchingConfig::default(),
        }
    }

    /// Canonical customer name for a raw value.
    pub fn canonical(&self, raw: &str) -> String {
        let normalized = normalize(raw);
        match self.canonical.get(&normalized) {
            Some(name) => name.clone(),
            None => normalized,
        }
    }

    /// Strategy for a canonical customer; the default strategy when absent.
    pub fn strategy(&self, canonical: &str) -> &CustomerMatchingConfig {
        self.strategies.get(canonical).unwrap_or(&self.fallback)
    }

    pub fn is_configured(&self, canonical: &str) -> bool {
        self.strategies.contains_key(canonical)
    }
}

// ---------------------------------------------------------------------------
// Matching + Quality
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum similarity (0-100) for a FUZZY match.
    pub fuzzy_threshold: f64,
    /// Unmatched rows per fuzzy chunk.
    pub fuzzy_chunk_size: usize,
    /// Upper bound on cells in one similarity matrix. Larger descriptor
    /// groups are scored in several row batches.
    pub max_matrix_cells: usize,
    /// Above this many unmatched rows a customer's fuzzy stage is skipped.
    pub max_unmatched_per_customer: usize,
    /// Process customer partitions on the rayon pool.
    pub parallel: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 75.0,
            fuzzy_chunk_size: 50_000,
            max_matrix_cells: 4_000_000,
            max_unmatched_per_customer: 500_000,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub tight_tolerance_pct: f64,
    pub loose_tolerance_pct: f64,
    pub hard_ceiling_pct: f64,
    /// FUZZY matches at or above this score are ACCEPTABLE within the tight tolerance.
    pub high_confidence_score: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            tight_tolerance_pct: 2.0,
            loose_tolerance_pct: 10.0,
            hard_ceiling_pct: 50.0,
            high_confidence_score: 90.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct InputsConfig {
    pub orders: InputFile,
    #[serde(default)]
    pub fulfillment: Vec<FulfillmentInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputFile {
    pub file: String,
    #[serde(default)]
    pub columns: ColumnMapping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FulfillmentInput {
    pub file: String,
    pub source: SourceType,
    #[serde(default)]
    pub columns: ColumnMapping,
}

/// CSV header names. `alt_po` and `pattern_id` may be absent from the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub customer: String,
    pub po: String,
    pub alt_po: String,
    pub style: String,
    pub pattern_id: String,
    pub color: String,
    pub size: String,
    pub quantity: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            customer: "customer".into(),
            po: "po".into(),
            alt_po: "alt_po".into(),
            style: "style".into(),
            pattern_id: "pattern_id".into(),
            color: "color".into(),
            size: "size".into(),
            quantity: "quantity".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let m = &self.matching;
        if !(0.0..=100.0).contains(&m.fuzzy_threshold) {
            return Err(ReconError::ConfigValidation(format!(
                "fuzzy_threshold must be within 0-100, got {}",
                m.fuzzy_threshold
            )));
        }
        if m.fuzzy_chunk_size == 0 {
            return Err(ReconError::ConfigValidation(
                "fuzzy_chunk_size must be at least 1".into(),
            ));
        }
        if m.max_matrix_cells == 0 {
            return Err(ReconError::ConfigValidation(
                "max_matrix_cells must be at least 1".into(),
            ));
        }
        if m.max_unmatched_per_customer < m.fuzzy_chunk_size {
            return Err(ReconError::ConfigValidation(format!(
                "max_unmatched_per_customer ({}) must be >= fuzzy_chunk_size ({})",
                m.max_unmatched_per_customer, m.fuzzy_chunk_size
            )));
        }

        let q = &self.quality;
        if q.tight_tolerance_pct < 0.0 {
            return Err(ReconError::ConfigValidation(
                "tight_tolerance_pct must be non-negative".into(),
            ));
        }
        if !(q.tight_tolerance_pct <= q.loose_tolerance_pct
            && q.loose_tolerance_pct <= q.hard_ceiling_pct)
        {
            return Err(ReconError::ConfigValidation(format!(
                "tolerances must satisfy tight <= loose <= hard ceiling, got {} / {} / {}",
                q.tight_tolerance_pct, q.loose_tolerance_pct, q.hard_ceiling_pct
            )));
        }
        if !(0.0..=100.0).contains(&q.high_confidence_score) {
            return Err(ReconError::ConfigValidation(format!(
                "high_confidence_score must be within 0-100, got {}",
                q.high_confidence_score
            )));
        }

        // A spelling may belong to one customer only.
        let mut owners: HashMap<String, String> = HashMap::new();
        for (name, cfg) in &self.customers {
            let canonical = normalize(name);
            if canonical.is_empty() {
                return Err(ReconError::ConfigValidation("customer name must not be blank".into()));
            }
            for spelling in std::iter::once(name).chain(cfg.aliases.iter()) {
                let spelling = normalize(spelling);
                if let Some(prev) = owners.insert(spelling.clone(), canonical.clone()) {
                    if prev != canonical {
                        return Err(ReconError::ConfigValidation(format!(
                            "customer spelling '{spelling}' is claimed by both '{prev}' and '{canonical}'"
                        )));
                    }
                }
            }
        }

        if let Some(ref inputs) = self.inputs {
            if inputs.fulfillment.is_empty() {
                return Err(ReconError::ConfigValidation(
                    "inputs.fulfillment must list at least one file".into(),
                ));
            }
        }

        Ok(())
    }

    pub fn customer_directory(&self) -> CustomerDirectory {
        CustomerDirectory::new(&self.customers)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
