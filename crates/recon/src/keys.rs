//! Key construction: normalization, PO token validity, canonical and alternate keys.
//!
//! Every comparison in the engine goes through [`normalize`], on both sides.

use crate::config::StyleSource;
use crate::model::Descriptor;

/// Placeholder values that upstream extraction writes instead of a null.
pub const INVALID_PO_TOKENS: [&str; 5] = ["", "NONE", "NULL", "NAN", "N/A"];

/// ASCII unit separator; cannot survive normalization of real data.
const KEY_SEP: char = '\u{1f}';

/// Trim, uppercase, collapse internal whitespace runs to one space.
pub fn normalize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for word in value.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        for c in word.chars() {
            out.extend(c.to_uppercase());
        }
    }
    out
}

pub fn normalize_opt(value: Option<&str>) -> String {
    value.map(normalize).unwrap_or_default()
}

/// True when the value is a null-like placeholder (after normalization).
pub fn is_placeholder(value: &str) -> bool {
    INVALID_PO_TOKENS.contains(&normalize(value).as_str())
}

/// Normalized PO token, or `None` when absent or a placeholder.
pub fn po_token(value: Option<&str>) -> Option<String> {
    let normalized = normalize(value?);
    if INVALID_PO_TOKENS.contains(&normalized.as_str()) {
        None
    } else {
        Some(normalized)
    }
}

/// Pick the value that stands in for "style" under the customer's strategy.
pub fn resolve_style(style: Option<&str>, pattern_id: Option<&str>, source: StyleSource) -> String {
    let pattern = pattern_id.map(normalize).filter(|p| !p.is_empty());
    match source {
        StyleSource::Style => normalize_opt(style),
        StyleSource::Pattern => pattern.unwrap_or_default(),
        StyleSource::PatternOrStyle => pattern.unwrap_or_else(|| normalize_opt(style)),
    }
}

/// Delimiter-joined (customer, style, color, size, PO) key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchKey(String);

impl MatchKey {
    /// Key for a descriptor paired with an already-validated PO token.
    pub fn new(descriptor: &Descriptor, po_token: &str) -> Self {
        let mut key = String::with_capacity(
            descriptor.customer.len()
                + descriptor.style.len()
                + descriptor.color.len()
                + descriptor.size.len()
                + po_token.len()
                + 4,
        );
        for (i, part) in [
            descriptor.customer.as_str(),
            descriptor.style.as_str(),
            descriptor.color.as_str(),
            descriptor.size.as_str(),
            po_token,
        ]
        .iter()
        .enumerate()
        {
            if i > 0 {
                key.push(KEY_SEP);
            }
            key.push_str(part);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.replace(KEY_SEP, "|"))
    }
}

/// Canonical key (primary PO) and the optional alternate key (alternate PO).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    pub canonical: Option<MatchKey>,
    pub alternate: Option<MatchKey>,
}

/// Build keys from a descriptor and the record's raw or normalized PO values.
/// Invalid tokens produce no key; the alternate key is only emitted when it
/// differs from the primary.
pub fn build_keys(descriptor: &Descriptor, po: Option<&str>, alt_po: Option<&str>) -> KeySet {
    let po = po_token(po);
    let alt = po_token(alt_po).filter(|a| po.as_deref() != Some(a.as_str()));
    KeySet {
        canonical: po.as_deref().map(|p| MatchKey::new(descriptor, p)),
        alternate: alt.as_deref().map(|a| MatchKey::new(descriptor, a)),
    }
}
