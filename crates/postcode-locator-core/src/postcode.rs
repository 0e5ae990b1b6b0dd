//! Postcode normalization.
//!
//! [`normalize`] is the single canonicalization routine used both when
//! answering queries and when deriving stored fields during ingestion.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Shortest accepted compact postcode, e.g. `"B11AA"`.
pub const MIN_COMPACT_LEN: usize = 5;
/// Longest accepted compact postcode, e.g. `"SW1A1AA"`.
pub const MAX_COMPACT_LEN: usize = 7;
/// The inward part is always the final three characters.
pub const INWARD_LEN: usize = 3;

/// A postcode in canonical form with its derived parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Postcode {
    /// Uppercase, single space before the inward part: `"SW1A 1AA"`.
    pub canonical: String,
    /// Canonical form without the space: `"SW1A1AA"`.
    pub compact: String,
    /// Everything before the space: `"SW1A"`.
    pub outward: String,
    /// Final three characters: `"1AA"`.
    pub inward: String,
}

/// Canonicalize a raw postcode string.
///
/// Whitespace is removed everywhere and the rest is uppercased. Compact
/// lengths outside 5..=7 characters have no canonical form and return
/// `None`.
///
/// ```
/// use postcode_locator_core::normalize;
///
/// let pc = normalize(" sw1a1aa ").unwrap();
/// assert_eq!(pc.canonical, "SW1A 1AA");
/// assert_eq!(pc.outward, "SW1A");
/// assert_eq!(pc.inward, "1AA");
/// assert!(normalize("AB").is_none());
/// ```
pub fn normalize(raw: &str) -> Option<Postcode> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();

    let len = compact.chars().count();
    if !(MIN_COMPACT_LEN..=MAX_COMPACT_LEN).contains(&len) {
        return None;
    }

    let split = compact
        .char_indices()
        .nth(len - INWARD_LEN)
        .map(|(idx, _)| idx)?;
    let (outward, inward) = compact.split_at(split);

    Some(Postcode {
        canonical: format!("{outward} {inward}"),
        outward: outward.to_string(),
        inward: inward.to_string(),
        compact,
    })
}

impl Postcode {
    /// Parse, returning `None` when the input has no canonical form.
    pub fn parse(raw: &str) -> Option<Self> {
        normalize(raw)
    }
}

impl fmt::Display for Postcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}
