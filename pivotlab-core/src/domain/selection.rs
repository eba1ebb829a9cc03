//! Symbol universes and typed ranked selection records.
//!
//! A `SelectionSet` is what an upstream stage hands to a downstream one: an
//! explicit, ordered list of codes for a date. Downstream stages read it
//! directly instead of recovering the list from rendered output.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::candidate::CandidatePool;

/// The symbols a run operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Universe {
    /// Every known symbol.
    All { codes: Vec<String> },
    /// A named, bounded subset such as a top-N shortlist.
    Selection { name: String, codes: Vec<String> },
}

impl Universe {
    pub fn all(codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Universe::All {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn selection(
        name: impl Into<String>,
        codes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Universe::Selection {
            name: name.into(),
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn codes(&self) -> &[String] {
        match self {
            Universe::All { codes } | Universe::Selection { codes, .. } => codes,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Universe::All { .. })
    }

    /// Human-readable label for logs.
    pub fn label(&self) -> &str {
        match self {
            Universe::All { .. } => "all",
            Universe::Selection { name, .. } => name,
        }
    }

    /// Sorted, de-duplicated codes, optionally capped to the first `max`.
    ///
    /// The cap always takes a prefix of the sorted list, so capped runs are
    /// reproducible.
    pub fn resolve(&self, max: Option<usize>) -> Vec<String> {
        let mut codes: Vec<String> = self.codes().to_vec();
        codes.sort();
        codes.dedup();
        if let Some(n) = max {
            codes.truncate(n);
        }
        codes
    }

    /// The same universe restricted to `codes`. A capped full universe is no
    /// longer full coverage, so it becomes a selection.
    pub fn restricted(&self, codes: Vec<String>) -> Universe {
        match self {
            Universe::All { .. } if codes.len() == self.resolve(None).len() => Universe::All { codes },
            Universe::All { .. } => Universe::Selection {
                name: format!("all-first-{}", codes.len()),
                codes,
            },
            Universe::Selection { name, .. } => Universe::Selection {
                name: name.clone(),
                codes,
            },
        }
    }
}

/// Explicit ranked symbol list produced by one stage for a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSet {
    pub name: String,
    pub dt: NaiveDate,
    /// Codes in rank order, best first.
    pub codes: Vec<String>,
}

impl SelectionSet {
    /// Build the selection record for a ranked pool. Named after its strategy.
    pub fn from_pool(pool: &CandidatePool) -> Self {
        Self {
            name: pool.strategy_type.as_str().to_string(),
            dt: pool.dt,
            codes: pool.codes(),
        }
    }

    /// Keep only the best `n` codes.
    pub fn top(&self, n: usize) -> SelectionSet {
        SelectionSet {
            name: self.name.clone(),
            dt: self.dt,
            codes: self.codes.iter().take(n).cloned().collect(),
        }
    }

    pub fn into_universe(self) -> Universe {
        Universe::Selection {
            name: self.name,
            codes: self.codes,
        }
    }
}
