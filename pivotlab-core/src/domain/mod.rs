//! Domain types for PivotLab

pub mod bar;
pub mod candidate;
pub mod pivot;
pub mod selection;

pub use bar::{validate_series, Bar, Frequency, SeriesError};
pub use candidate::{
    CandidatePool, CandidateProfile, MarketCapCategory, StrategyCandidate, StrategyType,
};
pub use pivot::{FilterDecision, PivotExtras, PivotKey, PivotPoint};
pub use selection::{SelectionSet, Universe};

/// Symbol code alias
pub type Code = String;
