//! Candidate ranking: one ordered pool per `(dt, strategy_type)`.
//!
//! Symbols are ordered by score descending, ties broken by code ascending,
//! and numbered `1..=K` without gaps. A symbol without a usable score is left
//! out of the pool entirely: no decision is not the same as a low rank.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pivotlab_core::domain::{CandidatePool, CandidateProfile, StrategyCandidate, StrategyType};

/// One symbol's screen output: profile fields plus an optional score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSymbol {
    pub profile: CandidateProfile,
    /// None (or a non-finite value) means the symbol is not ranked.
    pub score: Option<f64>,
}

impl ScoredSymbol {
    pub fn new(profile: CandidateProfile, score: Option<f64>) -> Self {
        Self { profile, score }
    }

    pub fn code(&self) -> &str {
        &self.profile.code
    }

    fn rankable_score(&self) -> Option<f64> {
        self.score.filter(|s| s.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RankingError {
    #[error("symbol {code} appears more than once in the {strategy_type} scores for {dt}")]
    Conflict {
        dt: NaiveDate,
        strategy_type: StrategyType,
        code: String,
    },
}

/// Rank one strategy's scored symbols for `dt`.
///
/// Duplicate codes are a conflict: the whole pool is refused rather than
/// silently merged.
pub fn rank_candidates(
    dt: NaiveDate,
    strategy_type: StrategyType,
    scored: Vec<ScoredSymbol>,
) -> Result<CandidatePool, RankingError> {
    let mut seen = BTreeSet::new();
    for s in &scored {
        if !seen.insert(s.code()) {
            return Err(RankingError::Conflict {
                dt,
                strategy_type,
                code: s.code().to_string(),
            });
        }
    }

    let mut ranked: Vec<(f64, CandidateProfile)> = scored
        .into_iter()
        .filter_map(|s| s.rankable_score().map(|score| (score, s.profile)))
        .collect();
    ranked.sort_by(|(sa, pa), (sb, pb)| sb.total_cmp(sa).then_with(|| pa.code.cmp(&pb.code)));

    let candidates = ranked
        .into_iter()
        .enumerate()
        .map(|(i, (score, profile))| StrategyCandidate {
            dt,
            strategy_type,
            rank_in_dt: i + 1,
            score,
            profile,
        })
        .collect();

    Ok(CandidatePool {
        dt,
        strategy_type,
        candidates,
    })
}
