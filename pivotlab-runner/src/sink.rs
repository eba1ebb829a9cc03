//! Record sink: where pivot records, candidate pools and selection sets go.
//!
//! Every commit replaces exactly one partition, keyed by result date:
//! - pivots by `(dt, code, frequency)`
//! - candidates by `(dt, strategy_type)`
//! - selections by `(dt, name)`
//!
//! A pivot partition can also be cleared, for a symbol that produced no
//! records on a rerun of the same `dt`. Partitions for other dates are never
//! touched, so history is append-only across `dt`. "Latest" reads take the greatest `dt` for the key.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use chrono::NaiveDate;
use thiserror::Error;

use pivotlab_core::domain::{
    CandidatePool, Frequency, PivotPoint, SelectionSet, StrategyCandidate, StrategyType,
};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// The records do not form a valid partition (wrong key, duplicates).
    #[error("rejected commit: {0}")]
    Rejected(String),
}

/// Storage for run output.
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &str;

    /// Replace the pivot partition `(dt, code, frequency)` with `records`.
    fn commit_pivots(
        &self,
        dt: NaiveDate,
        code: &str,
        frequency: Frequency,
        records: &[PivotPoint],
    ) -> Result<(), SinkError>;

    /// Drop the pivot partition `(dt, code, frequency)`. Returns whether one
    /// existed.
    fn clear_pivots(&self, dt: NaiveDate, code: &str, frequency: Frequency) -> Result<bool, SinkError>;

    /// Replace the `(pool.dt, pool.strategy_type)` partition with the pool.
    fn commit_candidates(&self, pool: &CandidatePool) -> Result<(), SinkError>;

    fn commit_selection(&self, set: &SelectionSet) -> Result<(), SinkError>;

    /// Dates with a pivot partition for `(code, frequency)`, ascending.
    fn pivot_dates(&self, code: &str, frequency: Frequency) -> Result<Vec<NaiveDate>, SinkError>;

    fn pivots_at(
        &self,
        dt: NaiveDate,
        code: &str,
        frequency: Frequency,
    ) -> Result<Vec<PivotPoint>, SinkError>;

    /// Dates with a candidate pool for `strategy_type`, ascending.
    fn candidate_dates(&self, strategy_type: StrategyType) -> Result<Vec<NaiveDate>, SinkError>;

    fn candidates_at(
        &self,
        dt: NaiveDate,
        strategy_type: StrategyType,
    ) -> Result<Option<CandidatePool>, SinkError>;

    /// Dates with a selection set called `name`, ascending.
    fn selection_dates(&self, name: &str) -> Result<Vec<NaiveDate>, SinkError>;

    fn selection_at(&self, dt: NaiveDate, name: &str) -> Result<Option<SelectionSet>, SinkError>;

    /// Pivot records from the most recent run for `(code, frequency)`.
    fn latest_pivots(&self, code: &str, frequency: Frequency) -> Result<Vec<PivotPoint>, SinkError> {
        match self.pivot_dates(code, frequency)?.last() {
            Some(&dt) => self.pivots_at(dt, code, frequency),
            None => Ok(Vec::new()),
        }
    }

    fn latest_candidates(&self, strategy_type: StrategyType) -> Result<Option<CandidatePool>, SinkError> {
        match self.candidate_dates(strategy_type)?.last() {
            Some(&dt) => self.candidates_at(dt, strategy_type),
            None => Ok(None),
        }
    }

    /// The most recent candidate row for `code`, looking back through older
    /// pools when the symbol fell out of newer ones.
    fn latest_candidate(
        &self,
        code: &str,
        strategy_type: StrategyType,
    ) -> Result<Option<StrategyCandidate>, SinkError> {
        for dt in self.candidate_dates(strategy_type)?.into_iter().rev() {
            if let Some(pool) = self.candidates_at(dt, strategy_type)? {
                if let Some(c) = pool.get(code) {
                    return Ok(Some(c.clone()));
                }
            }
        }
        Ok(None)
    }

    fn latest_selection(&self, name: &str) -> Result<Option<SelectionSet>, SinkError> {
        match self.selection_dates(name)?.last() {
            Some(&dt) => self.selection_at(dt, name),
            None => Ok(None),
        }
    }
}

/// Check that `records` all belong to `(dt, code, frequency)` and that no
/// natural key repeats.
pub fn check_pivot_partition(
    dt: NaiveDate,
    code: &str,
    frequency: Frequency,
    records: &[PivotPoint],
) -> Result<(), SinkError> {
    let mut keys = BTreeSet::new();
    for r in records {
        if r.dt != dt || r.code != code || r.frequency != frequency {
            return Err(SinkError::Rejected(format!(
                "pivot record ({}, {}, {}) committed to partition ({dt}, {code}, {frequency})",
                r.dt, r.code, r.frequency
            )));
        }
        if !keys.insert(r.key()) {
            return Err(SinkError::Rejected(format!(
                "duplicate pivot {} {} on {} in ({dt}, {code}, {frequency})",
                if r.is_filtered { "filtered" } else { "raw" },
                if r.is_high { "high" } else { "low" },
                r.trade_date
            )));
        }
    }
    Ok(())
}

/// Check a pool's rows: matching key, unique codes, ranks exactly `1..=K`.
pub fn check_pool(pool: &CandidatePool) -> Result<(), SinkError> {
    let mut codes = BTreeSet::new();
    for (i, c) in pool.candidates.iter().enumerate() {
        if c.dt != pool.dt || c.strategy_type != pool.strategy_type {
            return Err(SinkError::Rejected(format!(
                "candidate {} belongs to ({}, {}), not ({}, {})",
                c.code(),
                c.dt,
                c.strategy_type,
                pool.dt,
                pool.strategy_type
            )));
        }
        if !codes.insert(c.code()) {
            return Err(SinkError::Rejected(format!("duplicate candidate {}", c.code())));
        }
        if c.rank_in_dt != i + 1 {
            return Err(SinkError::Rejected(format!(
                "candidate {} has rank {} at position {}",
                c.code(),
                c.rank_in_dt,
                i + 1
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct MemoryState {
    pivots: BTreeMap<(String, Frequency, NaiveDate), Vec<PivotPoint>>,
    candidates: BTreeMap<(StrategyType, NaiveDate), CandidatePool>,
    selections: BTreeMap<(String, NaiveDate), SelectionSet>,
}

/// In-process sink for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T, SinkError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SinkError::Unavailable("memory sink lock poisoned".into()))?;
        Ok(f(&mut state))
    }

    /// Total pivot records across every partition.
    pub fn pivot_record_count(&self) -> usize {
        self.with_state(|s| s.pivots.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn commit_pivots(
        &self,
        dt: NaiveDate,
        code: &str,
        frequency: Frequency,
        records: &[PivotPoint],
    ) -> Result<(), SinkError> {
        check_pivot_partition(dt, code, frequency, records)?;
        self.with_state(|s| {
            s.pivots
                .insert((code.to_string(), frequency, dt), records.to_vec());
        })
    }

    fn clear_pivots(&self, dt: NaiveDate, code: &str, frequency: Frequency) -> Result<bool, SinkError> {
        self.with_state(|s| s.pivots.remove(&(code.to_string(), frequency, dt)).is_some())
    }

    fn commit_candidates(&self, pool: &CandidatePool) -> Result<(), SinkError> {
        check_pool(pool)?;
        self.with_state(|s| {
            s.candidates
                .insert((pool.strategy_type, pool.dt), pool.clone());
        })
    }

    fn commit_selection(&self, set: &SelectionSet) -> Result<(), SinkError> {
        self.with_state(|s| {
            s.selections.insert((set.name.clone(), set.dt), set.clone());
        })
    }

    fn pivot_dates(&self, code: &str, frequency: Frequency) -> Result<Vec<NaiveDate>, SinkError> {
        self.with_state(|s| {
            s.pivots
                .keys()
                .filter(|(c, f, _)| c == code && *f == frequency)
                .map(|(_, _, dt)| *dt)
                .collect()
        })
    }

    fn pivots_at(
        &self,
        dt: NaiveDate,
        code: &str,
        frequency: Frequency,
    ) -> Result<Vec<PivotPoint>, SinkError> {
        self.with_state(|s| {
            s.pivots
                .get(&(code.to_string(), frequency, dt))
                .cloned()
                .unwrap_or_default()
        })
    }

    fn candidate_dates(&self, strategy_type: StrategyType) -> Result<Vec<NaiveDate>, SinkError> {
        self.with_state(|s| {
            s.candidates
                .keys()
                .filter(|(st, _)| *st == strategy_type)
                .map(|(_, dt)| *dt)
                .collect()
        })
    }

    fn candidates_at(
        &self,
        dt: NaiveDate,
        strategy_type: StrategyType,
    ) -> Result<Option<CandidatePool>, SinkError> {
        self.with_state(|s| s.candidates.get(&(strategy_type, dt)).cloned())
    }

    fn selection_dates(&self, name: &str) -> Result<Vec<NaiveDate>, SinkError> {
        self.with_state(|s| {
            s.selections
                .keys()
                .filter(|(n, _)| n == name)
                .map(|(_, dt)| *dt)
                .collect()
        })
    }

    fn selection_at(&self, dt: NaiveDate, name: &str) -> Result<Option<SelectionSet>, SinkError> {
        self.with_state(|s| s.selections.get(&(name.to_string(), dt)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotlab_core::domain::{CandidateProfile, FilterDecision, PivotExtras};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn pivot(dt: NaiveDate, code: &str, trade_day: u32, is_high: bool) -> PivotPoint {
        PivotPoint {
            dt,
            code: code.into(),
            frequency: Frequency::Weekly,
            is_filtered: false,
            is_high,
            trade_date: NaiveDate::from_ymd_opt(2024, 6, trade_day).unwrap(),
            bar_index: trade_day as usize,
            price: 10.0,
            prominence: 0.1,
            confirm_strength: 1.0,
            z_score: 1.2,
            atr_pct: 3.0,
            extras: PivotExtras {
                threshold_pct: 0.025,
                base_swing_pct: 0.025,
                atr_multiplier: 0.6,
                confirmed_index: trade_day as usize + 2,
                confirmed_date: NaiveDate::from_ymd_opt(2024, 6, trade_day + 2).unwrap(),
                decision: FilterDecision::Kept,
            },
        }
    }

    fn pool(dt: NaiveDate, codes: &[&str]) -> CandidatePool {
        CandidatePool {
            dt,
            strategy_type: StrategyType::LongTerm,
            candidates: codes
                .iter()
                .enumerate()
                .map(|(i, code)| StrategyCandidate {
                    dt,
                    strategy_type: StrategyType::LongTerm,
                    rank_in_dt: i + 1,
                    score: 1.0 - i as f64 * 0.1,
                    profile: CandidateProfile::new(*code, Frequency::Weekly, 52),
                })
                .collect(),
        }
    }

    #[test]
    fn latest_pivots_take_the_greatest_dt() {
        let sink = MemorySink::new();
        sink.commit_pivots(day(1), "A", Frequency::Weekly, &[pivot(day(1), "A", 3, true)])
            .unwrap();
        sink.commit_pivots(day(8), "A", Frequency::Weekly, &[pivot(day(8), "A", 5, false)])
            .unwrap();
        let latest = sink.latest_pivots("A", Frequency::Weekly).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].dt, day(8));
        assert!(sink.latest_pivots("A", Frequency::Daily).unwrap().is_empty());
        assert_eq!(sink.pivot_dates("A", Frequency::Weekly).unwrap(), vec![day(1), day(8)]);
    }

    #[test]
    fn clearing_drops_one_partition_only() {
        let sink = MemorySink::new();
        sink.commit_pivots(day(1), "A", Frequency::Weekly, &[pivot(day(1), "A", 3, true)])
            .unwrap();
        sink.commit_pivots(day(8), "A", Frequency::Weekly, &[pivot(day(8), "A", 5, false)])
            .unwrap();

        assert!(sink.clear_pivots(day(8), "A", Frequency::Weekly).unwrap());
        assert!(!sink.clear_pivots(day(8), "A", Frequency::Weekly).unwrap());
        assert!(!sink.clear_pivots(day(1), "A", Frequency::Daily).unwrap());
        assert_eq!(sink.pivot_dates("A", Frequency::Weekly).unwrap(), vec![day(1)]);
        assert_eq!(sink.latest_pivots("A", Frequency::Weekly).unwrap()[0].dt, day(1));
    }

    #[test]
    fn pivot_partition_rejects_foreign_and_duplicate_records() {
        let sink = MemorySink::new();
        let foreign = sink.commit_pivots(day(1), "A", Frequency::Weekly, &[pivot(day(1), "B", 3, true)]);
        assert!(matches!(foreign, Err(SinkError::Rejected(_))));

        let p = pivot(day(1), "A", 3, true);
        let dup = sink.commit_pivots(day(1), "A", Frequency::Weekly, &[p.clone(), p]);
        assert!(matches!(dup, Err(SinkError::Rejected(_))));
        assert_eq!(sink.pivot_record_count(), 0);
    }

    #[test]
    fn pool_with_rank_gap_is_rejected() {
        let mut bad = pool(day(1), &["A", "B"]);
        bad.candidates[1].rank_in_dt = 3;
        assert!(matches!(
            MemorySink::new().commit_candidates(&bad),
            Err(SinkError::Rejected(_))
        ));
    }

    #[test]
    fn latest_candidate_looks_back_through_older_pools() {
        let sink = MemorySink::new();
        sink.commit_candidates(&pool(day(1), &["A", "B"])).unwrap();
        sink.commit_candidates(&pool(day(2), &["B"])).unwrap();

        let a = sink.latest_candidate("A", StrategyType::LongTerm).unwrap().unwrap();
        assert_eq!(a.dt, day(1));
        let b = sink.latest_candidate("B", StrategyType::LongTerm).unwrap().unwrap();
        assert_eq!((b.dt, b.rank_in_dt), (day(2), 1));
        assert!(sink.latest_candidate("C", StrategyType::LongTerm).unwrap().is_none());
        assert!(sink.latest_candidates(StrategyType::ShortTerm).unwrap().is_none());
    }

    #[test]
    fn selections_are_read_back_by_name() {
        let sink = MemorySink::new();
        let set = SelectionSet::from_pool(&pool(day(3), &["B", "A"]));
        sink.commit_selection(&set).unwrap();
        assert_eq!(sink.latest_selection("long_term").unwrap(), Some(set));
        assert!(sink.latest_selection("short_term").unwrap().is_none());
    }
}
