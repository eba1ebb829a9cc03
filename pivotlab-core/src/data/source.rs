//! Bar source trait and structured error types.
//!
//! A `BarSource` hands out one ordered series per `(code, frequency)`. It
//! does not sort or repair what it reads: ordering problems surface later as
//! `MalformedSeries` for that symbol alone.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

use crate::domain::{Bar, Frequency};

use super::resample::resample_weekly;

/// Errors from bar sources.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("symbol not found: {code}")]
    SymbolNotFound { code: String },

    #[error("csv error in {path}: {reason}")]
    Csv { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Supplies ordered OHLC series.
pub trait BarSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Load the most recent `window_bars` bars of `code` at `frequency`
    /// (all available bars when `window_bars` is 0), oldest first.
    fn load(&self, code: &str, frequency: Frequency, window_bars: usize)
        -> Result<Vec<Bar>, DataError>;
}

/// Keep the last `window` bars (all when `window` is 0).
pub fn tail(mut bars: Vec<Bar>, window: usize) -> Vec<Bar> {
    if window > 0 && bars.len() > window {
        bars.drain(..bars.len() - window);
    }
    bars
}

/// In-memory source, mainly for tests. Weekly requests fall back to
/// resampling stored daily bars.
#[derive(Debug, Default)]
pub struct MemoryBarSource {
    series: BTreeMap<(String, Frequency), Vec<Bar>>,
    loads: AtomicUsize,
}

impl MemoryBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a series under its code and the frequency of its bars.
    pub fn insert(&mut self, bars: Vec<Bar>) {
        if let Some(first) = bars.first() {
            let key = (first.code.clone(), first.frequency);
            self.series.insert(key, bars);
        }
    }

    pub fn with(mut self, bars: Vec<Bar>) -> Self {
        self.insert(bars);
        self
    }

    /// Number of `load` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

impl BarSource for MemoryBarSource {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(
        &self,
        code: &str,
        frequency: Frequency,
        window_bars: usize,
    ) -> Result<Vec<Bar>, DataError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        if let Some(bars) = self.series.get(&(code.to_string(), frequency)) {
            return Ok(tail(bars.clone(), window_bars));
        }
        if frequency == Frequency::Weekly {
            if let Some(daily) = self.series.get(&(code.to_string(), Frequency::Daily)) {
                return Ok(tail(resample_weekly(daily), window_bars));
            }
        }
        Err(DataError::SymbolNotFound {
            code: code.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn daily(code: &str, n: usize) -> Vec<Bar> {
        // 2024-01-01 is a Monday
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| Bar {
                code: code.into(),
                date: start + chrono::Duration::days(i as i64),
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.0 + i as f64,
                volume: 1,
                frequency: Frequency::Daily,
            })
            .collect()
    }

    #[test]
    fn window_keeps_most_recent_bars() {
        let src = MemoryBarSource::new().with(daily("A", 10));
        let bars = src.load("A", Frequency::Daily, 3).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[2].close, 19.0);
        assert_eq!(src.load("A", Frequency::Daily, 0).unwrap().len(), 10);
        assert_eq!(src.load_count(), 2);
    }

    #[test]
    fn weekly_request_resamples_daily() {
        let src = MemoryBarSource::new().with(daily("A", 14));
        let weekly = src.load("A", Frequency::Weekly, 0).unwrap();
        assert_eq!(weekly.len(), 2);
        assert!(weekly.iter().all(|b| b.frequency == Frequency::Weekly));
    }

    #[test]
    fn unknown_symbol_is_not_found() {
        let src = MemoryBarSource::new();
        assert!(matches!(
            src.load("NOPE", Frequency::Daily, 0),
            Err(DataError::SymbolNotFound { .. })
        ));
    }
}
