//! Deterministic synthetic bars for demos and benchmarks.
//!
//! Each symbol gets its own random walk seeded from the blake3 hash of its
//! code, so the same code always produces the same series.

use chrono::{Datelike, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::{Bar, Frequency};

use super::resample::resample_weekly;
use super::source::{tail, BarSource, DataError};

/// Random-walk source over weekdays ending at `end`.
#[derive(Debug, Clone)]
pub struct SyntheticBarSource {
    end: NaiveDate,
    daily_bars: usize,
    max_daily_move: f64,
}

impl SyntheticBarSource {
    /// `daily_bars` weekday bars ending on or before `end`.
    pub fn new(end: NaiveDate, daily_bars: usize) -> Self {
        Self {
            end,
            daily_bars,
            max_daily_move: 0.03,
        }
    }

    /// Widen or narrow the per-bar return range (default ±3%).
    pub fn with_max_daily_move(mut self, max_move: f64) -> Self {
        self.max_daily_move = max_move.abs();
        self
    }

    pub fn generate(&self, code: &str) -> Vec<Bar> {
        let seed: [u8; 32] = *blake3::hash(code.as_bytes()).as_bytes();
        let mut rng = StdRng::from_seed(seed);

        let dates = weekdays_ending(self.end, self.daily_bars);
        let mut price = 100.0_f64;
        let mut bars = Vec::with_capacity(dates.len());

        for date in dates {
            let step: f64 = if self.max_daily_move > 0.0 {
                rng.gen_range(-self.max_daily_move..self.max_daily_move)
            } else {
                0.0
            };
            let open = price;
            let close = price * (1.0 + step);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
            let volume = rng.gen_range(500_000..5_000_000u64);

            bars.push(Bar {
                code: code.to_string(),
                date,
                open,
                high,
                low,
                close,
                volume,
                frequency: Frequency::Daily,
            });
            price = close;
        }

        bars
    }
}

fn weekdays_ending(end: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    let mut current = end;
    while dates.len() < count {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(current);
        }
        match current.pred_opt() {
            Some(prev) => current = prev,
            None => break,
        }
    }
    dates.reverse();
    dates
}

impl BarSource for SyntheticBarSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn load(
        &self,
        code: &str,
        frequency: Frequency,
        window_bars: usize,
    ) -> Result<Vec<Bar>, DataError> {
        let daily = self.generate(code);
        let bars = match frequency {
            Frequency::Daily => daily,
            Frequency::Weekly => resample_weekly(&daily),
        };
        Ok(tail(bars, window_bars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::validate_series;

    fn end() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()
    }

    #[test]
    fn same_code_same_series() {
        let src = SyntheticBarSource::new(end(), 200);
        assert_eq!(src.generate("AAA"), src.generate("AAA"));
        assert_ne!(src.generate("AAA"), src.generate("BBB"));
    }

    #[test]
    fn bars_are_valid_weekdays() {
        let bars = SyntheticBarSource::new(end(), 300).generate("AAA");
        assert_eq!(bars.len(), 300);
        assert_eq!(bars.last().unwrap().date, end());
        assert!(bars
            .iter()
            .all(|b| !matches!(b.date.weekday(), Weekday::Sat | Weekday::Sun)));
        validate_series("AAA", &bars).unwrap();
    }

    #[test]
    fn weekly_load_is_resampled() {
        let src = SyntheticBarSource::new(end(), 250);
        let weekly = src.load("AAA", Frequency::Weekly, 20).unwrap();
        assert_eq!(weekly.len(), 20);
        validate_series("AAA", &weekly).unwrap();
    }
}
