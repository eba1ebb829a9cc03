//! Bar: the fundamental market data unit, plus series validation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Sampling frequency of a bar series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
        }
    }

    /// Bars per year used to annualize returns and volatility.
    pub fn periods_per_year(&self) -> f64 {
        match self {
            Frequency::Daily => 252.0,
            Frequency::Weekly => 52.0,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" | "d" => Ok(Frequency::Daily),
            "weekly" | "w" => Ok(Frequency::Weekly),
            other => Err(format!("unknown frequency '{other}' (expected daily|weekly)")),
        }
    }
}

/// OHLC bar for a single symbol at one point of a daily or weekly series.
///
/// The bar's position index is implicit: it is the bar's offset within the
/// series slice it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub code: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: u64,
    pub frequency: Frequency,
}

impl Bar {
    /// Returns true if any OHLC field is NaN (void bar).
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check: finite, positive prices and high >= low.
    pub fn is_sane(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite() && *p > 0.0) && self.high >= self.low
    }
}

/// Per-symbol data errors. Fatal to that symbol's run only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("insufficient data for {code}: {bars} bars, need at least {required}")]
    InsufficientData {
        code: String,
        bars: usize,
        required: usize,
    },

    #[error("malformed series for {code} at bar {index} ({date}): {reason}")]
    MalformedSeries {
        code: String,
        index: usize,
        date: NaiveDate,
        reason: String,
    },
}

/// Check that a series has strictly increasing dates and usable prices.
///
/// Returns the first offending bar as a `MalformedSeries` diagnostic.
pub fn validate_series(code: &str, bars: &[Bar]) -> Result<(), SeriesError> {
    let malformed = |index: usize, date: NaiveDate, reason: String| SeriesError::MalformedSeries {
        code: code.to_string(),
        index,
        date,
        reason,
    };

    for (i, bar) in bars.iter().enumerate() {
        if !bar.is_sane() {
            return Err(malformed(
                i,
                bar.date,
                format!(
                    "unusable prices o={} h={} l={} c={}",
                    bar.open, bar.high, bar.low, bar.close
                ),
            ));
        }
        if i > 0 {
            let prev = bars[i - 1].date;
            if bar.date == prev {
                return Err(malformed(i, bar.date, "duplicate trade date".into()));
            }
            if bar.date < prev {
                return Err(malformed(
                    i,
                    bar.date,
                    format!("date goes backwards (previous bar {prev})"),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bar(day: u32) -> Bar {
        Bar {
            code: "600519.SH".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: 100.0,
            high: 105.0,
            low: 98.0,
            close: 103.0,
            volume: 50_000,
            frequency: Frequency::Daily,
        }
    }

    #[test]
    fn bar_is_sane() {
        assert!(sample_bar(2).is_sane());
    }

    #[test]
    fn bar_detects_void() {
        let mut bar = sample_bar(2);
        bar.open = f64::NAN;
        assert!(bar.is_void());
        assert!(!bar.is_sane());
    }

    #[test]
    fn bar_detects_insane_high_low() {
        let mut bar = sample_bar(2);
        bar.high = 97.0;
        assert!(!bar.is_sane());
    }

    #[test]
    fn validate_accepts_increasing_dates() {
        let bars = vec![sample_bar(2), sample_bar(3), sample_bar(4)];
        assert!(validate_series("600519.SH", &bars).is_ok());
    }

    #[test]
    fn validate_reports_duplicate_date_with_index() {
        let bars = vec![sample_bar(2), sample_bar(3), sample_bar(3)];
        match validate_series("600519.SH", &bars) {
            Err(SeriesError::MalformedSeries { index, reason, .. }) => {
                assert_eq!(index, 2);
                assert!(reason.contains("duplicate"));
            }
            other => panic!("expected MalformedSeries, got {other:?}"),
        }
    }

    #[test]
    fn validate_reports_backwards_date() {
        let bars = vec![sample_bar(5), sample_bar(4)];
        let err = validate_series("X", &bars).unwrap_err();
        assert!(matches!(err, SeriesError::MalformedSeries { index: 1, .. }));
    }

    #[test]
    fn validate_reports_non_finite_price() {
        let mut bad = sample_bar(3);
        bad.close = f64::INFINITY;
        let bars = vec![sample_bar(2), bad];
        let err = validate_series("X", &bars).unwrap_err();
        assert!(matches!(err, SeriesError::MalformedSeries { index: 1, .. }));
    }

    #[test]
    fn frequency_parses_and_displays() {
        assert_eq!("weekly".parse::<Frequency>().unwrap(), Frequency::Weekly);
        assert_eq!("D".parse::<Frequency>().unwrap(), Frequency::Daily);
        assert!("monthly".parse::<Frequency>().is_err());
        assert_eq!(Frequency::Weekly.to_string(), "weekly");
    }

    #[test]
    fn bar_serialization_roundtrip() {
        let bar = sample_bar(2);
        let json = serde_json::to_string(&bar).unwrap();
        assert!(json.contains("\"frequency\":\"daily\""));
        let deser: Bar = serde_json::from_str(&json).unwrap();
        assert_eq!(bar, deser);
    }
}
