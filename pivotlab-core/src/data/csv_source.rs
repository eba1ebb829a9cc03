//! CSV bar source.
//!
//! Layout: `{root}/{code}.csv` with columns `date,open,high,low,close[,volume]`
//! holding daily bars. A `{code}_weekly.csv` next to it is used for weekly
//! requests when present; otherwise daily bars are resampled.
//!
//! Rows keep their file order. Prices that fail to parse become NaN so that
//! series validation can point at the offending bar.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::domain::{Bar, Frequency};

use super::resample::resample_weekly;
use super::source::{tail, BarSource, DataError};

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: NaiveDate,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: Option<f64>,
}

fn price(field: &str) -> f64 {
    field.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Reads one CSV file per symbol from a directory.
#[derive(Debug, Clone)]
pub struct CsvBarSource {
    root: PathBuf,
}

impl CsvBarSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn daily_path(&self, code: &str) -> PathBuf {
        self.root.join(format!("{code}.csv"))
    }

    fn weekly_path(&self, code: &str) -> PathBuf {
        self.root.join(format!("{code}_weekly.csv"))
    }

    /// Codes with a daily file in the directory, sorted.
    pub fn available_codes(&self) -> Result<Vec<String>, DataError> {
        let mut codes = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.ends_with("_weekly") {
                    codes.push(stem.to_string());
                }
            }
        }
        codes.sort();
        Ok(codes)
    }

    fn read_file(path: &Path, code: &str, frequency: Frequency) -> Result<Vec<Bar>, DataError> {
        let csv_err = |e: csv::Error| DataError::Csv {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_err)?;

        let mut bars = Vec::new();
        for row in reader.deserialize::<CsvRow>() {
            let row = row.map_err(csv_err)?;
            bars.push(Bar {
                code: code.to_string(),
                date: row.date,
                open: price(&row.open),
                high: price(&row.high),
                low: price(&row.low),
                close: price(&row.close),
                volume: row
                    .volume
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .map(|v| v.round() as u64)
                    .unwrap_or(0),
                frequency,
            });
        }
        Ok(bars)
    }
}

impl BarSource for CsvBarSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn load(
        &self,
        code: &str,
        frequency: Frequency,
        window_bars: usize,
    ) -> Result<Vec<Bar>, DataError> {
        if frequency == Frequency::Weekly {
            let weekly = self.weekly_path(code);
            if weekly.exists() {
                return Ok(tail(
                    Self::read_file(&weekly, code, Frequency::Weekly)?,
                    window_bars,
                ));
            }
        }

        let daily = self.daily_path(code);
        if !daily.exists() {
            return Err(DataError::SymbolNotFound {
                code: code.to_string(),
            });
        }
        let bars = Self::read_file(&daily, code, Frequency::Daily)?;
        let bars = match frequency {
            Frequency::Daily => bars,
            Frequency::Weekly => resample_weekly(&bars),
        };
        Ok(tail(bars, window_bars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{validate_series, SeriesError};

    const DAILY: &str = "date,open,high,low,close,volume\n\
        2024-01-08,10,11,9.5,10.5,1000\n\
        2024-01-09,10.5,12,10,11.5,1200\n\
        2024-01-15,11.5,11.8,9,9.2,900\n";

    fn dir_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            std::fs::write(dir.path().join(name), body).unwrap();
        }
        dir
    }

    #[test]
    fn reads_daily_rows_in_file_order() {
        let dir = dir_with(&[("AAA.csv", DAILY)]);
        let src = CsvBarSource::new(dir.path());
        let bars = src.load("AAA", Frequency::Daily, 0).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[1].high, 12.0);
        assert_eq!(bars[1].volume, 1200);
        assert_eq!(bars[0].code, "AAA");
    }

    #[test]
    fn volume_column_is_optional() {
        let body = "date,open,high,low,close\n2024-01-08,10,11,9,10\n";
        let dir = dir_with(&[("AAA.csv", body)]);
        let bars = CsvBarSource::new(dir.path())
            .load("AAA", Frequency::Daily, 0)
            .unwrap();
        assert_eq!(bars[0].volume, 0);
    }

    #[test]
    fn weekly_prefers_dedicated_file_then_resamples() {
        let weekly = "date,open,high,low,close\n2024-01-12,1,2,0.5,1.5\n";
        let dir = dir_with(&[("AAA.csv", DAILY), ("BBB.csv", DAILY), ("AAA_weekly.csv", weekly)]);
        let src = CsvBarSource::new(dir.path());
        assert_eq!(src.load("AAA", Frequency::Weekly, 0).unwrap().len(), 1);
        assert_eq!(src.load("AAA", Frequency::Weekly, 0).unwrap()[0].close, 1.5);
        assert_eq!(src.load("BBB", Frequency::Weekly, 0).unwrap().len(), 2);
        assert_eq!(src.available_codes().unwrap(), vec!["AAA", "BBB"]);
    }

    #[test]
    fn bad_price_is_reported_at_its_bar() {
        let body = "date,open,high,low,close\n2024-01-08,10,11,9,10\n2024-01-09,10,n/a,9,10\n";
        let dir = dir_with(&[("AAA.csv", body)]);
        let bars = CsvBarSource::new(dir.path())
            .load("AAA", Frequency::Daily, 0)
            .unwrap();
        let err = validate_series("AAA", &bars).unwrap_err();
        assert!(matches!(err, SeriesError::MalformedSeries { index: 1, .. }));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = dir_with(&[]);
        let err = CsvBarSource::new(dir.path())
            .load("ZZZ", Frequency::Daily, 0)
            .unwrap_err();
        assert!(matches!(err, DataError::SymbolNotFound { .. }));
    }
}
