//! JSONL record sink: one file per partition, one JSON object per line.
//!
//! Layout under the root directory:
//! ```text
//! pivots/{frequency}/{code}/{dt}.jsonl
//! candidates/{strategy_type}/{dt}.jsonl
//! selections/{name}/{dt}.json
//! ```
//! A commit writes the whole partition to a temp file and renames it over
//! the old one, so readers see either the previous partition or the new one.
//! Clearing a pivot partition removes its file.

use std::fs::{self, File};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;

use pivotlab_core::domain::{CandidatePool, Frequency, PivotPoint, SelectionSet, StrategyType};

use crate::sink::{check_pivot_partition, check_pool, RecordSink, SinkError};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct JsonlSink {
    root: PathBuf,
}

impl JsonlSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pivot_dir(&self, code: &str, frequency: Frequency) -> Result<PathBuf, SinkError> {
        Ok(self
            .root
            .join("pivots")
            .join(frequency.as_str())
            .join(path_component(code)?))
    }

    fn candidate_dir(&self, strategy_type: StrategyType) -> PathBuf {
        self.root.join("candidates").join(strategy_type.as_str())
    }

    fn selection_dir(&self, name: &str) -> Result<PathBuf, SinkError> {
        Ok(self.root.join("selections").join(path_component(name)?))
    }
}

/// Codes and selection names become directory names; refuse anything that
/// could escape the sink root.
fn path_component(s: &str) -> Result<&str, SinkError> {
    let bad = s.is_empty()
        || s == "."
        || s == ".."
        || s.contains(['/', '\\'])
        || s.chars().any(char::is_control);
    if bad {
        return Err(SinkError::Rejected(format!("'{s}' cannot name a partition")));
    }
    Ok(s)
}

fn partition_file(dir: &Path, dt: NaiveDate, ext: &str) -> PathBuf {
    dir.join(format!("{}.{ext}", dt.format(DATE_FORMAT)))
}

/// Write `body` to `path` through a sibling temp file.
fn write_atomic(path: &Path, body: impl FnOnce(&mut BufWriter<File>) -> Result<(), SinkError>) -> Result<(), SinkError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = File::create(&tmp)
        .map_err(SinkError::from)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            body(&mut writer)?;
            let file = writer
                .into_inner()
                .map_err(|e| SinkError::Io(e.into_error()))?;
            file.sync_all()?;
            Ok(())
        })
        .and_then(|()| fs::rename(&tmp, path).map_err(SinkError::from));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_lines<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), SinkError> {
    write_atomic(path, |w| {
        for row in rows {
            serde_json::to_writer(&mut *w, row)
                .map_err(|e| SinkError::Serialization(e.to_string()))?;
            w.write_all(b"\n")?;
        }
        Ok(())
    })
}

/// Read every line of a partition. None when the partition does not exist.
fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Option<Vec<T>>, SinkError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut rows = Vec::new();
    for (n, line) in io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|e| {
            SinkError::Serialization(format!("{} line {}: {e}", path.display(), n + 1))
        })?;
        rows.push(row);
    }
    Ok(Some(rows))
}

/// Partition dates in `dir`, ascending. Temp files and stray names are ignored.
fn list_dates(dir: &Path, ext: &str) -> Result<Vec<NaiveDate>, SinkError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut dates = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Ok(dt) = NaiveDate::parse_from_str(stem, DATE_FORMAT) {
            dates.push(dt);
        }
    }
    dates.sort();
    Ok(dates)
}

impl RecordSink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn commit_pivots(
        &self,
        dt: NaiveDate,
        code: &str,
        frequency: Frequency,
        records: &[PivotPoint],
    ) -> Result<(), SinkError> {
        check_pivot_partition(dt, code, frequency, records)?;
        let path = partition_file(&self.pivot_dir(code, frequency)?, dt, "jsonl");
        write_lines(&path, records)
    }

    fn clear_pivots(&self, dt: NaiveDate, code: &str, frequency: Frequency) -> Result<bool, SinkError> {
        let path = partition_file(&self.pivot_dir(code, frequency)?, dt, "jsonl");
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn commit_candidates(&self, pool: &CandidatePool) -> Result<(), SinkError> {
        check_pool(pool)?;
        let path = partition_file(&self.candidate_dir(pool.strategy_type), pool.dt, "jsonl");
        write_lines(&path, &pool.candidates)
    }

    fn commit_selection(&self, set: &SelectionSet) -> Result<(), SinkError> {
        let path = partition_file(&self.selection_dir(&set.name)?, set.dt, "json");
        write_atomic(&path, |w| {
            serde_json::to_writer_pretty(&mut *w, set)
                .map_err(|e| SinkError::Serialization(e.to_string()))
        })
    }

    fn pivot_dates(&self, code: &str, frequency: Frequency) -> Result<Vec<NaiveDate>, SinkError> {
        list_dates(&self.pivot_dir(code, frequency)?, "jsonl")
    }

    fn pivots_at(
        &self,
        dt: NaiveDate,
        code: &str,
        frequency: Frequency,
    ) -> Result<Vec<PivotPoint>, SinkError> {
        let path = partition_file(&self.pivot_dir(code, frequency)?, dt, "jsonl");
        Ok(read_lines(&path)?.unwrap_or_default())
    }

    fn candidate_dates(&self, strategy_type: StrategyType) -> Result<Vec<NaiveDate>, SinkError> {
        list_dates(&self.candidate_dir(strategy_type), "jsonl")
    }

    fn candidates_at(
        &self,
        dt: NaiveDate,
        strategy_type: StrategyType,
    ) -> Result<Option<CandidatePool>, SinkError> {
        let path = partition_file(&self.candidate_dir(strategy_type), dt, "jsonl");
        Ok(read_lines(&path)?.map(|candidates| CandidatePool {
            dt,
            strategy_type,
            candidates,
        }))
    }

    fn selection_dates(&self, name: &str) -> Result<Vec<NaiveDate>, SinkError> {
        list_dates(&self.selection_dir(name)?, "json")
    }

    fn selection_at(&self, dt: NaiveDate, name: &str) -> Result<Option<SelectionSet>, SinkError> {
        let path = partition_file(&self.selection_dir(name)?, dt, "json");
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| SinkError::Serialization(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotlab_core::domain::{CandidateProfile, StrategyCandidate};
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, d).unwrap()
    }

    fn pool(dt: NaiveDate, codes: &[&str]) -> CandidatePool {
        CandidatePool {
            dt,
            strategy_type: StrategyType::ShortTerm,
            candidates: codes
                .iter()
                .enumerate()
                .map(|(i, code)| {
                    let mut profile = CandidateProfile::new(*code, Frequency::Daily, 120);
                    profile.extras.insert("t1_price".into(), serde_json::json!(9.5));
                    StrategyCandidate {
                        dt,
                        strategy_type: StrategyType::ShortTerm,
                        rank_in_dt: i + 1,
                        score: 2.0 - i as f64,
                        profile,
                    }
                })
                .collect(),
        }
    }

    #[test]
    fn pool_roundtrips_through_its_partition() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path());
        let p = pool(day(3), &["600000.SH", "000001.SZ"]);
        sink.commit_candidates(&p).unwrap();

        let path = dir.path().join("candidates/short_term/2025-02-03.jsonl");
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(sink.candidates_at(day(3), StrategyType::ShortTerm).unwrap(), Some(p));
    }

    #[test]
    fn recommit_replaces_only_its_own_date() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path());
        sink.commit_candidates(&pool(day(3), &["A", "B"])).unwrap();
        sink.commit_candidates(&pool(day(4), &["C"])).unwrap();
        sink.commit_candidates(&pool(day(3), &["D"])).unwrap();

        let old = sink.candidates_at(day(3), StrategyType::ShortTerm).unwrap().unwrap();
        assert_eq!(old.codes(), vec!["D"]);
        let latest = sink.latest_candidates(StrategyType::ShortTerm).unwrap().unwrap();
        assert_eq!((latest.dt, latest.codes()), (day(4), vec!["C".to_string()]));
        assert_eq!(
            sink.candidate_dates(StrategyType::ShortTerm).unwrap(),
            vec![day(3), day(4)]
        );
    }

    #[test]
    fn stray_files_are_not_partitions() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path());
        sink.commit_candidates(&pool(day(3), &["A"])).unwrap();
        let cdir = dir.path().join("candidates/short_term");
        fs::write(cdir.join("2025-02-09.jsonl.tmp"), "partial").unwrap();
        fs::write(cdir.join("notes.jsonl"), "{}").unwrap();
        assert_eq!(sink.candidate_dates(StrategyType::ShortTerm).unwrap(), vec![day(3)]);
    }

    #[test]
    fn corrupt_line_is_reported_with_its_location() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path());
        sink.commit_candidates(&pool(day(3), &["A"])).unwrap();
        let path = dir.path().join("candidates/short_term/2025-02-03.jsonl");
        fs::write(&path, "{not json}\n").unwrap();
        let err = sink.candidates_at(day(3), StrategyType::ShortTerm).unwrap_err();
        assert!(err.to_string().contains("line 1"), "{err}");
    }

    #[test]
    fn selection_names_cannot_escape_the_root() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path());
        let set = SelectionSet {
            name: "../evil".into(),
            dt: day(1),
            codes: vec!["A".into()],
        };
        assert!(matches!(sink.commit_selection(&set), Err(SinkError::Rejected(_))));
    }

    #[test]
    fn cleared_pivot_partition_leaves_other_dates() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path());
        sink.commit_pivots(day(3), "600000.SH", Frequency::Weekly, &[]).unwrap();
        sink.commit_pivots(day(10), "600000.SH", Frequency::Weekly, &[]).unwrap();

        assert!(sink.clear_pivots(day(10), "600000.SH", Frequency::Weekly).unwrap());
        assert!(!dir.path().join("pivots/weekly/600000.SH/2025-02-10.jsonl").exists());
        assert!(!sink.clear_pivots(day(10), "600000.SH", Frequency::Weekly).unwrap());
        assert_eq!(
            sink.pivot_dates("600000.SH", Frequency::Weekly).unwrap(),
            vec![day(3)]
        );
    }

    #[test]
    fn missing_partitions_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path().join("never-written"));
        assert!(sink.latest_pivots("A", Frequency::Weekly).unwrap().is_empty());
        assert!(sink.latest_candidates(StrategyType::LongTerm).unwrap().is_none());
        assert!(sink.latest_selection("long_term").unwrap().is_none());
    }
}
