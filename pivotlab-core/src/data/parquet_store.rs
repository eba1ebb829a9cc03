//! Parquet-backed panel store.
//!
//! Layout: `{root}/{namespace}/{key}.parquet` with a `{key}.meta.json`
//! sidecar. The parquet file holds one row per bar (`code, date, open, high,
//! low, close, volume`); the sidecar holds the entry metadata and the codes
//! that failed to load.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Integrity check on load (schema, content hash against the sidecar)
//! - Quarantine for corrupt files ({filename}.quarantined)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::Bar;

use super::cache::{CacheEntry, CacheKey, EntryMeta, Namespace};
use super::panel::BarPanel;
use super::store::{CacheError, PanelStore};

const COLUMNS: [&str; 7] = ["code", "date", "open", "high", "low", "close", "volume"];

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    meta: EntryMeta,
    missing: BTreeMap<String, String>,
}

pub struct ParquetPanelStore {
    root: PathBuf,
}

impl ParquetPanelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: Namespace) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.namespace_dir(key.namespace())
            .join(format!("{}.parquet", key.as_str()))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.namespace_dir(key.namespace())
            .join(format!("{}.meta.json", key.as_str()))
    }

    fn quarantine(&self, key: &CacheKey, reason: &str) {
        for path in [self.data_path(key), self.meta_path(key)] {
            if path.exists() {
                let mut target = path.clone().into_os_string();
                target.push(".quarantined");
                warn!(path = %path.display(), reason, "quarantining corrupt cache file");
                let _ = fs::rename(&path, PathBuf::from(target));
            }
        }
    }

    fn read_entry(&self, key: &CacheKey) -> Result<CacheEntry, CacheError> {
        let corrupt = |reason: String| CacheError::Corrupt {
            key: key.to_string(),
            reason,
        };

        let sidecar: Sidecar = serde_json::from_str(&fs::read_to_string(self.meta_path(key))?)
            .map_err(|e| corrupt(format!("sidecar: {e}")))?;
        if &sidecar.meta.key != key {
            return Err(corrupt(format!("sidecar names key {}", sidecar.meta.key)));
        }

        let file = fs::File::open(self.data_path(key))?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| corrupt(format!("read: {e}")))?;
        for name in COLUMNS {
            if df.column(name).is_err() {
                return Err(corrupt(format!("missing column '{name}'")));
            }
        }

        let frequency = sidecar.meta.spec.frequency;
        let mut panel = BarPanel::new(sidecar.meta.spec);
        for bar in dataframe_to_bars(&df, frequency).map_err(|e| corrupt(e.to_string()))? {
            panel.series.entry(bar.code.clone()).or_default().push(bar);
        }
        panel.missing = sidecar.missing;

        if panel.content_hash() != sidecar.meta.content_hash {
            return Err(corrupt("content hash mismatch".into()));
        }

        Ok(CacheEntry {
            meta: sidecar.meta,
            panel: Arc::new(panel),
        })
    }
}

fn write_atomic(path: &Path, write: impl FnOnce(&Path) -> Result<(), CacheError>) -> Result<(), CacheError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    write(&tmp)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        CacheError::Io(e)
    })
}

impl PanelStore for ParquetPanelStore {
    fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let data = self.data_path(key);
        let meta = self.meta_path(key);
        if !data.exists() && !meta.exists() {
            return Ok(None);
        }
        match self.read_entry(key) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                self.quarantine(key, &e.to_string());
                Err(e)
            }
        }
    }

    fn save(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let key = &entry.meta.key;
        fs::create_dir_all(self.namespace_dir(key.namespace()))?;

        let mut df = bars_to_dataframe(entry.panel.series.values().flatten())?;
        write_atomic(&self.data_path(key), |tmp| {
            let file = fs::File::create(tmp)?;
            ParquetWriter::new(file)
                .finish(&mut df)
                .map_err(|e| CacheError::Parquet(format!("write parquet: {e}")))?;
            Ok(())
        })?;

        let sidecar = Sidecar {
            meta: entry.meta.clone(),
            missing: entry.panel.missing.clone(),
        };
        let json = serde_json::to_string_pretty(&sidecar)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        write_atomic(&self.meta_path(key), |tmp| Ok(fs::write(tmp, json)?))
    }

    fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut removed = false;
        for path in [self.data_path(key), self.meta_path(key)] {
            if path.exists() {
                fs::remove_file(&path)?;
                removed = true;
            }
        }
        Ok(removed)
    }

    fn entries(&self) -> Result<Vec<EntryMeta>, CacheError> {
        let mut metas = Vec::new();
        for namespace in [Namespace::All, Namespace::Selection] {
            let dir = self.namespace_dir(namespace);
            if !dir.exists() {
                continue;
            }
            for dir_entry in fs::read_dir(&dir)? {
                let path = dir_entry?.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some(key) = name.strip_suffix(".meta.json").and_then(CacheKey::parse) else {
                    continue;
                };
                match fs::read_to_string(&path)
                    .ok()
                    .and_then(|s| serde_json::from_str::<Sidecar>(&s).ok())
                {
                    Some(sidecar) => metas.push(sidecar.meta),
                    None => warn!(%key, "unreadable cache sidecar skipped"),
                }
            }
        }
        metas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(metas)
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn bars_to_dataframe<'a>(bars: impl Iterator<Item = &'a Bar>) -> Result<DataFrame, CacheError> {
    let bars: Vec<&Bar> = bars.collect();
    let codes: Vec<&str> = bars.iter().map(|b| b.code.as_str()).collect();
    let dates: Vec<i32> = bars
        .iter()
        .map(|b| (b.date - epoch()).num_days() as i32)
        .collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        Column::new("code".into(), codes),
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| CacheError::Parquet(format!("date cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| CacheError::Parquet(format!("dataframe creation: {e}")))
}

fn dataframe_to_bars(df: &DataFrame, frequency: crate::domain::Frequency) -> Result<Vec<Bar>, PolarsError> {
    let code_ca = df.column("code")?.str()?;
    let date_ca = df.column("date")?.date()?;
    let open_ca = df.column("open")?.f64()?;
    let high_ca = df.column("high")?.f64()?;
    let low_ca = df.column("low")?.f64()?;
    let close_ca = df.column("close")?.f64()?;
    let vol_ca = df.column("volume")?.u64()?;

    let mut bars = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(code), Some(days)) = (code_ca.get(i), date_ca.get(i)) else {
            return Err(PolarsError::NoData(format!("null code or date at row {i}").into()));
        };
        bars.push(Bar {
            code: code.to_string(),
            date: epoch() + chrono::Duration::days(days as i64),
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
            frequency,
        });
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::cache::{CacheLookup, CacheMode, MissReason, SelectionCache};
    use crate::data::panel::PanelSpec;
    use crate::data::source::MemoryBarSource;
    use crate::data::synthetic::SyntheticBarSource;
    use crate::domain::{Frequency, Universe};

    fn universe() -> Universe {
        Universe::selection("top3", ["AAA", "BBB", "ZZZ"])
    }

    fn panel(spec: PanelSpec) -> BarPanel {
        let synth = SyntheticBarSource::new(NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(), 120);
        let src = MemoryBarSource::new()
            .with(synth.generate("AAA"))
            .with(synth.generate("BBB"));
        BarPanel::load(&src, &universe().resolve(None), spec)
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let spec = PanelSpec::new(Frequency::Weekly, 20);
        let mut cache = SelectionCache::new(ParquetPanelStore::new(dir.path()));
        let committed = cache.commit(&universe(), panel(spec)).unwrap();

        let key = committed.meta.key.clone();
        assert!(dir.path().join("sel").join(format!("{key}.parquet")).exists());

        match cache.lookup(&universe(), spec, CacheMode::Use) {
            CacheLookup::Hit(entry) => {
                assert_eq!(*entry.panel, *committed.panel);
                assert!(entry.panel.missing.contains_key("ZZZ"));
            }
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(cache.status().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_file_is_quarantined_and_missed() {
        let dir = tempfile::tempdir().unwrap();
        let spec = PanelSpec::new(Frequency::Daily, 30);
        let mut cache = SelectionCache::new(ParquetPanelStore::new(dir.path()));
        let key = cache.commit(&universe(), panel(spec)).unwrap().meta.key;

        let data = dir.path().join("sel").join(format!("{key}.parquet"));
        fs::write(&data, b"not parquet").unwrap();

        assert!(matches!(
            cache.lookup(&universe(), spec, CacheMode::Use),
            CacheLookup::Miss(MissReason::Corrupt(_))
        ));
        assert!(!data.exists());
        assert!(dir
            .path()
            .join("sel")
            .join(format!("{key}.parquet.quarantined"))
            .exists());
        // once quarantined, the next lookup is a plain miss
        assert!(matches!(
            cache.lookup(&universe(), spec, CacheMode::Use),
            CacheLookup::Miss(MissReason::Absent)
        ));
    }

    #[test]
    fn remove_deletes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let spec = PanelSpec::new(Frequency::Daily, 30);
        let mut cache = SelectionCache::new(ParquetPanelStore::new(dir.path()));
        let key = cache.commit(&universe(), panel(spec)).unwrap().meta.key;
        assert!(cache.invalidate(&key).unwrap());
        assert!(cache.status().unwrap().is_empty());
        assert!(fs::read_dir(dir.path().join("sel")).unwrap().next().is_none());
    }
}
