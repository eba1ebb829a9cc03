//! Selection-set cache for bar panels.
//!
//! Keys are content-addressed: blake3 over the sorted, de-duplicated codes,
//! the frequency and the window. The full universe lives in its own `all`
//! namespace and bounded selections in `sel`, so a shortlist panel can never
//! be served as full coverage.
//!
//! An entry is a hit when it exists, matches the requested codes and spec,
//! and is younger than the TTL (24 hours by default). Everything else is a
//! miss the caller recomputes. Corrupt entries are misses too.
//!
//! Readers call `lookup(&self)`; only the orchestrating stage holds the
//! `&mut` needed to `commit`, so a key has a single writer.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::Universe;

use super::panel::{BarPanel, PanelSpec};
use super::store::{CacheError, PanelStore};

pub const DEFAULT_TTL_HOURS: i64 = 24;

const DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    All,
    Selection,
}

impl Namespace {
    pub fn of(universe: &Universe) -> Self {
        if universe.is_full() {
            Namespace::All
        } else {
            Namespace::Selection
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::All => "all",
            Namespace::Selection => "sel",
        }
    }
}

/// `"{namespace}-{digest}"`, e.g. `sel-3f9a…`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(universe: &Universe, spec: PanelSpec) -> Self {
        let namespace = Namespace::of(universe);
        let mut hasher = blake3::Hasher::new();
        hasher.update(namespace.as_str().as_bytes());
        for code in universe.resolve(None) {
            hasher.update(&(code.len() as u64).to_le_bytes());
            hasher.update(code.as_bytes());
        }
        hasher.update(spec.frequency.as_str().as_bytes());
        hasher.update(&(spec.window_bars as u64).to_le_bytes());
        let hex = hasher.finalize().to_hex();
        CacheKey(format!("{}-{}", namespace.as_str(), &hex[..DIGEST_LEN]))
    }

    /// Rebuild a key from its string form, e.g. a file stem.
    pub fn parse(s: &str) -> Option<Self> {
        let (ns, digest) = s.split_once('-')?;
        let valid_ns = ns == Namespace::All.as_str() || ns == Namespace::Selection.as_str();
        let valid_digest =
            digest.len() == DIGEST_LEN && digest.chars().all(|c| c.is_ascii_hexdigit());
        (valid_ns && valid_digest).then(|| CacheKey(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> Namespace {
        if self.0.starts_with(Namespace::All.as_str()) {
            Namespace::All
        } else {
            Namespace::Selection
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a stored panel claims to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub key: CacheKey,
    pub namespace: Namespace,
    pub label: String,
    pub codes: Vec<String>,
    pub spec: PanelSpec,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
    pub bar_count: usize,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub meta: EntryMeta,
    pub panel: Arc<BarPanel>,
}

/// Time source, injectable for TTL tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Serve fresh entries.
    #[default]
    Use,
    /// Treat every lookup as a miss; the recomputed panel overwrites the entry.
    Refresh,
}

impl CacheMode {
    pub fn from_clear_flag(clear_cache: bool) -> Self {
        if clear_cache {
            CacheMode::Refresh
        } else {
            CacheMode::Use
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MissReason {
    Absent,
    Refresh,
    Expired { age_secs: i64 },
    Corrupt(String),
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissReason::Absent => f.write_str("absent"),
            MissReason::Refresh => f.write_str("refresh requested"),
            MissReason::Expired { age_secs } => write!(f, "expired ({age_secs}s old)"),
            MissReason::Corrupt(reason) => write!(f, "corrupt: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss(MissReason),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// One row of `SelectionCache::status`.
#[derive(Debug, Clone, Serialize)]
pub struct EntryStatus {
    pub meta: EntryMeta,
    pub age_secs: i64,
    pub fresh: bool,
}

pub struct SelectionCache<S: PanelStore> {
    store: S,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<S: PanelStore> SelectionCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn key_for(&self, universe: &Universe, spec: PanelSpec) -> CacheKey {
        CacheKey::derive(universe, spec)
    }

    pub fn lookup(&self, universe: &Universe, spec: PanelSpec, mode: CacheMode) -> CacheLookup {
        let key = self.key_for(universe, spec);
        if mode == CacheMode::Refresh {
            debug!(%key, "cache refresh requested");
            return CacheLookup::Miss(MissReason::Refresh);
        }

        let entry = match self.store.load(&key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return CacheLookup::Miss(MissReason::Absent),
            Err(e) => {
                warn!(%key, error = %e, "unreadable cache entry, recomputing");
                return CacheLookup::Miss(MissReason::Corrupt(e.to_string()));
            }
        };

        let codes = universe.resolve(None);
        if entry.meta.codes != codes || entry.meta.spec != spec || entry.meta.key != key {
            warn!(%key, "cache entry does not match its key, recomputing");
            return CacheLookup::Miss(MissReason::Corrupt("entry does not match key".into()));
        }

        let age = self.clock.now() - entry.meta.created_at;
        if age >= self.ttl {
            debug!(%key, age_secs = age.num_seconds(), "cache entry expired");
            return CacheLookup::Miss(MissReason::Expired {
                age_secs: age.num_seconds(),
            });
        }

        debug!(%key, "cache hit");
        CacheLookup::Hit(entry)
    }

    /// Store a freshly built panel under the universe's key, replacing any
    /// previous entry.
    pub fn commit(&mut self, universe: &Universe, panel: BarPanel) -> Result<CacheEntry, CacheError> {
        let key = self.key_for(universe, panel.spec);
        let meta = EntryMeta {
            namespace: key.namespace(),
            key,
            label: universe.label().to_string(),
            codes: universe.resolve(None),
            spec: panel.spec,
            created_at: self.clock.now(),
            content_hash: panel.content_hash(),
            bar_count: panel.bar_count(),
        };
        let entry = CacheEntry {
            meta,
            panel: Arc::new(panel),
        };
        self.store.save(&entry)?;
        debug!(key = %entry.meta.key, bars = entry.meta.bar_count, "cache entry committed");
        Ok(entry)
    }

    pub fn invalidate(&mut self, key: &CacheKey) -> Result<bool, CacheError> {
        self.store.remove(key)
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&mut self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for meta in self.store.entries()? {
            if self.store.remove(&meta.key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn status(&self) -> Result<Vec<EntryStatus>, CacheError> {
        let now = self.clock.now();
        Ok(self
            .store
            .entries()?
            .into_iter()
            .map(|meta| {
                let age = now - meta.created_at;
                EntryStatus {
                    age_secs: age.num_seconds(),
                    fresh: age < self.ttl,
                    meta,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::source::MemoryBarSource;
    use crate::data::store::MemoryPanelStore;
    use crate::data::synthetic::SyntheticBarSource;
    use crate::domain::Frequency;
    use chrono::{NaiveDate, TimeZone};

    const CODES: [&str; 8] = ["A01", "A02", "A03", "A04", "A05", "A06", "A07", "A08"];

    fn source() -> MemoryBarSource {
        let synth = SyntheticBarSource::new(NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(), 80);
        CODES
            .iter()
            .fold(MemoryBarSource::new(), |src, c| src.with(synth.generate(c)))
    }

    fn spec() -> PanelSpec {
        PanelSpec::new(Frequency::Daily, 60)
    }

    fn panel_for(universe: &Universe) -> BarPanel {
        BarPanel::load(&source(), &universe.resolve(None), spec())
    }

    fn cache_with_clock() -> (SelectionCache<MemoryPanelStore>, Arc<ManualClock>) {
        let start = Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let cache = SelectionCache::new(MemoryPanelStore::new()).with_clock(clock.clone());
        (cache, clock)
    }

    #[test]
    fn key_ignores_order_and_duplicates() {
        let a = Universe::selection("x", ["B", "A", "C"]);
        let b = Universe::selection("y", ["C", "A", "B", "A"]);
        assert_eq!(CacheKey::derive(&a, spec()), CacheKey::derive(&b, spec()));
    }

    #[test]
    fn key_separates_namespace_frequency_and_window() {
        let sel = Universe::selection("x", CODES);
        let all = Universe::all(CODES);
        let k = CacheKey::derive(&sel, spec());
        assert!(k.as_str().starts_with("sel-"));
        assert!(CacheKey::derive(&all, spec()).as_str().starts_with("all-"));
        assert_ne!(k, CacheKey::derive(&all, spec()));
        assert_ne!(k, CacheKey::derive(&sel, PanelSpec::new(Frequency::Weekly, 60)));
        assert_ne!(k, CacheKey::derive(&sel, PanelSpec::new(Frequency::Daily, 61)));
        assert_eq!(CacheKey::parse(k.as_str()), Some(k.clone()));
        assert_eq!(CacheKey::parse("nope"), None);
    }

    #[test]
    fn commit_then_hit() {
        let (mut cache, _) = cache_with_clock();
        let u = Universe::selection("top", CODES[..3].iter().copied());
        assert!(matches!(cache.lookup(&u, spec(), CacheMode::Use), CacheLookup::Miss(MissReason::Absent)));

        cache.commit(&u, panel_for(&u)).unwrap();
        match cache.lookup(&u, spec(), CacheMode::Use) {
            CacheLookup::Hit(entry) => {
                assert_eq!(entry.meta.codes, vec!["A01", "A02", "A03"]);
                assert_eq!(entry.panel.series.len(), 3);
            }
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn entries_expire_after_ttl() {
        let (mut cache, clock) = cache_with_clock();
        let u = Universe::all(CODES);
        cache.commit(&u, panel_for(&u)).unwrap();

        clock.advance(Duration::hours(23));
        assert!(cache.lookup(&u, spec(), CacheMode::Use).is_hit());

        clock.advance(Duration::hours(1));
        assert!(matches!(
            cache.lookup(&u, spec(), CacheMode::Use),
            CacheLookup::Miss(MissReason::Expired { .. })
        ));
    }

    #[test]
    fn injectable_ttl() {
        let (cache, clock) = cache_with_clock();
        let mut cache = cache.with_ttl(Duration::minutes(5));
        let u = Universe::all(CODES);
        cache.commit(&u, panel_for(&u)).unwrap();
        clock.advance(Duration::minutes(6));
        assert!(!cache.lookup(&u, spec(), CacheMode::Use).is_hit());
    }

    #[test]
    fn refresh_forces_miss_regardless_of_age() {
        let (mut cache, _) = cache_with_clock();
        let u = Universe::all(CODES);
        cache.commit(&u, panel_for(&u)).unwrap();
        assert!(matches!(
            cache.lookup(&u, spec(), CacheMode::from_clear_flag(true)),
            CacheLookup::Miss(MissReason::Refresh)
        ));
    }

    #[test]
    fn selection_commit_leaves_full_universe_untouched() {
        let (mut cache, _) = cache_with_clock();
        let all = Universe::all(CODES);
        let full = cache.commit(&all, panel_for(&all)).unwrap();

        let top5 = Universe::selection("top5", CODES[..5].iter().copied());
        cache.commit(&top5, panel_for(&top5)).unwrap();

        match cache.lookup(&all, spec(), CacheMode::Use) {
            CacheLookup::Hit(entry) => {
                assert_eq!(entry.meta.codes.len(), CODES.len());
                assert_eq!(entry.meta.content_hash, full.meta.content_hash);
            }
            other => panic!("expected full-universe hit, got {other:?}"),
        }
        let status = cache.status().unwrap();
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| s.fresh));
    }

    #[test]
    fn same_codes_as_selection_do_not_count_as_full() {
        let (mut cache, _) = cache_with_clock();
        let sel = Universe::selection("everything", CODES);
        cache.commit(&sel, panel_for(&sel)).unwrap();
        assert!(!cache.lookup(&Universe::all(CODES), spec(), CacheMode::Use).is_hit());
    }

    #[test]
    fn invalidate_and_clear() {
        let (mut cache, _) = cache_with_clock();
        let a = Universe::all(CODES);
        let b = Universe::selection("b", CODES[..2].iter().copied());
        cache.commit(&a, panel_for(&a)).unwrap();
        cache.commit(&b, panel_for(&b)).unwrap();

        let key = cache.key_for(&b, spec());
        assert!(cache.invalidate(&key).unwrap());
        assert!(!cache.invalidate(&key).unwrap());
        assert!(cache.lookup(&a, spec(), CacheMode::Use).is_hit());

        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.status().unwrap().is_empty());
    }
}
