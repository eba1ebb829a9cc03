//! Batch orchestration: pivot detection runs and candidate screening runs.
//!
//! Both runs follow the same shape:
//! 1. resolve the universe (sorted, de-duplicated, capped to the first N)
//! 2. fetch the bar panel through the selection-set cache, loading misses
//! 3. fan out one pure task per symbol on a bounded rayon pool
//! 4. commit the freshly loaded panel to the cache (this thread only)
//! 5. persist results through the sink with bounded retries
//!
//! Per-symbol problems never fail the batch; they are reported per symbol.
//! A symbol that yields no records has its partition for `dt` cleared, so a
//! rerun never leaves an earlier run's rows behind. Only ranking conflicts
//! and persistence failures abort a commit.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use pivotlab_core::data::{
    BarPanel, BarSource, CacheLookup, CacheMode, PanelSpec, PanelStore, SelectionCache,
};
use pivotlab_core::domain::{
    validate_series, CandidatePool, Frequency, PivotPoint, SelectionSet, SeriesError, StrategyType,
    Universe,
};
use pivotlab_core::pivot::{
    DetectionMethod, DetectorConfig, InitialDirection, PivotAnalysis, Sensitivity,
};

use crate::config::{ConfigError, PivotSettings, ScreenSettings};
use crate::ranker::{rank_candidates, RankingError, ScoredSymbol};
use crate::retry::RetryPolicy;
use crate::screen::{Exclusion, Screen, ScreenVerdict, StockInfo};
use crate::sink::{RecordSink, SinkError};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("no symbols to process in universe '{0}'")]
    NoSymbols(String),

    #[error("cannot build worker pool: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ranking(#[from] RankingError),

    #[error("{what} failed after {attempts} attempts: {source}")]
    Persistence {
        what: String,
        attempts: u32,
        #[source]
        source: SinkError,
    },

    /// The pool partition was written; only its selection set was not.
    #[error(
        "candidate pool for {dt} committed ({candidates} rows) but selection '{name}' \
         failed after {attempts} attempts: {source}"
    )]
    SelectionPersistence {
        name: String,
        dt: NaiveDate,
        candidates: usize,
        attempts: u32,
        #[source]
        source: SinkError,
    },

    #[error(transparent)]
    Sink(#[from] SinkError),
}

// ─── Parameters ──────────────────────────────────────────────────────

/// Parameters of one pivot detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotRunParams {
    pub dt: NaiveDate,
    pub method: DetectionMethod,
    pub sensitivity: Sensitivity,
    pub frequency: Frequency,
    pub window_bars: usize,
    pub max_symbols: Option<usize>,
    pub clear_cache: bool,
    pub threads: Option<usize>,
    pub time_budget: Option<Duration>,
    pub initial_direction: InitialDirection,
    pub atr_period: usize,
    pub zscore_window: usize,
    pub retry: RetryPolicy,
}

impl PivotRunParams {
    pub fn new(dt: NaiveDate, sensitivity: Sensitivity, frequency: Frequency) -> Self {
        Self::from_settings(dt, &PivotSettings {
            sensitivity,
            frequency,
            ..PivotSettings::default()
        })
    }

    pub fn from_settings(dt: NaiveDate, settings: &PivotSettings) -> Self {
        Self {
            dt,
            method: settings.method,
            sensitivity: settings.sensitivity,
            frequency: settings.frequency,
            window_bars: settings.window_bars,
            max_symbols: settings.max_symbols,
            clear_cache: false,
            threads: settings.threads,
            time_budget: settings.time_budget(),
            initial_direction: settings.initial_direction,
            atr_period: settings.atr_period,
            zscore_window: settings.zscore_window,
            retry: RetryPolicy::default(),
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        let mut config = DetectorConfig::new(self.sensitivity, self.frequency)
            .with_initial_direction(self.initial_direction);
        config.atr_period = self.atr_period;
        config.zscore_window = self.zscore_window;
        config
    }

    pub fn panel_spec(&self) -> PanelSpec {
        PanelSpec::new(self.frequency, self.window_bars)
    }

    /// Content-addressed id: blake3 over the serialized parameters.
    pub fn run_id(&self) -> String {
        run_id("pivots", self)
    }
}

/// Parameters of one candidate screening run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRunParams {
    pub dt: NaiveDate,
    pub strategies: Vec<StrategyType>,
    /// Bars loaded per symbol for metrics and entry signals; 0 loads all.
    pub history_bars: usize,
    pub max_symbols: Option<usize>,
    pub clear_cache: bool,
    pub threads: Option<usize>,
    pub time_budget: Option<Duration>,
    pub retry: RetryPolicy,
}

impl CandidateRunParams {
    pub fn new(dt: NaiveDate) -> Self {
        Self {
            dt,
            strategies: StrategyType::ALL.to_vec(),
            history_bars: 0,
            max_symbols: None,
            clear_cache: false,
            threads: None,
            time_budget: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn run_id(&self) -> String {
        run_id("candidates", self)
    }

    fn panel_spec(&self, frequency: Frequency, window_bars: usize) -> PanelSpec {
        let bars = if self.history_bars == 0 {
            0
        } else {
            self.history_bars.max(window_bars)
        };
        PanelSpec::new(frequency, bars)
    }
}

fn run_id<T: Serialize>(kind: &str, params: &T) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_bytes());
    hasher.update(&serde_json::to_vec(params).unwrap_or_default());
    hasher.finalize().to_hex()[..16].to_string()
}

// ─── Reports ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The batch's wall-clock budget ran out before the task started.
    BudgetExhausted,
}

/// What happened to one symbol in a pivot run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SymbolOutcome {
    Detected {
        raw: usize,
        filtered: usize,
        analysis: PivotAnalysis,
    },
    InsufficientData { detail: String },
    Malformed { detail: String },
    Skipped { reason: SkipReason },
    PersistenceFailed { attempts: u32, error: String },
}

impl SymbolOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SymbolOutcome::Detected { .. } => "detected",
            SymbolOutcome::InsufficientData { .. } => "insufficient_data",
            SymbolOutcome::Malformed { .. } => "malformed",
            SymbolOutcome::Skipped { .. } => "skipped",
            SymbolOutcome::PersistenceFailed { .. } => "persistence_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReport {
    pub code: String,
    #[serde(flatten)]
    pub outcome: SymbolOutcome,
    /// An earlier run's partition for this `dt` was removed because this run
    /// produced no records for the symbol.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale_cleared: bool,
}

/// How the batch obtained its bar panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelReport {
    pub cache_key: String,
    pub hit: bool,
    /// Miss reason, when the panel was loaded from the source.
    pub miss_reason: Option<String>,
    /// Cache write failure after a miss; the run itself is unaffected.
    pub commit_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotBatchReport {
    pub run_id: String,
    pub dt: NaiveDate,
    pub method: DetectionMethod,
    pub sensitivity: Sensitivity,
    pub frequency: Frequency,
    pub universe: String,
    pub panel: PanelReport,
    /// One entry per processed symbol, in code order.
    pub symbols: Vec<SymbolReport>,
    pub records_written: usize,
    pub elapsed_ms: u64,
}

impl PivotBatchReport {
    pub fn detected(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::Detected { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| !matches!(o, SymbolOutcome::Detected { .. }))
    }

    /// Symbols whose stale partition was removed.
    pub fn cleared(&self) -> usize {
        self.symbols.iter().filter(|s| s.stale_cleared).count()
    }

    pub fn outcome(&self, code: &str) -> Option<&SymbolOutcome> {
        self.symbols.iter().find(|s| s.code == code).map(|s| &s.outcome)
    }

    fn count(&self, pred: impl Fn(&SymbolOutcome) -> bool) -> usize {
        self.symbols.iter().filter(|s| pred(&s.outcome)).count()
    }
}

/// What happened to one symbol in one strategy's screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScreenOutcome {
    Passed { score: f64 },
    Excluded { reason: Exclusion },
    InsufficientData { detail: String },
    Rejected { volatility: f64, sharpe_ratio: f64 },
    Malformed { detail: String },
    Skipped { reason: SkipReason },
}

/// Commit outcome of one strategy's pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PoolOutcome {
    Committed { candidates: usize },
    RankingConflict { error: String },
    /// Nothing was written.
    PersistenceFailed { error: String },
    /// The pool was written but its selection set was not.
    SelectionFailed { candidates: usize, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyReport {
    pub strategy_type: StrategyType,
    pub panel: PanelReport,
    pub symbols: BTreeMap<String, ScreenOutcome>,
    pub pool: PoolOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateBatchReport {
    pub run_id: String,
    pub dt: NaiveDate,
    pub universe: String,
    pub strategies: Vec<StrategyReport>,
    pub elapsed_ms: u64,
}

impl CandidateBatchReport {
    pub fn strategy(&self, strategy_type: StrategyType) -> Option<&StrategyReport> {
        self.strategies.iter().find(|s| s.strategy_type == strategy_type)
    }
}

// ─── Shared plumbing ─────────────────────────────────────────────────

fn build_pool(threads: Option<usize>) -> Result<rayon::ThreadPool, RunError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.unwrap_or(0))
        .build()
        .map_err(|e| RunError::ThreadPool(e.to_string()))
}

/// A panel obtained for a run. `fresh` panels were loaded from the source
/// and still need committing to the cache.
struct AcquiredPanel {
    panel: Arc<BarPanel>,
    fresh: bool,
    report: PanelReport,
}

fn acquire_panel<S: PanelStore>(
    universe: &Universe,
    spec: PanelSpec,
    clear_cache: bool,
    source: &dyn BarSource,
    cache: &SelectionCache<S>,
    pool: &rayon::ThreadPool,
) -> AcquiredPanel {
    let key = cache.key_for(universe, spec);
    match cache.lookup(universe, spec, CacheMode::from_clear_flag(clear_cache)) {
        CacheLookup::Hit(entry) => {
            info!(%key, universe = universe.label(), "bar panel served from cache");
            AcquiredPanel {
                panel: entry.panel,
                fresh: false,
                report: PanelReport {
                    cache_key: key.to_string(),
                    hit: true,
                    miss_reason: None,
                    commit_error: None,
                },
            }
        }
        CacheLookup::Miss(reason) => {
            info!(%key, %reason, source = source.name(), "loading bar panel");
            let codes = universe.resolve(None);
            let loaded: Vec<_> = pool.install(|| {
                codes
                    .par_iter()
                    .map(|code| source.load(code, spec.frequency, spec.window_bars))
                    .collect()
            });
            let mut panel = BarPanel::new(spec);
            for (code, result) in codes.iter().zip(loaded) {
                panel.record(code, result);
            }
            AcquiredPanel {
                panel: Arc::new(panel),
                fresh: true,
                report: PanelReport {
                    cache_key: key.to_string(),
                    hit: false,
                    miss_reason: Some(reason.to_string()),
                    commit_error: None,
                },
            }
        }
    }
}

/// Commit a freshly loaded panel once every task reading it has finished.
fn commit_panel<S: PanelStore>(
    cache: &mut SelectionCache<S>,
    universe: &Universe,
    acquired: AcquiredPanel,
) -> PanelReport {
    let mut report = acquired.report;
    if !acquired.fresh {
        return report;
    }
    let panel = Arc::try_unwrap(acquired.panel).unwrap_or_else(|shared| (*shared).clone());
    if let Err(e) = cache.commit(universe, panel) {
        warn!(key = %report.cache_key, error = %e, "cache commit failed");
        report.commit_error = Some(e.to_string());
    }
    report
}

fn past_deadline(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn resolve_universe(universe: &Universe, max_symbols: Option<usize>) -> Result<Universe, RunError> {
    let codes = universe.resolve(max_symbols);
    if codes.is_empty() {
        return Err(RunError::NoSymbols(universe.label().to_string()));
    }
    Ok(universe.restricted(codes))
}

// ─── Pivot batch ─────────────────────────────────────────────────────

enum Detection {
    Done {
        records: Vec<PivotPoint>,
        raw: usize,
        filtered: usize,
        analysis: PivotAnalysis,
    },
    Failed(SymbolOutcome),
}

fn detect_symbol(
    code: &str,
    panel: &BarPanel,
    params: &PivotRunParams,
    config: &DetectorConfig,
) -> Detection {
    let Some(bars) = panel.get(code) else {
        let reason = panel
            .missing
            .get(code)
            .map(String::as_str)
            .unwrap_or("not loaded");
        return Detection::Failed(SymbolOutcome::InsufficientData {
            detail: format!("no bars: {reason}"),
        });
    };
    if let Err(e) = validate_series(code, bars) {
        return Detection::Failed(SymbolOutcome::Malformed { detail: e.to_string() });
    }
    let required = config.preset.min_series_len().max(2);
    if bars.len() < required {
        return Detection::Failed(SymbolOutcome::InsufficientData {
            detail: SeriesError::InsufficientData {
                code: code.to_string(),
                bars: bars.len(),
                required,
            }
            .to_string(),
        });
    }
    match params.method.detect(bars, config) {
        Ok(traces) => Detection::Done {
            raw: traces.raw.len(),
            filtered: traces.filtered.len(),
            analysis: PivotAnalysis::compute(bars, &traces, params.frequency),
            records: traces.to_records(params.dt, code, config),
        },
        Err(e @ SeriesError::InsufficientData { .. }) => {
            Detection::Failed(SymbolOutcome::InsufficientData { detail: e.to_string() })
        }
        Err(e @ SeriesError::MalformedSeries { .. }) => {
            Detection::Failed(SymbolOutcome::Malformed { detail: e.to_string() })
        }
    }
}

/// Detect pivots for every symbol of `universe` and persist them for
/// `params.dt`.
pub fn run_pivot_batch<S: PanelStore>(
    universe: &Universe,
    source: &dyn BarSource,
    cache: &mut SelectionCache<S>,
    sink: &dyn RecordSink,
    params: &PivotRunParams,
) -> Result<PivotBatchReport, RunError> {
    let start = Instant::now();
    let deadline = params.time_budget.map(|b| start + b);
    let run_id = params.run_id();
    let universe = resolve_universe(universe, params.max_symbols)?;
    let codes = universe.resolve(None);
    let config = params.detector_config();
    let pool = build_pool(params.threads)?;

    info!(
        %run_id,
        dt = %params.dt,
        universe = universe.label(),
        symbols = codes.len(),
        method = %params.method,
        sensitivity = %params.sensitivity,
        frequency = %params.frequency,
        "pivot batch started"
    );

    let acquired = acquire_panel(
        &universe,
        params.panel_spec(),
        params.clear_cache,
        source,
        cache,
        &pool,
    );
    let panel = Arc::clone(&acquired.panel);
    let detections: Vec<Detection> = pool.install(|| {
        codes
            .par_iter()
            .map(|code| {
                if past_deadline(deadline) {
                    return Detection::Failed(SymbolOutcome::Skipped {
                        reason: SkipReason::BudgetExhausted,
                    });
                }
                let d = detect_symbol(code, &panel, params, &config);
                if let Detection::Done { raw, filtered, .. } = &d {
                    debug!(code = code.as_str(), raw, filtered, "pivots detected");
                }
                d
            })
            .collect()
    });
    drop(panel);
    let panel_report = commit_panel(cache, &universe, acquired);

    let mut symbols = Vec::with_capacity(codes.len());
    let mut records_written = 0;
    for (code, detection) in codes.iter().zip(detections) {
        let mut stale_cleared = false;
        let outcome = match detection {
            Detection::Done {
                records,
                raw,
                filtered,
                analysis,
            } => {
                let what = format!("pivots {code} {} {}", params.frequency, params.dt);
                match params.retry.run(&what, || {
                    sink.commit_pivots(params.dt, code, params.frequency, &records)
                }) {
                    Ok(()) => {
                        records_written += records.len();
                        SymbolOutcome::Detected {
                            raw,
                            filtered,
                            analysis,
                        }
                    }
                    Err(exhausted) => {
                        warn!(
                            code = code.as_str(),
                            attempts = exhausted.attempts,
                            error = %exhausted.last_error,
                            "pivot commit failed"
                        );
                        SymbolOutcome::PersistenceFailed {
                            attempts: exhausted.attempts,
                            error: exhausted.last_error.to_string(),
                        }
                    }
                }
            }
            Detection::Failed(outcome) => {
                warn!(code = code.as_str(), ?outcome, "symbol skipped");
                let what = format!("clear pivots {code} {} {}", params.frequency, params.dt);
                match params.retry.run(&what, || {
                    sink.clear_pivots(params.dt, code, params.frequency)
                }) {
                    Ok(existed) => {
                        if existed {
                            info!(code = code.as_str(), dt = %params.dt, "stale pivot partition cleared");
                        }
                        stale_cleared = existed;
                        outcome
                    }
                    Err(exhausted) => {
                        warn!(
                            code = code.as_str(),
                            attempts = exhausted.attempts,
                            error = %exhausted.last_error,
                            "stale pivot partition not cleared"
                        );
                        SymbolOutcome::PersistenceFailed {
                            attempts: exhausted.attempts,
                            error: format!(
                                "{} symbol, clearing its partition failed: {}",
                                outcome.label(),
                                exhausted.last_error
                            ),
                        }
                    }
                }
            }
        };
        symbols.push(SymbolReport {
            code: code.clone(),
            outcome,
            stale_cleared,
        });
    }

    let report = PivotBatchReport {
        run_id,
        dt: params.dt,
        method: params.method,
        sensitivity: params.sensitivity,
        frequency: params.frequency,
        universe: universe.label().to_string(),
        panel: panel_report,
        symbols,
        records_written,
        elapsed_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        run_id = %report.run_id,
        detected = report.detected(),
        failed = report.failed(),
        cleared = report.cleared(),
        records = report.records_written,
        elapsed_ms = report.elapsed_ms,
        "pivot batch finished"
    );
    Ok(report)
}

// ─── Candidate batch ─────────────────────────────────────────────────

/// Rank one strategy's scores and commit the pool, then its selection set.
///
/// Nothing is written when ranking fails. Each commit is retried as a whole.
/// A pool commit failure is [`RunError::Persistence`]; a selection failure
/// after the pool landed is [`RunError::SelectionPersistence`].
pub fn rank_and_commit(
    dt: NaiveDate,
    strategy_type: StrategyType,
    scored: Vec<ScoredSymbol>,
    sink: &dyn RecordSink,
    retry: &RetryPolicy,
) -> Result<CandidatePool, RunError> {
    let pool = rank_candidates(dt, strategy_type, scored)?;

    let what = format!("candidates {strategy_type} {dt}");
    retry
        .run(&what, || sink.commit_candidates(&pool))
        .map_err(|e| RunError::Persistence {
            what,
            attempts: e.attempts,
            source: e.last_error,
        })?;

    let selection = SelectionSet::from_pool(&pool);
    let what = format!("selection {} {dt}", selection.name);
    retry
        .run(&what, || sink.commit_selection(&selection))
        .map_err(|e| RunError::SelectionPersistence {
            name: selection.name.clone(),
            dt,
            candidates: pool.len(),
            attempts: e.attempts,
            source: e.last_error,
        })?;
    Ok(pool)
}

fn screen_outcome(result: Result<ScreenVerdict, SeriesError>) -> (ScreenOutcome, Option<ScoredSymbol>) {
    match result {
        Ok(ScreenVerdict::Passed(scored)) => {
            let score = scored.score.unwrap_or(f64::NAN);
            (ScreenOutcome::Passed { score }, Some(*scored))
        }
        Ok(ScreenVerdict::Excluded(reason)) => (ScreenOutcome::Excluded { reason }, None),
        Ok(ScreenVerdict::InsufficientData { bars, required }) => (
            ScreenOutcome::InsufficientData {
                detail: format!("{bars} bars, need at least {required}"),
            },
            None,
        ),
        Ok(ScreenVerdict::Rejected(m)) => (
            ScreenOutcome::Rejected {
                volatility: m.volatility,
                sharpe_ratio: m.sharpe_ratio,
            },
            None,
        ),
        Err(e) => (ScreenOutcome::Malformed { detail: e.to_string() }, None),
    }
}

/// Screen, rank and persist every requested strategy for `params.dt`.
///
/// `info` supplies descriptive fields; symbols without an entry are
/// screened under their code.
pub fn run_candidate_batch<S: PanelStore>(
    universe: &Universe,
    info: &BTreeMap<String, StockInfo>,
    source: &dyn BarSource,
    cache: &mut SelectionCache<S>,
    sink: &dyn RecordSink,
    screens: &ScreenSettings,
    params: &CandidateRunParams,
) -> Result<CandidateBatchReport, RunError> {
    let start = Instant::now();
    let deadline = params.time_budget.map(|b| start + b);
    let run_id = params.run_id();
    let universe = resolve_universe(universe, params.max_symbols)?;
    let codes = universe.resolve(None);
    let pool = build_pool(params.threads)?;
    info!(
        %run_id,
        dt = %params.dt,
        universe = universe.label(),
        symbols = codes.len(),
        "candidate batch started"
    );

    let mut strategies = Vec::with_capacity(params.strategies.len());
    for &strategy_type in &params.strategies {
        let screen = Screen::new(strategy_type, screens);
        let spec = params.panel_spec(screen.rule.frequency, screen.rule.window_bars);
        let acquired = acquire_panel(&universe, spec, params.clear_cache, source, cache, &pool);

        let panel = Arc::clone(&acquired.panel);
        let results: Vec<(ScreenOutcome, Option<ScoredSymbol>)> = pool.install(|| {
            codes
                .par_iter()
                .map(|code| {
                    if past_deadline(deadline) {
                        let reason = SkipReason::BudgetExhausted;
                        return (ScreenOutcome::Skipped { reason }, None);
                    }
                    let Some(bars) = panel.get(code) else {
                        let detail = panel
                            .missing
                            .get(code)
                            .cloned()
                            .unwrap_or_else(|| "not loaded".into());
                        return (ScreenOutcome::InsufficientData { detail }, None);
                    };
                    let stock = info
                        .get(code)
                        .cloned()
                        .unwrap_or_else(|| StockInfo::unknown(code));
                    screen_outcome(screen.evaluate(params.dt, &stock, bars))
                })
                .collect()
        });
        drop(panel);
        let panel_report = commit_panel(cache, &universe, acquired);

        let mut symbols = BTreeMap::new();
        let mut scored = Vec::new();
        for (code, (outcome, passed)) in codes.iter().zip(results) {
            if let ScreenOutcome::Malformed { detail } = &outcome {
                warn!(code = code.as_str(), strategy = %strategy_type, %detail, "malformed series");
            }
            symbols.insert(code.clone(), outcome);
            scored.extend(passed);
        }

        let pool_outcome = match rank_and_commit(params.dt, strategy_type, scored, sink, &params.retry) {
            Ok(committed) => {
                info!(strategy = %strategy_type, candidates = committed.len(), "candidate pool committed");
                PoolOutcome::Committed {
                    candidates: committed.len(),
                }
            }
            Err(RunError::Ranking(e)) => {
                warn!(strategy = %strategy_type, error = %e, "ranking conflict, pool not committed");
                PoolOutcome::RankingConflict { error: e.to_string() }
            }
            Err(e) => {
                let error = e.to_string();
                match e {
                    RunError::SelectionPersistence { candidates, .. } => {
                        warn!(strategy = %strategy_type, %error, "selection set not persisted");
                        PoolOutcome::SelectionFailed { candidates, error }
                    }
                    _ => {
                        warn!(strategy = %strategy_type, %error, "candidate pool not persisted");
                        PoolOutcome::PersistenceFailed { error }
                    }
                }
            }
        };

        strategies.push(StrategyReport {
            strategy_type,
            panel: panel_report,
            symbols,
            pool: pool_outcome,
        });
    }

    let report = CandidateBatchReport {
        run_id,
        dt: params.dt,
        universe: universe.label().to_string(),
        strategies,
        elapsed_ms: start.elapsed().as_millis() as u64,
    };
    info!(run_id = %report.run_id, elapsed_ms = report.elapsed_ms, "candidate batch finished");
    Ok(report)
}

/// Universe for a downstream stage: the latest persisted selection set
/// called `name`, optionally cut to its best `top` codes.
pub fn universe_from_selection(
    sink: &dyn RecordSink,
    name: &str,
    top: Option<usize>,
) -> Result<Option<Universe>, RunError> {
    let Some(set) = sink.latest_selection(name)? else {
        return Ok(None);
    };
    let set = match top {
        Some(n) => set.top(n),
        None => set,
    };
    debug!(name, dt = %set.dt, codes = set.codes.len(), "selection loaded");
    Ok(Some(set.into_universe()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_stable_and_parameter_sensitive() {
        let dt = NaiveDate::from_ymd_opt(2025, 3, 28).unwrap();
        let a = PivotRunParams::new(dt, Sensitivity::Balanced, Frequency::Weekly);
        let b = a.clone();
        assert_eq!(a.run_id(), b.run_id());
        assert_eq!(a.run_id().len(), 16);

        let mut c = a.clone();
        c.sensitivity = Sensitivity::Aggressive;
        assert_ne!(a.run_id(), c.run_id());
        assert_ne!(a.run_id(), CandidateRunParams::new(dt).run_id());
    }

    #[test]
    fn candidate_history_never_undercuts_the_screen_window() {
        let mut params = CandidateRunParams::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(params.panel_spec(Frequency::Weekly, 52).window_bars, 0);
        params.history_bars = 30;
        assert_eq!(params.panel_spec(Frequency::Weekly, 52).window_bars, 52);
        params.history_bars = 400;
        assert_eq!(params.panel_spec(Frequency::Daily, 120).window_bars, 400);
    }

    #[test]
    fn params_from_settings_carry_detector_overrides() {
        let settings = PivotSettings {
            atr_period: 10,
            zscore_window: 30,
            ..PivotSettings::default()
        };
        let params = PivotRunParams::from_settings(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), &settings);
        let config = params.detector_config();
        assert_eq!((config.atr_period, config.zscore_window), (10, 30));
    }
}
