//! PivotLab Runner: batch orchestration on top of `pivotlab-core`.
//!
//! This crate provides:
//! - Pivot detection batches over a universe, with cached bar panels
//! - Long-term and short-term candidate screens with per-date ranking
//! - Record sinks (in-memory and JSONL on disk) with idempotent upserts
//! - Layered TOML settings and bounded commit retries

pub mod batch;
pub mod config;
pub mod jsonl_sink;
pub mod metrics;
pub mod ranker;
pub mod retry;
pub mod screen;
pub mod sink;

pub use batch::{
    rank_and_commit, run_candidate_batch, run_pivot_batch, universe_from_selection,
    CandidateBatchReport, CandidateRunParams, PanelReport, PivotBatchReport, PivotRunParams,
    PoolOutcome, RunError, ScreenOutcome, SkipReason, StrategyReport, SymbolOutcome, SymbolReport,
};
pub use config::{
    CacheSettings, ConfigError, PersistenceSettings, PivotSettings, ScreenRule, ScreenSettings,
    Settings, DEFAULT_CONFIG_FILE,
};
pub use jsonl_sink::JsonlSink;
pub use metrics::WindowMetrics;
pub use ranker::{rank_candidates, RankingError, ScoredSymbol};
pub use retry::{Backoff, Exhausted, RetryPolicy};
pub use screen::{Exclusion, Screen, ScreenVerdict, StockInfo};
pub use sink::{MemorySink, RecordSink, SinkError};
