//! PivotLab CLI: pivot detection, candidate screening, record queries, cache management.
//!
//! Commands:
//! - `pivots`: detect pivots for a universe and persist them for a result date
//! - `candidates`: screen, rank and persist the long/short-term candidate pools
//! - `latest pivots|candidates`: read back the most recent persisted records
//! - `cache status`: list cached bar panels with age and freshness
//! - `cache clear`: drop one cached panel, or all of them

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pivotlab_core::data::{
    BarSource, CacheKey, CsvBarSource, ParquetPanelStore, SelectionCache, SyntheticBarSource,
    UniverseFile,
};
use pivotlab_core::domain::{Frequency, StrategyType, Universe};
use pivotlab_core::pivot::{DetectionMethod, InitialDirection, Sensitivity};
use pivotlab_runner::{
    run_candidate_batch, run_pivot_batch, universe_from_selection, CandidateBatchReport,
    CandidateRunParams, JsonlSink, PivotBatchReport, PivotRunParams, PoolOutcome, RecordSink,
    Settings, StockInfo, SymbolOutcome, DEFAULT_CONFIG_FILE,
};

#[derive(Parser)]
#[command(
    name = "pivotlab",
    about = "PivotLab CLI: ZigZag/ATR pivot detection and strategy candidate screening"
)]
struct Cli {
    /// Settings file. Missing files fall back to defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override `[persistence] dir` (where records are written).
    #[arg(long, global = true)]
    records_dir: Option<PathBuf>,

    /// Override `[cache] dir` (where bar panels are cached).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect pivots for every symbol in the universe.
    Pivots {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        batch: BatchArgs,

        /// conservative, balanced or aggressive.
        #[arg(long)]
        sensitivity: Option<Sensitivity>,

        /// daily or weekly.
        #[arg(long)]
        frequency: Option<Frequency>,

        /// Detection method (only zigzag_atr).
        #[arg(long)]
        method: Option<DetectionMethod>,

        /// Most recent bars per symbol; 0 loads everything.
        #[arg(long)]
        window_bars: Option<usize>,

        /// net_move, seek_high or seek_low.
        #[arg(long)]
        initial_direction: Option<InitialDirection>,
    },
    /// Screen, rank and persist candidate pools.
    Candidates {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        batch: BatchArgs,

        /// Strategy to screen (repeatable). Defaults to all.
        #[arg(long = "strategy")]
        strategies: Vec<StrategyType>,

        /// Bars loaded per symbol for entry signals; 0 loads everything.
        #[arg(long, default_value_t = 0)]
        history_bars: usize,
    },
    /// Read back the most recent persisted records.
    Latest {
        #[command(subcommand)]
        what: LatestCommand,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Where symbols and bars come from.
#[derive(Args)]
struct InputArgs {
    /// Result date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    dt: Option<NaiveDate>,

    /// Directory of `{code}.csv` bar files.
    #[arg(long, default_value = "data/bars")]
    data_dir: PathBuf,

    /// Universe TOML (symbols and named selections). Defaults to every CSV in --data-dir.
    #[arg(long)]
    universe: Option<PathBuf>,

    /// Named selection from the universe file.
    #[arg(long, conflicts_with = "from_selection")]
    selection: Option<String>,

    /// Use the latest persisted selection set with this name (e.g. long_term).
    #[arg(long)]
    from_selection: Option<String>,

    /// Keep only the best N codes of --from-selection.
    #[arg(long, requires = "from_selection")]
    top: Option<usize>,

    /// Explicit codes, run as an ad-hoc selection.
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["selection", "from_selection"])]
    codes: Vec<String>,

    /// Generate this many synthetic daily bars per symbol instead of reading CSV.
    #[arg(long)]
    synthetic: Option<usize>,
}

#[derive(Args)]
struct BatchArgs {
    /// Process only the first N codes (sorted).
    #[arg(long)]
    max_symbols: Option<usize>,

    /// Worker threads. Defaults to one per core.
    #[arg(long)]
    threads: Option<usize>,

    /// Stop scheduling symbols after this many seconds.
    #[arg(long)]
    time_budget_secs: Option<u64>,

    /// Ignore cached panels and reload bars.
    #[arg(long, default_value_t = false)]
    clear_cache: bool,

    /// Print the full report as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum LatestCommand {
    /// Pivots from the most recent run for one symbol.
    Pivots {
        code: String,

        #[arg(long, default_value = "weekly")]
        frequency: Frequency,

        /// Show only the significance-filtered trace.
        #[arg(long, default_value_t = false)]
        filtered: bool,
    },
    /// The most recent candidate pool for a strategy.
    Candidates {
        #[arg(long, default_value = "long_term")]
        strategy: StrategyType,

        /// A specific result date instead of the latest.
        #[arg(long)]
        dt: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached panels with age and freshness.
    Status,
    /// Remove cached panels.
    Clear {
        /// Remove only this key (as shown by `cache status`).
        #[arg(long)]
        key: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if let Some(dir) = cli.records_dir {
        settings.persistence.dir = dir;
    }
    if let Some(dir) = cli.cache_dir {
        settings.cache.dir = dir;
    }

    match cli.command {
        Commands::Pivots {
            input,
            batch,
            sensitivity,
            frequency,
            method,
            window_bars,
            initial_direction,
        } => {
            let pivot = &mut settings.pivot;
            if let Some(v) = sensitivity {
                pivot.sensitivity = v;
            }
            if let Some(v) = frequency {
                pivot.frequency = v;
            }
            if let Some(v) = method {
                pivot.method = v;
            }
            if let Some(v) = window_bars {
                pivot.window_bars = v;
            }
            if let Some(v) = initial_direction {
                pivot.initial_direction = v;
            }
            apply_batch_overrides(&mut settings, &batch);
            run_pivots_cmd(&settings, &input, &batch)
        }
        Commands::Candidates {
            input,
            batch,
            strategies,
            history_bars,
        } => {
            apply_batch_overrides(&mut settings, &batch);
            run_candidates_cmd(&settings, &input, &batch, strategies, history_bars)
        }
        Commands::Latest { what } => run_latest(&settings, what),
        Commands::Cache { action } => run_cache(&settings, action),
    }
}

fn apply_batch_overrides(settings: &mut Settings, batch: &BatchArgs) {
    if batch.max_symbols.is_some() {
        settings.pivot.max_symbols = batch.max_symbols;
    }
    if batch.threads.is_some() {
        settings.pivot.threads = batch.threads;
    }
    if batch.time_budget_secs.is_some() {
        settings.pivot.time_budget_secs = batch.time_budget_secs;
    }
}

/// Resolved inputs for one batch.
struct Inputs {
    dt: NaiveDate,
    universe: Universe,
    infos: BTreeMap<String, StockInfo>,
    source: Box<dyn BarSource>,
}

fn resolve_inputs(input: &InputArgs, sink: &dyn RecordSink) -> Result<Inputs> {
    let dt = input
        .dt
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    let file = match &input.universe {
        Some(path) => Some(
            UniverseFile::from_file(path)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("loading universe {}", path.display()))?,
        ),
        None => None,
    };

    let universe = if let Some(name) = &input.from_selection {
        match universe_from_selection(sink, name, input.top)? {
            Some(u) => u,
            None => bail!("no persisted selection set named '{name}' (run `pivotlab candidates` first)"),
        }
    } else if !input.codes.is_empty() {
        Universe::selection("adhoc", input.codes.iter().cloned())
    } else if let Some(file) = &file {
        match &input.selection {
            Some(name) => file.selection(name).with_context(|| {
                format!(
                    "selection '{name}' not in universe file (available: {})",
                    file.selection_names().join(", ")
                )
            })?,
            None => file.all(),
        }
    } else if input.synthetic.is_some() {
        bail!("--synthetic needs --universe or --codes to name its symbols");
    } else if input.selection.is_some() {
        bail!("--selection needs --universe");
    } else {
        let codes = CsvBarSource::new(&input.data_dir)
            .available_codes()
            .with_context(|| format!("listing bar files in {}", input.data_dir.display()))?;
        Universe::all(codes)
    };

    let infos = file
        .as_ref()
        .map(|f| {
            f.symbols
                .iter()
                .map(|s| (s.code.clone(), StockInfo::from(s)))
                .collect()
        })
        .unwrap_or_default();

    let source: Box<dyn BarSource> = match input.synthetic {
        Some(bars) => Box::new(SyntheticBarSource::new(dt, bars)),
        None => Box::new(CsvBarSource::new(&input.data_dir)),
    };

    Ok(Inputs {
        dt,
        universe,
        infos,
        source,
    })
}

fn open_cache(settings: &Settings) -> SelectionCache<ParquetPanelStore> {
    SelectionCache::new(ParquetPanelStore::new(&settings.cache.dir)).with_ttl(settings.cache.ttl())
}

fn run_pivots_cmd(settings: &Settings, input: &InputArgs, batch: &BatchArgs) -> Result<()> {
    settings.validate()?;
    let sink = JsonlSink::new(&settings.persistence.dir);
    let inputs = resolve_inputs(input, &sink)?;
    let mut cache = open_cache(settings);

    let mut params = PivotRunParams::from_settings(inputs.dt, &settings.pivot);
    params.clear_cache = batch.clear_cache;
    params.retry = settings.persistence.retry_policy();

    let report = run_pivot_batch(
        &inputs.universe,
        inputs.source.as_ref(),
        &mut cache,
        &sink,
        &params,
    )?;

    if batch.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_pivot_summary(&report);
    }
    info!(records_dir = %settings.persistence.dir.display(), "records written");
    Ok(())
}

fn run_candidates_cmd(
    settings: &Settings,
    input: &InputArgs,
    batch: &BatchArgs,
    strategies: Vec<StrategyType>,
    history_bars: usize,
) -> Result<()> {
    settings.validate()?;
    let sink = JsonlSink::new(&settings.persistence.dir);
    let inputs = resolve_inputs(input, &sink)?;
    let mut cache = open_cache(settings);

    let mut params = CandidateRunParams::new(inputs.dt);
    if !strategies.is_empty() {
        params.strategies = strategies;
    }
    params.history_bars = history_bars;
    params.max_symbols = settings.pivot.max_symbols;
    params.threads = settings.pivot.threads;
    params.time_budget = settings.pivot.time_budget_secs.map(Duration::from_secs);
    params.clear_cache = batch.clear_cache;
    params.retry = settings.persistence.retry_policy();

    let report = run_candidate_batch(
        &inputs.universe,
        &inputs.infos,
        inputs.source.as_ref(),
        &mut cache,
        &sink,
        &settings.screen,
        &params,
    )?;

    if batch.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_candidate_summary(&report);
    }
    Ok(())
}

fn run_latest(settings: &Settings, what: LatestCommand) -> Result<()> {
    let sink = JsonlSink::new(&settings.persistence.dir);
    match what {
        LatestCommand::Pivots {
            code,
            frequency,
            filtered,
        } => {
            let records = sink.latest_pivots(&code, frequency)?;
            if records.is_empty() {
                println!("No {frequency} pivots recorded for {code}.");
                return Ok(());
            }
            println!("{code} {frequency} pivots (dt {}):", records[0].dt);
            println!(
                "{:<12} {:<5} {:>10} {:>10} {:>8} {:>8} {:<8}",
                "Date", "Type", "Price", "Prom", "Conf", "Z", "Trace"
            );
            println!("{}", "-".repeat(67));
            for p in records.iter().filter(|p| !filtered || p.is_filtered) {
                println!(
                    "{:<12} {:<5} {:>10.3} {:>10.4} {:>8.2} {:>8.2} {:<8}",
                    p.trade_date,
                    if p.is_high { "high" } else { "low" },
                    p.price,
                    p.prominence,
                    p.confirm_strength,
                    p.z_score,
                    if p.is_filtered { "filtered" } else { "raw" },
                );
            }
        }
        LatestCommand::Candidates { strategy, dt } => {
            let pool = match dt {
                Some(dt) => sink.candidates_at(dt, strategy)?,
                None => sink.latest_candidates(strategy)?,
            };
            let Some(pool) = pool else {
                println!("No {strategy} candidates recorded.");
                return Ok(());
            };
            println!("{strategy} candidates for {} ({}):", pool.dt, pool.len());
            println!(
                "{:>4} {:<12} {:<16} {:>8} {:>8} {:<12}",
                "Rank", "Code", "Name", "Vol", "Sharpe", "Entry"
            );
            println!("{}", "-".repeat(65));
            for c in &pool.candidates {
                println!(
                    "{:>4} {:<12} {:<16} {:>7.1}% {:>8.2} {:<12}",
                    c.rank_in_dt,
                    c.code(),
                    c.profile.name,
                    c.profile.volatility * 100.0,
                    c.score,
                    c.profile
                        .entry_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "-".into()),
                );
            }
        }
    }
    Ok(())
}

fn run_cache(settings: &Settings, action: CacheAction) -> Result<()> {
    let mut cache = open_cache(settings);
    match action {
        CacheAction::Status => {
            let entries = cache.status()?;
            if entries.is_empty() {
                println!("Cache is empty: {}", settings.cache.dir.display());
                return Ok(());
            }
            println!("Cache: {}", settings.cache.dir.display());
            println!("Entries: {}", entries.len());
            println!();
            println!(
                "{:<22} {:<16} {:>7} {:<8} {:>7} {:>9} {:<6}",
                "Key", "Label", "Symbols", "Freq", "Window", "Age", "Fresh"
            );
            println!("{}", "-".repeat(82));
            for e in &entries {
                println!(
                    "{:<22} {:<16} {:>7} {:<8} {:>7} {:>9} {:<6}",
                    e.meta.key.as_str(),
                    e.meta.label,
                    e.meta.codes.len(),
                    e.meta.spec.frequency.as_str(),
                    e.meta.spec.window_bars,
                    format_age(e.age_secs),
                    if e.fresh { "yes" } else { "no" },
                );
            }
        }
        CacheAction::Clear { key: Some(key) } => {
            let Some(parsed) = CacheKey::parse(&key) else {
                bail!("'{key}' is not a cache key (expected all-<hex> or sel-<hex>)");
            };
            if cache.invalidate(&parsed)? {
                println!("Removed: {key}");
            } else {
                println!("No entry for {key}.");
            }
        }
        CacheAction::Clear { key: None } => {
            let removed = cache.clear()?;
            println!("Done. Removed {removed} entr{}.", if removed == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}

fn format_age(secs: i64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}

fn print_pivot_summary(report: &PivotBatchReport) {
    println!();
    println!("=== Pivot Run {} ===", report.run_id);
    println!("Date:        {}", report.dt);
    println!(
        "Method:      {} / {} / {}",
        report.method, report.sensitivity, report.frequency
    );
    println!("Universe:    {} ({} symbols)", report.universe, report.symbols.len());
    println!(
        "Panel:       {} ({})",
        report.panel.cache_key,
        if report.panel.hit { "cache hit" } else { "loaded" }
    );
    if let Some(err) = &report.panel.commit_error {
        println!("WARNING: panel not cached: {err}");
    }
    println!("Detected:    {}", report.detected());
    println!("Records:     {}", report.records_written);
    if report.cleared() > 0 {
        println!("Cleared:     {} stale partition(s)", report.cleared());
    }
    println!("Elapsed:     {} ms", report.elapsed_ms);

    let detected: Vec<_> = report
        .symbols
        .iter()
        .filter_map(|s| match &s.outcome {
            SymbolOutcome::Detected {
                raw,
                filtered,
                analysis,
            } => Some((s.code.as_str(), raw, filtered, analysis)),
            _ => None,
        })
        .collect();
    if !detected.is_empty() {
        println!();
        println!(
            "{:<12} {:>5} {:>8} {:>8} {:>8} {:>7} {:>8}  {}",
            "Code", "Raw", "Filtered", "Removed", "Vol", "Sharpe", "Premium", "Quality"
        );
        for (code, raw, filtered, a) in detected {
            println!(
                "{:<12} {:>5} {:>8} {:>7.0}% {:>7.1}% {:>7.2} {:>8}  {:?} (F1 {:.2})",
                code,
                raw,
                filtered,
                a.filter_stats.filter_ratio * 100.0,
                a.premium.annualized_volatility * 100.0,
                a.premium.sharpe_ratio,
                if a.premium.is_premium { "yes" } else { "-" },
                a.quality.grade,
                a.quality.f1_score,
            );
        }
    }

    let failures: Vec<_> = report
        .symbols
        .iter()
        .filter(|s| !matches!(s.outcome, SymbolOutcome::Detected { .. }))
        .collect();
    if !failures.is_empty() {
        println!();
        println!("--- Not detected ({}) ---", failures.len());
        for s in failures {
            let reason = match &s.outcome {
                SymbolOutcome::InsufficientData { detail } => format!("insufficient data: {detail}"),
                SymbolOutcome::Malformed { detail } => format!("malformed: {detail}"),
                SymbolOutcome::Skipped { .. } => "skipped: time budget exhausted".to_string(),
                SymbolOutcome::PersistenceFailed { attempts, error } => {
                    format!("not persisted after {attempts} attempts: {error}")
                }
                SymbolOutcome::Detected { .. } => continue,
            };
            let cleared = if s.stale_cleared { " (stale rows cleared)" } else { "" };
            println!("{:<12} {reason}{cleared}", s.code);
        }
    }
    println!();
}

fn print_candidate_summary(report: &CandidateBatchReport) {
    println!();
    println!("=== Candidate Run {} ===", report.run_id);
    println!("Date:        {}", report.dt);
    println!("Universe:    {}", report.universe);
    for s in &report.strategies {
        let pool = match &s.pool {
            PoolOutcome::Committed { candidates } => format!("{candidates} candidates"),
            PoolOutcome::RankingConflict { error } => format!("NOT COMMITTED: {error}"),
            PoolOutcome::PersistenceFailed { error } => format!("NOT PERSISTED: {error}"),
            PoolOutcome::SelectionFailed { candidates, error } => {
                format!("{candidates} candidates, SELECTION NOT PERSISTED: {error}")
            }
        };
        println!(
            "{:<12} {} (screened {}, panel {})",
            s.strategy_type.as_str(),
            pool,
            s.symbols.len(),
            if s.panel.hit { "cached" } else { "loaded" }
        );
    }
    println!("Elapsed:     {} ms", report.elapsed_ms);
    println!();
}
