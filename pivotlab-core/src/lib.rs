//! PivotLab Core: domain types, numeric primitives, pivot detection, bar data and caching.
//!
//! This crate contains the algorithmic heart of PivotLab:
//! - Domain types (bars, pivot records, strategy candidates, universes)
//! - ATR and rolling statistics
//! - ZigZag + adaptive-ATR pivot detection with significance filtering
//! - Bar sources (CSV, synthetic, in-memory) and weekly resampling
//! - Selection-set cache over bar panels with pluggable stores

pub mod data;
pub mod domain;
pub mod indicators;
pub mod pivot;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared across detection workers is
    /// Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::PivotPoint>();
        require_sync::<domain::PivotPoint>();
        require_send::<domain::StrategyCandidate>();
        require_sync::<domain::StrategyCandidate>();
        require_send::<domain::CandidatePool>();
        require_sync::<domain::CandidatePool>();
        require_send::<domain::Universe>();
        require_sync::<domain::Universe>();
        require_send::<domain::SelectionSet>();
        require_sync::<domain::SelectionSet>();

        // Detector types
        require_send::<pivot::DetectorConfig>();
        require_sync::<pivot::DetectorConfig>();
        require_send::<pivot::PivotTraces>();
        require_sync::<pivot::PivotTraces>();
        require_send::<pivot::ZigzagAtr>();
        require_sync::<pivot::ZigzagAtr>();

        // Data and cache types
        require_send::<data::BarPanel>();
        require_sync::<data::BarPanel>();
        require_send::<data::CacheEntry>();
        require_sync::<data::CacheEntry>();
        require_send::<data::SelectionCache<data::MemoryPanelStore>>();
        require_sync::<data::SelectionCache<data::MemoryPanelStore>>();
        require_send::<data::SelectionCache<data::ParquetPanelStore>>();
        require_sync::<data::SelectionCache<data::ParquetPanelStore>>();
        require_send::<data::CsvBarSource>();
        require_sync::<data::CsvBarSource>();
        require_send::<data::SyntheticBarSource>();
        require_sync::<data::SyntheticBarSource>();
    }

    /// Architecture contract: detection methods see only bars and config.
    ///
    /// `detect()` takes `&[Bar]` and `&DetectorConfig`; no cache, clock or
    /// sink is reachable, so traces are pure functions of their input.
    #[test]
    fn pivot_method_is_pure_over_bars_and_config() {
        fn _check_trait_object_builds(
            method: &dyn pivot::PivotMethod,
            bars: &[domain::Bar],
            config: &pivot::DetectorConfig,
        ) -> Result<pivot::PivotTraces, domain::SeriesError> {
            method.detect(bars, config)
        }
    }
}
