//! ZigZag with an adaptive ATR threshold.
//!
//! Two states, seeking a high or seeking a low. The running extreme in the
//! sought direction is replaced whenever a bar goes further (highs use the bar
//! high, lows the bar low). A pivot is confirmed when
//! - a close retraces from the extreme by at least
//!   `max(base_swing_pct, atr_pct * atr_multiplier)`,
//! - the extreme sits at least `min_bar_gap` bars after the previous pivot, and
//! - the extreme stands out from the same-side prices on both sides of it by
//!   `prominence_atr_multiplier` times the median true range of the trailing
//!   `atr_period` bars. Single-bar blips fail this.
//!
//! An extreme that retraces far enough but sits too close to the previous
//! pivot is dropped in favour of the best bar that is far enough away, so the
//! machine keeps tracking later swings. The running extreme left at the end of
//! the series is provisional and is never emitted.

use crate::domain::{validate_series, Bar, FilterDecision, SeriesError};
use crate::indicators::stats::median;
use crate::indicators::{atr_pct, true_range};

use super::{significance, DetectorConfig, InitialDirection, Pivot, PivotMethod, PivotTraces};

/// The ZigZag+ATR detection method.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZigzagAtr;

impl PivotMethod for ZigzagAtr {
    fn name(&self) -> &'static str {
        "zigzag_atr"
    }

    fn detect(&self, bars: &[Bar], config: &DetectorConfig) -> Result<PivotTraces, SeriesError> {
        let code = bars.first().map(|b| b.code.as_str()).unwrap_or_default();
        validate_series(code, bars)?;

        if bars.len() < 2 || bars.len() < config.preset.min_series_len() {
            return Ok(PivotTraces::default());
        }

        let atr = atr_pct(bars, config.atr_period);
        let swings = trace_swings(bars, &atr, config);
        let raw = significance::score(bars, &swings, config);
        Ok(significance::filter(raw, &config.preset))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seeking {
    High,
    Low,
}

/// Running extreme: the bar index and its price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Extreme {
    pub index: usize,
    pub price: f64,
}

/// Output of the state machine before significance scoring.
#[derive(Debug, Clone)]
pub(crate) struct SwingTrace {
    pub pivots: Vec<Pivot>,
    /// Unconfirmed extreme at the end of the series.
    pub provisional: Option<Extreme>,
}

fn initial_state(bars: &[Bar], config: &DetectorConfig) -> Seeking {
    match config.initial_direction {
        InitialDirection::SeekHigh => Seeking::High,
        InitialDirection::SeekLow => Seeking::Low,
        InitialDirection::NetMove => {
            let first_step = config.preset.min_bar_gap.max(1).min(bars.len() - 1);
            if bars[first_step].close >= bars[0].close {
                Seeking::High
            } else {
                Seeking::Low
            }
        }
    }
}

fn start_extreme(bar: &Bar, index: usize, state: Seeking) -> Extreme {
    Extreme {
        index,
        price: side_price(bar, state),
    }
}

fn side_price(bar: &Bar, state: Seeking) -> f64 {
    match state {
        Seeking::High => bar.high,
        Seeking::Low => bar.low,
    }
}

/// Fractional retrace of `bar`'s close from the tracked extreme.
fn retrace(extreme: Extreme, bar: &Bar, state: Seeking) -> f64 {
    match state {
        Seeking::High => (extreme.price - bar.close) / extreme.price,
        Seeking::Low => (bar.close - extreme.price) / extreme.price,
    }
}

fn spaced(last_pivot: Option<usize>, index: usize, min_bar_gap: usize) -> bool {
    last_pivot.map_or(true, |p| index - p >= min_bar_gap)
}

/// Most extreme bar in `bars[from..=to]`; the earliest wins ties.
fn best_between(bars: &[Bar], from: usize, to: usize, state: Seeking) -> Option<Extreme> {
    if from > to {
        return None;
    }
    bars[from..=to]
        .iter()
        .enumerate()
        .map(|(offset, bar)| Extreme {
            index: from + offset,
            price: side_price(bar, state),
        })
        .reduce(|best, e| {
            let further = match state {
                Seeking::High => e.price > best.price,
                Seeking::Low => e.price < best.price,
            };
            if further {
                e
            } else {
                best
            }
        })
}

/// Price distance between the extreme and the least extreme same-side price
/// on each side of it, whichever is smaller. The left side runs from
/// `left_start` up to the extreme, the right side up to bar `i`. Nothing has
/// happened on the right yet when the extreme is bar `i` itself.
fn side_prominence(bars: &[Bar], extreme: Extreme, left_start: usize, i: usize, state: Seeking) -> f64 {
    let base = |span: &[Bar]| {
        let prices = span.iter().map(|b| side_price(b, state));
        match state {
            Seeking::High => prices.reduce(f64::min),
            Seeking::Low => prices.reduce(f64::max),
        }
    };
    let distance = |p: f64| (extreme.price - p).abs();

    let Some(right) = base(&bars[extreme.index + 1..i + 1]) else {
        return 0.0;
    };
    let right = distance(right);
    match base(&bars[left_start..extreme.index]) {
        Some(left) => right.min(distance(left)),
        None => right,
    }
}

/// Median true range over the `window` bars ending at `i`.
fn typical_range(ranges: &[f64], i: usize, window: usize) -> f64 {
    let start = (i + 1).saturating_sub(window.max(1));
    median(&ranges[start..=i]).unwrap_or(0.0)
}

/// Run the state machine over a validated series with at least two bars.
pub(crate) fn trace_swings(bars: &[Bar], atr_pct: &[f64], config: &DetectorConfig) -> SwingTrace {
    let preset = &config.preset;
    let ranges = true_range(bars);
    let mut state = initial_state(bars, config);
    let mut extreme = start_extreme(&bars[0], 0, state);
    let mut last_pivot: Option<usize> = None;
    let mut pivots = Vec::new();

    for (i, bar) in bars.iter().enumerate().skip(1) {
        let further = match state {
            Seeking::High => bar.high > extreme.price,
            Seeking::Low => bar.low < extreme.price,
        };
        if further {
            extreme = start_extreme(bar, i, state);
            continue;
        }

        let atr = atr_pct.get(i).copied().unwrap_or(f64::NAN);
        let threshold = preset.threshold(atr);
        let mut moved = retrace(extreme, bar, state);

        if moved >= threshold && !spaced(last_pivot, extreme.index, preset.min_bar_gap) {
            // too close to the last pivot: only bars past the gap can pivot
            let reseeded = last_pivot
                .and_then(|p| best_between(bars, p + preset.min_bar_gap, i, state));
            if let Some(e) = reseeded {
                extreme = e;
                moved = retrace(extreme, bar, state);
            }
        }

        if moved < threshold || !spaced(last_pivot, extreme.index, preset.min_bar_gap) {
            continue;
        }
        let floor = preset.prominence_atr_multiplier * typical_range(&ranges, i, config.atr_period);
        if side_prominence(bars, extreme, last_pivot.unwrap_or(0), i, state) < floor {
            continue;
        }

        let pivot_bar = &bars[extreme.index];
        pivots.push(Pivot {
            is_high: state == Seeking::High,
            bar_index: extreme.index,
            trade_date: pivot_bar.date,
            price: extreme.price,
            confirmed_index: i,
            confirmed_date: bar.date,
            threshold_pct: threshold,
            atr_pct: if atr.is_finite() { atr } else { 0.0 },
            prominence: 0.0,
            confirm_strength: 0.0,
            z_score: 0.0,
            decision: FilterDecision::Kept,
        });
        last_pivot = Some(extreme.index);
        state = match state {
            Seeking::High => Seeking::Low,
            Seeking::Low => Seeking::High,
        };
        extreme = start_extreme(bar, i, state);
    }

    SwingTrace {
        pivots,
        provisional: Some(extreme),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Frequency;
    use crate::pivot::fixtures::{path, weekly_bars};
    use crate::pivot::Sensitivity;

    fn swings(closes: &[f64], sensitivity: Sensitivity) -> SwingTrace {
        let bars = weekly_bars(closes);
        let config = DetectorConfig::new(sensitivity, Frequency::Weekly);
        let atr = atr_pct(&bars, config.atr_period);
        trace_swings(&bars, &atr, &config)
    }

    #[test]
    fn v_shape_confirms_single_low_at_trough() {
        // falls 10% over 8 bars, rises 15% over 10 bars
        let mut closes = path(&[100.0, 90.0], 8);
        closes.extend(path(&[90.0, 103.5], 10).into_iter().skip(1));
        let trace = swings(&closes, Sensitivity::Balanced);

        assert_eq!(trace.pivots.len(), 1);
        let low = &trace.pivots[0];
        assert!(!low.is_high);
        assert_eq!(low.bar_index, 8);
        assert!(low.confirmed_index > 8);
        // the rally's top is provisional
        assert_eq!(trace.provisional.map(|e| e.index), Some(closes.len() - 1));
    }

    #[test]
    fn more_extreme_high_replaces_tracked_high() {
        // 100 -> 110 -> 108 (small dip) -> 120 -> 100
        let mut closes = path(&[100.0, 110.0], 4);
        closes.push(108.0);
        closes.extend(path(&[108.0, 120.0, 100.0], 4).into_iter().skip(1));
        let trace = swings(&closes, Sensitivity::Balanced);
        let highs: Vec<_> = trace.pivots.iter().filter(|p| p.is_high).collect();
        assert_eq!(highs.len(), 1);
        assert_eq!(closes[highs[0].bar_index], 120.0);
    }

    #[test]
    fn pivots_alternate_and_respect_gap() {
        let closes = path(&[100.0, 80.0, 110.0, 85.0, 120.0, 90.0, 130.0], 5);
        let trace = swings(&closes, Sensitivity::Balanced);
        assert!(trace.pivots.len() >= 4);
        for w in trace.pivots.windows(2) {
            assert_ne!(w[0].is_high, w[1].is_high);
            assert!(w[1].bar_index - w[0].bar_index >= 3);
        }
    }

    #[test]
    fn threshold_falls_back_to_base_during_warmup() {
        let closes = path(&[100.0, 80.0, 100.0], 5);
        let trace = swings(&closes, Sensitivity::Balanced);
        let first = &trace.pivots[0];
        assert!(first.confirmed_index < 14);
        assert_eq!(first.threshold_pct, 0.025);
        assert_eq!(first.atr_pct, 0.0);
    }

    #[test]
    fn explicit_initial_direction_is_honoured() {
        let closes = path(&[100.0, 90.0, 100.0], 6);
        let bars = weekly_bars(&closes);
        let config = DetectorConfig::new(Sensitivity::Balanced, Frequency::Weekly)
            .with_initial_direction(InitialDirection::SeekHigh);
        let atr = atr_pct(&bars, config.atr_period);
        let trace = trace_swings(&bars, &atr, &config);
        // seeking a high first, the opening bar becomes the first pivot
        assert!(trace.pivots[0].is_high);
        assert_eq!(trace.pivots[0].bar_index, 0);
    }

    #[test]
    fn extreme_too_close_to_last_pivot_does_not_stall_tracking() {
        // low at bar 8, a one-bar spike back to 100, a long slide to 50,
        // then a rebound that confirms the slide's bottom
        let mut closes = path(&[100.0, 80.0], 8);
        closes.push(100.0);
        closes.extend(path(&[100.0, 50.0], 30).into_iter().skip(1));
        closes.extend(path(&[50.0, 60.0], 5).into_iter().skip(1));
        let trace = swings(&closes, Sensitivity::Balanced);

        let found: Vec<(bool, usize)> = trace.pivots.iter().map(|p| (p.is_high, p.bar_index)).collect();
        assert_eq!(found.len(), 3, "pivots: {found:?}");
        assert_eq!(found[0], (false, 8));
        // the spike sits one bar after the low, so the high comes from the
        // first bar that respects the gap
        assert!(found[1].0);
        assert!(found[1].1 >= 8 + 3);
        assert!(trace.pivots[1].price > 90.0);
        assert_eq!(found[2], (false, 39));
    }

    #[test]
    fn best_between_prefers_the_earliest_of_equal_extremes() {
        let bars = weekly_bars(&[100.0, 104.0, 104.0, 101.0]);
        let best = best_between(&bars, 1, 3, Seeking::High).unwrap();
        assert_eq!(best.index, 1);
        assert!(best_between(&bars, 3, 2, Seeking::High).is_none());
    }

    fn daily_bars(closes: &[f64]) -> Vec<Bar> {
        weekly_bars(closes)
            .into_iter()
            .enumerate()
            .map(|(i, mut b)| {
                b.date = chrono::NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
                    + chrono::Duration::days(i as i64);
                b.frequency = Frequency::Daily;
                b
            })
            .collect()
    }

    #[test]
    fn single_bar_blips_never_confirm_at_either_frequency() {
        // every second bar steps 1% away from 100 and straight back
        let closes: Vec<f64> = (0..80)
            .map(|i| match i % 4 {
                1 => 101.0,
                3 => 99.0,
                _ => 100.0,
            })
            .collect();
        for frequency in [Frequency::Daily, Frequency::Weekly] {
            let bars = match frequency {
                Frequency::Daily => daily_bars(&closes),
                Frequency::Weekly => weekly_bars(&closes),
            };
            let config = DetectorConfig::new(Sensitivity::Conservative, frequency);
            let atr = atr_pct(&bars, config.atr_period);
            let trace = trace_swings(&bars, &atr, &config);
            assert!(trace.pivots.is_empty(), "{frequency}: {:?}", trace.pivots);
        }
    }

    #[test]
    fn sustained_move_clears_the_prominence_floor() {
        // same noise, then a real 8% drop and recovery
        let mut closes: Vec<f64> = (0..24)
            .map(|i| match i % 4 {
                1 => 101.0,
                3 => 99.0,
                _ => 100.0,
            })
            .collect();
        closes.extend(path(&[100.0, 92.0, 100.0], 4).into_iter().skip(1));
        let bars = daily_bars(&closes);
        let config = DetectorConfig::new(Sensitivity::Conservative, Frequency::Daily);
        let atr = atr_pct(&bars, config.atr_period);
        let trace = trace_swings(&bars, &atr, &config);

        let low = trace.pivots.iter().find(|p| !p.is_high).expect("drop confirmed");
        assert_eq!(low.bar_index, 27);
        assert!(low.confirmed_index > low.bar_index + 1);
    }

    #[test]
    fn malformed_series_is_an_error() {
        let mut bars = weekly_bars(&path(&[100.0, 90.0, 100.0], 6));
        bars[5].date = bars[4].date;
        let config = DetectorConfig::new(Sensitivity::Balanced, Frequency::Weekly);
        let err = ZigzagAtr.detect(&bars, &config).unwrap_err();
        assert!(matches!(err, SeriesError::MalformedSeries { index: 5, .. }));
    }

    #[test]
    fn short_series_yields_empty_traces() {
        let bars = weekly_bars(&[100.0, 90.0, 100.0, 95.0, 110.0]);
        let config = DetectorConfig::new(Sensitivity::Balanced, Frequency::Weekly);
        let traces = ZigzagAtr.detect(&bars, &config).unwrap();
        assert!(traces.raw.is_empty() && traces.filtered.is_empty());
    }
}
