//! Significance scoring and the filtered trace.
//!
//! Each raw pivot gets three scores:
//! - prominence: smallest excursion to a neighbouring opposite-type pivot,
//!   as a fraction of the pivot price. At either end of the trace the
//!   neighbour is the opposite extreme of the bars on that side.
//! - confirm_strength: bars until the next reversal (next pivot, or the
//!   provisional extreme at the end), in units of `min_bar_gap`.
//! - z_score: pivot price against the trailing closes before the pivot bar.
//!
//! A pivot is kept when all three clear the preset floors (z in the pivot's
//! direction). Kept pivots must still alternate: where two same-type pivots
//! end up adjacent, the less extreme one is dropped.

use crate::domain::{Bar, FilterDecision};
use crate::indicators::stats::trailing_z_score;

use super::preset::SensitivityPreset;
use super::zigzag::SwingTrace;
use super::{DetectorConfig, Pivot, PivotTraces};

pub(crate) fn score(bars: &[Bar], swings: &SwingTrace, config: &DetectorConfig) -> Vec<Pivot> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let gap = config.preset.min_bar_gap.max(1) as f64;
    let last_bar = bars.len().saturating_sub(1);
    let pivots = &swings.pivots;

    pivots
        .iter()
        .enumerate()
        .map(|(k, p)| {
            let prev = match k.checked_sub(1).and_then(|j| pivots.get(j)) {
                Some(q) => Some(q.price),
                None => opposite_extreme(&bars[..p.bar_index], p.is_high),
            };
            let next = match pivots.get(k + 1) {
                Some(q) => Some(q.price),
                None => opposite_extreme(&bars[p.bar_index + 1..], p.is_high),
            };
            let prominence = [prev, next]
                .into_iter()
                .flatten()
                .map(|q| (p.price - q).abs() / p.price)
                .reduce(f64::min)
                .unwrap_or(0.0);

            let reversal = pivots
                .get(k + 1)
                .map(|q| q.bar_index)
                .or(swings.provisional.map(|e| e.index))
                .unwrap_or(last_bar);
            let confirm_strength = reversal.saturating_sub(p.bar_index) as f64 / gap;

            let z_score = trailing_z_score(&closes, p.bar_index, config.zscore_window, p.price);

            Pivot {
                prominence,
                confirm_strength,
                z_score,
                ..p.clone()
            }
        })
        .collect()
}

/// Lowest low (for a high pivot) or highest high (for a low pivot) in `bars`.
fn opposite_extreme(bars: &[Bar], is_high: bool) -> Option<f64> {
    if is_high {
        bars.iter().map(|b| b.low).reduce(f64::min)
    } else {
        bars.iter().map(|b| b.high).reduce(f64::max)
    }
}

fn threshold_decision(p: &Pivot, preset: &SensitivityPreset) -> FilterDecision {
    let directional_z = if p.is_high { p.z_score } else { -p.z_score };
    if p.prominence < preset.min_prominence {
        FilterDecision::LowProminence
    } else if p.confirm_strength < preset.min_confirm_strength {
        FilterDecision::WeakConfirmation
    } else if directional_z < preset.min_abs_z {
        FilterDecision::LowZScore
    } else {
        FilterDecision::Kept
    }
}

pub(crate) fn filter(mut raw: Vec<Pivot>, preset: &SensitivityPreset) -> PivotTraces {
    for p in raw.iter_mut() {
        p.decision = threshold_decision(p, preset);
    }

    let mut last_kept: Option<usize> = None;
    for k in 0..raw.len() {
        if !raw[k].decision.is_kept() {
            continue;
        }
        if let Some(j) = last_kept {
            if raw[j].is_high == raw[k].is_high {
                let k_more_extreme = if raw[k].is_high {
                    raw[k].price > raw[j].price
                } else {
                    raw[k].price < raw[j].price
                };
                if k_more_extreme {
                    raw[j].decision = FilterDecision::Alternation;
                    last_kept = Some(k);
                } else {
                    raw[k].decision = FilterDecision::Alternation;
                }
                continue;
            }
        }
        last_kept = Some(k);
    }

    let filtered = raw.iter().filter(|p| p.decision.is_kept()).cloned().collect();
    PivotTraces { raw, filtered }
}
