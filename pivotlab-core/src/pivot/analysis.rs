//! Derived analyses over detected traces: filter statistics, premium
//! metrics, quality grading, and the T1/T2 entry signal.
//!
//! [`PivotAnalysis`] bundles the first three; batch runs attach it to every
//! detected symbol's report.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Frequency};
use crate::indicators::stats::{log_returns, mean, sample_std};

use super::{Pivot, PivotTraces};

/// Bars after a pivot used to judge whether price followed through.
pub const QUALITY_LOOKAHEAD: usize = 5;

/// How much the significance filter removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub raw_highs: usize,
    pub raw_lows: usize,
    pub filtered_highs: usize,
    pub filtered_lows: usize,
    pub highs_filtered: usize,
    pub lows_filtered: usize,
    /// 1 - filtered / raw; 0.0 with no raw pivots.
    pub filter_ratio: f64,
}

impl FilterStats {
    pub fn from_traces(traces: &PivotTraces) -> Self {
        let count = |ps: &[Pivot], high: bool| ps.iter().filter(|p| p.is_high == high).count();
        let raw_highs = count(&traces.raw, true);
        let raw_lows = count(&traces.raw, false);
        let filtered_highs = count(&traces.filtered, true);
        let filtered_lows = count(&traces.filtered, false);
        let filter_ratio = if traces.raw.is_empty() {
            0.0
        } else {
            1.0 - traces.filtered.len() as f64 / traces.raw.len() as f64
        };
        Self {
            raw_highs,
            raw_lows,
            filtered_highs,
            filtered_lows,
            highs_filtered: raw_highs - filtered_highs,
            lows_filtered: raw_lows - filtered_lows,
            filter_ratio,
        }
    }
}

/// Volatility and Sharpe of the run-up from the lowest filtered low (T1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PremiumMetrics {
    pub t1_date: Option<NaiveDate>,
    pub t1_price: Option<f64>,
    /// Annualized volatility of log returns since T1 (fraction, 0.45 = 45%).
    pub annualized_volatility: f64,
    /// Annualized mean/std of log returns since T1 (risk-free 0).
    pub sharpe_ratio: f64,
    pub is_premium: bool,
}

impl PremiumMetrics {
    pub const MIN_VOLATILITY: f64 = 0.40;
    pub const MIN_SHARPE: f64 = 0.8;

    pub fn compute(bars: &[Bar], traces: &PivotTraces, frequency: Frequency) -> Self {
        let empty = Self {
            t1_date: None,
            t1_price: None,
            annualized_volatility: 0.0,
            sharpe_ratio: 0.0,
            is_premium: false,
        };
        let Some(t1) = lowest_low(&traces.filtered) else {
            return empty;
        };
        if t1.bar_index >= bars.len() {
            return empty;
        }

        let closes: Vec<f64> = bars[t1.bar_index..].iter().map(|b| b.close).collect();
        let returns = log_returns(&closes);
        let periods = frequency.periods_per_year();
        let sigma = sample_std(&returns);
        let annualized_volatility = sigma * periods.sqrt();
        let sharpe_ratio = if sigma > 1e-12 {
            mean(&returns) / sigma * periods.sqrt()
        } else {
            0.0
        };

        Self {
            t1_date: Some(t1.trade_date),
            t1_price: Some(t1.price),
            annualized_volatility,
            sharpe_ratio,
            is_premium: annualized_volatility >= Self::MIN_VOLATILITY
                && sharpe_ratio >= Self::MIN_SHARPE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityGrade {
    pub fn from_f1(f1: f64) -> Self {
        if f1 >= 0.8 {
            QualityGrade::Excellent
        } else if f1 >= 0.6 {
            QualityGrade::Good
        } else if f1 >= 0.4 {
            QualityGrade::Fair
        } else {
            QualityGrade::Poor
        }
    }
}

/// Did price follow through after each filtered pivot?
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// Mean follow-through score of the evaluated pivots.
    pub precision: f64,
    /// Share of filtered pivots with enough later bars to be evaluated.
    pub recall: f64,
    pub f1_score: f64,
    pub grade: QualityGrade,
}

impl QualityAssessment {
    pub fn compute(bars: &[Bar], traces: &PivotTraces) -> Self {
        if traces.filtered.is_empty() {
            return Self {
                precision: 0.5,
                recall: 0.5,
                f1_score: 0.5,
                grade: QualityGrade::Poor,
            };
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let scores: Vec<f64> = traces
            .filtered
            .iter()
            .filter(|p| p.bar_index + QUALITY_LOOKAHEAD < closes.len())
            .map(|p| {
                let base = closes[p.bar_index];
                let future = &closes[p.bar_index + 1..=p.bar_index + QUALITY_LOOKAHEAD];
                let moved = if p.is_high {
                    let low = future.iter().copied().fold(f64::INFINITY, f64::min);
                    (base - low) / base
                } else {
                    let high = future.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    (high - base) / base
                };
                if moved > 0.02 {
                    (moved * 10.0).min(1.0)
                } else {
                    0.3
                }
            })
            .collect();

        let (precision, recall, f1_score) = if scores.is_empty() {
            (0.5, 0.5, 0.5)
        } else {
            let precision = mean(&scores);
            let recall = scores.len() as f64 / traces.filtered.len() as f64;
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.5
            };
            (precision, recall, f1)
        };

        Self {
            precision,
            recall,
            f1_score,
            grade: QualityGrade::from_f1(f1_score),
        }
    }
}

/// Per-symbol summary reported next to the pivot counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotAnalysis {
    pub filter_stats: FilterStats,
    pub premium: PremiumMetrics,
    pub quality: QualityAssessment,
}

impl PivotAnalysis {
    pub fn compute(bars: &[Bar], traces: &PivotTraces, frequency: Frequency) -> Self {
        Self {
            filter_stats: FilterStats::from_traces(traces),
            premium: PremiumMetrics::compute(bars, traces, frequency),
            quality: QualityAssessment::compute(bars, traces),
        }
    }
}

/// Higher-low breakout entry derived from the filtered trace.
///
/// T1 is the lowest filtered low. T2 is the first later filtered low above
/// T1. Entry is the first close after T2 above the highest filtered high
/// between T1 and T2 (or the highest bar high there when no filtered high
/// exists).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub t1_date: NaiveDate,
    pub t1_price: f64,
    pub t2_date: Option<NaiveDate>,
    pub t2_price: Option<f64>,
    pub breakout_level: Option<f64>,
    pub entry_date: Option<NaiveDate>,
    pub entry_price: Option<f64>,
    /// Bars from T2 to entry, or to the last bar while still waiting.
    pub wait_periods: Option<usize>,
}

impl EntrySignal {
    pub fn find(bars: &[Bar], traces: &PivotTraces) -> Option<Self> {
        let t1 = lowest_low(&traces.filtered)?;
        let mut signal = EntrySignal {
            t1_date: t1.trade_date,
            t1_price: t1.price,
            t2_date: None,
            t2_price: None,
            breakout_level: None,
            entry_date: None,
            entry_price: None,
            wait_periods: None,
        };

        let Some(t2) = traces
            .filtered
            .iter()
            .find(|p| !p.is_high && p.bar_index > t1.bar_index && p.price > t1.price)
        else {
            return Some(signal);
        };
        signal.t2_date = Some(t2.trade_date);
        signal.t2_price = Some(t2.price);

        let between = |p: &&Pivot| p.is_high && p.bar_index > t1.bar_index && p.bar_index < t2.bar_index;
        let level = traces
            .filtered
            .iter()
            .filter(between)
            .map(|p| p.price)
            .reduce(f64::max)
            .or_else(|| {
                bars.get(t1.bar_index + 1..t2.bar_index)
                    .and_then(|span| span.iter().map(|b| b.high).reduce(f64::max))
            });
        let Some(level) = level else {
            return Some(signal);
        };
        signal.breakout_level = Some(level);

        let entry = bars
            .iter()
            .enumerate()
            .skip(t2.bar_index + 1)
            .find(|(_, b)| b.close > level);
        match entry {
            Some((i, bar)) => {
                signal.entry_date = Some(bar.date);
                signal.entry_price = Some(bar.close);
                signal.wait_periods = Some(i - t2.bar_index);
            }
            None => {
                signal.wait_periods = Some(bars.len().saturating_sub(1) - t2.bar_index);
            }
        }
        Some(signal)
    }
}

/// Lowest low pivot; the earliest wins ties.
fn lowest_low(pivots: &[Pivot]) -> Option<&Pivot> {
    pivots
        .iter()
        .filter(|p| !p.is_high)
        .fold(None, |best: Option<&Pivot>, p| match best {
            Some(b) if b.price <= p.price => Some(b),
            _ => Some(p),
        })
}
