//! Average True Range (ATR) and ATR as a percentage of price.
//!
//! The detector sizes its swing threshold from ATR%, and its prominence
//! floor from raw true ranges.

use super::Indicator;
use crate::domain::Bar;

/// Default ATR window used by the pivot detector.
pub const DEFAULT_ATR_PERIOD: usize = 14;

#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    name: String,
}

impl Atr {
    /// A zero period is treated as 1.
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("atr_{period}"),
        }
    }
}

/// ATR expressed as a percentage of the same bar's close.
///
/// NaN during the ATR warmup and wherever the close is not positive.
pub fn atr_pct(bars: &[Bar], period: usize) -> Vec<f64> {
    let atr = Atr::new(period).compute(bars);
    atr.iter()
        .zip(bars)
        .map(|(a, bar)| {
            if a.is_nan() || bar.close <= 0.0 {
                f64::NAN
            } else {
                a / bar.close * 100.0
            }
        })
        .collect()
}

/// True range per bar: `max(high - low, |high - prev_close|, |low - prev_close|)`.
///
/// The first bar has no previous close and gets `high - low`. NaN wherever an
/// input price is NaN.
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let range = bar.high - bar.low;
            match i.checked_sub(1).map(|j| bars[j].close) {
                _ if range.is_nan() => f64::NAN,
                Some(pc) if pc.is_nan() => f64::NAN,
                Some(pc) => range.max((bar.high - pc).abs()).max((bar.low - pc).abs()),
                None => range,
            }
        })
        .collect()
}

/// Wilder smoothing, alpha = 1/period.
///
/// Seeded with the mean of the first `period` values after any leading NaNs;
/// NaN until the seed and from the first later NaN onward.
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    let Some(first) = values.iter().position(|v| !v.is_nan()) else {
        return out;
    };
    let seed_end = first + period;
    if period == 0 || seed_end > values.len() {
        return out;
    }
    let seed = &values[first..seed_end];
    if seed.iter().any(|v| v.is_nan()) {
        return out;
    }

    let alpha = 1.0 / period as f64;
    let mut prev = seed.iter().sum::<f64>() / period as f64;
    out[seed_end - 1] = prev;
    for (i, &v) in values.iter().enumerate().skip(seed_end) {
        if v.is_nan() {
            break;
        }
        prev = alpha * v + (1.0 - alpha) * prev;
        out[i] = prev;
    }
    out
}

impl Indicator for Atr {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let mut tr = true_range(bars);
        // seed from the first full true range
        if let Some(first) = tr.first_mut() {
            *first = f64::NAN;
        }
        wilder_smooth(&tr, self.period)
    }
}
