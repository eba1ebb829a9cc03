//! Window metrics for strategy screens, as pure functions over closes.
//!
//! No dependencies on the data pipeline or the sink: bars in, scalars out.

use serde::{Deserialize, Serialize};

use pivotlab_core::domain::{Bar, Frequency};
use pivotlab_core::indicators::stats::{
    annualized_return, annualized_volatility, sharpe_ratio, simple_returns,
};

/// Volatility and risk-adjusted return over the most recent window of bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    /// Bars actually used (≤ the requested window).
    pub bars: usize,
    pub total_return: f64,
    pub annualized_return: f64,
    /// Sample std of simple returns × √(periods per year).
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

impl WindowMetrics {
    /// Metrics over the last `window` bars. None when fewer than `window`
    /// bars exist or the window holds fewer than 2 bars.
    pub fn compute(
        bars: &[Bar],
        window: usize,
        frequency: Frequency,
        risk_free_rate: f64,
    ) -> Option<Self> {
        if window < 2 || bars.len() < window {
            return None;
        }
        let closes: Vec<f64> = bars[bars.len() - window..].iter().map(|b| b.close).collect();
        Some(Self::from_closes(&closes, frequency, risk_free_rate))
    }

    pub fn from_closes(closes: &[f64], frequency: Frequency, risk_free_rate: f64) -> Self {
        let periods = frequency.periods_per_year();
        let volatility = annualized_volatility(&simple_returns(closes), periods);
        let annual = annualized_return(closes, periods);
        Self {
            bars: closes.len(),
            total_return: total_return(closes),
            annualized_return: annual,
            volatility,
            sharpe_ratio: sharpe_ratio(annual, volatility, risk_free_rate),
        }
    }

    /// All fields finite (a flat or broken window produces NaN/∞ somewhere).
    pub fn is_finite(&self) -> bool {
        self.total_return.is_finite()
            && self.annualized_return.is_finite()
            && self.volatility.is_finite()
            && self.sharpe_ratio.is_finite()
    }
}

/// (last - first) / first. 0.0 for fewer than 2 closes or a non-positive start.
pub fn total_return(closes: &[f64]) -> f64 {
    match (closes.first(), closes.last()) {
        (Some(&first), Some(&last)) if closes.len() >= 2 && first > 0.0 => (last - first) / first,
        _ => 0.0,
    }
}
