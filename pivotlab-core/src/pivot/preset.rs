//! Sensitivity presets: named bundles of threshold and spacing parameters.
//!
//! Weekly and daily series get separate tables. Daily bars move less per bar,
//! so their base swing and prominence floors are lower.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::Frequency;

/// Detection density vs. latency trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Fewer, higher-confidence pivots; confirms later.
    Conservative,
    #[default]
    Balanced,
    /// More pivots, earlier, noisier.
    Aggressive,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Conservative => "conservative",
            Sensitivity::Balanced => "balanced",
            Sensitivity::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Sensitivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(Sensitivity::Conservative),
            "balanced" => Ok(Sensitivity::Balanced),
            "aggressive" => Ok(Sensitivity::Aggressive),
            other => Err(format!(
                "unknown sensitivity '{other}' (expected conservative|balanced|aggressive)"
            )),
        }
    }
}

/// Resolved numeric parameters for one sensitivity at one frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityPreset {
    pub sensitivity: Sensitivity,
    /// Floor for the swing threshold, as a fraction of price.
    pub base_swing_pct: f64,
    /// Multiplier applied to ATR% (as a fraction) to get the adaptive threshold.
    pub atr_multiplier: f64,
    /// Minimum bars between consecutive confirmed pivots.
    pub min_bar_gap: usize,
    /// A swing extreme must stand out from the same-side prices around it
    /// by at least this many typical bar ranges before it can confirm.
    pub prominence_atr_multiplier: f64,
    /// Filtered trace floors.
    pub min_prominence: f64,
    pub min_confirm_strength: f64,
    pub min_abs_z: f64,
}

impl SensitivityPreset {
    pub fn new(sensitivity: Sensitivity, frequency: Frequency) -> Self {
        use Frequency::*;
        use Sensitivity::*;

        let (base_swing_pct, min_bar_gap, min_prominence, prominence_atr_multiplier) =
            match (sensitivity, frequency) {
                (Conservative, Weekly) => (0.035, 5, 0.050, 0.80),
                (Balanced, Weekly) => (0.025, 3, 0.030, 0.60),
                (Aggressive, Weekly) => (0.018, 2, 0.020, 0.50),
                (Conservative, Daily) => (0.018, 3, 0.030, 1.00),
                (Balanced, Daily) => (0.012, 2, 0.018, 0.80),
                (Aggressive, Daily) => (0.008, 1, 0.010, 0.60),
            };
        let (atr_multiplier, min_confirm_strength, min_abs_z) = match sensitivity {
            Conservative => (0.80, 1.0, 1.0),
            Balanced => (0.60, 1.0, 0.8),
            Aggressive => (0.50, 0.5, 0.5),
        };

        Self {
            sensitivity,
            base_swing_pct,
            atr_multiplier,
            min_bar_gap,
            prominence_atr_multiplier,
            min_prominence,
            min_confirm_strength,
            min_abs_z,
        }
    }

    /// Shortest series that can produce a trace at all.
    pub fn min_series_len(&self) -> usize {
        2 * self.min_bar_gap
    }

    /// Swing threshold (fraction of price) given ATR% at the current bar.
    ///
    /// During ATR warmup (`NaN`) only the base swing applies.
    pub fn threshold(&self, atr_pct: f64) -> f64 {
        if atr_pct.is_finite() {
            self.base_swing_pct.max(atr_pct / 100.0 * self.atr_multiplier)
        } else {
            self.base_swing_pct
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conservative_is_stricter_than_aggressive() {
        for freq in [Frequency::Daily, Frequency::Weekly] {
            let c = SensitivityPreset::new(Sensitivity::Conservative, freq);
            let b = SensitivityPreset::new(Sensitivity::Balanced, freq);
            let a = SensitivityPreset::new(Sensitivity::Aggressive, freq);
            assert!(c.base_swing_pct > b.base_swing_pct && b.base_swing_pct > a.base_swing_pct);
            assert!(c.min_bar_gap >= b.min_bar_gap && b.min_bar_gap >= a.min_bar_gap);
            assert!(c.min_prominence > a.min_prominence);
            assert!(c.prominence_atr_multiplier > a.prominence_atr_multiplier);
        }
    }

    #[test]
    fn threshold_takes_max_of_base_and_atr() {
        let p = SensitivityPreset::new(Sensitivity::Balanced, Frequency::Weekly);
        assert_eq!(p.threshold(f64::NAN), 0.025);
        assert_eq!(p.threshold(1.0), 0.025);
        assert!((p.threshold(10.0) - 0.06).abs() < 1e-12);
    }

    #[test]
    fn sensitivity_parses() {
        assert_eq!("Aggressive".parse::<Sensitivity>().unwrap(), Sensitivity::Aggressive);
        assert!("extreme".parse::<Sensitivity>().is_err());
        assert_eq!(Sensitivity::default(), Sensitivity::Balanced);
    }
}
