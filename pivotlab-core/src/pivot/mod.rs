//! Turning-point ("pivot") detection.
//!
//! A detection method turns one `(code, frequency)` bar series into two
//! traces: every confirmed pivot (raw) and the significant subset (filtered).
//! Output is a pure function of the bars and the config.

pub mod analysis;
pub mod preset;
pub mod significance;
pub mod zigzag;

pub use analysis::{
    EntrySignal, FilterStats, PivotAnalysis, PremiumMetrics, QualityAssessment, QualityGrade,
};
pub use preset::{Sensitivity, SensitivityPreset};
pub use zigzag::ZigzagAtr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{Bar, FilterDecision, Frequency, PivotExtras, PivotPoint, SeriesError};
use crate::indicators::atr::DEFAULT_ATR_PERIOD;

/// Trailing window (bars) for pivot z-scores.
pub const DEFAULT_ZSCORE_WINDOW: usize = 20;

/// A confirmed pivot with its significance metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    pub is_high: bool,
    pub bar_index: usize,
    pub trade_date: NaiveDate,
    pub price: f64,
    pub confirmed_index: usize,
    pub confirmed_date: NaiveDate,
    /// Swing threshold (fraction) in force on the confirming bar.
    pub threshold_pct: f64,
    /// ATR% on the confirming bar; 0.0 while ATR is still warming up.
    pub atr_pct: f64,
    pub prominence: f64,
    pub confirm_strength: f64,
    pub z_score: f64,
    pub decision: FilterDecision,
}

/// How the state machine picks its first direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialDirection {
    /// Compare the close `min_bar_gap` bars in with the first close: a rise
    /// (or no change) starts by seeking a high, a fall by seeking a low.
    #[default]
    NetMove,
    SeekHigh,
    SeekLow,
}

impl std::str::FromStr for InitialDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "net_move" => Ok(InitialDirection::NetMove),
            "seek_high" => Ok(InitialDirection::SeekHigh),
            "seek_low" => Ok(InitialDirection::SeekLow),
            other => Err(format!(
                "unknown initial direction '{other}' (expected net_move|seek_high|seek_low)"
            )),
        }
    }
}

/// Everything a detection method needs besides the bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub frequency: Frequency,
    pub preset: SensitivityPreset,
    pub atr_period: usize,
    pub zscore_window: usize,
    pub initial_direction: InitialDirection,
}

impl DetectorConfig {
    pub fn new(sensitivity: Sensitivity, frequency: Frequency) -> Self {
        Self {
            frequency,
            preset: SensitivityPreset::new(sensitivity, frequency),
            atr_period: DEFAULT_ATR_PERIOD,
            zscore_window: DEFAULT_ZSCORE_WINDOW,
            initial_direction: InitialDirection::default(),
        }
    }

    pub fn with_initial_direction(mut self, direction: InitialDirection) -> Self {
        self.initial_direction = direction;
        self
    }
}

/// Raw and filtered pivot traces for one series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PivotTraces {
    pub raw: Vec<Pivot>,
    pub filtered: Vec<Pivot>,
}

impl PivotTraces {
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Persistable records for both traces, raw first.
    pub fn to_records(
        &self,
        dt: NaiveDate,
        code: &str,
        config: &DetectorConfig,
    ) -> Vec<PivotPoint> {
        let raw = self.raw.iter().map(|p| (p, false));
        let filtered = self.filtered.iter().map(|p| (p, true));
        raw.chain(filtered)
            .map(|(p, is_filtered)| PivotPoint {
                dt,
                code: code.to_string(),
                frequency: config.frequency,
                is_filtered,
                is_high: p.is_high,
                trade_date: p.trade_date,
                bar_index: p.bar_index,
                price: p.price,
                prominence: p.prominence,
                confirm_strength: p.confirm_strength,
                z_score: p.z_score,
                atr_pct: p.atr_pct,
                extras: PivotExtras {
                    threshold_pct: p.threshold_pct,
                    base_swing_pct: config.preset.base_swing_pct,
                    atr_multiplier: config.preset.atr_multiplier,
                    confirmed_index: p.confirmed_index,
                    confirmed_date: p.confirmed_date,
                    decision: p.decision,
                },
            })
            .collect()
    }
}

/// Capability interface for a pivot detection method.
pub trait PivotMethod: Send + Sync {
    fn name(&self) -> &'static str;

    /// Detect pivots in one ordered series.
    ///
    /// Malformed input is an error. A series too short to hold two spaced
    /// pivots yields empty traces.
    fn detect(&self, bars: &[Bar], config: &DetectorConfig) -> Result<PivotTraces, SeriesError>;
}

/// Selectable detection methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    #[default]
    ZigzagAtr,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::ZigzagAtr => "zigzag_atr",
        }
    }

    pub fn detector(&self) -> &'static dyn PivotMethod {
        match self {
            DetectionMethod::ZigzagAtr => &ZigzagAtr,
        }
    }

    pub fn detect(&self, bars: &[Bar], config: &DetectorConfig) -> Result<PivotTraces, SeriesError> {
        self.detector().detect(bars, config)
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DetectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zigzag_atr" => Ok(DetectionMethod::ZigzagAtr),
            other => Err(format!(
                "unsupported detection method '{other}' (only zigzag_atr is available)"
            )),
        }
    }
}
