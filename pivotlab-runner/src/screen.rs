//! Strategy screens: turn a symbol's bars and descriptive fields into the
//! scored profile the ranker consumes.
//!
//! A screen first checks eligibility (special-treatment names, unprofitable
//! `-U` listings, Hong Kong and Beijing listings, recent IPOs), then computes
//! window metrics and applies the strategy's volatility/Sharpe rule. Passing
//! symbols are scored by Sharpe ratio and carry the T1/T2 entry signal.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use pivotlab_core::data::SymbolEntry;
use pivotlab_core::domain::{
    validate_series, Bar, CandidateProfile, MarketCapCategory, SeriesError, StrategyType,
};
use pivotlab_core::pivot::{DetectionMethod, DetectorConfig, EntrySignal};

use crate::config::{ScreenRule, ScreenSettings};
use crate::metrics::WindowMetrics;
use crate::ranker::ScoredSymbol;

/// Market value (in 100 million) at or above which a symbol is large cap.
pub const LARGE_CAP_MIN: f64 = 500.0;
pub const MID_CAP_MIN: f64 = 100.0;

/// Descriptive fields of a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockInfo {
    pub code: String,
    pub name: String,
    /// Market value in units of 100 million.
    pub market_value: Option<f64>,
    pub ipo_date: Option<NaiveDate>,
}

impl StockInfo {
    /// Bare info for a symbol with no descriptive entry. Named after its code.
    pub fn unknown(code: &str) -> Self {
        Self {
            code: code.to_string(),
            name: code.to_string(),
            market_value: None,
            ipo_date: None,
        }
    }

    pub fn market_cap_category(&self) -> Option<MarketCapCategory> {
        self.market_value.map(market_cap_category)
    }
}

impl From<&SymbolEntry> for StockInfo {
    fn from(entry: &SymbolEntry) -> Self {
        Self {
            code: entry.code.clone(),
            name: entry.name.clone().unwrap_or_else(|| entry.code.clone()),
            market_value: entry.market_value.as_deref().and_then(parse_market_value),
            ipo_date: entry.ipo_date,
        }
    }
}

/// Parse a market value such as `"2.1万亿"`, `"350亿"`, `"8000万"` or a raw
/// yuan amount into units of 100 million. Spaces and thousands separators
/// are ignored. None for empty or unparseable text.
pub fn parse_market_value(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    // (digits, multiplier, divisor) into units of 100 million
    let (number, mul, div) = if let Some(n) = cleaned.strip_suffix("万亿") {
        (n, 10_000.0, 1.0)
    } else if let Some(n) = cleaned.strip_suffix('亿') {
        (n, 1.0, 1.0)
    } else if let Some(n) = cleaned.strip_suffix('万') {
        (n, 1.0, 10_000.0)
    } else {
        (cleaned.as_str(), 1.0, 100_000_000.0)
    };
    number
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v * mul / div)
}

pub fn market_cap_category(value: f64) -> MarketCapCategory {
    if value >= LARGE_CAP_MIN {
        MarketCapCategory::LargeCap
    } else if value >= MID_CAP_MIN {
        MarketCapCategory::MidCap
    } else {
        MarketCapCategory::SmallCap
    }
}

/// Why a symbol is not screened at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    SpecialTreatment,
    UnprofitableListing,
    HongKong,
    Beijing,
    RecentListing { days: i64 },
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusion::SpecialTreatment => f.write_str("special treatment (ST)"),
            Exclusion::UnprofitableListing => f.write_str("unprofitable listing (-U)"),
            Exclusion::HongKong => f.write_str("Hong Kong listing"),
            Exclusion::Beijing => f.write_str("Beijing listing"),
            Exclusion::RecentListing { days } => write!(f, "listed {days} days"),
        }
    }
}

/// Check whether `info` may be screened on `dt`.
pub fn eligibility(info: &StockInfo, dt: NaiveDate, min_listing_days: i64) -> Result<(), Exclusion> {
    if info.name.contains("ST") {
        return Err(Exclusion::SpecialTreatment);
    }
    if info.name.ends_with("-U") {
        return Err(Exclusion::UnprofitableListing);
    }
    if info.code.ends_with(".HK") {
        return Err(Exclusion::HongKong);
    }
    if info.code.ends_with(".BJ") {
        return Err(Exclusion::Beijing);
    }
    if let Some(ipo) = info.ipo_date {
        let days = (dt - ipo).num_days();
        if days < min_listing_days {
            return Err(Exclusion::RecentListing { days });
        }
    }
    Ok(())
}

/// Result of screening one symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenVerdict {
    Passed(Box<ScoredSymbol>),
    Excluded(Exclusion),
    InsufficientData { bars: usize, required: usize },
    /// Eligible with enough history, but outside the volatility/Sharpe rule.
    Rejected(WindowMetrics),
}

impl ScreenVerdict {
    pub fn passed(&self) -> Option<&ScoredSymbol> {
        match self {
            ScreenVerdict::Passed(s) => Some(s.as_ref()),
            _ => None,
        }
    }
}

/// One strategy's screen, resolved from settings.
#[derive(Debug, Clone)]
pub struct Screen {
    pub strategy: StrategyType,
    pub rule: ScreenRule,
    pub min_listing_days: i64,
    pub risk_free_rate: f64,
    pub entry_detector: DetectorConfig,
}

impl Screen {
    pub fn new(strategy: StrategyType, settings: &ScreenSettings) -> Self {
        let rule = settings.rule(strategy).clone();
        Self {
            strategy,
            entry_detector: DetectorConfig::new(settings.entry_sensitivity, rule.frequency),
            rule,
            min_listing_days: settings.min_listing_days,
            risk_free_rate: settings.risk_free_rate,
        }
    }

    /// Screen one symbol as of `dt`. `bars` is the full loaded history at
    /// the rule's frequency; metrics use its trailing window and the entry
    /// signal uses all of it.
    pub fn evaluate(
        &self,
        dt: NaiveDate,
        info: &StockInfo,
        bars: &[Bar],
    ) -> Result<ScreenVerdict, SeriesError> {
        if let Err(exclusion) = eligibility(info, dt, self.min_listing_days) {
            return Ok(ScreenVerdict::Excluded(exclusion));
        }
        validate_series(&info.code, bars)?;

        let Some(metrics) =
            WindowMetrics::compute(bars, self.rule.window_bars, self.rule.frequency, self.risk_free_rate)
        else {
            return Ok(ScreenVerdict::InsufficientData {
                bars: bars.len(),
                required: self.rule.window_bars,
            });
        };
        if !metrics.is_finite() || !self.rule.passes(metrics.volatility, metrics.sharpe_ratio) {
            return Ok(ScreenVerdict::Rejected(metrics));
        }

        let traces = DetectionMethod::ZigzagAtr.detect(bars, &self.entry_detector)?;
        let signal = EntrySignal::find(bars, &traces);
        let profile = self.profile(info, &metrics, signal.as_ref());
        Ok(ScreenVerdict::Passed(Box::new(ScoredSymbol::new(
            profile,
            Some(metrics.sharpe_ratio),
        ))))
    }

    fn profile(
        &self,
        info: &StockInfo,
        metrics: &WindowMetrics,
        signal: Option<&EntrySignal>,
    ) -> CandidateProfile {
        let mut profile =
            CandidateProfile::new(info.code.clone(), self.rule.frequency, self.rule.window_bars);
        profile.name = info.name.clone();
        profile.market_value = info.market_value;
        profile.market_cap_category = info.market_cap_category();
        profile.ipo_date = info.ipo_date;
        profile.volatility = metrics.volatility;
        profile.sharpe_ratio = metrics.sharpe_ratio;

        let extras = &mut profile.extras;
        extras.insert("annualized_return".into(), metrics.annualized_return.into());
        extras.insert("total_return".into(), metrics.total_return.into());
        if let Some(signal) = signal {
            profile.entry_date = signal.entry_date;
            profile.entry_price = signal.entry_price;
            profile.t2_date = signal.t2_date;
            extras.insert("t1_date".into(), signal.t1_date.to_string().into());
            extras.insert("t1_price".into(), signal.t1_price.into());
            if let Some(price) = signal.t2_price {
                extras.insert("t2_price".into(), price.into());
            }
            if let Some(level) = signal.breakout_level {
                extras.insert("breakout_level".into(), level.into());
            }
            if let Some(wait) = signal.wait_periods {
                extras.insert("wait_periods".into(), wait.into());
            }
        }
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotlab_core::domain::Frequency;

    fn dt() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
    }

    fn info(code: &str, name: &str) -> StockInfo {
        StockInfo {
            code: code.into(),
            name: name.into(),
            market_value: None,
            ipo_date: None,
        }
    }

    /// Weekly bars alternating +up / -down around an upward drift.
    fn zigzag_weekly(n: usize, up: f64, down: f64) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let mut close = 100.0_f64;
        (0..n)
            .map(|i| {
                let open = close;
                close *= if i % 2 == 0 { 1.0 + up } else { 1.0 - down };
                Bar {
                    code: "600000.SH".into(),
                    date: start + chrono::Duration::weeks(i as i64),
                    open,
                    high: open.max(close) * 1.002,
                    low: open.min(close) * 0.998,
                    close,
                    volume: 1_000,
                    frequency: Frequency::Weekly,
                }
            })
            .collect()
    }

    #[test]
    fn parses_market_value_units() {
        assert_eq!(parse_market_value("2.1万亿"), Some(21_000.0));
        assert_eq!(parse_market_value("350亿"), Some(350.0));
        assert_eq!(parse_market_value(" 1,200 亿"), Some(1_200.0));
        assert_eq!(parse_market_value("8000万"), Some(0.8));
        assert_eq!(parse_market_value("25000000000"), Some(250.0));
        assert_eq!(parse_market_value(""), None);
        assert_eq!(parse_market_value("n/a"), None);
    }

    #[test]
    fn categorizes_market_caps() {
        assert_eq!(market_cap_category(500.0), MarketCapCategory::LargeCap);
        assert_eq!(market_cap_category(499.9), MarketCapCategory::MidCap);
        assert_eq!(market_cap_category(100.0), MarketCapCategory::MidCap);
        assert_eq!(market_cap_category(99.0), MarketCapCategory::SmallCap);
    }

    #[test]
    fn eligibility_rules() {
        let d = dt();
        assert_eq!(
            eligibility(&info("600001.SH", "*ST Foo"), d, 365),
            Err(Exclusion::SpecialTreatment)
        );
        assert_eq!(
            eligibility(&info("688001.SH", "Bar-U"), d, 365),
            Err(Exclusion::UnprofitableListing)
        );
        assert_eq!(
            eligibility(&info("00700.HK", "Tencent"), d, 365),
            Err(Exclusion::HongKong)
        );
        assert_eq!(
            eligibility(&info("830001.BJ", "Baz"), d, 365),
            Err(Exclusion::Beijing)
        );

        let mut young = info("600002.SH", "New Co");
        young.ipo_date = Some(d - chrono::Duration::days(100));
        assert_eq!(
            eligibility(&young, d, 365),
            Err(Exclusion::RecentListing { days: 100 })
        );
        young.ipo_date = Some(d - chrono::Duration::days(365));
        assert!(eligibility(&young, d, 365).is_ok());
        assert!(eligibility(&info("600003.SH", "Plain"), d, 365).is_ok());
    }

    #[test]
    fn stock_info_from_universe_entry() {
        let entry = SymbolEntry {
            code: "600519.SH".into(),
            name: None,
            market_value: Some("2.1万亿".into()),
            ipo_date: None,
        };
        let info = StockInfo::from(&entry);
        assert_eq!(info.name, "600519.SH");
        assert_eq!(info.market_cap_category(), Some(MarketCapCategory::LargeCap));
    }

    #[test]
    fn excluded_symbols_skip_metrics() {
        let screen = Screen::new(StrategyType::LongTerm, &ScreenSettings::default());
        // malformed bars are never looked at for an excluded symbol
        let verdict = screen.evaluate(dt(), &info("00700.HK", "Tencent"), &[]).unwrap();
        assert_eq!(verdict, ScreenVerdict::Excluded(Exclusion::HongKong));
    }

    #[test]
    fn short_history_is_insufficient() {
        let screen = Screen::new(StrategyType::LongTerm, &ScreenSettings::default());
        let verdict = screen
            .evaluate(dt(), &info("600000.SH", "Pufa"), &zigzag_weekly(30, 0.05, 0.03))
            .unwrap();
        assert_eq!(verdict, ScreenVerdict::InsufficientData { bars: 30, required: 52 });
    }

    #[test]
    fn malformed_series_is_an_error() {
        let screen = Screen::new(StrategyType::LongTerm, &ScreenSettings::default());
        let mut bars = zigzag_weekly(60, 0.05, 0.03);
        bars[10].date = bars[9].date;
        let err = screen.evaluate(dt(), &info("600000.SH", "Pufa"), &bars).unwrap_err();
        assert!(matches!(err, SeriesError::MalformedSeries { index: 10, .. }));
    }

    #[test]
    fn volatile_uptrend_passes_a_relaxed_rule_with_sharpe_score() {
        let mut settings = ScreenSettings::default();
        settings.long_term.min_volatility = 0.0;
        settings.long_term.max_volatility = None;
        settings.long_term.min_sharpe = 0.0;
        let screen = Screen::new(StrategyType::LongTerm, &settings);

        let bars = zigzag_weekly(80, 0.06, 0.03);
        let verdict = screen.evaluate(dt(), &info("600000.SH", "Pufa"), &bars).unwrap();
        let scored = verdict.passed().expect("relaxed rule passes");
        assert_eq!(scored.score, Some(scored.profile.sharpe_ratio));
        assert!(scored.profile.sharpe_ratio > 0.0);
        assert_eq!(scored.profile.data_frequency, Frequency::Weekly);
        assert_eq!(scored.profile.data_window_days, 52);
        assert!(scored.profile.extras.contains_key("annualized_return"));
    }

    #[test]
    fn flat_series_is_rejected_by_default_rule() {
        let screen = Screen::new(StrategyType::LongTerm, &ScreenSettings::default());
        let bars = zigzag_weekly(60, 0.0, 0.0);
        let verdict = screen.evaluate(dt(), &info("600000.SH", "Pufa"), &bars).unwrap();
        assert!(matches!(verdict, ScreenVerdict::Rejected(m) if m.volatility == 0.0));
    }
}
