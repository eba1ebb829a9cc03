//! Bar panels: the bar series of a whole universe for one frequency/window.
//!
//! A panel is built once, then shared read-only (`Arc<BarPanel>`) by the
//! detection workers. Series are stored exactly as the source returned them;
//! per-symbol validation happens at detection time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Frequency};

use super::source::{BarSource, DataError};

/// What a panel covers besides its symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PanelSpec {
    pub frequency: Frequency,
    /// Most recent bars kept per symbol; 0 keeps everything.
    pub window_bars: usize,
}

impl PanelSpec {
    pub fn new(frequency: Frequency, window_bars: usize) -> Self {
        Self {
            frequency,
            window_bars,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarPanel {
    pub spec: PanelSpec,
    pub series: BTreeMap<String, Vec<Bar>>,
    /// Codes that could not be loaded, with the reason.
    pub missing: BTreeMap<String, String>,
}

impl BarPanel {
    pub fn new(spec: PanelSpec) -> Self {
        Self {
            spec,
            series: BTreeMap::new(),
            missing: BTreeMap::new(),
        }
    }

    /// Load `codes` one after another from `source`. Failures are recorded in
    /// `missing` rather than returned.
    pub fn load(source: &dyn BarSource, codes: &[String], spec: PanelSpec) -> Self {
        let mut panel = Self::new(spec);
        for code in codes {
            panel.record(code, source.load(code, spec.frequency, spec.window_bars));
        }
        panel
    }

    /// Store one load result.
    pub fn record(&mut self, code: &str, result: Result<Vec<Bar>, DataError>) {
        match result {
            Ok(bars) if bars.is_empty() => {
                self.missing.insert(code.to_string(), "no bars".into());
            }
            Ok(bars) => {
                self.series.insert(code.to_string(), bars);
            }
            Err(e) => {
                self.missing.insert(code.to_string(), e.to_string());
            }
        }
    }

    pub fn get(&self, code: &str) -> Option<&[Bar]> {
        self.series.get(code).map(Vec::as_slice)
    }

    /// Every code the panel knows about, loaded or not, sorted.
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self
            .series
            .keys()
            .chain(self.missing.keys())
            .cloned()
            .collect();
        codes.sort();
        codes.dedup();
        codes
    }

    /// True when the panel accounts for exactly `codes`.
    pub fn covers(&self, codes: &[String]) -> bool {
        let mut wanted = codes.to_vec();
        wanted.sort();
        wanted.dedup();
        self.codes() == wanted
    }

    pub fn bar_count(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    /// blake3 over the canonical JSON of the panel.
    pub fn content_hash(&self) -> String {
        match serde_json::to_vec(self) {
            Ok(bytes) => blake3::hash(&bytes).to_hex().to_string(),
            Err(_) => String::new(),
        }
    }
}
