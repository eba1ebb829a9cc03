//! Universe file: the full symbol list plus named selection sets.
//!
//! ```toml
//! [[symbols]]
//! code = "600519.SH"
//! name = "Kweichow Moutai"
//! market_value = "2.1万亿"
//! ipo_date = "2001-08-27"
//!
//! [selections]
//! watchlist = ["600519.SH", "000001.SZ"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::Universe;

/// One symbol with the descriptive fields screens use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Raw market value text, e.g. `"350亿"`.
    #[serde(default)]
    pub market_value: Option<String>,
    #[serde(default)]
    pub ipo_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniverseFile {
    #[serde(default)]
    pub symbols: Vec<SymbolEntry>,
    #[serde(default)]
    pub selections: BTreeMap<String, Vec<String>>,
}

impl UniverseFile {
    /// Load a universe from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("read universe file: {e}"))?;
        Self::from_toml(&content)
    }

    /// Parse a universe from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        let file: Self = toml::from_str(content).map_err(|e| format!("parse universe TOML: {e}"))?;
        for (name, codes) in &file.selections {
            if let Some(unknown) = codes.iter().find(|c| file.symbol(c).is_none()) {
                return Err(format!("selection '{name}' names unknown symbol '{unknown}'"));
            }
        }
        Ok(file)
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("serialize universe: {e}"))
    }

    pub fn symbol(&self, code: &str) -> Option<&SymbolEntry> {
        self.symbols.iter().find(|s| s.code == code)
    }

    /// The full universe.
    pub fn all(&self) -> Universe {
        Universe::all(self.symbols.iter().map(|s| s.code.clone()))
    }

    /// A named selection set.
    pub fn selection(&self, name: &str) -> Option<Universe> {
        self.selections
            .get(name)
            .map(|codes| Universe::selection(name, codes.iter().cloned()))
    }

    pub fn selection_names(&self) -> Vec<&str> {
        self.selections.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[symbols]]
code = "600519.SH"
name = "Kweichow Moutai"
market_value = "2.1万亿"
ipo_date = "2001-08-27"

[[symbols]]
code = "000001.SZ"

[[symbols]]
code = "300750.SZ"
name = "CATL"

[selections]
watchlist = ["600519.SH", "300750.SZ"]
"#;

    #[test]
    fn parses_symbols_and_selections() {
        let u = UniverseFile::from_toml(SAMPLE).unwrap();
        assert_eq!(u.symbols.len(), 3);
        let moutai = u.symbol("600519.SH").unwrap();
        assert_eq!(moutai.market_value.as_deref(), Some("2.1万亿"));
        assert_eq!(moutai.ipo_date, NaiveDate::from_ymd_opt(2001, 8, 27));
        assert!(u.symbol("000001.SZ").unwrap().name.is_none());

        let all = u.all();
        assert!(all.is_full());
        assert_eq!(all.codes().len(), 3);

        let watch = u.selection("watchlist").unwrap();
        assert!(!watch.is_full());
        assert_eq!(watch.label(), "watchlist");
        assert!(u.selection("missing").is_none());
    }

    #[test]
    fn selection_with_unknown_symbol_is_rejected() {
        let bad = "[[symbols]]\ncode = \"A\"\n[selections]\nx = [\"A\", \"B\"]\n";
        let err = UniverseFile::from_toml(bad).unwrap_err();
        assert!(err.contains("'B'"));
    }

    #[test]
    fn toml_roundtrip() {
        let u = UniverseFile::from_toml(SAMPLE).unwrap();
        let again = UniverseFile::from_toml(&u.to_toml().unwrap()).unwrap();
        assert_eq!(u, again);
    }
}
