//! Ticker universe: the list of instruments a run covers.
//!
//! Stored as TOML:
//!
//! ```toml
//! [[tickers]]
//! symbol = "RELIANCE"
//! token = "2885"
//! ```
//!
//! The instrument master that maps symbols to provider tokens lives outside
//! this crate; the universe file is its exported snapshot.

use crate::domain::{Ticker, TickerError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("read universe file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse universe TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize universe: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid ticker entry: {0}")]
    InvalidTicker(#[from] TickerError),

    #[error("duplicate ticker symbol: {0}")]
    Duplicate(String),

    #[error("unknown ticker symbols: {0:?}")]
    Unknown(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    #[serde(default)]
    pub tickers: Vec<Ticker>,
}

impl Universe {
    pub fn from_file(path: &Path) -> Result<Self, UniverseError> {
        let content = std::fs::read_to_string(path).map_err(|source| UniverseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate: every entry needs a symbol and a token, symbols are unique.
    pub fn from_toml(content: &str) -> Result<Self, UniverseError> {
        let universe: Universe = toml::from_str(content)?;
        let mut seen = HashSet::new();
        for t in &universe.tickers {
            Ticker::new(t.symbol.as_str(), t.token.as_str())?;
            if !seen.insert(t.symbol.as_str()) {
                return Err(UniverseError::Duplicate(t.symbol.clone()));
            }
        }
        Ok(universe)
    }

    pub fn to_toml(&self) -> Result<String, UniverseError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<&Ticker> {
        self.tickers.iter().find(|t| t.symbol == symbol)
    }

    /// The requested subset, in request order. An empty request selects the
    /// whole universe. Matching is exact.
    pub fn select(&self, symbols: &[String]) -> Result<Vec<Ticker>, UniverseError> {
        if symbols.is_empty() {
            return Ok(self.tickers.clone());
        }
        let unknown: Vec<String> = symbols
            .iter()
            .filter(|s| self.get(s).is_none())
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(UniverseError::Unknown(unknown));
        }
        Ok(symbols
            .iter()
            .filter_map(|s| self.get(s).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[tickers]]
symbol = "RELIANCE"
token = "2885"

[[tickers]]
symbol = "INFY"
token = "1594"

[[tickers]]
symbol = "TCS"
token = "11536"
"#;

    #[test]
    fn parses_entries_in_order() {
        let u = Universe::from_toml(SAMPLE).unwrap();
        assert_eq!(u.len(), 3);
        assert_eq!(u.tickers[0].symbol, "RELIANCE");
        assert_eq!(u.get("INFY").unwrap().token, "1594");
    }

    #[test]
    fn select_subset_keeps_request_order() {
        let u = Universe::from_toml(SAMPLE).unwrap();
        let picked = u.select(&["TCS".into(), "RELIANCE".into()]).unwrap();
        let symbols: Vec<&str> = picked.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["TCS", "RELIANCE"]);
        assert_eq!(u.select(&[]).unwrap().len(), 3);
    }

    #[test]
    fn select_is_case_sensitive() {
        let u = Universe::from_toml(SAMPLE).unwrap();
        match u.select(&["infy".into()]) {
            Err(UniverseError::Unknown(missing)) => assert_eq!(missing, vec!["infy"]),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicates_and_blank_tokens() {
        let dup = "[[tickers]]\nsymbol = \"A\"\ntoken = \"1\"\n[[tickers]]\nsymbol = \"A\"\ntoken = \"2\"\n";
        assert!(matches!(Universe::from_toml(dup), Err(UniverseError::Duplicate(_))));

        let blank = "[[tickers]]\nsymbol = \"A\"\ntoken = \"\"\n";
        assert!(matches!(
            Universe::from_toml(blank),
            Err(UniverseError::InvalidTicker(TickerError::EmptyToken(_)))
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let u = Universe::from_toml(SAMPLE).unwrap();
        let again = Universe::from_toml(&u.to_toml().unwrap()).unwrap();
        assert_eq!(u, again);
    }
}
