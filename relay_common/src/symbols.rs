//! Symbol lists and the reference symbol catalog shared between client and server.

use std::collections::BTreeSet;
use std::io::BufRead;

use strum_macros::{Display, EnumIter, EnumString};

use crate::error::RelayError;

/// Longest accepted symbol, in bytes.
pub const MAX_SYMBOL_LEN: usize = 32;

/// Parses a subscription request: symbols separated by commas and/or whitespace.
///
/// Duplicates collapse into one entry. An empty list, or any token that is not a
/// well-formed symbol, rejects the whole request.
pub fn parse_symbol_list(raw: &str) -> Result<BTreeSet<String>, RelayError> {
    let mut symbols = BTreeSet::new();
    for token in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        validate_symbol(token)?;
        symbols.insert(token.to_string());
    }
    if symbols.is_empty() {
        return Err(RelayError::InvalidSubscription(
            "no symbols requested".to_string(),
        ));
    }
    Ok(symbols)
}

/// Checks a single symbol: ASCII alphanumeric start, then alphanumerics or `.` `_` `-` `:` `/`.
pub fn validate_symbol(symbol: &str) -> Result<(), RelayError> {
    let mut chars = symbol.chars();
    let leading_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':' | '/'));
    if symbol.len() > MAX_SYMBOL_LEN || !leading_ok || !rest_ok {
        return Err(RelayError::InvalidSubscription(format!(
            "malformed symbol: {:?}",
            symbol
        )));
    }
    Ok(())
}

/// Trait providing file parsing for symbol lists.
pub trait SymbolParser {
    /// Parses symbols from a buffered reader.
    ///
    /// Lines may hold several symbols separated by commas or spaces; blank lines and
    /// lines starting with `#` are skipped.
    fn parse_from_reader<R: BufRead>(reader: R) -> Result<BTreeSet<String>, RelayError>;
}

impl SymbolParser for BTreeSet<String> {
    fn parse_from_reader<R: BufRead>(reader: R) -> Result<Self, RelayError> {
        let mut joined = String::new();
        for line_result in reader.lines() {
            let line = line_result?;
            let trimmed_line = line.trim();
            if trimmed_line.is_empty() || trimmed_line.starts_with('#') {
                continue;
            }
            joined.push_str(trimmed_line);
            joined.push(',');
        }
        parse_symbol_list(&joined)
    }
}

/// Commonly traded futures offered by the relay.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum CatalogSymbol {
    #[strum(serialize = "ES.FUT")]
    EsFut,
    #[strum(serialize = "NQ.FUT")]
    NqFut,
    #[strum(serialize = "YM.FUT")]
    YmFut,
    #[strum(serialize = "RTY.FUT")]
    RtyFut,
    #[strum(serialize = "GC.FUT")]
    GcFut,
    #[strum(serialize = "CL.FUT")]
    ClFut,
}

impl CatalogSymbol {
    /// Display name of the contract.
    pub fn name(&self) -> &'static str {
        match self {
            CatalogSymbol::EsFut => "E-mini S&P 500",
            CatalogSymbol::NqFut => "E-mini NASDAQ-100",
            CatalogSymbol::YmFut => "E-mini Dow Jones",
            CatalogSymbol::RtyFut => "E-mini Russell 2000",
            CatalogSymbol::GcFut => "Gold Futures",
            CatalogSymbol::ClFut => "Crude Oil Futures",
        }
    }

    /// Rough price level, used to seed simulated quotes.
    pub fn reference_price(&self) -> f64 {
        match self {
            CatalogSymbol::EsFut => 4500.0,
            CatalogSymbol::NqFut => 20000.0,
            CatalogSymbol::YmFut => 38000.0,
            CatalogSymbol::RtyFut => 2000.0,
            CatalogSymbol::GcFut => 2000.0,
            CatalogSymbol::ClFut => 75.0,
        }
    }

    /// Minimum price increment.
    pub fn tick_size(&self) -> f64 {
        match self {
            CatalogSymbol::EsFut | CatalogSymbol::NqFut => 0.25,
            CatalogSymbol::YmFut => 1.0,
            CatalogSymbol::RtyFut => 0.1,
            CatalogSymbol::GcFut => 0.1,
            CatalogSymbol::ClFut => 0.01,
        }
    }
}

/// Rejects any symbol that is not part of [`CatalogSymbol`].
pub fn ensure_in_catalog(symbols: &BTreeSet<String>) -> Result<(), RelayError> {
    let unknown: Vec<&str> = symbols
        .iter()
        .filter(|s| s.parse::<CatalogSymbol>().is_err())
        .map(String::as_str)
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(RelayError::InvalidSubscription(format!(
            "unknown symbols: {}",
            unknown.join(",")
        )))
    }
}
