//! Last-known top-of-book per symbol.
//!
//! The feed worker is the only writer. Readers always get cloned values, never a
//! reference into the table, so a reader cannot observe a half-written entry.
//! Entries live until their symbol has been outside the desired set for longer
//! than the configured retention (see [`SymbolStateTable::evict_unwanted`]).

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use relay_common::{QuoteUpdate, Result};

struct Entry {
    update: QuoteUpdate,
    unwanted_since: Option<Instant>,
}

/// Symbol -> most recent `QuoteUpdate`, last write wins by arrival order.
#[derive(Default)]
pub struct SymbolStateTable {
    entries: RwLock<HashMap<String, Entry>>,
}

impl SymbolStateTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entry for `update.symbol`.
    pub fn upsert(&self, update: QuoteUpdate) -> Result<()> {
        let mut entries = self.entries.write()?;
        entries.insert(
            update.symbol.clone(),
            Entry {
                update,
                unwanted_since: None,
            },
        );
        Ok(())
    }

    /// Current entries for `symbols`, in symbol order. Unknown symbols are skipped.
    pub fn snapshot(&self, symbols: &BTreeSet<String>) -> Result<Vec<QuoteUpdate>> {
        let entries = self.entries.read()?;
        Ok(symbols
            .iter()
            .filter_map(|symbol| entries.get(symbol))
            .map(|entry| entry.update.clone())
            .collect())
    }

    /// Current entry for one symbol.
    pub fn get(&self, symbol: &str) -> Result<Option<QuoteUpdate>> {
        let entries = self.entries.read()?;
        Ok(entries.get(symbol).map(|entry| entry.update.clone()))
    }

    /// Number of symbols held.
    pub fn len(&self) -> Result<usize> {
        Ok(self.entries.read()?.len())
    }

    /// `true` when no symbol has been seen yet (or all were evicted).
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Sweep: entries outside `desired` start an idle clock; entries idle for at
    /// least `retention` are removed. Returns the evicted symbols.
    pub fn evict_unwanted(
        &self,
        desired: &BTreeSet<String>,
        retention: Duration,
        now: Instant,
    ) -> Result<Vec<String>> {
        let mut entries = self.entries.write()?;
        let mut evicted = Vec::new();
        entries.retain(|symbol, entry| {
            if desired.contains(symbol) {
                entry.unwanted_since = None;
                return true;
            }
            let since = *entry.unwanted_since.get_or_insert(now);
            if now.saturating_duration_since(since) >= retention {
                evicted.push(symbol.clone());
                false
            } else {
                true
            }
        });
        evicted.sort();
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(symbols: &[&str]) -> BTreeSet<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn snapshot_returns_latest_value_and_skips_unknown() {
        let table = SymbolStateTable::new();
        table.upsert(QuoteUpdate::new("ES.FUT", 1, Some(4500.0), None)).unwrap();
        table.upsert(QuoteUpdate::new("NQ.FUT", 2, Some(20000.0), None)).unwrap();
        table.upsert(QuoteUpdate::new("ES.FUT", 3, Some(4500.25), Some(4500.5))).unwrap();

        let snapshot = table.snapshot(&set(&["ES.FUT", "NQ.FUT", "YM.FUT"])).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].symbol, "ES.FUT");
        assert_eq!(snapshot[0].ts_event, 3);
        assert_eq!(snapshot[0].bid_price, Some(4500.25));
        assert_eq!(snapshot[1].symbol, "NQ.FUT");
        assert!(table.get("YM.FUT").unwrap().is_none());
    }

    #[test]
    fn last_write_wins_by_arrival_not_event_time() {
        let table = SymbolStateTable::new();
        table.upsert(QuoteUpdate::new("GC.FUT", 10, Some(2000.0), None)).unwrap();
        table.upsert(QuoteUpdate::new("GC.FUT", 5, Some(1999.9), None)).unwrap();
        assert_eq!(table.get("GC.FUT").unwrap().unwrap().ts_event, 5);
    }

    #[test]
    fn eviction_waits_for_retention_and_spares_desired_symbols() {
        let table = SymbolStateTable::new();
        table.upsert(QuoteUpdate::new("ES.FUT", 1, Some(1.0), None)).unwrap();
        table.upsert(QuoteUpdate::new("CL.FUT", 1, Some(1.0), None)).unwrap();
        let desired = set(&["ES.FUT"]);
        let retention = Duration::from_secs(60);
        let start = Instant::now();

        assert!(table.evict_unwanted(&desired, retention, start).unwrap().is_empty());
        assert!(table
            .evict_unwanted(&desired, retention, start + Duration::from_secs(30))
            .unwrap()
            .is_empty());
        let evicted = table
            .evict_unwanted(&desired, retention, start + Duration::from_secs(61))
            .unwrap();
        assert_eq!(evicted, vec!["CL.FUT".to_string()]);
        assert_eq!(table.len().unwrap(), 1);
    }

    #[test]
    fn fresh_update_restarts_idle_clock() {
        let table = SymbolStateTable::new();
        table.upsert(QuoteUpdate::new("RTY.FUT", 1, Some(1.0), None)).unwrap();
        let retention = Duration::from_secs(10);
        let start = Instant::now();
        table.evict_unwanted(&BTreeSet::new(), retention, start).unwrap();
        table.upsert(QuoteUpdate::new("RTY.FUT", 2, Some(1.0), None)).unwrap();
        let later = start + Duration::from_secs(11);
        assert!(table.evict_unwanted(&BTreeSet::new(), retention, later).unwrap().is_empty());
        assert_eq!(
            table
                .evict_unwanted(&BTreeSet::new(), retention, later + retention)
                .unwrap(),
            vec!["RTY.FUT".to_string()]
        );
    }
}
