//! Decodes raw vendor records into canonical `QuoteUpdate`s.
//!
//! Top-of-book records (`MBP1Msg`, `MBPMsg`, `TradeMsg`) carry their prices in
//! `levels[0]`. Records that only name an `instrument_id` are resolved through the
//! `SymbolMappingMsg` records seen earlier on the same connection. Anything that
//! cannot be decoded is dropped and logged at debug level: malformed ticks are
//! normal on a live feed and never stop it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::debug;
use relay_common::QuoteUpdate;
use serde_json::Value;
use strum_macros::{Display, EnumString};

use crate::feed::RawEvent;

/// Raw prices above this are 1e-9 fixed-point integers.
pub const FIXED_POINT_THRESHOLD: f64 = 1_000_000.0;
/// Divisor for fixed-point prices.
pub const FIXED_PRICE_SCALE: f64 = 1e9;
/// Vendor sentinel for "no price on this side".
pub const UNDEF_PRICE: i64 = i64::MAX;

/// Record types the normalizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum RecordKind {
    /// Associates an `instrument_id` with the requested symbol.
    #[strum(serialize = "SymbolMappingMsg")]
    SymbolMapping,
    /// Market by price, top level only.
    #[strum(serialize = "MBP1Msg")]
    Mbp1,
    /// Market by price.
    #[strum(serialize = "MBPMsg")]
    Mbp,
    /// Trade with the book state attached.
    #[strum(serialize = "TradeMsg")]
    Trade,
}

/// Stateful decoder; the only state is the instrument-id-to-symbol map.
#[derive(Debug, Default)]
pub struct QuoteNormalizer {
    instruments: HashMap<u64, String>,
}

impl QuoteNormalizer {
    /// Creates a normalizer with an empty instrument map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all instrument mappings. Called when a new connection starts.
    pub fn reset(&mut self) {
        self.instruments.clear();
    }

    /// Symbol currently mapped to `instrument_id`.
    pub fn instrument_symbol(&self, instrument_id: u64) -> Option<&str> {
        self.instruments.get(&instrument_id).map(String::as_str)
    }

    /// Decode `raw`, stamping it as received now.
    pub fn normalize(&mut self, raw: &RawEvent) -> Option<QuoteUpdate> {
        self.normalize_at(raw, Utc::now())
    }

    /// Decode `raw` with an explicit reception time.
    pub fn normalize_at(&mut self, raw: &RawEvent, received_at: DateTime<Utc>) -> Option<QuoteUpdate> {
        let Ok(kind) = raw.record_type.parse::<RecordKind>() else {
            debug!("Skipping unhandled record type {}", raw.record_type);
            return None;
        };

        if kind == RecordKind::SymbolMapping {
            self.record_mapping(&raw.body);
            return None;
        }

        match self.decode_quote(&raw.body, received_at) {
            Ok(update) => Some(update),
            Err(reason) => {
                debug!("Discarding {} record: {}", kind, reason);
                None
            }
        }
    }

    fn record_mapping(&mut self, body: &Value) {
        let instrument_id = instrument_id(body);
        let symbol = body
            .get("stype_in_symbol")
            .and_then(Value::as_str)
            .or_else(|| body.get("stype_out_symbol").and_then(Value::as_str))
            .filter(|s| !s.is_empty());

        match (instrument_id, symbol) {
            (Some(id), Some(symbol)) => {
                debug!("Symbol mapping: {} -> {}", id, symbol);
                self.instruments.insert(id, symbol.to_string());
            }
            _ => debug!("Ignoring incomplete symbol mapping: {}", body),
        }
    }

    fn decode_quote(&self, body: &Value, received_at: DateTime<Utc>) -> Result<QuoteUpdate, String> {
        let symbol = self.resolve_symbol(body)?;
        let ts_event = match header_field(body, "ts_event") {
            None | Some(Value::Null) => received_at.timestamp_nanos_opt().unwrap_or_default().max(0) as u64,
            Some(value) => parse_u64(value).ok_or_else(|| format!("non-numeric ts_event {}", value))?,
        };

        let level = body
            .get("levels")
            .and_then(Value::as_array)
            .and_then(|levels| levels.first());
        let field = |name: &str| level.and_then(|l| l.get(name));

        let update = QuoteUpdate {
            symbol,
            ts_event,
            bid_price: parse_price(field("bid_px"))?,
            ask_price: parse_price(field("ask_px"))?,
            bid_size: parse_size(field("bid_sz"))?,
            ask_size: parse_size(field("ask_sz"))?,
            received_at,
        };

        if !update.has_price() {
            return Err(format!("no price on either side for {}", update.symbol));
        }
        Ok(update)
    }

    fn resolve_symbol(&self, body: &Value) -> Result<String, String> {
        if let Some(symbol) = body.get("symbol").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            return Ok(symbol.to_string());
        }
        match instrument_id(body) {
            Some(id) => self
                .instruments
                .get(&id)
                .cloned()
                .ok_or_else(|| format!("unmapped instrument_id {}", id)),
            None => Err("missing symbol".to_string()),
        }
    }
}

/// Looks up `name` on the record, falling back to its `hd` header.
fn header_field<'a>(body: &'a Value, name: &str) -> Option<&'a Value> {
    body.get(name)
        .or_else(|| body.get("hd").and_then(|hd| hd.get(name)))
}

fn instrument_id(body: &Value) -> Option<u64> {
    header_field(body, "instrument_id").and_then(parse_u64)
}

fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_price(value: Option<&Value>) -> Result<Option<f64>, String> {
    let number = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n,
        Some(other) => return Err(format!("non-numeric price {}", other)),
    };
    if number.as_i64() == Some(UNDEF_PRICE) {
        return Ok(None);
    }
    let raw = number
        .as_f64()
        .filter(|p| p.is_finite())
        .ok_or_else(|| format!("unrepresentable price {}", number))?;
    if raw > FIXED_POINT_THRESHOLD {
        Ok(Some(raw / FIXED_PRICE_SCALE))
    } else {
        Ok(Some(raw))
    }
}

fn parse_size(value: Option<&Value>) -> Result<Option<u32>, String> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(0) => Ok(None),
            Some(size) => u32::try_from(size)
                .map(Some)
                .map_err(|_| format!("size out of range {}", size)),
            None => Err(format!("non-integer size {}", n)),
        },
        Some(other) => Err(format!("non-numeric size {}", other)),
    }
}
