use crate::error::FetchError;
use crate::filter_utils::matches_filters;
use crate::klines::{ExchangeClient, parse_envelope};
use crate::signer::SymbolsRequest;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::info;

pub const SYMBOLS_PATH: &str = "/openApi/spot/v1/common/symbols";

/// Exchange-assigned trading pair, e.g. `BTC-USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fetches the tradable symbols once per run.
///
/// Every failure is returned to the caller: without a symbol list there is
/// nothing to screen, so the run must stop.
pub async fn fetch_symbols(
    client: &ExchangeClient,
    filters: &HashMap<String, String>,
    max_symbols: Option<usize>,
) -> Result<Vec<Symbol>, FetchError> {
    let body = client
        .get_signed(SYMBOLS_PATH, &SymbolsRequest::default(), false)
        .await?;
    let listed = parse_symbols(&body)?;
    let total = listed.len();

    let mut symbols: Vec<Symbol> = listed
        .into_iter()
        .filter(|(_, entry)| matches_filters(entry, filters))
        .map(|(symbol, _)| symbol)
        .collect();
    if let Some(max) = max_symbols {
        symbols.truncate(max);
    }

    info!(total, selected = symbols.len(), "fetched symbol list");
    Ok(symbols)
}

/// `{code, msg, data: {symbols: [{symbol, ...}, ...]}}` -> symbols in listing order.
pub fn parse_symbols(body: &str) -> Result<Vec<(Symbol, Map<String, Value>)>, FetchError> {
    let data = parse_envelope(body)?;
    let Some(Value::Array(entries)) = data.get("symbols") else {
        return Err(FetchError::MissingField("data.symbols"));
    };

    entries
        .iter()
        .map(|entry| {
            let map = entry
                .as_object()
                .ok_or(FetchError::MissingField("data.symbols[].symbol"))?;
            let symbol = map
                .get("symbol")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or(FetchError::MissingField("data.symbols[].symbol"))?;
            Ok((Symbol::new(symbol), map.clone()))
        })
        .collect()
}
