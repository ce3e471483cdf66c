use crate::config::{Interval, KlineConfig, UTC_OFFSET_SECS};
use crate::error::{FetchError, SeriesError};
use crate::find_tickers::Symbol;
use crate::klines::parse_envelope;
use crate::signer::KlineRequest;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Deserializer;
use serde::de::{self, Visitor};
use serde_json::Value;
use std::fmt;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fixed column layout of a BingX kline row.
const KLINE_COLUMNS: &[&str] = &[
    "openTime", "open", "high", "low", "close", "unused", "closeTime", "volume",
];

/// The leading bootstrap candle is dropped and the classifier reads the
/// second-to-last bar, so anything shorter than this is unusable.
pub const MIN_ROWS: usize = 3;

/// One OHLCV candle. Prices are exchange-native; volume is already divided
/// by the configured divisor.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub open_time: DateTime<FixedOffset>,
    pub close_time: DateTime<FixedOffset>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn close_time_label(&self) -> String {
        self.close_time.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Bars of one symbol at one granularity, ascending by close time.
#[derive(Debug, Clone)]
pub struct Series {
    pub symbol: Symbol,
    pub interval: Interval,
    bars: Vec<Bar>,
}

impl Series {
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// The most recent bar known to be closed. The last bar may still be forming.
    pub fn last_closed(&self) -> Option<&Bar> {
        self.bars.len().checked_sub(2).map(|i| &self.bars[i])
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizeSettings {
    pub window: usize,
    pub volume_divisor: f64,
    pub utc_offset: FixedOffset,
}

impl NormalizeSettings {
    pub fn from_config(config: &KlineConfig) -> Self {
        Self {
            window: config.window,
            volume_divisor: config.volume_divisor,
            utc_offset: local_offset(),
        }
    }
}

pub fn local_offset() -> FixedOffset {
    FixedOffset::east_opt(UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Turns a raw kline response into a [`Series`]: rows are sorted by close
/// time, the partial leading candle is dropped and only the trailing
/// `window` bars are kept.
pub fn normalize(
    body: &str,
    request: &KlineRequest,
    settings: &NormalizeSettings,
) -> Result<Series, SeriesError> {
    let data = match parse_envelope(body) {
        // An absent or null `data` is an empty series, not a broken one.
        Err(FetchError::MissingField(_)) => {
            return Err(SeriesError::InsufficientData {
                rows: 0,
                required: MIN_ROWS,
            });
        }
        data => data?,
    };
    let rows = data.as_array().ok_or(FetchError::MissingField("data[]"))?;

    if rows.len() < MIN_ROWS {
        return Err(SeriesError::InsufficientData {
            rows: rows.len(),
            required: MIN_ROWS,
        });
    }

    let mut bars = rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            parse_row(row, settings).map_err(|reason| SeriesError::MalformedRow { index, reason })
        })
        .collect::<Result<Vec<_>, _>>()?;

    bars.sort_by_key(|bar| bar.close_time);
    bars.remove(0);
    if bars.len() > settings.window {
        bars.drain(..bars.len() - settings.window);
    }

    Ok(Series {
        symbol: Symbol::new(request.symbol.clone()),
        interval: request.interval,
        bars,
    })
}

fn parse_row(row: &Value, settings: &NormalizeSettings) -> Result<Bar, String> {
    let cells = row.as_array().ok_or("row is not an array")?;
    if cells.len() < KLINE_COLUMNS.len() {
        return Err(format!(
            "expected {} columns, got {}",
            KLINE_COLUMNS.len(),
            cells.len()
        ));
    }

    let number = |column: usize| -> Result<f64, String> {
        let value = deserialize_f64_lenient(&cells[column])
            .map_err(|e| format!("{}: {e}", KLINE_COLUMNS[column]))?;
        value
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("{}: missing or non-finite value", KLINE_COLUMNS[column]))
    };
    let timestamp = |column: usize| -> Result<DateTime<FixedOffset>, String> {
        let millis = number(column)? as i64;
        DateTime::from_timestamp_millis(millis)
            .map(|utc| utc.with_timezone(&settings.utc_offset))
            .ok_or_else(|| format!("{}: timestamp {millis} out of range", KLINE_COLUMNS[column]))
    };

    Ok(Bar {
        open_time: timestamp(0)?,
        open: number(1)?,
        high: number(2)?,
        low: number(3)?,
        close: number(4)?,
        close_time: timestamp(6)?,
        volume: number(7)? / settings.volume_divisor,
    })
}

// BingX sends prices as numbers on some endpoints and as strings on others.
struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}
