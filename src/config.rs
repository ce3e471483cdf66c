use crate::error::ConfigError;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BINGX_BASE_URL: &str = "https://open-api.bingx.com";
pub const DEFAULT_TELEGRAM_BASE_URL: &str = "https://api.telegram.org";

/// Volume column is reported in base units; the screener works in millions.
pub const DEFAULT_VOLUME_DIVISOR: f64 = 1_000_000.0;

/// Offset applied to exchange timestamps before they are formatted (+03:30).
pub const UTC_OFFSET_SECS: i32 = 3 * 3600 + 30 * 60;

const DEFAULT_RATE_LIMIT_PER_SECOND: u32 = 16;
const DEFAULT_MAX_CONCURRENT: usize = 16;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Candle granularity supported by the screener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    M15,
    H1,
    H4,
    D1,
    W1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M15 => "15m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
            Interval::W1 => "1w",
        }
    }

    /// Number of most recent bars kept after normalization.
    pub fn default_window(&self) -> usize {
        match self {
            Interval::M15 => 288,
            Interval::H1 => 168,
            Interval::H4 => 240,
            Interval::D1 => 30,
            Interval::W1 => 52,
        }
    }

    pub fn bar_length(&self) -> Duration {
        match self {
            Interval::M15 => Duration::from_secs(15 * 60),
            Interval::H1 => Duration::from_secs(3600),
            Interval::H4 => Duration::from_secs(4 * 3600),
            Interval::D1 => Duration::from_secs(24 * 3600),
            Interval::W1 => Duration::from_secs(7 * 24 * 3600),
        }
    }

    /// Cached kline responses live exactly one bar.
    pub fn cache_ttl(&self) -> Duration {
        self.bar_length()
    }

    /// `startTime` for a request issued at `now`: the lookback, floored to a
    /// bar boundary so every run within one bar asks for the same range.
    pub fn start_time(&self, now: DateTime<Utc>) -> i64 {
        let start = (now - self.lookback()).timestamp_millis();
        let bar_ms = i64::try_from(self.bar_length().as_millis()).unwrap_or(i64::MAX);
        start - start.rem_euclid(bar_ms)
    }

    /// How far back the `startTime` of a kline request reaches.
    pub fn lookback(&self) -> TimeDelta {
        match self {
            Interval::M15 => TimeDelta::days(1),
            Interval::H1 => TimeDelta::days(7),
            Interval::H4 => TimeDelta::days(14),
            Interval::D1 => TimeDelta::days(30),
            Interval::W1 => TimeDelta::days(365),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "15m" => Ok(Interval::M15),
            "1h" => Ok(Interval::H1),
            "4h" => Ok(Interval::H4),
            "1d" => Ok(Interval::D1),
            "1w" => Ok(Interval::W1),
            other => Err(format!("unsupported interval `{other}`, expected one of 15m, 1h, 4h, 1d, 1w")),
        }
    }
}

#[derive(Clone)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
}

impl fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct TelegramConfig {
    pub base_url: String,
    pub bot_token: String,
    pub channel_id: String,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("base_url", &self.base_url)
            .field("bot_token", &"<redacted>")
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct KlineConfig {
    pub interval: Interval,
    pub window: usize,     // bars kept after normalization
    pub volume_divisor: f64,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub rate_limit_per_second: NonZeroU32,
    pub max_concurrent: usize,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    /// `None` resolves to `storage/http_cache` next to the binary.
    pub dir: Option<PathBuf>,
    pub include_headers: bool,
}

/// Immutable run configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub telegram: TelegramConfig,
    pub klines: KlineConfig,
    pub fetch: FetchConfig,
    pub cache: CacheConfig,
    pub filters: HashMap<String, String>,
    pub max_symbols: Option<usize>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let exchange = ExchangeConfig {
            base_url: get("BINGX_BASE_URL").unwrap_or_else(|| DEFAULT_BINGX_BASE_URL.to_string()),
            api_key: required("BINGX_API_KEY")?,
            secret_key: required("BINGX_SECRET_KEY")?,
        };

        let telegram = TelegramConfig {
            base_url: get("TELEGRAM_BASE_URL").unwrap_or_else(|| DEFAULT_TELEGRAM_BASE_URL.to_string()),
            bot_token: required("TELEGRAM_BOT_TOKEN")?,
            channel_id: required("TELEGRAM_CHANNEL_ID")?,
        };

        let interval = parse_or("INTERVAL", get("INTERVAL"), Interval::M15)?;
        let window = parse_or("WINDOW_SIZE", get("WINDOW_SIZE"), interval.default_window())?;
        if window < 2 {
            return Err(invalid("WINDOW_SIZE", window.to_string(), "window must hold at least 2 bars"));
        }
        let volume_divisor = parse_or("VOLUME_DIVISOR", get("VOLUME_DIVISOR"), DEFAULT_VOLUME_DIVISOR)?;
        if !(volume_divisor.is_finite() && volume_divisor > 0.0) {
            return Err(invalid("VOLUME_DIVISOR", volume_divisor.to_string(), "divisor must be positive"));
        }

        let rate: u32 = parse_or("RATE_LIMIT_PER_SECOND", get("RATE_LIMIT_PER_SECOND"), DEFAULT_RATE_LIMIT_PER_SECOND)?;
        let rate_limit_per_second = NonZeroU32::new(rate)
            .ok_or_else(|| invalid("RATE_LIMIT_PER_SECOND", rate.to_string(), "rate must be non-zero"))?;
        let max_concurrent: usize = parse_or("MAX_CONCURRENT", get("MAX_CONCURRENT"), DEFAULT_MAX_CONCURRENT)?;
        if max_concurrent == 0 {
            return Err(invalid("MAX_CONCURRENT", "0".to_string(), "must be non-zero"));
        }
        let timeout_secs: u64 = parse_or("REQUEST_TIMEOUT_SECS", get("REQUEST_TIMEOUT_SECS"), DEFAULT_REQUEST_TIMEOUT_SECS)?;

        let cache = CacheConfig {
            enabled: parse_bool("CACHE_ENABLED", get("CACHE_ENABLED"), false)?,
            dir: get("CACHE_DIR").map(PathBuf::from),
            include_headers: parse_bool("CACHE_INCLUDE_HEADERS", get("CACHE_INCLUDE_HEADERS"), false)?,
        };

        let filters = match get("SYMBOL_FILTERS") {
            Some(raw) => parse_filters(&raw)?,
            None => HashMap::new(),
        };
        let max_symbols = get("MAX_SYMBOLS")
            .map(|raw| {
                raw.parse::<usize>()
                    .map_err(|e| invalid("MAX_SYMBOLS", raw.clone(), e.to_string()))
            })
            .transpose()?;

        Ok(Self {
            exchange,
            telegram,
            klines: KlineConfig {
                interval,
                window,
                volume_divisor,
            },
            fetch: FetchConfig {
                rate_limit_per_second,
                max_concurrent,
                request_timeout: Duration::from_secs(timeout_secs),
            },
            cache,
            filters,
            max_symbols,
        })
    }
}

fn invalid(name: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        value,
        reason: reason.into(),
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        Some(value) => value
            .parse::<T>()
            .map_err(|e| invalid(name, value.clone(), e.to_string())),
        None => Ok(default),
    }
}

fn parse_bool(name: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(str::to_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "y" | "on") => Ok(true),
        Some("0" | "false" | "no" | "n" | "off") => Ok(false),
        Some(other) => Err(invalid(name, other.to_string(), "expected a boolean")),
    }
}

// "status=1,apiStateBuy=true" -> {status: 1, apiStateBuy: true}
fn parse_filters(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(invalid("SYMBOL_FILTERS", pair.to_string(), "expected key=value")),
        })
        .collect()
}
