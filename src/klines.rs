use crate::cache::{ResponseCache, cache_key};
use crate::config::{AppConfig, Interval};
use crate::error::{FetchError, PipelineError};
use crate::find_tickers::Symbol;
use crate::signer::{KlineRequest, SignedParams, Signer, canonical_params};
use futures::stream::{self, Stream, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde_json::Value;
use std::num::NonZeroU32;
use tracing::{Instrument, debug, info_span, warn};

pub const KLINE_PATH: &str = "/openApi/spot/v1/market/kline";
pub const API_KEY_HEADER: &str = "X-BX-APIKEY";

/// Signed, rate-limited access to the BingX REST API over one connection pool.
///
/// Every network request first waits for a permit from a token bucket of `R`
/// permits per second. Kline responses may be served from a [`ResponseCache`],
/// in which case no permit is taken.
pub struct ExchangeClient {
    http: Client,
    base_url: String,
    api_key: String,
    signer: Signer,
    limiter: DefaultDirectRateLimiter,
    cache: Option<ResponseCache>,
    cache_include_headers: bool,
}

/// Result of one symbol's kline request.
#[derive(Debug)]
pub struct KlineFetch {
    pub symbol: Symbol,
    pub request: KlineRequest,
    pub result: Result<String, FetchError>,
}

impl ExchangeClient {
    pub fn new(config: &AppConfig, cache: Option<ResponseCache>) -> Result<Self, PipelineError> {
        let signer = Signer::new(&config.exchange.secret_key)?;
        let http = Client::builder()
            .timeout(config.fetch.request_timeout)
            .pool_max_idle_per_host(config.fetch.max_concurrent)
            .build()
            .map_err(PipelineError::HttpClient)?;

        let client = Self::with_parts(
            http,
            &config.exchange.base_url,
            &config.exchange.api_key,
            signer,
            config.fetch.rate_limit_per_second,
        );
        Ok(match cache {
            Some(cache) => client.with_cache(cache, config.cache.include_headers),
            None => client,
        })
    }

    pub fn with_parts(
        http: Client,
        base_url: &str,
        api_key: &str,
        signer: Signer,
        requests_per_second: NonZeroU32,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            signer,
            limiter: RateLimiter::direct(Quota::per_second(requests_per_second)),
            cache: None,
            cache_include_headers: false,
        }
    }

    pub fn with_cache(mut self, cache: ResponseCache, include_headers: bool) -> Self {
        self.cache = Some(cache);
        self.cache_include_headers = include_headers;
        self
    }

    /// Blocks the calling task until a request permit is available.
    pub async fn wait_for_rate_limit(&self) {
        self.limiter.until_ready().await;
    }

    /// Signed `GET {base}{path}?{params}&timestamp=..&signature=..`, returning
    /// the body of a successful (`2xx`, `code == 0`) response.
    ///
    /// The request is signed only once a permit is granted, so the timestamp
    /// is fresh however long the limiter queue is.
    pub async fn get_signed<P: SignedParams + ?Sized>(
        &self,
        path: &str,
        params: &P,
        use_cache: bool,
    ) -> Result<String, FetchError> {
        let cache = self.cache.as_ref().filter(|_| use_cache);
        let key = cache.map(|_| {
            let url = format!("{}{}?{}", self.base_url, path, canonical_params(params));
            let headers = [(API_KEY_HEADER, self.api_key.as_str())];
            cache_key("GET", &url, self.cache_include_headers.then_some(&headers[..]))
        });

        if let (Some(cache), Some(key)) = (cache, key.as_deref()) {
            if let Some(body) = cache.get(key).await? {
                return Ok(body);
            }
        }

        self.wait_for_rate_limit().await;
        let signed = self.signer.sign_now(params);
        let url = format!("{}{}?{}", self.base_url, path, signed.query_string());
        debug!(%path, query = %signed.canonical, "sending request");

        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text().await?;
        check_api_code(&serde_json::from_str(&body)?)?;

        if let (Some(cache), Some(key)) = (cache, key.as_deref()) {
            // A failed store only costs a refetch next run.
            if let Err(error) = cache.put(key, &body).await {
                warn!(%error, "failed to store response in cache");
            }
        }

        Ok(body)
    }

    pub async fn fetch_klines(&self, request: &KlineRequest) -> Result<String, FetchError> {
        self.get_signed(KLINE_PATH, request, true).await
    }

    /// Fetches klines for every symbol with at most `max_concurrent` requests
    /// in flight. Items arrive in completion order, not submission order, and
    /// one symbol's failure never affects the others.
    pub fn fetch_all<'a>(
        &'a self,
        symbols: Vec<Symbol>,
        interval: Interval,
        start_time: i64,
        max_concurrent: usize,
    ) -> impl Stream<Item = KlineFetch> + 'a {
        stream::iter(symbols)
            .map(move |symbol| {
                let request = KlineRequest {
                    symbol: symbol.as_str().to_string(),
                    interval,
                    start_time,
                };
                let span = info_span!("fetch_klines", symbol = %symbol, interval = %interval);
                async move {
                    let result = self.fetch_klines(&request).await;
                    if let Err(error) = &result {
                        debug!(%error, "kline request failed");
                    }
                    KlineFetch {
                        symbol,
                        request,
                        result,
                    }
                }
                .instrument(span)
            })
            .buffer_unordered(max_concurrent.max(1))
    }
}

/// Fails on a non-zero `code`, which BingX sends under HTTP 200.
fn check_api_code(value: &Value) -> Result<(), FetchError> {
    match value.get("code").and_then(Value::as_i64) {
        Some(code) if code != 0 => {
            let msg = value
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Err(FetchError::Api { code, msg })
        }
        _ => Ok(()),
    }
}

/// Checks the `{code, msg, data}` envelope and returns `data`.
pub fn parse_envelope(body: &str) -> Result<Value, FetchError> {
    let mut value: Value = serde_json::from_str(body)?;
    check_api_code(&value)?;

    match value.get_mut("data") {
        Some(data) if !data.is_null() => Ok(data.take()),
        _ => Err(FetchError::MissingField("data")),
    }
}
