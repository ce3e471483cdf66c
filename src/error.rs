use thiserror::Error;

/// Invalid or missing startup configuration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("secret key is empty, refusing to sign requests")]
    EmptySecret,
}

/// Failure of a single exchange request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("response is missing field `{0}`")]
    MissingField(&'static str),

    #[error("exchange API error (code {code}): {msg}")]
    Api { code: i64, msg: String },

    #[error("response cache error: {0}")]
    Cache(String),
}

/// Failure to turn a raw kline payload into a usable series.
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("insufficient data: got {rows} rows, need at least {required}")]
    InsufficientData { rows: usize, required: usize },

    #[error("malformed kline row {index}: {reason}")]
    MalformedRow { index: usize, reason: String },

    #[error(transparent)]
    Payload(#[from] FetchError),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot render an empty series")]
    EmptySeries,

    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("notification rejected with HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Errors that abort the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to open response cache: {0}")]
    Cache(String),

    #[error("failed to fetch symbol list: {0}")]
    Symbols(#[source] FetchError),

    #[error("run cancelled")]
    Cancelled,
}
