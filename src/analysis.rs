//! The screening pipeline: symbols -> klines -> series -> pinbar -> alert.

use crate::bars::{NormalizeSettings, Series, normalize};
use crate::chart::ChartRenderer;
use crate::config::{AppConfig, Interval};
use crate::error::{PipelineError, SeriesError};
use crate::find_tickers::{Symbol, fetch_symbols};
use crate::klines::{ExchangeClient, KlineFetch};
use crate::notifier::Notifier;
use crate::pinbar::is_pinbar;
use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::pin::pin;
use tracing::{error, info, warn};

/// What happened to one symbol during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    NoSignal { close_time: String },
    Signal { close_time: String, notified: bool },
    /// Not enough data to classify.
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolOutcome {
    pub symbol: Symbol,
    pub outcome: Outcome,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub interval: Interval,
    /// In completion order.
    pub outcomes: Vec<SymbolOutcome>,
}

impl RunReport {
    pub fn signals(&self) -> impl Iterator<Item = &SymbolOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Signal { .. }))
    }

    pub fn failures(&self) -> impl Iterator<Item = &SymbolOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed(_)))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &SymbolOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Skipped(_)))
    }
}

pub fn alert_caption(symbol: &Symbol, interval: Interval, close_time: &str) -> String {
    format!("Pinbar detected on {symbol} {interval} timeframe at {close_time}")
}

/// Runs one screening pass over every listed symbol.
///
/// Only configuration and symbol-list failures abort the run. Anything that
/// goes wrong for a single symbol is recorded in its [`Outcome`] and the
/// remaining symbols carry on.
pub async fn run_analysis_pipeline<R, N>(
    config: &AppConfig,
    client: &ExchangeClient,
    renderer: &R,
    notifier: &N,
) -> Result<RunReport, PipelineError>
where
    R: ChartRenderer + Clone + Send + 'static,
    N: Notifier,
{
    let interval = config.klines.interval;
    let symbols = fetch_symbols(client, &config.filters, config.max_symbols)
        .await
        .map_err(PipelineError::Symbols)?;

    let start_time = interval.start_time(Utc::now());
    let settings = NormalizeSettings::from_config(&config.klines);
    let total = symbols.len();
    info!(symbols = total, %interval, start_time, "screening symbols");

    let mut fetches = pin!(client.fetch_all(symbols, interval, start_time, config.fetch.max_concurrent));
    let mut alerts = FuturesUnordered::new();
    let mut outcomes = Vec::with_capacity(total);
    let mut done = 0;
    let mut fetching = true;

    // Alerts are driven next to the fetch stream, so in-flight requests keep
    // being polled while a chart renders or Telegram is slow.
    loop {
        tokio::select! {
            next = fetches.next(), if fetching => match next {
                Some(fetch) => {
                    done += 1;
                    if progress_due(done, total) {
                        info!(done, total, "klines fetched");
                    }
                    match classify(fetch, &settings) {
                        Classified::Done(outcome) => outcomes.push(outcome),
                        Classified::Alert(alert) => alerts.push(deliver(alert, renderer, notifier)),
                    }
                }
                None => fetching = false,
            },
            Some(outcome) = alerts.next(), if !alerts.is_empty() => outcomes.push(outcome),
            else => break,
        }
    }

    Ok(RunReport { interval, outcomes })
}

/// Roughly every tenth of the run, and at the end.
fn progress_due(done: usize, total: usize) -> bool {
    done == total || done % (total / 10).max(1) == 0
}

struct Alert {
    series: Series,
    close_time: String,
    caption: String,
}

enum Classified {
    Done(SymbolOutcome),
    Alert(Alert),
}

fn classify(fetch: KlineFetch, settings: &NormalizeSettings) -> Classified {
    let KlineFetch {
        symbol,
        request,
        result,
    } = fetch;
    let done = |symbol: Symbol, outcome: Outcome| Classified::Done(SymbolOutcome { symbol, outcome });

    let body = match result {
        Ok(body) => body,
        Err(error) => {
            warn!(%symbol, %error, "kline fetch failed");
            return done(symbol, Outcome::Failed(error.to_string()));
        }
    };

    let series = match normalize(&body, &request, settings) {
        Ok(series) => series,
        Err(error @ SeriesError::InsufficientData { .. }) => {
            warn!(%symbol, %error, "skipping symbol");
            return done(symbol, Outcome::Skipped(error.to_string()));
        }
        Err(error) => {
            warn!(%symbol, %error, "kline payload rejected");
            return done(symbol, Outcome::Failed(error.to_string()));
        }
    };

    let Some(bar) = series.last_closed() else {
        return done(symbol, Outcome::Skipped("no closed bar in window".to_string()));
    };
    let close_time = bar.close_time_label();

    if !is_pinbar(bar) {
        return done(symbol, Outcome::NoSignal { close_time });
    }

    info!(%symbol, %close_time, "pinbar detected");
    Classified::Alert(Alert {
        caption: alert_caption(&symbol, series.interval, &close_time),
        close_time,
        series,
    })
}

/// Renders the chart on the blocking pool, then sends it.
async fn deliver<R, N>(alert: Alert, renderer: &R, notifier: &N) -> SymbolOutcome
where
    R: ChartRenderer + Clone + Send + 'static,
    N: Notifier,
{
    let Alert {
        series,
        close_time,
        caption,
    } = alert;
    let symbol = series.symbol.clone();

    let renderer = renderer.clone();
    let rendered = tokio::task::spawn_blocking(move || renderer.render(&series)).await;

    let notified = match rendered {
        Ok(Ok(png)) => match notifier.send_photo(&caption, png).await {
            Ok(()) => true,
            Err(error) => {
                warn!(%symbol, %error, "alert not delivered");
                false
            }
        },
        Ok(Err(error)) => {
            error!(%symbol, %error, "chart rendering failed");
            false
        }
        Err(error) => {
            error!(%symbol, %error, "chart rendering task failed");
            false
        }
    };

    SymbolOutcome {
        symbol,
        outcome: Outcome::Signal {
            close_time,
            notified,
        },
    }
}
