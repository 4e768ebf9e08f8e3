// In crates/engine/src/source.rs

use api_client::ApiClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Kline, Symbol};
use database::Db;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where an instrument's bar history comes from.
///
/// Returns bars oldest first; an empty history is not an error.
#[async_trait]
pub trait BarSource: Send + Sync {
    /// The kline interval this source serves (e.g. "1h").
    fn interval(&self) -> &str;

    async fn fetch_bars(&self, symbol: &Symbol) -> anyhow::Result<Vec<Kline>>;

    /// The page of bars opening after `after`, or the first page when `None`.
    /// An empty page ends the history.
    ///
    /// Sources that load everything at once serve it as a single page.
    async fn fetch_page(&self, symbol: &Symbol, after: Option<i64>) -> anyhow::Result<Vec<Kline>> {
        match after {
            None => self.fetch_bars(symbol).await,
            Some(_) => Ok(Vec::new()),
        }
    }
}

/// Reads stored klines for a fixed date range.
#[derive(Debug, Clone)]
pub struct DbBarSource {
    db: Db,
    interval: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DbBarSource {
    pub fn new(db: Db, interval: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            db,
            interval: interval.into(),
            start,
            end,
        }
    }
}

#[async_trait]
impl BarSource for DbBarSource {
    fn interval(&self) -> &str {
        &self.interval
    }

    async fn fetch_bars(&self, symbol: &Symbol) -> anyhow::Result<Vec<Kline>> {
        let klines = self
            .db
            .get_klines_by_date_range(symbol, &self.interval, self.start, self.end)
            .await?;
        debug!(symbol = %symbol, count = klines.len(), "Loaded klines from the database.");
        Ok(klines)
    }
}

/// Downloads kline history page by page from the exchange.
#[derive(Debug, Clone)]
pub struct ApiBarSource {
    client: ApiClient,
    interval: String,
    start_time: i64,
    end_time: Option<i64>,
    resume_from: HashMap<Symbol, i64>,
    request_delay: Duration,
    cancel: CancellationToken,
}

impl ApiBarSource {
    pub fn new(
        client: ApiClient,
        interval: impl Into<String>,
        start_time: i64,
        end_time: Option<i64>,
        request_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            interval: interval.into(),
            start_time,
            end_time,
            resume_from: HashMap::new(),
            request_delay,
            cancel,
        }
    }

    /// Per-symbol start times that replace `start_time`, e.g. just past the
    /// newest kline already stored.
    pub fn resume_from(mut self, start_times: HashMap<Symbol, i64>) -> Self {
        self.resume_from = start_times;
        self
    }

    fn start_for(&self, symbol: &Symbol) -> i64 {
        self.resume_from.get(symbol).copied().unwrap_or(self.start_time)
    }
}

#[async_trait]
impl BarSource for ApiBarSource {
    fn interval(&self) -> &str {
        &self.interval
    }

    /// Collects every page until the exchange returns an empty one or the end
    /// time is passed.
    async fn fetch_bars(&self, symbol: &Symbol) -> anyhow::Result<Vec<Kline>> {
        let mut bars = Vec::new();
        let mut after = None;
        loop {
            let page = self.fetch_page(symbol, after).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.open_time);
            bars.extend(page);
        }

        info!(symbol = %symbol, count = bars.len(), interval = %self.interval, "Downloaded kline history.");
        Ok(bars)
    }

    /// Requests are spaced `request_delay` apart. A cancelled download
    /// answers with an empty page so callers keep what they already have.
    async fn fetch_page(&self, symbol: &Symbol, after: Option<i64>) -> anyhow::Result<Vec<Kline>> {
        let cursor = match after {
            None => self.start_for(symbol),
            Some(open_time) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.request_delay) => {}
                }
                open_time + 1
            }
        };
        if self.cancel.is_cancelled() {
            warn!(symbol = %symbol, from = cursor, "Download interrupted; stopping at the current page.");
            return Ok(Vec::new());
        }
        if self.end_time.is_some_and(|end| cursor > end) {
            return Ok(Vec::new());
        }

        let page = self
            .client
            .get_historical_klines(symbol, &self.interval, Some(cursor), self.end_time)
            .await?;
        debug!(symbol = %symbol, count = page.len(), from = cursor, "Received kline page.");
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use app_config::BinanceSettings;

    fn api_source(start_time: i64, end_time: Option<i64>, cancel: CancellationToken) -> ApiBarSource {
        let client = ApiClient::new(&BinanceSettings::default()).unwrap();
        ApiBarSource::new(client, "1m", start_time, end_time, Duration::ZERO, cancel)
    }

    #[test]
    fn resume_points_replace_the_start_time() {
        let source = api_source(1_000, None, CancellationToken::new())
            .resume_from(HashMap::from([(Symbol::from("BTCUSDT"), 5_001)]));

        assert_eq!(source.start_for(&Symbol::from("BTCUSDT")), 5_001);
        assert_eq!(source.start_for(&Symbol::from("ETHUSDT")), 1_000);
    }

    #[tokio::test]
    async fn paging_stops_once_past_the_end_time() {
        let source = api_source(0, Some(10_000), CancellationToken::new());
        let page = source.fetch_page(&Symbol::from("BTCUSDT"), Some(10_000)).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn cancelled_download_answers_with_an_empty_page() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = api_source(0, None, cancel);
        let page = source.fetch_page(&Symbol::from("BTCUSDT"), None).await.unwrap();
        assert!(page.is_empty());
    }
}
