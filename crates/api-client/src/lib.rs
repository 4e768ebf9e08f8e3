// In crates/api-client/src/lib.rs

use app_config::types::BinanceSettings;
use core_types::{Kline, Symbol};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

pub mod error;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use types::*;

impl ApiClient {
    /// Constructs a new ApiClient from BinanceSettings.
    pub fn new(settings: &BinanceSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder().build()?;
        Ok(ApiClient {
            http_client,
            base_url: settings.rest_base_url.trim_end_matches('/').to_string(),
            page_limit: settings.page_limit.clamp(1, 1500),
        })
    }

    /// Fetches one page of historical kline (candlestick) data.
    ///
    /// This corresponds to the `GET /fapi/v1/klines` endpoint.
    ///
    /// # Arguments
    ///
    /// * `symbol`: The symbol to fetch klines for.
    /// * `interval`: The kline interval (e.g., "1m", "5m", "1h").
    /// * `start_time`: Optional start time in milliseconds.
    /// * `end_time`: Optional end time in milliseconds (inclusive).
    pub async fn get_historical_klines(
        &self,
        symbol: &Symbol,
        interval: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<Kline>> {
        let mut params = format!(
            "symbol={}&interval={}&limit={}",
            symbol.0, interval, self.page_limit
        );
        if let Some(st) = start_time {
            params.push_str(&format!("&startTime={}", st));
        }
        if let Some(et) = end_time {
            params.push_str(&format!("&endTime={}", et));
        }

        let url = format!("{}/fapi/v1/klines?{}", self.base_url, params);
        tracing::debug!(%url, "Requesting klines.");

        let response_body = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(Error::RequestFailed)?
            .text()
            .await
            .map_err(Error::RequestFailed)?;

        parse_klines(symbol, &response_body)
    }
}

// Free function to allow api_client::new usage
pub fn new(settings: &BinanceSettings) -> Result<ApiClient> {
    ApiClient::new(settings)
}

/// Converts a `/fapi/v1/klines` response body into klines for `symbol`.
///
/// A Binance error object (`{"code": .., "msg": ..}`) becomes `Error::ApiError`.
pub fn parse_klines(symbol: &Symbol, body: &str) -> Result<Vec<Kline>> {
    let raw_klines: Vec<RawKline> = serde_json::from_str(body).map_err(|e| {
        // If deserialization fails, it might be a Binance error object.
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            if let Some(code) = value.get("code").and_then(Value::as_i64) {
                let msg = value.get("msg").and_then(Value::as_str).unwrap_or("").to_string();
                return Error::ApiError { code, msg };
            }
        }
        Error::DeserializationFailed(e)
    })?;

    raw_klines
        .into_iter()
        .map(|raw| {
            let open_time = raw.0;
            let decimal = |field: &'static str, value: &str| {
                Decimal::from_str(value).map_err(|_| Error::MalformedKline {
                    field,
                    value: value.to_string(),
                    open_time,
                })
            };
            Ok(Kline {
                symbol: symbol.clone(),
                open_time,
                open: decimal("open", &raw.1)?,
                high: decimal("high", &raw.2)?,
                low: decimal("low", &raw.3)?,
                close: decimal("close", &raw.4)?,
                volume: decimal("volume", &raw.5)?,
                close_time: raw.6,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_kline_page() {
        let body = r#"[
            [1499040000000, "0.01634790", "0.80000000", "0.01575800", "0.01577100",
             "148976.11427815", 1499644799999, "2434.19055334", 308, "1756.87402397",
             "28.46694368", "17928899.62484339"]
        ]"#;
        let klines = parse_klines(&Symbol::from("BTCUSDT"), body).unwrap();

        assert_eq!(klines.len(), 1);
        assert_eq!(klines[0].symbol, Symbol::from("BTCUSDT"));
        assert_eq!(klines[0].open_time, 1499040000000);
        assert_eq!(klines[0].close, dec!(0.01577100));
        assert_eq!(klines[0].close_time, 1499644799999);
    }

    #[test]
    fn surfaces_binance_error_object() {
        let body = r#"{"code": -1121, "msg": "Invalid symbol."}"#;
        match parse_klines(&Symbol::from("NOPE"), body) {
            Err(Error::ApiError { code, msg }) => {
                assert_eq!(code, -1121);
                assert_eq!(msg, "Invalid symbol.");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unparseable_prices() {
        let body = r#"[[1, "x", "1", "1", "1", "1", 2, "0", 0, "0", "0", "0"]]"#;
        assert!(matches!(
            parse_klines(&Symbol::from("BTCUSDT"), body),
            Err(Error::MalformedKline { field: "open", .. })
        ));
    }

    #[test]
    fn empty_page_is_empty() {
        assert!(parse_klines(&Symbol::from("BTCUSDT"), "[]").unwrap().is_empty());
    }
}
