//! Upstream REST Client
//!
//! Historical bar and instrument catalog lookups against the upstream API
//! with bearer authentication and retry on transient failures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use super::backoff::{Backoff, BackoffConfig};
use super::messages::{BarsResponse, InstrumentsResponse, QUERY_DATE_FORMAT};
use crate::application::ports::{
    InstrumentCatalog, InstrumentPage, MarketDataProvider, ProviderError,
};
use crate::domain::market::{Bar, InstrumentKey, Periodicity, TimeRange};
use crate::infrastructure::config::{ApiToken, RestSettings};

const DATE_RANGE_PATH: &str = "/api/bars/v1/bars/date-range";
const COUNT_BACK_PATH: &str = "/api/bars/v1/bars/count-back";
const INSTRUMENTS_PATH: &str = "/api/instruments/v1/instruments";

/// REST adapter for [`MarketDataProvider`] and [`InstrumentCatalog`].
#[derive(Debug, Clone)]
pub struct RestMarketDataClient {
    client: Client,
    base_url: String,
    token: ApiToken,
    max_attempts: u32,
    backoff: BackoffConfig,
}

impl RestMarketDataClient {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        token: ApiToken,
        settings: &RestSettings,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            max_attempts: settings.max_attempts.max(1),
            backoff: BackoffConfig::from_rest_settings(settings),
        })
    }

    fn base_query(
        key: &InstrumentKey,
        interval: u32,
        periodicity: Periodicity,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("instrumentId", key.instrument_id.to_string()),
            ("provider", key.provider.clone()),
            ("interval", interval.to_string()),
            ("periodicity", periodicity.as_str().to_string()),
        ]
    }

    /// GET `path` with `query`, retrying transient failures.
    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let mut backoff = Backoff::new(self.backoff.clone());
        let mut attempt = 0;

        loop {
            attempt += 1;
            let request: RequestBuilder = self
                .client
                .get(&url)
                .bearer_auth(self.token.expose())
                .query(query);

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let last_error = e.to_string();
                    self.pause_or_give_up(&mut backoff, attempt, None, &last_error)
                        .await?;
                    continue;
                }
            };

            let status = response.status();

            if status.is_success() {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| ProviderError::Network(e.to_string()))?;
                return serde_json::from_slice(&body)
                    .map_err(|e| ProviderError::Decode(e.to_string()));
            }

            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());

            let error_body = response.text().await.unwrap_or_default();

            match categorize_status(status) {
                ErrorCategory::RateLimited => {
                    if attempt >= self.max_attempts {
                        return Err(ProviderError::RateLimited {
                            retry_after_secs: retry_after.unwrap_or(60),
                        });
                    }
                    let last_error = format!("{status}: {error_body}");
                    self.pause_or_give_up(
                        &mut backoff,
                        attempt,
                        retry_after.map(Duration::from_secs),
                        &last_error,
                    )
                    .await?;
                }
                ErrorCategory::Retryable => {
                    let last_error = format!("{status}: {error_body}");
                    self.pause_or_give_up(&mut backoff, attempt, None, &last_error)
                        .await?;
                }
                ErrorCategory::NonRetryable => {
                    tracing::warn!(
                        status = status.as_u16(),
                        path,
                        "Upstream rejected request"
                    );
                    return Err(ProviderError::Api {
                        status: status.as_u16(),
                        message: error_body,
                    });
                }
            }
        }
    }

    /// Sleep before the next attempt, or fail if attempts are exhausted.
    async fn pause_or_give_up(
        &self,
        backoff: &mut Backoff,
        attempt: u32,
        hint: Option<Duration>,
        last_error: &str,
    ) -> Result<(), ProviderError> {
        if attempt >= self.max_attempts {
            tracing::error!(attempts = attempt, error = %last_error, "Upstream request failed");
            return Err(ProviderError::MaxRetriesExceeded {
                attempts: attempt,
                last_error: last_error.to_string(),
            });
        }

        let computed = backoff.next_delay().unwrap_or(self.backoff.max_delay);
        let delay = hint.unwrap_or(computed);
        tracing::warn!(
            error = %last_error,
            delay_ms = delay.as_millis(),
            attempt,
            "Transient upstream error, retrying"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

#[async_trait]
impl MarketDataProvider for RestMarketDataClient {
    async fn get_bars(
        &self,
        key: &InstrumentKey,
        interval: u32,
        periodicity: Periodicity,
        range: TimeRange,
    ) -> Result<Vec<Bar>, ProviderError> {
        let mut query = Self::base_query(key, interval, periodicity);
        query.push(("startDate", range.start.format(QUERY_DATE_FORMAT).to_string()));
        query.push(("endDate", range.end.format(QUERY_DATE_FORMAT).to_string()));

        let response: BarsResponse = self.fetch(DATE_RANGE_PATH, &query).await?;
        tracing::debug!(key = %key, range = %range, bars = response.data.len(), "Fetched bars");

        Ok(response
            .data
            .into_iter()
            .map(|wire| wire.into_bar(key))
            .collect())
    }

    async fn get_latest_bars(
        &self,
        key: &InstrumentKey,
        interval: u32,
        periodicity: Periodicity,
        count: u32,
    ) -> Result<Vec<Bar>, ProviderError> {
        let mut query = Self::base_query(key, interval, periodicity);
        query.push(("barsCount", count.to_string()));

        let response: BarsResponse = self.fetch(COUNT_BACK_PATH, &query).await?;

        Ok(response
            .data
            .into_iter()
            .map(|wire| wire.into_bar(key))
            .collect())
    }
}

#[async_trait]
impl InstrumentCatalog for RestMarketDataClient {
    async fn list_instruments(&self, page: u32) -> Result<InstrumentPage, ProviderError> {
        let query = [("page", page.to_string())];
        let response: InstrumentsResponse = self.fetch(INSTRUMENTS_PATH, &query).await?;
        let page = response.into_page(page);
        tracing::debug!(
            page = page.page,
            pages = page.pages,
            instruments = page.assets.len(),
            "Fetched instrument page"
        );
        Ok(page)
    }
}

/// Error category for determining retry behavior.
enum ErrorCategory {
    RateLimited,
    Retryable,
    NonRetryable,
}

/// Categorize HTTP status code for retry handling.
const fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        408 | 500..=599 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}
