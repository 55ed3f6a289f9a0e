//! Price query handlers and the shared API error.

use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::AppState;
use crate::application::services::{AssetServiceError, PriceServiceError, RangeRequest};
use crate::domain::market::{InstrumentId, InstrumentKey, Periodicity};
use crate::infrastructure::metrics::{self, RangeOutcome};
use crate::infrastructure::upstream::messages::parse_timestamp;

/// Set to `true` on range responses served without updating the cache.
pub const DEGRADED_HEADER: &str = "x-cache-degraded";

/// Query string of `GET /api/prices/range`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RangeParams {
    instrument_id: InstrumentId,
    provider: String,
    #[serde(default = "default_interval")]
    interval: u32,
    #[serde(default)]
    periodicity: Option<String>,
    start: String,
    #[serde(default)]
    end: Option<String>,
}

const fn default_interval() -> u32 {
    1
}

impl RangeParams {
    fn into_request(self) -> Result<RangeRequest, ApiError> {
        if self.provider.trim().is_empty() {
            return Err(ApiError::BadRequest("provider is required".to_string()));
        }

        let periodicity = match self.periodicity.as_deref() {
            Some(raw) => raw
                .parse::<Periodicity>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
            None => Periodicity::Hour,
        };

        let start = parse_timestamp(&self.start)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid start: {}", self.start)))?;
        let end = self
            .end
            .as_deref()
            .map(|raw| {
                parse_timestamp(raw).ok_or_else(|| ApiError::BadRequest(format!("invalid end: {raw}")))
            })
            .transpose()?;

        Ok(RangeRequest {
            key: InstrumentKey::new(self.instrument_id, self.provider),
            interval: self.interval,
            periodicity,
            start,
            end,
        })
    }
}

/// Query string of `GET /api/prices/current`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CurrentParams {
    instrument_id: InstrumentId,
    provider: String,
}

pub(super) async fn range_handler(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let request = params.into_request().inspect_err(|_| {
        metrics::record_range_request(RangeOutcome::InvalidRange, started.elapsed());
    })?;

    let result = state.prices().get_range(request).await;
    let outcome = match &result {
        Ok(_) => RangeOutcome::Ok,
        Err(PriceServiceError::InvalidRange { .. }) => RangeOutcome::InvalidRange,
        Err(PriceServiceError::UpstreamUnavailable(_)) => RangeOutcome::UpstreamError,
        Err(PriceServiceError::Store(_)) => RangeOutcome::StoreError,
    };
    metrics::record_range_request(outcome, started.elapsed());

    let range = result?;
    metrics::record_gap_fill(range.gaps_fetched, range.bars_fetched, range.degraded);

    let mut response = Json(range.bars).into_response();
    if range.degraded {
        response
            .headers_mut()
            .insert(DEGRADED_HEADER, HeaderValue::from_static("true"));
    }
    Ok(response)
}

pub(super) async fn current_handler(
    State(state): State<AppState>,
    Query(params): Query<CurrentParams>,
) -> Result<Response, ApiError> {
    let key = InstrumentKey::new(params.instrument_id, params.provider);

    match state.prices().get_current(&key).await? {
        Some(bar) => Ok(Json(bar).into_response()),
        None => Err(ApiError::NotFound(format!("no price for {key}"))),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Handler error, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed query.
    #[error("{0}")]
    BadRequest(String),

    /// Nothing known for the requested key.
    #[error("{0}")]
    NotFound(String),

    /// Service failure.
    #[error(transparent)]
    Service(#[from] PriceServiceError),

    /// Asset catalog failure.
    #[error(transparent)]
    Assets(#[from] AssetServiceError),
}

impl ApiError {
    /// Status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Service(PriceServiceError::InvalidRange { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Service(PriceServiceError::UpstreamUnavailable(_))
            | Self::Assets(AssetServiceError::UpstreamUnavailable(_)) => StatusCode::BAD_GATEWAY,
            Self::Service(PriceServiceError::Store(_)) | Self::Assets(AssetServiceError::Store(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{ProviderError, StoreError};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn params(periodicity: Option<&str>, start: &str, end: Option<&str>) -> RangeParams {
        RangeParams {
            instrument_id: Uuid::new_v4(),
            provider: "oanda".to_string(),
            interval: 1,
            periodicity: periodicity.map(str::to_string),
            start: start.to_string(),
            end: end.map(str::to_string),
        }
    }

    #[test]
    fn parses_request() {
        let request = params(Some("Day"), "2024-01-01T00:00:00Z", Some("2024-01-03T00:00:00"))
            .into_request()
            .unwrap();

        assert_eq!(request.periodicity, Periodicity::Day);
        assert_eq!(request.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(
            request.end,
            Some(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn periodicity_defaults_to_hour() {
        let request = params(None, "2024-01-01T00:00:00Z", None)
            .into_request()
            .unwrap();

        assert_eq!(request.periodicity, Periodicity::Hour);
        assert!(request.end.is_none());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            params(Some("fortnight"), "2024-01-01T00:00:00Z", None).into_request(),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            params(None, "yesterday", None).into_request(),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn status_mapping() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            ApiError::from(PriceServiceError::InvalidRange { start: t, end: t }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(PriceServiceError::UpstreamUnavailable(ProviderError::Network(
                "refused".to_string()
            )))
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(PriceServiceError::Store(StoreError::Query("locked".to_string())))
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::NotFound("x".to_string()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(AssetServiceError::UpstreamUnavailable(ProviderError::Api {
                status: 401,
                message: "expired".to_string()
            }))
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(AssetServiceError::Store(StoreError::Connection("gone".to_string())))
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
