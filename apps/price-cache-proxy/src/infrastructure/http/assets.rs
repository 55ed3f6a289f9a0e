//! Asset catalog handler.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::domain::asset::Asset;
use crate::infrastructure::metrics;

/// Query string of `GET /api/assets`.
#[derive(Debug, Default, Deserialize)]
pub(super) struct AssetParams {
    #[serde(default)]
    refresh: bool,
}

pub(super) async fn assets_handler(
    State(state): State<AppState>,
    Query(params): Query<AssetParams>,
) -> Result<Json<Vec<Asset>>, ApiError> {
    if !params.refresh {
        return Ok(Json(state.assets().list().await?));
    }

    let before = state.assets().list().await?.len();
    let synced = state.assets().sync().await;
    metrics::record_asset_sync(
        synced
            .as_ref()
            .ok()
            .map(|assets| assets.len().saturating_sub(before)),
    );
    Ok(Json(synced?))
}
