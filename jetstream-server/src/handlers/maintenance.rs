//! Operational endpoints, outside the Subsonic surface.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::collections::HashMap;
use tracing::error;

use jetstream_core::ids::{self, Identifier};

use super::AppState;

pub async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

/// Integrity sweep over the published tree.
pub async fn scan(State(app): State<AppState>) -> Response {
    match app.sync.maintenance_scan().await {
        Ok((total, corrupt)) => Json(json!({
            "status": "completed",
            "total_files": total,
            "corrupt_deleted": corrupt,
        }))
        .into_response(),
        Err(e) => {
            error!("maintenance scan failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Synchronously sync a whole album: `GET /sync?id=<external album id>`.
pub async fn sync_album(
    State(app): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(id) = params.get("id") else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "id is required" })),
        )
            .into_response();
    };

    let Identifier::External(ext) = ids::decode(id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "id must be an external album id" })),
        )
            .into_response();
    };

    let (album, songs) = match app.gateway.get_album(&ext).await {
        Ok(result) => result,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Failed to fetch album info: {e}") })),
            )
                .into_response()
        }
    };

    app.sync.sync_album(&album, &songs).await;
    Json(json!({ "status": "synced", "id": id })).into_response()
}
