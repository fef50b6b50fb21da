//! Stream dispatcher: disk, CDN, or library.
//!
//! A play request resolves its identifier, then prefers a verified local
//! synced copy (served with native Range support), falls back to relaying
//! the catalog CDN stream, and — on the relay path — detaches exactly one
//! background sync so the next play is a disk hit. Identifiers that stay
//! native are the library's business.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::util::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{error, info, warn};

use jetstream_core::gateway::TrackInfo;
use jetstream_core::library::RequestContext;
use jetstream_core::resolver;
use jetstream_core::subsonic::codes;
use jetstream_core::sync;

use super::{context_of, respond_error, AppState};

pub async fn stream(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let Some(id) = ctx.params.get("id").cloned() else {
        return respond_error(&ctx, codes::REQUIRED_PARAMETER, "Missing id parameter");
    };

    // 1. Resolve. Anything not catalog-backed is the library's stream.
    let resolved = resolver::resolve_song_id(
        &app.library,
        &app.gateway,
        &ctx,
        &app.config.music_folder,
        &id,
    )
    .await;
    let Some(ext) = resolved.into_external() else {
        return app.proxy.forward(req).await;
    };
    info!("stream: {id} resolved to {ext}");

    // 2. Entity metadata (cached) drives both the local path and the sync.
    let song = match app.gateway.get_song(&ext).await {
        Ok(song) => song,
        Err(e) => {
            return respond_error(
                &ctx,
                codes::DATA_NOT_FOUND,
                &format!("Failed to resolve song info: {e}"),
            )
        }
    };

    // 3. Serve the synced copy if it exists and holds real audio.
    let range = req.headers().get(header::RANGE).cloned();
    let candidates: Vec<PathBuf> = app
        .sync
        .indexed_path(&ext.to_string())
        .await
        .into_iter()
        .chain(std::iter::once(app.sync.target_path(&song)))
        .collect();
    for path in candidates {
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            continue;
        }
        match sync::verify_integrity(&path).await {
            Ok(_) => {
                info!("stream: serving local file {}", path.display());
                return serve_local(&path, range.as_ref()).await;
            }
            Err(e) => warn!(
                "stream: local file {} failed integrity ({e}), using CDN",
                path.display()
            ),
        }
    }

    // 4. Resolve the CDN location.
    let track = match app.gateway.get_stream_url(&ext).await {
        Ok(track) => track,
        Err(e) => {
            return respond_error(&ctx, codes::GENERIC, &format!("Failed to resolve stream: {e}"))
        }
    };

    // 5. Sync-on-play, detached from this request's lifetime.
    {
        let sync = app.sync.clone();
        let song = song.clone();
        tokio::spawn(async move {
            if let Err(e) = sync.sync_song(&song).await {
                error!("background sync of {} failed: {e}", song.id);
            }
        });
    }

    // 6. Relay the CDN stream.
    let disposition = is_download(req.uri().path())
        .then(|| format!("attachment; filename=\"{ext}.mp3\""));
    relay_remote(&app, &ctx, track, range, disposition).await
}

fn is_download(path: &str) -> bool {
    matches!(
        Path::new(path).file_name().and_then(|n| n.to_str()),
        Some("download") | Some("download.view")
    )
}

/// Serve a published file through the file service, which handles Range
/// natively (206 + Content-Range).
async fn serve_local(path: &Path, range: Option<&HeaderValue>) -> Response {
    let mut file_req = match Request::builder().uri("/").body(Body::empty()) {
        Ok(req) => req,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    if let Some(range) = range {
        file_req.headers_mut().insert(header::RANGE, range.clone());
    }

    match ServeFile::new(path).oneshot(file_req).await {
        Ok(resp) => resp.into_response(),
        Err(e) => {
            error!("file serve for {} failed: {e}", path.display());
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn relay_remote(
    app: &AppState,
    ctx: &RequestContext,
    track: TrackInfo,
    range: Option<HeaderValue>,
    disposition: Option<String>,
) -> Response {
    let mut upstream = app.stream_http.get(&track.download_url);
    if let Some(range) = &range {
        upstream = upstream.header(header::RANGE, range.clone());
    }

    let resp = match upstream.send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!("stream: CDN unreachable: {e}");
            return respond_error(ctx, codes::GENERIC, "Failed to connect to upstream CDN");
        }
    };

    // A Content-Range from upstream means a satisfied range request.
    let content_range = resp.headers().get(header::CONTENT_RANGE).cloned();
    let status = if content_range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mime = if track.mime_type.is_empty() {
        "application/octet-stream"
    } else {
        &track.mime_type
    };

    info!("stream: relaying CDN content ({mime})");
    let mut builder = Response::builder()
        .status(status)
        .header(header::ACCEPT_RANGES, "bytes");
    if let Ok(value) = HeaderValue::from_str(mime) {
        builder = builder.header(header::CONTENT_TYPE, value);
    }
    if let Some(length) = resp.content_length() {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }
    if let Some(content_range) = content_range {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }
    if let Some(disposition) = disposition {
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            builder = builder.header(header::CONTENT_DISPOSITION, value);
        }
    }

    // From here the headers are committed; a mid-stream failure can only
    // be logged by the body stream machinery, not turned into an error
    // response.
    builder
        .body(Body::from_stream(resp.bytes_stream()))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_detection() {
        assert!(is_download("/rest/download"));
        assert!(is_download("/rest/download.view"));
        assert!(!is_download("/rest/stream"));
        assert!(!is_download("/rest/stream.view"));
    }
}
