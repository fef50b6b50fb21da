//! Request handlers for the Subsonic surface.
//!
//! Every core-handled endpoint answers in the serialization the client
//! asked for: XML by default, JSON when `f=json`.

pub mod browse;
pub mod maintenance;
pub mod merge;
pub mod stream;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use jetstream_core::config::Config;
use jetstream_core::gateway::GatewayClient;
use jetstream_core::library::{LibraryClient, RequestContext};
use jetstream_core::subsonic::{self, Envelope};
use jetstream_core::sync::SyncService;

use crate::proxy::LibraryProxy;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gateway: Arc<GatewayClient>,
    pub sync: Arc<SyncService>,
    pub library: Arc<LibraryClient>,
    pub proxy: Arc<LibraryProxy>,
    /// Client for relaying CDN audio; deliberately without a total request
    /// timeout so long track streams are not cut off.
    pub stream_http: reqwest::Client,
}

/// Capture the inbound request's query parameters and headers so they can
/// be replayed against the library with the caller's credentials.
pub fn context_of(req: &Request) -> RequestContext {
    let params: HashMap<String, String> =
        serde_urlencoded::from_str(req.uri().query().unwrap_or_default()).unwrap_or_default();
    RequestContext::new(params, req.headers().clone())
}

/// Send a Subsonic response in the client-requested format.
pub fn respond(ctx: &RequestContext, resp: subsonic::Response) -> Response {
    if ctx.wants_json() {
        let envelope = Envelope {
            subsonic_response: resp,
        };
        return axum::Json(envelope).into_response();
    }

    let xml = subsonic::xml::to_xml(&resp);
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        )],
        xml,
    )
        .into_response()
}

/// Send a Subsonic-shaped error (`status=failed`, error code + message).
pub fn respond_error(ctx: &RequestContext, code: u32, message: &str) -> Response {
    respond(ctx, subsonic::Response::failed(code, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn context_captures_query_params() {
        let req = request("/rest/stream?id=ext-p-song-1&u=alice&f=json");
        let ctx = context_of(&req);
        assert_eq!(ctx.params.get("id").map(String::as_str), Some("ext-p-song-1"));
        assert_eq!(ctx.params.get("u").map(String::as_str), Some("alice"));
        assert!(ctx.wants_json());
    }

    #[test]
    fn responds_xml_by_default() {
        let ctx = context_of(&request("/rest/ping"));
        let resp = respond_error(&ctx, 70, "gone");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/xml; charset=utf-8"
        );
    }

    #[test]
    fn responds_json_on_request() {
        let ctx = context_of(&request("/rest/ping?f=json"));
        let resp = respond(&ctx, subsonic::Response::ok());
        let content_type = resp.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("application/json"));
    }
}
