//! Transparent reverse proxy to the fronted library.
//!
//! Everything the proxy does not handle itself is relayed unchanged:
//! method, query, headers, and streamed bodies in both directions. The
//! `Host` header is rewritten to the library's authority; response bodies
//! are streamed frame by frame so server-sent events pass through.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid library URL: {0}")]
    InvalidUrl(String),
}

/// Hop-by-hop headers that must not be relayed.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub struct LibraryProxy {
    target: Url,
    http: reqwest::Client,
}

impl LibraryProxy {
    pub fn new(library_url: &str) -> Result<Self, ProxyError> {
        let target =
            Url::parse(library_url).map_err(|e| ProxyError::InvalidUrl(e.to_string()))?;
        // No request timeout: streams and long polls flow through here.
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ProxyError::InvalidUrl(e.to_string()))?;
        Ok(Self { target, http })
    }

    /// Relay a request to the library and stream the response back.
    pub async fn forward(&self, req: Request) -> Response {
        let (parts, body) = req.into_parts();

        let mut url = self.target.clone();
        url.set_path(parts.uri.path());
        url.set_query(parts.uri.query());

        let mut headers = parts.headers.clone();
        strip_connection_headers(&mut headers);
        // Dropping Host makes the client derive it from the target URL.
        headers.remove(header::HOST);

        debug!("proxy: {} {}", parts.method, url.path());

        let upstream = self
            .http
            .request(parts.method, url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        let upstream = match upstream {
            Ok(resp) => resp,
            Err(e) => {
                warn!("proxy: library unreachable: {e}");
                return (StatusCode::BAD_GATEWAY, "library unreachable").into_response();
            }
        };

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_connection_headers(&mut headers);

        let mut response = Response::builder().status(status);
        if let Some(h) = response.headers_mut() {
            *h = headers;
        }
        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
    }
}

fn strip_connection_headers(headers: &mut HeaderMap) {
    // Anything listed in Connection is hop-by-hop too.
    let named: Vec<HeaderName> = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .filter_map(|name| name.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();

    for name in HOP_BY_HOP.iter().chain(named.iter()) {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn connection_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("x-custom"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("x-custom", HeaderValue::from_static("1"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        strip_connection_headers(&mut headers);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::TRANSFER_ENCODING).is_none());
        assert!(headers.get("x-custom").is_none());
        assert!(headers.get(header::ACCEPT).is_some());
    }

    #[test]
    fn rejects_bad_library_urls() {
        assert!(LibraryProxy::new("not a url").is_err());
        assert!(LibraryProxy::new("http://navidrome:4533").is_ok());
    }
}
