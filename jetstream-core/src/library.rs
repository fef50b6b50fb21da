//! Server-to-server side channel to the fronted library.
//!
//! The resolver needs to ask the library what it knows about an identifier
//! (stored path, artist, title) using the original client's credentials.
//! Responses are requested as XML regardless of what the client asked for,
//! so decompression and parsing stay uniform, and are decoded into narrow
//! shapes instead of the full Subsonic model.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT_ENCODING, HOST};
use roxmltree::Document;
use thiserror::Error;
use tracing::debug;

const SIDE_CHANNEL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("library unreachable: {0}")]
    Unreachable(String),
    #[error("library response unreadable: {0}")]
    Decode(String),
}

/// The inbound request's credentials and headers, replayed on side-channel
/// queries so the library sees the original client.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub params: HashMap<String, String>,
    pub headers: HeaderMap,
}

impl RequestContext {
    pub fn new(params: HashMap<String, String>, headers: HeaderMap) -> Self {
        Self { params, headers }
    }

    /// Whether the client asked for JSON (`f=json`); XML is the default.
    pub fn wants_json(&self) -> bool {
        self.params.get("f").map(String::as_str) == Some("json")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SongAttrs {
    pub path: String,
    pub artist: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlbumAttrs {
    pub title: String,
    pub artist: String,
}

pub struct LibraryClient {
    base_url: String,
    http: reqwest::Client,
}

impl LibraryClient {
    pub fn new(base_url: &str) -> Result<Self, LibraryError> {
        let http = reqwest::Client::builder()
            .timeout(SIDE_CHANNEL_TIMEOUT)
            .build()
            .map_err(|e| LibraryError::Unreachable(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue a `/rest/<endpoint>.view` query with the caller's credentials,
    /// forcing XML output, and return the raw body.
    async fn query(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
        id: &str,
    ) -> Result<String, LibraryError> {
        let mut params = ctx.params.clone();
        params.insert("id".to_string(), id.to_string());
        params.insert("f".to_string(), "xml".to_string());
        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| LibraryError::Decode(e.to_string()))?;
        let url = format!("{}/rest/{endpoint}.view?{query}", self.base_url);

        let mut headers = ctx.headers.clone();
        // reqwest negotiates its own encoding; the library must not pick
        // one the original client advertised.
        headers.remove(ACCEPT_ENCODING);
        headers.remove(HOST);

        debug!("library side-channel: {endpoint} id={id}");
        let resp = self
            .http
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| LibraryError::Unreachable(e.to_string()))?;

        resp.text()
            .await
            .map_err(|e| LibraryError::Unreachable(e.to_string()))
    }

    /// Fetch a full Subsonic response from the library, XML forced, with
    /// the caller's credentials and query parameters plus `overrides`.
    /// `path` is the request path, e.g. `/rest/search3.view`.
    pub async fn fetch_response(
        &self,
        ctx: &RequestContext,
        path: &str,
        overrides: &[(&str, &str)],
    ) -> Result<crate::subsonic::Response, LibraryError> {
        let mut params = ctx.params.clone();
        params.insert("f".to_string(), "xml".to_string());
        for (key, value) in overrides {
            params.insert((*key).to_string(), (*value).to_string());
        }
        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| LibraryError::Decode(e.to_string()))?;
        let url = format!("{}{path}?{query}", self.base_url);

        let mut headers = ctx.headers.clone();
        headers.remove(ACCEPT_ENCODING);
        headers.remove(HOST);

        debug!("library fetch: {path}");
        let resp = self
            .http
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| LibraryError::Unreachable(e.to_string()))?;
        let body = resp
            .text()
            .await
            .map_err(|e| LibraryError::Unreachable(e.to_string()))?;

        crate::subsonic::xml::from_xml(&body).map_err(|e| LibraryError::Decode(e.to_string()))
    }

    /// Ask the library for a song's stored path and display metadata.
    /// `None` when the library has no such song (or reported no path).
    pub async fn get_song_attrs(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<Option<SongAttrs>, LibraryError> {
        let body = self.query(ctx, "getSong", id).await?;
        parse_song_attrs(&body)
    }

    pub async fn get_album_attrs(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<Option<AlbumAttrs>, LibraryError> {
        let body = self.query(ctx, "getAlbum", id).await?;
        parse_album_attrs(&body)
    }

    pub async fn get_artist_name(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<Option<String>, LibraryError> {
        let body = self.query(ctx, "getArtist", id).await?;
        parse_artist_name(&body)
    }
}

fn parse_song_attrs(xml: &str) -> Result<Option<SongAttrs>, LibraryError> {
    let doc = Document::parse(xml).map_err(|e| LibraryError::Decode(e.to_string()))?;
    let song = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "song");
    Ok(song.and_then(|node| {
        let attrs = SongAttrs {
            path: node.attribute("path").unwrap_or_default().to_string(),
            artist: node.attribute("artist").unwrap_or_default().to_string(),
            title: node.attribute("title").unwrap_or_default().to_string(),
        };
        (!attrs.path.is_empty() || !attrs.title.is_empty()).then_some(attrs)
    }))
}

fn parse_album_attrs(xml: &str) -> Result<Option<AlbumAttrs>, LibraryError> {
    let doc = Document::parse(xml).map_err(|e| LibraryError::Decode(e.to_string()))?;
    let album = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "album");
    Ok(album.and_then(|node| {
        let title = node
            .attribute("name")
            .or_else(|| node.attribute("title"))
            .unwrap_or_default()
            .to_string();
        let artist = node.attribute("artist").unwrap_or_default().to_string();
        (!title.is_empty()).then_some(AlbumAttrs { title, artist })
    }))
}

fn parse_artist_name(xml: &str) -> Result<Option<String>, LibraryError> {
    let doc = Document::parse(xml).map_err(|e| LibraryError::Decode(e.to_string()))?;
    Ok(doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "artist")
        .and_then(|node| node.attribute("name"))
        .filter(|name| !name.is_empty())
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn song_attrs_from_navidrome_xml() {
        let xml = r#"<subsonic-response xmlns="http://subsonic.org/restapi" status="ok" version="1.16.1">
            <song id="x1" title="Tune" artist="Band"
                  path="Band/Record/01 Tune.flac" suffix="flac"/>
        </subsonic-response>"#;
        let attrs = parse_song_attrs(xml).unwrap().unwrap();
        assert_eq!(attrs.path, "Band/Record/01 Tune.flac");
        assert_eq!(attrs.artist, "Band");
        assert_eq!(attrs.title, "Tune");
    }

    #[test]
    fn missing_song_yields_none() {
        let xml = r#"<subsonic-response status="failed" version="1.16.1">
            <error code="70" message="not found"/>
        </subsonic-response>"#;
        assert_eq!(parse_song_attrs(xml).unwrap(), None);
    }

    #[test]
    fn album_attrs_prefer_name() {
        let xml = r#"<subsonic-response status="ok" version="1.16.1">
            <album id="a" name="Blue" artist="Joni" songCount="10"/>
        </subsonic-response>"#;
        let attrs = parse_album_attrs(xml).unwrap().unwrap();
        assert_eq!(attrs.title, "Blue");
        assert_eq!(attrs.artist, "Joni");
    }

    #[test]
    fn artist_name_extraction() {
        let xml = r#"<subsonic-response status="ok" version="1.16.1">
            <artist id="ar" name="Nina Simone" albumCount="12"/>
        </subsonic-response>"#;
        assert_eq!(
            parse_artist_name(xml).unwrap().as_deref(),
            Some("Nina Simone")
        );
        assert_eq!(
            parse_artist_name(r#"<subsonic-response status="ok" version="1"/>"#)
                .unwrap(),
            None
        );
    }

    #[test]
    fn malformed_xml_is_a_decode_error() {
        assert!(parse_song_attrs("{json}").is_err());
    }

    #[test]
    fn format_detection() {
        let mut ctx = RequestContext::default();
        assert!(!ctx.wants_json());
        ctx.params.insert("f".to_string(), "json".to_string());
        assert!(ctx.wants_json());
    }
}
