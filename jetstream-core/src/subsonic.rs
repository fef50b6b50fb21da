//! Subsonic response model.
//!
//! These types cover the subset of the Subsonic schema the proxy composes
//! itself; everything else is forwarded to the library verbatim. JSON
//! rendering is plain serde; the attribute-shaped XML rendering lives in
//! [`xml`].

use serde::{Deserialize, Serialize};

pub mod xml;

pub const API_VERSION: &str = "1.16.1";
pub const STATUS_OK: &str = "ok";
pub const STATUS_FAILED: &str = "failed";

/// Subsonic error codes.
pub mod codes {
    pub const GENERIC: u32 = 0;
    pub const REQUIRED_PARAMETER: u32 = 10;
    pub const WRONG_USER_PASS: u32 = 40;
    pub const NOT_AUTHORIZED: u32 = 50;
    pub const DATA_NOT_FOUND: u32 = 70;
    /// Subsonic has no dedicated artist code; 70 is reused on purpose.
    pub const ARTIST_NOT_FOUND: u32 = 70;
}

/// Top-level `subsonic-response` payload.
///
/// Exactly one payload field is populated per response; the rest stay
/// `None` and are omitted from both serializations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Response {
    pub status: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_result: Option<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_result2: Option<SearchResult2>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_result3: Option<SearchResult3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlists: Option<Playlists>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist: Option<Playlist>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<ArtistWithAlbums>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<AlbumWithSongs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song: Option<Song>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<Directory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_list2: Option<AlbumList2>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_info: Option<ArtistInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_info2: Option<ArtistInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_info: Option<AlbumInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_info2: Option<AlbumInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similar_artists: Option<SimilarArtists>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similar_artists2: Option<SimilarArtists>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similar_songs: Option<SimilarSongs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similar_songs2: Option<SimilarSongs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_songs: Option<TopSongs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<Lyrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_subsonic_extensions: Option<OpenSubsonicExtensions>,
}

impl Response {
    /// An empty ok-status response.
    pub fn ok() -> Self {
        Self {
            status: STATUS_OK.to_string(),
            version: API_VERSION.to_string(),
            ..Default::default()
        }
    }

    pub fn failed(code: u32, message: &str) -> Self {
        Self {
            status: STATUS_FAILED.to_string(),
            version: API_VERSION.to_string(),
            error: Some(Error {
                code,
                message: message.to_string(),
            }),
            ..Default::default()
        }
    }
}

/// JSON envelope: `{"subsonic-response": {...}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "subsonic-response")]
    pub subsonic_response: Response,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Error {
    pub code: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_art: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Album {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_art: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starred: Option<String>,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Song {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub title: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_art: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub is_video: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starred: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_art: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<Song>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Playlists {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub playlist: Vec<Playlist>,
}

/// `search` (legacy) result: songs only, as `match` children.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchResult {
    #[serde(rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<Song>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchResult2 {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artist: Vec<Artist>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub album: Vec<Album>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub song: Vec<Song>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchResult3 {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artist: Vec<Artist>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub album: Vec<Album>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub song: Vec<Song>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub playlist: Vec<Playlist>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtistWithAlbums {
    #[serde(flatten)]
    pub artist: Artist,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub album: Vec<Album>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbumWithSongs {
    #[serde(flatten)]
    pub album: Album,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub song: Vec<Song>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Directory {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub child: Vec<Song>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbumList2 {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub album: Vec<Album>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArtistInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub biography: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music_brainz_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fm_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlbumInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music_brainz_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fm_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarArtists {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artist: Vec<Artist>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarSongs {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub song: Vec<Song>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopSongs {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub song: Vec<Song>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Lyrics {
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenSubsonicExtensions {
    pub extension: Vec<OpenSubsonicExtension>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenSubsonicExtension {
    pub name: String,
    pub version: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_envelope_shape() {
        let mut resp = Response::ok();
        resp.song = Some(Song {
            id: "ext-p-song-1".to_string(),
            title: "Tune".to_string(),
            ..Default::default()
        });
        let json = serde_json::to_value(Envelope {
            subsonic_response: resp,
        })
        .unwrap();
        assert_eq!(json["subsonic-response"]["status"], "ok");
        assert_eq!(json["subsonic-response"]["version"], API_VERSION);
        assert_eq!(json["subsonic-response"]["song"]["id"], "ext-p-song-1");
        // Unset payloads are omitted entirely.
        assert!(json["subsonic-response"].get("searchResult3").is_none());
    }

    #[test]
    fn error_response_shape() {
        let resp = Response::failed(codes::DATA_NOT_FOUND, "no such song");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["code"], 70);
        assert_eq!(json["error"]["message"], "no such song");
    }

    #[test]
    fn optional_song_fields_are_omitted() {
        let song = Song {
            id: "1".to_string(),
            title: "t".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&song).unwrap();
        assert!(json.get("coverArt").is_none());
        assert!(json.get("duration").is_none());
        assert_eq!(json["isDir"], false);
    }
}
