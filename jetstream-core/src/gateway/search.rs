//! Catalog search.
//!
//! One search fans out four kind-specific queries in parallel against the
//! same endpoint. A failing kind is logged and omitted rather than failing
//! the search; only a fully successful sweep is cached. Endpoints disagree
//! on where the song list lives (`items`, `tracks.items`, `songs.items`),
//! so all three shapes are accepted and the first non-empty one wins.

use serde::Deserialize;
use tracing::warn;

use super::metadata::{
    ext_album_id, ext_artist_id, ext_playlist_id, map_track, year_of, GwItems, GwTrack,
};
use super::{GatewayClient, GatewayError};
use crate::cache;
use crate::ids::{self, ExternalId, Identifier};
use crate::subsonic::{Album, Artist, Playlist, SearchResult3, Song};

fn query_escape(q: &str) -> String {
    url::form_urlencoded::byte_serialize(q.as_bytes()).collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SongSearchEnvelope {
    data: SongSearchData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SongSearchData {
    items: Vec<GwTrack>,
    tracks: Option<GwItems<GwTrack>>,
    songs: Option<GwItems<GwTrack>>,
}

impl SongSearchData {
    /// First non-empty of the three observed response shapes.
    fn into_tracks(self) -> Vec<GwTrack> {
        let alternates = [
            self.items,
            self.tracks.map(|t| t.items).unwrap_or_default(),
            self.songs.map(|t| t.items).unwrap_or_default(),
        ];
        alternates
            .into_iter()
            .find(|items| !items.is_empty())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AlbumSearchEnvelope {
    data: AlbumSearchData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AlbumSearchData {
    albums: GwItems<GwSearchAlbum>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GwSearchAlbum {
    id: i64,
    title: String,
    release_date: String,
    artists: Vec<GwSearchArtist>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArtistSearchEnvelope {
    data: ArtistSearchData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArtistSearchData {
    artists: GwItems<GwSearchArtist>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GwSearchArtist {
    id: i64,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlaylistSearchEnvelope {
    data: PlaylistSearchData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlaylistSearchData {
    playlists: GwItems<GwSearchPlaylist>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GwSearchPlaylist {
    uuid: String,
    title: String,
    number_of_tracks: u32,
    duration: u32,
    created: String,
}

impl GatewayClient {
    /// Search the catalog across all four entity kinds.
    pub async fn search(&self, query: &str) -> Result<SearchResult3, GatewayError> {
        let cache_key = format!("search:{query}");
        if let Some(result) = self.cache().get_json::<SearchResult3>(&cache_key).await {
            return Ok(result);
        }

        let (result, complete) = self
            .try_with_fallback("search", |base| async move {
                let escaped = query_escape(query);
                let joined = tokio::join!(
                    self.fetch_search_songs(&base, &escaped),
                    self.fetch_search_albums(&base, &escaped),
                    self.fetch_search_artists(&base, &escaped),
                    self.fetch_search_playlists(&base, &escaped),
                );

                match joined {
                    // A single surviving kind is a usable search; only a
                    // clean sweep across all four rotates the endpoint.
                    (Err(e), Err(_), Err(_), Err(_)) => Err(e),
                    (songs, albums, artists, playlists) => {
                        let complete = songs.is_ok()
                            && albums.is_ok()
                            && artists.is_ok()
                            && playlists.is_ok();
                        Ok((
                            SearchResult3 {
                                song: or_empty("song", songs),
                                album: or_empty("album", albums),
                                artist: or_empty("artist", artists),
                                playlist: or_empty("playlist", playlists),
                            },
                            complete,
                        ))
                    }
                }
            })
            .await?;

        // Partial sweeps are served but never cached.
        if complete {
            self.cache()
                .put_json(&cache_key, &result, cache::SEARCH_TTL)
                .await;
        }
        Ok(result)
    }

    /// Find the catalog song best matching an artist + title pair. The
    /// first result wins.
    pub async fn search_one(&self, artist: &str, title: &str) -> Result<ExternalId, GatewayError> {
        let result = self.search(&format!("{artist} {title}")).await?;
        first_external(result.song.first().map(|s| s.id.as_str()))
    }

    pub async fn search_one_artist(&self, name: &str) -> Result<ExternalId, GatewayError> {
        let result = self.search(name).await?;
        first_external(result.artist.first().map(|a| a.id.as_str()))
    }

    pub async fn search_one_album(
        &self,
        artist: &str,
        title: &str,
    ) -> Result<ExternalId, GatewayError> {
        let result = self.search(&format!("{artist} {title}")).await?;
        first_external(result.album.first().map(|a| a.id.as_str()))
    }

    /// Top songs for an artist, derived from a song search on the name.
    pub async fn get_top_songs(&self, artist: &str, count: usize) -> Result<Vec<Song>, GatewayError> {
        let mut songs = self.search(artist).await?.song;
        songs.truncate(count);
        Ok(songs)
    }

    async fn fetch_search_songs(
        &self,
        base: &str,
        escaped: &str,
    ) -> Result<Vec<Song>, GatewayError> {
        let envelope: SongSearchEnvelope =
            self.get_json(&format!("{base}/search/?s={escaped}")).await?;
        Ok(envelope
            .data
            .into_tracks()
            .iter()
            .take(self.search_limit())
            .map(|t| {
                let mut song = map_track(t);
                song.bit_rate = Some(320);
                song
            })
            .collect())
    }

    async fn fetch_search_albums(
        &self,
        base: &str,
        escaped: &str,
    ) -> Result<Vec<Album>, GatewayError> {
        let envelope: AlbumSearchEnvelope = self
            .get_json(&format!("{base}/search/?al={escaped}"))
            .await?;
        Ok(envelope
            .data
            .albums
            .items
            .iter()
            .take(self.search_limit())
            .map(|item| {
                let album_id = ext_album_id(item.id);
                let (artist_name, artist_id) = item
                    .artists
                    .first()
                    .map(|a| (a.name.clone(), a.id))
                    .unwrap_or_default();
                Album {
                    id: album_id.clone(),
                    title: item.title.clone(),
                    name: Some(item.title.clone()),
                    artist: Some(artist_name),
                    artist_id: Some(ext_artist_id(artist_id)),
                    year: year_of(&item.release_date),
                    cover_art: Some(album_id),
                    ..Default::default()
                }
            })
            .collect())
    }

    async fn fetch_search_artists(
        &self,
        base: &str,
        escaped: &str,
    ) -> Result<Vec<Artist>, GatewayError> {
        let envelope: ArtistSearchEnvelope =
            self.get_json(&format!("{base}/search/?a={escaped}")).await?;
        Ok(envelope
            .data
            .artists
            .items
            .iter()
            .take(self.search_limit())
            .map(|item| {
                let artist_id = ext_artist_id(item.id);
                Artist {
                    id: artist_id.clone(),
                    name: item.name.clone(),
                    cover_art: Some(artist_id),
                    ..Default::default()
                }
            })
            .collect())
    }

    async fn fetch_search_playlists(
        &self,
        base: &str,
        escaped: &str,
    ) -> Result<Vec<Playlist>, GatewayError> {
        let envelope: PlaylistSearchEnvelope =
            self.get_json(&format!("{base}/search/?p={escaped}")).await?;
        Ok(envelope
            .data
            .playlists
            .items
            .iter()
            .take(self.search_limit())
            .map(|item| {
                let playlist_id = ext_playlist_id(&item.uuid);
                Playlist {
                    id: playlist_id.clone(),
                    name: item.title.clone(),
                    song_count: Some(item.number_of_tracks),
                    duration: Some(item.duration),
                    created: Some(item.created.clone()).filter(|c| !c.is_empty()),
                    cover_art: Some(playlist_id),
                    owner: Some("Tidal".to_string()),
                    public: Some(true),
                    ..Default::default()
                }
            })
            .collect())
    }
}

fn or_empty<T>(kind: &str, result: Result<Vec<T>, GatewayError>) -> Vec<T> {
    match result {
        Ok(items) => items,
        Err(e) => {
            warn!("search: {kind} lookup failed, omitting: {e}");
            Vec::new()
        }
    }
}

fn first_external(id: Option<&str>) -> Result<ExternalId, GatewayError> {
    match id.map(ids::decode) {
        Some(Identifier::External(ext)) => Ok(ext),
        _ => Err(GatewayError::NotFound("no matches found".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn song_shape_items_wins_when_present() {
        let raw = r#"{"data":{"items":[{"id":1,"title":"a"}],"tracks":{"items":[{"id":2,"title":"b"}]}}}"#;
        let envelope: SongSearchEnvelope = serde_json::from_str(raw).unwrap();
        let tracks = envelope.data.into_tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, 1);
    }

    #[test]
    fn song_shape_falls_back_to_tracks_then_songs() {
        let raw = r#"{"data":{"tracks":{"items":[{"id":2,"title":"b"}]}}}"#;
        let envelope: SongSearchEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.data.into_tracks()[0].id, 2);

        let raw = r#"{"data":{"items":[],"songs":{"items":[{"id":3,"title":"c"}]}}}"#;
        let envelope: SongSearchEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.data.into_tracks()[0].id, 3);

        let raw = r#"{"data":{}}"#;
        let envelope: SongSearchEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.data.into_tracks().is_empty());
    }

    #[test]
    fn album_search_shape() {
        let raw = r#"{"data":{"albums":{"items":[
            {"id":42,"title":"Album","releaseDate":"1971-05-01",
             "artists":[{"id":7,"name":"Artist"}]}
        ]}}}"#;
        let envelope: AlbumSearchEnvelope = serde_json::from_str(raw).unwrap();
        let item = &envelope.data.albums.items[0];
        assert_eq!(item.id, 42);
        assert_eq!(year_of(&item.release_date), Some(1971));
    }

    #[test]
    fn first_external_rejects_native_and_missing() {
        assert!(first_external(None).is_err());
        assert!(first_external(Some("plain-local-id")).is_err());
        let ext = first_external(Some("ext-squidwtf-song-5")).unwrap();
        assert_eq!(ext.id, "5");
        assert!(ext.is_song());
    }

    #[test]
    fn query_escaping() {
        assert_eq!(query_escape("love & war"), "love+%26+war");
    }
}
