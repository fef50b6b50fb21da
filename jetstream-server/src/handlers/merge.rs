//! Hybrid responses: library and catalog queried in parallel, results
//! concatenated with the library's entries first.
//!
//! A library branch that fails or returns unparseable XML is replaced by
//! an empty ok response of the right kind, so catalog results still reach
//! the client. Each result kind is truncated to the configured limit
//! independently.

use axum::extract::{Request, State};
use axum::response::Response;
use tracing::{info, warn};

use jetstream_core::library::RequestContext;
use jetstream_core::subsonic::{self, SearchResult3, TopSongs};

use super::{context_of, respond, AppState};

/// Gateway albums injected into a random album list, per request.
const RANDOM_ALBUM_INJECTION: usize = 10;

fn force_ok(library: Option<subsonic::Response>) -> subsonic::Response {
    let mut resp = library.unwrap_or_else(subsonic::Response::ok);
    // Catalog results may still be usable; the library's error never
    // reaches the client on a merged endpoint.
    resp.status = subsonic::STATUS_OK.to_string();
    resp.version = subsonic::API_VERSION.to_string();
    resp.error = None;
    resp
}

fn merge_search3(
    library: Option<subsonic::Response>,
    gateway: Option<SearchResult3>,
    limit: usize,
) -> subsonic::Response {
    let mut resp = force_ok(library);
    let mut result = resp.search_result3.take().unwrap_or_default();
    if let Some(extra) = gateway {
        result.song.extend(extra.song);
        result.album.extend(extra.album);
        result.artist.extend(extra.artist);
        result.playlist.extend(extra.playlist);
    }
    result.song.truncate(limit);
    result.album.truncate(limit);
    result.artist.truncate(limit);
    result.playlist.truncate(limit);
    resp.search_result3 = Some(result);
    resp
}

fn merge_search2(
    library: Option<subsonic::Response>,
    gateway: Option<SearchResult3>,
    limit: usize,
) -> subsonic::Response {
    let mut resp = force_ok(library);
    let mut result = resp.search_result2.take().unwrap_or_default();
    if let Some(extra) = gateway {
        result.song.extend(extra.song);
        result.album.extend(extra.album);
        result.artist.extend(extra.artist);
    }
    result.song.truncate(limit);
    result.album.truncate(limit);
    result.artist.truncate(limit);
    resp.search_result2 = Some(result);
    resp
}

fn merge_search1(
    library: Option<subsonic::Response>,
    gateway: Option<SearchResult3>,
    limit: usize,
) -> subsonic::Response {
    let mut resp = force_ok(library);
    let mut result = resp.search_result.take().unwrap_or_default();
    if let Some(extra) = gateway {
        result.matches.extend(extra.song);
    }
    result.matches.truncate(limit);
    resp.search_result = Some(result);
    resp
}

fn merge_playlists(
    library: Option<subsonic::Response>,
    gateway: Option<SearchResult3>,
) -> subsonic::Response {
    let mut resp = force_ok(library);
    let mut playlists = resp.playlists.take().unwrap_or_default();
    if let Some(extra) = gateway {
        playlists.playlist.extend(extra.playlist);
    }
    resp.playlists = Some(playlists);
    resp
}

fn merge_album_list(
    library: Option<subsonic::Response>,
    gateway: Option<SearchResult3>,
) -> subsonic::Response {
    let mut resp = force_ok(library);
    let mut list = resp.album_list2.take().unwrap_or_default();
    if let Some(extra) = gateway {
        list.album
            .extend(extra.album.into_iter().take(RANDOM_ALBUM_INJECTION));
    }
    resp.album_list2 = Some(list);
    resp
}

/// Fetch the library's canonical-XML rendition of the current request,
/// with search limits forced. `None` on any failure.
async fn library_branch(
    app: &AppState,
    ctx: &RequestContext,
    path: &str,
    overrides: &[(&str, &str)],
) -> Option<subsonic::Response> {
    match app.library.fetch_response(ctx, path, overrides).await {
        Ok(resp) => Some(resp),
        Err(e) => {
            warn!("library branch for {path} failed: {e}");
            None
        }
    }
}

async fn gateway_branch(app: &AppState, query: &str) -> Option<SearchResult3> {
    match app.gateway.search(query).await {
        Ok(result) => Some(result),
        Err(e) => {
            warn!("gateway search for {query:?} failed: {e}");
            None
        }
    }
}

pub async fn search(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let path = req.uri().path().to_string();
    let query = ctx.params.get("query").cloned().unwrap_or_default();
    let limit_str = app.config.search_limit.to_string();

    let overrides = [("songCount", limit_str.as_str())];
    let (library, gateway) = tokio::join!(
        library_branch(&app, &ctx, &path, &overrides),
        gateway_branch(&app, &query),
    );
    respond(&ctx, merge_search1(library, gateway, app.config.search_limit))
}

pub async fn search2(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let path = req.uri().path().to_string();
    let query = ctx.params.get("query").cloned().unwrap_or_default();
    let limit_str = app.config.search_limit.to_string();
    let overrides = [
        ("songCount", limit_str.as_str()),
        ("albumCount", limit_str.as_str()),
        ("artistCount", limit_str.as_str()),
    ];

    let (library, gateway) = tokio::join!(
        library_branch(&app, &ctx, &path, &overrides),
        gateway_branch(&app, &query),
    );
    respond(&ctx, merge_search2(library, gateway, app.config.search_limit))
}

pub async fn search3(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let path = req.uri().path().to_string();
    let query = ctx.params.get("query").cloned().unwrap_or_default();
    let limit_str = app.config.search_limit.to_string();
    let overrides = [
        ("songCount", limit_str.as_str()),
        ("albumCount", limit_str.as_str()),
        ("artistCount", limit_str.as_str()),
    ];

    let (library, gateway) = tokio::join!(
        library_branch(&app, &ctx, &path, &overrides),
        gateway_branch(&app, &query),
    );
    respond(&ctx, merge_search3(library, gateway, app.config.search_limit))
}

/// Library playlists plus a handful of featured catalog playlists.
pub async fn get_playlists(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let path = req.uri().path().to_string();
    let (library, gateway) = tokio::join!(
        library_branch(&app, &ctx, &path, &[]),
        gateway_branch(&app, "Featured"),
    );
    respond(&ctx, merge_playlists(library, gateway))
}

/// `getAlbumList`/`getAlbumList2`. Only `type=random` gets catalog albums
/// mixed in; every other list type is the library's business.
pub async fn get_album_list(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    if ctx.params.get("type").map(String::as_str) != Some("random") {
        return app.proxy.forward(req).await;
    }
    let path = req.uri().path().to_string();

    let (library, gateway) = tokio::join!(
        library_branch(&app, &ctx, &path, &[]),
        gateway_branch(&app, "Hits"),
    );
    respond(&ctx, merge_album_list(library, gateway))
}

/// Top songs for an artist, from the catalog when it knows the name,
/// otherwise from the library.
pub async fn get_top_songs(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let artist = ctx.params.get("artist").cloned().unwrap_or_default();
    let count = ctx
        .params
        .get("count")
        .and_then(|c| c.parse().ok())
        .unwrap_or(20);

    if !artist.is_empty() {
        info!("top songs for {artist}");
        match app.gateway.get_top_songs(&artist, count).await {
            Ok(songs) if !songs.is_empty() => {
                let mut resp = subsonic::Response::ok();
                resp.top_songs = Some(TopSongs { song: songs });
                return respond(&ctx, resp);
            }
            Ok(_) => {}
            Err(e) => warn!("top songs for {artist} failed: {e}"),
        }
    }
    app.proxy.forward(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use jetstream_core::subsonic::{Album, Artist, Playlist, Playlists, Song};

    fn gw_song(id: &str) -> Song {
        Song {
            id: id.to_string(),
            title: format!("title-{id}"),
            ..Default::default()
        }
    }

    fn gw_result(songs: usize) -> SearchResult3 {
        SearchResult3 {
            song: (0..songs)
                .map(|i| gw_song(&format!("ext-p-song-{i}")))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn library_entries_come_first() {
        let mut library = subsonic::Response::ok();
        library.search_result3 = Some(SearchResult3 {
            album: vec![Album {
                id: "1".to_string(),
                title: "A".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        let gateway = SearchResult3 {
            song: vec![gw_song("ext-p-song-9")],
            ..Default::default()
        };

        let merged = merge_search3(Some(library), Some(gateway), 50);
        assert_eq!(merged.status, "ok");
        let result = merged.search_result3.unwrap();
        assert_eq!(result.album[0].id, "1");
        assert_eq!(result.song[0].id, "ext-p-song-9");
    }

    #[test]
    fn gateway_before_library_never_happens_for_same_kind() {
        let mut library = subsonic::Response::ok();
        library.search_result3 = Some(SearchResult3 {
            song: vec![gw_song("local-song")],
            ..Default::default()
        });
        let merged = merge_search3(Some(library), Some(gw_result(2)), 50);
        let songs = merged.search_result3.unwrap().song;
        assert_eq!(songs[0].id, "local-song");
        assert_eq!(songs[1].id, "ext-p-song-0");
    }

    #[test]
    fn failed_library_equals_empty_library() {
        // An unreachable library and a parseable-but-empty library response
        // must produce the same payload.
        let empty_lib = {
            let mut resp = subsonic::Response::ok();
            resp.search_result3 = Some(SearchResult3::default());
            resp
        };
        let from_empty = merge_search3(Some(empty_lib), Some(gw_result(3)), 50);
        let from_missing = merge_search3(None, Some(gw_result(3)), 50);
        assert_eq!(
            serde_json::to_value(&from_empty).unwrap(),
            serde_json::to_value(&from_missing).unwrap()
        );
    }

    #[test]
    fn library_errors_are_masked() {
        let library = subsonic::Response::failed(0, "library on fire");
        let merged = merge_search3(Some(library), Some(gw_result(1)), 50);
        assert_eq!(merged.status, "ok");
        assert!(merged.error.is_none());
        assert_eq!(merged.search_result3.unwrap().song.len(), 1);
    }

    #[test]
    fn each_kind_truncates_independently() {
        let mut library = subsonic::Response::ok();
        library.search_result3 = Some(SearchResult3 {
            artist: (0..5)
                .map(|i| Artist {
                    id: format!("ar{i}"),
                    name: format!("n{i}"),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        });
        let gateway = SearchResult3 {
            song: (0..10).map(|i| gw_song(&format!("s{i}"))).collect(),
            playlist: (0..10)
                .map(|i| Playlist {
                    id: format!("p{i}"),
                    name: format!("pl{i}"),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let merged = merge_search3(Some(library), Some(gateway), 3);
        let result = merged.search_result3.unwrap();
        assert_eq!(result.artist.len(), 3);
        assert_eq!(result.song.len(), 3);
        assert_eq!(result.playlist.len(), 3);
    }

    #[test]
    fn search1_merges_songs_into_matches() {
        let merged = merge_search1(None, Some(gw_result(2)), 50);
        let result = merged.search_result.unwrap();
        assert_eq!(result.matches.len(), 2);
    }

    #[test]
    fn random_album_injection_is_capped() {
        let gateway = SearchResult3 {
            album: (0..25)
                .map(|i| Album {
                    id: format!("al{i}"),
                    title: format!("t{i}"),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let merged = merge_album_list(None, Some(gateway));
        assert_eq!(
            merged.album_list2.unwrap().album.len(),
            RANDOM_ALBUM_INJECTION
        );
    }

    #[test]
    fn playlists_are_appended() {
        let mut library = subsonic::Response::ok();
        library.playlists = Some(Playlists {
            playlist: vec![Playlist {
                id: "local".to_string(),
                name: "Mine".to_string(),
                ..Default::default()
            }],
        });
        let gateway = SearchResult3 {
            playlist: vec![Playlist {
                id: "ext-p-playlist-u".to_string(),
                name: "Theirs".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let merged = merge_playlists(Some(library), Some(gateway));
        let playlists = merged.playlists.unwrap().playlist;
        assert_eq!(playlists.len(), 2);
        assert_eq!(playlists[0].id, "local");
    }
}
