//! Single-entity endpoints: resolver decides, gateway or library answers.
//!
//! An identifier that decodes as external goes straight to the catalog.
//! A native identifier gets one resolution attempt (path token, tag,
//! self-healing search); if that produces nothing the request is forwarded
//! to the library untouched. Direct external lookups that fail surface a
//! Subsonic error; enrichment lookups that fail fall back to the library.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use jetstream_core::ids::{self, Identifier};
use jetstream_core::resolver;
use jetstream_core::subsonic::{
    self, codes, AlbumInfo, AlbumWithSongs, ArtistInfo, ArtistWithAlbums, Directory, Lyrics,
    OpenSubsonicExtension, OpenSubsonicExtensions, SimilarArtists, SimilarSongs, Song,
};

use super::{context_of, respond, respond_error, AppState};

fn missing_id(ctx: &jetstream_core::library::RequestContext) -> Response {
    respond_error(ctx, codes::REQUIRED_PARAMETER, "Required parameter 'id' missing")
}

pub async fn get_song(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let Some(id) = ctx.params.get("id").cloned() else {
        return missing_id(&ctx);
    };

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

    info!("getSong intercepted: {id} -> {ext}");
    match app.gateway.get_song(&ext).await {
        Ok(song) => {
            let mut resp = subsonic::Response::ok();
            resp.song = Some(song);
            respond(&ctx, resp)
        }
        Err(e) => {
            warn!("getSong {ext} failed: {e}");
            respond_error(&ctx, codes::DATA_NOT_FOUND, "Song not found")
        }
    }
}

pub async fn get_album(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let Some(id) = ctx.params.get("id").cloned() else {
        return missing_id(&ctx);
    };

    let direct = ids::is_external(&id);
    let resolved = resolver::resolve_album_id(&app.library, &app.gateway, &ctx, &id).await;
    let Some(ext) = resolved.into_external() else {
        return app.proxy.forward(req).await;
    };

    match app.gateway.get_album(&ext).await {
        Ok((album, songs)) => {
            let mut resp = subsonic::Response::ok();
            resp.album = Some(AlbumWithSongs { album, song: songs });
            respond(&ctx, resp)
        }
        Err(e) if direct => respond_error(&ctx, codes::GENERIC, &e.to_string()),
        Err(e) => {
            warn!("enriched album lookup for {id} failed: {e}");
            app.proxy.forward(req).await
        }
    }
}

pub async fn get_artist(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let Some(id) = ctx.params.get("id").cloned() else {
        return missing_id(&ctx);
    };

    let direct = ids::is_external(&id);
    let resolved = resolver::resolve_artist_id(&app.library, &app.gateway, &ctx, &id).await;
    let Some(ext) = resolved.into_external() else {
        return app.proxy.forward(req).await;
    };

    match app.gateway.get_artist(&ext).await {
        Ok((artist, albums)) => {
            let mut resp = subsonic::Response::ok();
            resp.artist = Some(ArtistWithAlbums {
                artist,
                album: albums,
            });
            respond(&ctx, resp)
        }
        Err(e) if direct => respond_error(&ctx, codes::ARTIST_NOT_FOUND, &e.to_string()),
        Err(e) => {
            warn!("enriched artist lookup for {id} failed: {e}");
            app.proxy.forward(req).await
        }
    }
}

/// Browse an external entity as a directory: albums under an artist,
/// songs under an album.
pub async fn get_music_directory(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let Some(id) = ctx.params.get("id").cloned() else {
        return missing_id(&ctx);
    };

    let Identifier::External(ext) = ids::decode(&id) else {
        return app.proxy.forward(req).await;
    };

    if ext.is_artist() {
        match app.gateway.get_artist(&ext).await {
            Ok((artist, albums)) => {
                let children = albums
                    .into_iter()
                    .map(|album| Song {
                        id: album.id,
                        parent: Some(id.clone()),
                        title: album.title.clone(),
                        is_dir: true,
                        album: Some(album.title),
                        artist: album.artist,
                        cover_art: album.cover_art,
                        ..Default::default()
                    })
                    .collect();
                let mut resp = subsonic::Response::ok();
                resp.directory = Some(Directory {
                    id,
                    name: artist.name,
                    child: children,
                });
                respond(&ctx, resp)
            }
            Err(e) => respond_error(&ctx, codes::GENERIC, &e.to_string()),
        }
    } else if ext.is_album() {
        match app.gateway.get_album(&ext).await {
            Ok((album, songs)) => {
                let mut resp = subsonic::Response::ok();
                resp.directory = Some(Directory {
                    id,
                    name: album.title,
                    child: songs,
                });
                respond(&ctx, resp)
            }
            Err(e) => respond_error(&ctx, codes::GENERIC, &e.to_string()),
        }
    } else {
        app.proxy.forward(req).await
    }
}

pub async fn get_playlist(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let Some(id) = ctx.params.get("id").cloned() else {
        return missing_id(&ctx);
    };

    let Identifier::External(ext) = ids::decode(&id) else {
        return app.proxy.forward(req).await;
    };

    match app.gateway.get_playlist(&ext).await {
        Ok((mut playlist, songs)) => {
            playlist.entry = songs;
            let mut resp = subsonic::Response::ok();
            resp.playlist = Some(playlist);
            respond(&ctx, resp)
        }
        Err(e) => {
            warn!("getPlaylist {id} failed: {e}");
            respond_error(&ctx, codes::GENERIC, &e.to_string())
        }
    }
}

/// Proxy the cover image bytes from the catalog's CDN. Redirecting the
/// client instead would leak a URL that 403s without our user agent.
pub async fn get_cover_art(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let Some(id) = ctx.params.get("id").cloned() else {
        return missing_id(&ctx);
    };

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

    let url = match app.gateway.get_cover_url(&ext).await {
        Ok(url) => url,
        Err(e) => {
            warn!("cover for {ext} not found: {e}");
            return respond_error(&ctx, codes::DATA_NOT_FOUND, "Cover not found");
        }
    };

    match app.gateway.fetch_bytes(&url).await {
        Ok((bytes, content_type)) => {
            let content_type = content_type.unwrap_or_else(|| "image/jpeg".to_string());
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(e) => {
            warn!("cover fetch from {url} failed: {e}");
            respond_error(&ctx, codes::GENERIC, "Failed to fetch cover")
        }
    }
}

/// Lyrics by song ID (OpenSubsonic). Missing lyrics are an empty ok
/// response, not an error, so clients do not nag.
pub async fn get_lyrics_by_song_id(State(app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let Some(id) = ctx.params.get("id").cloned() else {
        return missing_id(&ctx);
    };

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

    match app.gateway.get_lyrics(&ext).await {
        Ok(lyrics) => {
            let mut resp = subsonic::Response::ok();
            resp.lyrics = Some(Lyrics { value: lyrics });
            respond(&ctx, resp)
        }
        Err(e) => {
            warn!("lyrics for {ext} not found: {e}");
            respond(&ctx, subsonic::Response::ok())
        }
    }
}

pub async fn get_open_subsonic_extensions(State(_app): State<AppState>, req: Request) -> Response {
    let ctx = context_of(&req);
    let mut resp = subsonic::Response::ok();
    resp.open_subsonic_extensions = Some(OpenSubsonicExtensions {
        extension: vec![
            OpenSubsonicExtension {
                name: "songLyrics".to_string(),
                version: vec!["1".to_string()],
            },
            OpenSubsonicExtension {
                name: "formPost".to_string(),
                version: vec!["1".to_string()],
            },
            OpenSubsonicExtension {
                name: "transcoding".to_string(),
                version: vec!["1".to_string()],
            },
        ],
    });
    respond(&ctx, resp)
}

async fn album_info_inner(app: AppState, req: Request, second: bool) -> Response {
    let ctx = context_of(&req);
    let Some(id) = ctx.params.get("id").cloned() else {
        return missing_id(&ctx);
    };

    let direct = ids::is_external(&id);
    let resolved = resolver::resolve_album_id(&app.library, &app.gateway, &ctx, &id).await;
    let Some(ext) = resolved.into_external() else {
        return app.proxy.forward(req).await;
    };

    match app.gateway.get_cover_url(&ext).await {
        Ok(url) => {
            let info = AlbumInfo {
                small_image_url: Some(url.clone()),
                medium_image_url: Some(url.clone()),
                large_image_url: Some(url),
                ..Default::default()
            };
            let mut resp = subsonic::Response::ok();
            if second {
                resp.album_info2 = Some(info);
            } else {
                resp.album_info = Some(info);
            }
            respond(&ctx, resp)
        }
        Err(e) if direct => respond_error(&ctx, codes::DATA_NOT_FOUND, &e.to_string()),
        Err(_) => app.proxy.forward(req).await,
    }
}

pub async fn get_album_info(State(app): State<AppState>, req: Request) -> Response {
    album_info_inner(app, req, false).await
}

pub async fn get_album_info2(State(app): State<AppState>, req: Request) -> Response {
    album_info_inner(app, req, true).await
}

async fn artist_info_inner(app: AppState, req: Request, second: bool) -> Response {
    let ctx = context_of(&req);
    let Some(id) = ctx.params.get("id").cloned() else {
        return missing_id(&ctx);
    };

    let direct = ids::is_external(&id);
    let resolved = resolver::resolve_artist_id(&app.library, &app.gateway, &ctx, &id).await;
    let Some(ext) = resolved.into_external() else {
        return app.proxy.forward(req).await;
    };

    match app.gateway.get_cover_url(&ext).await {
        Ok(url) => {
            let info = ArtistInfo {
                small_image_url: Some(url.clone()),
                medium_image_url: Some(url.clone()),
                large_image_url: Some(url),
                ..Default::default()
            };
            let mut resp = subsonic::Response::ok();
            if second {
                resp.artist_info2 = Some(info);
            } else {
                resp.artist_info = Some(info);
            }
            respond(&ctx, resp)
        }
        Err(e) if direct => respond_error(&ctx, codes::ARTIST_NOT_FOUND, &e.to_string()),
        Err(_) => app.proxy.forward(req).await,
    }
}

pub async fn get_artist_info(State(app): State<AppState>, req: Request) -> Response {
    artist_info_inner(app, req, false).await
}

pub async fn get_artist_info2(State(app): State<AppState>, req: Request) -> Response {
    artist_info_inner(app, req, true).await
}

async fn similar_artists_inner(app: AppState, req: Request, second: bool) -> Response {
    let ctx = context_of(&req);
    let Some(id) = ctx.params.get("id").cloned() else {
        return missing_id(&ctx);
    };

    let direct = ids::is_external(&id);
    let resolved = resolver::resolve_artist_id(&app.library, &app.gateway, &ctx, &id).await;
    let Some(ext) = resolved.into_external() else {
        return app.proxy.forward(req).await;
    };

    match app.gateway.get_similar_artists(&ext).await {
        Ok(artists) => {
            let similar = SimilarArtists { artist: artists };
            let mut resp = subsonic::Response::ok();
            if second {
                resp.similar_artists2 = Some(similar);
            } else {
                resp.similar_artists = Some(similar);
            }
            respond(&ctx, resp)
        }
        Err(e) if direct => respond_error(&ctx, codes::ARTIST_NOT_FOUND, &e.to_string()),
        Err(_) => app.proxy.forward(req).await,
    }
}

pub async fn get_similar_artists(State(app): State<AppState>, req: Request) -> Response {
    similar_artists_inner(app, req, false).await
}

pub async fn get_similar_artists2(State(app): State<AppState>, req: Request) -> Response {
    similar_artists_inner(app, req, true).await
}

/// Similar songs for a track: the catalog has no direct endpoint, so the
/// track's artist is searched and the track itself filtered out.
async fn similar_songs_inner(app: AppState, req: Request, second: bool) -> Response {
    let ctx = context_of(&req);
    let Some(id) = ctx.params.get("id").cloned() else {
        return missing_id(&ctx);
    };
    let count: usize = ctx
        .params
        .get("count")
        .and_then(|c| c.parse().ok())
        .unwrap_or(50);

    let direct = ids::is_external(&id);
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

    let result = async {
        let song = app.gateway.get_song(&ext).await?;
        let artist = song.artist.clone().unwrap_or_default();
        let mut songs = app.gateway.search(&artist).await?.song;
        songs.retain(|s| s.id != song.id);
        songs.truncate(count);
        Ok::<_, jetstream_core::gateway::GatewayError>(songs)
    }
    .await;

    match result {
        Ok(songs) => {
            let similar = SimilarSongs { song: songs };
            let mut resp = subsonic::Response::ok();
            if second {
                resp.similar_songs2 = Some(similar);
            } else {
                resp.similar_songs = Some(similar);
            }
            respond(&ctx, resp)
        }
        Err(e) if direct => respond_error(&ctx, codes::DATA_NOT_FOUND, &e.to_string()),
        Err(_) => app.proxy.forward(req).await,
    }
}

pub async fn get_similar_songs(State(app): State<AppState>, req: Request) -> Response {
    similar_songs_inner(app, req, false).await
}

pub async fn get_similar_songs2(State(app): State<AppState>, req: Request) -> Response {
    similar_songs_inner(app, req, true).await
}
