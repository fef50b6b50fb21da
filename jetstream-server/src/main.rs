//! JetStream — a Subsonic reverse proxy that augments a library with an
//! external music catalog and syncs played tracks to disk.

mod handlers;
mod proxy;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::{any, get, MethodRouter};
use axum::Router;
use clap::Parser;
use tracing::{error, info};

use jetstream_core::cache::Cache;
use jetstream_core::config::Config;
use jetstream_core::gateway::GatewayClient;
use jetstream_core::library::LibraryClient;
use jetstream_core::sync::SyncService;

use handlers::{browse, maintenance, merge, stream, AppState};
use proxy::LibraryProxy;

#[derive(Parser)]
#[command(name = "jetstream")]
struct Args {
    /// Address to bind to. Port comes from the PORT environment variable.
    #[arg(long, default_value = "0.0.0.0", env = "BIND")]
    bind: String,
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Register a Subsonic endpoint under both its plain and `.view` names.
fn rest(router: Router<AppState>, name: &str, route: MethodRouter<AppState>) -> Router<AppState> {
    router
        .route(&format!("/rest/{name}"), route.clone())
        .route(&format!("/rest/{name}.view"), route)
}

async fn forward(State(app): State<AppState>, req: Request) -> Response {
    app.proxy.forward(req).await
}

fn router(state: AppState) -> Router {
    let mut r = Router::new();

    // Forwarded unchanged to the library.
    for endpoint in [
        "ping",
        "getLicense",
        "getMusicFolders",
        "getIndexes",
        "getGenres",
        "getArtists",
        "getNowPlaying",
        "getUser",
        "getRandomSongs",
        "getSongsByGenre",
        "getStarred",
        "getStarred2",
        "getBookmarks",
        "createBookmark",
        "deleteBookmark",
        "scrobble",
        "star",
        "unstar",
        "createPlaylist",
        "deletePlaylist",
        "updatePlaylist",
        "getLyrics",
    ] {
        r = rest(r, endpoint, any(forward));
    }

    // Merged library + catalog responses.
    r = rest(r, "search", any(merge::search));
    r = rest(r, "search2", any(merge::search2));
    r = rest(r, "search3", any(merge::search3));
    r = rest(r, "getPlaylists", any(merge::get_playlists));
    r = rest(r, "getAlbumList", any(merge::get_album_list));
    r = rest(r, "getAlbumList2", any(merge::get_album_list));
    r = rest(r, "getTopSongs", any(merge::get_top_songs));

    // Resolver-backed single entities.
    r = rest(r, "getSong", any(browse::get_song));
    r = rest(r, "getAlbum", any(browse::get_album));
    r = rest(r, "getArtist", any(browse::get_artist));
    r = rest(r, "getMusicDirectory", any(browse::get_music_directory));
    r = rest(r, "getPlaylist", any(browse::get_playlist));
    r = rest(r, "getAlbumInfo", any(browse::get_album_info));
    r = rest(r, "getAlbumInfo2", any(browse::get_album_info2));
    r = rest(r, "getArtistInfo", any(browse::get_artist_info));
    r = rest(r, "getArtistInfo2", any(browse::get_artist_info2));
    r = rest(r, "getSimilarArtists", any(browse::get_similar_artists));
    r = rest(r, "getSimilarArtists2", any(browse::get_similar_artists2));
    r = rest(r, "getSimilarSongs", any(browse::get_similar_songs));
    r = rest(r, "getSimilarSongs2", any(browse::get_similar_songs2));
    r = rest(r, "getLyricsBySongId", any(browse::get_lyrics_by_song_id));
    r = rest(
        r,
        "getOpenSubsonicExtensions",
        any(browse::get_open_subsonic_extensions),
    );

    // Media retrieval.
    r = rest(r, "stream", any(stream::stream));
    r = rest(r, "download", any(stream::stream));
    r = rest(r, "getCoverArt", any(browse::get_cover_art));

    // Operational endpoints.
    r = r
        .route("/health", get(maintenance::health))
        .route("/maintenance/scan", get(maintenance::scan))
        .route("/sync", get(maintenance::sync_album));

    // Everything else goes to the library untouched.
    r.fallback(forward).with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() {
    configure_logging();
    let args = Args::parse();

    let config = Config::load().unwrap_or_else(|e| {
        error!("invalid configuration: {e}");
        std::process::exit(1);
    });

    let cache = Cache::connect(&config.redis_addr).await.unwrap_or_else(|e| {
        error!("cannot reach redis at {}: {e}", config.redis_addr);
        std::process::exit(1);
    });

    let gateway = Arc::new(
        GatewayClient::new(config.gateway_urls.clone(), config.search_limit, cache.clone())
            .unwrap_or_else(|e| {
                error!("failed to build gateway client: {e}");
                std::process::exit(1);
            }),
    );

    let sync = Arc::new(SyncService::new(
        gateway.clone(),
        cache.clone(),
        config.music_folder.clone(),
        config.download_format,
    ));

    let library = Arc::new(LibraryClient::new(&config.library_url).unwrap_or_else(|e| {
        error!("failed to build library client: {e}");
        std::process::exit(1);
    }));

    let proxy = Arc::new(LibraryProxy::new(&config.library_url).unwrap_or_else(|e| {
        error!("invalid library URL {}: {e}", config.library_url);
        std::process::exit(1);
    }));

    // CDN relays must not be cut off by a total request timeout.
    let stream_http = reqwest::Client::new();

    let addr = format!("{}:{}", args.bind, config.port);
    let state = AppState {
        config: Arc::new(config),
        gateway,
        sync,
        library,
        proxy,
        stream_http,
    };

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        error!("failed to bind {addr}: {e}");
        std::process::exit(1);
    });

    info!("JetStream listening on {addr}");
    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server error: {e}");
        std::process::exit(1);
    }
}
