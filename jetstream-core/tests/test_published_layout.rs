//! Invariants of the published-file layout: the basename embeds the
//! external identifier, the sidecar round-trips the driving Song, and the
//! resolver can get the identifier back out of a bare path string.

use jetstream_core::config::DownloadFormat;
use jetstream_core::ids;
use jetstream_core::subsonic::Song;
use jetstream_core::sync::{is_synced_basename, published_file_name, sanitize_path};

fn sample_song() -> Song {
    Song {
        id: "ext-squidwtf-song-99".to_string(),
        parent: Some("ext-squidwtf-album-42".to_string()),
        title: "So What".to_string(),
        artist: Some("Miles Davis".to_string()),
        artist_id: Some("ext-squidwtf-artist-7".to_string()),
        album: Some("Kind of Blue".to_string()),
        album_id: Some("ext-squidwtf-album-42".to_string()),
        cover_art: Some("ext-squidwtf-album-42".to_string()),
        duration: Some(545),
        track: Some(1),
        suffix: Some("mp3".to_string()),
        content_type: Some("audio/mpeg".to_string()),
        ..Default::default()
    }
}

#[test]
fn published_tree_round_trips_the_identifier() {
    let dir = tempfile::tempdir().unwrap();
    let song = sample_song();

    let album_dir = dir
        .path()
        .join("jetstream")
        .join(sanitize_path(song.artist.as_deref().unwrap()))
        .join(sanitize_path(song.album.as_deref().unwrap()));
    std::fs::create_dir_all(&album_dir).unwrap();

    let name = published_file_name(&song, DownloadFormat::Opus);
    assert_eq!(name, "01 - [ext-squidwtf-song-99] So What.opus");
    assert!(is_synced_basename(&name));

    let media_path = album_dir.join(&name);
    std::fs::write(&media_path, b"audio bytes").unwrap();

    // The basename alone identifies the track.
    let embedded = ids::extract_embedded(media_path.to_str().unwrap()).unwrap();
    assert_eq!(embedded.to_string(), song.id);
    assert!(embedded.is_song());
}

#[test]
fn sidecar_round_trips_the_song() {
    let dir = tempfile::tempdir().unwrap();
    let song = sample_song();

    let media_path = dir
        .path()
        .join(published_file_name(&song, DownloadFormat::Mp3));
    let sidecar_path = {
        let mut os = media_path.as_os_str().to_os_string();
        os.push(".json");
        std::path::PathBuf::from(os)
    };

    std::fs::write(&sidecar_path, serde_json::to_vec_pretty(&song).unwrap()).unwrap();

    let restored: Song =
        serde_json::from_slice(&std::fs::read(&sidecar_path).unwrap()).unwrap();
    assert_eq!(restored.id, song.id);
    assert_eq!(restored.title, song.title);
    assert_eq!(restored.track, song.track);
    assert_eq!(restored.album_id, song.album_id);
}

#[test]
fn non_audio_siblings_are_not_synced_tracks() {
    assert!(!is_synced_basename("cover.jpg"));
    assert!(!is_synced_basename(
        "01 - [ext-squidwtf-song-99] So What.opus.json"
    ));
    assert!(is_synced_basename(
        "01 - [ext-squidwtf-song-99] So What.flac"
    ));
}
