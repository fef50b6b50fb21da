//! Background materialization of catalog tracks.
//!
//! A played track is downloaded, transcoded into the configured canonical
//! format, and published into the library's music directory so the next
//! scan indexes it and the next play is a disk hit. Publication is atomic:
//! the transcoder writes `<final>.tmp`, the rename happens only on
//! success, and a post-publish probe deletes anything that is not at least
//! one second of real audio.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::cache::{self, Cache};
use crate::config::DownloadFormat;
use crate::gateway::{GatewayClient, GatewayError};
use crate::ids::{self, Identifier};
use crate::subsonic::{Album, Song};

/// Synced files live under `<music_root>/jetstream/`.
pub const SYNC_SUBDIR: &str = "jetstream";

/// Whole-track materialization deadline, independent of the request that
/// triggered it.
const SYNC_DEADLINE: Duration = Duration::from_secs(15 * 60);
const PROBE_DEADLINE: Duration = Duration::from_secs(30);

const AUDIO_EXTENSIONS: &[&str] = &["opus", "mp3", "aac", "flac"];

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("transcode failed: {0}")]
    Transcode(String),
    #[error("integrity check failed: {0}")]
    Integrity(String),
    #[error("sync timed out")]
    Timeout,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SyncService {
    gateway: Arc<GatewayClient>,
    cache: Cache,
    music_folder: PathBuf,
    format: DownloadFormat,
}

/// Replace filesystem-hostile characters, keeping names readable.
pub fn sanitize_path(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Basename of a published track: `NN - [<ext_id>] <title>.<ext>`.
/// The embedded identifier is what lets the resolver round-trip a library
/// scan result back to the catalog without touching the file.
pub fn published_file_name(song: &Song, format: DownloadFormat) -> String {
    format!(
        "{:02} - [{}] {}.{}",
        song.track.unwrap_or_default(),
        song.id,
        sanitize_path(&song.title),
        format.extension(),
    )
}

/// Whether a basename follows the synced-track layout
/// `NN - [<ext-id>] <title>.<ext>` with an audio extension. Sidecars
/// (`.json`, `cover.jpg`) never qualify.
pub fn is_synced_basename(name: &str) -> bool {
    let mut chars = name.chars();
    let digits = matches!(
        (chars.next(), chars.next()),
        (Some(a), Some(b)) if a.is_ascii_digit() && b.is_ascii_digit()
    );
    digits
        && name[2..].starts_with(" - [ext-")
        && name.contains("] ")
        && Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

impl SyncService {
    pub fn new(
        gateway: Arc<GatewayClient>,
        cache: Cache,
        music_folder: PathBuf,
        format: DownloadFormat,
    ) -> Self {
        Self {
            gateway,
            cache,
            music_folder,
            format,
        }
    }

    pub fn sync_root(&self) -> PathBuf {
        self.music_folder.join(SYNC_SUBDIR)
    }

    fn target_dir(&self, song: &Song) -> PathBuf {
        self.sync_root()
            .join(sanitize_path(song.artist.as_deref().unwrap_or_default()))
            .join(sanitize_path(song.album.as_deref().unwrap_or_default()))
    }

    /// Canonical on-disk location for a song's published file.
    pub fn target_path(&self, song: &Song) -> PathBuf {
        self.target_dir(song)
            .join(published_file_name(song, self.format))
    }

    /// Consult the ID→path index for an already-published file.
    pub async fn indexed_path(&self, ext_id: &str) -> Option<PathBuf> {
        self.cache
            .get_string(&format!("path:{ext_id}"))
            .await
            .map(PathBuf::from)
    }

    /// Sync every track of an album, sequentially. Per-track failures are
    /// logged and do not stop the rest of the album.
    pub async fn sync_album(&self, album: &Album, songs: &[Song]) {
        info!("syncing all tracks of {}", album.title);
        for song in songs {
            if let Err(e) = self.sync_song(song).await {
                error!("failed to sync {}: {e}", song.title);
            }
        }
    }

    /// Materialize one song to disk. Idempotent: a published file that
    /// passes the integrity probe short-circuits the whole pipeline.
    pub async fn sync_song(&self, song: &Song) -> Result<(), SyncError> {
        let output = self.target_path(song);
        match tokio::time::timeout(SYNC_DEADLINE, self.sync_song_inner(song, &output)).await {
            Ok(result) => result,
            Err(_) => {
                let _ = tokio::fs::remove_file(with_suffix(&output, ".tmp")).await;
                Err(SyncError::Timeout)
            }
        }
    }

    async fn sync_song_inner(&self, song: &Song, output: &Path) -> Result<(), SyncError> {
        let dir = self.target_dir(song);
        tokio::fs::create_dir_all(&dir).await?;

        // Album-level cover.jpg; losing it is not worth failing the sync.
        if let Err(e) = self.ensure_cover(song, &dir).await {
            warn!("cover for {} not saved: {e}", song.title);
        }

        if tokio::fs::try_exists(output).await.unwrap_or(false) {
            match verify_integrity(output).await {
                Ok(_) => {
                    self.save_metadata(song, output).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "existing file {} is corrupt ({e}), re-syncing",
                        output.display()
                    );
                }
            }
        }

        let ext = match ids::decode(&song.id) {
            Identifier::External(ext) => ext,
            Identifier::Native(_) => {
                return Err(SyncError::Gateway(GatewayError::NotFound(format!(
                    "{} is not a catalog track",
                    song.id
                ))))
            }
        };
        let info = self.gateway.get_stream_url(&ext).await?;

        info!(
            "downloading and transcoding {} -> {}",
            song.title,
            output.display()
        );
        self.transcode(song, &info.download_url, output).await?;
        self.save_metadata(song, output).await;
        Ok(())
    }

    async fn ensure_cover(&self, song: &Song, dir: &Path) -> Result<(), SyncError> {
        let Some(cover_art) = song.cover_art.as_deref() else {
            return Ok(());
        };
        let cover_path = dir.join("cover.jpg");
        if tokio::fs::try_exists(&cover_path).await.unwrap_or(false) {
            return Ok(());
        }
        let bytes = self.download_art(cover_art).await?;
        debug!("saving cover.jpg for {}", dir.display());
        tokio::fs::write(&cover_path, bytes).await?;
        Ok(())
    }

    /// Fetch cover bytes by cover key (an entity identifier) or direct URL.
    async fn download_art(&self, cover_key: &str) -> Result<Vec<u8>, SyncError> {
        let url = if cover_key.starts_with("http") {
            cover_key.to_string()
        } else {
            match ids::decode(cover_key) {
                Identifier::External(ext) => self.gateway.get_cover_url(&ext).await?,
                Identifier::Native(_) => {
                    return Err(SyncError::Gateway(GatewayError::NotFound(format!(
                        "no cover source for {cover_key}"
                    ))))
                }
            }
        };
        let (bytes, _) = self.gateway.fetch_bytes(&url).await?;
        Ok(bytes)
    }

    async fn transcode(&self, song: &Song, input_url: &str, output: &Path) -> Result<(), SyncError> {
        let tmp = with_suffix(output, ".tmp");

        // Cover art goes in through a scratch file as ffmpeg's second
        // input; the handle keeps the file alive until encoding finishes.
        let cover_file = match song.cover_art.as_deref() {
            Some(key) => match self.download_art(key).await {
                Ok(bytes) => {
                    let file = tempfile::Builder::new()
                        .prefix("jetstream-cover-")
                        .suffix(".jpg")
                        .tempfile()?;
                    tokio::fs::write(file.path(), bytes).await?;
                    Some(file)
                }
                Err(e) => {
                    warn!("cover download for {} failed: {e}", song.id);
                    None
                }
            },
            None => None,
        };

        let args = transcode_args(
            song,
            input_url,
            cover_file.as_ref().map(|f| f.path()),
            self.format,
            &tmp,
        );
        if let Err(first) = run_ffmpeg(&args).await {
            warn!("transcode of {} failed ({first}), retrying without cover", song.id);
            let retry = fallback_args(song, input_url, self.format, &tmp);
            if let Err(e) = run_ffmpeg(&retry).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
        }
        drop(cover_file);

        // Atomic publish.
        tokio::fs::rename(&tmp, output).await?;

        if let Err(e) = verify_integrity(output).await {
            error!(
                "published file {} failed integrity, removing: {e}",
                output.display()
            );
            let _ = tokio::fs::remove_file(output).await;
            return Err(e);
        }

        if let Ok(meta) = tokio::fs::metadata(output).await {
            info!(
                "synced {} ({:.1} MiB)",
                output.display(),
                meta.len() as f64 / 1024.0 / 1024.0
            );
        }
        Ok(())
    }

    /// Write the JSON sidecar and the ID→path index entry.
    async fn save_metadata(&self, song: &Song, media_path: &Path) {
        let sidecar = with_suffix(media_path, ".json");
        match serde_json::to_vec_pretty(song) {
            Ok(data) => {
                if let Err(e) = tokio::fs::write(&sidecar, data).await {
                    error!("failed to write sidecar {}: {e}", sidecar.display());
                }
            }
            Err(e) => error!("failed to serialize sidecar for {}: {e}", song.id),
        }

        self.cache
            .put_string(
                &format!("path:{}", song.id),
                &media_path.to_string_lossy(),
                cache::PATH_INDEX_TTL,
            )
            .await;
    }

    /// Walk the published tree, delete files that fail the integrity probe
    /// (plus their sidecars), and refresh the ID→path index from surviving
    /// sidecars. Returns `(total, corrupt)`.
    pub async fn maintenance_scan(&self) -> Result<(usize, usize), SyncError> {
        let root = self.sync_root();
        let audio_files = tokio::task::spawn_blocking(move || collect_audio_files(&root))
            .await
            .map_err(std::io::Error::other)?;

        let mut total = 0usize;
        let mut corrupt = 0usize;
        for path in audio_files {
            total += 1;
            match verify_integrity(&path).await {
                Err(e) => {
                    corrupt += 1;
                    warn!("corrupt file {} ({e}), deleting", path.display());
                    let _ = tokio::fs::remove_file(&path).await;
                    let _ = tokio::fs::remove_file(with_suffix(&path, ".json")).await;
                }
                Ok(_) => {
                    let sidecar = with_suffix(&path, ".json");
                    if let Ok(data) = tokio::fs::read(&sidecar).await {
                        if let Ok(song) = serde_json::from_slice::<Song>(&data) {
                            self.cache
                                .put_string(
                                    &format!("path:{}", song.id),
                                    &path.to_string_lossy(),
                                    cache::PATH_INDEX_TTL,
                                )
                                .await;
                        }
                    }
                }
            }
        }

        info!("maintenance scan: {total} files, {corrupt} corrupt");
        Ok((total, corrupt))
    }
}

fn collect_audio_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect()
}

fn metadata_args(song: &Song, full: bool) -> Vec<String> {
    let artist = song.artist.clone().unwrap_or_default();
    let mut args = vec![
        "-metadata".to_string(),
        format!("title={}", song.title),
        "-metadata".to_string(),
        format!("artist={artist}"),
        "-metadata".to_string(),
        format!("album={}", song.album.clone().unwrap_or_default()),
    ];
    if full {
        args.push("-metadata".to_string());
        args.push(format!("album_artist={artist}"));
        if let Some(track) = song.track.filter(|t| *t > 0) {
            args.push("-metadata".to_string());
            args.push(format!("track={track}"));
        }
        if let Some(year) = song.year.filter(|y| *y > 0) {
            args.push("-metadata".to_string());
            args.push(format!("date={year}"));
        }
        if let Some(genre) = song.genre.as_deref().filter(|g| !g.is_empty()) {
            args.push("-metadata".to_string());
            args.push(format!("genre={genre}"));
        }
    }
    args.push("-metadata".to_string());
    args.push(format!("comment=Synced by JetStream [ID:{}]", song.id));
    args
}

/// Full transcode pipeline, format-specific, with optional embedded cover.
fn transcode_args(
    song: &Song,
    input_url: &str,
    cover: Option<&Path>,
    format: DownloadFormat,
    tmp: &Path,
) -> Vec<String> {
    let mut args = vec!["-i".to_string(), input_url.to_string()];
    if let Some(cover) = cover {
        args.push("-i".to_string());
        args.push(cover.to_string_lossy().into_owned());
    }

    match format {
        DownloadFormat::Opus => {
            // Opus-in-Ogg cover embedding is unreliable; the album-level
            // cover.jpg carries the artwork instead.
            args.extend(
                ["-c:a", format.codec(), "-b:a", "128k", "-map", "0:a"]
                    .map(str::to_string),
            );
        }
        DownloadFormat::Mp3 => {
            args.extend(["-c:a", format.codec(), "-q:a", "0"].map(str::to_string));
            if cover.is_some() {
                args.extend(
                    [
                        "-map",
                        "0:a",
                        "-map",
                        "1:0",
                        "-c:v",
                        "copy",
                        "-id3v2_version",
                        "3",
                        "-metadata:s:v",
                        "title=Album cover",
                        "-metadata:s:v",
                        "comment=Cover (front)",
                    ]
                    .map(str::to_string),
                );
            } else {
                args.extend(["-id3v2_version", "3"].map(str::to_string));
            }
        }
        DownloadFormat::Aac => {
            args.extend(["-c:a", format.codec(), "-b:a", "192k"].map(str::to_string));
            if cover.is_some() {
                args.extend(
                    [
                        "-map",
                        "0:a",
                        "-map",
                        "1:0",
                        "-c:v",
                        "copy",
                        "-disposition:v:0",
                        "attached_pic",
                    ]
                    .map(str::to_string),
                );
            }
        }
    }

    args.extend(metadata_args(song, true));
    // The .tmp suffix hides the container from ffmpeg, so force it.
    args.extend(["-f", format.container()].map(str::to_string));
    args.push("-y".to_string());
    args.push(tmp.to_string_lossy().into_owned());
    args
}

/// Retry pipeline: no cover input, no stream mapping.
fn fallback_args(song: &Song, input_url: &str, format: DownloadFormat, tmp: &Path) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        input_url.to_string(),
        "-c:a".to_string(),
        format.codec().to_string(),
    ];
    match format {
        DownloadFormat::Opus => args.extend(["-b:a", "128k"].map(str::to_string)),
        DownloadFormat::Mp3 => {
            args.extend(["-q:a", "0", "-id3v2_version", "3"].map(str::to_string))
        }
        DownloadFormat::Aac => args.extend(["-b:a", "192k"].map(str::to_string)),
    }
    args.extend(metadata_args(song, false));
    args.extend(["-f", format.container()].map(str::to_string));
    args.push("-y".to_string());
    args.push(tmp.to_string_lossy().into_owned());
    args
}

async fn run_ffmpeg(args: &[String]) -> Result<(), SyncError> {
    debug!("ffmpeg {}", args.join(" "));
    let output = Command::new("ffmpeg")
        .args(args)
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SyncError::Transcode(
            stderr.lines().last().unwrap_or("ffmpeg exited nonzero").to_string(),
        ));
    }
    Ok(())
}

/// Probe a published file and require at least one second of audio.
///
/// Only real tracks are probed; sidecars (`cover.jpg`, `.json`) never
/// reach this function.
pub async fn verify_integrity(path: &Path) -> Result<f64, SyncError> {
    let probe = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(PROBE_DEADLINE, probe).await {
        Ok(result) => result?,
        Err(_) => return Err(SyncError::Integrity("ffprobe timed out".to_string())),
    };

    if !output.status.success() {
        return Err(SyncError::Integrity(format!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if raw.is_empty() || raw == "N/A" {
        return Err(SyncError::Integrity("no duration reported".to_string()));
    }
    let duration: f64 = raw
        .parse()
        .map_err(|_| SyncError::Integrity(format!("unparseable duration {raw:?}")))?;
    if duration < 1.0 {
        return Err(SyncError::Integrity(format!(
            "duration too short ({duration:.2}s)"
        )));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song() -> Song {
        Song {
            id: "ext-squidwtf-song-99".to_string(),
            title: "Fables: of / Faubus?".to_string(),
            artist: Some("Charles Mingus".to_string()),
            album: Some("Mingus Ah Um".to_string()),
            track: Some(4),
            year: Some(1959),
            genre: Some("Jazz".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn sanitization_replaces_hostile_characters() {
        assert_eq!(sanitize_path("AC/DC: Live?"), "AC_DC_ Live_");
        assert_eq!(sanitize_path("  plain  "), "plain");
        assert_eq!(sanitize_path("a<b>c|d\"e\\f*g"), "a_b_c_d_e_f_g");
    }

    #[test]
    fn published_names_embed_the_identifier() {
        let name = published_file_name(&song(), DownloadFormat::Opus);
        assert_eq!(
            name,
            "04 - [ext-squidwtf-song-99] Fables_ of _ Faubus_.opus"
        );
        assert!(is_synced_basename(&name));
        assert_eq!(
            crate::ids::extract_embedded(&name).unwrap().to_string(),
            "ext-squidwtf-song-99"
        );
    }

    #[test]
    fn synced_basename_layout() {
        assert!(is_synced_basename(
            "04 - [ext-squidwtf-song-99] Fables_ of _ Faubus_.opus"
        ));
        assert!(!is_synced_basename("Fables of Faubus.opus"));
        assert!(!is_synced_basename("4 - [ext-squidwtf-song-99] x.opus"));
        assert!(!is_synced_basename("04 - [local] x.opus"));
    }

    #[test]
    fn argument_pipelines() {
        let song = song();
        let tmp = Path::new("/m/jetstream/a/b/04 - [ext-squidwtf-song-99] t.opus.tmp");
        let cover = Path::new("/tmp/cover.jpg");

        let opus = transcode_args(&song, "https://cdn/x", Some(cover), DownloadFormat::Opus, tmp);
        // Opus never embeds the cover even when one was downloaded.
        assert!(opus.windows(2).any(|w| w == ["-map", "0:a"]));
        assert!(!opus.windows(2).any(|w| w == ["-map", "1:0"]));
        assert!(opus.windows(2).any(|w| w == ["-f", "opus"]));

        let mp3 = transcode_args(&song, "https://cdn/x", Some(cover), DownloadFormat::Mp3, tmp);
        assert!(mp3.windows(2).any(|w| w == ["-map", "1:0"]));
        assert!(mp3.windows(2).any(|w| w == ["-id3v2_version", "3"]));
        assert!(mp3.contains(&"-metadata:s:v".to_string()));

        let aac = transcode_args(&song, "https://cdn/x", Some(cover), DownloadFormat::Aac, tmp);
        assert!(aac.windows(2).any(|w| w == ["-disposition:v:0", "attached_pic"]));
        assert!(aac.windows(2).any(|w| w == ["-f", "adts"]));

        // Metadata makes it into every pipeline, external ID included.
        for args in [&opus, &mp3, &aac] {
            assert!(args.contains(&"title=Fables: of / Faubus?".to_string()));
            assert!(args.contains(&"track=4".to_string()));
            assert!(args.contains(&"date=1959".to_string()));
            assert!(args
                .iter()
                .any(|a| a.contains("[ID:ext-squidwtf-song-99]")));
        }
    }

    #[test]
    fn fallback_pipeline_has_no_cover_mapping() {
        let song = song();
        let tmp = Path::new("/x.mp3.tmp");
        let args = fallback_args(&song, "https://cdn/x", DownloadFormat::Mp3, tmp);
        assert!(!args.contains(&"-map".to_string()));
        assert!(args.windows(2).any(|w| w == ["-f", "mp3"]));
        assert!(args.iter().any(|a| a.contains("[ID:")));
    }

    #[test]
    fn audio_file_collection_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::write(root.join("a/b/01 - t.opus"), b"x").unwrap();
        std::fs::write(root.join("a/b/01 - t.opus.json"), b"{}").unwrap();
        std::fs::write(root.join("a/b/cover.jpg"), b"img").unwrap();
        std::fs::write(root.join("a/b/02 - t.FLAC"), b"x").unwrap();

        let mut files = collect_audio_files(root);
        files.sort();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a/b/01 - t.opus"));
        assert!(files[1].ends_with("a/b/02 - t.FLAC"));
    }

    #[test]
    fn missing_root_collects_nothing() {
        assert!(collect_audio_files(Path::new("/nonexistent/jetstream")).is_empty());
    }
}
