//! Maps library-native identifiers onto catalog identifiers.
//!
//! A track the library knows about may really be catalog-backed: synced
//! files embed their external ID in the filename, older ghost placeholder
//! files carry it in a `TIDAL_ID` tag frame, and as a last resort the
//! library's own metadata is thrown at the catalog search (self-healing,
//! first match wins). Anything that fails to resolve stays native and is
//! served by the library proxy.

use std::path::{Path, PathBuf};

use lofty::file::TaggedFileExt;
use lofty::tag::ItemKey;
use tracing::{debug, info, warn};

use crate::gateway::GatewayClient;
use crate::ids::{self, Identifier};
use crate::library::{LibraryClient, RequestContext};

/// Files smaller than this are treated as ghost placeholders; real audio is
/// never this small, covers embedded in dummies can reach a few hundred KB.
pub const GHOST_MAX_SIZE: u64 = 1024 * 1024;

const TAG_DESCRIPTION: &str = "TIDAL_ID";

pub fn is_ghost_size(len: u64) -> bool {
    len < GHOST_MAX_SIZE
}

/// A library-relative path becomes absolute under the music folder.
pub fn absolute_media_path(music_folder: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        music_folder.join(p)
    }
}

/// Read the external ID out of a user-defined text frame, if any.
fn read_embedded_tag(path: &Path) -> Option<String> {
    let tagged = lofty::read_from_path(path).ok()?;
    for tag in tagged.tags() {
        if let Some(value) = tag.get_string(&ItemKey::Unknown(TAG_DESCRIPTION.to_string())) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Resolve a song identifier.
///
/// External identifiers pass through untouched. For native identifiers the
/// library is asked for the song's stored path and metadata, then:
/// path-embedded ID, tag-embedded ID, and finally a metadata search for
/// ghost-sized or missing files. Failures fall back to `Native`.
pub async fn resolve_song_id(
    library: &LibraryClient,
    gateway: &GatewayClient,
    ctx: &RequestContext,
    music_folder: &Path,
    raw_id: &str,
) -> Identifier {
    if let Identifier::External(ext) = ids::decode(raw_id) {
        return Identifier::External(ext);
    }

    let attrs = match library.get_song_attrs(ctx, raw_id).await {
        Ok(Some(attrs)) => attrs,
        Ok(None) => return Identifier::Native(raw_id.to_string()),
        Err(e) => {
            warn!("resolver: library lookup for {raw_id} failed: {e}");
            return Identifier::Native(raw_id.to_string());
        }
    };

    if attrs.path.is_empty() {
        return Identifier::Native(raw_id.to_string());
    }

    // 1. Path-embedded resolution, no disk access needed.
    if let Some(ext) = ids::extract_embedded(&attrs.path) {
        info!("resolver: {raw_id} resolved from path to {ext}");
        return Identifier::External(ext);
    }

    // 2. Stat the file: undersized or missing means ghost. Tags are checked
    // on any regular file regardless of size.
    let full_path = absolute_media_path(music_folder, &attrs.path);
    let mut is_ghost = false;
    match tokio::fs::metadata(&full_path).await {
        Ok(meta) if meta.is_file() => {
            if is_ghost_size(meta.len()) {
                debug!(
                    "resolver: {} is {} bytes, treating as ghost",
                    full_path.display(),
                    meta.len()
                );
                is_ghost = true;
            }

            let tag_path = full_path.clone();
            let tagged = tokio::task::spawn_blocking(move || read_embedded_tag(&tag_path)).await;
            if let Ok(Some(value)) = tagged {
                if let Identifier::External(ext) = ids::decode(&value) {
                    info!("resolver: {raw_id} resolved from tag to {ext}");
                    return Identifier::External(ext);
                }
            }
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(
                "resolver: {} missing on disk, treating as ghost",
                full_path.display()
            );
            is_ghost = true;
        }
        Err(e) => {
            warn!("resolver: stat {} failed: {e}", full_path.display());
        }
    }

    // 3. Self-healing metadata search.
    if is_ghost && !attrs.artist.is_empty() && !attrs.title.is_empty() {
        match gateway.search_one(&attrs.artist, &attrs.title).await {
            Ok(ext) => {
                info!(
                    "resolver: {raw_id} self-healed via search ({} - {}) to {ext}",
                    attrs.artist, attrs.title
                );
                return Identifier::External(ext);
            }
            Err(e) => {
                warn!(
                    "resolver: search fallback for {} - {} failed: {e}",
                    attrs.artist, attrs.title
                );
            }
        }
    }

    Identifier::Native(raw_id.to_string())
}

/// Resolve an album identifier via the library's album name.
pub async fn resolve_album_id(
    library: &LibraryClient,
    gateway: &GatewayClient,
    ctx: &RequestContext,
    raw_id: &str,
) -> Identifier {
    if let Identifier::External(ext) = ids::decode(raw_id) {
        return Identifier::External(ext);
    }

    let attrs = match library.get_album_attrs(ctx, raw_id).await {
        Ok(Some(attrs)) => attrs,
        Ok(None) => return Identifier::Native(raw_id.to_string()),
        Err(e) => {
            warn!("resolver: album lookup for {raw_id} failed: {e}");
            return Identifier::Native(raw_id.to_string());
        }
    };

    match gateway.search_one_album(&attrs.artist, &attrs.title).await {
        Ok(ext) => {
            info!("resolver: album {raw_id} resolved to {ext}");
            Identifier::External(ext)
        }
        Err(_) => Identifier::Native(raw_id.to_string()),
    }
}

/// Resolve an artist identifier via the library's artist name.
pub async fn resolve_artist_id(
    library: &LibraryClient,
    gateway: &GatewayClient,
    ctx: &RequestContext,
    raw_id: &str,
) -> Identifier {
    if let Identifier::External(ext) = ids::decode(raw_id) {
        return Identifier::External(ext);
    }

    let name = match library.get_artist_name(ctx, raw_id).await {
        Ok(Some(name)) => name,
        Ok(None) => return Identifier::Native(raw_id.to_string()),
        Err(e) => {
            warn!("resolver: artist lookup for {raw_id} failed: {e}");
            return Identifier::Native(raw_id.to_string());
        }
    };

    match gateway.search_one_artist(&name).await {
        Ok(ext) => {
            info!("resolver: artist {raw_id} ({name}) resolved to {ext}");
            Identifier::External(ext)
        }
        Err(_) => Identifier::Native(raw_id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ghost_threshold() {
        assert!(is_ghost_size(0));
        assert!(is_ghost_size(512 * 1024));
        assert!(is_ghost_size(GHOST_MAX_SIZE - 1));
        assert!(!is_ghost_size(GHOST_MAX_SIZE));
        assert!(!is_ghost_size(40 * 1024 * 1024));
    }

    #[test]
    fn media_paths_are_rooted_in_the_music_folder() {
        let root = Path::new("/music");
        assert_eq!(
            absolute_media_path(root, "Band/Album/01.flac"),
            PathBuf::from("/music/Band/Album/01.flac")
        );
        assert_eq!(
            absolute_media_path(root, "/srv/media/x.mp3"),
            PathBuf::from("/srv/media/x.mp3")
        );
    }

    #[test]
    fn tag_reading_tolerates_non_audio_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghost.mp3");
        std::fs::write(&path, b"not really audio").unwrap();
        assert_eq!(read_embedded_tag(&path), None);
        assert_eq!(read_embedded_tag(&dir.path().join("missing.mp3")), None);
    }
}
