//! Identifier codec for catalog-backed resources.
//!
//! External resources are addressed as `ext-<provider>-<kind>-<opaque>`.
//! The opaque segment may itself contain `-`, so decoding splits into at
//! most four segments and rejoins the tail. Every other component goes
//! through this module; nothing else is allowed to pattern-match
//! identifier strings.

use std::fmt;

/// Prefix marking an identifier as catalog-backed.
const EXT_PREFIX: &str = "ext-";

/// A decoded external identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalId {
    pub provider: String,
    pub kind: String,
    pub id: String,
}

impl ExternalId {
    pub fn new(provider: &str, kind: &str, id: &str) -> Self {
        Self {
            provider: provider.to_string(),
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_song(&self) -> bool {
        self.kind == "song"
    }

    pub fn is_album(&self) -> bool {
        self.kind == "album"
    }

    pub fn is_artist(&self) -> bool {
        self.kind == "artist"
    }

    pub fn is_playlist(&self) -> bool {
        self.kind == "playlist"
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", encode(&self.provider, &self.kind, &self.id))
    }
}

/// Result of decoding a Subsonic identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    External(ExternalId),
    Native(String),
}

impl Identifier {
    /// The external identifier, when this is one.
    pub fn into_external(self) -> Option<ExternalId> {
        match self {
            Identifier::External(ext) => Some(ext),
            Identifier::Native(_) => None,
        }
    }
}

/// Build an external identifier string.
pub fn encode(provider: &str, kind: &str, id: &str) -> String {
    format!("ext-{provider}-{kind}-{id}")
}

/// Decode an identifier string.
///
/// Anything that does not start with `ext-` or has fewer than four
/// `-`-separated segments is native. The opaque tail is preserved
/// verbatim, dashes included.
pub fn decode(raw: &str) -> Identifier {
    if !raw.starts_with(EXT_PREFIX) {
        return Identifier::Native(raw.to_string());
    }

    let mut parts = raw.splitn(4, '-');
    let _ext = parts.next();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(provider), Some(kind), Some(id)) => Identifier::External(ExternalId {
            provider: provider.to_string(),
            kind: kind.to_string(),
            id: id.to_string(),
        }),
        _ => Identifier::Native(raw.to_string()),
    }
}

pub fn is_external(raw: &str) -> bool {
    matches!(decode(raw), Identifier::External(_))
}

/// Extract an external identifier embedded in a file path.
///
/// Synced files carry their identifier in the basename as `[ext-...]`;
/// this is the fastest resolution path and needs no disk access.
pub fn extract_embedded(path: &str) -> Option<ExternalId> {
    let start = path.find("[ext-")?;
    let rest = &path[start + 1..];
    let end = rest.find(']')?;
    match decode(&rest[..end]) {
        Identifier::External(ext) => Some(ext),
        Identifier::Native(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_components() {
        let id = encode("squidwtf", "song", "12345");
        assert_eq!(id, "ext-squidwtf-song-12345");
        assert_eq!(
            decode(&id),
            Identifier::External(ExternalId::new("squidwtf", "song", "12345"))
        );
    }

    #[test]
    fn opaque_segment_keeps_dashes() {
        assert_eq!(
            decode("ext-p-song-7-abc"),
            Identifier::External(ExternalId::new("p", "song", "7-abc"))
        );
        let ext = ExternalId::new("p", "playlist", "550e8400-e29b-41d4");
        assert_eq!(decode(&ext.to_string()), Identifier::External(ext));
    }

    #[test]
    fn native_ids_pass_through() {
        assert_eq!(
            decode("3b9c0f41d2"),
            Identifier::Native("3b9c0f41d2".to_string())
        );
        assert_eq!(decode(""), Identifier::Native(String::new()));
    }

    #[test]
    fn short_forms_are_native() {
        // The legacy ext-<provider>-<id> form is no longer recognized.
        assert_eq!(
            decode("ext-squidwtf-123"),
            Identifier::Native("ext-squidwtf-123".to_string())
        );
        assert_eq!(decode("ext-"), Identifier::Native("ext-".to_string()));
    }

    #[test]
    fn embedded_id_is_found_in_paths() {
        let path = "/music/jetstream/Artist/Album/03 - [ext-squidwtf-song-987] Title.opus";
        assert_eq!(
            extract_embedded(path),
            Some(ExternalId::new("squidwtf", "song", "987"))
        );
        assert_eq!(extract_embedded("/music/regular/track.flac"), None);
        // A bracketed token that is not a full external ID does not count.
        assert_eq!(extract_embedded("/music/[ext-broken] x.mp3"), None);
    }

    #[test]
    fn kind_helpers() {
        let ext = ExternalId::new("p", "album", "1");
        assert!(ext.is_album());
        assert!(!ext.is_song());
    }

    #[test]
    fn into_external_drops_native() {
        assert_eq!(decode("local-1").into_external(), None);
        assert_eq!(
            decode("ext-p-artist-3").into_external(),
            Some(ExternalId::new("p", "artist", "3"))
        );
    }
}
