//! Attribute-based XML codec for the Subsonic schema.
//!
//! Subsonic XML puts scalar fields in attributes, which does not map onto
//! the serde rendering used for JSON, so the XML side is written by hand:
//! the emitter builds the document with escaped attribute writes, the
//! parser reads the shapes the merger and resolver consume out of
//! `roxmltree`.

use roxmltree::{Document, Node};
use thiserror::Error;

use super::{
    Album, AlbumList2, AlbumWithSongs, Artist, ArtistWithAlbums, Directory, Error as SubError,
    Playlist, Playlists, Response, SearchResult, SearchResult2, SearchResult3, Song,
};

const XMLNS: &str = "http://subsonic.org/restapi";

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(#[from] roxmltree::Error),
    #[error("not a subsonic-response document")]
    MissingRoot,
}

// ---------------------------------------------------------------------------
// Emit
// ---------------------------------------------------------------------------

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&escape(value));
    out.push('"');
}

fn attr_opt(out: &mut String, name: &str, value: Option<&str>) {
    if let Some(v) = value {
        attr(out, name, v);
    }
}

fn attr_num<T: ToString>(out: &mut String, name: &str, value: Option<T>) {
    if let Some(v) = value {
        attr(out, name, &v.to_string());
    }
}

fn attr_bool(out: &mut String, name: &str, value: bool) {
    attr(out, name, if value { "true" } else { "false" });
}

fn write_song(out: &mut String, tag: &str, song: &Song) {
    out.push('<');
    out.push_str(tag);
    attr(out, "id", &song.id);
    attr_opt(out, "parent", song.parent.as_deref());
    attr(out, "title", &song.title);
    attr_bool(out, "isDir", song.is_dir);
    attr_opt(out, "album", song.album.as_deref());
    attr_opt(out, "albumId", song.album_id.as_deref());
    attr_opt(out, "artist", song.artist.as_deref());
    attr_opt(out, "artistId", song.artist_id.as_deref());
    attr_opt(out, "coverArt", song.cover_art.as_deref());
    attr_num(out, "duration", song.duration);
    attr_num(out, "bitRate", song.bit_rate);
    attr_num(out, "track", song.track);
    attr_num(out, "year", song.year);
    attr_opt(out, "genre", song.genre.as_deref());
    attr_num(out, "size", song.size);
    attr_opt(out, "suffix", song.suffix.as_deref());
    attr_opt(out, "contentType", song.content_type.as_deref());
    if song.is_video {
        attr_bool(out, "isVideo", true);
    }
    attr_opt(out, "path", song.path.as_deref());
    attr_opt(out, "starred", song.starred.as_deref());
    out.push_str("/>");
}

fn write_album(out: &mut String, album: &Album) {
    out.push_str("<album");
    album_attrs(out, album);
    out.push_str("/>");
}

fn album_attrs(out: &mut String, album: &Album) {
    attr(out, "id", &album.id);
    attr(out, "title", &album.title);
    attr_opt(out, "name", album.name.as_deref());
    attr_opt(out, "artist", album.artist.as_deref());
    attr_opt(out, "artistId", album.artist_id.as_deref());
    attr_opt(out, "coverArt", album.cover_art.as_deref());
    attr_num(out, "songCount", album.song_count);
    attr_num(out, "duration", album.duration);
    attr_num(out, "year", album.year);
    attr_opt(out, "starred", album.starred.as_deref());
    attr_bool(out, "isDir", album.is_dir);
}

fn write_artist(out: &mut String, artist: &Artist) {
    out.push_str("<artist");
    artist_attrs(out, artist);
    out.push_str("/>");
}

fn artist_attrs(out: &mut String, artist: &Artist) {
    attr(out, "id", &artist.id);
    attr(out, "name", &artist.name);
    attr_opt(out, "coverArt", artist.cover_art.as_deref());
    attr_num(out, "albumCount", artist.album_count);
}

fn write_playlist(out: &mut String, playlist: &Playlist) {
    out.push_str("<playlist");
    attr(out, "id", &playlist.id);
    attr(out, "name", &playlist.name);
    attr_num(out, "songCount", playlist.song_count);
    attr_num(out, "duration", playlist.duration);
    attr_opt(out, "created", playlist.created.as_deref());
    attr_opt(out, "owner", playlist.owner.as_deref());
    if let Some(public) = playlist.public {
        attr_bool(out, "public", public);
    }
    attr_opt(out, "coverArt", playlist.cover_art.as_deref());
    if playlist.entry.is_empty() {
        out.push_str("/>");
    } else {
        out.push('>');
        for song in &playlist.entry {
            write_song(out, "entry", song);
        }
        out.push_str("</playlist>");
    }
}

fn write_info(out: &mut String, tag: &str, info: &super::ArtistInfo) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    write_text_elem(out, "biography", info.biography.as_deref());
    write_text_elem(out, "musicBrainzId", info.music_brainz_id.as_deref());
    write_text_elem(out, "lastFmUrl", info.last_fm_url.as_deref());
    write_text_elem(out, "smallImageUrl", info.small_image_url.as_deref());
    write_text_elem(out, "mediumImageUrl", info.medium_image_url.as_deref());
    write_text_elem(out, "largeImageUrl", info.large_image_url.as_deref());
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn write_album_info(out: &mut String, tag: &str, info: &super::AlbumInfo) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    write_text_elem(out, "notes", info.notes.as_deref());
    write_text_elem(out, "musicBrainzId", info.music_brainz_id.as_deref());
    write_text_elem(out, "lastFmUrl", info.last_fm_url.as_deref());
    write_text_elem(out, "smallImageUrl", info.small_image_url.as_deref());
    write_text_elem(out, "mediumImageUrl", info.medium_image_url.as_deref());
    write_text_elem(out, "largeImageUrl", info.large_image_url.as_deref());
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn write_text_elem(out: &mut String, tag: &str, value: Option<&str>) {
    if let Some(v) = value {
        out.push('<');
        out.push_str(tag);
        out.push('>');
        out.push_str(&escape(v));
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    }
}

/// Render a [`Response`] as a Subsonic XML document.
pub fn to_xml(resp: &Response) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    out.push_str("<subsonic-response");
    attr(&mut out, "xmlns", XMLNS);
    attr(&mut out, "status", &resp.status);
    attr(&mut out, "version", &resp.version);
    out.push('>');

    if let Some(err) = &resp.error {
        out.push_str("<error");
        attr_num(&mut out, "code", Some(err.code));
        attr(&mut out, "message", &err.message);
        out.push_str("/>");
    }
    if let Some(sr) = &resp.search_result {
        out.push_str("<searchResult>");
        for song in &sr.matches {
            write_song(&mut out, "match", song);
        }
        out.push_str("</searchResult>");
    }
    if let Some(sr) = &resp.search_result2 {
        out.push_str("<searchResult2>");
        for artist in &sr.artist {
            write_artist(&mut out, artist);
        }
        for album in &sr.album {
            write_album(&mut out, album);
        }
        for song in &sr.song {
            write_song(&mut out, "song", song);
        }
        out.push_str("</searchResult2>");
    }
    if let Some(sr) = &resp.search_result3 {
        out.push_str("<searchResult3>");
        for artist in &sr.artist {
            write_artist(&mut out, artist);
        }
        for album in &sr.album {
            write_album(&mut out, album);
        }
        for song in &sr.song {
            write_song(&mut out, "song", song);
        }
        for playlist in &sr.playlist {
            write_playlist(&mut out, playlist);
        }
        out.push_str("</searchResult3>");
    }
    if let Some(playlists) = &resp.playlists {
        out.push_str("<playlists>");
        for playlist in &playlists.playlist {
            write_playlist(&mut out, playlist);
        }
        out.push_str("</playlists>");
    }
    if let Some(playlist) = &resp.playlist {
        write_playlist(&mut out, playlist);
    }
    if let Some(artist) = &resp.artist {
        out.push_str("<artist");
        artist_attrs(&mut out, &artist.artist);
        out.push('>');
        for album in &artist.album {
            write_album(&mut out, album);
        }
        out.push_str("</artist>");
    }
    if let Some(album) = &resp.album {
        out.push_str("<album");
        album_attrs(&mut out, &album.album);
        out.push('>');
        for song in &album.song {
            write_song(&mut out, "song", song);
        }
        out.push_str("</album>");
    }
    if let Some(song) = &resp.song {
        write_song(&mut out, "song", song);
    }
    if let Some(dir) = &resp.directory {
        out.push_str("<directory");
        attr(&mut out, "id", &dir.id);
        attr(&mut out, "name", &dir.name);
        out.push('>');
        for child in &dir.child {
            write_song(&mut out, "child", child);
        }
        out.push_str("</directory>");
    }
    if let Some(list) = &resp.album_list2 {
        out.push_str("<albumList2>");
        for album in &list.album {
            write_album(&mut out, album);
        }
        out.push_str("</albumList2>");
    }
    if let Some(info) = &resp.artist_info {
        write_info(&mut out, "artistInfo", info);
    }
    if let Some(info) = &resp.artist_info2 {
        write_info(&mut out, "artistInfo2", info);
    }
    if let Some(info) = &resp.album_info {
        write_album_info(&mut out, "albumInfo", info);
    }
    if let Some(info) = &resp.album_info2 {
        write_album_info(&mut out, "albumInfo2", info);
    }
    if let Some(similar) = &resp.similar_artists {
        out.push_str("<similarArtists>");
        for artist in &similar.artist {
            write_artist(&mut out, artist);
        }
        out.push_str("</similarArtists>");
    }
    if let Some(similar) = &resp.similar_artists2 {
        out.push_str("<similarArtists2>");
        for artist in &similar.artist {
            write_artist(&mut out, artist);
        }
        out.push_str("</similarArtists2>");
    }
    if let Some(similar) = &resp.similar_songs {
        out.push_str("<similarSongs>");
        for song in &similar.song {
            write_song(&mut out, "song", song);
        }
        out.push_str("</similarSongs>");
    }
    if let Some(similar) = &resp.similar_songs2 {
        out.push_str("<similarSongs2>");
        for song in &similar.song {
            write_song(&mut out, "song", song);
        }
        out.push_str("</similarSongs2>");
    }
    if let Some(top) = &resp.top_songs {
        out.push_str("<topSongs>");
        for song in &top.song {
            write_song(&mut out, "song", song);
        }
        out.push_str("</topSongs>");
    }
    if let Some(lyrics) = &resp.lyrics {
        out.push_str("<lyrics>");
        out.push_str(&escape(&lyrics.value));
        out.push_str("</lyrics>");
    }
    if let Some(ext) = &resp.open_subsonic_extensions {
        out.push_str("<openSubsonicExtensions>");
        for e in &ext.extension {
            out.push_str("<extension");
            attr(&mut out, "name", &e.name);
            out.push('>');
            for v in &e.version {
                write_text_elem(&mut out, "version", Some(v));
            }
            out.push_str("</extension>");
        }
        out.push_str("</openSubsonicExtensions>");
    }

    out.push_str("</subsonic-response>");
    out
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

fn a(node: Node, name: &str) -> Option<String> {
    node.attribute(name).map(str::to_string)
}

fn a_req(node: Node, name: &str) -> String {
    node.attribute(name).unwrap_or_default().to_string()
}

fn a_u32(node: Node, name: &str) -> Option<u32> {
    node.attribute(name).and_then(|v| v.parse().ok())
}

fn a_i32(node: Node, name: &str) -> Option<i32> {
    node.attribute(name).and_then(|v| v.parse().ok())
}

fn a_i64(node: Node, name: &str) -> Option<i64> {
    node.attribute(name).and_then(|v| v.parse().ok())
}

fn a_bool(node: Node, name: &str) -> bool {
    node.attribute(name) == Some("true")
}

fn parse_song(node: Node) -> Song {
    Song {
        id: a_req(node, "id"),
        parent: a(node, "parent"),
        title: a_req(node, "title"),
        is_dir: a_bool(node, "isDir"),
        album: a(node, "album"),
        album_id: a(node, "albumId"),
        artist: a(node, "artist"),
        artist_id: a(node, "artistId"),
        cover_art: a(node, "coverArt"),
        duration: a_u32(node, "duration"),
        bit_rate: a_u32(node, "bitRate"),
        track: a_u32(node, "track"),
        year: a_i32(node, "year"),
        genre: a(node, "genre"),
        size: a_i64(node, "size"),
        suffix: a(node, "suffix"),
        content_type: a(node, "contentType"),
        is_video: a_bool(node, "isVideo"),
        path: a(node, "path"),
        starred: a(node, "starred"),
    }
}

fn parse_album(node: Node) -> Album {
    Album {
        id: a_req(node, "id"),
        // Navidrome emits `name` on some endpoints and `title` on others.
        title: node
            .attribute("title")
            .or_else(|| node.attribute("name"))
            .unwrap_or_default()
            .to_string(),
        name: a(node, "name"),
        artist: a(node, "artist"),
        artist_id: a(node, "artistId"),
        cover_art: a(node, "coverArt"),
        song_count: a_u32(node, "songCount"),
        duration: a_u32(node, "duration"),
        year: a_i32(node, "year"),
        starred: a(node, "starred"),
        is_dir: a_bool(node, "isDir"),
    }
}

fn parse_artist(node: Node) -> Artist {
    Artist {
        id: a_req(node, "id"),
        name: a_req(node, "name"),
        cover_art: a(node, "coverArt"),
        album_count: a_u32(node, "albumCount"),
    }
}

fn parse_playlist(node: Node) -> Playlist {
    Playlist {
        id: a_req(node, "id"),
        name: a_req(node, "name"),
        song_count: a_u32(node, "songCount"),
        duration: a_u32(node, "duration"),
        created: a(node, "created"),
        owner: a(node, "owner"),
        public: node.attribute("public").map(|v| v == "true"),
        cover_art: a(node, "coverArt"),
        entry: children(node, "entry").map(parse_song).collect(),
    }
}

fn children<'a>(node: Node<'a, 'a>, name: &'a str) -> impl Iterator<Item = Node<'a, 'a>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

/// Parse a library XML response into the shapes the merger consumes.
///
/// Payload kinds not produced by any merged endpoint are left unset.
pub fn from_xml(input: &str) -> Result<Response, XmlError> {
    let doc = Document::parse(input)?;
    let root = doc.root_element();
    if root.tag_name().name() != "subsonic-response" {
        return Err(XmlError::MissingRoot);
    }

    let mut resp = Response {
        status: a_req(root, "status"),
        version: a_req(root, "version"),
        ..Default::default()
    };

    for node in root.children().filter(|n| n.is_element()) {
        match node.tag_name().name() {
            "error" => {
                resp.error = Some(SubError {
                    code: a_u32(node, "code").unwrap_or_default(),
                    message: a_req(node, "message"),
                });
            }
            "searchResult" => {
                resp.search_result = Some(SearchResult {
                    matches: children(node, "match").map(parse_song).collect(),
                });
            }
            "searchResult2" => {
                resp.search_result2 = Some(SearchResult2 {
                    artist: children(node, "artist").map(parse_artist).collect(),
                    album: children(node, "album").map(parse_album).collect(),
                    song: children(node, "song").map(parse_song).collect(),
                });
            }
            "searchResult3" => {
                resp.search_result3 = Some(SearchResult3 {
                    artist: children(node, "artist").map(parse_artist).collect(),
                    album: children(node, "album").map(parse_album).collect(),
                    song: children(node, "song").map(parse_song).collect(),
                    playlist: children(node, "playlist").map(parse_playlist).collect(),
                });
            }
            "playlists" => {
                resp.playlists = Some(Playlists {
                    playlist: children(node, "playlist").map(parse_playlist).collect(),
                });
            }
            "playlist" => {
                resp.playlist = Some(parse_playlist(node));
            }
            "albumList2" | "albumList" => {
                resp.album_list2 = Some(AlbumList2 {
                    album: children(node, "album").map(parse_album).collect(),
                });
            }
            "album" => {
                resp.album = Some(AlbumWithSongs {
                    album: parse_album(node),
                    song: children(node, "song").map(parse_song).collect(),
                });
            }
            "artist" => {
                resp.artist = Some(ArtistWithAlbums {
                    artist: parse_artist(node),
                    album: children(node, "album").map(parse_album).collect(),
                });
            }
            "directory" => {
                resp.directory = Some(Directory {
                    id: a_req(node, "id"),
                    name: a_req(node, "name"),
                    child: children(node, "child").map(parse_song).collect(),
                });
            }
            "song" => {
                resp.song = Some(parse_song(node));
            }
            _ => {}
        }
    }

    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_handles_markup() {
        assert_eq!(escape("AC/DC & <Friends>"), "AC/DC &amp; &lt;Friends&gt;");
        assert_eq!(escape("say \"hi\""), "say &quot;hi&quot;");
    }

    #[test]
    fn error_document() {
        let resp = Response::failed(70, "not found");
        let xml = to_xml(&resp);
        assert!(xml.contains("status=\"failed\""));
        assert!(xml.contains("<error code=\"70\" message=\"not found\"/>"));

        let parsed = from_xml(&xml).unwrap();
        assert_eq!(parsed.status, "failed");
        assert_eq!(parsed.error.unwrap().code, 70);
    }

    #[test]
    fn search3_round_trip() {
        let mut resp = Response::ok();
        resp.search_result3 = Some(SearchResult3 {
            artist: vec![Artist {
                id: "ar-1".to_string(),
                name: "Mingus".to_string(),
                ..Default::default()
            }],
            album: vec![Album {
                id: "al-1".to_string(),
                title: "Ah Um".to_string(),
                year: Some(1959),
                ..Default::default()
            }],
            song: vec![Song {
                id: "ext-p-song-9".to_string(),
                title: "Fables <of> Faubus".to_string(),
                duration: Some(488),
                ..Default::default()
            }],
            playlist: vec![],
        });

        let parsed = from_xml(&to_xml(&resp)).unwrap();
        let sr = parsed.search_result3.unwrap();
        assert_eq!(sr.artist[0].name, "Mingus");
        assert_eq!(sr.album[0].year, Some(1959));
        assert_eq!(sr.song[0].title, "Fables <of> Faubus");
        assert_eq!(sr.song[0].duration, Some(488));
    }

    #[test]
    fn parses_navidrome_song_shape() {
        let xml = r#"<subsonic-response xmlns="http://subsonic.org/restapi" status="ok" version="1.16.1">
            <song id="a1b2" parent="d1" title="Track" isDir="false"
                  artist="Someone" path="Someone/Album/01 Track.flac" suffix="flac"/>
        </subsonic-response>"#;
        let resp = from_xml(xml).unwrap();
        let song = resp.song.unwrap();
        assert_eq!(song.id, "a1b2");
        assert_eq!(song.path.as_deref(), Some("Someone/Album/01 Track.flac"));
        assert!(!song.is_dir);
    }

    #[test]
    fn album_title_falls_back_to_name() {
        let xml = r#"<subsonic-response status="ok" version="1.16.1">
            <albumList2><album id="1" name="Only Name" isDir="true"/></albumList2>
        </subsonic-response>"#;
        let resp = from_xml(xml).unwrap();
        let album = &resp.album_list2.unwrap().album[0];
        assert_eq!(album.title, "Only Name");
    }

    #[test]
    fn playlist_entries_round_trip() {
        let mut resp = Response::ok();
        resp.playlist = Some(Playlist {
            id: "ext-p-playlist-uuid-1".to_string(),
            name: "Mix".to_string(),
            song_count: Some(1),
            public: Some(true),
            entry: vec![Song {
                id: "ext-p-song-5".to_string(),
                title: "One".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        let parsed = from_xml(&to_xml(&resp)).unwrap();
        let playlist = parsed.playlist.unwrap();
        assert_eq!(playlist.entry.len(), 1);
        assert_eq!(playlist.public, Some(true));
    }

    #[test]
    fn rejects_foreign_documents() {
        assert!(matches!(
            from_xml("<other status=\"ok\"/>"),
            Err(XmlError::MissingRoot)
        ));
        assert!(from_xml("not xml at all").is_err());
    }
}
