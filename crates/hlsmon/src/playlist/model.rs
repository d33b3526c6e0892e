// Session / stream / segment model produced by the playlist parser.

use serde::Serialize;

/// One media chunk referenced by a playlist entry.
///
/// Segments are compared by URL for de-duplication and are never mutated
/// once the parser has built them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// Media sequence number (`#EXT-X-MEDIA-SEQUENCE` + position).
    pub sequence: u64,
    /// Duration in whole seconds, `-1` when no `#EXTINF` preceded the URI.
    pub duration: i64,
    /// Advisory size in bytes, `0` when unknown.
    pub size: u64,
    /// Absolute URL.
    pub url: String,
    /// Absolute key URL when the segment is AES-128 encrypted.
    pub key_path: Option<String>,
    /// Explicit IV from `#EXT-X-KEY`, if any.
    pub aes_iv: Option<[u8; 16]>,
    pub key_loaded: bool,
    /// Preceded by `#EXT-X-DISCONTINUITY`.
    pub discontinuity: bool,
    /// Raw `#EXT-X-PROGRAM-DATE-TIME` value applying to this segment.
    pub program_date_time: Option<String>,
}

impl Segment {
    pub fn new(sequence: u64, duration: i64, url: impl Into<String>) -> Self {
        Self {
            sequence,
            duration,
            size: 0,
            url: url.into(),
            key_path: None,
            aes_iv: None,
            key_loaded: false,
            discontinuity: false,
            program_date_time: None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.key_path.is_some()
    }

    /// IV used for decryption: the declared one, or the media sequence number
    /// as a big-endian 128-bit integer.
    pub fn effective_iv(&self) -> [u8; 16] {
        self.aes_iv
            .unwrap_or_else(|| u128::from(self.sequence).to_be_bytes())
    }

    /// Duration clamped to zero, for buffer arithmetic.
    pub fn playable_seconds(&self) -> f64 {
        self.duration.max(0) as f64
    }
}

/// Encryption state carried between `#EXT-X-KEY` directives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyInfo {
    pub key_path: Option<String>,
    pub iv: Option<[u8; 16]>,
}

/// One variant (or the single media playlist) of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistStream {
    pub id: u32,
    pub version: u32,
    pub media_sequence: u64,
    pub target_duration: u64,
    pub bandwidth: u64,
    pub url: String,
    pub cache_allowed: bool,
    pub key: KeyInfo,
    pub segment_count: usize,
}

impl PlaylistStream {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: 0,
            version: 1,
            media_sequence: 0,
            target_duration: 0,
            bandwidth: 0,
            url: url.into(),
            cache_allowed: true,
            key: KeyInfo::default(),
            segment_count: 0,
        }
    }
}

/// Session-wide facts derived from the initial playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamSession {
    pub playlist_url: String,
    pub is_live: bool,
    pub is_master: bool,
    pub parse_error: Option<String>,
    pub warned_aes: bool,
}

/// Result of parsing a media playlist (directly or through a master).
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPlaylist {
    pub session: StreamSession,
    /// Variants of the master playlist, empty for a plain media playlist.
    pub variants: Vec<PlaylistStream>,
    /// The media playlist the segments belong to.
    pub stream: PlaylistStream,
    pub segments: Vec<Segment>,
    /// Raw text of the media playlist.
    pub media_text: String,
    /// Non-fatal directive failures encountered while parsing.
    pub warnings: Vec<String>,
}

impl ParsedPlaylist {
    pub fn is_live(&self) -> bool {
        self.session.is_live
    }

    pub fn has_encryption(&self) -> bool {
        self.segments.iter().any(Segment::is_encrypted)
    }
}
