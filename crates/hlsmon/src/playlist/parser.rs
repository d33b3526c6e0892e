// Playlist Parser: turns M3U8 text into the session / stream / segment model.

use crate::error::{PlaylistError, TransferError};
use crate::playlist::line_reader::LineReader;
use crate::playlist::model::{KeyInfo, ParsedPlaylist, PlaylistStream, Segment, StreamSession};
use crate::playlist::url::resolve_url;
use tracing::{debug, trace, warn};

pub const TAG_EXTM3U: &str = "#EXTM3U";
pub const TAG_TARGET_DURATION: &str = "#EXT-X-TARGETDURATION";
pub const TAG_MEDIA_SEQUENCE: &str = "#EXT-X-MEDIA-SEQUENCE";
pub const TAG_KEY: &str = "#EXT-X-KEY";
pub const TAG_ALLOW_CACHE: &str = "#EXT-X-ALLOW-CACHE";
pub const TAG_VERSION: &str = "#EXT-X-VERSION";
pub const TAG_ENDLIST: &str = "#EXT-X-ENDLIST";
pub const TAG_STREAM_INF: &str = "#EXT-X-STREAM-INF";
pub const TAG_DISCONTINUITY: &str = "#EXT-X-DISCONTINUITY";
pub const TAG_PROGRAM_DATE_TIME: &str = "#EXT-X-PROGRAM-DATE-TIME";
pub const TAG_EXTINF: &str = "#EXTINF";

const RECOGNIZED_TAGS: [&str; 10] = [
    TAG_TARGET_DURATION,
    TAG_MEDIA_SEQUENCE,
    TAG_KEY,
    TAG_ALLOW_CACHE,
    TAG_VERSION,
    TAG_ENDLIST,
    TAG_STREAM_INF,
    TAG_DISCONTINUITY,
    TAG_PROGRAM_DATE_TIME,
    TAG_EXTINF,
];

const MIN_VERSION: u32 = 1;
const MAX_VERSION: u32 = 3;

/// Fetch capability used to follow a master playlist to its first variant.
///
/// Injected so the parser never performs I/O on its own.
pub trait PlaylistFetch {
    fn fetch_playlist(&self, url: &str) -> Result<String, TransferError>;
}

impl<F> PlaylistFetch for F
where
    F: Fn(&str) -> Result<String, TransferError>,
{
    fn fetch_playlist(&self, url: &str) -> Result<String, TransferError> {
        self(url)
    }
}

/// Splits an attribute list on commas outside quotes and yields `(KEY, value)`
/// pairs with surrounding quotes removed.
fn parse_attributes(rest: &str) -> Vec<(String, String)> {
    let mut parts: Vec<&str> = Vec::new();
    let mut in_quotes = false;
    let mut start = 0usize;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(rest[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < rest.len() {
        parts.push(rest[start..].trim());
    }

    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .filter_map(|part| {
            let (k, v) = part.split_once('=')?;
            let mut val = v.trim();
            if let Some(stripped) = val.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                val = stripped;
            }
            Some((k.trim().to_ascii_uppercase(), val.to_string()))
        })
        .collect()
}

fn attribute<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Value after `TAG:`; `None` if the line is not that tag.
fn tag_value<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(tag)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix(':')
}

fn parse_iv(value: &str) -> Option<[u8; 16]> {
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))?;
    if hex.is_empty() || hex.len() > 32 {
        return None;
    }
    let parsed = u128::from_str_radix(hex, 16).ok()?;
    Some(parsed.to_be_bytes())
}

/// Duration in whole seconds: integer semantics before version 3, a float
/// rounded half-up from version 3 on.
pub fn parse_duration(text: &str, version: u32) -> Option<i64> {
    let text = text.trim();
    if version < 3 {
        if let Ok(value) = text.parse::<i64>() {
            return Some(value);
        }
        // Integer playlists that still carry a fraction keep the whole part.
        let value = text.parse::<f64>().ok()?;
        return value.is_finite().then(|| value.trunc() as i64);
    }
    let value = text.parse::<f64>().ok()?;
    value.is_finite().then(|| (value + 0.5).floor() as i64)
}

#[derive(Debug, Clone)]
pub struct PlaylistParser {
    max_depth: usize,
}

impl Default for PlaylistParser {
    fn default() -> Self {
        Self { max_depth: 3 }
    }
}

struct MediaState {
    version: u32,
    pending_duration: Option<i64>,
    pending_discontinuity: bool,
    pending_date_time: Option<String>,
    end_list: bool,
}

impl PlaylistParser {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    /// True iff the text starts with the playlist signature and carries at
    /// least one recognized directive.
    pub fn is_playlist(text: &str) -> bool {
        let text = text.trim_start_matches('\u{feff}').trim_start();
        if !text.starts_with(TAG_EXTM3U) {
            return false;
        }
        let mut reader = LineReader::new();
        if !reader.set_text(text) {
            return false;
        }
        reader.lines().any(|line| {
            let line = line.trim();
            RECOGNIZED_TAGS.iter().any(|tag| tag_value(line, tag).is_some())
        })
    }

    /// True iff a variant-stream directive is present.
    pub fn is_master(text: &str) -> bool {
        let mut reader = LineReader::new();
        if !reader.set_text(text) {
            return false;
        }
        reader
            .lines()
            .any(|line| tag_value(line.trim(), TAG_STREAM_INF).is_some())
    }

    /// Extract one stream per `#EXT-X-STREAM-INF` entry.
    pub fn parse_master(
        &self,
        text: &str,
        playlist_url: &str,
    ) -> Result<Vec<PlaylistStream>, PlaylistError> {
        let mut reader = LineReader::new();
        if !reader.set_text(text) {
            return Err(PlaylistError::NotPlaylist);
        }

        let mut variants = Vec::new();
        let mut pending: Option<(u32, u64)> = None;

        for line in reader.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = tag_value(line, TAG_STREAM_INF) {
                let attrs = parse_attributes(rest);
                let bandwidth = match attribute(&attrs, "BANDWIDTH") {
                    None => return Err(PlaylistError::missing(TAG_STREAM_INF, "BANDWIDTH")),
                    Some(value) => match value.parse::<u64>() {
                        Ok(bw) if bw > 0 => bw,
                        _ => return Err(PlaylistError::invalid(TAG_STREAM_INF, value)),
                    },
                };
                let program_id = match attribute(&attrs, "PROGRAM-ID") {
                    None => variants.len() as u32,
                    Some(value) => value
                        .parse::<u32>()
                        .map_err(|_| PlaylistError::invalid(TAG_STREAM_INF, value))?,
                };
                if pending.is_some() {
                    warn!("Variant declaration without URI skipped");
                }
                pending = Some((program_id, bandwidth));
                continue;
            }
            if line.starts_with('#') {
                continue;
            }
            if let Some((id, bandwidth)) = pending.take() {
                let mut stream = PlaylistStream::new(resolve_url(playlist_url, line));
                stream.id = id;
                stream.bandwidth = bandwidth;
                trace!(id, bandwidth, url = %stream.url, "Variant stream");
                variants.push(stream);
            }
        }

        if variants.is_empty() {
            return Err(PlaylistError::NoVariants);
        }
        debug!(count = variants.len(), "Parsed master playlist");
        Ok(variants)
    }

    /// Parse a media playlist line by line.
    pub fn parse_media(
        &self,
        text: &str,
        playlist_url: &str,
    ) -> Result<ParsedPlaylist, PlaylistError> {
        let mut reader = LineReader::new();
        if !reader.set_text(text) {
            return Err(PlaylistError::NotPlaylist);
        }

        let mut stream = PlaylistStream::new(playlist_url);
        let mut segments: Vec<Segment> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut state = MediaState {
            version: MIN_VERSION,
            pending_duration: None,
            pending_discontinuity: false,
            pending_date_time: None,
            end_list: false,
        };

        for line in reader.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('#') {
                if let Err(err) = self.apply_directive(line, &mut stream, &mut state) {
                    if err.is_fatal() {
                        return Err(err);
                    }
                    warn!(line, error = %err, "Ignoring malformed directive");
                    warnings.push(err.to_string());
                }
                continue;
            }

            let mut segment = Segment::new(
                stream.media_sequence + segments.len() as u64,
                state.pending_duration.take().unwrap_or(-1),
                resolve_url(playlist_url, line),
            );
            segment.key_path = stream.key.key_path.clone();
            segment.aes_iv = stream.key.iv;
            segment.discontinuity = std::mem::take(&mut state.pending_discontinuity);
            segment.program_date_time = state.pending_date_time.take();
            segments.push(segment);
        }

        stream.segment_count = segments.len();
        let session = StreamSession {
            playlist_url: playlist_url.to_string(),
            is_live: !state.end_list,
            is_master: false,
            parse_error: None,
            warned_aes: false,
        };
        Ok(ParsedPlaylist {
            session,
            variants: Vec::new(),
            stream,
            segments,
            media_text: text.to_string(),
            warnings,
        })
    }

    fn apply_directive(
        &self,
        line: &str,
        stream: &mut PlaylistStream,
        state: &mut MediaState,
    ) -> Result<(), PlaylistError> {
        if let Some(rest) = tag_value(line, TAG_EXTINF) {
            let text = rest.split(',').next().unwrap_or_default();
            let duration = parse_duration(text, state.version)
                .ok_or_else(|| PlaylistError::invalid(TAG_EXTINF, text))?;
            state.pending_duration = Some(duration);
        } else if let Some(rest) = tag_value(line, TAG_TARGET_DURATION) {
            stream.target_duration = rest
                .trim()
                .parse::<u64>()
                .map_err(|_| PlaylistError::invalid(TAG_TARGET_DURATION, rest))?;
        } else if let Some(rest) = tag_value(line, TAG_MEDIA_SEQUENCE) {
            stream.media_sequence = rest
                .trim()
                .parse::<u64>()
                .map_err(|_| PlaylistError::invalid(TAG_MEDIA_SEQUENCE, rest))?;
        } else if let Some(rest) = tag_value(line, TAG_VERSION) {
            let version = rest
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|v| (MIN_VERSION..=MAX_VERSION).contains(v))
                .ok_or_else(|| PlaylistError::UnsupportedVersion(rest.trim().to_string()))?;
            stream.version = version;
            state.version = version;
        } else if let Some(rest) = tag_value(line, TAG_ALLOW_CACHE) {
            stream.cache_allowed = match rest.trim() {
                "YES" => true,
                "NO" => false,
                other => return Err(PlaylistError::invalid(TAG_ALLOW_CACHE, other)),
            };
        } else if let Some(rest) = tag_value(line, TAG_KEY) {
            // A failed key declaration leaves the following segments without key material.
            let key = Self::parse_key(rest, &stream.url);
            stream.key = key.clone().unwrap_or_default();
            key?;
        } else if tag_value(line, TAG_ENDLIST).is_some() {
            state.end_list = true;
        } else if tag_value(line, TAG_DISCONTINUITY).is_some() {
            state.pending_discontinuity = true;
        } else if let Some(rest) = tag_value(line, TAG_PROGRAM_DATE_TIME) {
            state.pending_date_time = Some(rest.trim().to_string());
        }
        // Comments and unknown directives are ignored.
        Ok(())
    }

    fn parse_key(rest: &str, stream_url: &str) -> Result<KeyInfo, PlaylistError> {
        let attrs = parse_attributes(rest);
        let method =
            attribute(&attrs, "METHOD").ok_or_else(|| PlaylistError::missing(TAG_KEY, "METHOD"))?;
        match method {
            "NONE" => Ok(KeyInfo::default()),
            "AES-128" => {
                let uri =
                    attribute(&attrs, "URI").ok_or_else(|| PlaylistError::missing(TAG_KEY, "URI"))?;
                let iv = match attribute(&attrs, "IV") {
                    None => None,
                    Some(value) => {
                        Some(parse_iv(value).ok_or_else(|| PlaylistError::invalid(TAG_KEY, value))?)
                    }
                };
                Ok(KeyInfo {
                    key_path: Some(resolve_url(stream_url, uri)),
                    iv,
                })
            }
            other => Err(PlaylistError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Parse any playlist. A master playlist is followed to its first variant
    /// through `fetch` and that variant is parsed in its place.
    pub fn parse(
        &self,
        text: &str,
        playlist_url: &str,
        fetch: &dyn PlaylistFetch,
    ) -> Result<ParsedPlaylist, PlaylistError> {
        self.parse_at_depth(text, playlist_url, fetch, 0)
    }

    fn parse_at_depth(
        &self,
        text: &str,
        playlist_url: &str,
        fetch: &dyn PlaylistFetch,
        depth: usize,
    ) -> Result<ParsedPlaylist, PlaylistError> {
        if !Self::is_playlist(text) {
            return Err(PlaylistError::NotPlaylist);
        }
        if !Self::is_master(text) {
            return self.parse_media(text, playlist_url);
        }
        if depth >= self.max_depth {
            return Err(PlaylistError::RecursionLimit(self.max_depth));
        }

        let variants = self.parse_master(text, playlist_url)?;
        let first = &variants[0];
        debug!(url = %first.url, bandwidth = first.bandwidth, "Following first variant");
        let variant_text =
            fetch
                .fetch_playlist(&first.url)
                .map_err(|e| PlaylistError::VariantFetch {
                    url: first.url.clone(),
                    reason: e.to_string(),
                })?;

        let mut parsed = self.parse_at_depth(&variant_text, &first.url, fetch, depth + 1)?;
        parsed.stream.id = first.id;
        parsed.stream.bandwidth = first.bandwidth;
        parsed.session.playlist_url = playlist_url.to_string();
        parsed.session.is_master = true;
        parsed.variants = variants;
        Ok(parsed)
    }
}
