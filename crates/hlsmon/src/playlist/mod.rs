// M3U8 parsing: line splitting, URL resolution and the playlist model.

mod line_reader;
mod model;
mod parser;
mod url;

pub use line_reader::{LineReader, Lines};
pub use model::{KeyInfo, ParsedPlaylist, PlaylistStream, Segment, StreamSession};
pub use parser::{PlaylistFetch, PlaylistParser, parse_duration};
pub use url::{basename, has_scheme, resolve_url};
