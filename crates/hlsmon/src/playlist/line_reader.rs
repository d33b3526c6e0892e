/// Forward-only line splitter over an in-memory playlist.
///
/// `\r`, `\n` and NUL all terminate a line and are never part of the
/// returned text. Runs of terminators produce empty lines, which the parser
/// ignores.
#[derive(Debug, Default)]
pub struct LineReader {
    text: String,
    cursor: usize,
}

fn is_terminator(c: char) -> bool {
    matches!(c, '\r' | '\n' | '\0')
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the text and rewind. Returns `false` for empty input.
    pub fn set_text(&mut self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        self.text = text.to_owned();
        self.cursor = 0;
        true
    }

    pub fn is_eof(&self) -> bool {
        self.cursor >= self.text.len()
    }

    /// Next line without its terminator, or an empty string at end of input.
    pub fn read_line(&mut self) -> &str {
        if self.is_eof() {
            return "";
        }
        let rest = &self.text[self.cursor..];
        let (line_len, advance) = match rest.char_indices().find(|&(_, c)| is_terminator(c)) {
            Some((idx, _)) => (idx, idx + 1),
            None => (rest.len(), rest.len()),
        };
        let start = self.cursor;
        self.cursor += advance;
        &self.text[start..start + line_len]
    }

    /// Iterate the remaining lines, including blank ones.
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { reader: self }
    }
}

pub struct Lines<'a> {
    reader: &'a mut LineReader,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.is_eof() {
            return None;
        }
        Some(self.reader.read_line().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_text() {
        let mut reader = LineReader::new();
        assert!(!reader.set_text(""));
        assert_eq!(reader.read_line(), "");
    }

    #[test]
    fn splits_on_all_terminators() {
        let mut reader = LineReader::new();
        assert!(reader.set_text("a\nb\rc\0d"));
        assert_eq!(reader.read_line(), "a");
        assert_eq!(reader.read_line(), "b");
        assert_eq!(reader.read_line(), "c");
        assert_eq!(reader.read_line(), "d");
        assert_eq!(reader.read_line(), "");
        assert!(reader.is_eof());
    }

    #[test]
    fn crlf_yields_blank_line_between() {
        let mut reader = LineReader::new();
        reader.set_text("#EXTM3U\r\nseg.ts\r\n");
        let lines: Vec<String> = reader.lines().collect();
        assert_eq!(lines, vec!["#EXTM3U", "", "seg.ts", ""]);
    }

    #[test]
    fn set_text_restarts_reader() {
        let mut reader = LineReader::new();
        reader.set_text("one\ntwo");
        assert_eq!(reader.read_line(), "one");
        reader.set_text("three");
        assert_eq!(reader.read_line(), "three");
        assert_eq!(reader.read_line(), "");
    }
}
