use bytes::Bytes;

use crate::playlist::Segment;

/// Receives every successfully downloaded segment.
///
/// Transport-stream inspection lives behind this trait; the engine itself
/// only hands over the bytes.
pub trait SegmentAnalyzer: Send {
    fn analyze(&mut self, segment: &Segment, data: &Bytes);
}

/// Analyzer that ignores its input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAnalyzer;

impl SegmentAnalyzer for NullAnalyzer {
    fn analyze(&mut self, _segment: &Segment, _data: &Bytes) {}
}
