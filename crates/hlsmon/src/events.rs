// Typed events reported to the embedder through the message dispatcher.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Kind tag of a reported event.
///
/// Codes are partitioned into ranges: `0x0000` segment-quality checks,
/// `0x1000` diagnostics, `0x2000` HLS protocol, `0x3000` HTTP protocol and
/// `0x4000` system/lifecycle. The payload variant is fixed per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u32)]
pub enum EventKind {
    /// Result of an external segment-quality check (payload: diagnosis).
    QualityCheck = 0x0001,

    /// Recoverable problem inside a running session (payload: diagnosis).
    Diagnosis = 0x1001,

    /// Initial playlist recognized; analysis begins (payload: text, playlist URL).
    HlsAnalysing = 0x2001,
    /// A reload merged new segments (payload: int, number of new segments).
    HlsPlaylistUpdated = 0x2002,
    /// Pending queue depth before a fetch (payload: int).
    HlsQueueDepth = 0x2003,
    /// Pending queue contents before a fetch (payload: text, one URL per line).
    HlsQueueContents = 0x2004,
    /// Estimated playable buffer (payload: float, seconds).
    HlsBufferDuration = 0x2005,
    /// Outcome of one segment download (payload: download history).
    HlsDownloadHistory = 0x2006,
    /// Stream carries AES-128 encrypted segments (payload: text, key URL).
    HlsEncrypted = 0x2007,
    /// Live playlist reached `#EXT-X-ENDLIST` (payload: text, playlist URL).
    HlsStreamEnded = 0x2008,

    /// Segment download in flight (payload: download progress).
    HttpDownloadProgress = 0x3001,
    /// Segment download failed and was dropped (payload: text, reason).
    HttpDownloadError = 0x3002,
    /// Segment download timed out and will be retried (payload: text, URL).
    HttpTimedOut = 0x3003,
    /// Response headers of a segment download (payload: text).
    HttpResponseHeaders = 0x3004,

    /// Session finished, stopped or failed to start (payload: none).
    SystemFinished = 0x4001,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventCategory {
    Quality,
    Diagnostic,
    Hls,
    Http,
    System,
}

impl EventKind {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn category(self) -> EventCategory {
        match self.code() >> 12 {
            0 => EventCategory::Quality,
            1 => EventCategory::Diagnostic,
            2 => EventCategory::Hls,
            3 => EventCategory::Http,
            _ => EventCategory::System,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnosis {
    pub severity: Severity,
    pub message: String,
    /// URL the diagnosis refers to, if any.
    pub url: Option<String>,
}

impl Diagnosis {
    pub fn warning(message: impl Into<String>, url: Option<&str>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            url: url.map(str::to_string),
        }
    }

    pub fn error(message: impl Into<String>, url: Option<&str>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            url: url.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub url: String,
    /// 0–100, or `None` when the server sent no content length.
    pub percent: Option<u8>,
    pub bytes_received: u64,
    pub total_bytes: Option<u64>,
}

impl DownloadProgress {
    pub fn new(url: &str, bytes_received: u64, total_bytes: Option<u64>) -> Self {
        let percent = total_bytes.filter(|t| *t > 0).map(|total| {
            let pct = bytes_received.saturating_mul(100) / total;
            pct.min(100) as u8
        });
        Self {
            url: url.to_string(),
            percent,
            bytes_received,
            total_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadHistory {
    pub url: String,
    pub sequence: u64,
    pub success: bool,
    pub bytes: u64,
    pub elapsed_ms: u64,
    /// Bytes per second, `0.0` on failure.
    pub throughput: f64,
    pub remote_addr: Option<String>,
    pub error: Option<String>,
}

/// Payload of an event; which variant is used is determined by the kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EventPayload {
    None,
    Text(String),
    Int(i64),
    Float(f64),
    Diagnosis(Diagnosis),
    Progress(DownloadProgress),
    History(DownloadHistory),
}

impl From<String> for EventPayload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for EventPayload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for EventPayload {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for EventPayload {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Diagnosis> for EventPayload {
    fn from(value: Diagnosis) -> Self {
        Self::Diagnosis(value)
    }
}

impl From<DownloadProgress> for EventPayload {
    fn from(value: DownloadProgress) -> Self {
        Self::Progress(value)
    }
}

impl From<DownloadHistory> for EventPayload {
    fn from(value: DownloadHistory) -> Self {
        Self::History(value)
    }
}

/// An event as queued by a producer. Never mutated after enqueue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl EventRecord {
    pub fn new(kind: EventKind, payload: EventPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            payload,
        }
    }

    pub fn as_param(&self) -> ReportParam<'_> {
        ReportParam {
            kind: self.kind,
            code: self.kind.code(),
            payload: &self.payload,
            timestamp_ms: self.timestamp.timestamp_millis(),
        }
    }
}

/// Uniform shape handed to the sink regardless of payload type.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReportParam<'a> {
    pub kind: EventKind,
    pub code: u32,
    pub payload: &'a EventPayload,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

/// The single delivery target of the dispatcher.
pub trait EventSink: Send {
    fn report(&mut self, param: ReportParam<'_>);
}

impl<F> EventSink for F
where
    F: FnMut(ReportParam<'_>) + Send,
{
    fn report(&mut self, param: ReportParam<'_>) {
        self(param)
    }
}
