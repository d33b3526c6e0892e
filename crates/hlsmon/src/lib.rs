// HLS ingest and stream-health monitoring engine
pub mod analyzer;
pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod downloader;
pub mod error;
pub mod events;
pub mod playlist;
pub mod proxy;
pub mod retry;
pub mod sync;
pub mod transfer;
pub mod writer;

// Export common types for ease of use
pub use analyzer::{NullAnalyzer, SegmentAnalyzer};
pub use buffer::{BufferDuration, BufferEstimator, PlaybackEstimator};
pub use config::{MonitorConfig, PlaylistConfig, RecordConfig, TransferConfig};
pub use dispatcher::MessageDispatcher;
pub use downloader::{Downloader, PendingQueue, SessionReport, merge_new_segments};
pub use error::{HlsError, PlaylistError, TransferError};
pub use events::{
    Diagnosis, DownloadHistory, DownloadProgress, EventCategory, EventKind, EventPayload,
    EventRecord, EventSink, ReportParam, Severity,
};
pub use playlist::{
    LineReader, ParsedPlaylist, PlaylistFetch, PlaylistParser, PlaylistStream, Segment,
    StreamSession, resolve_url,
};
pub use proxy::{ProxyConfig, ProxyType};
pub use retry::RetryPolicy;
pub use sync::{Event, ResetMode};
pub use transfer::{Fetched, HttpTransfer, Transfer, TransferInfo, TransferState};
pub use writer::SegmentWriter;
