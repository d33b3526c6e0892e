// Downloader: drives one monitoring session from the initial playlist fetch
// to FINISHED.
//
// Live sessions run two loops in parallel: the reload loop on its own thread
// re-fetches the media playlist and appends unseen segments to the pending
// queue, while the main loop on the caller's thread drains that queue through
// the transfer client. VOD sessions enqueue every segment up front and run
// only the main loop.

mod queue;

pub use queue::{PendingQueue, merge_new_segments};

use crate::analyzer::{NullAnalyzer, SegmentAnalyzer};
use crate::buffer::{BufferDuration, BufferEstimator, PlaybackEstimator};
use crate::config::MonitorConfig;
use crate::dispatcher::MessageDispatcher;
use crate::error::{HlsError, TransferError};
use crate::events::{Diagnosis, DownloadHistory, EventKind, EventPayload};
use crate::playlist::{ParsedPlaylist, PlaylistParser, PlaylistStream, Segment, StreamSession};
use crate::sync::Event;
use crate::transfer::{HttpTransfer, Transfer};
use crate::writer::SegmentWriter;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Counters of a finished session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub downloaded: u64,
    pub failed: u64,
    /// Segments already on disk in continue mode.
    pub skipped: u64,
    pub bytes: u64,
    pub retries: u64,
    /// Ended by [`Downloader::stop`] rather than by running out of segments.
    pub stopped: bool,
}

#[derive(Debug, Clone)]
struct SessionState {
    session: StreamSession,
    stream: PlaylistStream,
}

enum FetchOutcome {
    Done,
    Stopped,
}

/// One HLS monitoring session.
///
/// `run` blocks the calling thread until the session finishes; `stop` and
/// `buffer_duration` may be called concurrently from other threads.
pub struct Downloader {
    config: MonitorConfig,
    transfer: Arc<dyn Transfer>,
    dispatcher: MessageDispatcher,
    parser: PlaylistParser,
    analyzer: Mutex<Box<dyn SegmentAnalyzer>>,
    estimator: Mutex<Box<dyn BufferEstimator>>,
    queue: PendingQueue,
    state: Mutex<Option<SessionState>>,
    started: AtomicBool,
    stop_flag: AtomicBool,
    stop_requested: AtomicBool,
    stop_event: Event,
    live: AtomicBool,
}

impl Downloader {
    pub fn new(
        config: MonitorConfig,
        transfer: Arc<dyn Transfer>,
        dispatcher: MessageDispatcher,
    ) -> Self {
        let parser = PlaylistParser::new(config.playlist.max_master_depth);
        Self {
            config,
            transfer,
            dispatcher,
            parser,
            analyzer: Mutex::new(Box::new(NullAnalyzer)),
            estimator: Mutex::new(Box::new(PlaybackEstimator::new())),
            queue: PendingQueue::new(),
            state: Mutex::new(None),
            started: AtomicBool::new(false),
            stop_flag: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_event: Event::manual(),
            live: AtomicBool::new(false),
        }
    }

    /// Session over a reqwest transfer client that reports progress to
    /// `dispatcher`.
    pub fn with_http(config: MonitorConfig, dispatcher: MessageDispatcher) -> Result<Self, HlsError> {
        let transfer =
            HttpTransfer::new(config.transfer.clone())?.with_reporter(dispatcher.clone());
        Ok(Self::new(config, Arc::new(transfer), dispatcher))
    }

    pub fn with_analyzer(mut self, analyzer: impl SegmentAnalyzer + 'static) -> Self {
        self.analyzer = Mutex::new(Box::new(analyzer));
        self
    }

    pub fn with_estimator(mut self, estimator: impl BufferEstimator + 'static) -> Self {
        self.estimator = Mutex::new(Box::new(estimator));
        self
    }

    /// Remaining playable seconds, meant to be polled periodically.
    pub fn buffer_duration(&self) -> BufferDuration {
        self.estimator.lock().snapshot()
    }

    /// Session facts once the initial playlist was parsed.
    pub fn session(&self) -> Option<StreamSession> {
        self.state.lock().as_ref().map(|s| s.session.clone())
    }

    pub fn stream(&self) -> Option<PlaylistStream> {
        self.state.lock().as_ref().map(|s| s.stream.clone())
    }

    pub fn pending_segments(&self) -> usize {
        self.queue.len()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// Ask a running session to finish. Safe from any thread, idempotent.
    pub fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(url = %self.config.url, "Stopping session");
        self.halt();
        self.transfer.cancel();
    }

    fn halt(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.stop_event.set();
        self.queue.notify();
    }

    /// Run the session to completion. FINISHED is always the last event
    /// posted, including when the initial playlist cannot be used.
    pub fn run(&self) -> Result<SessionReport, HlsError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(HlsError::invalid_state("session already started"));
        }
        let result = self.run_session();
        if let Err(e) = &result {
            error!(url = %self.config.url, error = %e, "Session failed");
        }
        self.dispatcher
            .post(EventKind::SystemFinished, EventPayload::None);
        result
    }

    fn run_session(&self) -> Result<SessionReport, HlsError> {
        if self.is_stopped() {
            return Err(HlsError::invalid_state("session stopped before start"));
        }

        let url = self.config.url.as_str();
        info!(url = %url, "Fetching initial playlist");
        let fetched = self.transfer.fetch_text(url)?;
        let fetch_variant =
            |variant: &str| self.transfer.fetch_text(variant).map(|fetched| fetched.body);
        let parsed = self.parser.parse(&fetched.body, url, &fetch_variant)?;

        let ParsedPlaylist {
            mut session,
            stream,
            segments,
            media_text,
            warnings,
            variants,
        } = parsed;
        info!(
            url = %url,
            media_url = %stream.url,
            live = session.is_live,
            master = session.is_master,
            variants = variants.len(),
            segments = segments.len(),
            "Playlist recognized"
        );
        self.dispatcher
            .post(EventKind::HlsAnalysing, session.playlist_url.as_str());
        self.report_warnings(&warnings, &stream.url);
        self.notice_encryption(&mut session, &segments);
        self.live.store(session.is_live, Ordering::Release);
        *self.state.lock() = Some(SessionState {
            session: session.clone(),
            stream: stream.clone(),
        });

        let mut writer = self.start_writer(&media_text, segments.len());
        let mut report = SessionReport::default();

        if session.is_live {
            self.prebuffer(&segments);
            let media_url = stream.url.clone();
            let target = stream.target_duration;
            thread::scope(|scope| -> Result<(), HlsError> {
                let writer_ref = writer.as_ref();
                thread::Builder::new()
                    .name("hls-reload".to_string())
                    .spawn_scoped(scope, move || {
                        self.reload_loop(&media_url, target, segments, media_text, writer_ref)
                    })
                    .map_err(|e| HlsError::internal(format!("failed to spawn reload thread: {e}")))?;
                self.main_loop(writer_ref, &mut report);
                self.halt();
                Ok(())
            })?;
        } else {
            let count = self.queue.push_all(segments);
            debug!(count, "Queued VOD segments");
            self.main_loop(writer.as_ref(), &mut report);
            self.halt();
        }

        if let Some(writer) = writer.as_mut() {
            writer.stop();
        }
        report.stopped = self.stop_requested.load(Ordering::Acquire);
        info!(
            downloaded = report.downloaded,
            failed = report.failed,
            skipped = report.skipped,
            bytes = report.bytes,
            stopped = report.stopped,
            "Session finished"
        );
        Ok(report)
    }

    fn start_writer(&self, media_text: &str, segment_count: usize) -> Option<SegmentWriter> {
        let record = self.config.record.as_ref()?;
        match SegmentWriter::start(record, &self.config.url) {
            Ok(writer) => {
                if let Err(e) = writer.notify_playlist(media_text, segment_count) {
                    warn!(error = %e, "Failed to write playlist");
                }
                Some(writer)
            }
            Err(e) => {
                warn!(error = %e, "Recording disabled");
                self.dispatcher.post(
                    EventKind::Diagnosis,
                    Diagnosis::error(format!("recording disabled: {e}"), None),
                );
                None
            }
        }
    }

    /// Seed the estimator with the trailing segments a player would already
    /// hold when joining a live stream.
    fn prebuffer(&self, segments: &[Segment]) {
        let count = self.config.playlist.prebuffer_segments.min(segments.len());
        let mut estimator = self.estimator.lock();
        for segment in &segments[segments.len() - count..] {
            estimator.push(segment.playable_seconds());
        }
        debug!(count, buffered = estimator.remaining(), "Pre-buffered live segments");
    }

    fn report_warnings(&self, warnings: &[String], url: &str) {
        for warning in warnings {
            warn!(url = %url, "{}", warning);
            self.dispatcher
                .post(EventKind::Diagnosis, Diagnosis::warning(warning.as_str(), Some(url)));
        }
    }

    fn notice_encryption(&self, session: &mut StreamSession, segments: &[Segment]) {
        if session.warned_aes {
            return;
        }
        if let Some(key) = segments.iter().find_map(|s| s.key_path.as_deref()) {
            warn!(key = %key, "Stream is AES-128 encrypted, segments are not decrypted");
            self.dispatcher.post(EventKind::HlsEncrypted, key);
            session.warned_aes = true;
        }
    }

    fn reload_interval(&self, target_duration: u64) -> Duration {
        let playlist = &self.config.playlist;
        if target_duration == 0 {
            return playlist.fallback_reload_interval;
        }
        Duration::from_millis(target_duration.saturating_mul(500)).min(playlist.max_reload_interval)
    }

    fn reload_loop(
        &self,
        media_url: &str,
        mut target_duration: u64,
        mut previous: Vec<Segment>,
        mut previous_text: String,
        writer: Option<&SegmentWriter>,
    ) {
        debug!(url = %media_url, "Reload loop started");
        loop {
            if self.stop_event.wait(self.reload_interval(target_duration)) {
                break;
            }

            let body = match self.transfer.fetch_text(media_url) {
                Ok(fetched) => fetched.body,
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    warn!(url = %media_url, error = %e, "Playlist reload failed");
                    self.dispatcher.post(
                        EventKind::Diagnosis,
                        Diagnosis::warning(format!("playlist reload failed: {e}"), Some(media_url)),
                    );
                    continue;
                }
            };
            if body == previous_text {
                trace!(url = %media_url, "Playlist unchanged");
                continue;
            }

            let parsed = match self.parser.parse_media(&body, media_url) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(url = %media_url, error = %e, "Failed to parse reloaded playlist");
                    if let Some(state) = self.state.lock().as_mut() {
                        state.session.parse_error = Some(e.to_string());
                    }
                    self.dispatcher.post(
                        EventKind::Diagnosis,
                        Diagnosis::warning(format!("playlist parse failed: {e}"), Some(media_url)),
                    );
                    continue;
                }
            };
            self.report_warnings(&parsed.warnings, media_url);

            let fresh = merge_new_segments(&previous, &parsed.segments);
            let added = self.queue.push_new(fresh);
            if added > 0 {
                debug!(added, pending = self.queue.len(), "Playlist updated");
                self.dispatcher
                    .post(EventKind::HlsPlaylistUpdated, added as i64);
            }
            if let Some(writer) = writer
                && let Err(e) = writer.notify_playlist(&body, parsed.segments.len())
            {
                warn!(error = %e, "Failed to write playlist");
            }

            target_duration = parsed.stream.target_duration;
            let ended = !parsed.session.is_live;
            if let Some(state) = self.state.lock().as_mut() {
                let mut session = state.session.clone();
                self.notice_encryption(&mut session, &parsed.segments);
                session.parse_error = None;
                session.is_live = !ended;
                state.session = session;
                state.stream = PlaylistStream {
                    id: state.stream.id,
                    bandwidth: state.stream.bandwidth,
                    ..parsed.stream
                };
            }
            previous = parsed.segments;
            previous_text = body;

            if ended {
                info!(url = %media_url, "Live stream ended");
                self.live.store(false, Ordering::Release);
                self.dispatcher.post(EventKind::HlsStreamEnded, media_url);
                self.queue.notify();
                break;
            }
        }
        debug!(url = %media_url, "Reload loop stopped");
    }

    fn main_loop(&self, writer: Option<&SegmentWriter>, report: &mut SessionReport) {
        let wait = self.config.playlist.stop_poll_interval;
        while !self.is_stopped() {
            let depth = self.queue.len();
            if depth == 0 {
                if !self.is_live() {
                    debug!("Pending queue drained");
                    return;
                }
                self.queue.wait_new(wait);
                continue;
            }

            self.dispatcher
                .post(EventKind::HlsQueueDepth, depth as i64);
            self.dispatcher
                .post(EventKind::HlsQueueContents, self.queue.urls().join("\n"));
            let Some(segment) = self.queue.pop_front() else {
                continue;
            };

            if let Some(writer) = writer
                && self.config.record.as_ref().is_some_and(|r| r.continue_download)
                && writer.exists(&segment.url)
            {
                debug!(url = %segment.url, "Segment already recorded, skipping");
                report.skipped += 1;
                continue;
            }

            if let FetchOutcome::Stopped = self.fetch_segment(&segment, writer, report) {
                return;
            }
        }
    }

    fn fetch_segment(
        &self,
        segment: &Segment,
        writer: Option<&SegmentWriter>,
        report: &mut SessionReport,
    ) -> FetchOutcome {
        let policy = &self.config.timeout_retry;
        let mut attempt = 0u32;
        loop {
            if self.is_stopped() {
                return FetchOutcome::Stopped;
            }
            trace!(url = %segment.url, sequence = segment.sequence, attempt, "Fetching segment");

            match self.transfer.fetch_binary(&segment.url) {
                Ok(fetched) => {
                    let bytes = fetched.body;
                    self.analyzer.lock().analyze(segment, &bytes);
                    let buffered = {
                        let mut estimator = self.estimator.lock();
                        estimator.push(segment.playable_seconds());
                        estimator.remaining()
                    };
                    self.dispatcher
                        .post(EventKind::HlsBufferDuration, buffered);

                    let history = DownloadHistory {
                        url: segment.url.clone(),
                        sequence: segment.sequence,
                        success: true,
                        bytes: fetched.info.bytes,
                        elapsed_ms: fetched.info.elapsed.as_millis() as u64,
                        throughput: fetched.info.throughput(),
                        remote_addr: fetched.info.remote_addr.map(|a| a.to_string()),
                        error: None,
                    };
                    report.downloaded += 1;
                    report.bytes += fetched.info.bytes;
                    if let Some(writer) = writer {
                        writer.enqueue(&segment.url, bytes);
                    }
                    debug!(
                        url = %segment.url,
                        sequence = segment.sequence,
                        bytes = history.bytes,
                        buffered,
                        "Segment downloaded"
                    );
                    self.dispatcher.post(EventKind::HlsDownloadHistory, history);
                    return FetchOutcome::Done;
                }
                Err(e) if e.is_cancelled() => return FetchOutcome::Stopped,
                Err(e) if e.is_retryable() && policy.allows(attempt) => {
                    let delay = policy.backoff(attempt);
                    warn!(url = %segment.url, attempt, delay_ms = delay.as_millis() as u64, "Segment timed out, retrying");
                    self.dispatcher
                        .post(EventKind::HttpTimedOut, segment.url.as_str());
                    report.retries += 1;
                    attempt += 1;
                    if self.stop_event.wait(delay) {
                        return FetchOutcome::Stopped;
                    }
                }
                Err(e) => {
                    self.report_failure(segment, &e);
                    report.failed += 1;
                    return FetchOutcome::Done;
                }
            }
        }
    }

    fn report_failure(&self, segment: &Segment, err: &TransferError) {
        warn!(url = %segment.url, sequence = segment.sequence, error = %err, "Segment dropped");
        self.dispatcher
            .post(EventKind::HttpDownloadError, err.to_string());
        self.dispatcher.post(
            EventKind::HlsDownloadHistory,
            DownloadHistory {
                url: segment.url.clone(),
                sequence: segment.sequence,
                success: false,
                bytes: 0,
                elapsed_ms: 0,
                throughput: 0.0,
                remote_addr: None,
                error: Some(err.to_string()),
            },
        );
    }
}
