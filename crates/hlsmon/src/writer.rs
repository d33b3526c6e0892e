// Async Segment Writer: persists segments and playlists off the fetch loop.

use crate::config::RecordConfig;
use crate::error::HlsError;
use crate::playlist::basename;
use crate::sync::Event;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const WRITER_WAIT: Duration = Duration::from_millis(100);

// Realtime recordings keep this many playlists' worth of segments.
const REALTIME_HISTORY_FACTOR: usize = 3;

struct PendingWrite {
    url: String,
    data: Bytes,
}

struct WriterShared {
    out_dir: PathBuf,
    realtime: bool,
    queue: Mutex<VecDeque<PendingWrite>>,
    wakeup: Event,
    running: AtomicBool,
    segment_budget: AtomicUsize,
    written: AtomicU64,
}

/// Background writer of one recording directory.
pub struct SegmentWriter {
    shared: Arc<WriterShared>,
    playlist_file: PathBuf,
    handle: Option<JoinHandle<()>>,
}

impl SegmentWriter {
    /// Create `<save_path>/<name>/` and launch the writer thread.
    ///
    /// `name` is the override from `config` or the playlist's basename
    /// without extension.
    pub fn start(config: &RecordConfig, playlist_url: &str) -> Result<Self, HlsError> {
        let playlist_name = match basename(playlist_url) {
            "" => "index.m3u8",
            name => name,
        };
        let dir_name = match &config.name_override {
            Some(name) if !name.is_empty() => name.clone(),
            _ => Path::new(playlist_name)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "stream".to_string()),
        };
        let out_dir = config.save_path.join(dir_name);
        fs::create_dir_all(&out_dir)?;
        info!(path = %out_dir.display(), realtime = config.realtime, "Recording to directory");

        let shared = Arc::new(WriterShared {
            out_dir: out_dir.clone(),
            realtime: config.realtime,
            queue: Mutex::new(VecDeque::new()),
            wakeup: Event::auto(),
            running: AtomicBool::new(true),
            segment_budget: AtomicUsize::new(0),
            written: AtomicU64::new(0),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("hls-writer".to_string())
            .spawn(move || writer_loop(&worker))?;

        Ok(Self {
            shared,
            playlist_file: out_dir.join(playlist_name),
            handle: Some(handle),
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.shared.out_dir
    }

    /// Local path a segment URL is persisted under.
    pub fn segment_path(&self, url: &str) -> PathBuf {
        self.shared.out_dir.join(basename(url))
    }

    /// Whether a segment was already persisted, for continue mode.
    pub fn exists(&self, url: &str) -> bool {
        self.segment_path(url).is_file()
    }

    /// Hand a segment's bytes to the writer thread.
    pub fn enqueue(&self, url: &str, data: Bytes) {
        if !self.shared.running.load(Ordering::Acquire) {
            warn!(url = %url, "Writer stopped, segment not recorded");
            return;
        }
        self.shared.queue.lock().push_back(PendingWrite {
            url: url.to_string(),
            data,
        });
        self.shared.wakeup.set();
    }

    /// Write the playlist with segment URIs rewritten to local basenames.
    ///
    /// `segment_count` sets the realtime pruning budget.
    pub fn notify_playlist(&self, text: &str, segment_count: usize) -> Result<PathBuf, HlsError> {
        self.shared
            .segment_budget
            .store(segment_count, Ordering::Release);
        fs::write(&self.playlist_file, rewrite_playlist(text))?;
        trace!(path = %self.playlist_file.display(), "Playlist written");
        Ok(self.playlist_file.clone())
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn written(&self) -> u64 {
        self.shared.written.load(Ordering::Acquire)
    }

    /// Write whatever is queued, then stop and join the writer thread.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.wakeup.set();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Writer thread panicked");
            }
            debug!(written = self.written(), "Writer stopped");
        }
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn writer_loop(shared: &WriterShared) {
    let mut history: VecDeque<PathBuf> = VecDeque::new();
    loop {
        shared.wakeup.wait(WRITER_WAIT);
        drain(shared, &mut history);
        if !shared.running.load(Ordering::Acquire) {
            drain(shared, &mut history);
            break;
        }
    }
}

fn drain(shared: &WriterShared, history: &mut VecDeque<PathBuf>) {
    loop {
        let Some(PendingWrite { url, data }) = shared.queue.lock().pop_front() else {
            return;
        };
        let path = shared.out_dir.join(basename(&url));
        match fs::write(&path, &data) {
            Ok(()) => {
                trace!(path = %path.display(), bytes = data.len(), "Segment written");
                shared.written.fetch_add(1, Ordering::AcqRel);
                history.push_back(path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to write segment"),
        }
        drop(data);

        if shared.realtime {
            prune(history, shared.segment_budget.load(Ordering::Acquire));
        }
    }
}

fn prune(history: &mut VecDeque<PathBuf>, segment_budget: usize) {
    if segment_budget == 0 {
        return;
    }
    let limit = segment_budget.saturating_mul(REALTIME_HISTORY_FACTOR);
    while history.len() > limit {
        let Some(oldest) = history.pop_front() else {
            break;
        };
        // A segment re-written under the same name is still referenced.
        if history.contains(&oldest) {
            continue;
        }
        if let Err(e) = fs::remove_file(&oldest) {
            debug!(path = %oldest.display(), error = %e, "Failed to prune segment");
        }
    }
}

/// Replace every URI line with its basename so the playlist plays from disk.
pub fn rewrite_playlist(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            out.push_str(trimmed);
        } else {
            out.push_str(basename(trimmed));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_config(dir: &Path) -> RecordConfig {
        RecordConfig::new(dir)
    }

    #[test]
    fn directory_named_after_playlist() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer =
            SegmentWriter::start(&record_config(tmp.path()), "http://h/live/chan.m3u8?tok=1")
                .unwrap();
        assert_eq!(writer.out_dir(), tmp.path().join("chan"));
        assert!(writer.out_dir().is_dir());
        writer.stop();
    }

    #[test]
    fn name_override_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let config = record_config(tmp.path()).with_name("show");
        let writer = SegmentWriter::start(&config, "http://h/live/chan.m3u8").unwrap();
        assert_eq!(writer.out_dir(), tmp.path().join("show"));
    }

    #[test]
    fn segments_are_written_under_their_basename() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer =
            SegmentWriter::start(&record_config(tmp.path()), "http://h/index.m3u8").unwrap();
        writer.enqueue("http://h/a/seg1.ts?sig=abc", Bytes::from_static(b"one"));
        writer.enqueue("http://h/a/seg2.ts", Bytes::from_static(b"two"));
        writer.stop();

        assert_eq!(writer.written(), 2);
        let dir = tmp.path().join("index");
        assert_eq!(fs::read(dir.join("seg1.ts")).unwrap(), b"one");
        assert_eq!(fs::read(dir.join("seg2.ts")).unwrap(), b"two");
        assert!(writer.exists("http://other/seg1.ts"));
        assert!(!writer.exists("http://h/a/seg3.ts"));
    }

    #[test]
    fn realtime_mode_prunes_old_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let config = record_config(tmp.path()).with_realtime(true);
        let mut writer = SegmentWriter::start(&config, "http://h/index.m3u8").unwrap();
        writer
            .notify_playlist("#EXTM3U\n#EXTINF:1,\nseg0.ts\n", 1)
            .unwrap();
        for i in 0..5 {
            writer.enqueue(&format!("http://h/seg{i}.ts"), Bytes::from_static(b"x"));
        }
        writer.stop();

        let dir = tmp.path().join("index");
        let kept: Vec<bool> = (0..5).map(|i| dir.join(format!("seg{i}.ts")).exists()).collect();
        assert_eq!(kept, vec![false, false, true, true, true]);
    }

    #[test]
    fn playlist_is_rewritten_to_local_names() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = SegmentWriter::start(&record_config(tmp.path()), "http://h/live.m3u8").unwrap();
        let path = writer
            .notify_playlist(
                "#EXTM3U\n#EXTINF:4,\nhttp://cdn/a/s1.ts?x=1\n#EXTINF:4,\n../b/s2.ts\n",
                2,
            )
            .unwrap();
        assert_eq!(path, tmp.path().join("live").join("live.m3u8"));
        let written = fs::read_to_string(path).unwrap();
        assert_eq!(written, "#EXTM3U\n#EXTINF:4,\ns1.ts\n#EXTINF:4,\ns2.ts\n");
    }

    #[test]
    fn enqueue_after_stop_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer =
            SegmentWriter::start(&record_config(tmp.path()), "http://h/index.m3u8").unwrap();
        writer.stop();
        writer.enqueue("http://h/late.ts", Bytes::from_static(b"late"));
        assert_eq!(writer.pending(), 0);
        writer.stop();
    }
}
