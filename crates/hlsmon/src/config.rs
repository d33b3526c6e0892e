use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONNECTION, HeaderMap, HeaderValue};

use crate::proxy::ProxyConfig;
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Options of the HTTP transfer client
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Overall limit for one transfer, `None` for no limit
    pub timeout: Option<Duration>,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Watchdog period: maximum silence between two I/O events
    pub idle_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    pub max_redirects: usize,

    /// User agent string
    pub user_agent: String,

    /// Extra HTTP headers sent with every request
    pub headers: HeaderMap,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    pub danger_accept_invalid_certs: bool,

    /// Upper bound on a buffered response body
    pub max_body_bytes: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(60)),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(10),
            follow_redirects: true,
            max_redirects: 10,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: TransferConfig::default_headers(),
            proxy: None,
            use_system_proxy: true,
            danger_accept_invalid_certs: false,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

impl TransferConfig {
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add a header; invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Headers a browser-like player sends with playlist and segment requests.
    pub fn default_headers() -> HeaderMap {
        [
            (ACCEPT, "*/*"),
            (ACCEPT_LANGUAGE, "en-US,en;q=0.5"),
            (CONNECTION, "keep-alive"),
        ]
        .into_iter()
        .map(|(name, value)| (name, HeaderValue::from_static(value)))
        .collect()
    }
}

/// Playlist reload and session start-up tuning
#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    /// Cap on the sleep between two reloads of an unchanged live playlist
    pub max_reload_interval: Duration,
    /// Sleep used when the playlist advertises no target duration
    pub fallback_reload_interval: Duration,
    /// Granularity at which sleeping loops re-check the stop flag
    pub stop_poll_interval: Duration,
    /// Trailing segments of a live playlist seeded into the buffer estimator
    pub prebuffer_segments: usize,
    /// Nesting limit when following master playlists
    pub max_master_depth: usize,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            max_reload_interval: Duration::from_secs(5),
            fallback_reload_interval: Duration::from_secs(2),
            stop_poll_interval: Duration::from_millis(100),
            prebuffer_segments: 3,
            max_master_depth: 3,
        }
    }
}

/// Recording of segment copies plus a rewritten playlist
#[derive(Debug, Clone)]
pub struct RecordConfig {
    /// Parent directory of the recording directory
    pub save_path: PathBuf,
    /// Directory name to use instead of the playlist's basename
    pub name_override: Option<String>,
    /// Keep only the most recent segments on disk
    pub realtime: bool,
    /// Skip segments that already exist on disk
    pub continue_download: bool,
}

impl RecordConfig {
    pub fn new(save_path: impl Into<PathBuf>) -> Self {
        Self {
            save_path: save_path.into(),
            name_override: None,
            realtime: false,
            continue_download: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name_override = Some(name.into());
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn with_continue(mut self, continue_download: bool) -> Self {
        self.continue_download = continue_download;
        self
    }
}

/// Everything a monitoring session needs
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Playlist URL to monitor
    pub url: String,
    pub transfer: TransferConfig,
    pub playlist: PlaylistConfig,
    /// Backoff applied when a segment transfer times out
    pub timeout_retry: RetryPolicy,
    /// Recording, disabled when `None`
    pub record: Option<RecordConfig>,
}

impl MonitorConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transfer: TransferConfig::default(),
            playlist: PlaylistConfig::default(),
            timeout_retry: RetryPolicy::default(),
            record: None,
        }
    }

    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_playlist(mut self, playlist: PlaylistConfig) -> Self {
        self.playlist = playlist;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.timeout_retry = retry;
        self
    }

    pub fn with_record(mut self, record: RecordConfig) -> Self {
        self.record = Some(record);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_builder_skips_invalid_values() {
        let config = TransferConfig::default()
            .with_header("referer", "http://example.com")
            .with_header("bad header", "x")
            .with_header("x-ok", "line\nbreak");
        assert_eq!(
            config.headers.get("referer").unwrap(),
            "http://example.com"
        );
        assert!(config.headers.get("x-ok").is_none());
        assert_eq!(config.headers.get(ACCEPT).unwrap(), "*/*");
        assert_eq!(config.headers.len(), 4);
    }

    #[test]
    fn monitor_config_builders_compose() {
        let config = MonitorConfig::new("http://h/index.m3u8")
            .with_record(RecordConfig::new("/tmp/rec").with_name("show").with_realtime(true));
        let record = config.record.unwrap();
        assert_eq!(record.name_override.as_deref(), Some("show"));
        assert!(record.realtime);
        assert!(!record.continue_download);
        assert_eq!(config.playlist.prebuffer_segments, 3);
    }
}
