// Transfer Client: cancellable, watchdog-bounded HTTP GET for playlists and segments.

use crate::config::TransferConfig;
use crate::dispatcher::MessageDispatcher;
use crate::error::{HlsError, TransferError};
use crate::events::{DownloadProgress, EventKind};
use crate::proxy::build_proxy_from_config;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

// Progress for bodies without a content length is reported in steps of this size.
const UNKNOWN_LENGTH_PROGRESS_STEP: u64 = 512 * 1024;

/// Lifecycle of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Init,
    Connecting,
    Transferring,
    Done,
    TimedOut,
    Cancelled,
    Error,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::TimedOut | Self::Cancelled | Self::Error
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Connecting => "CONNECTING",
            Self::Transferring => "TRANSFERRING",
            Self::Done => "DONE",
            Self::TimedOut => "TIMED_OUT",
            Self::Cancelled => "CANCELLED",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Metadata of a completed transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferInfo {
    pub status: u16,
    pub remote_addr: Option<SocketAddr>,
    /// URL after redirects.
    pub effective_url: String,
    pub elapsed: Duration,
    pub bytes: u64,
}

impl TransferInfo {
    /// Bytes per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            self.bytes as f64
        } else {
            self.bytes as f64 / secs
        }
    }
}

/// Body plus transfer metadata.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub body: T,
    pub info: TransferInfo,
}

/// The orchestrator's view of the network.
pub trait Transfer: Send + Sync {
    fn fetch_text(&self, url: &str) -> Result<Fetched<String>, TransferError>;

    /// Fetch segment bytes, reporting progress while in flight.
    fn fetch_binary(&self, url: &str) -> Result<Fetched<Bytes>, TransferError>;

    /// Abort in-flight and future transfers. Callable from any thread.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

struct TransferJob<'a> {
    url: &'a str,
    state: TransferState,
}

impl<'a> TransferJob<'a> {
    fn new(url: &'a str) -> Self {
        Self {
            url,
            state: TransferState::Init,
        }
    }

    fn advance(&mut self, next: TransferState) {
        debug_assert!(!self.state.is_terminal(), "transfer already finished");
        trace!(url = %self.url, from = %self.state, to = %next, "Transfer state");
        self.state = next;
    }

    fn fail(&mut self, err: TransferError) -> TransferError {
        self.advance(err.state());
        err
    }
}

/// reqwest-backed [`Transfer`] driving its own small tokio runtime so that
/// callers on plain OS threads can block on it.
pub struct HttpTransfer {
    client: Client,
    runtime: Runtime,
    config: TransferConfig,
    token: Mutex<CancellationToken>,
    reporter: Option<MessageDispatcher>,
}

impl HttpTransfer {
    pub fn new(config: TransferConfig) -> Result<Self, HlsError> {
        let client = create_client(&config)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("hls-transfer")
            .enable_all()
            .build()?;
        Ok(Self {
            client,
            runtime,
            config,
            token: Mutex::new(CancellationToken::new()),
            reporter: None,
        })
    }

    /// Post progress and header events for binary transfers to `dispatcher`.
    pub fn with_reporter(mut self, dispatcher: MessageDispatcher) -> Self {
        self.reporter = Some(dispatcher);
        self
    }

    /// Arm a fresh cancellation scope after [`Transfer::cancel`].
    pub fn reset_cancel(&self) {
        let mut token = self.token.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    fn block_on_fetch(&self, url: &str, report: bool) -> Result<Fetched<Bytes>, TransferError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(TransferError::Runtime {
                reason: "blocking transfer called from inside an async runtime".to_string(),
            });
        }
        let token = self.token.lock().clone();
        self.runtime.block_on(self.perform(url, token, report))
    }

    async fn perform(
        &self,
        url: &str,
        token: CancellationToken,
        report: bool,
    ) -> Result<Fetched<Bytes>, TransferError> {
        let mut job = TransferJob::new(url);
        let parsed = Url::parse(url)
            .map_err(|e| job.fail(TransferError::invalid_url(url, e.to_string())))?;
        if token.is_cancelled() {
            return Err(job.fail(TransferError::cancelled(url)));
        }

        let started = Instant::now();
        let idle = self.config.idle_timeout;
        let overall_deadline = self.config.timeout.map(|t| started + t);
        let idle_ms = idle.as_millis() as u64;
        let deadline_after = |from: Instant| {
            let idle_deadline = from + idle;
            overall_deadline.map_or(idle_deadline, |d| d.min(idle_deadline))
        };

        job.advance(TransferState::Connecting);
        let request = self.client.get(parsed).send();
        tokio::pin!(request);

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(job.fail(TransferError::cancelled(url))),
            _ = tokio::time::sleep_until(deadline_after(started)) => {
                return Err(job.fail(TransferError::timed_out(url, idle_ms)));
            }
            res = &mut request => res.map_err(|e| job.fail(classify_reqwest_error(url, idle_ms, e)))?,
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Err(job.fail(TransferError::http_status(status, url)));
        }

        let remote_addr = response.remote_addr();
        let effective_url = response.url().to_string();
        let total = response.content_length();
        if effective_url != url {
            debug!(from = %url, to = %effective_url, "Followed redirect");
        }
        if let Some(len) = total
            && len > self.config.max_body_bytes
        {
            return Err(job.fail(TransferError::BodyTooLarge {
                url: url.to_string(),
                limit: self.config.max_body_bytes,
            }));
        }
        if report {
            self.report_headers(url, response.headers());
        }

        job.advance(TransferState::Transferring);
        let mut buffer = BytesMut::with_capacity(total.unwrap_or(0) as usize);
        let stream = response.bytes_stream();
        tokio::pin!(stream);
        let mut deadline = deadline_after(Instant::now());
        let mut last_reported: (Option<u8>, u64) = (None, 0);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(job.fail(TransferError::cancelled(url))),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(job.fail(TransferError::timed_out(url, idle_ms)));
                }
                chunk = stream.next() => match chunk {
                    None => break,
                    Some(Err(e)) => return Err(job.fail(classify_reqwest_error(url, idle_ms, e))),
                    Some(Ok(chunk)) => {
                        deadline = deadline_after(Instant::now());
                        buffer.extend_from_slice(&chunk);
                        let received = buffer.len() as u64;
                        if received > self.config.max_body_bytes {
                            return Err(job.fail(TransferError::BodyTooLarge {
                                url: url.to_string(),
                                limit: self.config.max_body_bytes,
                            }));
                        }
                        if report {
                            self.report_progress(url, received, total, &mut last_reported);
                        }
                    }
                }
            }
        }

        job.advance(TransferState::Done);
        let info = TransferInfo {
            status: status.as_u16(),
            remote_addr,
            effective_url,
            elapsed: started.elapsed(),
            bytes: buffer.len() as u64,
        };
        debug!(
            url = %url,
            bytes = info.bytes,
            elapsed_ms = info.elapsed.as_millis() as u64,
            bytes_per_sec = info.throughput() as u64,
            remote = ?info.remote_addr,
            "Transfer complete"
        );
        Ok(Fetched {
            body: buffer.freeze(),
            info,
        })
    }

    fn report_headers(&self, url: &str, headers: &reqwest::header::HeaderMap) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let text = headers
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or("<binary>")))
            .collect::<Vec<_>>()
            .join("\n");
        trace!(url = %url, "Response headers:\n{}", text);
        reporter.post(EventKind::HttpResponseHeaders, text);
    }

    fn report_progress(
        &self,
        url: &str,
        received: u64,
        total: Option<u64>,
        last: &mut (Option<u8>, u64),
    ) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let progress = DownloadProgress::new(url, received, total);
        let due = match progress.percent {
            Some(pct) => last.0 != Some(pct),
            None => received >= last.1 + UNKNOWN_LENGTH_PROGRESS_STEP,
        };
        if due {
            *last = (progress.percent, received);
            reporter.post(EventKind::HttpDownloadProgress, progress);
        }
    }
}

impl Transfer for HttpTransfer {
    fn fetch_text(&self, url: &str) -> Result<Fetched<String>, TransferError> {
        let fetched = self.block_on_fetch(url, false)?;
        let body = String::from_utf8(fetched.body.to_vec()).map_err(|_| {
            warn!(url = %url, "Playlist body is not UTF-8");
            TransferError::InvalidText {
                url: url.to_string(),
            }
        })?;
        Ok(Fetched {
            body,
            info: fetched.info,
        })
    }

    fn fetch_binary(&self, url: &str) -> Result<Fetched<Bytes>, TransferError> {
        self.block_on_fetch(url, true)
    }

    fn cancel(&self) {
        debug!("Cancelling transfers");
        self.token.lock().cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.token.lock().is_cancelled()
    }
}

fn classify_reqwest_error(url: &str, idle_ms: u64, e: reqwest::Error) -> TransferError {
    if e.is_timeout() {
        TransferError::timed_out(url, idle_ms)
    } else {
        TransferError::network(url, e)
    }
}

/// Build the reqwest client for a transfer configuration.
pub fn create_client(config: &TransferConfig) -> Result<Client, HlsError> {
    let redirect = if config.follow_redirects {
        reqwest::redirect::Policy::limited(config.max_redirects)
    } else {
        reqwest::redirect::Policy::none()
    };

    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(config.user_agent.clone())
        .default_headers(config.headers.clone())
        .redirect(redirect)
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs);

    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(build_proxy_from_config(proxy)?);
    } else if !config.use_system_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|e| HlsError::configuration(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_divides_by_elapsed() {
        let info = TransferInfo {
            status: 200,
            remote_addr: None,
            effective_url: "http://h/a.ts".into(),
            elapsed: Duration::from_millis(500),
            bytes: 1000,
        };
        assert!((info.throughput() - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn invalid_url_fails_without_network() {
        let transfer = HttpTransfer::new(TransferConfig::default()).unwrap();
        let err = transfer.fetch_text("not a url").unwrap_err();
        assert!(matches!(err, TransferError::InvalidUrl { .. }));
        assert_eq!(err.state(), TransferState::Error);
    }

    #[test]
    fn cancelled_client_refuses_new_transfers() {
        let transfer = HttpTransfer::new(TransferConfig::default()).unwrap();
        transfer.cancel();
        assert!(transfer.is_cancelled());
        let err = transfer.fetch_binary("http://127.0.0.1:9/seg.ts").unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.state(), TransferState::Cancelled);

        transfer.reset_cancel();
        assert!(!transfer.is_cancelled());
    }

    #[test]
    fn blocking_fetch_inside_runtime_is_rejected() {
        let transfer = HttpTransfer::new(TransferConfig::default()).unwrap();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let err = rt.block_on(async { transfer.fetch_text("http://127.0.0.1:9/") });
        assert!(matches!(err, Err(TransferError::Runtime { .. })));
        // The transfer's own runtime must not be dropped inside another runtime.
        drop(rt);
    }

    #[test]
    fn terminal_states() {
        assert!(TransferState::Done.is_terminal());
        assert!(TransferState::TimedOut.is_terminal());
        assert!(!TransferState::Transferring.is_terminal());
        assert_eq!(TransferState::TimedOut.to_string(), "TIMED_OUT");
    }
}
