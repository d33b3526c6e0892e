use hlsmon_engine::{EventKind, EventPayload, EventSink, ReportParam, Severity};
use tracing::{debug, error, info, warn};

/// Flattens the typed event stream for the terminal.
pub struct EventPrinter {
    json: bool,
}

impl EventPrinter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn print_json(&self, param: &ReportParam<'_>) {
        match serde_json::to_string(param) {
            Ok(line) => println!("{line}"),
            Err(e) => error!("Failed to serialize event: {}", e),
        }
    }

    fn log(&self, param: &ReportParam<'_>) {
        match (param.kind, param.payload) {
            (EventKind::HlsAnalysing, EventPayload::Text(url)) => info!("Analysing {}", url),
            (EventKind::HlsDownloadHistory, EventPayload::History(h)) if h.success => info!(
                "#{} {} ({} bytes, {:.1} KiB/s)",
                h.sequence,
                h.url,
                h.bytes,
                h.throughput / 1024.0
            ),
            (EventKind::HlsDownloadHistory, EventPayload::History(h)) => warn!(
                "#{} {} failed: {}",
                h.sequence,
                h.url,
                h.error.as_deref().unwrap_or("unknown error")
            ),
            (EventKind::HlsPlaylistUpdated, EventPayload::Int(n)) => {
                info!("Playlist updated, {} new segment(s)", n)
            }
            (EventKind::HlsEncrypted, EventPayload::Text(key)) => {
                warn!("Stream is encrypted (key {})", key)
            }
            (EventKind::HlsStreamEnded, _) => info!("Stream ended"),
            (EventKind::HttpTimedOut, EventPayload::Text(url)) => warn!("Timed out: {}", url),
            (EventKind::Diagnosis | EventKind::QualityCheck, EventPayload::Diagnosis(d)) => {
                match d.severity {
                    Severity::Error => error!("{}", d.message),
                    Severity::Warning => warn!("{}", d.message),
                    Severity::Info => info!("{}", d.message),
                }
            }
            (EventKind::SystemFinished, _) => info!("Session finished"),
            (kind, payload) => debug!(%kind, ?payload, "Event"),
        }
    }
}

impl EventSink for EventPrinter {
    fn report(&mut self, param: ReportParam<'_>) {
        if self.json {
            self.print_json(&param);
        } else {
            self.log(&param);
        }
    }
}
