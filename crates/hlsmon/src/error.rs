use reqwest::StatusCode;

use crate::transfer::TransferState;

/// Failure of a single GET performed by the transfer client.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transfer timed out after {idle_ms} ms without I/O for {url}")]
    TimedOut { url: String, idle_ms: u64 },

    #[error("transfer cancelled for {url}")]
    Cancelled { url: String },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("HTTP request failed for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("response body for {url} exceeds {limit} bytes")]
    BodyTooLarge { url: String, limit: u64 },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("response from {url} is not valid UTF-8")]
    InvalidText { url: String },

    #[error("transfer runtime error: {reason}")]
    Runtime { reason: String },
}

impl TransferError {
    pub fn timed_out(url: impl Into<String>, idle_ms: u64) -> Self {
        Self::TimedOut {
            url: url.into(),
            idle_ms,
        }
    }

    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Terminal state the transfer ended in.
    pub fn state(&self) -> TransferState {
        match self {
            Self::TimedOut { .. } => TransferState::TimedOut,
            Self::Cancelled { .. } => TransferState::Cancelled,
            _ => TransferState::Error,
        }
    }

    /// Only an idle timeout is worth retrying; everything else drops the segment.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Failure of a playlist parse call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaylistError {
    #[error("content is not an HLS playlist")]
    NotPlaylist,

    #[error("{directive} is missing mandatory attribute {attribute}")]
    MissingAttribute {
        directive: &'static str,
        attribute: &'static str,
    },

    #[error("{directive} has invalid value `{value}`")]
    InvalidAttribute {
        directive: &'static str,
        value: String,
    },

    #[error("unsupported playlist version {0}")]
    UnsupportedVersion(String),

    #[error("unsupported encryption method `{0}`")]
    UnsupportedMethod(String),

    #[error("master playlist declares no variant streams")]
    NoVariants,

    #[error("failed to fetch variant playlist {url}: {reason}")]
    VariantFetch { url: String, reason: String },

    #[error("master playlist nesting exceeds {0} levels")]
    RecursionLimit(usize),
}

impl PlaylistError {
    pub fn missing(directive: &'static str, attribute: &'static str) -> Self {
        Self::MissingAttribute {
            directive,
            attribute,
        }
    }

    pub fn invalid(directive: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            directive,
            value: value.into(),
        }
    }

    /// Errors that abort the whole parse rather than a single directive.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotPlaylist
                | Self::UnsupportedVersion(_)
                | Self::NoVariants
                | Self::VariantFetch { .. }
                | Self::RecursionLimit(_)
        ) || matches!(
            self,
            Self::MissingAttribute {
                directive: "#EXT-X-STREAM-INF",
                ..
            } | Self::InvalidAttribute {
                directive: "#EXT-X-STREAM-INF",
                ..
            }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HlsError {
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("playlist error: {0}")]
    Playlist(#[from] PlaylistError),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("proxy configuration error: {reason}")]
    ProxyConfiguration { reason: String },

    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl HlsError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn proxy_configuration(reason: impl Into<String>) -> Self {
        Self::ProxyConfiguration {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transfer(err) => err.is_retryable(),
            Self::Playlist(_)
            | Self::Io { .. }
            | Self::Configuration { .. }
            | Self::ProxyConfiguration { .. }
            | Self::InvalidState { .. }
            | Self::Internal { .. } => false,
        }
    }
}
