//! Scraper Error Types
//!
//! Domain-specific error types for scrape execution, with the closed
//! error-kind taxonomy the retry controller decides on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed taxonomy of failure kinds
///
/// Everything the orchestration layer reacts to is one of these; the retry
/// controller is a pure function of the kind and the attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network timeout, connection reset, DNS transient, 5xx, TLS soft
    /// failure, 429
    TransientIo,
    /// 404 on a canonical endpoint, other 4xx, DNS NXDOMAIN, permission
    /// denied
    PermanentIo,
    /// HTML/JSON structure mismatch, missing expected node
    Parse,
    /// String-where-object, unknown enum value; recoverable at the
    /// normalizer
    Coercion,
    /// Unique constraint violation the upsert reasoning said could not
    /// happen
    Integrity,
    /// Run exceeded its hard deadline
    Timeout,
    /// Missing or invalid required configuration
    Configuration,
    /// The relational store is unreachable
    StoreUnavailable,
}

impl ErrorKind {
    /// Whether the retry controller may schedule another attempt
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo | Self::StoreUnavailable)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientIo => "transient_io",
            Self::PermanentIo => "permanent_io",
            Self::Parse => "parse",
            Self::Coercion => "coercion",
            Self::Integrity => "integrity",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Comprehensive error type for scrape execution
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// Request exceeded its per-call timeout
    #[error("Request timeout for {url}")]
    NetworkTimeout { url: String },

    /// Connection dropped mid-transfer
    #[error("Connection reset for {url}: {message}")]
    ConnectionReset { url: String, message: String },

    /// DNS resolution failed in a retryable way
    #[error("Transient DNS failure for {host}")]
    DnsTransient { host: String },

    /// DNS says the name does not exist
    #[error("DNS NXDOMAIN for {host}")]
    DnsNotFound { host: String },

    /// TLS handshake soft failure
    #[error("TLS handshake failed for {host}: {message}")]
    TlsHandshake { host: String, message: String },

    /// Rate limited by the source (HTTP 429)
    #[error("HTTP 429 from {url}")]
    RateLimited {
        url: String,
        retry_after_seconds: Option<u64>,
    },

    /// Server-side failure (HTTP 5xx)
    #[error("HTTP {status} from {url}")]
    ServerError { status: u16, url: String },

    /// Canonical endpoint is gone (HTTP 404)
    #[error("HTTP 404 from canonical endpoint {url}")]
    NotFound { url: String },

    /// Any other client-side rejection (4xx other than 429)
    #[error("HTTP {status} from {url}")]
    ClientError { status: u16, url: String },

    /// Source denied access
    #[error("Permission denied for {url}")]
    PermissionDenied { url: String },

    /// Response structure did not match what the scraper expects
    #[error("Failed to parse {format} from {url}: {message}")]
    Parse {
        format: String,
        url: String,
        message: String,
    },

    /// A file the scraper requires is absent
    #[error("Missing required file {path}")]
    MissingFile { path: String },

    /// Unrecoverable scraper-internal failure (including panics)
    #[error("Scraper internal error: {message}")]
    Internal { message: String },
}

impl ScrapeError {
    pub fn parse(
        format: impl Into<String>,
        url: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Parse {
            format: format.into(),
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Map an HTTP status to the matching error variant
    pub fn from_status(status: u16, url: impl Into<String>) -> Self {
        let url = url.into();
        match status {
            404 => Self::NotFound { url },
            401 | 403 => Self::PermissionDenied { url },
            429 => Self::RateLimited {
                url,
                retry_after_seconds: None,
            },
            s if (500..600).contains(&s) => Self::ServerError { status: s, url },
            s => Self::ClientError { status: s, url },
        }
    }

    /// Taxonomy kind for the retry controller
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NetworkTimeout { .. }
            | Self::ConnectionReset { .. }
            | Self::DnsTransient { .. }
            | Self::TlsHandshake { .. }
            | Self::RateLimited { .. }
            | Self::ServerError { .. } => ErrorKind::TransientIo,
            Self::DnsNotFound { .. }
            | Self::NotFound { .. }
            | Self::ClientError { .. }
            | Self::PermissionDenied { .. } => ErrorKind::PermanentIo,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::MissingFile { .. } => ErrorKind::Configuration,
            Self::Internal { .. } => ErrorKind::PermanentIo,
        }
    }

    /// Whether another attempt may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_transient()
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());

        if err.is_timeout() {
            return Self::NetworkTimeout { url };
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), url);
        }
        if err.is_connect() {
            let host = err
                .url()
                .and_then(|u| u.host_str().map(ToString::to_string))
                .unwrap_or_else(|| "<unknown>".to_string());
            return Self::DnsTransient { host };
        }
        Self::ConnectionReset {
            url,
            message: err.to_string(),
        }
    }
}

/// One captured failure, serialized into a run's error log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub kind: ErrorKind,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl StructuredError {
    #[must_use]
    pub fn capture(error: &ScrapeError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            occurred_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn of_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Result type alias for scrape execution
pub type ScrapeResult<T> = Result<T, ScrapeError>;
