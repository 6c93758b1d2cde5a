use std::path::PathBuf;

use thiserror::Error;

/// A single failed attempt at an HTTP GET.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP GET {url} failed with status {}: {reason}", display_code(.code))]
    Status {
        url: String,
        code: Option<u16>,
        reason: String,
    },

    #[error("failed to make request to {url}: {reason}")]
    Connection { url: String, reason: String },

    /// The transport itself cannot run in this environment.
    #[error("transport unavailable: {reason}")]
    Capability { reason: String },
}

fn display_code(code: &Option<u16>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "unknown".to_owned(),
    }
}

impl TransportError {
    /// Status and connection failures are worth another attempt, capability failures are not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Capability { .. })
    }
}

#[derive(Debug, Error)]
pub enum ArchError {
    #[error("no file URLs obtained for product {product}")]
    NoListingResult { product: String },

    #[error("file name {filename} does not carry a date: {reason}")]
    MalformedFilename { filename: String, reason: String },

    #[error("number of download attempts for {url} exceeded the maximum allowed {attempts}: {last}")]
    DownloadExhausted {
        url: String,
        attempts: u32,
        last: TransportError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no usable HTTP transport: {reason}")]
    NoTransport { reason: String },

    #[error("listing query for {product} failed: {reason}")]
    Query { product: String, reason: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to load credential from {path:?}: {reason}")]
    Credential { path: PathBuf, reason: String },
}

impl ArchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(filename: &str, reason: impl Into<String>) -> Self {
        ArchError::MalformedFilename {
            filename: filename.to_owned(),
            reason: reason.into(),
        }
    }
}
