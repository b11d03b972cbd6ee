//! Error types for the orchestration core

use std::fmt;

/// Error type for orchestration operations
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct DownloadError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Kinds of orchestration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Engine or remote service could not be reached
    BackendUnavailable,
    /// Malformed magnet, URL or URL list
    InvalidLocator,
    /// Torrent metadata did not arrive in time
    MetadataTimeout,
    /// Debrid service reported a terminal failure while caching
    RemoteCachingFailed,
    /// A tracked transfer handle vanished on the backend side
    HandleNotFound,
    /// The operation observed a cancellation request
    Cancelled,
    /// Invalid input that is not a locator (bad payload, bad option)
    InvalidInput,
    /// Unknown error
    Unknown,
}

impl DownloadError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    pub fn invalid_locator(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidLocator, message)
    }

    pub fn metadata_timeout(after: std::time::Duration) -> Self {
        Self::new(
            ErrorKind::MetadataTimeout,
            format!("Torrent metadata not available after {:?}", after),
        )
    }

    pub fn remote_caching_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteCachingFailed, message)
    }

    pub fn handle_not_found(handle_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::HandleNotFound,
            format!("Transfer handle not found: {}", handle_id),
        )
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn is_handle_not_found(&self) -> bool {
        self.kind == ErrorKind::HandleNotFound
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::unknown(err.to_string())
    }
}

impl From<serde_json::Error> for DownloadError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_input(err.to_string())
    }
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, DownloadError>;
