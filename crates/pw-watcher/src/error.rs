//! Error types for the pw-watcher crate.
//!
//! This module provides the [`WatchError`] type for every failure the watch
//! service reports to its callers.

use camino::Utf8PathBuf;

/// Errors that can occur during watch service operations.
///
/// # Error Categories
///
/// - **Validation** ([`WatchError::NotADirectory`], [`WatchError::PathNotFound`],
///   [`WatchError::NoEventsRequested`], [`WatchError::UnsupportedModifier`]):
///   raised synchronously by `register`; no registration is created.
/// - **Closed** ([`WatchError::ServiceClosed`]): the service was closed before
///   or while the operation ran.
/// - **Infrastructure** ([`WatchError::Scheduler`], [`WatchError::Wakeup`],
///   [`WatchError::WorkerGone`]): a background thread could not be started or
///   stopped responding.
/// - **I/O** ([`WatchError::Io`]): reading the directory failed.
/// - **Configuration** ([`WatchError::Config`]): the service could not be
///   built from the given settings.
///
/// Failures while a directory is already being watched never surface here:
/// they invalidate the affected key instead.
///
/// # Examples
///
/// ```
/// use pw_watcher::WatchError;
///
/// fn describe(err: &WatchError) -> &'static str {
///     if err.is_closed() {
///         "service closed"
///     } else if err.is_validation() {
///         "bad registration"
///     } else {
///         "internal failure"
///     }
/// }
///
/// assert_eq!(describe(&WatchError::ServiceClosed), "service closed");
/// assert_eq!(describe(&WatchError::NoEventsRequested), "bad registration");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The registration target exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(Utf8PathBuf),

    /// The registration target does not exist.
    #[error("path does not exist: {0}")]
    PathNotFound(Utf8PathBuf),

    /// The requested event set was empty (after ignoring overflow).
    #[error("no events requested")]
    NoEventsRequested,

    /// The backend does not support a requested watch modifier.
    #[error("unsupported watch modifier: {0}")]
    UnsupportedModifier(&'static str),

    /// The watch service is closed.
    #[error("watch service is closed")]
    ServiceClosed,

    /// A path is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// An I/O error occurred while reading a directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The scan scheduler or poller thread could not be started.
    #[error("failed to start background worker: {0}")]
    Scheduler(#[source] std::io::Error),

    /// The poller thread could not be woken to process a request.
    #[error("failed to wake poller: {0}")]
    Wakeup(#[source] std::io::Error),

    /// The poller thread exited without answering a request.
    #[error("poller thread exited without replying")]
    WorkerGone,

    /// The service configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] pw_core::ConfigError),
}

impl WatchError {
    /// Creates a new [`WatchError::NotADirectory`] error.
    #[inline]
    pub fn not_a_directory(path: impl Into<Utf8PathBuf>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Creates a new [`WatchError::PathNotFound`] error.
    #[inline]
    pub fn path_not_found(path: impl Into<Utf8PathBuf>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Returns `true` for argument errors raised at registration time.
    #[inline]
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NotADirectory(_)
                | Self::PathNotFound(_)
                | Self::NoEventsRequested
                | Self::UnsupportedModifier(_)
                | Self::NonUtf8Path(_)
        )
    }

    /// Returns `true` if the service was closed.
    #[inline]
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::ServiceClosed)
    }

    /// Returns the directory path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::NotADirectory(path) | Self::PathNotFound(path) => Some(path),
            Self::NoEventsRequested
            | Self::UnsupportedModifier(_)
            | Self::ServiceClosed
            | Self::NonUtf8Path(_)
            | Self::Io(_)
            | Self::Scheduler(_)
            | Self::Wakeup(_)
            | Self::WorkerGone
            | Self::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_not_a_directory() {
        let err = WatchError::not_a_directory("/tmp/file.txt");
        assert!(err.is_validation());
        assert!(!err.is_closed());
        assert_eq!(err.path().map(|p| p.as_str()), Some("/tmp/file.txt"));
        assert_eq!(err.to_string(), "not a directory: /tmp/file.txt");
    }

    #[test]
    fn test_service_closed() {
        let err = WatchError::ServiceClosed;
        assert!(err.is_closed());
        assert!(!err.is_validation());
        assert!(err.path().is_none());
    }

    #[test]
    fn test_unsupported_modifier_display() {
        let err = WatchError::UnsupportedModifier("file_tree");
        assert!(err.is_validation());
        assert!(err.to_string().contains("file_tree"));
    }

    #[test]
    fn test_io_is_not_validation() {
        let err = WatchError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(!err.is_validation());
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_config_error_converts() {
        let err: WatchError = pw_core::ConfigError::invalid_option("x", "bad").into();
        assert!(matches!(err, WatchError::Config(_)));
        assert!(err.path().is_none());
    }

    #[test]
    fn test_scheduler_keeps_source() {
        use std::error::Error as _;
        let err = WatchError::Scheduler(io::Error::other("no threads"));
        assert!(err.source().is_some());
    }
}
