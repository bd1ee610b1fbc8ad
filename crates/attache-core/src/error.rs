//! Error types for attache.

use std::io;
use std::path::Path;

use thiserror::Error;

/// Result type alias using attache's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for attache operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The image tool could not determine the geometry of a source file
    #[error("Not identified: {0}")]
    NotIdentified(String),

    /// Conversion subprocess failed while producing a style
    #[error("Processing error: {0}")]
    Processing(String),

    /// External command exited non-zero, could not be spawned, or timed out
    #[error("Command failed: {0}")]
    CommandLine(String),

    /// Fewer local variant files exist than the attachment defines
    #[error("Local files not found for record {record_id}: found {found}, expected {expected}")]
    MissingLocalFiles {
        record_id: i64,
        found: usize,
        expected: usize,
    },

    /// Remote object store rejected or failed an upload
    #[error("Remote transport error: {0}")]
    RemoteTransport(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True when the error means a file disappeared underneath us: the path
    /// is gone, or the handle went stale on a network filesystem.
    pub fn is_vanished_file(&self) -> bool {
        match self {
            Error::Io(e) => is_vanished_kind(e.kind()),
            _ => false,
        }
    }

    /// File name of the path carried by a vanished-file error, when the
    /// message was built with [`io_error_at`].
    pub fn vanished_file_name(&self) -> Option<String> {
        if !self.is_vanished_file() {
            return None;
        }
        let message = self.to_string();
        let (_, path) = message.rsplit_once(" - ")?;
        Path::new(path.trim())
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

/// Attach the offending path to an I/O error, keeping its kind.
pub fn io_error_at(err: io::Error, path: &Path) -> io::Error {
    io::Error::new(err.kind(), format!("{} - {}", err, path.display()))
}

/// I/O error kinds that signal a file was removed concurrently.
pub fn is_vanished_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::NotFound | io::ErrorKind::StaleNetworkFileHandle
    )
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_identified() {
        let err = Error::NotIdentified("photo.jpg".to_string());
        assert_eq!(err.to_string(), "Not identified: photo.jpg");
    }

    #[test]
    fn test_error_display_processing() {
        let err = Error::Processing("thumbnail for photo".to_string());
        assert_eq!(err.to_string(), "Processing error: thumbnail for photo");
    }

    #[test]
    fn test_error_display_missing_local_files() {
        let err = Error::MissingLocalFiles {
            record_id: 42,
            found: 1,
            expected: 3,
        };
        assert_eq!(
            err.to_string(),
            "Local files not found for record 42: found 1, expected 3"
        );
    }

    #[test]
    fn test_error_display_remote_transport() {
        let err = Error::RemoteTransport("bucket gone".to_string());
        assert_eq!(err.to_string(), "Remote transport error: bucket gone");
    }

    #[test]
    fn test_error_display_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_vanished_file_detection() {
        let gone: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(gone.is_vanished_file());

        let stale: Error = io::Error::new(io::ErrorKind::StaleNetworkFileHandle, "stale").into();
        assert!(stale.is_vanished_file());

        let denied: Error = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(!denied.is_vanished_file());

        assert!(!Error::RemoteTransport("x".into()).is_vanished_file());
    }

    #[test]
    fn test_vanished_file_name() {
        let err: Error = io_error_at(
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            Path::new("/srv/public/system/images/photos/000/000/001/thumb/cat.jpg"),
        )
        .into();
        assert!(err.is_vanished_file());
        assert_eq!(err.vanished_file_name().as_deref(), Some("cat.jpg"));

        let bare: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(bare.vanished_file_name(), None);

        let denied: Error = io_error_at(
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
            Path::new("/tmp/a.jpg"),
        )
        .into();
        assert_eq!(denied.vanished_file_name(), None);
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
