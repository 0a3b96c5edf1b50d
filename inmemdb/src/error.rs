//! Error types for the inmemdb library.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for inmemdb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause attached to errors raised by the embedded engines and parsers.
pub type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while launching, seeding or stopping a database.
///
/// The display strings double as the message templates reported through a
/// [`Logger`](crate::logger::Logger).
#[derive(Error, Debug)]
pub enum Error {
    /// No loader claims the source, or the source is missing entirely.
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// The script or data set could not be read.
    #[error("Cannot read source file {locator}: {source}")]
    CannotReadSource {
        locator: String,
        source: std::io::Error,
    },

    /// The engine or the format parser rejected the content of a source.
    #[error("Error processing source file {locator}: {source}")]
    CannotProcessSource { locator: String, source: Cause },

    /// The database could not be started.
    #[error("Error starting server {database}: {source}")]
    StartFailed { database: String, source: Cause },

    /// The database could not be stopped cleanly.
    #[error("Error stopping server {database}: {source}")]
    StopFailed { database: String, source: Cause },

    /// An operation needed a running database.
    #[error("Database '{0}' has not been started")]
    NotStarted(String),

    /// The database does not offer the capability a loader needs.
    #[error("Database '{database}' does not support {capability}")]
    Unsupported {
        database: String,
        capability: &'static str,
    },

    /// A configuration value could not be interpreted.
    #[error("Invalid value '{value}' for configuration key '{key}'")]
    InvalidConfig { key: String, value: String },

    /// No backend is registered under the requested type tag.
    #[error("Unknown database type: {0}")]
    UnknownDatabaseType(String),

    /// A run manifest could not be parsed.
    #[error("Failed to parse manifest at {path}: {source}")]
    ManifestError { path: PathBuf, source: Cause },

    /// A fail-fast batch stopped at the named source.
    #[error("Loading aborted after a failure in {0}")]
    LoadAborted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}

impl Error {
    /// Wrap any engine or parser failure as a processing error for `locator`.
    pub fn processing(locator: impl Into<String>, source: impl Into<Cause>) -> Self {
        Error::CannotProcessSource {
            locator: locator.into(),
            source: source.into(),
        }
    }

    /// Attach the source locator to an error raised while loading it.
    ///
    /// I/O errors become `CannotReadSource`. Errors that already name a
    /// source are returned unchanged, everything else is wrapped as
    /// `CannotProcessSource`.
    pub fn with_locator(self, locator: &str) -> Self {
        match self {
            Error::Io(source) => Error::CannotReadSource {
                locator: locator.to_string(),
                source,
            },
            Error::Sql(source) => Error::processing(locator, source),
            named @ (Error::UnsupportedFileType(_)
            | Error::CannotReadSource { .. }
            | Error::CannotProcessSource { .. }
            | Error::LoadAborted(_)) => named,
            other => Error::processing(locator, other),
        }
    }
}
