//! The reporting channel supplied by callers.
//!
//! Expected failures (unsupported sources, unreadable files, rejected
//! statements) are reported here instead of being returned, so a caller
//! seeding a database from many sources can decide for itself whether one
//! failure should end the batch.

use crate::error::Error;
use std::error::Error as _;
use std::sync::Mutex;

/// Receives progress messages and recoverable errors.
pub trait Logger: Send + Sync {
    /// Report progress.
    fn log_info(&self, message: &str);

    /// Report a recoverable failure. The error's `source()` chain carries
    /// the underlying cause, if any.
    fn log_error(&self, error: &Error);
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log_info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn log_error(&self, error: &Error) {
        match error.source() {
            Some(cause) => tracing::error!(cause = %cause, "{}", error),
            None => tracing::error!("{}", error),
        }
    }
}

/// A single entry captured by [`RecordingLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Info(String),
    Error(String),
}

/// Keeps every message in memory.
///
/// Useful in tests, and for callers that inspect the outcome of a batch
/// before deciding what to do next.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries, in the order they were logged.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    pub fn infos(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Info(message) => Some(message.clone()),
                LogEntry::Error(_) => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|entry| match entry {
                LogEntry::Error(message) => Some(message.clone()),
                LogEntry::Info(_) => None,
            })
            .collect()
    }

    pub fn error_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|entry| matches!(entry, LogEntry::Error(_)))
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEntry>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Logger for RecordingLogger {
    fn log_info(&self, message: &str) {
        tracing::debug!("{}", message);
        self.lock().push(LogEntry::Info(message.to_string()));
    }

    fn log_error(&self, error: &Error) {
        tracing::debug!(error = %error, "recorded error");
        self.lock().push(LogEntry::Error(error.to_string()));
    }
}
