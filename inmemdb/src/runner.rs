//! Launching a database from a manifest.

use crate::database::Database;
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::manifest::Manifest;
use crate::registry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Create, configure, start and seed the database a manifest describes.
///
/// Returns `Ok(None)` when the manifest asks to skip the launch. Load
/// failures are reported through `logger` and the remaining sources still
/// run, unless the manifest sets `fail_fast`, in which case the database is
/// stopped and [`Error::LoadAborted`] names the failing source.
///
/// The caller owns the returned handle and is responsible for stopping it.
pub async fn launch(manifest: &Manifest, logger: &dyn Logger) -> Result<Option<Box<dyn Database>>> {
    if manifest.skip {
        logger.log_info("Skipping database launch");
        return Ok(None);
    }

    let mut database = registry::create_database(&manifest.database_type)?;
    let tracker = Tracker::new(logger);

    for (key, value) in manifest.settings()? {
        database.configure(&key, &value, &tracker);
    }

    database.start(&tracker).await;
    if !database.is_started() {
        database.stop(&tracker).await;
        let cause = tracker
            .last_error()
            .unwrap_or_else(|| "database did not start".to_string());
        return Err(Error::StartFailed {
            database: manifest.database.clone(),
            source: cause.into(),
        });
    }

    for source in &manifest.sources {
        let before = tracker.error_count();
        database.load(&tracker, Some(source)).await;
        if manifest.fail_fast && tracker.error_count() > before {
            database.stop(&tracker).await;
            return Err(Error::LoadAborted(source.locator().to_string()));
        }
    }

    Ok(Some(database))
}

/// Passes everything on while counting errors.
struct Tracker<'a> {
    inner: &'a dyn Logger,
    errors: AtomicUsize,
    last: Mutex<Option<String>>,
}

impl<'a> Tracker<'a> {
    fn new(inner: &'a dyn Logger) -> Self {
        Self {
            inner,
            errors: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    fn last_error(&self) -> Option<String> {
        self.last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Logger for Tracker<'_> {
    fn log_info(&self, message: &str) {
        self.inner.log_info(message);
    }

    fn log_error(&self, error: &Error) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(error.to_string());
        self.inner.log_error(error);
    }
}
