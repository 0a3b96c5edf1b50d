//! Database handles and their lifecycle.
//!
//! Every backend implements [`Database`]. The lifecycle bookkeeping shared by
//! all of them lives in [`DatabaseCore`], which backends embed rather than
//! inherit. Loaders reach engine-specific behaviour through the capability
//! accessors [`Database::as_sql`] and [`Database::as_documents`].

pub mod document;
pub mod graph;
pub mod sqlite;

use crate::config::DatabaseConfig;
use crate::error::{Cause, Error, Result};
use crate::identity::Attributes;
use crate::loader::LoaderRegistry;
use crate::logger::Logger;
use crate::source::Source;
use async_trait::async_trait;
use jzon::JsonValue;
use std::fmt;
use std::net::SocketAddr;

pub use document::MemoryDocumentDatabase;
pub use graph::GraphDatabase;
pub use sqlite::{Mode, SqliteDatabase};

/// Lifecycle state of a database handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Unconfigured,
    Configured,
    Started,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Unconfigured => "unconfigured",
            State::Configured => "configured",
            State::Started => "started",
            State::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A launchable database.
///
/// Operations driven by a caller report their problems through the supplied
/// [`Logger`] instead of returning them. See [`LoaderRegistry::load`] for the
/// messages `load` produces.
#[async_trait]
pub trait Database: Send + Sync {
    /// The registry tag of this backend, e.g. `"sqlite"`.
    fn kind(&self) -> &'static str;

    fn config(&self) -> &DatabaseConfig;

    fn state(&self) -> State;

    fn is_started(&self) -> bool {
        self.state() == State::Started
    }

    /// Apply one key/value setting. Returns whether the key was recognised.
    fn configure(&mut self, key: &str, value: &str, logger: &dyn Logger) -> bool;

    /// Boot the engine and, for server variants, bind the listener.
    async fn start(&mut self, logger: &dyn Logger);

    /// Release everything `start` acquired. Safe to call in any state.
    async fn stop(&mut self, logger: &dyn Logger);

    /// Load one source with the first loader that claims it.
    async fn load(&self, logger: &dyn Logger, source: Option<&Source>);

    fn loaders(&self) -> &LoaderRegistry;

    fn loaders_mut(&mut self) -> &mut LoaderRegistry;

    /// The bound listener address while a server variant is running.
    fn listen_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Relational access, for backends that have it.
    fn as_sql(&self) -> Option<&dyn SqlDatabase> {
        None
    }

    /// Document insertion, for backends that have it.
    fn as_documents(&self) -> Option<&dyn DocumentDatabase> {
        None
    }
}

/// Relational capability.
pub trait SqlDatabase: Send + Sync {
    /// Protocol prefix of the connection identity, e.g. `sqlite:mem`.
    fn protocol(&self) -> &'static str;

    /// The identity string for a connection with extra attributes.
    fn connection_identity(&self, overrides: &Attributes) -> String;

    /// Open a new connection to the running database.
    ///
    /// Stored attributes merged with `overrides` are applied to the
    /// connection before it is returned. The caller owns the connection and
    /// closes it by dropping it.
    fn connection(&self, overrides: &Attributes) -> Result<rusqlite::Connection>;
}

/// Document capability.
pub trait DocumentDatabase: Send + Sync {
    /// Insert one document into a collection, creating the collection on
    /// first use.
    fn insert_document(&self, collection: &str, document: JsonValue) -> Result<()>;
}

/// Lifecycle bookkeeping shared by every backend.
#[derive(Debug)]
pub struct DatabaseCore {
    config: DatabaseConfig,
    state: State,
    loaders: LoaderRegistry,
}

impl DatabaseCore {
    /// A core waiting for configuration.
    pub fn new(loaders: LoaderRegistry) -> Self {
        Self {
            config: DatabaseConfig::default(),
            state: State::Unconfigured,
            loaders,
        }
    }

    /// A core built from a complete configuration.
    pub fn with_config(config: DatabaseConfig, loaders: LoaderRegistry) -> Self {
        Self {
            config,
            state: State::Configured,
            loaders,
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn loaders(&self) -> &LoaderRegistry {
        &self.loaders
    }

    pub fn loaders_mut(&mut self) -> &mut LoaderRegistry {
        &mut self.loaders
    }

    /// Apply a setting, reporting values that cannot be interpreted.
    pub fn configure(&mut self, key: &str, value: &str, logger: &dyn Logger) -> bool {
        match self.config.configure(key, value) {
            Ok(recognised) => {
                if self.state == State::Unconfigured {
                    self.state = State::Configured;
                }
                if !recognised {
                    tracing::debug!(key, "ignoring unknown configuration key");
                }
                recognised
            }
            Err(e) => {
                logger.log_error(&e);
                false
            }
        }
    }

    /// Check that a start may proceed.
    ///
    /// Returns `false` when the handle is already running or the
    /// configuration is incomplete; the latter is reported as a start
    /// failure.
    pub fn begin_start(&self, logger: &dyn Logger) -> bool {
        if self.state == State::Started {
            logger.log_info(&format!("Database {} is already started", self.name()));
            return false;
        }
        if let Err(e) = self.config.validate() {
            self.start_failed(logger, e);
            return false;
        }
        true
    }

    pub fn finish_start(&mut self, logger: &dyn Logger) {
        self.state = State::Started;
        logger.log_info(&format!("Started database {}", self.name()));
    }

    pub fn start_failed(&self, logger: &dyn Logger, cause: impl Into<Cause>) {
        logger.log_error(&Error::StartFailed {
            database: self.name().to_string(),
            source: cause.into(),
        });
    }

    /// Check that a stop has anything to do. Stopping a handle that is not
    /// running is silent.
    pub fn begin_stop(&self) -> bool {
        self.state == State::Started
    }

    pub fn finish_stop(&mut self, logger: &dyn Logger) {
        self.state = State::Stopped;
        logger.log_info(&format!("Stopped database {}", self.name()));
    }

    pub fn stop_failed(&self, logger: &dyn Logger, cause: impl Into<Cause>) {
        logger.log_error(&Error::StopFailed {
            database: self.name().to_string(),
            source: cause.into(),
        });
    }

    /// Fail with `NotStarted` unless the handle is running.
    pub fn require_started(&self) -> Result<()> {
        if self.state == State::Started {
            Ok(())
        } else {
            Err(Error::NotStarted(self.name().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::RecordingLogger;

    #[test]
    fn test_configure_moves_to_configured() {
        let logger = RecordingLogger::new();
        let mut core = DatabaseCore::new(LoaderRegistry::new());
        assert_eq!(core.state(), State::Unconfigured);

        assert!(core.configure("database", "test", &logger));
        assert_eq!(core.state(), State::Configured);
        assert_eq!(core.name(), "test");
        assert!(!logger.has_errors());
    }

    #[test]
    fn test_configure_reports_bad_values() {
        let logger = RecordingLogger::new();
        let mut core = DatabaseCore::new(LoaderRegistry::new());
        assert!(!core.configure("port", "abc", &logger));
        assert_eq!(logger.error_count(), 1);
    }

    #[test]
    fn test_begin_start_requires_name() {
        let logger = RecordingLogger::new();
        let core = DatabaseCore::new(LoaderRegistry::new());
        assert!(!core.begin_start(&logger));
        assert!(logger.errors()[0].starts_with("Error starting server"));
    }

    #[test]
    fn test_transitions() {
        let logger = RecordingLogger::new();
        let mut core = DatabaseCore::with_config(DatabaseConfig::new("test"), LoaderRegistry::new());
        assert!(core.require_started().is_err());
        assert!(!core.begin_stop());

        assert!(core.begin_start(&logger));
        core.finish_start(&logger);
        assert!(core.require_started().is_ok());
        assert!(!core.begin_start(&logger));

        assert!(core.begin_stop());
        core.finish_stop(&logger);
        assert_eq!(core.state(), State::Stopped);
        assert!(!core.begin_stop());
        assert!(!logger.has_errors());
    }
}
