//! # inmemdb
//!
//! Launch an embeddable database, seed it from scripts and data sets, and
//! shut it down again. Built for test harnesses that need a throwaway
//! database for the length of a test run.
//!
//! ## Features
//!
//! - **Pluggable backends**: SQLite (in memory, file backed or served on a
//!   loopback port), an in-process document store, and a property graph.
//!   Backends register themselves by type tag, see [`registry`].
//! - **Format-agnostic seeding**: SQL scripts, structured and flat XML data
//!   sets, CSV, spreadsheets and JSON document streams. The first loader that
//!   recognises a source applies it.
//! - **Classpath resources**: `classpath:` locators are resolved against a
//!   list of resource roots.
//! - **Caller-controlled failure policy**: problems are reported through a
//!   [`Logger`] so a batch of sources can continue past a bad one.
//!
//! ## Examples
//!
//! ```no_run
//! use inmemdb::{Database, DatabaseConfig, Mode, SqliteDatabase, Source, TracingLogger};
//!
//! #[tokio::main]
//! async fn main() {
//!     let logger = TracingLogger;
//!     let mut database = SqliteDatabase::with_config(Mode::Memory, DatabaseConfig::new("test"));
//!
//!     database.start(&logger).await;
//!     database.load(&logger, Some(&Source::script("classpath:create_database.sql"))).await;
//!     database.load(&logger, Some(&Source::data_set("classpath:users.csv", None))).await;
//!
//!     // ... run tests against the database ...
//!
//!     database.stop(&logger).await;
//! }
//! ```
//!
//! Driven from a manifest:
//!
//! ```no_run
//! use inmemdb::{launch, Manifest, TracingLogger, ENV_PREFIX};
//!
//! #[tokio::main]
//! async fn main() -> inmemdb::Result<()> {
//!     let logger = TracingLogger;
//!     let manifest = Manifest::load("inmemdb.toml").await?.with_env_overrides(ENV_PREFIX)?;
//!
//!     if let Some(mut database) = launch(&manifest, &logger).await? {
//!         database.stop(&logger).await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod classpath;
pub mod config;
pub mod database;
pub mod error;
pub mod identity;
pub mod loader;
pub mod logger;
pub mod manifest;
pub mod registry;
pub mod runner;
pub mod server;
pub mod source;

pub use classpath::Classpath;
pub use config::DatabaseConfig;
pub use database::{
    Database, DatabaseCore, DocumentDatabase, GraphDatabase, MemoryDocumentDatabase, Mode,
    SqlDatabase, SqliteDatabase, State,
};
pub use error::{Error, Result};
pub use identity::Attributes;
pub use loader::{Loader, LoaderRegistry};
pub use logger::{LogEntry, Logger, RecordingLogger, TracingLogger};
pub use manifest::{Manifest, ENV_PREFIX};
pub use registry::{backend_names, create_database, RegisteredBackend};
pub use runner::launch;
pub use source::Source;

// Re-exported so custom loaders and callers can name the engine types.
pub use jzon;
pub use rusqlite;
