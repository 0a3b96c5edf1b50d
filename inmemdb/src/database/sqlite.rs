//! Relational backends on top of SQLite.
//!
//! One type covers three launch modes:
//!
//! - [`Mode::Memory`]: a shared-cache in-memory database, kept alive by an
//!   anchor connection for as long as the handle runs.
//! - [`Mode::File`]: a database file created on start and deleted on stop.
//! - [`Mode::Server`]: an in-memory database plus a loopback listener that
//!   executes one SQL statement per line.
//!
//! Shared-cache names are global to the process, so two handles configured
//! with the same database name see the same data.

use super::{Database, DatabaseCore, SqlDatabase, State};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::identity::{self, Attributes};
use crate::loader::LoaderRegistry;
use crate::logger::Logger;
use crate::registry::RegisteredBackend;
use crate::server::{self, Credentials, RequestHandler, ServerHandle, SHUTDOWN_TIMEOUT};
use crate::source::Source;
use async_trait::async_trait;
use jzon::JsonValue;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Port the server mode listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 9001;

/// How a SQLite database is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Memory,
    File,
    Server,
}

impl Mode {
    /// The registry tag for this mode.
    pub fn tag(self) -> &'static str {
        match self {
            Mode::Memory => "sqlite",
            Mode::File => "sqlite-file",
            Mode::Server => "sqlite-server",
        }
    }

    pub fn protocol(self) -> &'static str {
        match self {
            Mode::Memory => "sqlite:mem",
            Mode::File => "sqlite:file",
            Mode::Server => "sqlite:server",
        }
    }
}

/// A SQLite database handle.
pub struct SqliteDatabase {
    core: DatabaseCore,
    mode: Mode,
    anchor: Mutex<Option<Connection>>,
    file: Option<PathBuf>,
    server: Option<ServerHandle>,
}

impl SqliteDatabase {
    /// An unconfigured handle.
    pub fn new(mode: Mode) -> Self {
        Self::from_core(mode, DatabaseCore::new(LoaderRegistry::relational()))
    }

    /// A handle ready to start.
    pub fn with_config(mode: Mode, config: DatabaseConfig) -> Self {
        Self::from_core(mode, DatabaseCore::with_config(config, LoaderRegistry::relational()))
    }

    fn from_core(mode: Mode, core: DatabaseCore) -> Self {
        Self {
            core,
            mode,
            anchor: Mutex::new(None),
            file: None,
            server: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Location of the database file used by [`Mode::File`].
    ///
    /// Lives in the configured directory, falling back to the user's local
    /// data directory.
    pub fn file_path(&self) -> PathBuf {
        let directory = match self.core.config().directory() {
            Some(directory) => directory.to_path_buf(),
            None => default_directory(),
        };
        directory.join(format!("{}.db", self.core.name()))
    }

    fn target(&self) -> String {
        match self.mode {
            Mode::File => self.file_path().to_string_lossy().into_owned(),
            Mode::Memory | Mode::Server => format!(
                "file:{}?mode=memory&cache=shared",
                utf8_percent_encode(self.core.name(), NON_ALPHANUMERIC)
            ),
        }
    }

    fn open(&self, overrides: &Attributes) -> Result<Connection> {
        let connection = Connection::open(self.target())?;
        let attributes = identity::merge(self.core.config().attributes(), overrides);
        for (key, value) in attributes.iter() {
            connection.pragma_update(None, key, value)?;
        }
        Ok(connection)
    }

    async fn boot(&mut self) -> Result<()> {
        match self.mode {
            Mode::File => {
                let path = self.file_path();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                remove_database_files(&path).await?;
                // Opening creates the file.
                self.open(&Attributes::new())?.close().map_err(|(_, e)| e)?;
                self.file = Some(path);
            }
            Mode::Memory | Mode::Server => {
                let anchor = self.open(&Attributes::new())?;
                *lock(&self.anchor) = Some(anchor);
            }
        }

        if self.mode == Mode::Server {
            let handler = SqlRequestHandler {
                connection: Mutex::new(self.open(&Attributes::new())?),
            };
            let config = self.core.config();
            let addr = server::loopback(config.effective_port(DEFAULT_PORT));
            let handle = server::serve(addr, Credentials::from_config(config), Arc::new(handler)).await?;
            self.server = Some(handle);
        }
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        let anchor = lock(&self.anchor).take();
        if let Some(anchor) = anchor {
            anchor.close().map_err(|(_, e)| e)?;
        }
        if let Some(path) = self.file.take() {
            remove_database_files(&path).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("name", &self.core.name())
            .field("mode", &self.mode)
            .field("state", &self.core.state())
            .finish()
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn kind(&self) -> &'static str {
        self.mode.tag()
    }

    fn config(&self) -> &DatabaseConfig {
        self.core.config()
    }

    fn state(&self) -> State {
        self.core.state()
    }

    fn configure(&mut self, key: &str, value: &str, logger: &dyn Logger) -> bool {
        self.core.configure(key, value, logger)
    }

    async fn start(&mut self, logger: &dyn Logger) {
        if !self.core.begin_start(logger) {
            return;
        }
        match self.boot().await {
            Ok(()) => {
                tracing::debug!(identity = %self.connection_identity(&Attributes::new()), "sqlite started");
                self.core.finish_start(logger);
            }
            Err(e) => {
                if let Some(server) = self.server.take() {
                    let _ = server.shutdown(SHUTDOWN_TIMEOUT).await;
                }
                let _ = self.release().await;
                self.core.start_failed(logger, e);
            }
        }
    }

    async fn stop(&mut self, logger: &dyn Logger) {
        if !self.core.begin_stop() {
            return;
        }
        if let Some(server) = self.server.take() {
            if let Err(e) = server.shutdown(SHUTDOWN_TIMEOUT).await {
                self.core.stop_failed(logger, e);
            }
        }
        if let Err(e) = self.release().await {
            self.core.stop_failed(logger, e);
        }
        self.core.finish_stop(logger);
    }

    async fn load(&self, logger: &dyn Logger, source: Option<&Source>) {
        self.core.loaders().load(self, logger, source).await
    }

    fn loaders(&self) -> &LoaderRegistry {
        self.core.loaders()
    }

    fn loaders_mut(&mut self) -> &mut LoaderRegistry {
        self.core.loaders_mut()
    }

    fn listen_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(ServerHandle::local_addr)
    }

    fn as_sql(&self) -> Option<&dyn SqlDatabase> {
        Some(self)
    }
}

impl SqlDatabase for SqliteDatabase {
    fn protocol(&self) -> &'static str {
        self.mode.protocol()
    }

    fn connection_identity(&self, overrides: &Attributes) -> String {
        let attributes = identity::merge(self.core.config().attributes(), overrides);
        identity::build(self.protocol(), self.core.name(), &attributes)
    }

    fn connection(&self, overrides: &Attributes) -> Result<Connection> {
        self.core.require_started()?;
        let connection = self.open(overrides)?;
        tracing::debug!(identity = %self.connection_identity(overrides), "connection opened");
        Ok(connection)
    }
}

/// Executes one SQL statement per request line.
struct SqlRequestHandler {
    connection: Mutex<Connection>,
}

impl RequestHandler for SqlRequestHandler {
    fn handle(&self, request: &str) -> String {
        let connection = lock(&self.connection);
        match run_statement(&connection, request) {
            Ok(reply) => reply.dump(),
            Err(e) => server::json_object([("error", e.to_string().into())]).dump(),
        }
    }
}

fn run_statement(connection: &Connection, sql: &str) -> rusqlite::Result<JsonValue> {
    let mut statement = connection.prepare(sql)?;
    if statement.column_count() == 0 {
        let changes = statement.execute([])?;
        return Ok(server::json_object([("changes", changes.into())]));
    }

    let columns: Vec<JsonValue> = statement
        .column_names()
        .into_iter()
        .map(JsonValue::from)
        .collect();
    let width = columns.len();

    let mut rows = statement.query([])?;
    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        let cells = (0..width)
            .map(|i| row.get_ref(i).map(to_json))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        values.push(JsonValue::Array(cells));
    }

    Ok(server::json_object([
        ("columns", JsonValue::Array(columns)),
        ("rows", JsonValue::Array(values)),
    ]))
}

fn to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => i.into(),
        ValueRef::Real(f) => f.into(),
        ValueRef::Text(text) => String::from_utf8_lossy(text).into_owned().into(),
        ValueRef::Blob(blob) => blob
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<String>()
            .into(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn default_directory() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("inmemdb"))
        .unwrap_or_else(std::env::temp_dir)
}

/// Delete a database file and its journals, ignoring files that are absent.
async fn remove_database_files(path: &Path) -> io::Result<()> {
    let base = path.to_string_lossy().into_owned();
    for candidate in [
        base.clone(),
        format!("{}-journal", base),
        format!("{}-wal", base),
        format!("{}-shm", base),
    ] {
        match tokio::fs::remove_file(&candidate).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn create_memory() -> Box<dyn Database> {
    Box::new(SqliteDatabase::new(Mode::Memory))
}

fn create_file() -> Box<dyn Database> {
    Box::new(SqliteDatabase::new(Mode::File))
}

fn create_server() -> Box<dyn Database> {
    Box::new(SqliteDatabase::new(Mode::Server))
}

inventory::submit! { RegisteredBackend { name: "sqlite", create: create_memory } }
inventory::submit! { RegisteredBackend { name: "sqlite-file", create: create_file } }
inventory::submit! { RegisteredBackend { name: "sqlite-server", create: create_server } }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::RecordingLogger;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    fn memory(name: &str) -> SqliteDatabase {
        SqliteDatabase::with_config(Mode::Memory, DatabaseConfig::new(name))
    }

    #[tokio::test]
    async fn test_memory_lifecycle() {
        let logger = RecordingLogger::new();
        let mut database = memory("sqlite_lifecycle");

        database.start(&logger).await;
        assert!(database.is_started());

        let connection = database.connection(&Attributes::new()).unwrap();
        connection.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        drop(connection);

        // The anchor keeps the database alive between connections.
        let connection = database.connection(&Attributes::new()).unwrap();
        let count: i64 = connection
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        drop(connection);

        database.stop(&logger).await;
        assert_eq!(database.state(), State::Stopped);
        assert!(!logger.has_errors(), "{:?}", logger.errors());
    }

    #[tokio::test]
    async fn test_memory_name_with_uri_delimiters_stays_in_memory() {
        let logger = RecordingLogger::new();
        let mut database = memory("sqlite_uri#1?x=/y%");
        database.start(&logger).await;
        assert!(database.is_started(), "{:?}", logger.errors());

        let connection = database.connection(&Attributes::new()).unwrap();
        connection.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        let file: String = connection
            .query_row("PRAGMA database_list", [], |row| row.get(2))
            .unwrap();
        assert_eq!(file, "");
        drop(connection);

        let other = database.connection(&Attributes::new()).unwrap();
        let count: i64 = other
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        drop(other);

        assert!(!Path::new("sqlite_uri").exists());
        database.stop(&logger).await;
        assert!(!Path::new("sqlite_uri").exists());
        assert!(!logger.has_errors(), "{:?}", logger.errors());
    }

    #[tokio::test]
    async fn test_stop_twice_is_silent() {
        let logger = RecordingLogger::new();
        let mut database = memory("sqlite_stop_twice");
        database.start(&logger).await;
        database.stop(&logger).await;
        database.stop(&logger).await;
        assert!(!logger.has_errors());
    }

    #[tokio::test]
    async fn test_stop_before_start_is_silent() {
        let logger = RecordingLogger::new();
        let mut database = memory("sqlite_never_started");
        database.stop(&logger).await;
        assert_eq!(database.state(), State::Configured);
        assert!(logger.entries().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_logs_and_keeps_running() {
        let logger = RecordingLogger::new();
        let mut database = memory("sqlite_start_twice");
        database.start(&logger).await;
        database.start(&logger).await;
        assert!(database.is_started());
        assert!(!logger.has_errors());
        assert!(logger.infos().iter().any(|m| m.contains("already started")));
        database.stop(&logger).await;
    }

    #[tokio::test]
    async fn test_start_without_name_fails() {
        let logger = RecordingLogger::new();
        let mut database = SqliteDatabase::new(Mode::Memory);
        database.start(&logger).await;
        assert!(!database.is_started());
        assert_eq!(logger.error_count(), 1);
        database.stop(&logger).await;
        assert_eq!(logger.error_count(), 1);
    }

    #[test]
    fn test_connection_requires_start() {
        let database = memory("sqlite_not_started");
        match database.connection(&Attributes::new()) {
            Err(Error::NotStarted(name)) => assert_eq!(name, "sqlite_not_started"),
            other => panic!("expected NotStarted, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_connection_identity() {
        let config = DatabaseConfig::new("orders").with_attribute("foreign_keys", "ON");
        let database = SqliteDatabase::with_config(Mode::Memory, config);
        let overrides = Attributes::new().with("cache_size", "500");
        assert_eq!(
            database.connection_identity(&overrides),
            "sqlite:mem:orders;foreign_keys=ON;cache_size=500"
        );
        assert_eq!(
            SqliteDatabase::with_config(Mode::File, DatabaseConfig::new("orders"))
                .connection_identity(&Attributes::new()),
            "sqlite:file:orders"
        );
    }

    #[tokio::test]
    async fn test_attributes_applied_to_connections() {
        let logger = RecordingLogger::new();
        let config = DatabaseConfig::new("sqlite_pragmas").with_attribute("foreign_keys", "ON");
        let mut database = SqliteDatabase::with_config(Mode::Memory, config);
        database.start(&logger).await;

        let connection = database.connection(&Attributes::new()).unwrap();
        let enabled: i64 = connection
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);

        let connection = database
            .connection(&Attributes::new().with("foreign_keys", "OFF"))
            .unwrap();
        let enabled: i64 = connection
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 0);

        drop(connection);
        database.stop(&logger).await;
    }

    #[tokio::test]
    async fn test_file_mode_creates_and_deletes() {
        let logger = RecordingLogger::new();
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig::new("filedb").with_directory(dir.path());
        let mut database = SqliteDatabase::with_config(Mode::File, config);
        let path = database.file_path();
        assert_eq!(path, dir.path().join("filedb.db"));

        database.start(&logger).await;
        assert!(path.is_file());

        database.stop(&logger).await;
        assert!(!path.exists());
        assert!(!logger.has_errors(), "{:?}", logger.errors());
    }

    #[tokio::test]
    async fn test_server_mode_executes_statements() {
        let logger = RecordingLogger::new();
        let config = DatabaseConfig::new("sqlite_served").with_port(0);
        let mut database = SqliteDatabase::with_config(Mode::Server, config);
        database.start(&logger).await;
        let addr = database.listen_addr().unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"CREATE TABLE t (id INTEGER, name TEXT)\nINSERT INTO t VALUES (1, 'a')\nSELECT id, name FROM t\nSELECT nope\n")
            .await
            .unwrap();

        assert_eq!(lines.next_line().await.unwrap().unwrap(), r#"{"changes":0}"#);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), r#"{"changes":1}"#);
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            r#"{"columns":["id","name"],"rows":[[1,"a"]]}"#
        );
        assert!(lines.next_line().await.unwrap().unwrap().starts_with(r#"{"error":"#));

        database.stop(&logger).await;
        assert!(database.listen_addr().is_none());
        assert!(!logger.has_errors(), "{:?}", logger.errors());
    }

    #[tokio::test]
    async fn test_server_mode_port_in_use() {
        let logger = RecordingLogger::new();
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let config = DatabaseConfig::new("sqlite_port_taken").with_port(port);
        let mut database = SqliteDatabase::with_config(Mode::Server, config);
        database.start(&logger).await;

        assert!(!database.is_started());
        assert!(logger.errors()[0].starts_with("Error starting server sqlite_port_taken"));
        database.stop(&logger).await;
        assert_eq!(logger.error_count(), 1);
    }
}
