//! End-to-end loading into SQLite backends.

use async_trait::async_trait;
use inmemdb::loader::Loader;
use inmemdb::{
    Attributes, Classpath, Database, DatabaseConfig, Mode, RecordingLogger, SqlDatabase,
    SqliteDatabase, Source,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn resources() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/resources")
}

fn resource(name: &str) -> String {
    resources().join(name).to_string_lossy().into_owned()
}

async fn started(name: &str, logger: &RecordingLogger) -> SqliteDatabase {
    let config = DatabaseConfig::new(name).with_classpath(Classpath::new([resources()]));
    let mut database = SqliteDatabase::with_config(Mode::Memory, config);
    database.start(logger).await;
    assert!(database.is_started(), "{:?}", logger.errors());
    database
}

fn count(database: &SqliteDatabase, sql: &str) -> i64 {
    let connection = database.connection(&Attributes::new()).unwrap();
    connection.query_row(sql, [], |row| row.get(0)).unwrap()
}

fn users(database: &SqliteDatabase) -> Vec<(i64, String)> {
    let connection = database.connection(&Attributes::new()).unwrap();
    let mut statement = connection
        .prepare("SELECT id, name FROM users ORDER BY id")
        .unwrap();
    let rows = statement
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();
    rows
}

#[tokio::test]
async fn test_script_then_csv() {
    let logger = RecordingLogger::new();
    let mut database = started("e2e_script_csv", &logger).await;

    database.load(&logger, Some(&Source::script(resource("users.sql")))).await;
    database.load(&logger, Some(&Source::data_set(resource("users.csv"), None))).await;

    assert!(!logger.has_errors(), "{:?}", logger.errors());
    assert_eq!(count(&database, "SELECT count(*) FROM users"), 2);
    assert_eq!(count(&database, "SELECT count(*) FROM users WHERE email IS NULL"), 1);
    assert_eq!(
        users(&database),
        vec![(1, "Alice".to_string()), (2, "Bob".to_string())]
    );

    database.stop(&logger).await;
    assert!(!logger.has_errors());
}

#[tokio::test]
async fn test_classpath_sources() {
    let logger = RecordingLogger::new();
    let mut database = started("e2e_classpath", &logger).await;

    database.load(&logger, Some(&Source::script("classpath:users.sql"))).await;
    database.load(&logger, Some(&Source::new("classpath:/users.csv"))).await;

    assert!(!logger.has_errors(), "{:?}", logger.errors());
    assert_eq!(count(&database, "SELECT count(*) FROM users"), 2);
    database.stop(&logger).await;
}

#[tokio::test]
async fn test_missing_classpath_resource() {
    let logger = RecordingLogger::new();
    let mut database = started("e2e_missing_resource", &logger).await;

    database.load(&logger, Some(&Source::script("classpath:nothing.sql"))).await;

    let errors = logger.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Cannot read source file classpath:nothing.sql"), "{errors:?}");
    database.stop(&logger).await;
}

#[tokio::test]
async fn test_structured_xml() {
    let logger = RecordingLogger::new();
    let mut database = started("e2e_structured_xml", &logger).await;

    database.load(&logger, Some(&Source::script("classpath:users.sql"))).await;
    database.load(&logger, Some(&Source::data_set("classpath:users.dbunit.xml", None))).await;

    assert!(!logger.has_errors(), "{:?}", logger.errors());
    assert_eq!(count(&database, "SELECT count(*) FROM users"), 2);
    assert_eq!(count(&database, "SELECT count(*) FROM users WHERE email IS NULL"), 1);
    assert_eq!(count(&database, "SELECT count(*) FROM roles"), 1);
    assert!(logger.infos().iter().any(|m| m.contains("dbunit-xml")));
    database.stop(&logger).await;
}

#[tokio::test]
async fn test_flat_xml() {
    let logger = RecordingLogger::new();
    let mut database = started("e2e_flat_xml", &logger).await;

    database.load(&logger, Some(&Source::script("classpath:users.sql"))).await;
    database.load(&logger, Some(&Source::data_set("classpath:users.xml", Some(false)))).await;

    assert!(!logger.has_errors(), "{:?}", logger.errors());
    assert_eq!(count(&database, "SELECT count(*) FROM users"), 2);
    assert_eq!(count(&database, "SELECT count(*) FROM users WHERE email IS NULL"), 1);
    database.stop(&logger).await;
}

#[cfg(feature = "xls")]
#[tokio::test]
async fn test_workbook() {
    let logger = RecordingLogger::new();
    let mut database = started("e2e_workbook", &logger).await;

    database.load(&logger, Some(&Source::script("classpath:users.sql"))).await;
    database.load(&logger, Some(&Source::new("classpath:users.xls"))).await;

    assert!(!logger.has_errors(), "{:?}", logger.errors());
    assert_eq!(
        users(&database),
        vec![(40, "Xena".to_string()), (41, "Yuri".to_string())]
    );
    assert_eq!(count(&database, "SELECT count(*) FROM users WHERE email IS NULL"), 1);
    assert_eq!(count(&database, "SELECT user_id FROM roles WHERE role = 'admin'"), 40);
    assert!(logger.infos().iter().any(|m| m.contains("xls loader (3 applied)")));
    database.stop(&logger).await;
}

#[tokio::test]
async fn test_invalid_structured_content_falls_through() {
    let logger = RecordingLogger::new();
    let mut database = started("e2e_fall_through", &logger).await;

    database.load(&logger, Some(&Source::script("classpath:users.sql"))).await;
    database.load(&logger, Some(&Source::new("classpath:flat.dbunit.xml"))).await;

    assert!(!logger.has_errors(), "{:?}", logger.errors());
    assert_eq!(count(&database, "SELECT count(*) FROM users WHERE name = 'Grace'"), 1);
    assert!(logger.infos().iter().any(|m| m.contains("flat-xml")));
    database.stop(&logger).await;
}

#[tokio::test]
async fn test_null_source() {
    let logger = RecordingLogger::new();
    let mut database = started("e2e_null_source", &logger).await;

    database.load(&logger, None).await;
    database.load(&logger, Some(&Source::new(""))).await;

    assert_eq!(
        logger.errors(),
        vec!["Unsupported file type: null", "Unsupported file type: <empty>"]
    );
    database.stop(&logger).await;
}

#[tokio::test]
async fn test_unsupported_sources() {
    let logger = RecordingLogger::new();
    let mut database = started("e2e_unsupported", &logger).await;

    let directory = resource("folder.sql");
    let missing = resource("missing.csv");
    let document = resource("widgets.json");
    for locator in [&directory, &missing, &document] {
        database.load(&logger, Some(&Source::new(locator.as_str()))).await;
    }

    assert_eq!(
        logger.errors(),
        vec![
            format!("Unsupported file type: {}", directory),
            format!("Unsupported file type: {}", missing),
            format!("Unsupported file type: {}", document),
        ]
    );
    database.stop(&logger).await;
}

#[tokio::test]
async fn test_failing_script_keeps_applied_statements() {
    let logger = RecordingLogger::new();
    let mut database = started("e2e_broken_script", &logger).await;

    database.load(&logger, Some(&Source::script("classpath:broken.sql"))).await;

    let errors = logger.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Error processing source file classpath:broken.sql"));
    assert_eq!(count(&database, "SELECT count(*) FROM broken"), 1);
    database.stop(&logger).await;
}

#[tokio::test]
async fn test_ragged_csv_is_reported() {
    let logger = RecordingLogger::new();
    let mut database = started("e2e_ragged_csv", &logger).await;

    database.load(&logger, Some(&Source::new("classpath:ragged.csv"))).await;

    assert_eq!(logger.error_count(), 1);
    assert!(logger.errors()[0].starts_with("Error processing source file classpath:ragged.csv"));
    database.stop(&logger).await;
}

#[tokio::test]
async fn test_load_before_start_is_reported() {
    let logger = RecordingLogger::new();
    let config = DatabaseConfig::new("e2e_not_started").with_classpath(Classpath::new([resources()]));
    let database = SqliteDatabase::with_config(Mode::Memory, config);

    database.load(&logger, Some(&Source::script("classpath:users.sql"))).await;

    assert_eq!(
        logger.errors(),
        vec!["Error processing source file classpath:users.sql: Database 'e2e_not_started' has not been started"]
    );
}

#[tokio::test]
async fn test_file_backed_database() {
    let logger = RecordingLogger::new();
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig::new("e2e_file")
        .with_directory(dir.path())
        .with_classpath(Classpath::new([resources()]));
    let mut database = SqliteDatabase::with_config(Mode::File, config);

    database.start(&logger).await;
    database.load(&logger, Some(&Source::script("classpath:users.sql"))).await;
    database.load(&logger, Some(&Source::new("classpath:users.csv"))).await;
    assert_eq!(count(&database, "SELECT count(*) FROM users"), 2);

    database.stop(&logger).await;
    assert!(!dir.path().join("e2e_file.db").exists());
    assert!(!logger.has_errors(), "{:?}", logger.errors());
}

/// Claims every `.csv` source and records how often it was asked.
struct Claiming {
    loads: Arc<AtomicUsize>,
}

#[async_trait]
impl Loader for Claiming {
    fn extension(&self) -> &str {
        ".csv"
    }

    fn name(&self) -> &str {
        "claiming"
    }

    async fn load(&self, _database: &dyn Database, _source: &Source) -> inmemdb::Result<usize> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

/// Would claim `.csv` sources too, but counts every content check.
struct Shadowed {
    checks: Arc<AtomicUsize>,
}

#[async_trait]
impl Loader for Shadowed {
    fn extension(&self) -> &str {
        ".csv"
    }

    fn name(&self) -> &str {
        "shadowed"
    }

    async fn has_valid_content(&self, _source: &Source, _classpath: &Classpath) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn load(&self, _database: &dyn Database, _source: &Source) -> inmemdb::Result<usize> {
        panic!("a shadowed loader must never load");
    }
}

#[tokio::test]
async fn test_first_matching_loader_wins() {
    let logger = RecordingLogger::new();
    let mut database = started("e2e_first_match", &logger).await;

    let loads = Arc::new(AtomicUsize::new(0));
    let checks = Arc::new(AtomicUsize::new(0));
    database.loaders_mut().insert(0, Claiming { loads: loads.clone() });
    database.loaders_mut().push(Shadowed { checks: checks.clone() });

    database.load(&logger, Some(&Source::script("classpath:users.sql"))).await;
    database.load(&logger, Some(&Source::new("classpath:users.csv"))).await;

    assert!(!logger.has_errors(), "{:?}", logger.errors());
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(checks.load(Ordering::SeqCst), 0);
    assert_eq!(count(&database, "SELECT count(*) FROM users"), 0);
    database.stop(&logger).await;
}
