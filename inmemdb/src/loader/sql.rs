//! SQL script loader.

use super::{read_source, Loader};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::identity::Attributes;
use crate::source::Source;
use async_trait::async_trait;
use rusqlite::{Batch, Connection};

/// Runs `.sql` scripts statement by statement on one connection.
///
/// The first failing statement stops the script. Statements that already
/// ran stay applied.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlLoader;

#[async_trait]
impl Loader for SqlLoader {
    fn extension(&self) -> &str {
        ".sql"
    }

    fn name(&self) -> &str {
        "sql"
    }

    async fn load(&self, database: &dyn Database, source: &Source) -> Result<usize> {
        let script = read_source(source, database.config().classpath()).await?;
        let sql = database.as_sql().ok_or_else(|| Error::Unsupported {
            database: database.config().name().to_string(),
            capability: "SQL scripts",
        })?;
        let connection = sql.connection(&Attributes::new())?;
        run_script(&connection, &script).map_err(|e| Error::processing(source.locator(), e))
    }
}

/// Execute every statement of a script in order. Returns how many ran.
pub fn run_script(connection: &Connection, script: &str) -> rusqlite::Result<usize> {
    let mut batch = Batch::new(connection, script);
    let mut executed = 0;
    while let Some(mut statement) = batch.next()? {
        if statement.column_count() > 0 {
            let mut rows = statement.raw_query();
            while rows.next()?.is_some() {}
        } else {
            statement.raw_execute()?;
        }
        executed += 1;
    }
    Ok(executed)
}
