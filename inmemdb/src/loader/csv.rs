//! CSV data set loader.

use super::dataset::{self, DataSet, Table};
use super::{read_source, table_name, Loader};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::source::Source;
use async_trait::async_trait;
use rusqlite::types::Value;

/// Cell text that stands for NULL unless configured otherwise.
pub const DEFAULT_NULL_TOKEN: &str = "null";

/// Loads a `.csv` file into the table named after the file.
///
/// The first record holds the column names.
#[derive(Debug, Clone)]
pub struct CsvLoader {
    null_token: String,
}

impl CsvLoader {
    pub fn with_null_token(token: impl Into<String>) -> Self {
        Self {
            null_token: token.into(),
        }
    }

    /// Parse CSV text into a single table.
    pub fn parse(&self, text: &str, table: &str) -> std::result::Result<Table, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(text.as_bytes());

        let mut parsed = Table::with_columns(table, reader.headers()?.iter());
        for record in reader.records() {
            let record = record?;
            let row = record
                .iter()
                .map(|cell| {
                    if cell == self.null_token {
                        Value::Null
                    } else {
                        Value::Text(cell.to_string())
                    }
                })
                .collect();
            parsed.push_row(row);
        }
        Ok(parsed)
    }
}

impl Default for CsvLoader {
    fn default() -> Self {
        Self::with_null_token(DEFAULT_NULL_TOKEN)
    }
}

#[async_trait]
impl Loader for CsvLoader {
    fn extension(&self) -> &str {
        ".csv"
    }

    fn name(&self) -> &str {
        "csv"
    }

    async fn load(&self, database: &dyn Database, source: &Source) -> Result<usize> {
        let text = read_source(source, database.config().classpath()).await?;
        let table = self
            .parse(&text, &table_name(source, self.extension()))
            .map_err(|e| Error::processing(source.locator(), e))?;

        let mut data_set = DataSet::new();
        data_set.push(table);
        dataset::apply(database, source, &data_set)
    }
}
