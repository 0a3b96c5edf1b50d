//! The tabular data model shared by the data-set loaders, and its insertion
//! into a relational database.

use crate::database::Database;
use crate::error::{Error, Result};
use crate::identity::Attributes;
use crate::source::Source;
use rusqlite::types::Value;
use rusqlite::Connection;
use std::iter;

/// One table worth of rows.
///
/// Rows may be shorter than the column list; missing trailing cells are
/// NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn with_columns(name: impl Into<String>, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Position of a column, appending it when unknown.
    pub fn column_index(&mut self, column: &str) -> usize {
        match self.columns.iter().position(|c| c == column) {
            Some(index) => index,
            None => {
                self.columns.push(column.to_string());
                self.columns.len() - 1
            }
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }
}

/// An ordered collection of tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSet {
    tables: Vec<Table>,
}

impl DataSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, table: Table) {
        self.tables.push(table);
    }

    /// The table with this name, created at the end when missing.
    pub fn table_mut(&mut self, name: &str) -> &mut Table {
        let index = match self.tables.iter().position(|t| t.name == name) {
            Some(index) => index,
            None => {
                self.tables.push(Table::new(name));
                self.tables.len() - 1
            }
        };
        &mut self.tables[index]
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

/// Quote an identifier for SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a table name, splitting `schema.table` when names are qualified.
pub fn quote_table(name: &str, qualified: bool) -> String {
    match name.split_once('.') {
        Some((schema, table)) if qualified => {
            format!("{}.{}", quote_identifier(schema), quote_identifier(table))
        }
        _ => quote_identifier(name),
    }
}

/// Insert every row of a data set in one transaction.
///
/// Returns the number of rows inserted. Nothing is kept when any row fails.
pub fn insert(connection: &mut Connection, data_set: &DataSet, qualified: bool) -> rusqlite::Result<usize> {
    let transaction = connection.transaction()?;
    let mut inserted = 0;

    for table in data_set.tables() {
        if table.columns.is_empty() || table.rows.is_empty() {
            continue;
        }
        let columns: Vec<String> = table.columns.iter().map(|c| quote_identifier(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_table(&table.name, qualified),
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut statement = transaction.prepare(&sql)?;
        for row in &table.rows {
            let cells = row
                .iter()
                .chain(iter::repeat(&Value::Null))
                .take(columns.len());
            statement.execute(rusqlite::params_from_iter(cells))?;
            inserted += 1;
        }
    }

    transaction.commit()?;
    Ok(inserted)
}

/// Insert a parsed data set through the relational capability of `database`.
pub fn apply(database: &dyn Database, source: &Source, data_set: &DataSet) -> Result<usize> {
    let sql = database.as_sql().ok_or_else(|| Error::Unsupported {
        database: database.config().name().to_string(),
        capability: "relational data sets",
    })?;
    let mut connection = sql.connection(&Attributes::new())?;
    let qualified = source.qualified_table_names().unwrap_or(false);
    tracing::debug!(
        source = source.locator(),
        tables = data_set.tables().len(),
        rows = data_set.row_count(),
        "inserting data set"
    );
    insert(&mut connection, data_set, qualified).map_err(|e| Error::processing(source.locator(), e))
}
