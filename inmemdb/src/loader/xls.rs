//! Spreadsheet data set loader.

use super::dataset::{self, DataSet, Table};
use super::{read_source_bytes, Loader};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::source::Source;
use async_trait::async_trait;
use calamine::{Data, Range, Reader, Xls};
use rusqlite::types::Value;
use std::io::Cursor;

/// Loads `.xls` workbooks. Each worksheet fills the table it is named after,
/// with column names taken from its first row.
#[derive(Debug, Default, Clone, Copy)]
pub struct XlsLoader;

#[async_trait]
impl Loader for XlsLoader {
    fn extension(&self) -> &str {
        ".xls"
    }

    fn name(&self) -> &str {
        "xls"
    }

    async fn load(&self, database: &dyn Database, source: &Source) -> Result<usize> {
        let bytes = read_source_bytes(source, database.config().classpath()).await?;
        let data_set = parse_workbook(bytes).map_err(|e| Error::processing(source.locator(), e))?;
        dataset::apply(database, source, &data_set)
    }
}

/// Read every worksheet of a workbook.
pub fn parse_workbook(bytes: Vec<u8>) -> std::result::Result<DataSet, calamine::XlsError> {
    let mut workbook: Xls<_> = Xls::new(Cursor::new(bytes))?;
    let mut data_set = DataSet::new();
    for name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&name)?;
        data_set.push(sheet_table(&name, &range));
    }
    Ok(data_set)
}

/// Convert one worksheet. Header cells after the first blank one are ignored.
pub fn sheet_table(name: &str, range: &Range<Data>) -> Table {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Table::new(name);
    };

    let columns: Vec<String> = header
        .iter()
        .map(|cell| cell.to_string().trim().to_string())
        .take_while(|column| !column.is_empty())
        .collect();
    let width = columns.len();

    let mut table = Table::with_columns(name, columns);
    for row in rows {
        if row.iter().all(|cell| matches!(cell, Data::Empty)) {
            continue;
        }
        table.push_row(row.iter().take(width).map(cell_value).collect());
    }
    table
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(i) => Value::Integer(*i),
        Data::Float(f) => Value::Real(*f),
        Data::Bool(b) => Value::Integer(i64::from(*b)),
        Data::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}
