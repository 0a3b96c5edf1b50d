//! XML data set loaders.
//!
//! Two layouts are understood. The structured layout (`.dbunit.xml`) lists
//! columns explicitly and marks NULL cells with `<null/>`:
//!
//! ```xml
//! <dataset>
//!   <table name="users">
//!     <column>id</column>
//!     <column>name</column>
//!     <row><value>1</value><value>Alice</value></row>
//!     <row><value>2</value><null/></row>
//!   </table>
//! </dataset>
//! ```
//!
//! The flat layout (`.xml`) uses one element per row, named after the table,
//! with one attribute per non-NULL cell:
//!
//! ```xml
//! <dataset>
//!   <users id="1" name="Alice"/>
//!   <users id="2"/>
//! </dataset>
//! ```

use super::dataset::{self, DataSet, Table};
use super::{read_source, Loader};
use crate::classpath::Classpath;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::source::Source;
use async_trait::async_trait;
use roxmltree::{Document, Node, ParsingOptions};
use rusqlite::types::Value;

fn parse_document(text: &str) -> std::result::Result<Document<'_>, roxmltree::Error> {
    // Data sets commonly carry a DOCTYPE pointing at their DTD.
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(text, options)
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(Node::is_element)
}

fn element_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect()
}

/// Parse the structured layout.
pub fn parse_structured(text: &str) -> std::result::Result<DataSet, String> {
    let document = parse_document(text).map_err(|e| e.to_string())?;
    let root = document.root_element();
    if root.tag_name().name() != "dataset" {
        return Err(format!("expected <dataset>, found <{}>", root.tag_name().name()));
    }

    let mut data_set = DataSet::new();
    for table_node in elements(root) {
        if table_node.tag_name().name() != "table" {
            return Err(format!("unexpected <{}> in <dataset>", table_node.tag_name().name()));
        }
        let name = table_node
            .attribute("name")
            .ok_or_else(|| "<table> without a name attribute".to_string())?;

        let mut table = Table::new(name);
        for child in elements(table_node) {
            match child.tag_name().name() {
                "column" => {
                    table.column_index(element_text(child).trim());
                }
                "row" => {
                    let row = elements(child)
                        .map(|cell| match cell.tag_name().name() {
                            "value" => Ok(Value::Text(element_text(cell))),
                            "null" => Ok(Value::Null),
                            other => Err(format!("unexpected <{}> in <row>", other)),
                        })
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    if row.len() > table.columns().len() {
                        return Err(format!("row in table {} has more values than columns", name));
                    }
                    table.push_row(row);
                }
                other => return Err(format!("unexpected <{}> in <table>", other)),
            }
        }
        data_set.push(table);
    }
    Ok(data_set)
}

/// Parse the flat layout.
///
/// Columns are the union of the attributes seen for a table, in order of
/// first appearance. An element without attributes only declares its table.
pub fn parse_flat(text: &str) -> std::result::Result<DataSet, String> {
    let document = parse_document(text).map_err(|e| e.to_string())?;
    let mut data_set = DataSet::new();

    for row_node in elements(document.root_element()) {
        let table = data_set.table_mut(row_node.tag_name().name());
        if row_node.attributes().next().is_none() {
            continue;
        }
        let mut row = vec![Value::Null; table.columns().len()];
        for attribute in row_node.attributes() {
            let index = table.column_index(attribute.name());
            if index >= row.len() {
                row.resize(index + 1, Value::Null);
            }
            row[index] = Value::Text(attribute.value().to_string());
        }
        table.push_row(row);
    }
    Ok(data_set)
}

/// Loads structured `.dbunit.xml` data sets.
///
/// Content that does not follow the structured layout is left for the flat
/// loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlDataSetLoader;

#[async_trait]
impl Loader for XmlDataSetLoader {
    fn extension(&self) -> &str {
        ".dbunit.xml"
    }

    fn name(&self) -> &str {
        "dbunit-xml"
    }

    async fn has_valid_content(&self, source: &Source, classpath: &Classpath) -> bool {
        match read_source(source, classpath).await {
            Ok(text) => parse_structured(&text).is_ok(),
            Err(_) => false,
        }
    }

    async fn load(&self, database: &dyn Database, source: &Source) -> Result<usize> {
        let text = read_source(source, database.config().classpath()).await?;
        let data_set = parse_structured(&text).map_err(|e| Error::processing(source.locator(), e))?;
        dataset::apply(database, source, &data_set)
    }
}

/// Loads flat `.xml` data sets.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatXmlDataSetLoader;

#[async_trait]
impl Loader for FlatXmlDataSetLoader {
    fn extension(&self) -> &str {
        ".xml"
    }

    fn name(&self) -> &str {
        "flat-xml"
    }

    async fn load(&self, database: &dyn Database, source: &Source) -> Result<usize> {
        let text = read_source(source, database.config().classpath()).await?;
        let data_set = parse_flat(&text).map_err(|e| Error::processing(source.locator(), e))?;
        dataset::apply(database, source, &data_set)
    }
}
