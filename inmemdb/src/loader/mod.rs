//! Content loaders.
//!
//! A `Loader` recognises one content format by its file extension (and
//! optionally by inspecting the content) and applies it to a running
//! database. Every database owns a [`LoaderRegistry`], an ordered list of
//! loaders tried in turn until one claims the source.
//!
//! Built-in loaders:
//! - `XmlDataSetLoader` - `.dbunit.xml` structured data sets (behind `xml`)
//! - `FlatXmlDataSetLoader` - `.xml` flat data sets (behind `xml`)
//! - `CsvLoader` - `.csv` tables named after the file
//! - `XlsLoader` - `.xls` workbooks, one sheet per table (behind `xls`)
//! - `SqlLoader` - `.sql` scripts
//! - `JsonLoader` - `.json` streams of documents

pub mod csv;
pub mod dataset;
pub mod json;
pub mod sql;

#[cfg(feature = "xls")]
pub mod xls;

#[cfg(feature = "xml")]
pub mod xml;

use crate::classpath::{self, Classpath};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::source::{Source, EMPTY_LOCATOR};
use async_trait::async_trait;
use std::path::Path;

/// A strategy that recognises and applies one content format.
///
/// # Implementing a Loader
///
/// ```ignore
/// use inmemdb::loader::Loader;
/// use inmemdb::{Database, Result, Source};
/// use async_trait::async_trait;
///
/// struct NoopLoader;
///
/// #[async_trait]
/// impl Loader for NoopLoader {
///     fn extension(&self) -> &str {
///         ".noop"
///     }
///
///     fn name(&self) -> &str {
///         "noop"
///     }
///
///     async fn load(&self, _database: &dyn Database, _source: &Source) -> Result<usize> {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait Loader: Send + Sync {
    /// The file extension this loader claims, lowercase and with the leading
    /// dot (e.g. `".dbunit.xml"`).
    fn extension(&self) -> &str;

    /// Human-readable name for log messages.
    fn name(&self) -> &str;

    /// Inspect the content of a source whose extension already matched.
    ///
    /// Returning `false` lets a more permissive loader further down the
    /// registry claim the source instead.
    async fn has_valid_content(&self, _source: &Source, _classpath: &Classpath) -> bool {
        true
    }

    /// Decide whether this loader applies to `source`.
    ///
    /// Checks run cheapest first and stop at the first failure: extension,
    /// then existence as a regular file (filesystem locators only), then
    /// content.
    async fn is_supported(&self, source: Option<&Source>, classpath: &Classpath) -> bool {
        let Some(source) = source else {
            return false;
        };
        if !extension_matches(source.locator(), self.extension()) {
            return false;
        }
        if !source.is_classpath() && !classpath::is_file(Path::new(source.locator())).await {
            return false;
        }
        self.has_valid_content(source, classpath).await
    }

    /// Apply the source to the database.
    ///
    /// Returns the number of rows, statements or documents applied. Every
    /// file and connection opened here is released before returning.
    async fn load(&self, database: &dyn Database, source: &Source) -> Result<usize>;
}

/// Case-insensitive suffix match of a locator against an extension.
pub fn extension_matches(locator: &str, extension: &str) -> bool {
    locator.to_lowercase().ends_with(&extension.to_lowercase())
}

/// Derive a table or collection name from a source locator.
///
/// Strips the extension and keeps the text after the last path separator.
/// For classpath locators the `classpath:` prefix is never part of the name.
pub fn table_name(source: &Source, extension: &str) -> String {
    let path = source.resource_name().unwrap_or(source.locator());
    let stem = if extension_matches(path, extension) {
        let end = path.len().saturating_sub(extension.len());
        path.get(..end).unwrap_or(path)
    } else {
        path
    };
    match stem.rfind(|c| c == '/' || c == '\\') {
        Some(slash) => stem[slash + 1..].to_string(),
        None => stem.to_string(),
    }
}

/// Read a source as text, naming it in any error.
pub async fn read_source(source: &Source, classpath: &Classpath) -> Result<String> {
    classpath
        .read_to_string(source)
        .await
        .map_err(|e| Error::CannotReadSource {
            locator: source.locator().to_string(),
            source: e,
        })
}

/// Read a source as raw bytes, naming it in any error.
pub async fn read_source_bytes(source: &Source, classpath: &Classpath) -> Result<Vec<u8>> {
    classpath
        .read(source)
        .await
        .map_err(|e| Error::CannotReadSource {
            locator: source.locator().to_string(),
            source: e,
        })
}

/// An ordered list of loaders. The first loader that claims a source wins.
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn Loader>>,
}

impl LoaderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The loaders used by relational databases: structured XML, flat XML,
    /// CSV, spreadsheet and SQL, in that order.
    pub fn relational() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "xml")]
        {
            registry.push(xml::XmlDataSetLoader);
            registry.push(xml::FlatXmlDataSetLoader);
        }
        registry.push(csv::CsvLoader::default());
        #[cfg(feature = "xls")]
        registry.push(xls::XlsLoader);
        registry.push(sql::SqlLoader);
        registry
    }

    /// The loaders used by document and graph databases.
    pub fn documents() -> Self {
        Self::new().with_loader(json::JsonLoader)
    }

    /// Builder-style [`push`](Self::push).
    pub fn with_loader<L: Loader + 'static>(mut self, loader: L) -> Self {
        self.push(loader);
        self
    }

    /// Append a loader, consulted after all existing ones.
    pub fn push<L: Loader + 'static>(&mut self, loader: L) {
        self.loaders.push(Box::new(loader));
    }

    /// Insert a loader at `index`, ahead of the loaders after it.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert<L: Loader + 'static>(&mut self, index: usize, loader: L) {
        self.loaders.insert(index, Box::new(loader));
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    /// Names of the loaders, in dispatch order.
    pub fn names(&self) -> Vec<&str> {
        self.loaders.iter().map(|l| l.name()).collect()
    }

    /// Find the first loader that claims the source.
    pub async fn find(&self, source: Option<&Source>, classpath: &Classpath) -> Option<&dyn Loader> {
        for loader in &self.loaders {
            if loader.is_supported(source, classpath).await {
                return Some(loader.as_ref());
            }
        }
        None
    }

    /// Load a source into `database` using the first loader that claims it.
    ///
    /// Never fails: a missing source, an unclaimed source or a failing
    /// loader are all reported through `logger`.
    pub async fn load(&self, database: &dyn Database, logger: &dyn Logger, source: Option<&Source>) {
        let Some(source) = source else {
            logger.log_error(&Error::UnsupportedFileType("null".to_string()));
            return;
        };

        if source.is_empty() {
            logger.log_error(&Error::UnsupportedFileType(EMPTY_LOCATOR.to_string()));
            return;
        }

        let classpath = database.config().classpath();
        let Some(loader) = self.find(Some(source), classpath).await else {
            logger.log_error(&Error::UnsupportedFileType(source.locator().to_string()));
            return;
        };

        tracing::debug!(loader = loader.name(), source = source.locator(), "dispatching source");
        match loader.load(database, source).await {
            Ok(count) => logger.log_info(&format!(
                "Loaded {} using the {} loader ({} applied)",
                source.locator(),
                loader.name(),
                count
            )),
            Err(e) => logger.log_error(&e.with_locator(source.locator())),
        }
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("loaders", &self.names())
            .finish()
    }
}
