//! Source descriptors: one script or data set to load, plus loading hints.

use std::fmt;

/// Prefix marking a locator that is resolved from the classpath rather than
/// the filesystem.
pub const CLASSPATH_PREFIX: &str = "classpath:";

/// Stand-in reported for a blank locator.
pub const EMPTY_LOCATOR: &str = "<empty>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Script,
    DataSet,
}

/// A reference to one script or data file.
///
/// The locator is either a filesystem path or a `classpath:` resource name.
/// Nothing here checks that the target exists; that is up to the loaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    locator: String,
    qualified_table_names: Option<bool>,
    kind: Kind,
}

impl Source {
    /// Create a source with no loading hints.
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            qualified_table_names: None,
            kind: Kind::DataSet,
        }
    }

    /// Create a source for a script.
    pub fn script(locator: impl Into<String>) -> Self {
        Self {
            kind: Kind::Script,
            ..Self::new(locator)
        }
    }

    /// Create a source for a data set, optionally forcing schema-qualified
    /// table names.
    pub fn data_set(locator: impl Into<String>, qualified_table_names: Option<bool>) -> Self {
        Self {
            qualified_table_names,
            ..Self::new(locator)
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// `true` iff the locator is blank. No loader is asked about such a source.
    pub fn is_empty(&self) -> bool {
        self.locator.trim().is_empty()
    }

    /// Whether table names in the data set carry a schema prefix.
    ///
    /// `None` leaves the decision to the loader's default.
    pub fn qualified_table_names(&self) -> Option<bool> {
        self.qualified_table_names
    }

    /// Replace the locator. Only meant for binding configuration.
    pub fn set_locator(&mut self, locator: impl Into<String>) {
        self.locator = locator.into();
    }

    pub fn set_qualified_table_names(&mut self, flag: Option<bool>) {
        self.qualified_table_names = flag;
    }

    /// `true` iff the locator starts with `classpath:`.
    pub fn is_classpath(&self) -> bool {
        self.locator.starts_with(CLASSPATH_PREFIX)
    }

    /// The resource name of a classpath locator (the text after the prefix).
    pub fn resource_name(&self) -> Option<&str> {
        self.locator.strip_prefix(CLASSPATH_PREFIX)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Script => write!(f, "Script[{}]", self.locator),
            Kind::DataSet => write!(f, "DataSet[{}]", self.locator),
        }
    }
}
