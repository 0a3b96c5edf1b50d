//! Run manifests: which database to launch and what to load into it.
//!
//! A manifest is a TOML file:
//!
//! ```toml
//! type = "sqlite"
//! database = "test"
//! classpath = ["tests/resources"]
//!
//! [attributes]
//! foreign_keys = "ON"
//!
//! [[sources]]
//! script = "classpath:create_database.sql"
//!
//! [[sources]]
//! dataset = "classpath:users.xml"
//! qualified_table_names = true
//! ```
//!
//! Relative `classpath` and `directory` entries are resolved against the
//! directory holding the manifest. Selected settings can be overridden from
//! the environment, see [`Manifest::with_env_overrides`].

use crate::config::{ATTRIBUTE_PREFIX, DEFAULT_USERNAME};
use crate::error::{Error, Result};
use crate::identity::Attributes;
use crate::source::Source;
use std::path::{Path, PathBuf};
use toml_edit::{DocumentMut, Item, Value};

/// Prefix of the environment variables read by
/// [`with_env_overrides`](Manifest::with_env_overrides) by default.
pub const ENV_PREFIX: &str = "INMEMDB";

/// Backend launched when a manifest names none.
pub const DEFAULT_TYPE: &str = "sqlite";

/// Everything needed to launch and seed one database.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub database_type: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub port: Option<u16>,
    pub skip: bool,
    pub fail_fast: bool,
    pub classpath: Vec<PathBuf>,
    pub directory: Option<PathBuf>,
    pub attributes: Attributes,
    pub sources: Vec<Source>,
}

impl Manifest {
    /// A manifest with defaults for everything but the backend and name.
    pub fn new(database_type: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            database_type: database_type.into(),
            database: database.into(),
            username: DEFAULT_USERNAME.to_string(),
            password: String::new(),
            port: None,
            skip: false,
            fail_fast: false,
            classpath: Vec::new(),
            directory: None,
            attributes: Attributes::new(),
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    /// Read and parse a manifest file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::ManifestError {
                path: path.to_path_buf(),
                source: e.into(),
            })?;
        Self::from_toml_str(&text, path)
    }

    /// Parse manifest text. `path` names the manifest in errors and anchors
    /// relative paths.
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self> {
        let fail = |message: String| Error::ManifestError {
            path: path.to_path_buf(),
            source: message.into(),
        };
        let document: DocumentMut = text
            .parse()
            .map_err(|e: toml_edit::TomlError| fail(e.to_string()))?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));

        let mut manifest = Self::new(
            string(&document, "type").map_err(&fail)?.unwrap_or_else(|| DEFAULT_TYPE.to_string()),
            string(&document, "database").map_err(&fail)?.unwrap_or_default(),
        );
        if let Some(username) = string(&document, "username").map_err(&fail)? {
            manifest.username = username;
        }
        if let Some(password) = string(&document, "password").map_err(&fail)? {
            manifest.password = password;
        }
        if let Some(port) = document.get("port") {
            let port = port
                .as_integer()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| fail("port must be an integer between 0 and 65535".to_string()))?;
            manifest.port = Some(port);
        }
        manifest.skip = boolean(&document, "skip").map_err(&fail)?.unwrap_or(false);
        manifest.fail_fast = boolean(&document, "fail_fast").map_err(&fail)?.unwrap_or(false);
        if let Some(directory) = string(&document, "directory").map_err(&fail)? {
            manifest.directory = Some(base.join(directory));
        }

        if let Some(item) = document.get("classpath") {
            let entries = item
                .as_array()
                .ok_or_else(|| fail("classpath must be an array of paths".to_string()))?;
            for entry in entries.iter() {
                let entry = entry
                    .as_str()
                    .ok_or_else(|| fail("classpath entries must be strings".to_string()))?;
                manifest.classpath.push(base.join(entry));
            }
        }

        if let Some(item) = document.get("attributes") {
            let table = item
                .as_table_like()
                .ok_or_else(|| fail("attributes must be a table".to_string()))?;
            for (key, value) in table.iter() {
                let value = value
                    .as_value()
                    .and_then(scalar)
                    .ok_or_else(|| fail(format!("attribute {} must be a string, number or boolean", key)))?;
                manifest.attributes.insert(key, value);
            }
        }

        if let Some(item) = document.get("sources") {
            let sources = item
                .as_array_of_tables()
                .ok_or_else(|| fail("sources must be written as [[sources]] tables".to_string()))?;
            for (index, table) in sources.iter().enumerate() {
                let locator = |key: &str| {
                    table
                        .get(key)
                        .and_then(Item::as_str)
                        .filter(|text| !text.trim().is_empty())
                };
                let script = locator("script");
                let dataset = locator("dataset");
                let qualified = table.get("qualified_table_names").and_then(Item::as_bool);
                let source = match (script, dataset) {
                    (Some(script), None) => Source::script(script),
                    (None, Some(dataset)) => Source::data_set(dataset, qualified),
                    _ => {
                        return Err(fail(format!(
                            "source {} needs exactly one of script or dataset",
                            index + 1
                        )))
                    }
                };
                manifest.sources.push(source);
            }
        }

        Ok(manifest)
    }

    /// Apply overrides from `<PREFIX>_TYPE`, `_DATABASE`, `_USERNAME`,
    /// `_PASSWORD`, `_PORT`, `_SKIP` and `_FAIL_FAST`.
    pub fn with_env_overrides(self, prefix: &str) -> Result<Self> {
        self.apply_overrides(prefix, std::env::vars())
    }

    /// Apply overrides from an explicit set of variables.
    pub fn apply_overrides(
        mut self,
        prefix: &str,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let prefix = format!("{}_", prefix);
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(&prefix) else {
                continue;
            };
            match name.to_lowercase().as_str() {
                "type" => self.database_type = value,
                "database" => self.database = value,
                "username" => self.username = value,
                "password" => self.password = value,
                "port" => {
                    let port = value.trim().parse().map_err(|_| invalid(&key, &value))?;
                    self.port = Some(port);
                }
                "skip" => self.skip = parse_bool(&value).ok_or_else(|| invalid(&key, &value))?,
                "fail_fast" => self.fail_fast = parse_bool(&value).ok_or_else(|| invalid(&key, &value))?,
                _ => tracing::debug!(variable = %key, "ignoring unknown override"),
            }
        }
        Ok(self)
    }

    /// The manifest as key/value settings for [`Database::configure`].
    ///
    /// [`Database::configure`]: crate::database::Database::configure
    pub fn settings(&self) -> Result<Vec<(String, String)>> {
        let mut settings = vec![
            ("database".to_string(), self.database.clone()),
            ("username".to_string(), self.username.clone()),
            ("password".to_string(), self.password.clone()),
        ];
        if let Some(port) = self.port {
            settings.push(("port".to_string(), port.to_string()));
        }
        if !self.classpath.is_empty() {
            let joined = std::env::join_paths(&self.classpath).map_err(|e| Error::InvalidConfig {
                key: "classpath".to_string(),
                value: e.to_string(),
            })?;
            settings.push(("classpath".to_string(), joined.to_string_lossy().into_owned()));
        }
        if let Some(directory) = &self.directory {
            settings.push(("directory".to_string(), directory.to_string_lossy().into_owned()));
        }
        for (key, value) in self.attributes.iter() {
            settings.push((format!("{}{}", ATTRIBUTE_PREFIX, key), value.to_string()));
        }
        Ok(settings)
    }
}

fn string(document: &DocumentMut, key: &str) -> std::result::Result<Option<String>, String> {
    match document.get(key) {
        None => Ok(None),
        Some(item) => item
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| format!("{} must be a string", key)),
    }
}

fn boolean(document: &DocumentMut, key: &str) -> std::result::Result<Option<bool>, String> {
    match document.get(key) {
        None => Ok(None),
        Some(item) => item
            .as_bool()
            .map(Some)
            .ok_or_else(|| format!("{} must be true or false", key)),
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.value().to_string()),
        Value::Integer(i) => Some(i.value().to_string()),
        Value::Float(f) => Some(f.value().to_string()),
        Value::Boolean(b) => Some(b.value().to_string()),
        _ => None,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") || value == "1" {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") || value == "0" {
        Some(false)
    } else {
        None
    }
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        value: value.to_string(),
    }
}
