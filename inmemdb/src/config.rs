//! Database configuration.
//!
//! `DatabaseConfig` holds the typed settings every backend understands. The
//! generic [`configure`](DatabaseConfig::configure) entry point maps string
//! keys onto those fields so that callers driven by key/value settings (a
//! manifest, environment variables) keep working when new keys appear.

use crate::classpath::Classpath;
use crate::error::{Error, Result};
use crate::identity::Attributes;
use std::path::{Path, PathBuf};

/// Default user name, matching what the embedded engines expect.
pub const DEFAULT_USERNAME: &str = "sa";

/// Prefix for passthrough attribute keys, e.g. `attribute.foreign_keys`.
pub const ATTRIBUTE_PREFIX: &str = "attribute.";

/// Settings shared by every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    name: String,
    username: String,
    password: String,
    port: Option<u16>,
    attributes: Attributes,
    classpath: Classpath,
    directory: Option<PathBuf>,
}

impl DatabaseConfig {
    /// Create a config for the named database with default credentials.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key, value);
        self
    }

    pub fn with_classpath(mut self, classpath: Classpath) -> Self {
        self.classpath = classpath;
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Apply one key/value setting.
    ///
    /// Returns `Ok(true)` when the key was recognised and `Ok(false)` when it
    /// was ignored. Only values that cannot be interpreted are errors.
    pub fn configure(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "database" => self.name = value.to_string(),
            "username" => self.username = value.to_string(),
            "password" => self.password = value.to_string(),
            "port" => {
                let port = value.trim().parse::<u16>().map_err(|_| Error::InvalidConfig {
                    key: key.to_string(),
                    value: value.to_string(),
                })?;
                self.port = Some(port);
            }
            "classpath" => {
                self.classpath = Classpath::new(
                    std::env::split_paths(value).filter(|p| !p.as_os_str().is_empty()),
                );
            }
            "directory" => self.directory = Some(PathBuf::from(value)),
            _ => match key.strip_prefix(ATTRIBUTE_PREFIX) {
                Some(attribute) if !attribute.is_empty() => self.attributes.insert(attribute, value),
                _ => return Ok(false),
            },
        }
        Ok(true)
    }

    /// Check the settings that must be present before a backend starts.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig {
                key: "database".to_string(),
                value: self.name.clone(),
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password; empty when none was configured.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// The configured port, if any.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The configured port, or the backend's well-known default.
    pub fn effective_port(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn classpath(&self) -> &Classpath {
        &self.classpath
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            username: DEFAULT_USERNAME.to_string(),
            password: String::new(),
            port: None,
            attributes: Attributes::new(),
            classpath: Classpath::default(),
            directory: None,
        }
    }
}
