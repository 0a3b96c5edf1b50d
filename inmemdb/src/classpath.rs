//! Resolution of `classpath:` resources across a list of resource roots.

use crate::source::Source;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Environment variable holding extra resource roots, in the platform's
/// path-list syntax.
pub const CLASSPATH_ENV: &str = "INMEMDB_CLASSPATH";

/// An ordered list of directories searched for `classpath:` resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classpath {
    roots: Vec<PathBuf>,
}

impl Classpath {
    /// Create a classpath from explicit roots, searched in order.
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    /// Append a root, searched after the existing ones.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Find the file backing a resource name.
    ///
    /// Returns the first root holding a regular file with that name.
    pub async fn resolve(&self, resource: &str) -> Option<PathBuf> {
        let relative = resource.trim_start_matches('/');
        for root in &self.roots {
            let candidate = root.join(relative);
            if is_file(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    /// Find the file backing a source, classpath or not.
    ///
    /// Bare locators are returned as filesystem paths without checking them.
    pub async fn locate(&self, source: &Source) -> io::Result<PathBuf> {
        match source.resource_name() {
            Some(resource) => self.resolve(resource).await.ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("resource '{}' not found on the classpath", resource),
                )
            }),
            None => Ok(PathBuf::from(source.locator())),
        }
    }

    /// Read the whole of a source into memory.
    pub async fn read(&self, source: &Source) -> io::Result<Vec<u8>> {
        let path = self.locate(source).await?;
        fs::read(&path).await
    }

    /// Read a source as UTF-8 text.
    pub async fn read_to_string(&self, source: &Source) -> io::Result<String> {
        let path = self.locate(source).await?;
        fs::read_to_string(&path).await
    }
}

impl Default for Classpath {
    fn default() -> Self {
        Self::new(default_roots())
    }
}

/// Get the default resource roots.
///
/// Entries of `INMEMDB_CLASSPATH` come first, then `./resources` and the
/// current directory.
pub fn default_roots() -> Vec<PathBuf> {
    default_roots_from(std::env::vars_os())
}

/// Get the default resource roots from an explicit set of variables.
pub fn default_roots_from<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Vec<PathBuf>
where
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let mut roots = Vec::new();

    let extra = vars
        .into_iter()
        .find(|(key, _)| key.as_ref() == CLASSPATH_ENV)
        .map(|(_, value)| value);
    if let Some(extra) = extra {
        let paths = std::env::split_paths(extra.as_ref());
        roots.extend(paths.filter(|p| !p.as_os_str().is_empty()));
    }

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd.join("resources"));
        roots.push(cwd);
    }

    roots
}

/// Whether a path names an existing regular file. Directories never match.
pub async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
