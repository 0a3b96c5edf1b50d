//! Backend discovery via the `inventory` crate.
//!
//! Each backend module registers its type tags at link time using
//! `inventory::submit!`. [`create_database`] is the single place a tag is
//! turned into a database handle.
//!
//! Downstream crates can add backends by depending on `inmemdb` and
//! submitting their own [`RegisteredBackend`].

use crate::database::Database;
use crate::error::{Error, Result};

/// A backend constructor registered under a type tag.
///
/// Holds a plain function pointer since inventory items must be
/// const-constructible.
pub struct RegisteredBackend {
    pub name: &'static str,
    pub create: fn() -> Box<dyn Database>,
}

inventory::collect!(RegisteredBackend);

/// Create an unconfigured database for a type tag.
pub fn create_database(name: &str) -> Result<Box<dyn Database>> {
    for entry in inventory::iter::<RegisteredBackend> {
        if entry.name == name {
            tracing::debug!(backend = name, "creating database");
            return Ok((entry.create)());
        }
    }
    Err(Error::UnknownDatabaseType(name.to_string()))
}

/// All registered type tags, sorted.
pub fn backend_names() -> Vec<&'static str> {
    let mut names: Vec<_> = inventory::iter::<RegisteredBackend>
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    names.sort_unstable();
    names
}
