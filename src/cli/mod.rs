//! Operator commands that run against the database directly, without a server.

pub mod plans;
pub mod projects;
pub mod stats;

use anyhow::Result;

use crate::config::TesseraConfig;
use crate::db::Store;

fn open_store(config: &TesseraConfig) -> Result<Store> {
    Store::open(config.resolved_db_path())
}

/// Resolve a slug to its project or fail with a hint.
fn require_project(store: &Store, slug: &str) -> Result<crate::projects::Project> {
    crate::projects::resolve(store, slug)?
        .ok_or_else(|| anyhow::anyhow!("unknown project: {slug} (see `tessera project list`)"))
}
