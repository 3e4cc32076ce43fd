//! Projects are the tenancy boundary: every record and plan belongs to exactly one.
//!
//! Transports resolve the path-level slug with [`resolve`] before handing a message
//! to the router; an unknown slug never reaches JSON-RPC handling.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::db::{self, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("invalid project slug {0:?}: use 1-64 lowercase letters, digits or '-'")]
    InvalidSlug(String),
    #[error("project name must not be empty")]
    EmptyName,
    #[error("project already exists: {0}")]
    Exists(String),
    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}

pub fn valid_slug(slug: &str) -> bool {
    (1..=64).contains(&slug.len())
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Create a project with a unique slug.
pub fn create(store: &Store, slug: &str, name: &str) -> Result<Project, ProjectError> {
    if !valid_slug(slug) {
        return Err(ProjectError::InvalidSlug(slug.to_string()));
    }
    if name.trim().is_empty() {
        return Err(ProjectError::EmptyName);
    }

    let conn = store.conn();
    if find_by_slug(&conn, slug)?.is_some() {
        return Err(ProjectError::Exists(slug.to_string()));
    }

    let project = Project {
        id: uuid::Uuid::now_v7().to_string(),
        slug: slug.to_string(),
        name: name.trim().to_string(),
        created_at: db::now(),
    };
    conn.execute(
        "INSERT INTO projects (id, slug, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![project.id, project.slug, project.name, project.created_at],
    )?;

    tracing::info!(id = %project.id, slug = %project.slug, "project created");
    Ok(project)
}

/// Tenant resolver: the project addressed by `slug`, if any.
pub fn resolve(store: &Store, slug: &str) -> Result<Option<Project>, ProjectError> {
    let conn = store.conn();
    Ok(find_by_slug(&conn, slug)?)
}

pub fn list(store: &Store) -> Result<Vec<Project>, ProjectError> {
    let conn = store.conn();
    let mut stmt =
        conn.prepare("SELECT id, slug, name, created_at FROM projects ORDER BY slug")?;
    let projects = stmt
        .query_map([], row_to_project)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(projects)
}

fn find_by_slug(conn: &Connection, slug: &str) -> rusqlite::Result<Option<Project>> {
    conn.query_row(
        "SELECT id, slug, name, created_at FROM projects WHERE slug = ?1",
        params![slug],
        row_to_project,
    )
    .optional()
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}
