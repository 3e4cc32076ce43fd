//! Append-only agent memory: insights, decisions and context snapshots.
//!
//! Records are never edited. Writing with an existing `thread_id` appends a revision;
//! writing without one starts a new thread. See [`store`] for the write and read paths.

pub mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::thread::ThreadKind;

pub use store::{history, latest, list_latest, search, store_record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Something learned while working; short free text.
    Insight,
    /// A choice that was made, with its rationale.
    Decision,
    /// A snapshot of working context to resume from later.
    Context,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insight => "insight",
            Self::Decision => "decision",
            Self::Context => "context",
        }
    }

    pub fn thread_kind(&self) -> ThreadKind {
        match self {
            Self::Insight => ThreadKind::Insight,
            Self::Decision => ThreadKind::Decision,
            Self::Context => ThreadKind::Context,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insight" => Ok(Self::Insight),
            "decision" => Ok(Self::Decision),
            "context" => Ok(Self::Context),
            _ => Err(format!("unknown record kind: {s}")),
        }
    }
}

/// One stored revision, matching the `records` table.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub id: String,
    /// Store insertion sequence; breaks ties between revisions with equal timestamps.
    pub seq: i64,
    pub project_id: String,
    pub kind: RecordKind,
    pub thread_id: String,
    pub title: Option<String>,
    pub body: String,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    pub created_by: Option<String>,
    pub created_at: String,
}

/// Input to [`store_record`].
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub kind: RecordKind,
    /// Thread to append a revision to; `None` starts a new thread.
    pub thread_id: Option<String>,
    pub title: Option<String>,
    pub body: String,
    pub tags: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_by: Option<String>,
}

impl NewRecord {
    pub fn new(kind: RecordKind, body: impl Into<String>) -> Self {
        Self {
            kind,
            thread_id: None,
            title: None,
            body: body.into(),
            tags: Vec::new(),
            metadata: None,
            created_by: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{0}")]
    Validation(String),
    #[error("unknown thread: {0}")]
    UnknownThread(String),
    #[error(transparent)]
    Store(#[from] rusqlite::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}
