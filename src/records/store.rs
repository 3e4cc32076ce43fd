//! Write path and revision queries for records.
//!
//! "Latest" always means the revision with the newest `created_at`, with the store
//! sequence breaking ties so two writes in the same clock tick still resolve
//! deterministically.

use rusqlite::{params, Connection, OptionalExtension};

use super::{NewRecord, Record, RecordError, RecordKind};
use crate::db::{self, Store};

const RECORD_COLUMNS: &str =
    "seq, id, project_id, kind, thread_id, title, body, tags, metadata, created_by, created_at";

/// Latest revision per thread: keeps a row only if no newer revision shares its thread.
const LATEST_ONLY: &str = "NOT EXISTS (
    SELECT 1 FROM records newer
    WHERE newer.project_id = records.project_id
      AND newer.thread_id = records.thread_id
      AND (newer.created_at > records.created_at
           OR (newer.created_at = records.created_at AND newer.seq > records.seq)))";

/// Validate and append a record. Mints a thread id when none is supplied.
pub fn store_record(
    store: &Store,
    project_id: &str,
    record: NewRecord,
) -> Result<Record, RecordError> {
    if record.body.trim().is_empty() {
        return Err(RecordError::Validation(format!(
            "{} content must not be empty",
            record.kind
        )));
    }
    let metadata = match record.metadata {
        None => serde_json::json!({}),
        Some(m) if m.is_object() => m,
        Some(_) => {
            return Err(RecordError::Validation(
                "metadata must be a JSON object".into(),
            ))
        }
    };
    let tags = normalize_tags(record.tags);
    let title = record
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let thread_kind = record.kind.thread_kind();
    let conn = store.conn();

    let thread_id = match record.thread_id {
        Some(thread_id) => {
            if !thread_kind.owns(&thread_id) {
                return Err(RecordError::Validation(format!(
                    "thread_id {thread_id:?} is not a {} thread (expected prefix {})",
                    record.kind,
                    thread_kind.prefix()
                )));
            }
            if !thread_exists(&conn, project_id, &thread_id)? {
                return Err(RecordError::UnknownThread(thread_id));
            }
            thread_id
        }
        None => thread_kind.generate(),
    };

    let id = uuid::Uuid::now_v7().to_string();
    let created_at = db::now();
    conn.execute(
        "INSERT INTO records (id, project_id, kind, thread_id, title, body, tags, metadata, created_by, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            project_id,
            record.kind.as_str(),
            thread_id,
            title,
            record.body,
            serde_json::to_string(&tags)?,
            metadata.to_string(),
            record.created_by,
            created_at,
        ],
    )?;
    let seq = conn.last_insert_rowid();

    tracing::debug!(%id, %thread_id, kind = %record.kind, "record stored");

    Ok(Record {
        id,
        seq,
        project_id: project_id.to_string(),
        kind: record.kind,
        thread_id,
        title,
        body: record.body,
        tags,
        metadata,
        created_by: record.created_by,
        created_at,
    })
}

/// Current revision of a thread.
pub fn latest(
    store: &Store,
    project_id: &str,
    thread_id: &str,
) -> Result<Option<Record>, RecordError> {
    let conn = store.conn();
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records WHERE project_id = ?1 AND thread_id = ?2 \
         ORDER BY created_at DESC, seq DESC LIMIT 1"
    );
    let row = conn
        .query_row(&sql, params![project_id, thread_id], row_to_record)
        .optional()?;
    Ok(row)
}

/// Every revision of a thread, oldest first.
pub fn history(
    store: &Store,
    project_id: &str,
    thread_id: &str,
) -> Result<Vec<Record>, RecordError> {
    let conn = store.conn();
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records WHERE project_id = ?1 AND thread_id = ?2 \
         ORDER BY created_at ASC, seq ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![project_id, thread_id], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Latest revision of each thread of `kind`, newest first.
pub fn list_latest(
    store: &Store,
    project_id: &str,
    kind: RecordKind,
    limit: usize,
) -> Result<Vec<Record>, RecordError> {
    let conn = store.conn();
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records \
         WHERE project_id = ?1 AND kind = ?2 AND {LATEST_ONLY} \
         ORDER BY created_at DESC, seq DESC LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![project_id, kind.as_str(), limit as i64], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Substring match over the title and body of current revisions. Unranked.
pub fn search(
    store: &Store,
    project_id: &str,
    query: &str,
    kind: Option<RecordKind>,
    limit: usize,
) -> Result<Vec<Record>, RecordError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(RecordError::Validation("query must not be empty".into()));
    }
    let pattern = format!("%{}%", escape_like(query));

    let conn = store.conn();
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records \
         WHERE project_id = ?1 AND (?2 IS NULL OR kind = ?2) AND {LATEST_ONLY} \
           AND (body LIKE ?3 ESCAPE '\\' OR title LIKE ?3 ESCAPE '\\') \
         ORDER BY created_at DESC, seq DESC LIMIT ?4"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![project_id, kind.map(|k| k.as_str()), pattern, limit as i64],
            row_to_record,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn thread_exists(conn: &Connection, project_id: &str, thread_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM records WHERE project_id = ?1 AND thread_id = ?2",
        params![project_id, thread_id],
        |row| row.get(0),
    )
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let kind: String = row.get(3)?;
    let tags: String = row.get(7)?;
    let metadata: String = row.get(8)?;
    Ok(Record {
        seq: row.get(0)?,
        id: row.get(1)?,
        project_id: row.get(2)?,
        kind: kind.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?,
        thread_id: row.get(4)?,
        title: row.get(5)?,
        body: row.get(6)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| serde_json::json!({})),
        created_by: row.get(9)?,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projects;

    fn setup() -> (Store, String) {
        let store = Store::in_memory().unwrap();
        let project = projects::create(&store, "test", "Test").unwrap();
        (store, project.id)
    }

    #[test]
    fn new_record_mints_thread_with_kind_prefix() {
        let (store, pid) = setup();
        let rec = store_record(&store, &pid, NewRecord::new(RecordKind::Decision, "Use SQLite")).unwrap();
        assert!(rec.thread_id.starts_with("dthr_"));
        assert!(crate::thread::valid(&rec.thread_id));
    }

    #[test]
    fn blank_body_rejected() {
        let (store, pid) = setup();
        let err = store_record(&store, &pid, NewRecord::new(RecordKind::Insight, "   ")).unwrap_err();
        assert!(matches!(err, RecordError::Validation(_)));
    }

    #[test]
    fn metadata_must_be_object() {
        let (store, pid) = setup();
        let mut rec = NewRecord::new(RecordKind::Insight, "x");
        rec.metadata = Some(serde_json::json!([1, 2]));
        assert!(matches!(
            store_record(&store, &pid, rec),
            Err(RecordError::Validation(_))
        ));
    }

    #[test]
    fn tags_are_normalized() {
        let (store, pid) = setup();
        let mut rec = NewRecord::new(RecordKind::Insight, "x");
        rec.tags = vec!["Rust".into(), " rust ".into(), "".into(), "db".into()];
        let stored = store_record(&store, &pid, rec).unwrap();
        assert_eq!(stored.tags, vec!["rust", "db"]);
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn search_treats_percent_literally() {
        let (store, pid) = setup();
        store_record(&store, &pid, NewRecord::new(RecordKind::Insight, "cache hit rate is 90%")).unwrap();
        store_record(&store, &pid, NewRecord::new(RecordKind::Insight, "cache hit rate is 90 percent")).unwrap();

        let hits = search(&store, &pid, "90%", None, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].body.ends_with('%'));
    }
}
