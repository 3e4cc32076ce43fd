use anyhow::Result;
use rusqlite::params;

use crate::config::TesseraConfig;
use crate::db::Store;

/// One row of the per-method request summary.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodStats {
    pub method: String,
    pub requests: i64,
    pub failures: i64,
    pub avg_elapsed_ms: f64,
}

/// Summarize persisted request events, optionally for one project.
pub fn summarize(store: &Store, project_id: Option<&str>) -> rusqlite::Result<Vec<MethodStats>> {
    let conn = store.conn();
    let mut stmt = conn.prepare(
        "SELECT method, COUNT(*), SUM(ok = 0), AVG(elapsed_us) FROM request_log \
         WHERE ?1 IS NULL OR project_id = ?1 \
         GROUP BY method ORDER BY COUNT(*) DESC, method ASC",
    )?;
    let rows = stmt
        .query_map(params![project_id], |row| {
            Ok(MethodStats {
                method: row.get(0)?,
                requests: row.get(1)?,
                failures: row.get(2)?,
                avg_elapsed_ms: row.get::<_, f64>(3)? / 1000.0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Display request statistics in the terminal.
pub fn stats(config: &TesseraConfig, slug: Option<&str>) -> Result<()> {
    let store = super::open_store(config)?;
    let project = slug.map(|s| super::require_project(&store, s)).transpose()?;
    let rows = summarize(&store, project.as_ref().map(|p| p.id.as_str()))?;

    println!("Request Statistics");
    println!("{}", "=".repeat(40));
    if let Some(ref p) = project {
        println!("  Project: {}", p.slug);
        println!();
    }
    if rows.is_empty() {
        println!("  No requests recorded.");
        return Ok(());
    }
    println!("  {:<16} {:>8} {:>8} {:>10}", "METHOD", "COUNT", "FAILED", "AVG MS");
    for r in &rows {
        println!(
            "  {:<16} {:>8} {:>8} {:>10.2}",
            r.method, r.requests, r.failures, r.avg_elapsed_ms
        );
    }
    Ok(())
}
