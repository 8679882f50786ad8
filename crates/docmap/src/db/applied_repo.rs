//! Codes already written to a target document by a job's apply attempts.

use rusqlite::{params, Connection};

use super::{Database, DatabaseError};

/// Records a written code. Recording the same code twice is a no-op.
pub fn insert(conn: &Connection, job_id: &str, category: &str, item: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO applied_codes (job_id, category, item) VALUES (?1, ?2, ?3)",
        params![job_id, category, item],
    )?;
    Ok(())
}

/// Lists `(category, item)` pairs recorded for a job.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<(String, String)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT category, item FROM applied_codes WHERE job_id = ?1 ORDER BY category, item",
        )?;
        let rows = stmt
            .query_map(params![job_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
