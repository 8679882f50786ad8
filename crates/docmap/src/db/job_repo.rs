//! Job repository for the `import_jobs` table.

use rusqlite::{params, Connection, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub target_document_id: String,
    pub filename: String,
    pub byte_size: i64,
    pub media_type: String,
    pub state: String,
    pub stage: String,
    pub description: String,
    pub total_sections: Option<u32>,
    pub sections_processed: u32,
    pub mapped_count: u32,
    pub unmapped_count: u32,
    pub failed_count: u32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub external_ref: Option<String>,
    pub created_at: String,
    pub stage_entered_at: String,
    pub completed_at: Option<String>,
    pub review_ready_at: Option<String>,
    pub applied_at: Option<String>,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            target_document_id: row.get("target_document_id")?,
            filename: row.get("filename")?,
            byte_size: row.get("byte_size")?,
            media_type: row.get("media_type")?,
            state: row.get("state")?,
            stage: row.get("stage")?,
            description: row.get("description")?,
            total_sections: row.get("total_sections")?,
            sections_processed: row.get("sections_processed")?,
            mapped_count: row.get("mapped_count")?,
            unmapped_count: row.get("unmapped_count")?,
            failed_count: row.get("failed_count")?,
            error_code: row.get("error_code")?,
            error_message: row.get("error_message")?,
            external_ref: row.get("external_ref")?,
            created_at: row.get("created_at")?,
            stage_entered_at: row.get("stage_entered_at")?,
            completed_at: row.get("completed_at")?,
            review_ready_at: row.get("review_ready_at")?,
            applied_at: row.get("applied_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a job row, or overwrites every field except `id` and `created_at`.
pub fn upsert(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO import_jobs (id, target_document_id, filename, byte_size, media_type,
         state, stage, description, total_sections, sections_processed, mapped_count,
         unmapped_count, failed_count, error_code, error_message, external_ref, created_at,
         stage_entered_at, completed_at, review_ready_at, applied_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
         ?18, ?19, ?20, ?21, ?22)
         ON CONFLICT(id) DO UPDATE SET
            target_document_id=excluded.target_document_id,
            filename=excluded.filename,
            byte_size=excluded.byte_size,
            media_type=excluded.media_type,
            state=excluded.state,
            stage=excluded.stage,
            description=excluded.description,
            total_sections=excluded.total_sections,
            sections_processed=excluded.sections_processed,
            mapped_count=excluded.mapped_count,
            unmapped_count=excluded.unmapped_count,
            failed_count=excluded.failed_count,
            error_code=excluded.error_code,
            error_message=excluded.error_message,
            external_ref=excluded.external_ref,
            stage_entered_at=excluded.stage_entered_at,
            completed_at=excluded.completed_at,
            review_ready_at=excluded.review_ready_at,
            applied_at=excluded.applied_at,
            updated_at=excluded.updated_at",
        params![
            job.id,
            job.target_document_id,
            job.filename,
            job.byte_size,
            job.media_type,
            job.state,
            job.stage,
            job.description,
            job.total_sections,
            job.sections_processed,
            job.mapped_count,
            job.unmapped_count,
            job.failed_count,
            job.error_code,
            job.error_message,
            job.external_ref,
            job.created_at,
            job.stage_entered_at,
            job.completed_at,
            job.review_ready_at,
            job.applied_at,
            job.updated_at,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM import_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists every job, newest first.
pub fn list_all(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM import_jobs ORDER BY created_at DESC")?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists the jobs of one target document, newest first.
pub fn list_for_target(db: &Database, target_document_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM import_jobs WHERE target_document_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![target_document_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_job(id: &str, target: &str, created_at: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            target_document_id: target.to_string(),
            filename: "report.pdf".to_string(),
            byte_size: 2048,
            media_type: "application/pdf".to_string(),
            state: "pending".to_string(),
            stage: "queued".to_string(),
            description: "Queued".to_string(),
            total_sections: None,
            sections_processed: 0,
            mapped_count: 0,
            unmapped_count: 0,
            failed_count: 0,
            error_code: None,
            error_message: None,
            external_ref: None,
            created_at: created_at.to_string(),
            stage_entered_at: created_at.to_string(),
            completed_at: None,
            review_ready_at: None,
            applied_at: None,
            updated_at: created_at.to_string(),
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let db = test_db();
        let job = sample_job("j1", "doc-1", "2026-01-01T00:00:00Z");
        db.with_conn(|conn| upsert(conn, &job)).unwrap();

        let found = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(found, job);
        assert!(find_by_id(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_overwrites_but_keeps_created_at() {
        let db = test_db();
        let mut job = sample_job("j1", "doc-1", "2026-01-01T00:00:00Z");
        db.with_conn(|conn| upsert(conn, &job)).unwrap();

        job.state = "processing".to_string();
        job.total_sections = Some(10);
        job.created_at = "2030-01-01T00:00:00Z".to_string();
        db.with_conn(|conn| upsert(conn, &job)).unwrap();

        let found = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(found.state, "processing");
        assert_eq!(found.total_sections, Some(10));
        assert_eq!(found.created_at, "2026-01-01T00:00:00Z");
    }

    #[test]
    fn test_list_for_target_newest_first() {
        let db = test_db();
        db.with_conn(|conn| {
            upsert(conn, &sample_job("old", "doc-1", "2026-01-01T00:00:00Z"))?;
            upsert(conn, &sample_job("new", "doc-1", "2026-02-01T00:00:00Z"))?;
            upsert(conn, &sample_job("other", "doc-2", "2026-03-01T00:00:00Z"))
        })
        .unwrap();

        let rows = list_for_target(&db, "doc-1").unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(list_all(&db).unwrap().len(), 3);
    }
}
