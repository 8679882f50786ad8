//! Section repository for the `import_sections` table.

use rusqlite::{params, Connection, Row};

use super::{Database, DatabaseError};

/// A raw section row. `mapping` holds the mapping as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionRow {
    pub job_id: String,
    pub section_index: u32,
    pub heading: Option<String>,
    pub page_number: Option<u32>,
    pub section_type: Option<String>,
    pub content: String,
    pub status: String,
    pub mapping: Option<String>,
    pub unmapped_reason: Option<String>,
    pub updated_at: String,
}

impl SectionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            section_index: row.get("section_index")?,
            heading: row.get("heading")?,
            page_number: row.get("page_number")?,
            section_type: row.get("section_type")?,
            content: row.get("content")?,
            status: row.get("status")?,
            mapping: row.get("mapping")?,
            unmapped_reason: row.get("unmapped_reason")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts or replaces one section.
pub fn upsert(conn: &Connection, section: &SectionRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO import_sections (job_id, section_index, heading, page_number, section_type,
         content, status, mapping, unmapped_reason, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(job_id, section_index) DO UPDATE SET
            heading=excluded.heading,
            page_number=excluded.page_number,
            section_type=excluded.section_type,
            content=excluded.content,
            status=excluded.status,
            mapping=excluded.mapping,
            unmapped_reason=excluded.unmapped_reason,
            updated_at=excluded.updated_at",
        params![
            section.job_id,
            section.section_index,
            section.heading,
            section.page_number,
            section.section_type,
            section.content,
            section.status,
            section.mapping,
            section.unmapped_reason,
            section.updated_at,
        ],
    )?;
    Ok(())
}

/// Lists the sections of a job in index order.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<SectionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM import_sections WHERE job_id = ?1 ORDER BY section_index ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], SectionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
