//! In-memory job cache with write-through database persistence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;

use crate::db::job_repo::JobRow;
use crate::db::{applied_repo, job_repo, section_repo, Database, DatabaseError};
use crate::error::ImportError;
use crate::model::{ImportJob, TaxonomyCode};

use super::rows;

/// Shared handle to one job. Every mutation of the job goes through its mutex.
pub type JobHandle = Arc<Mutex<ImportJob>>;

/// Locks a job, recovering from poisoning.
pub fn lock_job(handle: &JobHandle) -> MutexGuard<'_, ImportJob> {
    match handle.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Job lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Thread-safe job store.
///
/// Lock order: `active_targets`, then `jobs`. A job's own lock may be held
/// while taking `active_targets` or the database, never the reverse, and
/// never taken while `jobs` is held.
///
/// With a database attached the cache is not the whole history: terminal
/// jobs are evicted by `evict_finished` and reloaded on demand.
pub struct JobStore {
    db: RwLock<Option<Database>>,
    jobs: RwLock<HashMap<String, JobHandle>>,
    /// target document id -> id of its non-terminal job
    active_targets: Mutex<HashMap<String, String>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            db: RwLock::new(None),
            jobs: RwLock::new(HashMap::new()),
            active_targets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_database(db: Database) -> Self {
        let store = Self::new();
        store.set_database(db);
        store
    }

    /// Sets the database handle for persistence.
    pub fn set_database(&self, db: Database) {
        let mut guard = match self.db.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store DB lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard = Some(db);
    }

    pub fn get_database(&self) -> Option<Database> {
        match self.db.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                log::warn!("Job store DB lock was poisoned, recovering");
                poisoned.into_inner().clone()
            }
        }
    }

    fn jobs_read(&self) -> RwLockReadGuard<'_, HashMap<String, JobHandle>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn jobs_write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobHandle>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn targets(&self) -> MutexGuard<'_, HashMap<String, String>> {
        match self.active_targets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store target index was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Stores a freshly created job, reserving its target document.
    ///
    /// Fails with `ImportAlreadyInProgress` if the target already has a
    /// non-terminal job, or `Storage` if the job cannot be persisted.
    pub fn insert_new(&self, job: ImportJob) -> Result<JobHandle, ImportError> {
        let mut targets = self.targets();
        if let Some(existing) = targets.get(&job.target_document_id) {
            return Err(ImportError::ImportAlreadyInProgress {
                target_document_id: job.target_document_id.clone(),
                job_id: existing.clone(),
            });
        }

        if let Some(db) = self.get_database() {
            write_job(&db, &job, job.sections.keys().copied())?;
        }

        targets.insert(job.target_document_id.clone(), job.id.clone());
        let id = job.id.clone();
        let handle = Arc::new(Mutex::new(job));
        self.jobs_write().insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Returns the handle of a job, reloading it from the database if it
    /// was evicted from the cache.
    pub fn handle(&self, job_id: &str) -> Result<JobHandle, ImportError> {
        let cached = self.jobs_read().get(job_id).cloned();
        if let Some(handle) = cached {
            return Ok(handle);
        }
        self.rehydrate(job_id)?
            .ok_or_else(|| ImportError::JobNotFound(job_id.to_string()))
    }

    fn rehydrate(&self, job_id: &str) -> Result<Option<JobHandle>, DatabaseError> {
        let Some(db) = self.get_database() else {
            return Ok(None);
        };
        let Some(row) = job_repo::find_by_id(&db, job_id)? else {
            return Ok(None);
        };
        let job = read_job(&db, row)?;
        log::debug!("Reloaded job {} from database", job_id);

        let mut jobs = self.jobs_write();
        let handle = jobs
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(job)));
        Ok(Some(Arc::clone(handle)))
    }

    /// Returns a consistent copy of a job.
    pub fn snapshot(&self, job_id: &str) -> Result<ImportJob, ImportError> {
        let handle = self.handle(job_id)?;
        let job = lock_job(&handle);
        Ok(job.clone())
    }

    /// Runs `f` with exclusive access to one job.
    pub fn with_job<T>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut ImportJob) -> T,
    ) -> Result<T, ImportError> {
        let handle = self.handle(job_id)?;
        let mut job = lock_job(&handle);
        Ok(f(&mut job))
    }

    pub fn handles(&self) -> Vec<JobHandle> {
        self.jobs_read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs_read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the non-terminal job holding a target, if any.
    pub fn active_job_for(&self, target_document_id: &str) -> Option<String> {
        self.targets().get(target_document_id).cloned()
    }

    /// Copies of every job for one target, newest first.
    ///
    /// Cached copies win over stored rows; evicted jobs are read from the
    /// database without being put back into the cache.
    pub fn jobs_for_target(&self, target_document_id: &str) -> Vec<ImportJob> {
        let mut jobs: Vec<ImportJob> = self
            .handles()
            .iter()
            .filter_map(|handle| {
                let job = lock_job(handle);
                (job.target_document_id == target_document_id).then(|| job.clone())
            })
            .collect();

        if let Some(db) = self.get_database() {
            match job_repo::list_for_target(&db, target_document_id) {
                Ok(job_rows) => {
                    for row in job_rows {
                        if jobs.iter().any(|job| job.id == row.id) {
                            continue;
                        }
                        let id = row.id.clone();
                        match read_job(&db, row) {
                            Ok(job) => jobs.push(job),
                            Err(e) => log::warn!("Skipping stored job {}: {}", id, e),
                        }
                    }
                }
                Err(e) => log::warn!(
                    "Could not read stored jobs for target '{}': {}",
                    target_document_id,
                    e
                ),
            }
        }

        jobs.sort_by(|a, b| b.progress.created_at.cmp(&a.progress.created_at));
        jobs
    }

    /// Drops terminal jobs idle for at least `retention` from the cache and
    /// returns how many went. Only runs with a database attached, since
    /// evicted jobs are reloaded from it.
    pub fn evict_finished(&self, retention: Duration) -> usize {
        if self.get_database().is_none() {
            return 0;
        }

        let now = Utc::now();
        let candidates: Vec<(String, JobHandle)> = self
            .jobs_read()
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect();
        let expired: Vec<(String, JobHandle)> = candidates
            .into_iter()
            .filter(|(_, handle)| {
                let job = lock_job(handle);
                let idle = (now - job.updated_at).to_std().unwrap_or_default();
                job.state.is_terminal() && !job.is_applying() && idle >= retention
            })
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let mut jobs = self.jobs_write();
        let mut evicted = 0;
        for (id, handle) in expired {
            // Terminal jobs never change state again, so the earlier check still holds.
            if jobs.get(&id).is_some_and(|current| Arc::ptr_eq(current, &handle)) {
                jobs.remove(&id);
                evicted += 1;
            }
        }
        drop(jobs);

        log::debug!("Evicted {} finished jobs from the cache", evicted);
        evicted
    }

    /// Frees the target slot held by a job that reached a terminal state.
    pub(crate) fn release_target(&self, job: &ImportJob) {
        let mut targets = self.targets();
        if targets.get(&job.target_document_id) == Some(&job.id) {
            targets.remove(&job.target_document_id);
            log::debug!(
                "Released target '{}' held by job {}",
                job.target_document_id,
                job.id
            );
        }
    }

    /// Writes the job row and the listed sections through to the database.
    /// Errors are logged; the in-memory job stays authoritative.
    pub(crate) fn persist(&self, job: &ImportJob, sections: impl IntoIterator<Item = u32>) {
        let Some(db) = self.get_database() else {
            return;
        };
        if let Err(e) = write_job(&db, job, sections) {
            log::error!("Failed to persist job {}: {}", job.id, e);
        }
    }

    /// Records a code written to the target.
    pub(crate) fn persist_applied_code(&self, job_id: &str, code: &TaxonomyCode) {
        let Some(db) = self.get_database() else {
            return;
        };
        let result = db.with_conn(|conn| applied_repo::insert(conn, job_id, &code.category, &code.item));
        if let Err(e) = result {
            log::error!(
                "Failed to record applied code {} for job {}: {}",
                code,
                job_id,
                e
            );
        }
    }

    /// Loads persisted jobs into the cache and rebuilds the target index.
    pub fn load_from_database(&self) -> Result<usize, DatabaseError> {
        let Some(db) = self.get_database() else {
            return Ok(0);
        };

        let job_rows = job_repo::list_all(&db)?;
        let mut loaded = Vec::with_capacity(job_rows.len());
        for row in job_rows {
            loaded.push(read_job(&db, row)?);
        }

        let count = loaded.len();
        let mut targets = self.targets();
        let mut jobs = self.jobs_write();
        // Rows arrive newest first, so the newest live job claims its target.
        for job in loaded {
            if !job.state.is_terminal() {
                match targets.get(&job.target_document_id) {
                    Some(holder) => log::warn!(
                        "Job {} is live but target '{}' is already held by job {}",
                        job.id,
                        job.target_document_id,
                        holder
                    ),
                    None => {
                        targets.insert(job.target_document_id.clone(), job.id.clone());
                    }
                }
            }
            jobs.insert(job.id.clone(), Arc::new(Mutex::new(job)));
        }

        log::info!("Loaded {} import jobs from database", count);
        Ok(count)
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read_job(db: &Database, row: JobRow) -> Result<ImportJob, DatabaseError> {
    let sections = section_repo::list_for_job(db, &row.id)?;
    let applied = applied_repo::list_for_job(db, &row.id)?;
    Ok(rows::job_from_rows(row, sections, applied))
}

fn write_job(
    db: &Database,
    job: &ImportJob,
    sections: impl IntoIterator<Item = u32>,
) -> Result<(), DatabaseError> {
    let job_row = rows::job_to_row(job);
    let section_rows = sections
        .into_iter()
        .filter_map(|index| job.sections.get(&index))
        .map(|section| rows::section_to_row(&job.id, section))
        .collect::<Result<Vec<_>, _>>()?;

    db.with_transaction(|tx| {
        job_repo::upsert(tx, &job_row)?;
        for row in &section_rows {
            section_repo::upsert(tx, row)?;
        }
        Ok(())
    })
}
