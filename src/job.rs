//! Process-wide registry of in-flight publish jobs.
//!
//! A connector's `publish` returns immediately with a [`JobData`] handle and
//! keeps working in a background task, reporting progress back through the
//! [`JobManager`]. The UI polls [`JobManager::poll`] until the job reaches a
//! terminal status.
//!
//! State machine: `InProgress -> Success` or `InProgress -> Error`, both
//! terminal. Updates arriving after a terminal status are dropped, so a
//! poller can never observe a job leaving `Success` or `Error`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InProgress,
    Success,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::InProgress)
    }
}

/// Snapshot of one tracked job. Owned copies are handed out; the registry
/// keeps the only mutable record.
#[derive(Debug, Clone, Serialize)]
pub struct JobData {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Human-readable current status line, rendered directly by the UI.
    /// May contain HTML (e.g. a result link on success).
    pub message: String,
    pub logs: Vec<String>,
    pub errors: Vec<String>,
}

/// Payload of the polling endpoint: `stop` flips to `true` once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPoll {
    pub status: JobStatus,
    pub message: String,
    pub stop: bool,
}

struct JobRecord {
    data: JobData,
    finished_at: Option<Instant>,
}

/// Cloneable handle to the shared job registry.
///
/// Mutations are serialized through one mutex; each lock is held only for
/// the duration of a single map operation, never across I/O.
#[derive(Clone, Default)]
pub struct JobManager {
    jobs: Arc<Mutex<HashMap<JobId, JobRecord>>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a job id and register a new `InProgress` job.
    pub fn start_job(&self, message: impl Into<String>) -> JobData {
        let data = JobData {
            job_id: Uuid::new_v4(),
            status: JobStatus::InProgress,
            message: message.into(),
            logs: Vec::new(),
            errors: Vec::new(),
        };
        info!(job_id = %data.job_id, message = %data.message, "Job started");
        let mut jobs = self.jobs.lock().expect("job registry poisoned");
        jobs.insert(
            data.job_id,
            JobRecord {
                data: data.clone(),
                finished_at: None,
            },
        );
        data
    }

    /// Update the status line of a running job. Returns `false` if the job
    /// is unknown or already terminal.
    pub fn job_progress(&self, job_id: JobId, message: impl Into<String>) -> bool {
        self.update(job_id, |data| {
            data.message = message.into();
        })
    }

    /// Append to the ordered progress log of a running job.
    pub fn add_job_log(&self, job_id: JobId, entry: impl Into<String>) -> bool {
        self.update(job_id, |data| {
            data.logs.push(entry.into());
        })
    }

    /// Append to the ordered error log of a running job.
    pub fn add_job_error(&self, job_id: JobId, entry: impl Into<String>) -> bool {
        self.update(job_id, |data| {
            data.errors.push(entry.into());
        })
    }

    /// Terminal transition to `Success`. Ignored once terminal.
    pub fn job_success(&self, job_id: JobId, message: impl Into<String>) -> bool {
        self.finish(job_id, JobStatus::Success, message.into())
    }

    /// Terminal transition to `Error`. Ignored once terminal.
    pub fn job_error(&self, job_id: JobId, message: impl Into<String>) -> bool {
        self.finish(job_id, JobStatus::Error, message.into())
    }

    /// Owned snapshot of a job, terminal or not.
    pub fn get_job(&self, job_id: JobId) -> Option<JobData> {
        let jobs = self.jobs.lock().expect("job registry poisoned");
        jobs.get(&job_id).map(|record| record.data.clone())
    }

    /// Read accessor for the polling endpoint.
    pub fn poll(&self, job_id: JobId) -> Option<JobPoll> {
        let jobs = self.jobs.lock().expect("job registry poisoned");
        jobs.get(&job_id).map(|record| JobPoll {
            status: record.data.status,
            message: record.data.message.clone(),
            stop: record.data.status.is_terminal(),
        })
    }

    /// Evict terminal jobs that finished at least `max_age` ago. Jobs still
    /// in progress are never evicted. Returns the number of jobs removed.
    ///
    /// The registry retains terminal jobs until this is called, so late
    /// pollers can still read the outcome; the embedding server decides the
    /// sweep cadence.
    pub fn purge_terminal(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut jobs = self.jobs.lock().expect("job registry poisoned");
        let before = jobs.len();
        jobs.retain(|_, record| match record.finished_at {
            Some(finished) => now.duration_since(finished) < max_age,
            None => true,
        });
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(removed, "Purged terminal jobs");
        }
        removed
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().expect("job registry poisoned").len()
    }

    fn update(&self, job_id: JobId, apply: impl FnOnce(&mut JobData)) -> bool {
        let mut jobs = self.jobs.lock().expect("job registry poisoned");
        match jobs.get_mut(&job_id) {
            Some(record) if !record.data.status.is_terminal() => {
                apply(&mut record.data);
                true
            }
            Some(_) => {
                warn!(job_id = %job_id, "Ignoring update to terminal job");
                false
            }
            None => {
                warn!(job_id = %job_id, "Ignoring update to unknown job");
                false
            }
        }
    }

    fn finish(&self, job_id: JobId, status: JobStatus, message: String) -> bool {
        let mut jobs = self.jobs.lock().expect("job registry poisoned");
        match jobs.get_mut(&job_id) {
            Some(record) if !record.data.status.is_terminal() => {
                record.data.status = status;
                record.data.message = message;
                record.finished_at = Some(Instant::now());
                info!(job_id = %job_id, status = ?status, message = %record.data.message, "Job finished");
                true
            }
            Some(record) => {
                warn!(
                    job_id = %job_id,
                    current = ?record.data.status,
                    attempted = ?status,
                    "Ignoring terminal transition on already-terminal job"
                );
                false
            }
            None => {
                warn!(job_id = %job_id, "Ignoring terminal transition on unknown job");
                false
            }
        }
    }
}
