//! Pending-request log
//!
//! Records are persisted in a single `.kiln/jobs.json` document so an
//! operator can see what was submitted and how it ended. The log is
//! informational; requests are never resumed from it.

use crate::orchestrator::{Outcome, RequestEvent};
use crate::task::{Stage, TaskId, TaskStatus};
use kiln_core::{write_document, KilnError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Status of a logged request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Active)
    }
}

/// One logged request, keyed by its preview task id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub prompt: String,
    pub service: String,
    pub stage: Stage,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub refine_task_id: Option<String>,
    /// Seconds since the Unix epoch
    pub submitted_at: u64,
    #[serde(default)]
    pub artifact: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(preview_task_id: &TaskId, prompt: &str, service: &str) -> Self {
        let submitted_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            id: preview_task_id.to_string(),
            prompt: prompt.to_string(),
            service: service.to_string(),
            stage: Stage::Preview,
            status: JobStatus::Active,
            progress: 0,
            refine_task_id: None,
            submitted_at,
            artifact: None,
            error: None,
        }
    }

    /// Fold an orchestrator event into the record
    pub fn apply(&mut self, event: &RequestEvent) {
        if self.status.is_finished() {
            return;
        }
        match event {
            RequestEvent::Progress {
                stage,
                status,
                progress,
                ..
            } => {
                self.stage = *stage;
                self.progress = if *status == TaskStatus::Succeeded {
                    100
                } else {
                    *progress
                };
            }
            RequestEvent::Chained { refine_task_id, .. } => {
                self.stage = Stage::Refine;
                self.progress = 0;
                self.refine_task_id = Some(refine_task_id.to_string());
            }
            RequestEvent::Completed { output, .. } => {
                self.status = JobStatus::Succeeded;
                self.progress = 100;
                self.artifact = Some(output.artifact.as_reference());
            }
            RequestEvent::Failed { stage, reason, .. } => {
                self.stage = *stage;
                self.status = JobStatus::Failed;
                self.error = Some(reason.clone());
            }
            RequestEvent::Cancelled { stage, .. } => {
                self.stage = *stage;
                self.status = JobStatus::Cancelled;
            }
        }
    }

    /// Settle the record from a final outcome
    pub fn finish(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Succeeded(output) => {
                self.status = JobStatus::Succeeded;
                self.stage = Stage::Refine;
                self.progress = 100;
                self.artifact = Some(output.artifact.as_reference());
            }
            Outcome::Failed { stage, reason } => {
                self.status = JobStatus::Failed;
                self.stage = *stage;
                self.error = Some(reason.clone());
            }
            Outcome::Cancelled { stage } => {
                self.status = JobStatus::Cancelled;
                self.stage = *stage;
            }
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JobFile {
    #[serde(default)]
    jobs: Vec<JobRecord>,
}

/// Whole-document JSON job log
#[derive(Debug, Clone)]
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Default job log location
    pub fn default_log() -> Self {
        Self::new(".kiln/jobs.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace a record by id
    pub fn record(&self, job: &JobRecord) -> Result<()> {
        let mut file = self.read()?;
        match file.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => file.jobs.push(job.clone()),
        }
        self.write(&file)
    }

    /// Apply an event to a logged record and persist it
    pub fn update(&self, id: &str, event: &RequestEvent) -> Result<JobRecord> {
        let mut file = self.read()?;
        let job = file
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| KilnError::NotFound(format!("job {}", id)))?;
        job.apply(event);
        let updated = job.clone();
        self.write(&file)?;
        Ok(updated)
    }

    /// All records, oldest first
    pub fn list(&self) -> Result<Vec<JobRecord>> {
        Ok(self.read()?.jobs)
    }

    pub fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        Ok(self.read()?.jobs.into_iter().find(|j| j.id == id))
    }

    /// Drop every finished record. Returns how many were removed.
    pub fn prune_finished(&self) -> Result<usize> {
        let mut file = self.read()?;
        let before = file.jobs.len();
        file.jobs.retain(|j| !j.status.is_finished());
        let removed = before - file.jobs.len();
        if removed > 0 {
            self.write(&file)?;
        }
        Ok(removed)
    }

    fn read(&self) -> Result<JobFile> {
        if !self.path.exists() {
            return Ok(JobFile::default());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(JobFile::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, file: &JobFile) -> Result<()> {
        write_document(&self.path, &serde_json::to_string_pretty(file)?)
    }
}
