//! Remote task model shared by the orchestrator and the service bindings

use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Longest prompt the generation service accepts
pub const MAX_PROMPT_CHARS: usize = 600;

/// Opaque task identifier issued by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Fast geometry-only draft
    Preview,
    /// Adds surface detail to a succeeded preview
    Refine,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Preview => write!(f, "preview"),
            Stage::Refine => write!(f, "refine"),
        }
    }
}

/// Remote status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in progress"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One remote-tracked unit of generation work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTask {
    pub id: TaskId,
    pub prompt: String,
    pub stage: Stage,
    pub status: TaskStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Set on refine tasks: the preview they were chained from
    #[serde(default)]
    pub preceding_task_id: Option<TaskId>,
}

impl GenerationTask {
    /// A freshly created preview task
    pub fn preview(id: TaskId, prompt: &str) -> Self {
        Self {
            id,
            prompt: prompt.to_string(),
            stage: Stage::Preview,
            status: TaskStatus::Pending,
            progress: 0,
            preceding_task_id: None,
        }
    }

    /// A refine task chained from `preceding`, which must be a succeeded preview.
    pub fn refine(id: TaskId, preceding: &GenerationTask) -> Result<Self> {
        if preceding.stage != Stage::Preview || preceding.status != TaskStatus::Succeeded {
            return Err(KilnError::ValidationError(format!(
                "Cannot refine task {}: it is a {} task with status {}",
                preceding.id, preceding.stage, preceding.status
            )));
        }
        Ok(Self {
            id,
            prompt: preceding.prompt.clone(),
            stage: Stage::Refine,
            status: TaskStatus::Pending,
            progress: 0,
            preceding_task_id: Some(preceding.id.clone()),
        })
    }

    /// Refresh status and progress from a poll response for this task
    pub(crate) fn apply(&mut self, report: &TaskReport) {
        self.status = report.status;
        self.progress = report.progress.min(100);
    }
}

/// Status response for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    /// Artifact URLs keyed by format (`glb`, `fbx`, ...)
    #[serde(default)]
    pub artifact_urls: BTreeMap<String, String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Remote error message for failed tasks
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskReport {
    /// The artifact URL for the preferred format, or any format when the
    /// preferred one is absent.
    pub fn artifact_url(&self, preferred_format: &str) -> Option<&str> {
        self.artifact_urls
            .get(preferred_format)
            .or_else(|| self.artifact_urls.values().next())
            .map(|s| s.as_str())
    }
}

/// Creation parameters for a preview task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewParams {
    pub prompt: String,
    pub art_style: String,
    pub topology: String,
    pub target_polycount: u32,
}

/// Creation parameters for a refine task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineParams {
    pub preceding_task_id: TaskId,
    pub enable_pbr: bool,
}

/// A task creation call
#[derive(Debug, Clone, PartialEq)]
pub enum CreateTask {
    Preview(PreviewParams),
    Refine(RefineParams),
}

impl CreateTask {
    pub fn stage(&self) -> Stage {
        match self {
            CreateTask::Preview(_) => Stage::Preview,
            CreateTask::Refine(_) => Stage::Refine,
        }
    }
}

/// Reject prompts the service would refuse before spending a remote call
pub fn validate_prompt(prompt: &str) -> Result<()> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(KilnError::ValidationError(
            "Prompt must not be empty".to_string(),
        ));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(KilnError::ValidationError(format!(
            "Prompt is {} characters; the limit is {}",
            chars, MAX_PROMPT_CHARS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn succeeded_preview() -> GenerationTask {
        let mut task = GenerationTask::preview(TaskId::new("prev-1"), "a wooden barrel");
        task.status = TaskStatus::Succeeded;
        task.progress = 100;
        task
    }

    #[test]
    fn test_refine_carries_preceding_id() {
        let preview = succeeded_preview();
        let refine = GenerationTask::refine(TaskId::new("ref-1"), &preview).unwrap();
        assert_eq!(refine.stage, Stage::Refine);
        assert_eq!(refine.preceding_task_id, Some(TaskId::new("prev-1")));
        assert_eq!(refine.prompt, "a wooden barrel");
        assert_eq!(refine.status, TaskStatus::Pending);
    }

    #[test]
    fn test_refine_requires_succeeded_preview() {
        let mut preview = succeeded_preview();
        preview.status = TaskStatus::InProgress;
        assert!(GenerationTask::refine(TaskId::new("ref-1"), &preview).is_err());

        let refine = GenerationTask::refine(TaskId::new("ref-1"), &succeeded_preview()).unwrap();
        let mut done_refine = refine.clone();
        done_refine.status = TaskStatus::Succeeded;
        assert!(GenerationTask::refine(TaskId::new("ref-2"), &done_refine).is_err());
    }

    #[test]
    fn test_apply_clamps_progress() {
        let mut task = GenerationTask::preview(TaskId::new("t"), "crate");
        task.apply(&TaskReport {
            id: TaskId::new("t"),
            status: TaskStatus::InProgress,
            progress: 250,
            artifact_urls: BTreeMap::new(),
            thumbnail_url: None,
            error: None,
        });
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn test_artifact_url_prefers_format() {
        let mut urls = BTreeMap::new();
        urls.insert("fbx".to_string(), "https://x/model.fbx".to_string());
        urls.insert("glb".to_string(), "https://x/model.glb".to_string());
        let report = TaskReport {
            id: TaskId::new("t"),
            status: TaskStatus::Succeeded,
            progress: 100,
            artifact_urls: urls,
            thumbnail_url: None,
            error: None,
        };
        assert_eq!(report.artifact_url("glb"), Some("https://x/model.glb"));
        assert_eq!(report.artifact_url("usdz"), Some("https://x/model.fbx"));
    }

    #[test]
    fn test_validate_prompt() {
        assert!(validate_prompt("a mossy stone well").is_ok());
        assert!(matches!(
            validate_prompt("   "),
            Err(KilnError::ValidationError(_))
        ));
        let long = "x".repeat(MAX_PROMPT_CHARS + 1);
        assert!(validate_prompt(&long).is_err());
        let exact = "y".repeat(MAX_PROMPT_CHARS);
        assert!(validate_prompt(&exact).is_ok());
    }
}
