//! Mock generation service for testing and offline runs
//!
//! Tasks advance by a fixed progress step on every status call and succeed
//! at 100%. Artifacts are served under `mock://` URLs by `MockFetcher` as a
//! minimal single-triangle GLB, so a whole request runs without network.

use crate::service::{BinaryFetcher, GenerationService};
use crate::task::{CreateTask, Stage, TaskId, TaskReport, TaskStatus};
use kiln_core::{KilnError, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

const DEFAULT_PROGRESS_STEP: u8 = 25;
const MODEL_URL_PREFIX: &str = "mock://models/";

/// A scripted in-process generation service
pub struct MockService {
    progress_step: u8,
    fail_stage: Option<Stage>,
    state: RefCell<MockState>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    tasks: HashMap<TaskId, MockTask>,
}

struct MockTask {
    stage: Stage,
    polls: u32,
    progress: u8,
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockService {
    pub fn new() -> Self {
        Self::with_progress_step(DEFAULT_PROGRESS_STEP)
    }

    /// Tasks advance `step` percent per status call
    pub fn with_progress_step(step: u8) -> Self {
        Self {
            progress_step: step.max(1),
            fail_stage: None,
            state: RefCell::new(MockState::default()),
        }
    }

    /// Tasks of `stage` report `Failed` instead of `Succeeded` at 100%
    pub fn failing_at(mut self, stage: Stage) -> Self {
        self.fail_stage = Some(stage);
        self
    }

    /// Number of tasks created so far
    pub fn created_count(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    fn is_succeeded(&self, task: &MockTask) -> bool {
        task.progress >= 100 && self.fail_stage != Some(task.stage)
    }
}

impl GenerationService for MockService {
    fn name(&self) -> &str {
        "mock"
    }

    fn create(&self, task: &CreateTask) -> Result<TaskId> {
        let mut state = self.state.borrow_mut();

        if let CreateTask::Refine(params) = task {
            let ready = state
                .tasks
                .get(&params.preceding_task_id)
                .map(|t| t.stage == Stage::Preview && self.is_succeeded(t))
                .unwrap_or(false);
            if !ready {
                return Err(KilnError::ServiceError {
                    status: Some(400),
                    message: format!(
                        "Preview task {} is not a succeeded preview",
                        params.preceding_task_id
                    ),
                });
            }
        }

        state.next_id += 1;
        let id = TaskId::new(format!("mock-{}-{}", task.stage(), state.next_id));
        state.tasks.insert(
            id.clone(),
            MockTask {
                stage: task.stage(),
                polls: 0,
                progress: 0,
            },
        );
        Ok(id)
    }

    fn status(&self, task_id: &TaskId) -> Result<TaskReport> {
        let mut state = self.state.borrow_mut();
        let step = self.progress_step;
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| KilnError::NotFound(task_id.to_string()))?;

        if task.polls > 0 {
            task.progress = task.progress.saturating_add(step).min(100);
        }
        task.polls += 1;

        let status = if task.progress >= 100 {
            if self.fail_stage == Some(task.stage) {
                TaskStatus::Failed
            } else {
                TaskStatus::Succeeded
            }
        } else if task.polls == 1 {
            TaskStatus::Pending
        } else {
            TaskStatus::InProgress
        };

        let mut artifact_urls = BTreeMap::new();
        let mut thumbnail_url = None;
        if status == TaskStatus::Succeeded {
            artifact_urls.insert(
                "glb".to_string(),
                format!("{}{}.glb", MODEL_URL_PREFIX, task_id),
            );
            thumbnail_url = Some(format!("mock://thumbnails/{}.png", task_id));
        }

        Ok(TaskReport {
            id: task_id.clone(),
            status,
            progress: task.progress,
            artifact_urls,
            thumbnail_url,
            error: (status == TaskStatus::Failed).then(|| format!("mock {} failure", task.stage)),
        })
    }
}

/// Serves `mock://models/*` URLs with a minimal GLB; anything else is a 404
#[derive(Default)]
pub struct MockFetcher;

impl BinaryFetcher for MockFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if url.starts_with(MODEL_URL_PREFIX) {
            return minimal_glb();
        }
        Err(KilnError::FetchError {
            status: Some(404),
            message: format!("Mock fetcher has no artifact at {}", url),
        })
    }
}

/// A minimal valid GLB holding a single triangle
pub fn minimal_glb() -> Result<Vec<u8>> {
    let json = serde_json::json!({
        "asset": { "version": "2.0", "generator": "kiln-mock" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{
            "primitives": [{
                "attributes": { "POSITION": 0 },
                "indices": 1
            }]
        }],
        "accessors": [
            {
                "bufferView": 0,
                "componentType": 5126,
                "count": 3,
                "type": "VEC3",
                "max": [1.0, 1.0, 0.0],
                "min": [-1.0, 0.0, 0.0]
            },
            {
                "bufferView": 1,
                "componentType": 5123,
                "count": 3,
                "type": "SCALAR",
                "max": [2],
                "min": [0]
            }
        ],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963 }
        ],
        "buffers": [{ "byteLength": 44 }]
    });

    // JSON chunk padded with spaces to 4-byte alignment
    let mut json_chunk = serde_json::to_vec(&json)?;
    let json_padded_len = (json_chunk.len() + 3) & !3;
    json_chunk.resize(json_padded_len, b' ');

    // 3 vertices (36 bytes) + 3 u16 indices (6 bytes) + 2 padding
    let vertices: [f32; 9] = [-1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let indices: [u16; 3] = [0, 1, 2];
    let mut bin_chunk = Vec::with_capacity(44);
    for v in &vertices {
        bin_chunk.extend_from_slice(&v.to_le_bytes());
    }
    for i in &indices {
        bin_chunk.extend_from_slice(&i.to_le_bytes());
    }
    let bin_padded_len = (bin_chunk.len() + 3) & !3;
    bin_chunk.resize(bin_padded_len, 0);

    let total_len = 12 + 8 + json_chunk.len() + 8 + bin_chunk.len();
    let mut out = Vec::with_capacity(total_len);

    out.extend_from_slice(b"glTF");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total_len as u32).to_le_bytes());

    out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(&0x4E4F534Au32.to_le_bytes()); // "JSON"
    out.extend_from_slice(&json_chunk);

    out.extend_from_slice(&(bin_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(&0x004E4942u32.to_le_bytes()); // "BIN\0"
    out.extend_from_slice(&bin_chunk);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{PreviewParams, RefineParams};

    fn preview_request() -> CreateTask {
        CreateTask::Preview(PreviewParams {
            prompt: "a wooden chair".to_string(),
            art_style: "realistic".to_string(),
            topology: "triangle".to_string(),
            target_polycount: 1000,
        })
    }

    fn poll_until_terminal(service: &MockService, id: &TaskId) -> TaskReport {
        for _ in 0..20 {
            let report = service.status(id).unwrap();
            if report.status.is_terminal() {
                return report;
            }
        }
        panic!("mock task never finished");
    }

    #[test]
    fn test_mock_task_progresses_to_success() {
        let service = MockService::with_progress_step(50);
        let id = service.create(&preview_request()).unwrap();

        let first = service.status(&id).unwrap();
        assert_eq!(first.status, TaskStatus::Pending);
        assert_eq!(first.progress, 0);

        let second = service.status(&id).unwrap();
        assert_eq!(second.status, TaskStatus::InProgress);
        assert_eq!(second.progress, 50);

        let third = service.status(&id).unwrap();
        assert_eq!(third.status, TaskStatus::Succeeded);
        assert!(third.artifact_url("glb").unwrap().starts_with("mock://models/"));
        assert!(third.thumbnail_url.is_some());
    }

    #[test]
    fn test_mock_unknown_task_is_not_found() {
        let service = MockService::new();
        let err = service.status(&TaskId::new("nope")).unwrap_err();
        assert!(matches!(err, KilnError::NotFound(_)));
    }

    #[test]
    fn test_mock_refine_requires_succeeded_preview() {
        let service = MockService::new();
        let preview = service.create(&preview_request()).unwrap();
        let refine = CreateTask::Refine(RefineParams {
            preceding_task_id: preview.clone(),
            enable_pbr: true,
        });

        assert!(matches!(
            service.create(&refine),
            Err(KilnError::ServiceError { status: Some(400), .. })
        ));

        poll_until_terminal(&service, &preview);
        let refine_id = service.create(&refine).unwrap();
        assert!(refine_id.as_str().starts_with("mock-refine-"));
        assert_eq!(service.created_count(), 2);
    }

    #[test]
    fn test_mock_failing_stage() {
        let service = MockService::with_progress_step(100).failing_at(Stage::Preview);
        let id = service.create(&preview_request()).unwrap();
        let report = poll_until_terminal(&service, &id);
        assert_eq!(report.status, TaskStatus::Failed);
        assert!(report.error.is_some());
        assert!(report.artifact_urls.is_empty());
    }

    #[test]
    fn test_minimal_glb_layout() {
        let bytes = minimal_glb().unwrap();
        assert_eq!(&bytes[..4], b"glTF");
        let total = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(total as usize, bytes.len());
        assert_eq!(bytes.len() % 4, 0);
    }

    #[test]
    fn test_mock_fetcher() {
        let fetcher = MockFetcher;
        assert!(fetcher.fetch("mock://models/mock-refine-2.glb").is_ok());
        assert!(matches!(
            fetcher.fetch("https://example.com/model.glb"),
            Err(KilnError::FetchError { status: Some(404), .. })
        ));
    }
}
