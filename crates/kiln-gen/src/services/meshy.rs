//! Meshy text-to-3d service
//!
//! Binds the two-stage Meshy v2 API: a `preview` task builds untextured
//! geometry from the prompt, and a `refine` task textures a succeeded
//! preview. Both are created with `POST {base}` and polled with
//! `GET {base}/{id}`.

use crate::config::KilnConfig;
use crate::http::{build_agent, service_error};
use crate::service::GenerationService;
use crate::task::{CreateTask, TaskId, TaskReport, TaskStatus};
use kiln_core::{KilnError, Result};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_MESHY_URL: &str = "https://api.meshy.ai/openapi/v2/text-to-3d";

/// Meshy service for AI 3D model generation
pub struct MeshyService {
    api_key: String,
    api_url: String,
    timeout: Duration,
}

impl MeshyService {
    /// Create a new MeshyService from config
    pub fn from_config(config: &KilnConfig) -> Result<Self> {
        let api_key = config.require_api_key("meshy")?.to_string();
        let api_url = config
            .api_url("meshy")
            .unwrap_or(DEFAULT_MESHY_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            api_key,
            api_url,
            timeout: config.generation.request_timeout(),
        })
    }

    fn post_json(&self, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let agent = build_agent(self.timeout);
        let mut response = agent
            .post(&self.api_url)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .send_json(payload)
            .map_err(|e| service_error("Meshy task creation failed", e))?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| KilnError::ParseError(format!("Failed to parse Meshy response: {}", e)))
    }

    fn get_json(&self, task_id: &TaskId) -> Result<serde_json::Value> {
        let url = format!("{}/{}", self.api_url, task_id);
        let agent = build_agent(self.timeout);
        let mut response = agent
            .get(&url)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .call()
            .map_err(|e| match e {
                ureq::Error::StatusCode(404) => KilnError::NotFound(task_id.to_string()),
                other => service_error("Meshy poll failed", other),
            })?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| KilnError::ParseError(format!("Failed to parse poll response: {}", e)))
    }
}

impl GenerationService for MeshyService {
    fn name(&self) -> &str {
        "meshy"
    }

    fn create(&self, task: &CreateTask) -> Result<TaskId> {
        let response = self.post_json(&create_payload(task))?;
        parse_create_response(&response)
    }

    fn status(&self, task_id: &TaskId) -> Result<TaskReport> {
        let response = self.get_json(task_id)?;
        parse_status_response(&response)
    }
}

/// Request body for a creation call
pub fn create_payload(task: &CreateTask) -> serde_json::Value {
    match task {
        CreateTask::Preview(params) => serde_json::json!({
            "mode": "preview",
            "prompt": params.prompt,
            "art_style": params.art_style,
            "topology": params.topology,
            "target_polycount": params.target_polycount,
            "should_remesh": true
        }),
        CreateTask::Refine(params) => serde_json::json!({
            "mode": "refine",
            "preview_task_id": params.preceding_task_id.as_str(),
            "enable_pbr": params.enable_pbr
        }),
    }
}

/// Extract the task id from a creation response
pub fn parse_create_response(response: &serde_json::Value) -> Result<TaskId> {
    response
        .get("result")
        .and_then(|r| r.as_str())
        .filter(|id| !id.is_empty())
        .map(TaskId::new)
        .ok_or_else(|| {
            KilnError::ParseError(format!(
                "Unexpected Meshy create response: {}",
                truncate(&response.to_string(), 200)
            ))
        })
}

/// Convert a status response into a `TaskReport`
pub fn parse_status_response(response: &serde_json::Value) -> Result<TaskReport> {
    let id = response
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| KilnError::ParseError("Poll response has no task id".to_string()))?;

    let raw_status = response
        .get("status")
        .and_then(|s| s.as_str())
        .ok_or_else(|| KilnError::ParseError(format!("Poll response for {} has no status", id)))?;

    let status = match raw_status {
        "PENDING" => TaskStatus::Pending,
        "IN_PROGRESS" => TaskStatus::InProgress,
        "SUCCEEDED" => TaskStatus::Succeeded,
        "FAILED" | "EXPIRED" | "CANCELED" => TaskStatus::Failed,
        other => {
            tracing::debug!(task = %id, status = %other, "unrecognized Meshy status; treating as in progress");
            TaskStatus::InProgress
        }
    };

    let progress = response
        .get("progress")
        .and_then(|p| p.as_u64())
        .unwrap_or(0)
        .min(100) as u8;

    let artifact_urls: BTreeMap<String, String> = response
        .get("model_urls")
        .and_then(|u| u.as_object())
        .map(|urls| {
            urls.iter()
                .filter_map(|(format, url)| {
                    url.as_str()
                        .filter(|u| !u.is_empty())
                        .map(|u| (format.clone(), u.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    let thumbnail_url = response
        .get("thumbnail_url")
        .and_then(|u| u.as_str())
        .filter(|u| !u.is_empty())
        .map(|s| s.to_string());

    let error = if status == TaskStatus::Failed {
        Some(
            response
                .get("task_error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .filter(|m| !m.is_empty())
                .unwrap_or(raw_status)
                .to_string(),
        )
    } else {
        None
    };

    Ok(TaskReport {
        id: TaskId::new(id),
        status,
        progress,
        artifact_urls,
        thumbnail_url,
        error,
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
