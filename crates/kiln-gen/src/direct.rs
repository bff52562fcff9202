//! Single-shot mesh synthesis through a text model
//!
//! The model is asked for one JSON mesh document. Replies are often wrapped
//! in prose or code fences, so parsing tries the whole reply first and then
//! the first balanced `{...}` span inside it.

use crate::config::KilnConfig;
use crate::http::{build_agent, service_error};
use crate::task::validate_prompt;
use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

const DEFAULT_TEXT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_TEXT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You generate small triangle meshes. Reply with a single JSON object \
with the keys \"vertices\" (flat array of x,y,z floats), \"indices\" (flat array of triangle \
vertex indices), \"normals\" (flat array of per-vertex x,y,z floats) and optionally \"colors\" \
(flat array of per-vertex r,g,b floats in 0..1). No other text.";

/// Mesh returned by a text model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshDocument {
    #[serde(default)]
    pub vertices: Vec<f32>,
    #[serde(default)]
    pub indices: Vec<u32>,
    #[serde(default)]
    pub normals: Vec<f32>,
    #[serde(default)]
    pub colors: Option<Vec<f32>>,
}

impl MeshDocument {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Structural checks a renderer relies on
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("vertices", self.vertices.is_empty()),
            ("indices", self.indices.is_empty()),
            ("normals", self.normals.is_empty()),
        ]
        .iter()
        .filter(|(_, empty)| *empty)
        .map(|(name, _)| *name)
        .collect();
        if !missing.is_empty() {
            return Err(KilnError::ValidationError(format!(
                "Mesh is missing {}",
                missing.join(", ")
            )));
        }

        if self.vertices.len() % 3 != 0 {
            return Err(KilnError::ValidationError(format!(
                "Vertex array length {} is not a multiple of 3",
                self.vertices.len()
            )));
        }
        if self.indices.len() % 3 != 0 {
            return Err(KilnError::ValidationError(format!(
                "Index array length {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if self.normals.len() != self.vertices.len() {
            return Err(KilnError::ValidationError(format!(
                "Expected {} normal components, found {}",
                self.vertices.len(),
                self.normals.len()
            )));
        }
        let count = self.vertex_count();
        if let Some(bad) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(KilnError::ValidationError(format!(
                "Index {} out of range for {} vertices",
                bad, count
            )));
        }
        if let Some(colors) = &self.colors {
            if colors.len() != self.vertices.len() {
                return Err(KilnError::ValidationError(format!(
                    "Expected {} color components, found {}",
                    self.vertices.len(),
                    colors.len()
                )));
            }
        }
        Ok(())
    }

    /// Wavefront OBJ text. Vertex colors, when present, use the common
    /// `v x y z r g b` extension.
    pub fn to_obj(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# kiln direct synthesis");
        for (i, v) in self.vertices.chunks_exact(3).enumerate() {
            match self.colors.as_ref().and_then(|c| c.get(i * 3..i * 3 + 3)) {
                Some(c) => {
                    let _ = writeln!(out, "v {} {} {} {} {} {}", v[0], v[1], v[2], c[0], c[1], c[2]);
                }
                None => {
                    let _ = writeln!(out, "v {} {} {}", v[0], v[1], v[2]);
                }
            }
        }
        for n in self.normals.chunks_exact(3) {
            let _ = writeln!(out, "vn {} {} {}", n[0], n[1], n[2]);
        }
        for t in self.indices.chunks_exact(3) {
            let (a, b, c) = (t[0] + 1, t[1] + 1, t[2] + 1);
            let _ = writeln!(out, "f {a}//{a} {b}//{b} {c}//{c}");
        }
        out
    }

    pub fn write_obj<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_obj())?;
        Ok(())
    }
}

/// Parse and validate a model reply.
///
/// A reply that parses as a whole is used directly; otherwise the first
/// balanced brace span is tried. Text with no recoverable object fails with
/// `ValidationError`, as does an object lacking geometry.
pub fn parse_mesh_response(text: &str) -> Result<MeshDocument> {
    let mesh = match serde_json::from_str::<MeshDocument>(text.trim()) {
        Ok(mesh) => mesh,
        Err(direct_err) => {
            let span = first_balanced_object(text).ok_or_else(|| {
                KilnError::ValidationError(format!(
                    "No JSON object in model reply ({})",
                    direct_err
                ))
            })?;
            serde_json::from_str::<MeshDocument>(span).map_err(|e| {
                KilnError::ValidationError(format!("Mesh object did not parse: {}", e))
            })?
        }
    };
    mesh.validate()?;
    Ok(mesh)
}

/// First `{...}` span whose braces balance, ignoring braces inside JSON
/// strings.
pub fn first_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..=i]);
                    }
                }
                _ => {}
            }
        }
        search_from = start + 1;
    }
    None
}

/// A text-generation backend
pub trait TextModel {
    fn name(&self) -> &str;

    fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible `chat/completions` client, configured as the `text`
/// provider.
pub struct ChatCompletionsModel {
    api_key: String,
    api_url: String,
    model: String,
    timeout: Duration,
}

impl ChatCompletionsModel {
    pub fn from_config(config: &KilnConfig) -> Result<Self> {
        let api_key = config.require_api_key("text")?.to_string();
        Ok(Self {
            api_key,
            api_url: config
                .api_url("text")
                .unwrap_or(DEFAULT_TEXT_URL)
                .to_string(),
            model: config
                .model("text")
                .unwrap_or(DEFAULT_TEXT_MODEL)
                .to_string(),
            timeout: config.generation.request_timeout(),
        })
    }
}

impl TextModel for ChatCompletionsModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let payload = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt }
            ]
        });

        let agent = build_agent(self.timeout);
        let mut response = agent
            .post(&self.api_url)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .send_json(&payload)
            .map_err(|e| service_error("Text model request failed", e))?;

        let body: serde_json::Value = response
            .body_mut()
            .read_json()
            .map_err(|e| KilnError::ParseError(format!("Failed to parse completion: {}", e)))?;
        extract_completion_text(&body)
    }
}

/// Pull the assistant message out of a chat completion response
pub fn extract_completion_text(body: &serde_json::Value) -> Result<String> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| KilnError::ParseError("Completion has no message content".to_string()))
}

/// Prompt-to-mesh in one call
pub struct DirectSynthesizer {
    model: Box<dyn TextModel>,
}

impl DirectSynthesizer {
    pub fn new(model: Box<dyn TextModel>) -> Self {
        Self { model }
    }

    pub fn synthesize(&self, prompt: &str) -> Result<MeshDocument> {
        validate_prompt(prompt)?;
        tracing::info!(model = self.model.name(), "requesting direct mesh synthesis");
        let reply = self.model.complete(SYSTEM_PROMPT, prompt.trim())?;
        let mesh = parse_mesh_response(&reply)?;
        tracing::info!(
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            "mesh synthesized"
        );
        Ok(mesh)
    }
}
