//! Asset record definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kinds of assets the library can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    #[default]
    Model,
    Texture,
    Material,
    Audio,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Model => write!(f, "model"),
            AssetKind::Texture => write!(f, "texture"),
            AssetKind::Material => write!(f, "material"),
            AssetKind::Audio => write!(f, "audio"),
        }
    }
}

impl std::str::FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model" => Ok(AssetKind::Model),
            "texture" => Ok(AssetKind::Texture),
            "material" => Ok(AssetKind::Material),
            "audio" => Ok(AssetKind::Audio),
            _ => Err(format!(
                "Unknown asset kind '{}'. Use: model, texture, material, audio",
                s
            )),
        }
    }
}

/// Everything about an asset except its catalog id.
///
/// This is the portable form: `export_one` writes it and `import_one` reads
/// it back, so an id embedded in imported text is never trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: AssetKind,
    /// Parameters the asset was generated with, kept verbatim
    #[serde(default)]
    pub generation_parameters: serde_json::Value,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Local file path or remote URL of the binary
    pub artifact_path: String,
}

impl AssetDraft {
    pub fn new(name: impl Into<String>, artifact_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind: AssetKind::Model,
            generation_parameters: serde_json::Value::Null,
            tags: BTreeSet::new(),
            artifact_path: artifact_path.into(),
        }
    }

    /// Whether the artifact path points at a remote URL rather than a local file
    pub fn is_remote(&self) -> bool {
        is_remote_reference(&self.artifact_path)
    }
}

/// A record stored in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedAsset {
    pub id: String,
    #[serde(flatten)]
    pub draft: AssetDraft,
}

impl SavedAsset {
    pub fn name(&self) -> &str {
        &self.draft.name
    }

    pub fn artifact_path(&self) -> &str {
        &self.draft.artifact_path
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.draft.tags.contains(tag)
    }
}

pub(crate) fn is_remote_reference(path: &str) -> bool {
    path.starts_with("https://") || path.starts_with("http://")
}
