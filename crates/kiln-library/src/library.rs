//! File-backed asset library

use crate::types::{is_remote_reference, AssetDraft, SavedAsset};
use kiln_core::{write_document, KilnError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const CATALOG_VERSION: u32 = 1;

/// Handle to the persisted asset catalog.
///
/// Cloning is cheap and every clone refers to the same catalog file and the
/// same write lock.
#[derive(Debug, Clone)]
pub struct AssetLibrary {
    inner: Arc<LibraryInner>,
}

#[derive(Debug)]
struct LibraryInner {
    path: PathBuf,
    write_lock: Mutex<()>,
}

/// On-disk document format
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    assets: Vec<SavedAsset>,
}

fn default_version() -> u32 {
    CATALOG_VERSION
}

impl AssetLibrary {
    /// Open (or lazily create) a library backed by the given JSON file
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            inner: Arc::new(LibraryInner {
                path: path.as_ref().to_path_buf(),
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// Default library location
    pub fn default_library() -> Self {
        Self::open(".kiln/library.json")
    }

    /// Path of the backing catalog file
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Mint an id for the draft, append it and persist before returning.
    pub fn save(&self, draft: AssetDraft) -> Result<SavedAsset> {
        validate_draft(&draft)?;

        let _guard = self.lock()?;
        let mut catalog = self.read_catalog()?;
        let asset = SavedAsset {
            id: mint_id(&catalog),
            draft,
        };
        catalog.assets.push(asset.clone());
        self.write_catalog(&catalog)?;

        tracing::info!(id = %asset.id, name = %asset.name(), "saved asset");
        Ok(asset)
    }

    /// All records in insertion order
    pub fn list(&self) -> Result<Vec<SavedAsset>> {
        Ok(self.read_catalog()?.assets)
    }

    /// Records carrying the given tag, in insertion order
    pub fn by_tag(&self, tag: &str) -> Result<Vec<SavedAsset>> {
        Ok(self
            .read_catalog()?
            .assets
            .into_iter()
            .filter(|a| a.has_tag(tag))
            .collect())
    }

    pub fn get(&self, id: &str) -> Result<Option<SavedAsset>> {
        Ok(self.read_catalog()?.assets.into_iter().find(|a| a.id == id))
    }

    /// Remove a record. Returns whether anything was removed; an unknown id
    /// leaves the catalog file untouched.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.lock()?;
        let mut catalog = self.read_catalog()?;
        let before = catalog.assets.len();
        catalog.assets.retain(|a| a.id != id);
        if catalog.assets.len() == before {
            return Ok(false);
        }
        self.write_catalog(&catalog)?;
        tracing::info!(%id, "deleted asset");
        Ok(true)
    }

    /// Serialize one record to portable JSON (without its id)
    pub fn export_one(&self, id: &str) -> Result<Option<String>> {
        match self.get(id)? {
            Some(asset) => Ok(Some(serde_json::to_string_pretty(&asset.draft)?)),
            None => Ok(None),
        }
    }

    /// Parse a portable record and store it under a freshly minted id.
    ///
    /// Malformed input yields `Ok(None)` and the catalog is not touched. Any
    /// `id` present in the input is ignored. The artifact path is not
    /// re-checked: a snapshot may come from another machine.
    pub fn import_one(&self, serialized: &str) -> Result<Option<SavedAsset>> {
        let draft: AssetDraft = match serde_json::from_str(serialized) {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!("rejected asset import: {}", e);
                return Ok(None);
            }
        };
        if draft.name.trim().is_empty() || draft.artifact_path.trim().is_empty() {
            tracing::warn!("rejected asset import: name and artifact_path are required");
            return Ok(None);
        }

        let _guard = self.lock()?;
        let mut catalog = self.read_catalog()?;
        let asset = SavedAsset {
            id: mint_id(&catalog),
            draft,
        };
        catalog.assets.push(asset.clone());
        self.write_catalog(&catalog)?;

        tracing::info!(id = %asset.id, name = %asset.name(), "imported asset");
        Ok(Some(asset))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.inner
            .write_lock
            .lock()
            .map_err(|_| KilnError::LibraryError("catalog lock poisoned".to_string()))
    }

    fn read_catalog(&self) -> Result<CatalogFile> {
        let path = &self.inner.path;
        if !path.exists() {
            return Ok(CatalogFile::default());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(CatalogFile::default());
        }
        serde_json::from_str(&content).map_err(|e| {
            KilnError::LibraryError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Rewrite the whole document through a temp file so readers never see
    /// a partial catalog.
    fn write_catalog(&self, catalog: &CatalogFile) -> Result<()> {
        write_document(&self.inner.path, &serde_json::to_string_pretty(catalog)?)
    }
}

fn mint_id(catalog: &CatalogFile) -> String {
    loop {
        let id = uuid::Uuid::new_v4().to_string();
        if !catalog.assets.iter().any(|a| a.id == id) {
            return id;
        }
    }
}

fn validate_draft(draft: &AssetDraft) -> Result<()> {
    if draft.name.trim().is_empty() {
        return Err(KilnError::ValidationError(
            "Asset name must not be empty".to_string(),
        ));
    }
    let path = draft.artifact_path.trim();
    if path.is_empty() {
        return Err(KilnError::ValidationError(
            "Asset artifact path must not be empty".to_string(),
        ));
    }
    if !is_remote_reference(path) && !Path::new(path).is_file() {
        return Err(KilnError::ValidationError(format!(
            "Artifact not found: {}",
            path
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetKind;
    use std::thread;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kiln_library_test_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_draft(dir: &Path) -> AssetDraft {
        let artifact = dir.join("tavern_chair.glb");
        fs::write(&artifact, b"glTF").unwrap();
        let mut draft = AssetDraft::new("tavern_chair", artifact.to_string_lossy());
        draft.description = "a sturdy oak chair".to_string();
        draft.kind = AssetKind::Model;
        draft.generation_parameters = serde_json::json!({
            "prompt": "a sturdy oak chair",
            "art_style": "realistic",
            "target_polycount": 30000
        });
        draft.tags.insert("furniture".to_string());
        draft.tags.insert("medieval".to_string());
        draft
    }

    #[test]
    fn test_save_and_get() {
        let dir = temp_dir();
        let library = AssetLibrary::open(dir.join("library.json"));

        let saved = library.save(sample_draft(&dir)).unwrap();
        assert!(!saved.id.is_empty());

        let loaded = library.get(&saved.id).unwrap().unwrap();
        assert_eq!(loaded, saved);

        // Persisted, visible through a fresh handle
        let reopened = AssetLibrary::open(dir.join("library.json"));
        assert_eq!(reopened.list().unwrap().len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let dir = temp_dir();
        let library = AssetLibrary::open(dir.join("library.json"));

        for name in ["zeta", "alpha", "mid"] {
            let draft = AssetDraft::new(name, "https://assets.example.com/x.glb");
            library.save(draft).unwrap();
        }

        let names: Vec<String> = library
            .list()
            .unwrap()
            .into_iter()
            .map(|a| a.draft.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_rejects_missing_local_artifact() {
        let dir = temp_dir();
        let library = AssetLibrary::open(dir.join("library.json"));

        let draft = AssetDraft::new("ghost", dir.join("missing.glb").to_string_lossy());
        let err = library.save(draft).unwrap_err();
        assert!(matches!(err, KilnError::ValidationError(_)));
        assert!(library.list().unwrap().is_empty());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let dir = temp_dir();
        let library = AssetLibrary::open(dir.join("library.json"));
        let saved = library.save(sample_draft(&dir)).unwrap();

        assert!(!library.delete("no-such-id").unwrap());
        assert_eq!(library.list().unwrap().len(), 1);

        assert!(library.delete(&saved.id).unwrap());
        assert!(library.get(&saved.id).unwrap().is_none());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_export_import_preserves_everything_but_id() {
        let dir = temp_dir();
        let library = AssetLibrary::open(dir.join("library.json"));
        let saved = library.save(sample_draft(&dir)).unwrap();

        let exported = library.export_one(&saved.id).unwrap().unwrap();
        let imported = library.import_one(&exported).unwrap().unwrap();

        assert_ne!(imported.id, saved.id);
        assert_eq!(imported.draft, saved.draft);
        assert_eq!(library.list().unwrap().len(), 2);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_float_parameters_survive_storage_and_export() {
        let dir = temp_dir();
        let library = AssetLibrary::open(dir.join("library.json"));
        let mut draft = sample_draft(&dir);
        draft.generation_parameters = serde_json::json!({
            "seed_scale": 985.6906946328695,
            "texture_richness": 0.1 + 0.2,
            "tiny": 5e-324,
            "huge": 1.7976931348623157e308
        });

        let saved = library.save(draft.clone()).unwrap();
        let reread = library.get(&saved.id).unwrap().unwrap();
        assert_eq!(reread.draft, draft);

        let exported = library.export_one(&saved.id).unwrap().unwrap();
        let imported = library.import_one(&exported).unwrap().unwrap();
        assert_eq!(imported.draft, draft);
        assert_eq!(
            library.get(&imported.id).unwrap().unwrap().draft.generation_parameters["seed_scale"],
            serde_json::json!(985.6906946328695)
        );

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_export_absent_returns_none() {
        let dir = temp_dir();
        let library = AssetLibrary::open(dir.join("library.json"));
        assert!(library.export_one("missing").unwrap().is_none());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_import_discards_embedded_id() {
        let dir = temp_dir();
        let library = AssetLibrary::open(dir.join("library.json"));

        let text = r#"{"id": "forged", "name": "lamp", "artifact_path": "https://a.example/lamp.glb"}"#;
        let imported = library.import_one(text).unwrap().unwrap();
        assert_ne!(imported.id, "forged");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_import_malformed_leaves_catalog_untouched() {
        let dir = temp_dir();
        let catalog_path = dir.join("library.json");
        let library = AssetLibrary::open(&catalog_path);
        library.save(sample_draft(&dir)).unwrap();
        let before = fs::read_to_string(&catalog_path).unwrap();

        assert!(library.import_one("not json at all").unwrap().is_none());
        assert!(library.import_one(r#"{"description": "no name"}"#).unwrap().is_none());
        assert!(library
            .import_one(r#"{"name": "", "artifact_path": "x.glb"}"#)
            .unwrap()
            .is_none());

        assert_eq!(fs::read_to_string(&catalog_path).unwrap(), before);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_by_tag() {
        let dir = temp_dir();
        let library = AssetLibrary::open(dir.join("library.json"));
        library.save(sample_draft(&dir)).unwrap();
        library
            .save(AssetDraft::new("rock", "https://a.example/rock.glb"))
            .unwrap();

        assert_eq!(library.by_tag("furniture").unwrap().len(), 1);
        assert!(library.by_tag("nonexistent").unwrap().is_empty());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_concurrent_saves_are_not_lost() {
        let dir = temp_dir();
        let library = AssetLibrary::open(dir.join("library.json"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let library = library.clone();
                thread::spawn(move || {
                    let draft =
                        AssetDraft::new(format!("asset_{}", i), "https://a.example/a.glb");
                    library.save(draft).unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let assets = library.list().unwrap();
        assert_eq!(assets.len(), 8);
        let mut ids: Vec<&str> = assets.iter().map(|a| a.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);

        fs::remove_dir_all(&dir).ok();
    }
}
