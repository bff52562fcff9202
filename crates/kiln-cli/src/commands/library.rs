//! Asset library commands

use anyhow::{Context, Result};
use clap::Subcommand;
use kiln_core::ContentHash;
use kiln_gen::config::KilnConfig;
use kiln_library::{AssetLibrary, SavedAsset};

#[derive(Subcommand)]
pub enum LibraryCommands {
    /// List saved assets
    List {
        /// Filter by tag
        #[arg(long)]
        tag: Option<String>,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show one asset
    Show {
        /// Asset id
        id: String,
    },

    /// Delete an asset record (the artifact file is left in place)
    Delete {
        /// Asset id
        id: String,
    },

    /// Export an asset record as portable JSON
    Export {
        /// Asset id
        id: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Import an asset record exported elsewhere
    Import {
        /// Path to the exported JSON
        path: String,
    },
}

pub fn run(cmd: LibraryCommands) -> Result<()> {
    let config = KilnConfig::load()?;
    let library = AssetLibrary::open(&config.storage.library);

    match cmd {
        LibraryCommands::List { tag, format } => run_list(&library, tag.as_deref(), &format),
        LibraryCommands::Show { id } => run_show(&library, &id),
        LibraryCommands::Delete { id } => {
            if library.delete(&id)? {
                println!("Deleted asset {}", id);
            } else {
                println!("No asset with id {}", id);
            }
            Ok(())
        }
        LibraryCommands::Export { id, output } => {
            let Some(json) = library.export_one(&id)? else {
                anyhow::bail!("No asset with id {}", id);
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path))?;
                    println!("Exported asset {} to {}", id, path);
                }
                None => println!("{}", json),
            }
            Ok(())
        }
        LibraryCommands::Import { path } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path))?;
            match library.import_one(&content)? {
                Some(asset) => {
                    println!("Imported '{}' as {}", asset.name(), asset.id);
                    Ok(())
                }
                None => anyhow::bail!("{} is not a valid asset record", path),
            }
        }
    }
}

fn run_list(library: &AssetLibrary, tag: Option<&str>, format: &str) -> Result<()> {
    let assets = match tag {
        Some(tag) => library.by_tag(tag)?,
        None => library.list()?,
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&assets)?);
        return Ok(());
    }

    if assets.is_empty() {
        println!("No assets in {}", library.path().display());
        return Ok(());
    }
    println!("{} asset(s):\n", assets.len());
    for asset in &assets {
        println!("  {}", summary_line(asset));
    }
    Ok(())
}

fn run_show(library: &AssetLibrary, id: &str) -> Result<()> {
    let Some(asset) = library.get(id)? else {
        anyhow::bail!("No asset with id {}", id);
    };
    println!("Asset: {}", asset.name());
    println!("  Id: {}", asset.id);
    println!("  Kind: {}", asset.draft.kind);
    println!("  Artifact: {}", asset.artifact_path());
    if asset.draft.is_remote() {
        println!("  (remote URL; it may stop resolving once the service expires it)");
    } else if let Some(status) = integrity(&asset) {
        println!("  Integrity: {}", status);
    }
    if !asset.draft.description.is_empty() {
        println!("  Description: {}", asset.draft.description);
    }
    if !asset.draft.tags.is_empty() {
        let tags: Vec<&str> = asset.draft.tags.iter().map(String::as_str).collect();
        println!("  Tags: {}", tags.join(", "));
    }
    if !asset.draft.generation_parameters.is_null() {
        println!(
            "  Parameters: {}",
            serde_json::to_string_pretty(&asset.draft.generation_parameters)?
        );
    }
    Ok(())
}

/// Compare a local artifact against the hash recorded when it was downloaded
fn integrity(asset: &SavedAsset) -> Option<&'static str> {
    let recorded = asset
        .draft
        .generation_parameters
        .get("content_hash")
        .and_then(|v| v.as_str())
        .and_then(ContentHash::from_prefixed_hex)?;
    Some(match recorded.matches_file(asset.artifact_path()) {
        Ok(true) => "ok",
        Ok(false) => "modified since download",
        Err(_) => "file missing",
    })
}

fn summary_line(asset: &SavedAsset) -> String {
    let tags: Vec<&str> = asset.draft.tags.iter().map(String::as_str).collect();
    format!(
        "{} {} ({}) [{}]",
        asset.id,
        asset.name(),
        asset.draft.kind,
        tags.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_library::AssetDraft;

    #[test]
    fn test_summary_line() {
        let mut draft = AssetDraft::new("barrel", "https://cdn.example.com/b.glb");
        draft.tags.insert("wood".to_string());
        draft.tags.insert("prop".to_string());
        let asset = SavedAsset {
            id: "abc".to_string(),
            draft,
        };
        assert_eq!(summary_line(&asset), "abc barrel (model) [prop, wood]");
    }

    #[test]
    fn test_show_local_and_missing_assets() {
        let dir = std::env::temp_dir().join(format!("kiln_show_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let artifact = dir.join("lantern.glb");
        std::fs::write(&artifact, b"glTF").unwrap();

        let library = AssetLibrary::open(dir.join("library.json"));
        let mut draft = AssetDraft::new("lantern", artifact.to_str().unwrap());
        draft.generation_parameters = serde_json::json!({
            "content_hash": ContentHash::from_bytes(b"glTF").to_prefixed_hex(),
        });
        let saved = library.save(draft).unwrap();

        assert!(run_show(&library, &saved.id).is_ok());
        assert!(run_show(&library, "no-such-id").is_err());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_integrity() {
        let path = std::env::temp_dir().join(format!("kiln_integrity_{}.glb", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"glTF").unwrap();
        let mut draft = AssetDraft::new("crate", path.to_str().unwrap());
        let mut asset = SavedAsset {
            id: "x".to_string(),
            draft: draft.clone(),
        };
        assert_eq!(integrity(&asset), None);

        draft.generation_parameters = serde_json::json!({
            "content_hash": ContentHash::from_bytes(b"glTF").to_prefixed_hex(),
        });
        asset.draft = draft;
        assert_eq!(integrity(&asset), Some("ok"));

        std::fs::write(&path, b"glTF v2").unwrap();
        assert_eq!(integrity(&asset), Some("modified since download"));

        std::fs::remove_file(&path).ok();
        assert_eq!(integrity(&asset), Some("file missing"));
    }
}
