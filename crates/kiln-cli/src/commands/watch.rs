//! The `watch` command: report artifacts as they appear

use anyhow::{Context, Result};
use kiln_core::ContentHash;
use kiln_gen::config::KilnConfig;
use notify_debouncer_mini::{new_debouncer, notify::RecursiveMode};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

const ARTIFACT_EXTENSIONS: &[&str] = &["glb", "gltf", "fbx", "obj", "usdz", "stl"];

pub fn run(dir: Option<&str>) -> Result<()> {
    let config = KilnConfig::load()?;
    let dir = PathBuf::from(dir.unwrap_or(config.generation.output_dir.as_str()));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let (tx, rx) = mpsc::channel();
    let mut debouncer =
        new_debouncer(Duration::from_millis(500), tx).context("Failed to create file watcher")?;
    debouncer
        .watcher()
        .watch(&dir, RecursiveMode::NonRecursive)
        .context("Failed to watch output directory")?;

    println!("Watching {} for new artifacts (Ctrl-C to stop)...", dir.display());

    let mut seen: HashSet<PathBuf> = HashSet::new();
    for result in rx {
        match result {
            Ok(events) => {
                for event in events {
                    if !is_artifact(&event.path) || !seen.insert(event.path.clone()) {
                        continue;
                    }
                    match ContentHash::from_file(&event.path) {
                        Ok(hash) => println!("  New artifact: {} ({})", event.path.display(), hash.short()),
                        Err(e) => tracing::warn!(path = %event.path.display(), "could not hash artifact: {}", e),
                    }
                }
            }
            Err(e) => tracing::warn!("watch error: {:?}", e),
        }
    }
    Ok(())
}

/// Published artifact files; hidden temp files are skipped
fn is_artifact(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true);
    let known = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| ARTIFACT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    !hidden && known && path.is_file()
}
