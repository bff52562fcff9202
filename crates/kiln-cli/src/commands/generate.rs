//! The `generate` command: one request driven to completion

use anyhow::Result;
use kiln_gen::config::KilnConfig;
use kiln_gen::orchestrator::derive_asset_name;
use kiln_gen::services::{create_fetcher, create_service};
use kiln_gen::{
    CancelHandle, GenerationOutput, JobLog, JobRecord, Materializer, Orchestrator,
    OrchestratorConfig, Outcome, Transcript,
};
use kiln_library::{AssetDraft, AssetKind, AssetLibrary};
use std::collections::BTreeSet;
use std::io::{IsTerminal, Write};

pub struct GenerateArgs {
    pub prompt: String,
    pub name: Option<String>,
    pub tags: Option<String>,
    pub service: Option<String>,
    pub save: bool,
    pub no_localize: bool,
    pub output: Option<String>,
}

pub fn run(args: GenerateArgs) -> Result<()> {
    let config = KilnConfig::load()?;
    let service_name = args
        .service
        .clone()
        .unwrap_or_else(|| config.generation.service.clone());
    let service = create_service(&service_name, &config)?;

    let prompt = args.prompt.trim().to_string();
    let asset_name = args
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| derive_asset_name(&prompt));

    let mut orchestrator = Orchestrator::new(service, OrchestratorConfig::from(&config.generation));
    if !args.no_localize {
        let output_dir = args
            .output
            .clone()
            .unwrap_or_else(|| config.generation.output_dir.clone());
        let materializer = Materializer::new(output_dir, create_fetcher(&service_name, &config))
            .with_default_extension(&config.generation.artifact_format);
        orchestrator = orchestrator.with_materializer(materializer);
    }

    println!("Generating '{}' via {}...", asset_name, service_name);
    let submission = orchestrator.submit_named(&prompt, &asset_name)?;
    println!("  Preview task: {}", submission.task_id);

    let jobs = JobLog::new(&config.storage.jobs);
    let mut record = JobRecord::new(&submission.task_id, &prompt, &service_name);
    if let Err(e) = jobs.record(&record) {
        tracing::warn!("could not update job log: {}", e);
    }

    spawn_cancel_listener(submission.cancel.clone());

    let live = std::io::stdout().is_terminal();
    let mut transcript = Transcript::new();
    transcript.begin(submission.request, &prompt);
    let outcome = orchestrator.run_until_done(submission.request, |event| {
        if let Some(line) = transcript.apply(event) {
            render_line(line, live && !event.is_terminal());
        }
        record.apply(event);
        if let Err(e) = jobs.record(&record) {
            tracing::warn!("could not update job log: {}", e);
        }
    })?;

    match outcome {
        Outcome::Succeeded(output) => {
            println!("  Artifact: {}", output.artifact);
            if let Some(thumbnail) = &output.thumbnail {
                println!("  Thumbnail: {}", thumbnail);
            }
            if args.save {
                let draft = build_draft(&asset_name, &service_name, parse_tags(args.tags.as_deref()), &output, &config);
                let library = AssetLibrary::open(&config.storage.library);
                let saved = library.save(draft)?;
                println!("  Saved to library: {}", saved.id);
            }
            Ok(())
        }
        Outcome::Failed { stage, reason } => {
            anyhow::bail!("Generation failed during {} stage: {}", stage, reason)
        }
        Outcome::Cancelled { stage } => {
            println!("  Cancelled during {} stage; the remote task was left to finish on its own.", stage);
            Ok(())
        }
    }
}

/// Progress lines overwrite each other on a terminal; anything else gets
/// one line per update.
fn render_line(line: &str, in_place: bool) {
    let mut stdout = std::io::stdout();
    if in_place {
        let _ = write!(stdout, "\r\x1b[2K  {}", line);
        let _ = stdout.flush();
    } else if std::io::stdout().is_terminal() {
        let _ = writeln!(stdout, "\r\x1b[2K  {}", line);
    } else {
        let _ = writeln!(stdout, "  {}", line);
    }
}

/// Enter on an interactive stdin cancels the request
fn spawn_cancel_listener(cancel: CancelHandle) {
    if !std::io::stdin().is_terminal() {
        return;
    }
    println!("  (press Enter to cancel)");
    std::thread::spawn(move || {
        let mut line = String::new();
        if let Ok(n) = std::io::stdin().read_line(&mut line) {
            if n > 0 {
                cancel.cancel();
            }
        }
    });
}

pub(crate) fn parse_tags(tags: Option<&str>) -> BTreeSet<String> {
    tags.map(|t| {
        t.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Library record for a finished generation
pub(crate) fn build_draft(
    name: &str,
    service: &str,
    tags: BTreeSet<String>,
    output: &GenerationOutput,
    config: &KilnConfig,
) -> AssetDraft {
    let generation = &config.generation;
    let mut params = serde_json::json!({
        "service": service,
        "prompt": output.prompt,
        "art_style": generation.art_style,
        "topology": generation.topology,
        "target_polycount": generation.target_polycount,
        "enable_pbr": generation.enable_pbr,
        "preview_task_id": output.preview_task_id.as_str(),
        "refine_task_id": output.refine_task_id.as_str(),
    });
    if let Some(thumbnail) = &output.thumbnail {
        params["thumbnail_url"] = serde_json::json!(thumbnail);
    }
    if let kiln_gen::ArtifactRef::Local { content_hash, .. } = &output.artifact {
        params["content_hash"] = serde_json::json!(content_hash.to_prefixed_hex());
    }

    AssetDraft {
        name: name.to_string(),
        description: output.prompt.clone(),
        kind: AssetKind::Model,
        generation_parameters: params,
        tags,
        artifact_path: output.artifact.as_reference(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_gen::{ArtifactRef, TaskId};

    fn output(artifact: ArtifactRef) -> GenerationOutput {
        GenerationOutput {
            artifact,
            thumbnail: Some("https://cdn.example.com/t.png".to_string()),
            prompt: "a weathered oak barrel".to_string(),
            preview_task_id: TaskId::new("p-1"),
            refine_task_id: TaskId::new("r-1"),
        }
    }

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags(Some("prop, wood,,  barrel "));
        assert_eq!(
            tags.into_iter().collect::<Vec<_>>(),
            vec!["barrel", "prop", "wood"]
        );
        assert!(parse_tags(None).is_empty());
    }

    #[test]
    fn test_build_draft_remote() {
        let out = output(ArtifactRef::Remote {
            url: "https://cdn.example.com/r-1.glb".to_string(),
        });
        let draft = build_draft("barrel", "meshy", parse_tags(Some("prop")), &out, &KilnConfig::default());

        assert_eq!(draft.name, "barrel");
        assert_eq!(draft.kind, AssetKind::Model);
        assert_eq!(draft.artifact_path, "https://cdn.example.com/r-1.glb");
        assert!(draft.is_remote());
        assert_eq!(draft.generation_parameters["preview_task_id"], "p-1");
        assert_eq!(draft.generation_parameters["service"], "meshy");
        assert_eq!(draft.generation_parameters["target_polycount"], 30000);
        assert!(draft.generation_parameters.get("content_hash").is_none());
    }

    #[test]
    fn test_built_draft_saves_to_library() {
        let dir = std::env::temp_dir().join(format!("kiln_cli_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let artifact = dir.join("barrel.glb");
        std::fs::write(&artifact, b"glTF").unwrap();

        let out = output(ArtifactRef::Local {
            path: artifact.clone(),
            content_hash: kiln_core::ContentHash::from_bytes(b"glTF"),
        });
        let draft = build_draft("barrel", "mock", BTreeSet::new(), &out, &KilnConfig::default());
        assert!(draft.generation_parameters["content_hash"]
            .as_str()
            .unwrap()
            .starts_with("sha256:"));

        let library = AssetLibrary::open(dir.join("library.json"));
        let saved = library.save(draft.clone()).unwrap();
        assert_eq!(library.get(&saved.id).unwrap().unwrap().draft, draft);

        std::fs::remove_dir_all(&dir).ok();
    }
}
