//! Job log commands

use anyhow::Result;
use clap::Subcommand;
use kiln_gen::config::KilnConfig;
use kiln_gen::JobLog;

#[derive(Subcommand)]
pub enum JobCommands {
    /// List logged generation requests
    List,

    /// Show one logged request
    Show {
        /// Preview task id
        id: String,
    },

    /// Remove finished requests from the log
    Prune,
}

pub fn run(cmd: JobCommands) -> Result<()> {
    let config = KilnConfig::load()?;
    let log = JobLog::new(&config.storage.jobs);

    match cmd {
        JobCommands::List => {
            let jobs = log.list()?;
            if jobs.is_empty() {
                println!("No generation jobs found.");
                return Ok(());
            }

            println!("{} job(s):\n", jobs.len());
            for job in &jobs {
                println!(
                    "  {} ({}) {} {:?} {}% \"{}\"",
                    job.id, job.service, job.stage, job.status, job.progress, job.prompt
                );
            }
            Ok(())
        }
        JobCommands::Show { id } => {
            let Some(job) = log.get(&id)? else {
                anyhow::bail!("Job not found: {}", id);
            };
            println!("Job: {}", job.id);
            println!("  Service: {}", job.service);
            println!("  Prompt: {}", job.prompt);
            println!("  Stage: {}", job.stage);
            println!("  Status: {:?}", job.status);
            println!("  Progress: {}%", job.progress);
            println!("  Submitted: {} (unix)", job.submitted_at);
            if let Some(ref refine) = job.refine_task_id {
                println!("  Refine task: {}", refine);
            }
            if let Some(ref artifact) = job.artifact {
                println!("  Artifact: {}", artifact);
            }
            if let Some(ref err) = job.error {
                println!("  Error: {}", err);
            }
            Ok(())
        }
        JobCommands::Prune => {
            let removed = log.prune_finished()?;
            println!("Removed {} finished job(s).", removed);
            Ok(())
        }
    }
}
