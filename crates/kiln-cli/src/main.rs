//! Kiln CLI - Text-to-3D asset generation from the command line

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{generate, job, library, synth, watch};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Generate 3D models from text prompts and keep them in a local library", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a model: preview, then refine, then download
    Generate {
        /// Text prompt (at most 600 characters)
        prompt: String,

        /// Asset name (defaults to the first words of the prompt)
        #[arg(long)]
        name: Option<String>,

        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,

        /// Generation service to use (meshy, mock)
        #[arg(long)]
        service: Option<String>,

        /// Save the finished model to the asset library
        #[arg(long)]
        save: bool,

        /// Keep the remote URL instead of downloading the model
        #[arg(long)]
        no_localize: bool,

        /// Output directory (defaults to .kiln/generated)
        #[arg(long)]
        output: Option<String>,
    },

    /// Asset library operations
    #[command(subcommand)]
    Library(library::LibraryCommands),

    /// Inspect the generation job log
    #[command(subcommand)]
    Job(job::JobCommands),

    /// Ask a text model for a mesh directly and write it as OBJ
    Synth {
        /// Text prompt
        prompt: String,

        /// Output OBJ path
        #[arg(short, long, default_value = "synth.obj")]
        output: String,
    },

    /// Report new artifacts as they land in the output directory
    Watch {
        /// Directory to watch (defaults to the configured output directory)
        dir: Option<String>,
    },
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("KILN_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            prompt,
            name,
            tags,
            service,
            save,
            no_localize,
            output,
        } => generate::run(generate::GenerateArgs {
            prompt,
            name,
            tags,
            service,
            save,
            no_localize,
            output,
        }),
        Commands::Library(cmd) => library::run(cmd),
        Commands::Job(cmd) => job::run(cmd),
        Commands::Synth { prompt, output } => synth::run(&prompt, &output),
        Commands::Watch { dir } => watch::run(dir.as_deref()),
    }
}
