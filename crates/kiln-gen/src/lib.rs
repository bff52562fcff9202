//! Kiln Gen - Text-to-3D generation pipeline
//!
//! Drives a remote service through its two stages (a fast preview, then a
//! refine of that preview), polls each task on a fixed cadence, downloads the
//! finished artifact and reports progress as events. Also provides a
//! single-shot direct synthesis path through a text model.

pub mod config;
pub mod direct;
mod http;
pub mod job_log;
pub mod materialize;
pub mod orchestrator;
pub mod schedule;
pub mod service;
pub mod services;
pub mod task;
pub mod transcript;

pub use config::KilnConfig;
pub use direct::{ChatCompletionsModel, DirectSynthesizer, MeshDocument, TextModel};
pub use http::HttpFetcher;
pub use job_log::{JobLog, JobRecord, JobStatus};
pub use materialize::{LocalArtifact, Materializer};
pub use orchestrator::{
    ArtifactRef, CancelHandle, GenerationOutput, Orchestrator, OrchestratorConfig, Outcome,
    RequestEvent, RequestId, RequestPhase, Submission,
};
pub use schedule::{Clock, ManualClock, PollSchedule, SystemClock};
pub use service::{BinaryFetcher, GenerationService};
pub use task::{GenerationTask, Stage, TaskId, TaskReport, TaskStatus};
pub use transcript::Transcript;
