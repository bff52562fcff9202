//! Two-stage generation orchestration
//!
//! A request moves through a preview task and then a refine task on the
//! remote service. Each request owns at most one `PollSchedule`; `tick()`
//! fires whichever schedules are due and applies the responses. Everything
//! runs on the caller's thread, and the only suspension points are the
//! service calls and the artifact download. After each of those the request
//! is re-checked, so a response that lands after cancellation is dropped.

use crate::config::GenerationConfig;
use crate::materialize::Materializer;
use crate::schedule::{Clock, PollSchedule, ScheduleId, SystemClock};
use crate::service::GenerationService;
use crate::task::{
    validate_prompt, CreateTask, GenerationTask, PreviewParams, RefineParams, Stage, TaskId,
    TaskReport, TaskStatus,
};
use kiln_core::{ContentHash, KilnError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifies one logical request within an orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Cooperative cancellation flag for one request.
///
/// Safe to trip from another thread; the orchestrator notices on its next
/// tick or when the in-flight call returns.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where the finished artifact lives
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactRef {
    /// Downloaded into the output directory
    Local {
        path: PathBuf,
        content_hash: ContentHash,
    },
    /// Download failed or was disabled; the service URL is all we have
    Remote { url: String },
}

impl ArtifactRef {
    pub fn is_local(&self) -> bool {
        matches!(self, ArtifactRef::Local { .. })
    }

    /// Path or URL suitable for storing in the asset library
    pub fn as_reference(&self) -> String {
        match self {
            ArtifactRef::Local { path, .. } => path.to_string_lossy().to_string(),
            ArtifactRef::Remote { url } => url.clone(),
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_reference())
    }
}

/// Terminal output of a successful request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub artifact: ArtifactRef,
    pub thumbnail: Option<String>,
    pub prompt: String,
    pub preview_task_id: TaskId,
    pub refine_task_id: TaskId,
}

/// How a request ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(GenerationOutput),
    Failed { stage: Stage, reason: String },
    Cancelled { stage: Stage },
}

/// Per-request state machine
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPhase {
    Idle,
    PreviewPending,
    PreviewInProgress,
    PreviewSucceeded,
    RefinePending,
    RefineInProgress,
    Done(Outcome),
}

impl RequestPhase {
    pub fn is_done(&self) -> bool {
        matches!(self, RequestPhase::Done(_))
    }

    fn in_flight(stage: Stage, status: TaskStatus) -> Self {
        match (stage, status) {
            (Stage::Preview, TaskStatus::Pending) => RequestPhase::PreviewPending,
            (Stage::Preview, _) => RequestPhase::PreviewInProgress,
            (Stage::Refine, TaskStatus::Pending) => RequestPhase::RefinePending,
            (Stage::Refine, _) => RequestPhase::RefineInProgress,
        }
    }
}

/// Something the caller should hear about
#[derive(Debug, Clone, PartialEq)]
pub enum RequestEvent {
    Progress {
        request: RequestId,
        stage: Stage,
        status: TaskStatus,
        progress: u8,
    },
    Chained {
        request: RequestId,
        preview_task_id: TaskId,
        refine_task_id: TaskId,
    },
    Completed {
        request: RequestId,
        output: GenerationOutput,
    },
    Failed {
        request: RequestId,
        stage: Stage,
        reason: String,
    },
    Cancelled {
        request: RequestId,
        stage: Stage,
    },
}

impl RequestEvent {
    pub fn request(&self) -> RequestId {
        match self {
            RequestEvent::Progress { request, .. }
            | RequestEvent::Chained { request, .. }
            | RequestEvent::Completed { request, .. }
            | RequestEvent::Failed { request, .. }
            | RequestEvent::Cancelled { request, .. } => *request,
        }
    }

    /// Completed, Failed and Cancelled end a request; each request emits
    /// exactly one of them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestEvent::Completed { .. }
                | RequestEvent::Failed { .. }
                | RequestEvent::Cancelled { .. }
        )
    }
}

/// Tunables for the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub art_style: String,
    pub topology: String,
    pub target_polycount: u32,
    pub enable_pbr: bool,
    /// Preferred artifact format among the refine task's outputs
    pub artifact_format: String,
    pub stage_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        (&GenerationConfig::default()).into()
    }
}

impl From<&GenerationConfig> for OrchestratorConfig {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            art_style: config.art_style.clone(),
            topology: config.topology.clone(),
            target_polycount: config.target_polycount,
            enable_pbr: config.enable_pbr,
            artifact_format: config.artifact_format.clone(),
            stage_timeout: config.stage_timeout(),
        }
    }
}

/// One logical request and everything the orchestrator knows about it
#[derive(Debug)]
pub struct GenerationRequest {
    id: RequestId,
    suggested_name: String,
    phase: RequestPhase,
    preview: GenerationTask,
    refine: Option<GenerationTask>,
    schedule: Option<PollSchedule>,
    cancel: CancelHandle,
    stage_started: Instant,
}

impl GenerationRequest {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.preview.prompt
    }

    pub fn suggested_name(&self) -> &str {
        &self.suggested_name
    }

    pub fn phase(&self) -> &RequestPhase {
        &self.phase
    }

    pub fn preview(&self) -> &GenerationTask {
        &self.preview
    }

    pub fn refine(&self) -> Option<&GenerationTask> {
        self.refine.as_ref()
    }

    /// The armed polling schedule, if the request is waiting on a task
    pub fn schedule(&self) -> Option<&PollSchedule> {
        self.schedule.as_ref()
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// The task being tracked right now: refine once it exists, else preview
    pub fn current_task(&self) -> &GenerationTask {
        self.refine.as_ref().unwrap_or(&self.preview)
    }

    fn current_task_mut(&mut self) -> &mut GenerationTask {
        self.refine.as_mut().unwrap_or(&mut self.preview)
    }

    fn owns_task(&self, task_id: &TaskId) -> bool {
        self.preview.id == *task_id || self.refine.as_ref().map(|t| &t.id) == Some(task_id)
    }
}

/// Returned by `submit`
#[derive(Debug, Clone)]
pub struct Submission {
    pub request: RequestId,
    /// Id of the preview task the service created
    pub task_id: TaskId,
    pub cancel: CancelHandle,
}

/// Drives requests through preview and refine
pub struct Orchestrator<C: Clock = SystemClock> {
    service: Box<dyn GenerationService>,
    materializer: Option<Materializer>,
    clock: C,
    config: OrchestratorConfig,
    requests: BTreeMap<RequestId, GenerationRequest>,
    terminal_reports: HashMap<TaskId, TaskReport>,
    events: Vec<RequestEvent>,
    next_request: u64,
    next_schedule: u64,
}

impl Orchestrator<SystemClock> {
    pub fn new(service: Box<dyn GenerationService>, config: OrchestratorConfig) -> Self {
        Self::with_clock(service, config, SystemClock)
    }
}

impl<C: Clock> Orchestrator<C> {
    pub fn with_clock(service: Box<dyn GenerationService>, config: OrchestratorConfig, clock: C) -> Self {
        Self {
            service,
            materializer: None,
            clock,
            config,
            requests: BTreeMap::new(),
            terminal_reports: HashMap::new(),
            events: Vec::new(),
            next_request: 1,
            next_schedule: 1,
        }
    }

    /// Download finished artifacts with this materializer. Without one the
    /// output always carries the remote URL.
    pub fn with_materializer(mut self, materializer: Materializer) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start a request, naming the local artifact after the prompt
    pub fn submit(&mut self, prompt: &str) -> Result<Submission> {
        let name = derive_asset_name(prompt);
        self.submit_named(prompt, &name)
    }

    /// Create the preview task and arm its schedule
    pub fn submit_named(&mut self, prompt: &str, suggested_name: &str) -> Result<Submission> {
        validate_prompt(prompt)?;
        let prompt = prompt.trim();

        let create = CreateTask::Preview(PreviewParams {
            prompt: prompt.to_string(),
            art_style: self.config.art_style.clone(),
            topology: self.config.topology.clone(),
            target_polycount: self.config.target_polycount,
        });
        let task_id = self.service.create(&create).map_err(|e| match e {
            KilnError::ConfigurationError(_) => e,
            other => KilnError::ServiceUnavailable(other.to_string()),
        })?;

        let now = self.clock.now();
        let id = RequestId(self.next_request);
        self.next_request += 1;
        let schedule = self.arm_schedule(now);
        let cancel = CancelHandle::default();

        let mut request = GenerationRequest {
            id,
            suggested_name: suggested_name.to_string(),
            phase: RequestPhase::Idle,
            preview: GenerationTask::preview(task_id.clone(), prompt),
            refine: None,
            schedule: None,
            cancel: cancel.clone(),
            stage_started: now,
        };
        request.phase = RequestPhase::PreviewPending;
        request.schedule = Some(schedule);

        tracing::info!(request = %id, task = %task_id, service = self.service.name(), "submitted preview task");
        self.requests.insert(id, request);

        Ok(Submission {
            request: id,
            task_id,
            cancel,
        })
    }

    /// Fetch a task's status directly.
    ///
    /// A task that already reached a terminal status is answered from the
    /// cached report without another remote call. If the task belongs to an
    /// active request the response is applied exactly as a scheduled poll
    /// would apply it. Transport failures surface as `ServiceError` here.
    pub fn poll(&mut self, task_id: &TaskId) -> Result<TaskReport> {
        if let Some(report) = self.terminal_reports.get(task_id) {
            return Ok(report.clone());
        }

        let report = self.service.status(task_id).map_err(|e| match e {
            KilnError::TransportError(message) => KilnError::ServiceError {
                status: None,
                message,
            },
            other => other,
        })?;

        if report.status.is_terminal() {
            self.terminal_reports
                .insert(task_id.clone(), report.clone());
        }
        if let Some(id) = self.request_for_task(task_id) {
            if self.still_current(id, task_id) {
                self.apply_report(id, report.clone());
            }
        }
        Ok(report)
    }

    /// Fire every due schedule once. Returns how many polls were made.
    pub fn tick(&mut self) -> usize {
        let now = self.clock.now();
        let ids: Vec<RequestId> = self
            .requests
            .iter()
            .filter(|(_, r)| !r.phase.is_done())
            .map(|(id, _)| *id)
            .collect();

        let mut polled = 0;
        for id in ids {
            let Some(request) = self.requests.get(&id) else {
                continue;
            };
            if request.cancel.is_cancelled() {
                self.finalize_cancel(id);
                continue;
            }

            let stage = request.current_task().stage;
            if let Some(timeout) = self.config.stage_timeout {
                if now.saturating_duration_since(request.stage_started) >= timeout {
                    let reason = KilnError::Timeout(format!(
                        "{} stage had no terminal status after {}s",
                        stage,
                        timeout.as_secs()
                    ));
                    self.fail(id, stage, reason.to_string());
                    continue;
                }
            }

            let due = request
                .schedule
                .as_ref()
                .map(|s| s.is_due(now))
                .unwrap_or(false);
            if due {
                self.poll_scheduled(id, now);
                polled += 1;
            }
        }
        polled
    }

    /// Cancel a request. Returns false if it was unknown or already done.
    ///
    /// The remote task keeps running; we just stop listening.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        self.finalize_cancel(id)
    }

    /// Take all events produced since the last drain
    pub fn drain_events(&mut self) -> Vec<RequestEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn request(&self, id: RequestId) -> Option<&GenerationRequest> {
        self.requests.get(&id)
    }

    pub fn requests(&self) -> impl Iterator<Item = &GenerationRequest> {
        self.requests.values()
    }

    /// Number of armed schedules across all requests
    pub fn active_schedules(&self) -> usize {
        self.requests
            .values()
            .filter(|r| r.schedule.is_some())
            .count()
    }

    /// Earliest instant any armed schedule wants to fire
    pub fn next_deadline(&self) -> Option<Instant> {
        self.requests
            .values()
            .filter_map(|r| r.schedule.as_ref())
            .map(|s| s.next_deadline())
            .min()
    }

    /// Drive one request to its end, handing every event to `on_event`
    pub fn run_until_done<F>(&mut self, id: RequestId, mut on_event: F) -> Result<Outcome>
    where
        F: FnMut(&RequestEvent),
    {
        loop {
            self.tick();
            for event in self.drain_events() {
                on_event(&event);
            }

            let request = self
                .requests
                .get(&id)
                .ok_or_else(|| KilnError::NotFound(id.to_string()))?;
            if let RequestPhase::Done(outcome) = &request.phase {
                return Ok(outcome.clone());
            }

            let deadline = request
                .schedule
                .as_ref()
                .map(|s| s.next_deadline())
                .ok_or_else(|| {
                    KilnError::ServiceError {
                        status: None,
                        message: format!("{} is active without a polling schedule", id),
                    }
                })?;
            self.clock.sleep_until(deadline);
        }
    }

    fn arm_schedule(&mut self, now: Instant) -> PollSchedule {
        let id = ScheduleId(self.next_schedule);
        self.next_schedule += 1;
        PollSchedule::arm(id, self.config.poll_interval, now)
    }

    fn request_for_task(&self, task_id: &TaskId) -> Option<RequestId> {
        self.requests
            .values()
            .find(|r| r.owns_task(task_id))
            .map(|r| r.id)
    }

    fn poll_scheduled(&mut self, id: RequestId, now: Instant) {
        let task_id = {
            let Some(request) = self.requests.get_mut(&id) else {
                return;
            };
            if let Some(schedule) = request.schedule.as_mut() {
                schedule.fire(now);
            }
            request.current_task().id.clone()
        };

        tracing::debug!(request = %id, task = %task_id, "polling");
        let result = self.service.status(&task_id);

        if !self.still_current(id, &task_id) {
            tracing::debug!(request = %id, task = %task_id, "discarding response for inactive request");
            return;
        }
        match result {
            Ok(report) => self.apply_report(id, report),
            Err(e) if e.is_transient() => {
                tracing::warn!(request = %id, task = %task_id, "poll failed, retrying next tick: {}", e);
            }
            Err(e) => {
                let stage = self.stage_of(id);
                self.fail(id, stage, e.to_string());
            }
        }
    }

    /// Active-request check, run after every suspension point
    fn still_current(&mut self, id: RequestId, task_id: &TaskId) -> bool {
        let Some(request) = self.requests.get(&id) else {
            return false;
        };
        if request.phase.is_done() {
            return false;
        }
        if request.cancel.is_cancelled() {
            self.finalize_cancel(id);
            return false;
        }
        request.current_task().id == *task_id
    }

    fn stage_of(&self, id: RequestId) -> Stage {
        self.requests
            .get(&id)
            .map(|r| r.current_task().stage)
            .unwrap_or(Stage::Preview)
    }

    fn apply_report(&mut self, id: RequestId, report: TaskReport) {
        let Some(request) = self.requests.get_mut(&id) else {
            return;
        };
        let task = request.current_task_mut();
        let stage = task.stage;
        if report.id != task.id {
            let reason = KilnError::ParseError(format!(
                "status response for {} while tracking {}",
                report.id, task.id
            ));
            self.fail(id, stage, reason.to_string());
            return;
        }

        task.apply(&report);
        let progress = task.progress;
        let status = report.status;
        if status.is_terminal() {
            self.terminal_reports
                .insert(report.id.clone(), report.clone());
        }
        if !status.is_terminal() {
            request.phase = RequestPhase::in_flight(stage, status);
        }
        self.events.push(RequestEvent::Progress {
            request: id,
            stage,
            status,
            progress,
        });

        match (status, stage) {
            (TaskStatus::Pending | TaskStatus::InProgress, _) => {}
            (TaskStatus::Succeeded, Stage::Preview) => self.chain(id),
            (TaskStatus::Succeeded, Stage::Refine) => self.finish(id, &report),
            (TaskStatus::Failed, _) => {
                let reason = report
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{} task failed", stage));
                self.fail(id, stage, reason);
            }
        }
    }

    /// Preview succeeded: drop its schedule, create the refine task, then
    /// arm the refine schedule.
    fn chain(&mut self, id: RequestId) {
        let params = {
            let Some(request) = self.requests.get_mut(&id) else {
                return;
            };
            request.phase = RequestPhase::PreviewSucceeded;
            request.schedule = None;
            RefineParams {
                preceding_task_id: request.preview.id.clone(),
                enable_pbr: self.config.enable_pbr,
            }
        };

        tracing::info!(request = %id, preview = %params.preceding_task_id, "preview succeeded, creating refine task");
        let result = self.service.create(&CreateTask::Refine(params));

        let cancelled = self
            .requests
            .get(&id)
            .map(|r| r.cancel.is_cancelled())
            .unwrap_or(true);
        if cancelled {
            if let Ok(refine_id) = &result {
                tracing::info!(request = %id, task = %refine_id, "ignoring refine task created after cancellation");
            }
            self.finalize_cancel(id);
            return;
        }

        let refine_id = match result {
            Ok(refine_id) => refine_id,
            Err(e) => {
                self.fail(id, Stage::Refine, format!("could not create refine task: {}", e));
                return;
            }
        };

        let now = self.clock.now();
        let schedule = self.arm_schedule(now);
        let Some(request) = self.requests.get_mut(&id) else {
            return;
        };
        let refine = match GenerationTask::refine(refine_id.clone(), &request.preview) {
            Ok(task) => task,
            Err(e) => {
                self.fail(id, Stage::Refine, e.to_string());
                return;
            }
        };

        let preview_task_id = request.preview.id.clone();
        request.refine = Some(refine);
        request.phase = RequestPhase::RefinePending;
        request.stage_started = now;
        request.schedule = Some(schedule);

        tracing::info!(request = %id, task = %refine_id, "refine task created");
        self.events.push(RequestEvent::Chained {
            request: id,
            preview_task_id,
            refine_task_id: refine_id,
        });
    }

    /// Refine succeeded: localize the artifact and complete the request
    fn finish(&mut self, id: RequestId, report: &TaskReport) {
        let (name, prompt, preview_task_id, refine_task_id) = {
            let Some(request) = self.requests.get_mut(&id) else {
                return;
            };
            request.schedule = None;
            (
                request.suggested_name.clone(),
                request.preview.prompt.clone(),
                request.preview.id.clone(),
                request.current_task().id.clone(),
            )
        };

        let Some(url) = report
            .artifact_url(&self.config.artifact_format)
            .map(|u| u.to_string())
        else {
            let reason = KilnError::ParseError("refine succeeded without an artifact URL".to_string());
            self.fail(id, Stage::Refine, reason.to_string());
            return;
        };

        let artifact = match &self.materializer {
            Some(materializer) => match materializer.localize(&url, &name) {
                Ok(local) => ArtifactRef::Local {
                    path: local.path,
                    content_hash: local.content_hash,
                },
                Err(e) => {
                    tracing::warn!(request = %id, %url, "keeping remote artifact URL, download failed: {}", e);
                    ArtifactRef::Remote { url }
                }
            },
            None => ArtifactRef::Remote { url },
        };

        let Some(request) = self.requests.get_mut(&id) else {
            return;
        };
        if request.cancel.is_cancelled() {
            self.finalize_cancel(id);
            return;
        }

        let output = GenerationOutput {
            artifact,
            thumbnail: report.thumbnail_url.clone(),
            prompt,
            preview_task_id,
            refine_task_id,
        };
        request.phase = RequestPhase::Done(Outcome::Succeeded(output.clone()));

        tracing::info!(request = %id, artifact = %output.artifact, "generation complete");
        self.events.push(RequestEvent::Completed { request: id, output });
    }

    fn fail(&mut self, id: RequestId, stage: Stage, reason: String) {
        let Some(request) = self.requests.get_mut(&id) else {
            return;
        };
        if request.phase.is_done() {
            return;
        }
        request.schedule = None;
        let task = match stage {
            Stage::Preview => Some(&mut request.preview),
            Stage::Refine => request.refine.as_mut(),
        };
        if let Some(task) = task {
            task.status = TaskStatus::Failed;
        }
        request.phase = RequestPhase::Done(Outcome::Failed {
            stage,
            reason: reason.clone(),
        });

        tracing::warn!(request = %id, %stage, "generation failed: {}", reason);
        self.events.push(RequestEvent::Failed {
            request: id,
            stage,
            reason,
        });
    }

    fn finalize_cancel(&mut self, id: RequestId) -> bool {
        let Some(request) = self.requests.get_mut(&id) else {
            return false;
        };
        if request.phase.is_done() {
            return false;
        }
        request.cancel.cancel();
        request.schedule = None;
        let stage = match (&request.phase, &request.refine) {
            (RequestPhase::PreviewSucceeded, _) | (_, Some(_)) => Stage::Refine,
            _ => Stage::Preview,
        };
        request.phase = RequestPhase::Done(Outcome::Cancelled { stage });

        tracing::info!(request = %id, %stage, "request cancelled");
        self.events.push(RequestEvent::Cancelled { request: id, stage });
        true
    }
}

/// Short snake_case name from the first words of a prompt
pub fn derive_asset_name(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != '_', "")
}
