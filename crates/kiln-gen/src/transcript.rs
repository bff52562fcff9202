//! User-facing progress transcript
//!
//! Keeps one line per request. Progress updates replace the line in place;
//! the first terminal event freezes it and anything after is ignored.

use crate::orchestrator::{RequestEvent, RequestId};
use crate::task::TaskStatus;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
struct Line {
    text: String,
    finished: bool,
}

/// Projection of request events into human-readable status lines
#[derive(Debug, Default)]
pub struct Transcript {
    lines: BTreeMap<RequestId, Line>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a line for a freshly submitted request
    pub fn begin(&mut self, request: RequestId, prompt: &str) {
        self.lines.insert(
            request,
            Line {
                text: format!("Submitted: {}", prompt),
                finished: false,
            },
        );
    }

    /// Fold an event into the transcript.
    ///
    /// Returns the new line text when it changed, `None` when the event was
    /// dropped because the request already finished.
    pub fn apply(&mut self, event: &RequestEvent) -> Option<&str> {
        let line = self.lines.entry(event.request()).or_insert_with(|| Line {
            text: String::new(),
            finished: false,
        });
        if line.finished {
            return None;
        }
        line.text = describe(event);
        line.finished = event.is_terminal();
        Some(&line.text)
    }

    pub fn line(&self, request: RequestId) -> Option<&str> {
        self.lines.get(&request).map(|l| l.text.as_str())
    }

    pub fn is_finished(&self, request: RequestId) -> bool {
        self.lines.get(&request).map(|l| l.finished).unwrap_or(false)
    }

    pub fn lines(&self) -> impl Iterator<Item = (RequestId, &str)> {
        self.lines.iter().map(|(id, l)| (*id, l.text.as_str()))
    }
}

/// One-line description of an event
pub fn describe(event: &RequestEvent) -> String {
    match event {
        RequestEvent::Progress {
            stage,
            status: TaskStatus::InProgress,
            progress,
            ..
        } => format!("{}: in progress ({}%)", capitalize(&stage.to_string()), progress),
        RequestEvent::Progress { stage, status, .. } => {
            format!("{}: {}", capitalize(&stage.to_string()), status)
        }
        RequestEvent::Chained { refine_task_id, .. } => {
            format!("Preview done, refining ({})", refine_task_id)
        }
        RequestEvent::Completed { output, .. } => format!("Done: {}", output.artifact),
        RequestEvent::Failed { stage, reason, .. } => {
            format!("Failed during {}: {}", stage, reason)
        }
        RequestEvent::Cancelled { stage, .. } => format!("Cancelled during {}", stage),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
