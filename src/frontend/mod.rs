//! Collaborators the pipeline reports to.
//!
//! - [`EventBus`]: fire-and-forget lifecycle notifications
//! - [`ViewController`]: workspace view switches
//! - [`ProgressSink`]: progress bar, alerts and run statistics
//!
//! The pipeline only ever talks to these through a [`Frontend`] bundle, so a
//! headless run ([`LogFrontend`]) and a test run ([`Recorder`]) see exactly
//! the same calls.

mod log;
mod recorder;

pub use log::LogFrontend;
pub use recorder::{Record, Recorder};

use crate::model::{ItemId, PreviewMode, Stage, View};
use crate::pipeline::StageTimings;
use crate::worker::CodeKind;
use std::sync::Arc;

/// Lifecycle notification.
///
/// For a given run, `StageBegin` always precedes `StageEnd` / `StageError`.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StageBegin(Stage),
    StageEnd(Stage),
    StageError { stage: Stage, reason: String },
    /// One item of a SLICE run finished
    ItemDone { stage: Stage, id: ItemId },
    /// A stage was requested with no eligible items
    NothingToProcess(Stage),
    /// Repeated preview request advanced the display mode
    PreviewModeChanged(PreviewMode),
    /// Export handed off to the encoder
    ExportReady,
    /// Worker restarted on user request
    Cancelled,
    CodeLoad(CodeKind),
    CodeLoaded(CodeKind),
}

impl PipelineEvent {
    /// Dotted event name, e.g. `slice.begin`.
    pub fn name(&self) -> String {
        match self {
            PipelineEvent::StageBegin(stage) => format!("{}.begin", stage),
            PipelineEvent::StageEnd(stage) => format!("{}.end", stage),
            PipelineEvent::StageError { stage, .. } => format!("{}.error", stage),
            PipelineEvent::ItemDone { stage, .. } => format!("{}.item", stage),
            PipelineEvent::NothingToProcess(stage) => format!("{}.empty", stage),
            PipelineEvent::PreviewModeChanged(_) => "preview.mode".to_string(),
            PipelineEvent::ExportReady => "function.export".to_string(),
            PipelineEvent::Cancelled => "function.cancel".to_string(),
            PipelineEvent::CodeLoad(_) => "code.load".to_string(),
            PipelineEvent::CodeLoaded(_) => "code.loaded".to_string(),
        }
    }
}

/// Sink for lifecycle notifications.
pub trait EventBus: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Switches the workspace view.
pub trait ViewController: Send + Sync {
    fn set_view(&self, view: View);
}

/// Progress bar and user messages.
pub trait ProgressSink: Send + Sync {
    /// Overall completion fraction in `[0, 1]`; `0` clears the bar.
    fn progress(&self, fraction: f64, message: Option<&str>);

    /// Show a user-visible message.
    fn alert(&self, message: &str);

    /// Segment timings of a finished run.
    fn stats(&self, _timings: &StageTimings) {}
}

/// The set of collaborators a controller reports to.
#[derive(Clone)]
pub struct Frontend {
    pub events: Arc<dyn EventBus>,
    pub view: Arc<dyn ViewController>,
    pub progress: Arc<dyn ProgressSink>,
}

impl Frontend {
    pub fn new(
        events: Arc<dyn EventBus>,
        view: Arc<dyn ViewController>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self { events, view, progress }
    }

    /// Use one object for all three roles.
    pub fn shared<T>(shared: Arc<T>) -> Self
    where
        T: EventBus + ViewController + ProgressSink + 'static,
    {
        Self {
            events: shared.clone(),
            view: shared.clone(),
            progress: shared,
        }
    }

    /// Frontend that reports through `tracing`.
    pub fn logging() -> Self {
        Self::shared(Arc::new(LogFrontend::default()))
    }

    pub(crate) fn emit(&self, event: PipelineEvent) {
        self.events.emit(event);
    }
}
