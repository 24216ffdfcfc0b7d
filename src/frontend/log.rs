//! Headless frontend that reports through `tracing`.

use super::{EventBus, PipelineEvent, ProgressSink, ViewController};
use crate::model::View;
use crate::pipeline::StageTimings;
use std::sync::atomic::{AtomicU64, Ordering};

/// Logs events, view switches and progress.
///
/// Progress is logged at most once per whole percent.
#[derive(Debug, Default)]
pub struct LogFrontend {
    last_percent: AtomicU64,
}

impl EventBus for LogFrontend {
    fn emit(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::StageError { reason, .. } => {
                tracing::warn!("{}: {}", event.name(), reason);
            }
            PipelineEvent::ItemDone { id, .. } => {
                tracing::debug!("{} {}", event.name(), id);
            }
            _ => tracing::info!("{}", event.name()),
        }
    }
}

impl ViewController for LogFrontend {
    fn set_view(&self, view: View) {
        tracing::debug!("View -> {:?}", view);
    }
}

impl ProgressSink for LogFrontend {
    fn progress(&self, fraction: f64, message: Option<&str>) {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u64;
        if self.last_percent.swap(percent, Ordering::Relaxed) == percent {
            return;
        }
        if percent > 0 {
            tracing::info!("[{:>3}%] {}", percent, message.unwrap_or(""));
        }
    }

    fn alert(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn stats(&self, timings: &StageTimings) {
        tracing::info!("{}", timings);
    }
}
