//! Frontend that records every call in order.

use super::{EventBus, PipelineEvent, ProgressSink, ViewController};
use crate::model::{Stage, View};
use crate::pipeline::StageTimings;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Event(PipelineEvent),
    View(View),
    Progress { fraction: f64, message: Option<String> },
    Alert(String),
    Stats(StageTimings),
}

/// Records events, views, progress and alerts on one timeline.
#[derive(Debug, Default)]
pub struct Recorder {
    records: Mutex<Vec<Record>>,
}

impl Recorder {
    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, record: Record) {
        self.lock().push(record);
    }

    /// Full timeline.
    pub fn records(&self) -> Vec<Record> {
        self.lock().clone()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                Record::Event(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    /// Stage lifecycle events only (`begin`, `end`, `error`).
    pub fn lifecycle(&self) -> Vec<PipelineEvent> {
        self.events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    PipelineEvent::StageBegin(_)
                        | PipelineEvent::StageEnd(_)
                        | PipelineEvent::StageError { .. }
                )
            })
            .collect()
    }

    pub fn count_begins(&self, stage: Stage) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == PipelineEvent::StageBegin(stage))
            .count()
    }

    pub fn views(&self) -> Vec<View> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                Record::View(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub fn progress_values(&self) -> Vec<f64> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                Record::Progress { fraction, .. } => Some(*fraction),
                _ => None,
            })
            .collect()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                Record::Alert(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl EventBus for Recorder {
    fn emit(&self, event: PipelineEvent) {
        self.push(Record::Event(event));
    }
}

impl ViewController for Recorder {
    fn set_view(&self, view: View) {
        self.push(Record::View(view));
    }
}

impl ProgressSink for Recorder {
    fn progress(&self, fraction: f64, message: Option<&str>) {
        self.push(Record::Progress {
            fraction,
            message: message.map(str::to_string),
        });
    }

    fn alert(&self, message: &str) {
        self.push(Record::Alert(message.to_string()));
    }

    fn stats(&self, timings: &StageTimings) {
        self.push(Record::Stats(timings.clone()));
    }
}
