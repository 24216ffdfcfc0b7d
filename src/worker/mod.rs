//! Boundary to the out-of-process computation engine.
//!
//! The worker is addressed through message streams: every submission returns
//! a receiver on which the worker posts progress and exactly one terminal
//! reply (`Done` or `Error`). A stream that closes without a terminal reply
//! means the job was dropped, typically by `restart()`.

mod simulated;

pub use simulated::{SimulatedWorker, Submission};

use crate::model::{Item, ItemId, PreviewMode, ProcessMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Receiver half of a job's reply stream.
pub type ReplyStream<T> = mpsc::UnboundedReceiver<T>;

/// Replies for a single-item SLICE job.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemReply {
    /// Fractional progress for this item with an optional status message
    Progress { fraction: f64, message: Option<String> },
    /// User-visible notice that does not affect the job
    Alert(String),
    /// The item finished slicing
    Done,
    /// The item failed
    Error(String),
}

/// Replies for a whole-collection job (PREVIEW or code parsing).
#[derive(Debug, Clone, PartialEq)]
pub enum BatchReply {
    /// Overall progress, optionally carrying a layer that is ready to render
    Progress {
        fraction: f64,
        message: Option<String>,
        layer: Option<Layer>,
    },
    /// Final result set
    Done(PreviewOutput),
    /// The job failed
    Error(String),
}

/// A renderable layer of computed toolpaths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer index, bottom up
    pub index: usize,
    /// Display label
    pub label: String,
    /// Number of toolpath moves in the layer
    pub moves: usize,
    /// Output channel the layer was produced for
    #[serde(default)]
    pub extruder: Option<u32>,
}

/// Result of a PREVIEW or parse job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviewOutput {
    pub layers: Vec<Layer>,
    /// Fastest feed rate seen, for speed coloring
    #[serde(default)]
    pub max_speed: Option<f64>,
    /// Slowest feed rate seen
    #[serde(default)]
    pub min_speed: Option<f64>,
}

/// Kind of toolpath text handed to `submit_parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    Gcode,
    Svg,
}

/// Settings sent with every job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSettings {
    pub mode: ProcessMode,
    pub preview_mode: PreviewMode,
    /// Explicit render order; `None` lets the worker decide
    pub order: Option<HashMap<ItemId, usize>>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            mode: ProcessMode::Fdm,
            preview_mode: PreviewMode::Speed,
            order: None,
        }
    }
}

/// Asynchronous, message-based computation engine.
///
/// Submissions never block; results arrive on the returned stream.
pub trait WorkerClient: Send + Sync {
    /// Slice a single item.
    fn submit_item(&self, item: &Item, settings: &JobSettings) -> ReplyStream<ItemReply>;

    /// Compute the preview for all items as one job.
    fn submit_batch(&self, items: &[Item], settings: &JobSettings) -> ReplyStream<BatchReply>;

    /// Parse toolpath text into renderable layers.
    fn submit_parse(&self, code: &str, kind: CodeKind) -> ReplyStream<BatchReply>;

    /// Whether any submitted job has not finished yet.
    fn is_busy(&self) -> bool;

    /// Hard restart of the worker context, dropping all in-flight jobs.
    fn restart(&self);
}
