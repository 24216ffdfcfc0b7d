//! Stage orchestration: progress aggregation, per-item tasks, stage runs
//! and the controller entry points.

mod context;
mod controller;
mod metrics;
mod progress;
mod runner;
mod task;


pub use context::{Completion, PipelineContext};
pub use controller::{ExportContext, PipelineController, PreviewOutcome, SliceOutcome};
pub use metrics::{Metrics, MetricsSnapshot, Segment, SegmentClock, StageTimings};
pub use progress::{combine, item_weights, to_window, ProgressWindow};
pub use runner::{SliceReport, StageRunner};
pub use task::{build_tasks, ItemTask, TaskStatus};
