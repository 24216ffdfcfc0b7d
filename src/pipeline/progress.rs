//! Progress aggregation across items and chained stages.
//!
//! Each item's progress is weighted by its vertex count relative to the mean
//! of the run, so a detail-heavy item moves the bar proportionally more than
//! a simple one. The combined fraction is then mapped into the progress
//! window the stage was given, letting a prerequisite stage and the stage
//! that triggered it share one continuous bar.

use super::task::ItemTask;

/// Sub-range of the overall progress bar a stage reports into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressWindow {
    pub offset: f64,
    pub scale: f64,
}

impl ProgressWindow {
    /// The whole bar.
    pub const FULL: ProgressWindow = ProgressWindow {
        offset: 0.0,
        scale: 1.0,
    };

    pub fn new(offset: f64, scale: f64) -> Self {
        Self { offset, scale }
    }

    /// Map a stage-local fraction into this window.
    pub fn map(&self, local: f64) -> f64 {
        to_window(local, self.offset, self.scale)
    }

    /// A sub-window expressed in this window's local coordinates.
    pub fn nest(&self, offset: f64, scale: f64) -> Self {
        Self {
            offset: self.map(offset),
            scale: self.scale * scale,
        }
    }

    /// Whether this is the top-level window.
    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// Whether a run in this window finishes the whole bar.
    pub fn reaches_end(&self) -> bool {
        self.offset + self.scale >= 1.0 - 1e-9
    }
}

impl Default for ProgressWindow {
    fn default() -> Self {
        Self::FULL
    }
}

/// Weighted mean progress of a run. An empty run reports `0`.
pub fn combine(tasks: &[ItemTask]) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }
    let total: f64 = tasks.iter().map(|t| t.progress() * t.weight).sum();
    total / tasks.len() as f64
}

/// `offset + local * scale`.
pub fn to_window(local: f64, offset: f64, scale: f64) -> f64 {
    offset + local * scale
}

/// Per-item weights: vertex count over the mean vertex count of the run.
///
/// Weights average to 1. When every count is zero all weights are 1.
pub fn item_weights(vertex_counts: &[usize]) -> Vec<f64> {
    if vertex_counts.is_empty() {
        return Vec::new();
    }
    let total: usize = vertex_counts.iter().sum();
    if total == 0 {
        return vec![1.0; vertex_counts.len()];
    }
    let mean = total as f64 / vertex_counts.len() as f64;
    vertex_counts.iter().map(|&v| v as f64 / mean).collect()
}
