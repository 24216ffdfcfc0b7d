//! Shared pipeline state for one document session.
//!
//! Holds the completion cache, the captured selection order, the active
//! preview mode and the cancellation epoch. Stage finalization is the only
//! writer of the completion cache; controller entry points read it.

use crate::model::{ItemId, PreviewMode};
use crate::worker::PreviewOutput;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Which stages are satisfied by the current document snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub slice: bool,
    /// Preview mode the last successful PREVIEW was computed for
    pub preview: Option<PreviewMode>,
    pub export: bool,
}

#[derive(Debug, Default)]
struct PipelineState {
    completed: Completion,
    selection_order: Option<HashMap<ItemId, usize>>,
    preview_mode: PreviewMode,
    /// Fingerprint of the items the completed SLICE was computed from
    slice_fingerprint: Option<u64>,
    preview_output: Option<Arc<PreviewOutput>>,
}

/// Explicit pipeline context, owned by one controller.
#[derive(Debug, Default)]
pub struct PipelineContext {
    state: Mutex<PipelineState>,

    /// Advanced on every cancellation; runs started under an older epoch are stale
    epoch: AtomicU64,
}

impl PipelineContext {
    pub fn new(preview_mode: PreviewMode) -> Self {
        Self {
            state: Mutex::new(PipelineState {
                preview_mode,
                ..Default::default()
            }),
            epoch: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn completion(&self) -> Completion {
        self.state().completed.clone()
    }

    pub fn preview_mode(&self) -> PreviewMode {
        self.state().preview_mode
    }

    pub fn set_preview_mode(&self, mode: PreviewMode) {
        self.state().preview_mode = mode;
    }

    /// Switch to the next preview mode and return it.
    pub fn advance_preview_mode(&self) -> PreviewMode {
        let mut state = self.state();
        state.preview_mode = state.preview_mode.next();
        state.preview_mode
    }

    pub fn selection_order(&self) -> Option<HashMap<ItemId, usize>> {
        self.state().selection_order.clone()
    }

    /// Output of the last successful PREVIEW.
    pub fn preview_output(&self) -> Option<Arc<PreviewOutput>> {
        self.state().preview_output.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether a completed SLICE matches the given document fingerprint.
    pub fn slice_is_current(&self, fingerprint: u64) -> bool {
        let state = self.state();
        state.completed.slice && state.slice_fingerprint == Some(fingerprint)
    }

    /// Whether a completed PREVIEW matches the active mode and document.
    pub fn preview_is_current(&self, fingerprint: u64) -> bool {
        let state = self.state();
        state.completed.slice
            && state.slice_fingerprint == Some(fingerprint)
            && state.completed.preview == Some(state.preview_mode)
    }

    /// Drop every completion flag.
    pub fn clear(&self) {
        let mut state = self.state();
        state.completed = Completion::default();
        state.slice_fingerprint = None;
        state.preview_output = None;
    }

    /// Start of a SLICE run: everything downstream is invalidated.
    pub(crate) fn begin_slice(&self, selection_order: Option<HashMap<ItemId, usize>>) {
        let mut state = self.state();
        state.completed = Completion::default();
        state.slice_fingerprint = None;
        state.preview_output = None;
        state.selection_order = selection_order;
    }

    pub(crate) fn finish_slice(&self, fingerprint: u64) {
        let mut state = self.state();
        state.completed.slice = true;
        state.slice_fingerprint = Some(fingerprint);
    }

    /// Record a successful PREVIEW. Refused unless SLICE is still complete.
    pub(crate) fn finish_preview(&self, mode: PreviewMode, output: Arc<PreviewOutput>) -> bool {
        let mut state = self.state();
        if !state.completed.slice {
            return false;
        }
        state.completed.preview = Some(mode);
        state.preview_output = Some(output);
        true
    }

    pub(crate) fn mark_exported(&self) {
        self.state().completed.export = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_resets_downstream() {
        let ctx = PipelineContext::new(PreviewMode::Speed);
        ctx.begin_slice(None);
        ctx.finish_slice(7);
        assert!(ctx.finish_preview(PreviewMode::Speed, Arc::new(PreviewOutput::default())));
        ctx.mark_exported();
        assert!(ctx.preview_is_current(7));

        ctx.begin_slice(None);
        assert_eq!(ctx.completion(), Completion::default());
        assert!(ctx.preview_output().is_none());
        assert!(!ctx.slice_is_current(7));
    }

    #[test]
    fn test_preview_requires_slice() {
        let ctx = PipelineContext::new(PreviewMode::Speed);
        assert!(!ctx.finish_preview(PreviewMode::Speed, Arc::new(PreviewOutput::default())));
        assert_eq!(ctx.completion().preview, None);
    }

    #[test]
    fn test_preview_current_tracks_mode_and_fingerprint() {
        let ctx = PipelineContext::new(PreviewMode::Speed);
        ctx.begin_slice(None);
        ctx.finish_slice(1);
        ctx.finish_preview(PreviewMode::Speed, Arc::new(PreviewOutput::default()));

        assert!(ctx.preview_is_current(1));
        assert!(!ctx.preview_is_current(2));

        assert_eq!(ctx.advance_preview_mode(), PreviewMode::Tools);
        assert!(!ctx.preview_is_current(1));
    }

    #[test]
    fn test_epoch_advances() {
        let ctx = PipelineContext::default();
        assert_eq!(ctx.epoch(), 0);
        assert_eq!(ctx.advance_epoch(), 1);
        assert_eq!(ctx.epoch(), 1);
    }

    #[test]
    fn test_clear_keeps_mode_and_order() {
        let ctx = PipelineContext::new(PreviewMode::Tools);
        let order = crate::model::selection_order(&["a".into()]);
        ctx.begin_slice(order);
        ctx.finish_slice(3);
        ctx.clear();

        assert!(!ctx.completion().slice);
        assert_eq!(ctx.preview_mode(), PreviewMode::Tools);
        assert!(ctx.selection_order().is_some());
    }
}
