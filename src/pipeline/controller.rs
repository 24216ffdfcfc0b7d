//! Public entry points of the pipeline.
//!
//! Applies the dependency chain `export => preview => slice`, the completion
//! cache and preview-mode cycling on top of [`StageRunner`]. Top-level calls
//! are serialized behind a single-flight lock; `cancel` and
//! `clear_progress` never wait on it.
//!
//! Each entry point reads the cancellation epoch once and checks it before
//! every chained step, so nothing begins or finalizes after a `cancel()`.

use super::context::{Completion, PipelineContext};
use super::metrics::Metrics;
use super::progress::ProgressWindow;
use super::runner::{SliceReport, StageRunner};
use crate::config::{default_slice_share, Config, DeviceConfig};
use crate::error::{PipelineError, Result};
use crate::frontend::{Frontend, PipelineEvent};
use crate::model::{fingerprint, ItemCollection, PreviewMode, ProcessMode, Stage};
use crate::worker::{CodeKind, JobSettings, PreviewOutput, WorkerClient};
use std::sync::Arc;

/// Result of a top-level `slice()`.
#[derive(Debug, Clone, PartialEq)]
pub enum SliceOutcome {
    Sliced(SliceReport),
    /// The last SLICE still matches the document
    Cached,
}

/// Result of a top-level `preview()`.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewOutcome {
    Rendered(Arc<PreviewOutput>),
    /// Preview is current for the active mode
    Cached,
    /// Preview was current; the display switched to the next mode instead
    ModeAdvanced(PreviewMode),
}

/// What the export encoder receives.
#[derive(Debug, Clone)]
pub struct ExportContext {
    pub mode: ProcessMode,
    pub preview_mode: PreviewMode,
    pub output: Arc<PreviewOutput>,
}

/// Orchestrates stages for one document.
pub struct PipelineController {
    items: Arc<dyn ItemCollection>,
    worker: Arc<dyn WorkerClient>,
    frontend: Frontend,
    context: Arc<PipelineContext>,
    metrics: Arc<Metrics>,
    runner: StageRunner,

    device: DeviceConfig,
    mode: ProcessMode,

    /// Share of the bar SLICE gets when PREVIEW chains it
    slice_share: f64,

    /// Held for the duration of every top-level call
    flight: tokio::sync::Mutex<()>,
}

impl PipelineController {
    pub fn new(
        config: &Config,
        items: Arc<dyn ItemCollection>,
        worker: Arc<dyn WorkerClient>,
        frontend: Frontend,
    ) -> Self {
        let context = Arc::new(PipelineContext::new(config.process.preview_mode));
        let metrics = Metrics::new();
        let runner = StageRunner::new(
            worker.clone(),
            frontend.clone(),
            context.clone(),
            metrics.clone(),
            config.processing.work_alerts,
        );

        Self {
            items,
            worker,
            frontend,
            context,
            metrics,
            runner,
            device: config.device.clone(),
            mode: config.process.mode,
            slice_share: checked_share(config.processing.slice_share),
            flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn completion(&self) -> Completion {
        self.context.completion()
    }

    pub fn preview_mode(&self) -> PreviewMode {
        self.context.preview_mode()
    }

    /// Slice the document unless the last SLICE still matches it.
    ///
    /// In SLA mode a preview follows immediately.
    pub async fn slice(&self) -> Result<SliceOutcome> {
        let _flight = self.flight.lock().await;
        let epoch = self.context.epoch();

        let outcome = self.slice_stage(ProgressWindow::FULL, epoch).await?;
        if self.mode == ProcessMode::Sla && !self.preview_current() {
            self.ensure_live(epoch, Stage::Preview)?;
            self.preview_stage(ProgressWindow::FULL, epoch).await?;
        }
        Ok(outcome)
    }

    /// Compute the preview, slicing first if needed.
    ///
    /// When the preview is already current, a multi-channel device cycles to
    /// the next preview mode without touching the worker.
    pub async fn preview(&self) -> Result<PreviewOutcome> {
        let _flight = self.flight.lock().await;
        let epoch = self.context.epoch();

        if self.preview_current() {
            if self.device.is_multi_channel() {
                let mode = self.context.advance_preview_mode();
                tracing::info!("Preview mode -> {}", mode);
                self.metrics.add_mode_cycle();
                self.frontend.emit(PipelineEvent::PreviewModeChanged(mode));
                return Ok(PreviewOutcome::ModeAdvanced(mode));
            }
            tracing::debug!("Preview is current, skipping");
            self.metrics.add_cache_hit();
            return Ok(PreviewOutcome::Cached);
        }

        let output = self.preview_stage(ProgressWindow::FULL, epoch).await?;
        Ok(PreviewOutcome::Rendered(output))
    }

    /// Make sure a current preview exists, then hand it to `on_ready`.
    pub async fn export<F, R>(&self, on_ready: F) -> Result<R>
    where
        F: FnOnce(ExportContext) -> R,
    {
        let _flight = self.flight.lock().await;
        let epoch = self.context.epoch();

        if !self.preview_current() {
            self.preview_stage(ProgressWindow::FULL, epoch).await?;
        }
        self.ensure_live(epoch, Stage::Export)?;
        let output = match self.context.preview_output() {
            Some(output) if self.preview_current() => output,
            _ => return Err(PipelineError::Incomplete { stage: Stage::Preview }),
        };

        self.context.mark_exported();
        self.frontend.emit(PipelineEvent::ExportReady);
        tracing::info!("Export ready ({} layers)", output.layers.len());

        Ok(on_ready(ExportContext {
            mode: self.mode,
            preview_mode: self.context.preview_mode(),
            output,
        }))
    }

    /// Parse gcode or toolpath text for display. Leaves the completion cache alone.
    pub async fn parse_code(&self, code: &str, kind: CodeKind) -> Result<PreviewOutput> {
        let _flight = self.flight.lock().await;
        let epoch = self.context.epoch();
        self.runner.run_parse(code, kind, epoch).await
    }

    /// Hard-restart a busy worker. Returns whether anything was cancelled.
    ///
    /// In-flight runs see the new epoch and end as `Cancelled`; their stages
    /// stay incomplete.
    pub fn cancel(&self) -> bool {
        if !self.worker.is_busy() {
            tracing::debug!("Cancel ignored, worker idle");
            return false;
        }
        let epoch = self.context.advance_epoch();
        tracing::info!("Cancelling pipeline (epoch {})", epoch);
        self.worker.restart();
        self.metrics.add_cancellation();
        self.frontend.emit(PipelineEvent::Cancelled);
        true
    }

    /// Forget every completed stage so the next request recomputes.
    pub fn clear_progress(&self) {
        tracing::debug!("Clearing completion cache");
        self.context.clear();
    }

    fn job_settings(&self) -> JobSettings {
        JobSettings {
            mode: self.mode,
            preview_mode: self.context.preview_mode(),
            order: self.context.selection_order(),
        }
    }

    /// Fail with `Cancelled` if `cancel()` ran since the entry point started.
    fn ensure_live(&self, epoch: u64, next: Stage) -> Result<()> {
        if self.context.epoch() != epoch {
            tracing::info!("Cancelled before {}", next);
            return Err(PipelineError::Cancelled { stage: next });
        }
        Ok(())
    }

    fn preview_current(&self) -> bool {
        self.context
            .preview_is_current(fingerprint(&self.items.items()))
    }

    async fn slice_stage(&self, window: ProgressWindow, epoch: u64) -> Result<SliceOutcome> {
        let items = self.items.items();
        if self.context.slice_is_current(fingerprint(&items)) {
            tracing::debug!("Slice is current, skipping");
            self.metrics.add_cache_hit();
            return Ok(SliceOutcome::Cached);
        }

        let selection = self.items.selection();
        let report = self
            .runner
            .run_slice(&items, &selection, window, &self.job_settings(), epoch)
            .await?;
        Ok(SliceOutcome::Sliced(report))
    }

    async fn preview_stage(&self, window: ProgressWindow, epoch: u64) -> Result<Arc<PreviewOutput>> {
        let items = self.items.items();
        let mut window = window;

        if !self.context.slice_is_current(fingerprint(&items)) {
            let selection = self.items.selection();
            self.runner
                .run_slice(
                    &items,
                    &selection,
                    window.nest(0.0, self.slice_share),
                    &self.job_settings(),
                    epoch,
                )
                .await?;
            window = window.nest(self.slice_share, 1.0 - self.slice_share);
            self.ensure_live(epoch, Stage::Preview)?;
        }

        self.runner
            .run_preview(&items, window, &self.job_settings(), epoch)
            .await
    }
}

/// Slice share inside `(0, 1)`, falling back to the default otherwise.
fn checked_share(share: f64) -> f64 {
    if share > 0.0 && share < 1.0 {
        share
    } else {
        tracing::warn!(
            "slice_share {} outside (0, 1), using {}",
            share,
            default_slice_share()
        );
        default_slice_share()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_share() {
        assert_eq!(checked_share(0.6), 0.6);
        assert_eq!(checked_share(1.5), 0.75);
        assert_eq!(checked_share(0.0), 0.75);
        assert_eq!(checked_share(f64::NAN), 0.75);
    }
}
