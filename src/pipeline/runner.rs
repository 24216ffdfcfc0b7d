//! Stage execution against the worker.
//!
//! SLICE hands items to the worker one at a time and folds their progress
//! into one weighted fraction. PREVIEW and code parsing are a single batched
//! job each. Runs are handed the epoch of the entry point that started
//! them; a run that starts under a newer epoch, sees a reply under one, or
//! whose stream closes without a terminal reply is abandoned without
//! finalizing.

use super::context::PipelineContext;
use super::metrics::{Metrics, SegmentClock, StageTimings};
use super::progress::{combine, ProgressWindow};
use super::task::{build_tasks, ItemTask};
use crate::error::{PipelineError, Result};
use crate::frontend::{Frontend, PipelineEvent};
use crate::model::{fingerprint, selection_order, Item, ItemId, Stage, View};
use crate::worker::{BatchReply, CodeKind, ItemReply, JobSettings, PreviewOutput, WorkerClient};
use std::collections::VecDeque;
use std::sync::Arc;

/// Summary of a successful SLICE run.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceReport {
    /// Items sliced
    pub items: usize,
    pub timings: StageTimings,
}

/// One invocation of a SLICE.
struct StageRun {
    tasks: Vec<ItemTask>,

    /// Indexes into `tasks` not yet handed to the worker
    queue: VecDeque<usize>,

    window: ProgressWindow,

    /// First error of the run; later ones are dropped
    error: Option<String>,

    epoch: u64,
    clock: SegmentClock,
}

impl StageRun {
    fn new(stage: Stage, tasks: Vec<ItemTask>, window: ProgressWindow, epoch: u64) -> Self {
        let multi_item = tasks.len() > 1;
        Self {
            queue: (0..tasks.len()).collect(),
            tasks,
            window,
            error: None,
            epoch,
            clock: SegmentClock::new(stage, multi_item),
        }
    }

    /// Overall fraction of the run, mapped into its window.
    fn fraction(&self) -> f64 {
        self.window.map(combine(&self.tasks))
    }

    /// Record an error and drop the remaining queue. Only the first error sticks.
    fn latch_error(&mut self, reason: String) -> bool {
        self.queue.clear();
        if self.error.is_some() {
            tracing::debug!("Suppressing later error: {}", reason);
            return false;
        }
        self.error = Some(reason);
        true
    }
}

enum ItemOutcome {
    Done,
    Failed(String),
    /// Cancelled or the worker dropped the job
    Stale,
}

/// Runs single stages; chaining and caching live in the controller.
pub struct StageRunner {
    worker: Arc<dyn WorkerClient>,
    frontend: Frontend,
    context: Arc<PipelineContext>,
    metrics: Arc<Metrics>,

    /// Show a "Rendering" alert while a top-level stage finalizes
    work_alerts: bool,
}

impl StageRunner {
    pub fn new(
        worker: Arc<dyn WorkerClient>,
        frontend: Frontend,
        context: Arc<PipelineContext>,
        metrics: Arc<Metrics>,
        work_alerts: bool,
    ) -> Self {
        Self {
            worker,
            frontend,
            context,
            metrics,
            work_alerts,
        }
    }

    /// Slice every eligible item, strictly one after another in document order.
    ///
    /// The completion cache is reset when the run starts and `slice` is set
    /// only if every item finished.
    pub async fn run_slice(
        &self,
        items: &[Item],
        selection: &[ItemId],
        window: ProgressWindow,
        settings: &JobSettings,
        epoch: u64,
    ) -> Result<SliceReport> {
        let eligible: Vec<Item> = items.iter().filter(|i| i.is_eligible()).cloned().collect();
        if eligible.is_empty() {
            tracing::info!("No eligible items, slice not started");
            self.frontend.progress.alert("nothing to slice");
            self.frontend.emit(PipelineEvent::NothingToProcess(Stage::Slice));
            return Err(PipelineError::EmptyInput { stage: Stage::Slice });
        }
        if self.context.epoch() != epoch {
            return Err(self.abandon(Stage::Slice));
        }

        let document = fingerprint(&eligible);
        self.context.begin_slice(selection_order(selection));
        self.frontend.emit(PipelineEvent::StageBegin(Stage::Slice));
        self.metrics.add_stage_started();
        tracing::info!("Slicing {} items", eligible.len());

        let mut run = StageRun::new(Stage::Slice, build_tasks(&eligible), window, epoch);

        while let Some(index) = run.queue.pop_front() {
            match self.slice_item(&mut run, index, settings).await {
                ItemOutcome::Done => {}
                ItemOutcome::Failed(reason) => {
                    run.latch_error(reason);
                }
                ItemOutcome::Stale => return Err(self.abandon(Stage::Slice)),
            }
        }

        if let Some(reason) = run.error.take() {
            return Err(self.fail_stage(Stage::Slice, reason));
        }
        if self.context.epoch() != epoch {
            return Err(self.abandon(Stage::Slice));
        }

        if self.work_alerts && window.is_full() {
            self.frontend.progress.alert("Rendering");
        }
        self.context.finish_slice(document);
        self.frontend.view.set_view(View::Slice);
        if window.reaches_end() {
            self.frontend.progress.progress(0.0, None);
        }
        self.frontend.emit(PipelineEvent::StageEnd(Stage::Slice));
        self.metrics.add_stage_completed();

        let StageRun { tasks, clock, .. } = run;
        let timings = clock.finish();
        self.frontend.progress.stats(&timings);
        tracing::info!("Sliced {} items in {:?}", tasks.len(), timings.total);

        Ok(SliceReport {
            items: tasks.len(),
            timings,
        })
    }

    async fn slice_item(
        &self,
        run: &mut StageRun,
        index: usize,
        settings: &JobSettings,
    ) -> ItemOutcome {
        let item = run.tasks[index].item.clone();
        run.tasks[index].start();
        self.metrics.add_item_submitted();
        tracing::debug!("Submitting item {} ({} vertices)", item.id, item.vertex_count);

        let mut replies = self.worker.submit_item(&item, settings);
        while let Some(reply) = replies.recv().await {
            if self.context.epoch() != run.epoch {
                return ItemOutcome::Stale;
            }
            match reply {
                ItemReply::Progress { fraction, message } => {
                    run.tasks[index].update_progress(fraction);
                    run.clock.observe(Some(&item.id), message.as_deref());
                    self.frontend
                        .progress
                        .progress(run.fraction(), message.as_deref());
                }
                ItemReply::Alert(message) => self.frontend.progress.alert(&message),
                ItemReply::Done => {
                    run.tasks[index].complete();
                    run.clock.close();
                    self.metrics.add_item_completed();
                    self.frontend.progress.progress(run.fraction(), None);
                    self.frontend.emit(PipelineEvent::ItemDone {
                        stage: Stage::Slice,
                        id: item.id.clone(),
                    });
                    return ItemOutcome::Done;
                }
                ItemReply::Error(reason) => {
                    run.tasks[index].fail();
                    self.metrics.add_item_failed();
                    tracing::warn!("Item {} failed: {}", item.id, reason);
                    return ItemOutcome::Failed(reason);
                }
            }
        }

        tracing::debug!("Reply stream for item {} closed", item.id);
        ItemOutcome::Stale
    }

    /// Compute the preview of all eligible items as one worker job.
    pub async fn run_preview(
        &self,
        items: &[Item],
        window: ProgressWindow,
        settings: &JobSettings,
        epoch: u64,
    ) -> Result<Arc<PreviewOutput>> {
        let eligible: Vec<Item> = items.iter().filter(|i| i.is_eligible()).cloned().collect();
        if self.context.epoch() != epoch {
            return Err(self.abandon(Stage::Preview));
        }

        self.frontend.emit(PipelineEvent::StageBegin(Stage::Preview));
        self.metrics.add_stage_started();
        self.metrics.add_batch_submitted();
        tracing::info!(
            "Computing {} preview for {} items",
            settings.preview_mode,
            eligible.len()
        );

        let mut clock = SegmentClock::new(Stage::Preview, false);
        let mut streamed = Vec::new();
        let mut replies = self.worker.submit_batch(&eligible, settings);

        let mut output = loop {
            let Some(reply) = replies.recv().await else {
                return Err(self.abandon(Stage::Preview));
            };
            if self.context.epoch() != epoch {
                return Err(self.abandon(Stage::Preview));
            }
            match reply {
                BatchReply::Progress {
                    fraction,
                    message,
                    layer,
                } => {
                    clock.observe(None, message.as_deref());
                    if let Some(layer) = layer {
                        streamed.push(layer);
                    }
                    self.frontend
                        .progress
                        .progress(window.map(fraction.clamp(0.0, 1.0)), message.as_deref());
                }
                BatchReply::Done(output) => break output,
                BatchReply::Error(reason) => return Err(self.fail_stage(Stage::Preview, reason)),
            }
        };
        if output.layers.is_empty() {
            output.layers = streamed;
        }

        if self.work_alerts && window.is_full() {
            self.frontend.progress.alert("Rendering");
        }
        if self.context.epoch() != epoch {
            return Err(self.abandon(Stage::Preview));
        }
        let output = Arc::new(output);
        if !self.context.finish_preview(settings.preview_mode, output.clone()) {
            let reason = "slice result was cleared during preview".to_string();
            tracing::warn!("{}", reason);
            self.frontend.progress.progress(0.0, None);
            self.frontend.emit(PipelineEvent::StageError {
                stage: Stage::Preview,
                reason,
            });
            self.metrics.add_stage_failed();
            return Err(PipelineError::Incomplete { stage: Stage::Slice });
        }

        self.frontend.view.set_view(View::Preview);
        if window.reaches_end() {
            self.frontend.progress.progress(0.0, None);
        }
        self.frontend.emit(PipelineEvent::StageEnd(Stage::Preview));
        self.metrics.add_stage_completed();

        let timings = clock.finish();
        self.frontend.progress.stats(&timings);
        tracing::info!(
            "Preview ready: {} layers in {:?}",
            output.layers.len(),
            timings.total
        );

        Ok(output)
    }

    /// Have the worker parse toolpath text into layers for display.
    pub async fn run_parse(&self, code: &str, kind: CodeKind, epoch: u64) -> Result<PreviewOutput> {
        self.frontend.emit(PipelineEvent::CodeLoad(kind));
        self.frontend.view.set_view(View::Preview);
        self.metrics.add_batch_submitted();
        tracing::info!("Parsing {} bytes of {:?}", code.len(), kind);

        let mut replies = self.worker.submit_parse(code, kind);
        loop {
            let reply = match replies.recv().await {
                Some(reply) if self.context.epoch() == epoch => reply,
                _ => {
                    tracing::info!("Code parse abandoned");
                    self.frontend.progress.progress(0.0, None);
                    return Err(PipelineError::ParseCancelled);
                }
            };
            match reply {
                BatchReply::Progress {
                    fraction, message, ..
                } => {
                    let message = message.as_deref().unwrap_or("parsing");
                    self.frontend.progress.progress(fraction, Some(message));
                }
                BatchReply::Done(output) => {
                    self.frontend.progress.progress(0.0, None);
                    self.frontend.emit(PipelineEvent::CodeLoaded(kind));
                    tracing::info!("Parsed {} layers", output.layers.len());
                    return Ok(output);
                }
                BatchReply::Error(reason) => {
                    tracing::warn!("Code parse failed: {}", reason);
                    self.frontend.progress.alert(&reason);
                    self.frontend.progress.progress(0.0, None);
                    return Err(PipelineError::Parse(reason));
                }
            }
        }
    }

    /// Recovery after a worker-reported failure.
    fn fail_stage(&self, stage: Stage, reason: String) -> PipelineError {
        tracing::warn!("{} failed: {}", stage, reason);
        self.frontend.view.set_view(View::Arrange);
        self.frontend.progress.alert(&reason);
        self.frontend.progress.progress(0.0, None);

        self.worker.restart();
        self.metrics.add_error_restart();

        self.frontend.emit(PipelineEvent::StageError {
            stage,
            reason: reason.clone(),
        });
        self.metrics.add_stage_failed();
        PipelineError::StageComputation { stage, reason }
    }

    /// A run that will never finalize.
    fn abandon(&self, stage: Stage) -> PipelineError {
        tracing::info!("{} run abandoned", stage);
        self.frontend.progress.progress(0.0, None);
        PipelineError::Cancelled { stage }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::frontend::Recorder;
    use crate::model::PreviewMode;
    use crate::worker::SimulatedWorker;

    fn runner(config: WorkerConfig) -> (StageRunner, Arc<SimulatedWorker>, Arc<Recorder>, Arc<PipelineContext>) {
        let worker = Arc::new(SimulatedWorker::new(config));
        let recorder = Arc::new(Recorder::default());
        let context = Arc::new(PipelineContext::new(PreviewMode::Speed));
        let runner = StageRunner::new(
            worker.clone(),
            Frontend::shared(recorder.clone()),
            context.clone(),
            Metrics::new(),
            false,
        );
        (runner, worker, recorder, context)
    }

    fn fast() -> WorkerConfig {
        WorkerConfig {
            steps: 4,
            step_delay_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_latch_keeps_first_error() {
        let tasks = build_tasks(&[Item::new("a", 1), Item::new("b", 1)]);
        let mut run = StageRun::new(Stage::Slice, tasks, ProgressWindow::FULL, 0);
        assert!(run.latch_error("first".into()));
        assert!(!run.latch_error("second".into()));
        assert_eq!(run.error.as_deref(), Some("first"));
        assert!(run.queue.is_empty());
    }

    #[tokio::test]
    async fn test_slice_reports_into_window() {
        let (runner, _worker, recorder, context) = runner(fast());
        let items = vec![Item::new("a", 10), Item::new("b", 30)];
        let window = ProgressWindow::new(0.0, 0.75);

        let report = runner
            .run_slice(&items, &[], window, &JobSettings::default(), 0)
            .await
            .unwrap();
        assert_eq!(report.items, 2);
        assert!(context.completion().slice);

        let values = recorder.progress_values();
        assert!(values.iter().all(|v| (0.0..=0.75 + 1e-9).contains(v)));
        assert!((values.last().copied().unwrap() - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_slice_skips_disabled_items() {
        let (runner, worker, _recorder, _context) = runner(fast());
        let items = vec![Item::new("a", 10), Item::new("b", 10).disabled()];
        runner
            .run_slice(&items, &[], ProgressWindow::FULL, &JobSettings::default(), 0)
            .await
            .unwrap();
        assert_eq!(worker.submitted_items(), vec![ItemId::from("a")]);
    }

    #[tokio::test]
    async fn test_slice_captures_selection_order() {
        let (runner, _worker, _recorder, context) = runner(fast());
        let items = vec![Item::new("a", 10), Item::new("b", 10)];
        runner
            .run_slice(
                &items,
                &["b".into(), "a".into()],
                ProgressWindow::FULL,
                &JobSettings::default(),
                0,
            )
            .await
            .unwrap();

        let order = context.selection_order().unwrap();
        assert_eq!(order[&ItemId::from("b")], 0);
        assert_eq!(order[&ItemId::from("a")], 1);
    }

    #[tokio::test]
    async fn test_preview_collects_streamed_layers() {
        let (runner, _worker, recorder, context) = runner(fast());
        let items = vec![Item::new("a", 10), Item::new("b", 10)];
        runner
            .run_slice(&items, &[], ProgressWindow::FULL, &JobSettings::default(), 0)
            .await
            .unwrap();

        let output = runner
            .run_preview(&items, ProgressWindow::FULL, &JobSettings::default(), 0)
            .await
            .unwrap();
        assert_eq!(output.layers.len(), 8);
        assert_eq!(output.max_speed, Some(120.0));
        assert_eq!(context.completion().preview, Some(PreviewMode::Speed));
        assert_eq!(recorder.views().last(), Some(&View::Preview));
    }

    #[tokio::test]
    async fn test_preview_refused_without_slice() {
        let (runner, _worker, recorder, context) = runner(fast());
        let items = vec![Item::new("a", 10)];

        let err = runner
            .run_preview(&items, ProgressWindow::FULL, &JobSettings::default(), 0)
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::Incomplete { stage: Stage::Slice });
        assert_eq!(context.completion().preview, None);
        assert_eq!(recorder.lifecycle().len(), 2);
    }

    #[tokio::test]
    async fn test_parse_gcode() {
        let (runner, _worker, recorder, context) = runner(fast());
        let code = ";LAYER:0\nG1 X1 Y1\nG1 X2 Y2\n;LAYER:1\nG0 X0 Y0\n";

        let output = runner.run_parse(code, CodeKind::Gcode, 0).await.unwrap();
        assert_eq!(output.layers.len(), 2);
        assert_eq!(
            recorder.events(),
            vec![
                PipelineEvent::CodeLoad(CodeKind::Gcode),
                PipelineEvent::CodeLoaded(CodeKind::Gcode)
            ]
        );
        // Parsing never counts as a completed stage
        assert_eq!(context.completion(), Default::default());
    }

    #[tokio::test]
    async fn test_stale_epoch_never_begins() {
        let (runner, worker, recorder, context) = runner(fast());
        context.advance_epoch();
        let items = vec![Item::new("a", 10)];

        let err = runner
            .run_slice(&items, &[], ProgressWindow::FULL, &JobSettings::default(), 0)
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::Cancelled { stage: Stage::Slice });

        let err = runner
            .run_preview(&items, ProgressWindow::FULL, &JobSettings::default(), 0)
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::Cancelled { stage: Stage::Preview });

        assert!(recorder.events().is_empty());
        assert!(worker.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_stale_parse_is_not_a_stage_cancel() {
        let (runner, _worker, recorder, context) = runner(fast());
        context.advance_epoch();

        let err = runner
            .run_parse("<path d=''/>", CodeKind::Svg, 0)
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::ParseCancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.stage(), None);
        assert!(!recorder
            .events()
            .contains(&PipelineEvent::CodeLoaded(CodeKind::Svg)));
    }

    #[tokio::test]
    async fn test_parse_error_is_alerted() {
        let (runner, _worker, recorder, _context) = runner(fast());
        let err = runner.run_parse("", CodeKind::Svg, 0).await.unwrap_err();
        assert_eq!(err, PipelineError::Parse("no toolpaths found".to_string()));
        assert_eq!(recorder.alerts(), vec!["no toolpaths found".to_string()]);
    }
}
