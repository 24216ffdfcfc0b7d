//! In-process worker that simulates slicing and preview jobs on Tokio tasks.
//!
//! Used by the CLI for dry runs and by the tests. Jobs report progress in
//! `steps` increments separated by `step_delay_ms`; items listed in
//! `fail_items` fail halfway through, items in `alert_items` raise an alert
//! after their first step, and `fail_preview` fails the batch.

use super::{BatchReply, CodeKind, ItemReply, JobSettings, Layer, PreviewOutput, ReplyStream, WorkerClient};
use crate::config::WorkerConfig;
use crate::model::{Item, ItemId, PreviewMode};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A job accepted by the simulated worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Item(ItemId),
    Batch { items: usize, preview_mode: PreviewMode },
    Parse(CodeKind),
}

/// Worker backed by spawned Tokio tasks.
pub struct SimulatedWorker {
    config: WorkerConfig,

    /// Tasks of submitted jobs; finished ones are pruned on submit
    jobs: Mutex<Vec<JoinHandle<()>>>,

    /// Every accepted job, in submission order
    submissions: Mutex<Vec<Submission>>,

    /// Number of hard restarts
    restarts: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

impl SimulatedWorker {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            jobs: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            restarts: AtomicU64::new(0),
        }
    }

    /// All accepted jobs.
    pub fn submissions(&self) -> Vec<Submission> {
        lock(&self.submissions).clone()
    }

    /// Ids of items submitted for slicing, in order.
    pub fn submitted_items(&self) -> Vec<ItemId> {
        lock(&self.submissions)
            .iter()
            .filter_map(|s| match s {
                Submission::Item(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of preview batches submitted.
    pub fn batch_count(&self) -> usize {
        lock(&self.submissions)
            .iter()
            .filter(|s| matches!(s, Submission::Batch { .. }))
            .count()
    }

    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.config.step_delay_ms)
    }

    fn spawn<F>(&self, submission: Submission, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!("Worker accepted {:?}", submission);
        lock(&self.submissions).push(submission);

        let mut jobs = lock(&self.jobs);
        jobs.retain(|handle| !handle.is_finished());
        jobs.push(tokio::spawn(job));
    }
}

impl WorkerClient for SimulatedWorker {
    fn submit_item(&self, item: &Item, _settings: &JobSettings) -> ReplyStream<ItemReply> {
        let (tx, rx) = mpsc::unbounded_channel();
        let steps = self.config.steps.max(1);
        let delay = self.delay();
        let fail = self.config.fail_items.contains(&item.id);
        let alert = self.config.alert_items.contains(&item.id);
        let id = item.id.clone();

        self.spawn(Submission::Item(id.clone()), async move {
            for step in 1..=steps {
                pause(delay).await;
                if fail && step * 2 > steps {
                    let _ = tx.send(ItemReply::Error(format!("unable to slice {}", id)));
                    return;
                }
                let message = if step * 2 <= steps { "slicing" } else { "surfaces" };
                let _ = tx.send(ItemReply::Progress {
                    fraction: step as f64 / steps as f64,
                    message: Some(message.to_string()),
                });
                if alert && step == 1 {
                    let _ = tx.send(ItemReply::Alert(format!("{}: thin walls detected", id)));
                }
            }
            let _ = tx.send(ItemReply::Done);
        });

        rx
    }

    fn submit_batch(&self, items: &[Item], settings: &JobSettings) -> ReplyStream<BatchReply> {
        let (tx, rx) = mpsc::unbounded_channel();
        let delay = self.delay();
        let fail = self.config.fail_preview;
        let preview_mode = settings.preview_mode;

        // Render in the requested order; unordered items keep document order after them
        let mut ordered: Vec<Item> = items.to_vec();
        if let Some(order) = &settings.order {
            ordered.sort_by_key(|item| order.get(&item.id).copied().unwrap_or(usize::MAX));
        }
        let total = self.config.layers_per_item * ordered.len();

        self.spawn(
            Submission::Batch {
                items: ordered.len(),
                preview_mode,
            },
            async move {
                for index in 0..total {
                    pause(delay).await;
                    if fail && index * 2 >= total {
                        let _ = tx.send(BatchReply::Error("toolpath generation failed".to_string()));
                        return;
                    }
                    let item = &ordered[index % ordered.len()];
                    let layer = Layer {
                        index,
                        label: format!("{} layer {}", item.id, index),
                        moves: item.vertex_count / 10 + 1,
                        extruder: item.extruder,
                    };
                    let _ = tx.send(BatchReply::Progress {
                        fraction: (index + 1) as f64 / total as f64,
                        message: Some("preview".to_string()),
                        layer: Some(layer),
                    });
                }
                if fail && total == 0 {
                    let _ = tx.send(BatchReply::Error("toolpath generation failed".to_string()));
                    return;
                }
                let (max_speed, min_speed) = match preview_mode {
                    PreviewMode::Speed => (Some(120.0), Some(15.0)),
                    PreviewMode::Tools => (None, None),
                };
                let _ = tx.send(BatchReply::Done(PreviewOutput {
                    layers: Vec::new(),
                    max_speed,
                    min_speed,
                }));
            },
        );

        rx
    }

    fn submit_parse(&self, code: &str, kind: CodeKind) -> ReplyStream<BatchReply> {
        let (tx, rx) = mpsc::unbounded_channel();
        let delay = self.delay();
        let layers = parse_layers(code, kind);

        self.spawn(Submission::Parse(kind), async move {
            if layers.is_empty() {
                let _ = tx.send(BatchReply::Error("no toolpaths found".to_string()));
                return;
            }
            let total = layers.len();
            for i in 0..total {
                pause(delay).await;
                let _ = tx.send(BatchReply::Progress {
                    fraction: (i + 1) as f64 / total as f64,
                    message: Some("parsing".to_string()),
                    layer: None,
                });
            }
            let _ = tx.send(BatchReply::Done(PreviewOutput {
                layers,
                max_speed: None,
                min_speed: None,
            }));
        });

        rx
    }

    fn is_busy(&self) -> bool {
        lock(&self.jobs).iter().any(|handle| !handle.is_finished())
    }

    fn restart(&self) {
        let jobs: Vec<_> = lock(&self.jobs).drain(..).collect();
        let aborted = jobs.iter().filter(|h| !h.is_finished()).count();
        for handle in jobs {
            handle.abort();
        }
        self.restarts.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Worker restarted ({} jobs dropped)", aborted);
    }
}

/// Split toolpath text into layers.
///
/// Gcode layers start at `;LAYER` comments and count `G0`/`G1` moves.
/// SVG is one layer counting `<path` elements.
fn parse_layers(code: &str, kind: CodeKind) -> Vec<Layer> {
    match kind {
        CodeKind::Svg => {
            let moves = code.matches("<path").count();
            if moves == 0 {
                return Vec::new();
            }
            vec![Layer {
                index: 0,
                label: "svg".to_string(),
                moves,
                extruder: None,
            }]
        }
        CodeKind::Gcode => {
            let mut layers: Vec<Layer> = Vec::new();
            for line in code.lines().map(str::trim) {
                if line.starts_with(";LAYER") || (layers.is_empty() && is_move(line)) {
                    let index = layers.len();
                    layers.push(Layer {
                        index,
                        label: format!("layer {}", index),
                        moves: 0,
                        extruder: None,
                    });
                }
                if is_move(line) {
                    if let Some(layer) = layers.last_mut() {
                        layer.moves += 1;
                    }
                }
            }
            layers.retain(|layer| layer.moves > 0);
            layers
        }
    }
}

fn is_move(line: &str) -> bool {
    line.starts_with("G0 ") || line.starts_with("G1 ") || line == "G0" || line == "G1"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(fail_items: &[&str]) -> SimulatedWorker {
        SimulatedWorker::new(WorkerConfig {
            steps: 4,
            step_delay_ms: 0,
            layers_per_item: 2,
            fail_items: fail_items.iter().map(|id| ItemId::from(*id)).collect(),
            alert_items: vec![ItemId::from("thin")],
            fail_preview: false,
        })
    }

    async fn drain_items(mut rx: ReplyStream<ItemReply>) -> Vec<ItemReply> {
        let mut replies = Vec::new();
        while let Some(reply) = rx.recv().await {
            replies.push(reply);
        }
        replies
    }

    #[tokio::test]
    async fn test_item_job_reports_progress_then_done() {
        let worker = worker(&[]);
        let replies = drain_items(worker.submit_item(&Item::new("a", 10), &JobSettings::default())).await;

        assert_eq!(replies.len(), 5);
        assert_eq!(replies.last(), Some(&ItemReply::Done));
        assert_eq!(
            replies[3],
            ItemReply::Progress {
                fraction: 1.0,
                message: Some("surfaces".to_string())
            }
        );
        assert_eq!(worker.submitted_items(), vec![ItemId::from("a")]);
    }

    #[tokio::test]
    async fn test_failing_item_ends_with_error() {
        let worker = worker(&["bad"]);
        let replies = drain_items(worker.submit_item(&Item::new("bad", 10), &JobSettings::default())).await;

        assert!(matches!(replies.last(), Some(ItemReply::Error(_))));
        assert!(!replies.contains(&ItemReply::Done));
    }

    #[tokio::test]
    async fn test_alert_item_still_finishes() {
        let worker = worker(&[]);
        let replies = drain_items(worker.submit_item(&Item::new("thin", 10), &JobSettings::default())).await;

        assert_eq!(replies.len(), 6);
        assert_eq!(replies[1], ItemReply::Alert("thin: thin walls detected".to_string()));
        assert_eq!(replies.last(), Some(&ItemReply::Done));
    }

    #[tokio::test]
    async fn test_batch_streams_layers() {
        let worker = worker(&[]);
        let items = vec![Item::new("a", 100), Item::new("b", 50)];
        let mut rx = worker.submit_batch(&items, &JobSettings::default());

        let mut layers = 0;
        let mut done = None;
        while let Some(reply) = rx.recv().await {
            match reply {
                BatchReply::Progress { layer: Some(_), .. } => layers += 1,
                BatchReply::Done(output) => done = Some(output),
                _ => {}
            }
        }

        assert_eq!(layers, 4);
        assert_eq!(done.and_then(|o| o.max_speed), Some(120.0));
        assert_eq!(worker.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_drops_jobs() {
        let worker = SimulatedWorker::new(WorkerConfig {
            steps: 10,
            step_delay_ms: 50,
            ..WorkerConfig::default()
        });
        let mut rx = worker.submit_item(&Item::new("a", 10), &JobSettings::default());
        assert!(worker.is_busy());

        worker.restart();
        assert_eq!(worker.restart_count(), 1);

        // Stream closes without a terminal reply
        while let Some(reply) = rx.recv().await {
            assert!(!matches!(reply, ItemReply::Done | ItemReply::Error(_)));
        }
        assert!(!worker.is_busy());
    }

    #[test]
    fn test_parse_gcode_layers() {
        let code = "G28\n;LAYER:0\nG1 X1 Y1\nG1 X2 Y2\n;LAYER:1\nG0 X0\n;LAYER:2\n";
        let layers = parse_layers(code, CodeKind::Gcode);
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].moves, 2);
        assert_eq!(layers[1].moves, 1);
    }

    #[test]
    fn test_parse_svg() {
        assert!(parse_layers("<svg></svg>", CodeKind::Svg).is_empty());
        let layers = parse_layers("<svg><path d=''/><path d=''/></svg>", CodeKind::Svg);
        assert_eq!(layers[0].moves, 2);
    }
}
