//! Pipeline counters and per-stage segment timings.

use crate::model::{ItemId, Stage};
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Counters for a controller's lifetime.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Stage runs started (cache hits excluded)
    pub stages_started: AtomicU64,

    /// Stage runs that reached successful finalization
    pub stages_completed: AtomicU64,

    /// Stage runs that ended in a computation error
    pub stages_failed: AtomicU64,

    /// Items handed to the worker
    pub items_submitted: AtomicU64,

    /// Items the worker finished
    pub items_completed: AtomicU64,

    /// Items the worker failed
    pub items_failed: AtomicU64,

    /// Whole-collection jobs handed to the worker
    pub batches_submitted: AtomicU64,

    /// Requests satisfied by the completion cache
    pub cache_hits: AtomicU64,

    /// Preview requests that advanced the display mode
    pub mode_cycles: AtomicU64,

    /// User cancellations that restarted the worker
    pub cancellations: AtomicU64,

    /// Worker restarts after stage errors
    pub error_restarts: AtomicU64,

    /// Start time
    start_time: Option<Instant>,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_stage_started(&self) {
        Self::bump(&self.stages_started);
    }

    pub fn add_stage_completed(&self) {
        Self::bump(&self.stages_completed);
    }

    pub fn add_stage_failed(&self) {
        Self::bump(&self.stages_failed);
    }

    pub fn add_item_submitted(&self) {
        Self::bump(&self.items_submitted);
    }

    pub fn add_item_completed(&self) {
        Self::bump(&self.items_completed);
    }

    pub fn add_item_failed(&self) {
        Self::bump(&self.items_failed);
    }

    pub fn add_batch_submitted(&self) {
        Self::bump(&self.batches_submitted);
    }

    pub fn add_cache_hit(&self) {
        Self::bump(&self.cache_hits);
    }

    pub fn add_mode_cycle(&self) {
        Self::bump(&self.mode_cycles);
    }

    pub fn add_cancellation(&self) {
        Self::bump(&self.cancellations);
    }

    pub fn add_error_restart(&self) {
        Self::bump(&self.error_restarts);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get items completed per second.
    pub fn items_per_second(&self) -> f64 {
        let items = self.items_completed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            items as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            stages_started: self.stages_started.load(Ordering::Relaxed),
            stages_completed: self.stages_completed.load(Ordering::Relaxed),
            stages_failed: self.stages_failed.load(Ordering::Relaxed),
            items_submitted: self.items_submitted.load(Ordering::Relaxed),
            items_completed: self.items_completed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            mode_cycles: self.mode_cycles.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            error_restarts: self.error_restarts.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            items_per_second: self.items_per_second(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub stages_started: u64,
    pub stages_completed: u64,
    pub stages_failed: u64,
    pub items_submitted: u64,
    pub items_completed: u64,
    pub items_failed: u64,
    pub batches_submitted: u64,
    pub cache_hits: u64,
    pub mode_cycles: u64,
    pub cancellations: u64,
    pub error_restarts: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub items_per_second: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        println!("\n=== Pipeline Summary ===");
        println!("Total time: {:.2}s", self.elapsed.as_secs_f64());
        println!(
            "Stages: {} started, {} completed, {} failed",
            self.stages_started, self.stages_completed, self.stages_failed
        );
        println!(
            "Items: {} submitted, {} completed, {} failed",
            self.items_submitted, self.items_completed, self.items_failed
        );
        println!("Preview batches: {}", self.batches_submitted);
        println!("Cache hits: {}", self.cache_hits);
        if self.mode_cycles > 0 {
            println!("Preview mode cycles: {}", self.mode_cycles);
        }
        if self.cancellations > 0 || self.error_restarts > 0 {
            println!(
                "Worker restarts: {} cancelled, {} after errors",
                self.cancellations, self.error_restarts
            );
        }
        println!("========================\n");
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Stages: {} started, {} completed, {} failed | \
             Items: {} submitted, {} completed, {} failed | \
             Batches: {} | Cache hits: {} | Cancellations: {} | Elapsed: {:.1}s",
            self.stages_started,
            self.stages_completed,
            self.stages_failed,
            self.items_submitted,
            self.items_completed,
            self.items_failed,
            self.batches_submitted,
            self.cache_hits,
            self.cancellations,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// A named span of a stage run, delimited by worker status messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub label: String,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

/// Segment breakdown of one finished stage run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTimings {
    pub stage: Stage,
    pub segments: Vec<Segment>,
    #[serde(serialize_with = "serialize_duration")]
    pub total: Duration,
}

impl std::fmt::Display for StageTimings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} timings: total {:.1}ms", self.stage, self.total.as_secs_f64() * 1000.0)?;
        for segment in &self.segments {
            write!(
                f,
                " | {} {:.1}ms",
                segment.label,
                segment.elapsed.as_secs_f64() * 1000.0
            )?;
        }
        Ok(())
    }
}

/// Splits a run into segments whenever the worker's status message changes.
///
/// Labels are `"<n> <message>"`, prefixed with the item id when the run
/// covers more than one item.
#[derive(Debug)]
pub struct SegmentClock {
    stage: Stage,
    multi_item: bool,
    started: Instant,
    segment_start: Instant,
    current: Option<(Option<ItemId>, String)>,
    counter: usize,
    segments: Vec<Segment>,
}

impl SegmentClock {
    pub fn new(stage: Stage, multi_item: bool) -> Self {
        let now = Instant::now();
        Self {
            stage,
            multi_item,
            started: now,
            segment_start: now,
            current: None,
            counter: 0,
            segments: Vec::new(),
        }
    }

    /// Note a status message; a change closes the running segment.
    pub fn observe(&mut self, item: Option<&ItemId>, message: Option<&str>) {
        let Some(message) = message else {
            return;
        };
        if let Some((_, current)) = &self.current {
            if current == message {
                return;
            }
        }
        self.close();
        self.current = Some((item.cloned(), message.to_string()));
    }

    /// Close the running segment, if any.
    pub fn close(&mut self) {
        let now = Instant::now();
        if let Some((item, message)) = self.current.take() {
            let label = match item {
                Some(id) if self.multi_item => format!("{} {} {}", id, self.counter, message),
                _ => format!("{} {}", self.counter, message),
            };
            self.counter += 1;
            self.segments.push(Segment {
                label,
                elapsed: now - self.segment_start,
            });
        }
        self.segment_start = now;
    }

    pub fn finish(mut self) -> StageTimings {
        self.close();
        StageTimings {
            stage: self.stage,
            segments: self.segments,
            total: self.started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_snapshot() {
        let metrics = Metrics::new();

        metrics.add_stage_started();
        metrics.add_item_submitted();
        metrics.add_item_submitted();
        metrics.add_item_completed();
        metrics.add_item_failed();
        metrics.add_stage_failed();
        metrics.add_cache_hit();

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.stages_started, 1);
        assert_eq!(snapshot.items_submitted, 2);
        assert_eq!(snapshot.items_completed, 1);
        assert_eq!(snapshot.items_failed, 1);
        assert_eq!(snapshot.stages_failed, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.stages_completed, 0);
    }

    #[test]
    fn test_zero_elapsed_no_panic() {
        let metrics = Metrics {
            start_time: None,
            ..Default::default()
        };
        metrics.add_item_completed();
        assert_eq!(metrics.items_per_second(), 0.0);
    }

    #[test]
    fn test_snapshot_display() {
        let metrics = Metrics::new();
        metrics.add_batch_submitted();
        metrics.add_cancellation();

        let display = format!("{}", metrics.snapshot());
        assert!(display.contains("Batches: 1"));
        assert!(display.contains("Cancellations: 1"));
    }

    #[test]
    fn test_snapshot_save_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");
        let metrics = Metrics::new();
        metrics.add_stage_completed();

        metrics
            .snapshot()
            .save_to_file(path.to_str().unwrap())
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["stages_completed"], 1);
        assert!(json["elapsed"].is_f64());
    }

    #[test]
    fn test_segment_clock_labels() {
        let a = ItemId::from("a");
        let b = ItemId::from("b");
        let mut clock = SegmentClock::new(Stage::Slice, true);

        clock.observe(Some(&a), Some("slicing"));
        clock.observe(Some(&a), Some("slicing"));
        clock.observe(Some(&a), None);
        clock.observe(Some(&a), Some("surfaces"));
        clock.close();
        clock.observe(Some(&b), Some("slicing"));

        let timings = clock.finish();
        let labels: Vec<_> = timings.segments.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["a 0 slicing", "a 1 surfaces", "b 2 slicing"]);
        assert_eq!(timings.stage, Stage::Slice);
    }

    #[test]
    fn test_segment_clock_single_item_labels() {
        let mut clock = SegmentClock::new(Stage::Preview, false);
        clock.observe(None, Some("preview"));
        let timings = clock.finish();
        assert_eq!(timings.segments[0].label, "0 preview");
        assert!(timings.to_string().starts_with("preview timings"));
    }
}
