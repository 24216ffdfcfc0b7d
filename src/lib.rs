//! Toolpath Pipeline
//!
//! Orchestrates the dependent, cancellable computation stages of a
//! slicing / CAM / laser front end (SLICE -> PREVIEW -> EXPORT) on top of an
//! out-of-process worker.
//!
//! # Architecture
//!
//! The crate consists of:
//!
//! - **Model**: items, stages and preview/process modes
//! - **Worker**: the message-stream contract to the computation engine, plus
//!   an in-process simulated worker
//! - **Frontend**: event, view and progress collaborators
//! - **Pipeline**: weighted progress, per-item tasks, stage runs and the
//!   controller with its completion cache
//!
//! # Usage
//!
//! ```no_run
//! use toolpath_pipeline::{run_pipeline, Config, Stage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let report = run_pipeline(config, Stage::Export).await?;
//!     println!("{}", report.metrics);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod frontend;
pub mod model;
pub mod pipeline;
pub mod worker;

pub use config::Config;
pub use error::PipelineError;
pub use frontend::{Frontend, LogFrontend, PipelineEvent, Recorder};
pub use model::{Item, ItemCollection, ItemId, PreviewMode, ProcessMode, Stage, StaticCollection, View};
pub use pipeline::{Metrics, MetricsSnapshot, PipelineController, ProgressWindow};
pub use worker::{PreviewOutput, SimulatedWorker, WorkerClient};

use anyhow::Result;
use std::sync::Arc;

/// Outcome of a headless run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub target: Stage,
    pub metrics: MetricsSnapshot,
    /// Preview layers, when the target was PREVIEW or EXPORT
    pub output: Option<Arc<PreviewOutput>>,
}

/// Drive the configured items up to `target` against the simulated worker,
/// reporting through `tracing`.
pub async fn run_pipeline(config: Config, target: Stage) -> Result<RunReport> {
    config.validate()?;

    tracing::info!("Starting toolpath pipeline ({} -> {})", config.device.name, target);
    tracing::info!(
        "{} items, process mode {}, preview mode {}",
        config.items.len(),
        config.process.mode,
        config.process.preview_mode
    );

    let items = Arc::new(StaticCollection::new(config.items.clone()));
    let worker = Arc::new(SimulatedWorker::new(config.worker.clone()));
    let controller = PipelineController::new(&config, items, worker, Frontend::logging());

    let output = match target {
        Stage::Slice => {
            controller.slice().await?;
            None
        }
        Stage::Preview => {
            controller.preview().await?;
            controller.context().preview_output()
        }
        Stage::Export => Some(controller.export(|ctx| ctx.output).await?),
    };

    let metrics = controller.metrics().snapshot();
    if config.processing.enable_metrics {
        metrics.print_summary();
    }
    if let Some(path) = &config.processing.metrics_output_path {
        metrics.save_to_file(path)?;
    }

    tracing::info!("Pipeline complete: {}", metrics);

    Ok(RunReport {
        target,
        metrics,
        output,
    })
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;

    fn quick_config() -> Config {
        Config {
            worker: WorkerConfig {
                steps: 2,
                step_delay_ms: 0,
                layers_per_item: 3,
                ..Default::default()
            },
            items: vec![Item::new("bracket", 300), Item::new("gear", 100)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_pipeline_to_export() {
        let mut config = quick_config();
        config.processing.enable_metrics = false;

        let report = run_pipeline(config, Stage::Export).await.unwrap();
        assert_eq!(report.metrics.stages_completed, 2);
        assert_eq!(report.metrics.items_completed, 2);
        assert_eq!(report.output.unwrap().layers.len(), 6);
    }

    #[tokio::test]
    async fn test_run_pipeline_saves_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let mut config = quick_config();
        config.processing.enable_metrics = false;
        config.processing.metrics_output_path = Some(path.to_string_lossy().into_owned());

        let report = run_pipeline(config, Stage::Slice).await.unwrap();
        assert!(report.output.is_none());

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["items_submitted"], 2);
    }

    #[tokio::test]
    async fn test_run_pipeline_rejects_invalid_config() {
        let mut config = quick_config();
        config.processing.slice_share = 0.0;
        assert!(run_pipeline(config, Stage::Slice).await.is_err());
    }
}
