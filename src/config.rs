//! Configuration for the toolpath pipeline.

use crate::model::{Item, ItemId, PreviewMode, ProcessMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for a pipeline session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target device
    #[serde(default)]
    pub device: DeviceConfig,

    /// Process settings
    #[serde(default)]
    pub process: ProcessConfig,

    /// Orchestration settings
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Simulated worker behavior (CLI runs and tests)
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Document items for CLI runs
    #[serde(default)]
    pub items: Vec<Item>,
}

/// Target device description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Display name
    #[serde(default = "default_device_name")]
    pub name: String,

    /// Number of independent output channels (extruders / tools).
    /// More than one enables preview mode cycling.
    #[serde(default = "default_extruders")]
    pub extruders: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            extruders: default_extruders(),
        }
    }
}

impl DeviceConfig {
    /// Whether the device exposes more than one output channel.
    pub fn is_multi_channel(&self) -> bool {
        self.extruders > 1
    }
}

/// Process settings sent to the worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Machine kind
    #[serde(default)]
    pub mode: ProcessMode,

    /// Initial preview display mode
    #[serde(default)]
    pub preview_mode: PreviewMode,
}

/// Orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Share of the progress bar given to SLICE when PREVIEW chains it
    #[serde(default = "default_slice_share")]
    pub slice_share: f64,

    /// Show "Rendering" alerts while a stage finalizes
    #[serde(default)]
    pub work_alerts: bool,

    /// Log a metrics summary after CLI runs
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Optional path to save metrics JSON after a CLI run
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            slice_share: default_slice_share(),
            work_alerts: false,
            enable_metrics: true,
            metrics_output_path: None,
        }
    }
}

/// Simulated worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Progress messages per sliced item
    #[serde(default = "default_steps")]
    pub steps: usize,

    /// Delay between progress messages in milliseconds
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,

    /// Preview layers produced per item
    #[serde(default = "default_layers_per_item")]
    pub layers_per_item: usize,

    /// Items that fail to slice
    #[serde(default)]
    pub fail_items: Vec<ItemId>,

    /// Items that raise a user-visible alert while slicing
    #[serde(default)]
    pub alert_items: Vec<ItemId>,

    /// Fail every preview batch
    #[serde(default)]
    pub fail_preview: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            step_delay_ms: default_step_delay_ms(),
            layers_per_item: default_layers_per_item(),
            fail_items: Vec::new(),
            alert_items: Vec::new(),
            fail_preview: false,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // YAML is a superset of JSON
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.device.extruders == 0 {
            anyhow::bail!("Device must have at least one extruder");
        }
        let share = self.processing.slice_share;
        if !(share > 0.0 && share < 1.0) {
            anyhow::bail!("slice_share must be between 0 and 1 (exclusive), got {}", share);
        }
        if self.worker.steps == 0 {
            anyhow::bail!("Worker steps must be > 0");
        }

        let mut seen = std::collections::HashSet::new();
        for item in &self.items {
            if !seen.insert(&item.id) {
                anyhow::bail!("Duplicate item id: {}", item.id);
            }
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_device_name() -> String { "generic".to_string() }
fn default_extruders() -> usize { 1 }
pub(crate) fn default_slice_share() -> f64 { 0.75 }
fn default_true() -> bool { true }
fn default_steps() -> usize { 10 }
fn default_step_delay_ms() -> u64 { 20 }
fn default_layers_per_item() -> usize { 4 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device.extruders, 1);
        assert!(!config.device.is_multi_channel());
        assert_eq!(config.process.mode, ProcessMode::Fdm);
        assert_eq!(config.processing.slice_share, 0.75);
        assert!(config.items.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
device:
  name: dual
  extruders: 2
process:
  mode: cam
  preview_mode: tools
worker:
  steps: 3
  fail_items: [bracket]
items:
  - id: bracket
    vertex_count: 300
  - id: gear
    vertex_count: 100
    disabled: true
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.device.is_multi_channel());
        assert_eq!(config.process.mode, ProcessMode::Cam);
        assert_eq!(config.process.preview_mode, PreviewMode::Tools);
        assert_eq!(config.worker.steps, 3);
        assert_eq!(config.worker.fail_items, vec![ItemId::from("bracket")]);
        assert_eq!(config.items.len(), 2);
        assert!(config.items[1].disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid() {
        let mut config = Config::default();
        config.device.extruders = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.processing.slice_share = 1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.items = vec![Item::new("a", 1), Item::new("a", 2)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"device": {{"extruders": 3}}, "items": [{{"id": "a", "vertex_count": 5}}]}}"#).unwrap();

        let config = Config::from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.device.extruders, 3);
        assert_eq!(config.items[0].vertex_count, 5);
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = Config::default();
        config.items.push(Item::new("a", 12));
        let yaml = config.to_yaml().unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.items, config.items);
    }
}
