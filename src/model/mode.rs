//! Stage, view and mode enumerations.

use serde::{Deserialize, Serialize};

/// A dependency-chained unit of pipeline work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Slice,
    Preview,
    Export,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Slice => "slice",
            Stage::Preview => "preview",
            Stage::Export => "export",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a computed preview is colored / displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewMode {
    /// Color by feed rate
    #[default]
    Speed,
    /// Color by tool / extruder
    Tools,
}

impl PreviewMode {
    pub const ALL: [PreviewMode; 2] = [PreviewMode::Speed, PreviewMode::Tools];

    /// The next mode, wrapping after the last.
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl std::fmt::Display for PreviewMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreviewMode::Speed => f.write_str("speed"),
            PreviewMode::Tools => f.write_str("tools"),
        }
    }
}

/// Kind of machine the document targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    /// Filament printing
    #[default]
    Fdm,
    /// Resin printing; slicing and previewing are one operation
    Sla,
    /// Milling
    Cam,
    /// Laser cutting
    Laser,
}

impl std::fmt::Display for ProcessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProcessMode::Fdm => "FDM",
            ProcessMode::Sla => "SLA",
            ProcessMode::Cam => "CAM",
            ProcessMode::Laser => "LASER",
        };
        f.write_str(name)
    }
}

/// Workspace view selected by the view controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Arrange,
    Slice,
    Preview,
}
