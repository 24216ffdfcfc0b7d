//! Error taxonomy for pipeline entry points.

use crate::model::Stage;
use thiserror::Error;

/// Errors surfaced by the pipeline controller.
///
/// Errors are recovered at the stage boundary: a failed stage leaves its
/// completion flag unset, so re-invoking the entry point retries it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// No eligible items (all ignored or disabled). Nothing was mutated.
    #[error("nothing to {stage}")]
    EmptyInput { stage: Stage },

    /// The worker reported a failure for an item or for the batch.
    #[error("{stage} failed: {reason}")]
    StageComputation { stage: Stage, reason: String },

    /// The run was abandoned by `cancel()` or the worker went away.
    #[error("{stage} cancelled")]
    Cancelled { stage: Stage },

    /// A prerequisite stage ran but its completion flag is still unset.
    #[error("{stage} did not complete")]
    Incomplete { stage: Stage },

    /// The worker could not parse a toolpath/gcode document.
    #[error("code parse failed: {0}")]
    Parse(String),

    /// A code parse was abandoned by `cancel()` or the worker went away.
    #[error("code parse cancelled")]
    ParseCancelled,
}

impl PipelineError {
    /// Stage the error belongs to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::EmptyInput { stage }
            | PipelineError::StageComputation { stage, .. }
            | PipelineError::Cancelled { stage }
            | PipelineError::Incomplete { stage } => Some(*stage),
            PipelineError::Parse(_) | PipelineError::ParseCancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled { .. } | PipelineError::ParseCancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::StageComputation {
            stage: Stage::Slice,
            reason: "non-manifold mesh".to_string(),
        };
        assert_eq!(err.to_string(), "slice failed: non-manifold mesh");
        assert_eq!(
            PipelineError::EmptyInput { stage: Stage::Slice }.to_string(),
            "nothing to slice"
        );
    }

    #[test]
    fn test_error_stage() {
        assert_eq!(
            PipelineError::Cancelled { stage: Stage::Preview }.stage(),
            Some(Stage::Preview)
        );
        assert_eq!(PipelineError::Parse("bad".into()).stage(), None);
        assert!(PipelineError::Cancelled { stage: Stage::Slice }.is_cancelled());
        assert!(PipelineError::ParseCancelled.is_cancelled());
        assert_eq!(PipelineError::ParseCancelled.stage(), None);
        assert!(!PipelineError::Parse("bad".into()).is_cancelled());
    }
}
