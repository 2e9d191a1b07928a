//! Value-based errors returned across the kernel boundary.

use thiserror::Error;

use crate::core::types::Stage;

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// Malformed caller input, rejected before any stage runs.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A computation was attempted without the data it requires.
    #[error("precondition violated for {operation}: missing {}", .missing.join(", "))]
    Precondition {
        operation: &'static str,
        missing: Vec<String>,
    },

    /// A persisted record whose stage outputs have the wrong shape.
    #[error("structurally invalid stage outputs: {0}")]
    Structural(String),

    /// A stage agent hit an error no defaulting can repair.
    #[error("stage {stage} failed: {message}")]
    Stage { stage: Stage, message: String },

    /// An attempt to overwrite or reorder committed stage outputs.
    #[error("cannot append {stage}: {reason}")]
    Append { stage: Stage, reason: String },

    /// A parallel variant run panicked before producing a result.
    #[error("variant worker panicked: {0}")]
    Worker(String),
}

impl KernelError {
    pub(crate) fn stage(stage: Stage, message: impl Into<String>) -> Self {
        KernelError::Stage {
            stage,
            message: message.into(),
        }
    }
}
