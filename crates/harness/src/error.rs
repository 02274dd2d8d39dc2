//! Harness Error Types

use micro_engine::EngineError;
use thiserror::Error;

/// Model/engine contract violations the harness must never continue past
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralViolation {
    #[error("Model provided is schema version {found} not equal to supported version {expected}")]
    SchemaVersionMismatch { found: u32, expected: u32 },

    #[error("Model has no {role} tensor {index}")]
    MissingTensor { role: &'static str, index: usize },

    #[error("Input {index} has shape {dims:?}, expected {expected}")]
    UnexpectedShape {
        index: usize,
        dims: Vec<i32>,
        expected: &'static str,
    },

    #[error("Model has {found} inputs, expected {expected}")]
    UnexpectedInputCount { found: usize, expected: usize },
}

/// Errors from one harness call
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Op registration failed: {0}")]
    OpRegistration(#[source] EngineError),

    #[error("Failed to allocate tensors: {0}")]
    AllocationFailed(#[source] EngineError),

    #[error("Invocation {iteration} failed: {source}")]
    InvocationFailed {
        iteration: u32,
        #[source]
        source: EngineError,
    },

    #[error("Arena is already in use by another call")]
    Busy,

    #[error("Unrecoverable: {0}")]
    Unrecoverable(#[from] StructuralViolation),
}

impl HarnessError {
    /// Whether the caller must stop rather than report a status
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, HarnessError::Unrecoverable(_))
    }
}
