//! Engine Error Types

use crate::ops::BuiltinOperator;
use thiserror::Error;

/// Errors raised by the micro interpreter
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Operator registry is at capacity
    #[error("Op registry full: cannot add {op:?}, capacity is {capacity}")]
    RegistryFull { op: BuiltinOperator, capacity: usize },

    /// Operator registered more than once
    #[error("Operator {0:?} is already registered")]
    DuplicateOperator(BuiltinOperator),

    /// Graph references an operator the registry does not provide
    #[error("Didn't find op for builtin opcode {0:?}")]
    UnregisteredOperator(BuiltinOperator),

    /// Arena cannot satisfy an allocation
    #[error("Arena exhausted: requested {requested} bytes, {available} available")]
    ArenaExhausted { requested: usize, available: usize },

    /// Model bytes could not be decoded
    #[error("Malformed model: {0}")]
    MalformedModel(String),

    /// Graph is structurally inconsistent
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// Tensor access before a successful `allocate_tensors`
    #[error("Tensors have not been allocated")]
    TensorsNotAllocated,

    /// Kernel evaluation failed
    #[error("Node {node} ({op:?}) failed: {reason}")]
    KernelFailure {
        node: usize,
        op: BuiltinOperator,
        reason: String,
    },

    /// Resource variable misuse
    #[error("Resource variable error: {0}")]
    ResourceVariable(String),
}

impl From<postcard::Error> for EngineError {
    fn from(err: postcard::Error) -> Self {
        EngineError::MalformedModel(err.to_string())
    }
}
