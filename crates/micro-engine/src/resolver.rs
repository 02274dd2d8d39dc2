//! Fixed-capacity operator registry

use crate::{EngineError, ops::BuiltinOperator};
use tracing::{debug, warn};

/// Lookup side of an operator registry, as seen by the interpreter
pub trait OpLookup {
    /// Whether `op` has been registered
    fn find(&self, op: BuiltinOperator) -> bool;

    /// Registered operators in registration order
    fn registered(&self) -> &[BuiltinOperator];
}

/// Append-only operator registry holding at most `N` kinds
#[derive(Debug, Clone)]
pub struct OpResolver<const N: usize> {
    ops: Vec<BuiltinOperator>,
}

impl<const N: usize> Default for OpResolver<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> OpResolver<N> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            ops: Vec::with_capacity(N),
        }
    }

    /// Register an operator kind.
    ///
    /// Fails when the registry is full or the kind is already present;
    /// the registry is left unchanged on failure.
    pub fn add(&mut self, op: BuiltinOperator) -> Result<(), EngineError> {
        if self.find(op) {
            warn!("Calling add with the same op more than once is not supported (op: {})", op);
            return Err(EngineError::DuplicateOperator(op));
        }
        if self.ops.len() >= N {
            warn!("Couldn't register builtin op #{}, resolver size is too small ({})", op, N);
            return Err(EngineError::RegistryFull { op, capacity: N });
        }
        self.ops.push(op);
        debug!("Registered op {}", op);
        Ok(())
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is registered yet
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Registry capacity
    pub fn capacity(&self) -> usize {
        N
    }

    pub fn add_fully_connected(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::FullyConnected)
    }

    pub fn add_reshape(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Reshape)
    }

    pub fn add_max_pool_2d(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::MaxPool2D)
    }

    pub fn add_slice(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Slice)
    }

    pub fn add_logistic(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Logistic)
    }

    pub fn add_add(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Add)
    }

    pub fn add_mul(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Mul)
    }

    pub fn add_tanh(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Tanh)
    }

    pub fn add_concatenation(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Concatenation)
    }

    pub fn add_transpose(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Transpose)
    }

    pub fn add_unpack(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Unpack)
    }

    pub fn add_conv_2d(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Conv2D)
    }

    pub fn add_split(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Split)
    }

    pub fn add_strided_slice(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::StridedSlice)
    }

    pub fn add_pack(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Pack)
    }

    pub fn add_shape(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Shape)
    }

    pub fn add_expand_dims(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::ExpandDims)
    }

    pub fn add_softmax(&mut self) -> Result<(), EngineError> {
        self.add(BuiltinOperator::Softmax)
    }
}

impl<const N: usize> OpLookup for OpResolver<N> {
    fn find(&self, op: BuiltinOperator) -> bool {
        self.ops.contains(&op)
    }

    fn registered(&self) -> &[BuiltinOperator] {
        &self.ops
    }
}
