//! Micro Inference Engine
//!
//! A small interpreter for quantized int8 models that runs entirely out of
//! one caller-provided arena: operator registry, head/tail arena
//! allocators, resource variables, a tick-based profiler and reference
//! kernels for the operators the harness registers.

pub mod allocator;
pub mod builder;
mod error;
pub mod interpreter;
mod kernels;
pub mod model;
pub mod ops;
pub mod profiler;
pub mod recording;
pub mod resolver;
pub mod resource;
pub mod tensor;

pub use allocator::{AllocationTag, ArenaAllocator, ArenaRegion, SimpleArenaAllocator};
pub use builder::{ModelBuilder, example_lstm_model};
pub use error::EngineError;
pub use interpreter::Interpreter;
pub use model::{DataType, Model, ModelDef, QuantParams};
pub use ops::BuiltinOperator;
pub use profiler::{LatencyReport, MicroProfiler, Profiler};
pub use recording::{AllocationReport, RecordingAllocator};
pub use resolver::{OpLookup, OpResolver};
pub use resource::ResourceVariables;
pub use tensor::{TensorView, TensorViewMut};

/// Schema version written into and expected from model headers
pub const SCHEMA_VERSION: u32 = 3;
