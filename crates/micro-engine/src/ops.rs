//! Builtin operator kinds

use serde::{Deserialize, Serialize};

/// Operators the reference kernels implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinOperator {
    FullyConnected,
    Reshape,
    MaxPool2D,
    Slice,
    Logistic,
    Add,
    Mul,
    Tanh,
    Concatenation,
    Transpose,
    Unpack,
    Conv2D,
    Split,
    StridedSlice,
    Pack,
    Shape,
    ExpandDims,
    Softmax,
}

impl BuiltinOperator {
    /// Get string representation, used as the profiler tag
    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinOperator::FullyConnected => "FULLY_CONNECTED",
            BuiltinOperator::Reshape => "RESHAPE",
            BuiltinOperator::MaxPool2D => "MAX_POOL_2D",
            BuiltinOperator::Slice => "SLICE",
            BuiltinOperator::Logistic => "LOGISTIC",
            BuiltinOperator::Add => "ADD",
            BuiltinOperator::Mul => "MUL",
            BuiltinOperator::Tanh => "TANH",
            BuiltinOperator::Concatenation => "CONCATENATION",
            BuiltinOperator::Transpose => "TRANSPOSE",
            BuiltinOperator::Unpack => "UNPACK",
            BuiltinOperator::Conv2D => "CONV_2D",
            BuiltinOperator::Split => "SPLIT",
            BuiltinOperator::StridedSlice => "STRIDED_SLICE",
            BuiltinOperator::Pack => "PACK",
            BuiltinOperator::Shape => "SHAPE",
            BuiltinOperator::ExpandDims => "EXPAND_DIMS",
            BuiltinOperator::Softmax => "SOFTMAX",
        }
    }
}

impl std::fmt::Display for BuiltinOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fused activation applied to an op's output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    None,
    Relu,
}

/// Per-operator parameters
///
/// Convolution and pooling use valid padding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum OperatorOptions {
    #[default]
    None,
    FullyConnected {
        activation: Activation,
    },
    Conv2D {
        stride_h: i32,
        stride_w: i32,
        activation: Activation,
    },
    Pool2D {
        filter_h: i32,
        filter_w: i32,
        stride_h: i32,
        stride_w: i32,
    },
    Elementwise {
        activation: Activation,
    },
    Concatenation {
        axis: i32,
    },
    Pack {
        axis: i32,
    },
    Unpack {
        axis: i32,
    },
    Split {
        axis: i32,
        num_splits: i32,
    },
    Transpose {
        perm: Vec<i32>,
    },
    Slice {
        begin: Vec<i32>,
        /// `-1` takes the rest of the dimension
        size: Vec<i32>,
    },
    StridedSlice {
        begin: Vec<i32>,
        end: Vec<i32>,
        strides: Vec<i32>,
    },
    ExpandDims {
        axis: i32,
    },
    Softmax {
        beta: f32,
    },
}
