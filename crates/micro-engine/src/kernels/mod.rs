//! Reference int8 kernels
//!
//! Every kernel has a `prepare` step, run once while binding, that checks
//! the node against the declared tensor shapes and reports how many bytes
//! of persistent op data it needs. The `eval` step fills one output tensor
//! of the node. Requantization goes through `f32`.

mod dense;
mod elementwise;
mod movement;
mod softmax;

use crate::model::{DataType, QuantParams};
use crate::ops::{Activation, BuiltinOperator, OperatorOptions};
use crate::tensor::{BoundTensor, Storage};

/// A node ready for evaluation
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub op: BuiltinOperator,
    pub inputs: Vec<Option<usize>>,
    pub outputs: Vec<usize>,
    pub options: OperatorOptions,
}

/// Input data for one eval call
///
/// The arena is split around the output being written, so inputs are
/// served from the bytes below (`lo`) or above (`hi`) it.
#[derive(Clone, Copy)]
pub(crate) struct Inputs<'b> {
    pub lo: &'b [u8],
    pub hi: &'b [u8],
    pub hi_base: usize,
    pub buffers: &'b [Vec<u8>],
}

impl<'b> Inputs<'b> {
    /// Bytes backing `tensor`
    pub fn data(&self, tensor: &BoundTensor) -> Result<&'b [u8], String> {
        match tensor.storage {
            Storage::Constant(i) => self
                .buffers
                .get(i)
                .map(|b| b.as_slice())
                .ok_or_else(|| format!("missing buffer {} for '{}'", i, tensor.name)),
            Storage::Arena(r) if r.end() <= self.lo.len() => Ok(&self.lo[r.offset..r.end()]),
            Storage::Arena(r) if r.offset >= self.hi_base => {
                Ok(&self.hi[r.offset - self.hi_base..r.end() - self.hi_base])
            }
            Storage::Arena(_) => Err(format!("'{}' aliases the output", tensor.name)),
            Storage::Unallocated => Err(format!("'{}' has no storage", tensor.name)),
        }
    }
}

/// Validate a node and return the persistent op data it needs, in bytes
pub(crate) fn prepare(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    match node.op {
        BuiltinOperator::Add | BuiltinOperator::Mul => elementwise::prepare_binary(node, tensors),
        BuiltinOperator::Logistic | BuiltinOperator::Tanh => {
            elementwise::prepare_unary(node, tensors)
        }
        BuiltinOperator::FullyConnected => dense::prepare_fully_connected(node, tensors),
        BuiltinOperator::Conv2D => dense::prepare_conv_2d(node, tensors),
        BuiltinOperator::MaxPool2D => dense::prepare_max_pool_2d(node, tensors),
        BuiltinOperator::Softmax => softmax::prepare(node, tensors),
        BuiltinOperator::Reshape => movement::prepare_reshape(node, tensors),
        BuiltinOperator::ExpandDims => movement::prepare_expand_dims(node, tensors),
        BuiltinOperator::Shape => movement::prepare_shape(node, tensors),
        BuiltinOperator::Transpose => movement::prepare_transpose(node, tensors),
        BuiltinOperator::Concatenation => movement::prepare_concatenation(node, tensors),
        BuiltinOperator::Pack => movement::prepare_pack(node, tensors),
        BuiltinOperator::Unpack => movement::prepare_unpack(node, tensors),
        BuiltinOperator::Split => movement::prepare_split(node, tensors),
        BuiltinOperator::Slice => movement::prepare_slice(node, tensors),
        BuiltinOperator::StridedSlice => movement::prepare_strided_slice(node, tensors),
    }
}

/// Compute output `output` of `node` into `out`
pub(crate) fn eval(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    output: usize,
    out: &mut [u8],
) -> Result<(), String> {
    match node.op {
        BuiltinOperator::Add | BuiltinOperator::Mul => {
            elementwise::eval_binary(node, tensors, inputs, out)
        }
        BuiltinOperator::Logistic | BuiltinOperator::Tanh => {
            elementwise::eval_unary(node, tensors, inputs, out)
        }
        BuiltinOperator::FullyConnected => dense::eval_fully_connected(node, tensors, inputs, out),
        BuiltinOperator::Conv2D => dense::eval_conv_2d(node, tensors, inputs, out),
        BuiltinOperator::MaxPool2D => dense::eval_max_pool_2d(node, tensors, inputs, out),
        BuiltinOperator::Softmax => softmax::eval(node, tensors, inputs, out),
        BuiltinOperator::Reshape | BuiltinOperator::ExpandDims => {
            movement::eval_copy(node, tensors, inputs, out)
        }
        BuiltinOperator::Shape => movement::eval_shape(node, tensors, out),
        BuiltinOperator::Transpose => movement::eval_transpose(node, tensors, inputs, out),
        BuiltinOperator::Concatenation => {
            movement::eval_concatenation(node, tensors, inputs, out)
        }
        BuiltinOperator::Pack => movement::eval_pack(node, tensors, inputs, out),
        BuiltinOperator::Unpack => movement::eval_unpack(node, tensors, inputs, output, out),
        BuiltinOperator::Split => movement::eval_split(node, tensors, inputs, output, out),
        BuiltinOperator::Slice | BuiltinOperator::StridedSlice => {
            movement::eval_slice(node, tensors, inputs, out)
        }
    }
}

// Node accessors

fn input<'t>(node: &Node, tensors: &'t [BoundTensor], i: usize) -> Result<&'t BoundTensor, String> {
    node.inputs
        .get(i)
        .copied()
        .flatten()
        .and_then(|t| tensors.get(t))
        .ok_or_else(|| format!("missing input {}", i))
}

fn optional_input<'t>(
    node: &Node,
    tensors: &'t [BoundTensor],
    i: usize,
) -> Option<&'t BoundTensor> {
    node.inputs.get(i).copied().flatten().and_then(|t| tensors.get(t))
}

fn output<'t>(
    node: &Node,
    tensors: &'t [BoundTensor],
    i: usize,
) -> Result<&'t BoundTensor, String> {
    node.outputs
        .get(i)
        .and_then(|&t| tensors.get(t))
        .ok_or_else(|| format!("missing output {}", i))
}

fn expect_io(node: &Node, inputs: usize, outputs: usize) -> Result<(), String> {
    if node.inputs.len() < inputs || node.outputs.len() != outputs {
        return Err(format!(
            "expected {} inputs and {} outputs, got {} and {}",
            inputs,
            outputs,
            node.inputs.len(),
            node.outputs.len()
        ));
    }
    Ok(())
}

fn expect_dims(tensor: &BoundTensor, expected: &[i32]) -> Result<(), String> {
    if tensor.dims != expected {
        return Err(format!(
            "'{}' has shape {:?}, expected {:?}",
            tensor.name, tensor.dims, expected
        ));
    }
    Ok(())
}

fn expect_dtype(tensor: &BoundTensor, dtype: DataType) -> Result<(), String> {
    if tensor.dtype != dtype {
        return Err(format!(
            "'{}' is {:?}, expected {:?}",
            tensor.name, tensor.dtype, dtype
        ));
    }
    Ok(())
}

fn normalize_axis(axis: i32, rank: usize) -> Result<usize, String> {
    let axis = if axis < 0 { axis + rank as i32 } else { axis };
    if axis < 0 || axis as usize >= rank {
        return Err(format!("axis {} out of range for rank {}", axis, rank));
    }
    Ok(axis as usize)
}

// Quantization helpers

fn dequantize(q: i8, qp: QuantParams) -> f32 {
    (q as i32 - qp.zero_point) as f32 * qp.scale
}

fn quantize(x: f32, qp: QuantParams) -> i8 {
    let q = (x / qp.scale).round() as i32 + qp.zero_point;
    q.clamp(i8::MIN as i32, i8::MAX as i32) as i8
}

fn requantize(q: i8, from: QuantParams, to: QuantParams) -> i8 {
    if from == to {
        q
    } else {
        quantize(dequantize(q, from), to)
    }
}

/// Lowest quantized value an activation lets through
fn activation_floor(activation: Activation, qp: QuantParams) -> i8 {
    match activation {
        Activation::None => i8::MIN,
        Activation::Relu => quantize(0.0, qp),
    }
}

/// Row-major strides in elements
fn strides(dims: &[i32]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for d in (0..dims.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * dims[d + 1].max(0) as usize;
    }
    strides
}

/// Fill `out` element by element, taking each from `src` at the element
/// index `map` returns for the output coordinate.
fn gather(
    out: &mut [u8],
    src: &[u8],
    elem: usize,
    out_dims: &[i32],
    map: impl Fn(&[usize]) -> usize,
) -> Result<(), String> {
    let count = crate::model::num_elements(out_dims);
    let mut index = vec![0usize; out_dims.len()];
    for i in 0..count {
        let s = map(&index) * elem;
        let chunk = src
            .get(s..s + elem)
            .ok_or_else(|| format!("source index {} out of range", s / elem))?;
        out[i * elem..(i + 1) * elem].copy_from_slice(chunk);

        // Advance the output coordinate, last dimension fastest
        for d in (0..index.len()).rev() {
            index[d] += 1;
            if (index[d] as i32) < out_dims[d] {
                break;
            }
            index[d] = 0;
        }
    }
    Ok(())
}
