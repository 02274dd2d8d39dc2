//! Model assembly
//!
//! [`ModelBuilder`] collects tensors, constant buffers and operators into a
//! [`ModelDef`] and serializes it with a schema header.
//! [`example_lstm_model`] builds the keyword-spotting network the harness
//! ships with.

use crate::model::{DataType, ModelDef, OperatorDef, QuantParams, TensorDef};
use crate::ops::{Activation, BuiltinOperator, OperatorOptions};
use crate::EngineError;

/// Incrementally assembles a [`ModelDef`]
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    def: ModelDef,
}

impl ModelBuilder {
    pub fn new(description: &str) -> Self {
        Self {
            def: ModelDef {
                description: description.to_string(),
                buffers: vec![Vec::new()],
                ..ModelDef::default()
            },
        }
    }

    /// Declare a tensor without constant data; returns its index
    pub fn tensor(
        &mut self,
        name: &str,
        dtype: DataType,
        shape: &[i32],
        quant: Option<QuantParams>,
    ) -> usize {
        self.push_tensor(name, dtype, shape, quant, 0)
    }

    /// Declare a tensor backed by `data`; returns its index
    pub fn constant(
        &mut self,
        name: &str,
        dtype: DataType,
        shape: &[i32],
        quant: Option<QuantParams>,
        data: Vec<u8>,
    ) -> usize {
        self.def.buffers.push(data);
        let buffer = (self.def.buffers.len() - 1) as u32;
        self.push_tensor(name, dtype, shape, quant, buffer)
    }

    /// Append a node
    pub fn operator(
        &mut self,
        op: BuiltinOperator,
        inputs: &[usize],
        outputs: &[usize],
        options: OperatorOptions,
    ) {
        self.def.operators.push(OperatorDef {
            op,
            inputs: inputs.iter().map(|&i| i as i32).collect(),
            outputs: outputs.iter().map(|&o| o as u32).collect(),
            options,
        });
    }

    pub fn inputs(&mut self, tensors: &[usize]) {
        self.def.inputs = tensors.iter().map(|&t| t as u32).collect();
    }

    pub fn outputs(&mut self, tensors: &[usize]) {
        self.def.outputs = tensors.iter().map(|&t| t as u32).collect();
    }

    /// The assembled graph
    pub fn finish(self) -> ModelDef {
        self.def
    }

    /// Serialize with a `version` header
    pub fn build(&self, version: u32) -> Result<Vec<u8>, EngineError> {
        self.def.to_bytes(version)
    }

    fn push_tensor(
        &mut self,
        name: &str,
        dtype: DataType,
        shape: &[i32],
        quant: Option<QuantParams>,
        buffer: u32,
    ) -> usize {
        self.def.tensors.push(TensorDef {
            name: name.to_string(),
            dtype,
            shape: shape.to_vec(),
            buffer,
            quant,
        });
        self.def.tensors.len() - 1
    }
}

/// Deterministic weight generator (64-bit LCG)
struct Weights(u64);

impl Weights {
    fn next(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as u32
    }

    /// `count` int8 values in `[-range, range]`
    fn int8(&mut self, count: usize, range: i32) -> Vec<u8> {
        (0..count)
            .map(|_| ((self.next() % (2 * range as u32 + 1)) as i32 - range) as i8 as u8)
            .collect()
    }

    /// `count` int32 values in `[-range, range]`, little-endian
    fn int32(&mut self, count: usize, range: i32) -> Vec<u8> {
        (0..count)
            .flat_map(|_| ((self.next() % (2 * range as u32 + 1)) as i32 - range).to_le_bytes())
            .collect()
    }
}

fn q(scale: f32, zero_point: i32) -> Option<QuantParams> {
    Some(QuantParams { scale, zero_point })
}

/// Builder plus the weight stream, for wiring up layers
struct Network {
    b: ModelBuilder,
    w: Weights,
}

impl Network {
    fn act(&mut self, name: &str, shape: &[i32], quant: Option<QuantParams>) -> usize {
        self.b.tensor(name, DataType::Int8, shape, quant)
    }

    /// Fully connected layer `x [1, depth] -> [1, units]`
    fn dense(
        &mut self,
        name: &str,
        x: usize,
        depth: i32,
        units: i32,
        weight_scale: f32,
        out_quant: Option<QuantParams>,
    ) -> usize {
        let in_scale = self.b.def.tensors[x].quant.unwrap_or_default().scale;
        let weights = self.w.int8((units * depth) as usize, 64);
        let bias = self.w.int32(units as usize, 256);
        let w = self.b.constant(
            &format!("{}/weights", name),
            DataType::Int8,
            &[units, depth],
            q(weight_scale, 0),
            weights,
        );
        let bias = self.b.constant(
            &format!("{}/bias", name),
            DataType::Int32,
            &[units],
            q(in_scale * weight_scale, 0),
            bias,
        );
        let out = self.act(name, &[1, units], out_quant);
        self.b.operator(
            BuiltinOperator::FullyConnected,
            &[x, w, bias],
            &[out],
            OperatorOptions::FullyConnected {
                activation: Activation::None,
            },
        );
        out
    }

    fn binary(
        &mut self,
        op: BuiltinOperator,
        name: &str,
        a: usize,
        b: usize,
        quant: Option<QuantParams>,
    ) -> usize {
        let out = self.act(name, &[1, 20], quant);
        self.b.operator(op, &[a, b], &[out], OperatorOptions::None);
        out
    }

    fn unary(
        &mut self,
        op: BuiltinOperator,
        name: &str,
        x: usize,
        quant: Option<QuantParams>,
    ) -> usize {
        let out = self.act(name, &[1, 20], quant);
        self.b.operator(op, &[x], &[out], OperatorOptions::None);
        out
    }

    /// One LSTM step over `input` with 20 units; returns `(h, c)`
    fn lstm_cell(
        &mut self,
        name: &str,
        input: usize,
        depth: i32,
        h: usize,
        c: usize,
    ) -> (usize, usize) {
        let concat_q = self.b.def.tensors[input].quant;
        let joined = self.act(&format!("{}/concat", name), &[1, depth + 20], concat_q);
        self.b.operator(
            BuiltinOperator::Concatenation,
            &[input, h],
            &[joined],
            OperatorOptions::Concatenation { axis: 1 },
        );

        let gates_q = q(1.0 / 16.0, 0);
        let gates = self.dense(
            &format!("{}/gates", name),
            joined,
            depth + 20,
            80,
            1.0 / 128.0,
            gates_q,
        );
        let parts: Vec<usize> = ["i", "f", "g", "o"]
            .iter()
            .map(|g| self.act(&format!("{}/split_{}", name, g), &[1, 20], gates_q))
            .collect();
        self.b.operator(
            BuiltinOperator::Split,
            &[gates],
            &parts,
            OperatorOptions::Split {
                axis: 1,
                num_splits: 4,
            },
        );

        let sigmoid_q = q(1.0 / 256.0, -128);
        let tanh_q = q(1.0 / 128.0, 0);
        let cell_q = q(1.0 / 64.0, 0);
        let gate = |kind: &str| format!("{}/{}_gate", name, kind);
        let i = self.unary(BuiltinOperator::Logistic, &gate("input"), parts[0], sigmoid_q);
        let f = self.unary(BuiltinOperator::Logistic, &gate("forget"), parts[1], sigmoid_q);
        let g = self.unary(BuiltinOperator::Tanh, &gate("cell"), parts[2], tanh_q);
        let o = self.unary(BuiltinOperator::Logistic, &gate("output"), parts[3], sigmoid_q);

        let kept = self.binary(BuiltinOperator::Mul, &format!("{}/kept", name), f, c, cell_q);
        let added = self.binary(BuiltinOperator::Mul, &format!("{}/added", name), i, g, cell_q);
        let c_next = self.binary(BuiltinOperator::Add, &format!("{}/c", name), kept, added, cell_q);
        let squashed =
            self.unary(BuiltinOperator::Tanh, &format!("{}/tanh_c", name), c_next, tanh_q);
        let h_next = self.binary(BuiltinOperator::Mul, &format!("{}/h", name), o, squashed, tanh_q);
        (h_next, c_next)
    }
}

/// Keyword-spotting network: conv front end, two unrolled LSTM cells
/// sharing one flat state buffer, dense head and softmax.
///
/// Inputs are `data [1, 1, 40]` and `h [1, 80]` (the packed `h1, c1, h2, c2`
/// state). Outputs are `prediction [1, 3]` and `state_buffer_out [1, 80]`.
pub fn example_lstm_model() -> ModelDef {
    let mut n = Network {
        b: ModelBuilder::new("two-layer LSTM keyword spotter"),
        w: Weights(0x5EED_CAFE),
    };
    let state_q = q(1.0 / 128.0, 0);

    let data = n.act("data", &[1, 1, 40], q(0.5, 0));
    let h = n.act("h", &[1, 80], state_q);

    // Shape is computed for the dynamic batch path but not consumed
    let data_shape = n.b.tensor("data_shape", DataType::Int32, &[3], None);
    n.b.operator(BuiltinOperator::Shape, &[data], &[data_shape], OperatorOptions::None);

    // Front end: [1,1,40] -> [1,40,1] -> [1,1,40,1] -> conv -> pool -> [1,30]
    let frames = n.act("frames", &[1, 40, 1], q(0.5, 0));
    n.b.operator(
        BuiltinOperator::Transpose,
        &[data],
        &[frames],
        OperatorOptions::Transpose {
            perm: vec![0, 2, 1],
        },
    );
    let image = n.act("image", &[1, 1, 40, 1], q(0.5, 0));
    n.b.operator(
        BuiltinOperator::ExpandDims,
        &[frames],
        &[image],
        OperatorOptions::ExpandDims { axis: 1 },
    );

    let filter = n.w.int8(2 * 10, 64);
    let filter = n.b.constant(
        "conv/filter",
        DataType::Int8,
        &[2, 1, 10, 1],
        q(1.0 / 64.0, 0),
        filter,
    );
    let conv_bias = n.w.int32(2, 16);
    let conv_bias = n.b.constant("conv/bias", DataType::Int32, &[2], q(0.5 / 64.0, 0), conv_bias);
    let conv = n.act("conv", &[1, 1, 31, 2], q(0.25, -128));
    n.b.operator(
        BuiltinOperator::Conv2D,
        &[image, filter, conv_bias],
        &[conv],
        OperatorOptions::Conv2D {
            stride_h: 1,
            stride_w: 1,
            activation: Activation::Relu,
        },
    );
    let pool = n.act("pool", &[1, 1, 15, 2], q(0.25, -128));
    n.b.operator(
        BuiltinOperator::MaxPool2D,
        &[conv],
        &[pool],
        OperatorOptions::Pool2D {
            filter_h: 1,
            filter_w: 2,
            stride_h: 1,
            stride_w: 2,
        },
    );
    let flat = n.act("flat", &[1, 30], q(0.25, -128));
    n.b.operator(BuiltinOperator::Reshape, &[pool], &[flat], OperatorOptions::None);
    let features = n.dense("features", flat, 30, 40, 1.0 / 64.0, q(0.125, 0));

    // Unpack the flat state buffer
    let h1 = n.act("state/h1", &[1, 20], state_q);
    n.b.operator(
        BuiltinOperator::StridedSlice,
        &[h],
        &[h1],
        OperatorOptions::StridedSlice {
            begin: vec![0, 0],
            end: vec![1, 20],
            strides: vec![1, 1],
        },
    );
    let c1 = n.act("state/c1", &[1, 20], state_q);
    n.b.operator(
        BuiltinOperator::StridedSlice,
        &[h],
        &[c1],
        OperatorOptions::StridedSlice {
            begin: vec![0, 20],
            end: vec![1, 40],
            strides: vec![1, 1],
        },
    );
    let h2 = n.act("state/h2", &[1, 20], state_q);
    n.b.operator(
        BuiltinOperator::Slice,
        &[h],
        &[h2],
        OperatorOptions::Slice {
            begin: vec![0, 40],
            size: vec![1, 20],
        },
    );
    let c2 = n.act("state/c2", &[1, 20], state_q);
    n.b.operator(
        BuiltinOperator::Slice,
        &[h],
        &[c2],
        OperatorOptions::Slice {
            begin: vec![0, 60],
            size: vec![-1, 20],
        },
    );

    let (h1_next, c1_next) = n.lstm_cell("lstm1", features, 40, h1, c1);
    let (h2_next, c2_next) = n.lstm_cell("lstm2", h1_next, 20, h2, c2);

    let state_out = n.act("state_buffer_out", &[1, 80], state_q);
    n.b.operator(
        BuiltinOperator::Concatenation,
        &[h1_next, c1_next, h2_next, c2_next],
        &[state_out],
        OperatorOptions::Concatenation { axis: 1 },
    );

    // Head: stack the single time step, take the last one, classify
    let sequence = n.act("sequence", &[1, 1, 20], state_q);
    n.b.operator(
        BuiltinOperator::Pack,
        &[h2_next],
        &[sequence],
        OperatorOptions::Pack { axis: 1 },
    );
    let last = n.act("last_step", &[1, 20], state_q);
    n.b.operator(
        BuiltinOperator::Unpack,
        &[sequence],
        &[last],
        OperatorOptions::Unpack { axis: 1 },
    );
    let logits = n.dense("logits", last, 20, 3, 1.0 / 32.0, q(1.0 / 16.0, 0));
    let prediction = n.act("prediction", &[1, 3], q(1.0 / 256.0, -128));
    n.b.operator(
        BuiltinOperator::Softmax,
        &[logits],
        &[prediction],
        OperatorOptions::Softmax { beta: 1.0 },
    );

    n.b.inputs(&[data, h]);
    n.b.outputs(&[prediction, state_out]);
    n.b.finish()
}
