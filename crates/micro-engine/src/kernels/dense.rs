//! FullyConnected, Conv2D, MaxPool2D

use super::{
    Inputs, Node, activation_floor, expect_dims, expect_dtype, expect_io, input, optional_input,
    output, quantize, requantize,
};
use crate::model::DataType;
use crate::ops::{Activation, OperatorOptions};
use crate::tensor::BoundTensor;

/// Output multiplier, shift and zero points
const FULLY_CONNECTED_OP_DATA: usize = 16;
/// Same as fully connected plus a multiplier and shift per output channel
const CONV_OP_DATA_BASE: usize = 16;
const CONV_OP_DATA_PER_CHANNEL: usize = 8;

fn read_i32(bytes: &[u8], i: usize) -> i32 {
    let b = &bytes[i * 4..i * 4 + 4];
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn check_bias(bias: Option<&BoundTensor>, channels: i32) -> Result<(), String> {
    if let Some(bias) = bias {
        expect_dtype(bias, DataType::Int32)?;
        if bias.num_elements() != channels as usize {
            return Err(format!(
                "bias has {} elements, expected {}",
                bias.num_elements(),
                channels
            ));
        }
    }
    Ok(())
}

pub(super) fn prepare_fully_connected(
    node: &Node,
    tensors: &[BoundTensor],
) -> Result<usize, String> {
    expect_io(node, 2, 1)?;
    let x = input(node, tensors, 0)?;
    let w = input(node, tensors, 1)?;
    let out = output(node, tensors, 0)?;
    expect_dtype(x, DataType::Int8)?;
    expect_dtype(w, DataType::Int8)?;
    expect_dtype(out, DataType::Int8)?;
    if w.dims.len() != 2 {
        return Err(format!("weights must be rank 2, got {:?}", w.dims));
    }

    let (units, depth) = (w.dims[0], w.dims[1]);
    if depth <= 0 || x.num_elements() % depth as usize != 0 {
        return Err(format!("input {:?} is not a multiple of depth {}", x.dims, depth));
    }
    let batches = (x.num_elements() / depth as usize) as i32;
    expect_dims(out, &[batches, units])?;
    check_bias(optional_input(node, tensors, 2), units)?;
    Ok(FULLY_CONNECTED_OP_DATA)
}

pub(super) fn eval_fully_connected(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    out: &mut [u8],
) -> Result<(), String> {
    let x = input(node, tensors, 0)?;
    let w = input(node, tensors, 1)?;
    let o = output(node, tensors, 0)?;
    let bias = optional_input(node, tensors, 2);
    let activation = match node.options {
        OperatorOptions::FullyConnected { activation } => activation,
        _ => Activation::None,
    };

    let dx = inputs.data(x)?;
    let dw = inputs.data(w)?;
    let db = bias.map(|b| inputs.data(b)).transpose()?;

    let units = w.dims[0] as usize;
    let depth = w.dims[1] as usize;
    let batches = dx.len() / depth;
    let scale = x.quant.scale * w.quant.scale;
    let floor = activation_floor(activation, o.quant);

    for b in 0..batches {
        let row = &dx[b * depth..(b + 1) * depth];
        for u in 0..units {
            let weights = &dw[u * depth..(u + 1) * depth];
            let mut acc: i32 = row
                .iter()
                .zip(weights)
                .map(|(&xv, &wv)| {
                    (xv as i8 as i32 - x.quant.zero_point) * (wv as i8 as i32 - w.quant.zero_point)
                })
                .sum();
            if let Some(db) = db {
                acc += read_i32(db, u);
            }
            out[b * units + u] = quantize(acc as f32 * scale, o.quant).max(floor) as u8;
        }
    }
    Ok(())
}

fn conv_params(node: &Node) -> (i32, i32, Activation) {
    match node.options {
        OperatorOptions::Conv2D {
            stride_h,
            stride_w,
            activation,
        } => (stride_h.max(1), stride_w.max(1), activation),
        _ => (1, 1, Activation::None),
    }
}

pub(super) fn prepare_conv_2d(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    expect_io(node, 2, 1)?;
    let x = input(node, tensors, 0)?;
    let f = input(node, tensors, 1)?;
    let out = output(node, tensors, 0)?;
    expect_dtype(x, DataType::Int8)?;
    expect_dtype(f, DataType::Int8)?;
    expect_dtype(out, DataType::Int8)?;
    if x.dims.len() != 4 || f.dims.len() != 4 {
        return Err("conv input and filter must be NHWC rank 4".to_string());
    }
    if x.dims[3] != f.dims[3] {
        return Err(format!(
            "input depth {} does not match filter depth {}",
            x.dims[3], f.dims[3]
        ));
    }

    let (sh, sw, _) = conv_params(node);
    let (n, h, w) = (x.dims[0], x.dims[1], x.dims[2]);
    let (co, kh, kw) = (f.dims[0], f.dims[1], f.dims[2]);
    if kh > h || kw > w {
        return Err(format!("filter {}x{} larger than input {}x{}", kh, kw, h, w));
    }
    expect_dims(out, &[n, (h - kh) / sh + 1, (w - kw) / sw + 1, co])?;
    check_bias(optional_input(node, tensors, 2), co)?;
    Ok(CONV_OP_DATA_BASE + CONV_OP_DATA_PER_CHANNEL * co as usize)
}

pub(super) fn eval_conv_2d(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    out: &mut [u8],
) -> Result<(), String> {
    let x = input(node, tensors, 0)?;
    let f = input(node, tensors, 1)?;
    let o = output(node, tensors, 0)?;
    let bias = optional_input(node, tensors, 2);
    let (sh, sw, activation) = conv_params(node);

    let dx = inputs.data(x)?;
    let df = inputs.data(f)?;
    let db = bias.map(|b| inputs.data(b)).transpose()?;

    let [n, h, w, ci] = dims4(&x.dims);
    let [co, kh, kw, _] = dims4(&f.dims);
    let [_, oh, ow, _] = dims4(&o.dims);
    let (sh, sw) = (sh as usize, sw as usize);
    let scale = x.quant.scale * f.quant.scale;
    let floor = activation_floor(activation, o.quant);

    for b in 0..n {
        for oy in 0..oh {
            for ox in 0..ow {
                for oc in 0..co {
                    let mut acc: i32 = 0;
                    for ky in 0..kh {
                        for kx in 0..kw {
                            let iy = oy * sh + ky;
                            let ix = ox * sw + kx;
                            let in_base = ((b * h + iy) * w + ix) * ci;
                            let f_base = ((oc * kh + ky) * kw + kx) * ci;
                            for c in 0..ci {
                                let xv = dx[in_base + c] as i8 as i32 - x.quant.zero_point;
                                let fv = df[f_base + c] as i8 as i32 - f.quant.zero_point;
                                acc += xv * fv;
                            }
                        }
                    }
                    if let Some(db) = db {
                        acc += read_i32(db, oc);
                    }
                    let idx = ((b * oh + oy) * ow + ox) * co + oc;
                    out[idx] = quantize(acc as f32 * scale, o.quant).max(floor) as u8;
                }
            }
        }
    }
    Ok(())
}

fn pool_params(node: &Node) -> Result<(i32, i32, i32, i32), String> {
    match node.options {
        OperatorOptions::Pool2D {
            filter_h,
            filter_w,
            stride_h,
            stride_w,
        } if filter_h > 0 && filter_w > 0 => {
            Ok((filter_h, filter_w, stride_h.max(1), stride_w.max(1)))
        }
        _ => Err("pooling needs a positive filter size".to_string()),
    }
}

pub(super) fn prepare_max_pool_2d(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    expect_io(node, 1, 1)?;
    let x = input(node, tensors, 0)?;
    let out = output(node, tensors, 0)?;
    expect_dtype(x, DataType::Int8)?;
    expect_dtype(out, DataType::Int8)?;
    if x.dims.len() != 4 {
        return Err("pool input must be NHWC rank 4".to_string());
    }
    let (fh, fw, sh, sw) = pool_params(node)?;
    let (n, h, w, c) = (x.dims[0], x.dims[1], x.dims[2], x.dims[3]);
    if fh > h || fw > w {
        return Err(format!("filter {}x{} larger than input {}x{}", fh, fw, h, w));
    }
    expect_dims(out, &[n, (h - fh) / sh + 1, (w - fw) / sw + 1, c])?;
    Ok(0)
}

pub(super) fn eval_max_pool_2d(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    out: &mut [u8],
) -> Result<(), String> {
    let x = input(node, tensors, 0)?;
    let o = output(node, tensors, 0)?;
    let (fh, fw, sh, sw) = pool_params(node)?;
    let dx = inputs.data(x)?;

    let [n, h, w, c] = dims4(&x.dims);
    let [_, oh, ow, _] = dims4(&o.dims);
    let (fh, fw, sh, sw) = (fh as usize, fw as usize, sh as usize, sw as usize);

    for b in 0..n {
        for oy in 0..oh {
            for ox in 0..ow {
                for ch in 0..c {
                    let mut max = i8::MIN;
                    for ky in 0..fh {
                        for kx in 0..fw {
                            let idx = ((b * h + oy * sh + ky) * w + ox * sw + kx) * c + ch;
                            max = max.max(dx[idx] as i8);
                        }
                    }
                    let idx = ((b * oh + oy) * ow + ox) * c + ch;
                    out[idx] = requantize(max, x.quant, o.quant) as u8;
                }
            }
        }
    }
    Ok(())
}

fn dims4(dims: &[i32]) -> [usize; 4] {
    [
        dims[0] as usize,
        dims[1] as usize,
        dims[2] as usize,
        dims[3] as usize,
    ]
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Harness, UNIT, node};
    use crate::model::DataType;
    use crate::ops::{Activation, BuiltinOperator, OperatorOptions};

    fn i8_bytes(values: &[i8]) -> Vec<u8> {
        values.iter().map(|&v| v as u8).collect()
    }

    fn i32_bytes(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_fully_connected_with_bias() {
        let mut h = Harness::new();
        let x = h.i8_tensor(&[1, 3], UNIT, &[1, 2, 3]);
        let w = h.constant(DataType::Int8, &[2, 3], UNIT, i8_bytes(&[1, 0, -1, 2, 2, 2]));
        let b = h.constant(DataType::Int32, &[2], UNIT, i32_bytes(&[10, -20]));
        let o = h.i8_tensor(&[1, 2], UNIT, &[]);
        h.run(&node(
            BuiltinOperator::FullyConnected,
            &[x, w, b],
            &[o],
            OperatorOptions::FullyConnected {
                activation: Activation::None,
            },
        ))
        .unwrap();
        // [1-3+10, 2+4+6-20]
        assert_eq!(h.i8_values(o), vec![8, -8]);
    }

    #[test]
    fn test_fully_connected_rejects_wrong_output() {
        let mut h = Harness::new();
        let x = h.i8_tensor(&[1, 3], UNIT, &[]);
        let w = h.constant(DataType::Int8, &[2, 3], UNIT, vec![0; 6]);
        let o = h.i8_tensor(&[1, 3], UNIT, &[]);
        let err = h
            .run(&node(BuiltinOperator::FullyConnected, &[x, w], &[o], OperatorOptions::None))
            .unwrap_err();
        assert!(err.contains("expected [1, 2]"));
    }

    #[test]
    fn test_conv_2d_valid_relu() {
        let mut h = Harness::new();
        // 1x1x5x1 input, 1x1x3x1 filter
        let x = h.i8_tensor(&[1, 1, 5, 1], UNIT, &[1, 2, 3, 4, 5]);
        let f = h.constant(DataType::Int8, &[1, 1, 3, 1], UNIT, i8_bytes(&[1, 0, -2]));
        let o = h.i8_tensor(&[1, 1, 3, 1], UNIT, &[]);
        h.run(&node(
            BuiltinOperator::Conv2D,
            &[x, f],
            &[o],
            OperatorOptions::Conv2D {
                stride_h: 1,
                stride_w: 1,
                activation: Activation::Relu,
            },
        ))
        .unwrap();
        // 1-6, 2-8, 3-10 all clipped to zero
        assert_eq!(h.i8_values(o), vec![0, 0, 0]);

        h.set_i8(x, &[5, 4, 3, 2, 1]);
        h.run(&node(
            BuiltinOperator::Conv2D,
            &[x, f],
            &[o],
            OperatorOptions::Conv2D {
                stride_h: 1,
                stride_w: 1,
                activation: Activation::None,
            },
        ))
        .unwrap();
        assert_eq!(h.i8_values(o), vec![-1, 0, 1]);
    }

    #[test]
    fn test_max_pool_2d() {
        let mut h = Harness::new();
        let x = h.i8_tensor(&[1, 1, 4, 2], UNIT, &[1, -1, 5, -7, 2, 3, 0, 9]);
        let o = h.i8_tensor(&[1, 1, 2, 2], UNIT, &[]);
        h.run(&node(
            BuiltinOperator::MaxPool2D,
            &[x],
            &[o],
            OperatorOptions::Pool2D {
                filter_h: 1,
                filter_w: 2,
                stride_h: 1,
                stride_w: 2,
            },
        ))
        .unwrap();
        assert_eq!(h.i8_values(o), vec![5, -1, 2, 9]);
    }
}
