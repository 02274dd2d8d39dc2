use super::{Inputs, Node, dequantize, expect_dtype, expect_io, input, output, quantize};
use crate::model::DataType;
use crate::ops::OperatorOptions;
use crate::tensor::BoundTensor;

/// Input multiplier, shift and diff floor
const SOFTMAX_OP_DATA: usize = 12;

fn beta(node: &Node) -> f32 {
    match node.options {
        OperatorOptions::Softmax { beta } => beta,
        _ => 1.0,
    }
}

pub(super) fn prepare(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    expect_io(node, 1, 1)?;
    let x = input(node, tensors, 0)?;
    let out = output(node, tensors, 0)?;
    expect_dtype(x, DataType::Int8)?;
    expect_dtype(out, DataType::Int8)?;
    if x.dims != out.dims || x.dims.is_empty() {
        return Err(format!("softmax cannot map {:?} to {:?}", x.dims, out.dims));
    }
    Ok(SOFTMAX_OP_DATA)
}

/// Softmax over the last dimension
pub(super) fn eval(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    out: &mut [u8],
) -> Result<(), String> {
    let x = input(node, tensors, 0)?;
    let o = output(node, tensors, 0)?;
    let data = inputs.data(x)?;
    let depth = x.dims.last().copied().unwrap_or(1).max(1) as usize;
    let beta = beta(node);

    let mut exps = vec![0f32; depth];
    for (src, dst) in data.chunks(depth).zip(out.chunks_mut(depth)) {
        let max = src
            .iter()
            .map(|&q| dequantize(q as i8, x.quant))
            .fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for (e, &q) in exps.iter_mut().zip(src) {
            *e = ((dequantize(q as i8, x.quant) - max) * beta).exp();
            sum += *e;
        }
        for (d, e) in dst.iter_mut().zip(&exps) {
            *d = quantize(e / sum, o.quant) as u8;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Harness, UNIT, node};
    use crate::model::QuantParams;
    use crate::ops::{BuiltinOperator, OperatorOptions};

    const PROB: QuantParams = QuantParams {
        scale: 1.0 / 256.0,
        zero_point: -128,
    };

    #[test]
    fn test_uniform_row() {
        let mut h = Harness::new();
        let x = h.i8_tensor(&[1, 4], UNIT, &[7, 7, 7, 7]);
        let o = h.i8_tensor(&[1, 4], PROB, &[]);
        h.run(&node(
            BuiltinOperator::Softmax,
            &[x],
            &[o],
            OperatorOptions::Softmax { beta: 1.0 },
        ))
        .unwrap();
        // 0.25 * 256 - 128
        assert_eq!(h.i8_values(o), vec![-64; 4]);
    }

    #[test]
    fn test_rows_are_independent() {
        let mut h = Harness::new();
        let x = h.i8_tensor(&[2, 2], UNIT, &[0, 100, 100, 0]);
        let o = h.i8_tensor(&[2, 2], PROB, &[]);
        h.run(&node(BuiltinOperator::Softmax, &[x], &[o], OperatorOptions::None))
            .unwrap();
        assert_eq!(h.i8_values(o), vec![-128, 127, 127, -128]);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut h = Harness::new();
        let x = h.i8_tensor(&[1, 3], UNIT, &[]);
        let o = h.i8_tensor(&[1, 4], PROB, &[]);
        assert!(h
            .run(&node(BuiltinOperator::Softmax, &[x], &[o], OperatorOptions::None))
            .is_err());
    }
}
