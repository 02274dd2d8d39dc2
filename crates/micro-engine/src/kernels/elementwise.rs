//! Add, Mul, Logistic, Tanh

use super::{
    Inputs, Node, activation_floor, dequantize, expect_dtype, expect_io, input, output, quantize,
};
use crate::model::DataType;
use crate::ops::{Activation, BuiltinOperator, OperatorOptions};
use crate::tensor::BoundTensor;

pub(super) fn prepare_binary(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    expect_io(node, 2, 1)?;
    let a = input(node, tensors, 0)?;
    let b = input(node, tensors, 1)?;
    let out = output(node, tensors, 0)?;
    for t in [a, b, out] {
        expect_dtype(t, DataType::Int8)?;
    }

    let (na, nb) = (a.num_elements(), b.num_elements());
    let expected = na.max(nb);
    if !(na == nb || na == 1 || nb == 1) {
        return Err(format!("cannot broadcast {:?} with {:?}", a.dims, b.dims));
    }
    if out.num_elements() != expected {
        return Err(format!(
            "output has {} elements, expected {}",
            out.num_elements(),
            expected
        ));
    }
    Ok(0)
}

pub(super) fn eval_binary(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    out: &mut [u8],
) -> Result<(), String> {
    let a = input(node, tensors, 0)?;
    let b = input(node, tensors, 1)?;
    let o = output(node, tensors, 0)?;
    let da = inputs.data(a)?;
    let db = inputs.data(b)?;

    let activation = match node.options {
        OperatorOptions::Elementwise { activation } => activation,
        _ => Activation::None,
    };
    let floor = activation_floor(activation, o.quant);

    for (i, dst) in out.iter_mut().enumerate() {
        let x = dequantize(da[if da.len() == 1 { 0 } else { i }] as i8, a.quant);
        let y = dequantize(db[if db.len() == 1 { 0 } else { i }] as i8, b.quant);
        let r = match node.op {
            BuiltinOperator::Mul => x * y,
            _ => x + y,
        };
        *dst = quantize(r, o.quant).max(floor) as u8;
    }
    Ok(())
}

pub(super) fn prepare_unary(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    expect_io(node, 1, 1)?;
    let x = input(node, tensors, 0)?;
    let out = output(node, tensors, 0)?;
    expect_dtype(x, DataType::Int8)?;
    expect_dtype(out, DataType::Int8)?;
    if x.num_elements() != out.num_elements() {
        return Err(format!("shape {:?} does not match {:?}", x.dims, out.dims));
    }
    Ok(0)
}

pub(super) fn eval_unary(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    out: &mut [u8],
) -> Result<(), String> {
    let x = input(node, tensors, 0)?;
    let o = output(node, tensors, 0)?;
    let data = inputs.data(x)?;

    let f: fn(f32) -> f32 = match node.op {
        BuiltinOperator::Tanh => f32::tanh,
        _ => |v| 1.0 / (1.0 + (-v).exp()),
    };
    for (dst, &src) in out.iter_mut().zip(data) {
        *dst = quantize(f(dequantize(src as i8, x.quant)), o.quant) as u8;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Harness, UNIT, node};
    use crate::model::QuantParams;
    use crate::ops::{Activation, BuiltinOperator, OperatorOptions};

    #[test]
    fn test_add_with_relu() {
        let mut h = Harness::new();
        let a = h.i8_tensor(&[1, 4], UNIT, &[1, -5, 3, -1]);
        let b = h.i8_tensor(&[1, 4], UNIT, &[2, 2, 2, 0]);
        let o = h.i8_tensor(&[1, 4], UNIT, &[]);
        h.run(&node(
            BuiltinOperator::Add,
            &[a, b],
            &[o],
            OperatorOptions::Elementwise {
                activation: Activation::Relu,
            },
        ))
        .unwrap();
        assert_eq!(h.i8_values(o), vec![3, 0, 5, 0]);
    }

    #[test]
    fn test_mul_broadcasts_scalar() {
        let mut h = Harness::new();
        let a = h.i8_tensor(&[3], UNIT, &[1, -2, 3]);
        let b = h.i8_tensor(&[1], UNIT, &[4]);
        let o = h.i8_tensor(&[3], UNIT, &[]);
        h.run(&node(BuiltinOperator::Mul, &[a, b], &[o], OperatorOptions::None))
            .unwrap();
        assert_eq!(h.i8_values(o), vec![4, -8, 12]);
    }

    #[test]
    fn test_mismatched_shapes_rejected() {
        let mut h = Harness::new();
        let a = h.i8_tensor(&[3], UNIT, &[]);
        let b = h.i8_tensor(&[2], UNIT, &[]);
        let o = h.i8_tensor(&[3], UNIT, &[]);
        assert!(h
            .run(&node(BuiltinOperator::Add, &[a, b], &[o], OperatorOptions::None))
            .is_err());
    }

    #[test]
    fn test_logistic_and_tanh() {
        let in_q = QuantParams {
            scale: 0.1,
            zero_point: 0,
        };
        let sig_q = QuantParams {
            scale: 1.0 / 256.0,
            zero_point: -128,
        };
        let tanh_q = QuantParams {
            scale: 1.0 / 128.0,
            zero_point: 0,
        };

        let mut h = Harness::new();
        let x = h.i8_tensor(&[3], in_q, &[0, 100, -100]);
        let s = h.i8_tensor(&[3], sig_q, &[]);
        let t = h.i8_tensor(&[3], tanh_q, &[]);
        h.run(&node(BuiltinOperator::Logistic, &[x], &[s], OperatorOptions::None))
            .unwrap();
        h.run(&node(BuiltinOperator::Tanh, &[x], &[t], OperatorOptions::None))
            .unwrap();

        // sigmoid(0) = 0.5, sigmoid(10) ~ 1, sigmoid(-10) ~ 0
        assert_eq!(h.i8_values(s), vec![0, 127, -128]);
        // tanh(0) = 0, tanh(+-10) saturates
        assert_eq!(h.i8_values(t), vec![0, 127, -128]);
    }
}
