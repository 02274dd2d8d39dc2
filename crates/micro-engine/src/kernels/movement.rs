//! Kernels that only move or reinterpret elements

use super::{
    Inputs, Node, expect_dims, expect_dtype, expect_io, gather, input, normalize_axis, output,
    requantize, strides,
};
use crate::model::{DataType, QuantParams, num_elements};
use crate::ops::OperatorOptions;
use crate::tensor::BoundTensor;

fn same_count(x: &BoundTensor, out: &BoundTensor) -> Result<(), String> {
    if x.dtype != out.dtype || x.num_elements() != out.num_elements() {
        return Err(format!(
            "cannot view {:?} {:?} as {:?} {:?}",
            x.dtype, x.dims, out.dtype, out.dims
        ));
    }
    Ok(())
}

/// Copy `src` into `dst`, requantizing int8 elements when params differ
fn copy_elements(dst: &mut [u8], src: &[u8], dtype: DataType, from: QuantParams, to: QuantParams) {
    if dtype == DataType::Int8 && from != to {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = requantize(s as i8, from, to) as u8;
        }
    } else {
        dst.copy_from_slice(src);
    }
}

/// Product of `dims[..axis]` and of `dims[axis + 1..]`
fn outer_inner(dims: &[i32], axis: usize) -> (usize, usize) {
    (num_elements(&dims[..axis]), num_elements(&dims[axis + 1..]))
}

pub(super) fn prepare_reshape(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    // An optional second input carries the new shape; the output shape is authoritative
    expect_io(node, 1, 1)?;
    same_count(input(node, tensors, 0)?, output(node, tensors, 0)?)?;
    Ok(0)
}

pub(super) fn prepare_expand_dims(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    expect_io(node, 1, 1)?;
    let x = input(node, tensors, 0)?;
    let out = output(node, tensors, 0)?;
    let axis = match node.options {
        OperatorOptions::ExpandDims { axis } => axis,
        _ => 0,
    };
    let axis = normalize_axis(axis, x.dims.len() + 1)?;
    let mut expected = x.dims.clone();
    expected.insert(axis, 1);
    expect_dims(out, &expected)?;
    same_count(x, out)?;
    Ok(0)
}

pub(super) fn eval_copy(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    out: &mut [u8],
) -> Result<(), String> {
    let x = input(node, tensors, 0)?;
    let o = output(node, tensors, 0)?;
    copy_elements(out, inputs.data(x)?, x.dtype, x.quant, o.quant);
    Ok(())
}

pub(super) fn prepare_shape(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    expect_io(node, 1, 1)?;
    let x = input(node, tensors, 0)?;
    let out = output(node, tensors, 0)?;
    expect_dtype(out, DataType::Int32)?;
    expect_dims(out, &[x.dims.len() as i32])?;
    Ok(0)
}

pub(super) fn eval_shape(
    node: &Node,
    tensors: &[BoundTensor],
    out: &mut [u8],
) -> Result<(), String> {
    let x = input(node, tensors, 0)?;
    for (chunk, d) in out.chunks_exact_mut(4).zip(&x.dims) {
        chunk.copy_from_slice(&d.to_le_bytes());
    }
    Ok(())
}

fn permutation(node: &Node, rank: usize) -> Result<Vec<usize>, String> {
    let OperatorOptions::Transpose { perm } = &node.options else {
        return Err("transpose needs a permutation".to_string());
    };
    if perm.len() != rank {
        return Err(format!("permutation {:?} does not match rank {}", perm, rank));
    }
    let mut seen = vec![false; rank];
    let mut axes = Vec::with_capacity(rank);
    for &p in perm {
        let a = normalize_axis(p, rank)?;
        if seen[a] {
            return Err(format!("axis {} repeated in permutation {:?}", a, perm));
        }
        seen[a] = true;
        axes.push(a);
    }
    Ok(axes)
}

pub(super) fn prepare_transpose(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    expect_io(node, 1, 1)?;
    let x = input(node, tensors, 0)?;
    let out = output(node, tensors, 0)?;
    let perm = permutation(node, x.dims.len())?;
    let expected: Vec<i32> = perm.iter().map(|&a| x.dims[a]).collect();
    expect_dims(out, &expected)?;
    same_count(x, out)?;
    Ok(0)
}

pub(super) fn eval_transpose(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    out: &mut [u8],
) -> Result<(), String> {
    let x = input(node, tensors, 0)?;
    let o = output(node, tensors, 0)?;
    let perm = permutation(node, x.dims.len())?;
    let src_strides = strides(&x.dims);
    gather(out, inputs.data(x)?, x.dtype.size(), &o.dims, |idx| {
        idx.iter().zip(&perm).map(|(&i, &a)| i * src_strides[a]).sum()
    })
}

fn axis_option(node: &Node) -> i32 {
    match node.options {
        OperatorOptions::Concatenation { axis }
        | OperatorOptions::Pack { axis }
        | OperatorOptions::Unpack { axis }
        | OperatorOptions::Split { axis, .. } => axis,
        _ => 0,
    }
}

pub(super) fn prepare_concatenation(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    expect_io(node, 1, 1)?;
    let out = output(node, tensors, 0)?;
    let axis = normalize_axis(axis_option(node), out.dims.len())?;

    let mut total = 0;
    for i in 0..node.inputs.len() {
        let x = input(node, tensors, i)?;
        expect_dtype(x, out.dtype)?;
        let matches = x.dims.len() == out.dims.len()
            && x.dims
                .iter()
                .zip(&out.dims)
                .enumerate()
                .all(|(d, (a, b))| d == axis || a == b);
        if !matches {
            return Err(format!(
                "cannot concatenate {:?} into {:?} along axis {}",
                x.dims, out.dims, axis
            ));
        }
        total += x.dims[axis];
    }
    if total != out.dims[axis] {
        return Err(format!(
            "axis {} sums to {}, output has {}",
            axis, total, out.dims[axis]
        ));
    }
    Ok(0)
}

pub(super) fn eval_concatenation(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    out: &mut [u8],
) -> Result<(), String> {
    let o = output(node, tensors, 0)?;
    let axis = normalize_axis(axis_option(node), o.dims.len())?;
    let elem = o.dtype.size();
    let (outer, inner) = outer_inner(&o.dims, axis);
    let out_row = o.dims[axis] as usize * inner * elem;

    let mut offset = 0;
    for i in 0..node.inputs.len() {
        let x = input(node, tensors, i)?;
        let data = inputs.data(x)?;
        let row = x.dims[axis] as usize * inner * elem;
        for r in 0..outer {
            let dst = &mut out[r * out_row + offset..r * out_row + offset + row];
            copy_elements(dst, &data[r * row..(r + 1) * row], x.dtype, x.quant, o.quant);
        }
        offset += row;
    }
    Ok(())
}

pub(super) fn prepare_pack(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    expect_io(node, 1, 1)?;
    let first = input(node, tensors, 0)?;
    let out = output(node, tensors, 0)?;
    let axis = normalize_axis(axis_option(node), first.dims.len() + 1)?;
    let mut expected = first.dims.clone();
    expected.insert(axis, node.inputs.len() as i32);
    expect_dims(out, &expected)?;
    for i in 1..node.inputs.len() {
        let x = input(node, tensors, i)?;
        expect_dims(x, &first.dims)?;
        expect_dtype(x, out.dtype)?;
    }
    Ok(0)
}

pub(super) fn eval_pack(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    out: &mut [u8],
) -> Result<(), String> {
    let o = output(node, tensors, 0)?;
    let axis = normalize_axis(axis_option(node), o.dims.len())?;
    let elem = o.dtype.size();
    let (outer, inner) = outer_inner(&o.dims, axis);
    let n = node.inputs.len();
    let chunk = inner * elem;

    for k in 0..n {
        let x = input(node, tensors, k)?;
        let data = inputs.data(x)?;
        for r in 0..outer {
            let dst = (r * n + k) * chunk;
            copy_elements(
                &mut out[dst..dst + chunk],
                &data[r * chunk..(r + 1) * chunk],
                x.dtype,
                x.quant,
                o.quant,
            );
        }
    }
    Ok(())
}

pub(super) fn prepare_unpack(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    let x = input(node, tensors, 0)?;
    let axis = normalize_axis(axis_option(node), x.dims.len())?;
    let n = x.dims[axis] as usize;
    expect_io(node, 1, n)?;
    let mut expected = x.dims.clone();
    expected.remove(axis);
    for k in 0..n {
        let out = output(node, tensors, k)?;
        expect_dims(out, &expected)?;
        expect_dtype(out, x.dtype)?;
    }
    Ok(0)
}

pub(super) fn eval_unpack(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    k: usize,
    out: &mut [u8],
) -> Result<(), String> {
    let x = input(node, tensors, 0)?;
    let o = output(node, tensors, k)?;
    let axis = normalize_axis(axis_option(node), x.dims.len())?;
    let data = inputs.data(x)?;
    let (outer, inner) = outer_inner(&x.dims, axis);
    let n = x.dims[axis] as usize;
    let chunk = inner * x.dtype.size();

    for r in 0..outer {
        let src = (r * n + k) * chunk;
        copy_elements(
            &mut out[r * chunk..(r + 1) * chunk],
            &data[src..src + chunk],
            x.dtype,
            x.quant,
            o.quant,
        );
    }
    Ok(())
}

fn split_count(node: &Node) -> i32 {
    match node.options {
        OperatorOptions::Split { num_splits, .. } => num_splits,
        _ => node.outputs.len() as i32,
    }
}

pub(super) fn prepare_split(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    let x = input(node, tensors, 0)?;
    let axis = normalize_axis(axis_option(node), x.dims.len())?;
    let n = split_count(node);
    if n <= 0 || x.dims[axis] % n != 0 {
        return Err(format!(
            "dimension {} of {:?} does not split into {} parts",
            axis, x.dims, n
        ));
    }
    expect_io(node, 1, n as usize)?;
    let mut expected = x.dims.clone();
    expected[axis] /= n;
    for k in 0..n as usize {
        let out = output(node, tensors, k)?;
        expect_dims(out, &expected)?;
        expect_dtype(out, x.dtype)?;
    }
    Ok(0)
}

pub(super) fn eval_split(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    k: usize,
    out: &mut [u8],
) -> Result<(), String> {
    let x = input(node, tensors, 0)?;
    let o = output(node, tensors, k)?;
    let axis = normalize_axis(axis_option(node), x.dims.len())?;
    let data = inputs.data(x)?;
    let (outer, inner) = outer_inner(&x.dims, axis);
    let part = o.dims[axis] as usize * inner * x.dtype.size();
    let row = x.dims[axis] as usize * inner * x.dtype.size();

    for r in 0..outer {
        let src = r * row + k * part;
        copy_elements(
            &mut out[r * part..(r + 1) * part],
            &data[src..src + part],
            x.dtype,
            x.quant,
            o.quant,
        );
    }
    Ok(())
}

/// Start, step and extent of a slice in every dimension
struct SlicePlan {
    begin: Vec<usize>,
    step: Vec<usize>,
    dims: Vec<i32>,
}

fn slice_plan(node: &Node, x: &BoundTensor) -> Result<SlicePlan, String> {
    let rank = x.dims.len();
    let check_len = |name: &str, v: &[i32]| {
        if v.len() == rank {
            Ok(())
        } else {
            Err(format!("{} {:?} does not match rank {}", name, v, rank))
        }
    };

    let mut plan = SlicePlan {
        begin: Vec::with_capacity(rank),
        step: Vec::with_capacity(rank),
        dims: Vec::with_capacity(rank),
    };
    match &node.options {
        OperatorOptions::Slice { begin, size } => {
            check_len("begin", begin)?;
            check_len("size", size)?;
            for d in 0..rank {
                let dim = x.dims[d];
                let b = begin[d];
                let s = if size[d] == -1 { dim - b } else { size[d] };
                if b < 0 || s < 0 || b + s > dim {
                    return Err(format!(
                        "slice [{}, +{}) out of range for dimension {} of size {}",
                        b, s, d, dim
                    ));
                }
                plan.begin.push(b as usize);
                plan.step.push(1);
                plan.dims.push(s);
            }
        }
        OperatorOptions::StridedSlice {
            begin,
            end,
            strides,
        } => {
            check_len("begin", begin)?;
            check_len("end", end)?;
            check_len("strides", strides)?;
            for d in 0..rank {
                let dim = x.dims[d];
                let resolve = |i: i32| (if i < 0 { i + dim } else { i }).clamp(0, dim);
                let (b, e, s) = (resolve(begin[d]), resolve(end[d]), strides[d]);
                if s <= 0 {
                    return Err(format!("stride {} in dimension {} must be positive", s, d));
                }
                let extent = if e > b { (e - b + s - 1) / s } else { 0 };
                plan.begin.push(b as usize);
                plan.step.push(s as usize);
                plan.dims.push(extent);
            }
        }
        _ => return Err("slice needs begin and size".to_string()),
    }
    Ok(plan)
}

fn prepare_any_slice(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    expect_io(node, 1, 1)?;
    let x = input(node, tensors, 0)?;
    let out = output(node, tensors, 0)?;
    let plan = slice_plan(node, x)?;
    expect_dtype(out, x.dtype)?;
    if num_elements(&plan.dims) != out.num_elements() {
        return Err(format!(
            "slice yields {:?}, output is {:?}",
            plan.dims, out.dims
        ));
    }
    Ok(0)
}

pub(super) fn prepare_slice(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    prepare_any_slice(node, tensors)
}

pub(super) fn prepare_strided_slice(node: &Node, tensors: &[BoundTensor]) -> Result<usize, String> {
    prepare_any_slice(node, tensors)
}

pub(super) fn eval_slice(
    node: &Node,
    tensors: &[BoundTensor],
    inputs: &Inputs<'_>,
    out: &mut [u8],
) -> Result<(), String> {
    let x = input(node, tensors, 0)?;
    let o = output(node, tensors, 0)?;
    let plan = slice_plan(node, x)?;
    let src_strides = strides(&x.dims);
    gather(out, inputs.data(x)?, x.dtype.size(), &plan.dims, |idx| {
        idx.iter()
            .enumerate()
            .map(|(d, &i)| (plan.begin[d] + i * plan.step[d]) * src_strides[d])
            .sum()
    })?;
    if x.dtype == DataType::Int8 && x.quant != o.quant {
        for b in out.iter_mut() {
            *b = requantize(*b as i8, x.quant, o.quant) as u8;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Harness, UNIT, node};
    use crate::model::{DataType, QuantParams};
    use crate::ops::{BuiltinOperator, OperatorOptions};

    fn seq(n: i8) -> Vec<i8> {
        (0..n).collect()
    }

    #[test]
    fn test_reshape_and_expand_dims_copy() {
        let mut h = Harness::new();
        let x = h.i8_tensor(&[1, 6], UNIT, &seq(6));
        let r = h.i8_tensor(&[2, 3], UNIT, &[]);
        let e = h.i8_tensor(&[1, 1, 6], UNIT, &[]);
        h.run(&node(BuiltinOperator::Reshape, &[x], &[r], OperatorOptions::None))
            .unwrap();
        h.run(&node(
            BuiltinOperator::ExpandDims,
            &[x],
            &[e],
            OperatorOptions::ExpandDims { axis: 1 },
        ))
        .unwrap();
        assert_eq!(h.i8_values(r), seq(6));
        assert_eq!(h.i8_values(e), seq(6));

        let bad = h.i8_tensor(&[5], UNIT, &[]);
        assert!(h
            .run(&node(BuiltinOperator::Reshape, &[x], &[bad], OperatorOptions::None))
            .is_err());
    }

    #[test]
    fn test_shape_writes_int32_dims() {
        let mut h = Harness::new();
        let x = h.i8_tensor(&[2, 3, 4], UNIT, &[]);
        let s = h.tensor(DataType::Int32, &[3], UNIT);
        h.run(&node(BuiltinOperator::Shape, &[x], &[s], OperatorOptions::None))
            .unwrap();
        let dims: Vec<i32> = h
            .bytes(s)
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(dims, vec![2, 3, 4]);
    }

    #[test]
    fn test_transpose() {
        let mut h = Harness::new();
        let x = h.i8_tensor(&[2, 3], UNIT, &seq(6));
        let o = h.i8_tensor(&[3, 2], UNIT, &[]);
        h.run(&node(
            BuiltinOperator::Transpose,
            &[x],
            &[o],
            OperatorOptions::Transpose { perm: vec![1, 0] },
        ))
        .unwrap();
        assert_eq!(h.i8_values(o), vec![0, 3, 1, 4, 2, 5]);

        let bad = node(
            BuiltinOperator::Transpose,
            &[x],
            &[o],
            OperatorOptions::Transpose { perm: vec![1, 1] },
        );
        assert!(h.run(&bad).unwrap_err().contains("repeated"));
    }

    #[test]
    fn test_concatenation_requantizes() {
        let half = QuantParams {
            scale: 0.5,
            zero_point: 0,
        };
        let mut h = Harness::new();
        let a = h.i8_tensor(&[2, 1], UNIT, &[1, 2]);
        let b = h.i8_tensor(&[2, 2], half, &[2, 4, 6, 8]);
        let o = h.i8_tensor(&[2, 3], UNIT, &[]);
        h.run(&node(
            BuiltinOperator::Concatenation,
            &[a, b],
            &[o],
            OperatorOptions::Concatenation { axis: -1 },
        ))
        .unwrap();
        assert_eq!(h.i8_values(o), vec![1, 1, 2, 2, 3, 4]);
    }

    #[test]
    fn test_pack_and_unpack() {
        let mut h = Harness::new();
        let a = h.i8_tensor(&[2], UNIT, &[1, 2]);
        let b = h.i8_tensor(&[2], UNIT, &[3, 4]);
        let p = h.i8_tensor(&[2, 2], UNIT, &[]);
        h.run(&node(
            BuiltinOperator::Pack,
            &[a, b],
            &[p],
            OperatorOptions::Pack { axis: 1 },
        ))
        .unwrap();
        assert_eq!(h.i8_values(p), vec![1, 3, 2, 4]);

        let u0 = h.i8_tensor(&[2], UNIT, &[]);
        let u1 = h.i8_tensor(&[2], UNIT, &[]);
        h.run(&node(
            BuiltinOperator::Unpack,
            &[p],
            &[u0, u1],
            OperatorOptions::Unpack { axis: 0 },
        ))
        .unwrap();
        assert_eq!(h.i8_values(u0), vec![1, 3]);
        assert_eq!(h.i8_values(u1), vec![2, 4]);
    }

    #[test]
    fn test_split_along_last_axis() {
        let mut h = Harness::new();
        let x = h.i8_tensor(&[2, 4], UNIT, &seq(8));
        let s0 = h.i8_tensor(&[2, 2], UNIT, &[]);
        let s1 = h.i8_tensor(&[2, 2], UNIT, &[]);
        h.run(&node(
            BuiltinOperator::Split,
            &[x],
            &[s0, s1],
            OperatorOptions::Split {
                axis: 1,
                num_splits: 2,
            },
        ))
        .unwrap();
        assert_eq!(h.i8_values(s0), vec![0, 1, 4, 5]);
        assert_eq!(h.i8_values(s1), vec![2, 3, 6, 7]);

        let uneven = node(
            BuiltinOperator::Split,
            &[x],
            &[s0, s1],
            OperatorOptions::Split {
                axis: 1,
                num_splits: 3,
            },
        );
        assert!(h.run(&uneven).is_err());
    }

    #[test]
    fn test_slice_takes_rest() {
        let mut h = Harness::new();
        let x = h.i8_tensor(&[1, 6], UNIT, &seq(6));
        let o = h.i8_tensor(&[1, 4], UNIT, &[]);
        h.run(&node(
            BuiltinOperator::Slice,
            &[x],
            &[o],
            OperatorOptions::Slice {
                begin: vec![0, 2],
                size: vec![-1, -1],
            },
        ))
        .unwrap();
        assert_eq!(h.i8_values(o), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_strided_slice_negative_bounds() {
        let mut h = Harness::new();
        let x = h.i8_tensor(&[1, 8], UNIT, &seq(8));
        let o = h.i8_tensor(&[1, 3], UNIT, &[]);
        h.run(&node(
            BuiltinOperator::StridedSlice,
            &[x],
            &[o],
            OperatorOptions::StridedSlice {
                begin: vec![0, -6],
                end: vec![1, 8],
                strides: vec![1, 2],
            },
        ))
        .unwrap();
        assert_eq!(h.i8_values(o), vec![2, 4, 6]);
    }
}
