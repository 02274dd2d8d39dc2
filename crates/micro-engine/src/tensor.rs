//! Bound tensors and views into the arena

use crate::allocator::ArenaRegion;
use crate::model::{DataType, QuantParams, TensorDef, num_elements};

/// Where a tensor's bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Constant data in the model, by buffer index
    Constant(usize),
    /// Planned storage in the arena
    Arena(ArenaRegion),
    /// Not yet placed
    Unallocated,
}

/// Runtime descriptor of one tensor
#[derive(Debug, Clone)]
pub struct BoundTensor {
    pub name: String,
    pub dtype: DataType,
    pub dims: Vec<i32>,
    pub quant: QuantParams,
    pub storage: Storage,
}

impl BoundTensor {
    pub(crate) fn from_def(def: &TensorDef) -> Self {
        Self {
            name: def.name.clone(),
            dtype: def.dtype,
            dims: def.shape.clone(),
            quant: def.quant.unwrap_or_default(),
            storage: if def.buffer > 0 {
                Storage::Constant(def.buffer as usize)
            } else {
                Storage::Unallocated
            },
        }
    }

    /// Number of elements
    pub fn num_elements(&self) -> usize {
        num_elements(&self.dims)
    }

    /// Bytes needed for the data
    pub fn byte_size(&self) -> usize {
        self.num_elements().saturating_mul(self.dtype.size())
    }
}

/// Read-only view of a tensor
#[derive(Debug)]
pub struct TensorView<'t> {
    name: &'t str,
    dtype: DataType,
    dims: &'t [i32],
    quant: QuantParams,
    data: &'t [u8],
}

impl<'t> TensorView<'t> {
    pub(crate) fn new(tensor: &'t BoundTensor, data: &'t [u8]) -> Self {
        Self {
            name: &tensor.name,
            dtype: tensor.dtype,
            dims: &tensor.dims,
            quant: tensor.quant,
            data,
        }
    }

    pub fn name(&self) -> &'t str {
        self.name
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn dims(&self) -> &'t [i32] {
        self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn quant(&self) -> QuantParams {
        self.quant
    }

    pub fn num_elements(&self) -> usize {
        num_elements(self.dims)
    }

    /// Raw element storage
    pub fn data(&self) -> &'t [u8] {
        self.data
    }

    /// Elements as int8
    pub fn i8_values(&self) -> Vec<i8> {
        self.data.iter().map(|&b| b as i8).collect()
    }

    /// Elements as little-endian int32
    pub fn i32_values(&self) -> Vec<i32> {
        self.data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Dequantized int8 elements
    pub fn dequantized(&self) -> Vec<f32> {
        self.data
            .iter()
            .map(|&b| (b as i8 as i32 - self.quant.zero_point) as f32 * self.quant.scale)
            .collect()
    }
}

/// Mutable view of a tensor's arena storage
#[derive(Debug)]
pub struct TensorViewMut<'t> {
    name: &'t str,
    dtype: DataType,
    dims: &'t [i32],
    data: &'t mut [u8],
}

impl<'t> TensorViewMut<'t> {
    pub(crate) fn new(tensor: &'t BoundTensor, data: &'t mut [u8]) -> Self {
        Self {
            name: &tensor.name,
            dtype: tensor.dtype,
            dims: &tensor.dims,
            data,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn dims(&self) -> &[i32] {
        self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn num_elements(&self) -> usize {
        num_elements(self.dims)
    }

    /// Set the first `count` int8 elements to `value`; returns how many were written
    pub fn fill_i8(&mut self, count: usize, value: i8) -> usize {
        let count = count.min(self.data.len());
        self.data[..count].fill(value as u8);
        count
    }

    /// Write int8 values starting at element 0
    pub fn copy_from_i8(&mut self, values: &[i8]) -> usize {
        let count = values.len().min(self.data.len());
        for (dst, &v) in self.data[..count].iter_mut().zip(values) {
            *dst = v as u8;
        }
        count
    }

    /// Elements as int8
    pub fn i8_values(&self) -> Vec<i8> {
        self.data.iter().map(|&b| b as i8).collect()
    }
}
