//! Serialized model format
//!
//! A model buffer is a 4-byte little-endian schema version followed by a
//! postcard-encoded [`ModelDef`]. Mapping a buffer only reads the header;
//! the body is decoded when the graph is bound.

use crate::{EngineError, ops::{BuiltinOperator, OperatorOptions}};
use serde::{Deserialize, Serialize};

/// Size of the version header in bytes
pub const HEADER_BYTES: usize = 4;

/// Tensor element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int32,
}

impl DataType {
    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            DataType::Int8 => 1,
            DataType::Int32 => 4,
        }
    }
}

/// Affine quantization: `real = scale * (q - zero_point)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl Default for QuantParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            zero_point: 0,
        }
    }
}

/// Tensor declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDef {
    pub name: String,
    pub dtype: DataType,
    pub shape: Vec<i32>,
    /// Index into [`ModelDef::buffers`]; 0 means no constant data
    pub buffer: u32,
    pub quant: Option<QuantParams>,
}

impl TensorDef {
    /// Number of elements described by the shape
    pub fn num_elements(&self) -> usize {
        num_elements(&self.shape)
    }

    /// Bytes needed to back this tensor, saturating on overflow
    pub fn byte_size(&self) -> usize {
        self.checked_byte_size().unwrap_or(usize::MAX)
    }

    /// Bytes needed to back this tensor, `None` when the size overflows
    pub fn checked_byte_size(&self) -> Option<usize> {
        checked_num_elements(&self.shape)?.checked_mul(self.dtype.size())
    }
}

/// Operator node declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorDef {
    pub op: BuiltinOperator,
    /// Tensor indices, `-1` marks an absent optional input
    pub inputs: Vec<i32>,
    pub outputs: Vec<u32>,
    pub options: OperatorOptions,
}

/// Decoded graph description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    pub description: String,
    pub tensors: Vec<TensorDef>,
    /// Constant data; buffer 0 is always empty
    pub buffers: Vec<Vec<u8>>,
    pub operators: Vec<OperatorDef>,
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
}

impl ModelDef {
    /// Serialize with the given schema version header
    pub fn to_bytes(&self, version: u32) -> Result<Vec<u8>, EngineError> {
        let mut bytes = version.to_le_bytes().to_vec();
        let body = postcard::to_allocvec(self)?;
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Distinct operator kinds used by the graph, in first-use order
    pub fn operator_kinds(&self) -> Vec<BuiltinOperator> {
        let mut kinds = Vec::new();
        for op in &self.operators {
            if !kinds.contains(&op.op) {
                kinds.push(op.op);
            }
        }
        kinds
    }
}

/// A mapped model buffer
#[derive(Debug, Clone, Copy)]
pub struct Model<'m> {
    bytes: &'m [u8],
}

impl<'m> Model<'m> {
    /// Map a serialized model. No copying or parsing happens here.
    pub fn map(bytes: &'m [u8]) -> Self {
        Self { bytes }
    }

    /// Schema version from the header, 0 if the buffer is truncated
    pub fn version(&self) -> u32 {
        match self.bytes.get(..HEADER_BYTES) {
            Some(header) => u32::from_le_bytes([header[0], header[1], header[2], header[3]]),
            None => 0,
        }
    }

    /// Decode the graph body
    pub fn decode(&self) -> Result<ModelDef, EngineError> {
        let body = self
            .bytes
            .get(HEADER_BYTES..)
            .ok_or_else(|| EngineError::MalformedModel("missing header".to_string()))?;
        Ok(postcard::from_bytes(body)?)
    }

    /// Raw buffer length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Element count for a shape; an empty shape is a scalar.
///
/// Saturates at `usize::MAX`; binding rejects such shapes before any
/// storage is planned.
pub fn num_elements(shape: &[i32]) -> usize {
    checked_num_elements(shape).unwrap_or(usize::MAX)
}

/// Element count for a shape, `None` on overflow
pub fn checked_num_elements(shape: &[i32]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |n, &d| n.checked_mul(d.max(0) as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SCHEMA_VERSION;

    fn tiny() -> ModelDef {
        ModelDef {
            description: "tiny".to_string(),
            tensors: vec![TensorDef {
                name: "x".to_string(),
                dtype: DataType::Int8,
                shape: vec![1, 4],
                buffer: 0,
                quant: None,
            }],
            buffers: vec![Vec::new()],
            operators: Vec::new(),
            inputs: vec![0],
            outputs: vec![0],
        }
    }

    #[test]
    fn test_header_version() {
        let bytes = tiny().to_bytes(SCHEMA_VERSION).unwrap();
        let model = Model::map(&bytes);
        assert_eq!(model.version(), SCHEMA_VERSION);
        assert_eq!(model.decode().unwrap(), tiny());
    }

    #[test]
    fn test_truncated_header_reads_as_zero() {
        assert_eq!(Model::map(&[3, 0]).version(), 0);
        assert!(Model::map(&[]).decode().is_err());
    }

    #[test]
    fn test_garbage_body_is_malformed() {
        let mut bytes = SCHEMA_VERSION.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xFF; 3]);
        let err = Model::map(&bytes).decode().unwrap_err();
        assert!(matches!(err, EngineError::MalformedModel(_)));
    }

    #[test]
    fn test_num_elements() {
        assert_eq!(num_elements(&[1, 1, 40]), 40);
        assert_eq!(num_elements(&[]), 1);
        assert_eq!(num_elements(&[2, 0, 3]), 0);
    }

    #[test]
    fn test_oversized_shape_does_not_wrap() {
        let huge = [65536, 65536, 65536, 65536];
        assert_eq!(checked_num_elements(&huge), None);
        assert_eq!(num_elements(&huge), usize::MAX);

        let t = TensorDef {
            name: "huge".to_string(),
            dtype: DataType::Int32,
            shape: vec![1 << 20, 1 << 20, 1 << 20, 1 << 10],
            buffer: 0,
            quant: None,
        };
        assert_eq!(t.checked_byte_size(), None);
        assert_eq!(t.byte_size(), usize::MAX);
    }
}
