//! Operands: typed, shaped data slots of a model.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::lower_info::OperandLowerInfo;
use super::{OperandIndex, OperationIndex};
use crate::error::{ForgeResult, GraphError};

/// Element type of an operand.
///
/// The integer codes match the NNAPI `OperandCode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    ScalarFloat32,
    ScalarInt32,
    ScalarUInt32,
    Float32,
    Int32,
    QuantAsymm8,
}

impl DataType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(DataType::ScalarFloat32),
            1 => Some(DataType::ScalarInt32),
            2 => Some(DataType::ScalarUInt32),
            3 => Some(DataType::Float32),
            4 => Some(DataType::Int32),
            5 => Some(DataType::QuantAsymm8),
            _ => None,
        }
    }

    pub fn size_of(&self) -> usize {
        match self {
            DataType::QuantAsymm8 => 1,
            _ => 4,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            DataType::ScalarFloat32 | DataType::ScalarInt32 | DataType::ScalarUInt32
        )
    }

    /// Decode one element at `offset` (in elements) into its storage word.
    ///
    /// Floats are stored as is and quantized codes by value. 32-bit integers
    /// keep their bit pattern so data movement never rounds them; use
    /// [`TypeInfo::to_real`] for their numeric value.
    pub fn decode(&self, bytes: &[u8], offset: usize) -> f32 {
        let at = offset * self.size_of();
        match self {
            DataType::QuantAsymm8 => bytes[at] as f32,
            _ => f32::from_bits(u32::from_le_bytes([
                bytes[at],
                bytes[at + 1],
                bytes[at + 2],
                bytes[at + 3],
            ])),
        }
    }

    /// Encode one storage word at `offset` (in elements) as little-endian bytes.
    pub fn encode(&self, word: f32, bytes: &mut [u8], offset: usize) {
        let at = offset * self.size_of();
        match self {
            DataType::QuantAsymm8 => bytes[at] = word.round().clamp(0.0, 255.0) as u8,
            _ => bytes[at..at + 4].copy_from_slice(&word.to_bits().to_le_bytes()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::ScalarFloat32 => "FLOAT32",
            DataType::ScalarInt32 => "INT32",
            DataType::ScalarUInt32 => "UINT32",
            DataType::Float32 => "TENSOR_FLOAT32",
            DataType::Int32 => "TENSOR_INT32",
            DataType::QuantAsymm8 => "TENSOR_QUANT8_ASYMM",
        };
        f.write_str(name)
    }
}

/// Data type plus asymmetric quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub dtype: DataType,
    pub scale: f32,
    pub zero_point: i32,
}

impl TypeInfo {
    pub fn new(dtype: DataType) -> Self {
        Self {
            dtype,
            scale: 0.0,
            zero_point: 0,
        }
    }

    pub fn quantized(scale: f32, zero_point: i32) -> Self {
        Self {
            dtype: DataType::QuantAsymm8,
            scale,
            zero_point,
        }
    }

    /// Numeric value of a storage word.
    pub fn to_real(&self, word: f32) -> f32 {
        match self.dtype {
            DataType::QuantAsymm8 => (word - self.zero_point as f32) * self.scale,
            DataType::Int32 | DataType::ScalarInt32 => word.to_bits() as i32 as f32,
            DataType::ScalarUInt32 => word.to_bits() as f32,
            DataType::Float32 | DataType::ScalarFloat32 => word,
        }
    }

    /// Storage word for a numeric value. Integers truncate toward zero and
    /// saturate; quantized codes round and clamp to `0..=255`.
    pub fn to_word(&self, real: f32) -> f32 {
        match self.dtype {
            DataType::QuantAsymm8 => {
                let scale = if self.scale == 0.0 { 1.0 } else { self.scale };
                (real / scale + self.zero_point as f32).round().clamp(0.0, 255.0)
            }
            DataType::Int32 | DataType::ScalarInt32 => f32::from_bits(real as i32 as u32),
            DataType::ScalarUInt32 => f32::from_bits(real as u32),
            DataType::Float32 | DataType::ScalarFloat32 => real,
        }
    }
}

/// Ordered list of extents. Rank 4 shapes are NHWC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Shape(dims.into())
    }

    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dim(&self, axis: usize) -> usize {
        self.0[axis]
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn num_elements(&self) -> usize {
        self.0.iter().product()
    }

    pub fn as_feature(&self) -> Option<FeatureShape> {
        match self.0.as_slice() {
            &[n, h, w, c] => Some(FeatureShape { n, h, w, c }),
            _ => None,
        }
    }

    pub fn as_kernel(&self) -> Option<KernelShape> {
        match self.0.as_slice() {
            &[n, h, w, c] => Some(KernelShape { n, h, w, c }),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<usize> {
        match self.0.as_slice() {
            &[len] => Some(len),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<(usize, usize)> {
        match self.0.as_slice() {
            &[rows, cols] => Some((rows, cols)),
            _ => None,
        }
    }

    /// Pad to rank 4 the way lower info records it: `[W]`, `[H, W]` and
    /// `[N, H, W]` gain leading ones.
    pub fn as_4d(&self) -> [usize; 4] {
        let mut out = [1usize; 4];
        let rank = self.rank().min(4);
        out[4 - rank..].copy_from_slice(&self.0[self.rank() - rank..]);
        out
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape(dims.to_vec())
    }
}

/// NHWC feature map extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureShape {
    pub n: usize,
    pub h: usize,
    pub w: usize,
    pub c: usize,
}

/// OHWI convolution kernel extents; `n` is the output channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelShape {
    pub n: usize,
    pub h: usize,
    pub w: usize,
    pub c: usize,
}

/// Immutable constant bytes shared between the model and initializers.
#[derive(Clone, PartialEq)]
pub struct ConstData(Arc<[u8]>);

impl ConstData {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        ConstData(bytes.into())
    }

    pub fn from_f32(values: &[f32]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        ConstData(bytes.into())
    }

    pub fn from_i32(values: &[i32]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        ConstData(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode every element into storage words according to `dtype`.
    pub fn words(&self, dtype: DataType) -> Vec<f32> {
        let count = self.0.len() / dtype.size_of();
        (0..count).map(|i| dtype.decode(&self.0, i)).collect()
    }

    pub fn to_i32_vec(&self) -> Vec<i32> {
        self.0
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

impl fmt::Debug for ConstData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConstData({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone)]
pub struct Operand {
    pub shape: Shape,
    pub type_info: TypeInfo,
    data: Option<ConstData>,
    uses: Vec<OperationIndex>,
    def: Option<OperationIndex>,
    lower_info: Option<OperandLowerInfo>,
}

impl Operand {
    pub fn new(shape: Shape, type_info: TypeInfo) -> Self {
        Self {
            shape,
            type_info,
            data: None,
            uses: Vec::new(),
            def: None,
            lower_info: None,
        }
    }

    pub fn dtype(&self) -> DataType {
        self.type_info.dtype
    }

    /// Size in bytes of the caller-visible representation.
    pub fn byte_size(&self) -> usize {
        self.shape.num_elements() * self.type_info.dtype.size_of()
    }

    pub fn is_constant(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&ConstData> {
        self.data.as_ref()
    }

    pub(crate) fn set_data(&mut self, data: ConstData) {
        self.data = Some(data);
    }

    pub fn uses(&self) -> &[OperationIndex] {
        &self.uses
    }

    pub fn def(&self) -> Option<OperationIndex> {
        self.def
    }

    pub(crate) fn append_use(&mut self, op: OperationIndex) {
        if !self.uses.contains(&op) {
            self.uses.push(op);
        }
    }

    pub(crate) fn remove_use(&mut self, op: OperationIndex) {
        self.uses.retain(|u| *u != op);
    }

    pub(crate) fn set_def(&mut self, op: OperationIndex) {
        self.def = Some(op);
    }

    pub(crate) fn clear_links(&mut self) {
        self.uses.clear();
        self.def = None;
    }

    pub fn lower_info(&self) -> Option<&OperandLowerInfo> {
        self.lower_info.as_ref()
    }

    pub(crate) fn set_lower_info(&mut self, info: OperandLowerInfo) {
        self.lower_info = Some(info);
    }
}

/// Arena of operands addressed by [`OperandIndex`].
#[derive(Debug, Clone, Default)]
pub struct OperandSet {
    operands: Vec<Operand>,
}

impl OperandSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, operand: Operand) -> OperandIndex {
        let index = OperandIndex(self.operands.len() as u32);
        self.operands.push(operand);
        index
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    pub fn exist(&self, index: OperandIndex) -> bool {
        index.as_usize() < self.operands.len()
    }

    pub fn at(&self, index: OperandIndex) -> ForgeResult<&Operand> {
        self.operands
            .get(index.as_usize())
            .ok_or_else(|| GraphError::InvalidOperandIndex(index).into())
    }

    pub fn at_mut(&mut self, index: OperandIndex) -> ForgeResult<&mut Operand> {
        self.operands
            .get_mut(index.as_usize())
            .ok_or_else(|| GraphError::InvalidOperandIndex(index).into())
    }

    pub fn iter(&self) -> impl Iterator<Item = (OperandIndex, &Operand)> {
        self.operands
            .iter()
            .enumerate()
            .map(|(i, o)| (OperandIndex(i as u32), o))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (OperandIndex, &mut Operand)> {
        self.operands
            .iter_mut()
            .enumerate()
            .map(|(i, o)| (OperandIndex(i as u32), o))
    }

    pub fn shape(&self, index: OperandIndex) -> ForgeResult<&Shape> {
        Ok(&self.at(index)?.shape)
    }

    pub fn feature(&self, index: OperandIndex) -> ForgeResult<FeatureShape> {
        let shape = self.shape(index)?;
        shape.as_feature().ok_or_else(|| rank_error(index, "4 (NHWC)", shape))
    }

    pub fn kernel(&self, index: OperandIndex) -> ForgeResult<KernelShape> {
        let shape = self.shape(index)?;
        shape.as_kernel().ok_or_else(|| rank_error(index, "4 (OHWI)", shape))
    }

    pub fn vector(&self, index: OperandIndex) -> ForgeResult<usize> {
        let shape = self.shape(index)?;
        shape.as_vector().ok_or_else(|| rank_error(index, "1", shape))
    }

    pub fn matrix(&self, index: OperandIndex) -> ForgeResult<(usize, usize)> {
        let shape = self.shape(index)?;
        shape.as_matrix().ok_or_else(|| rank_error(index, "2", shape))
    }

    /// Read a constant integer scalar.
    pub fn scalar_i32(&self, index: OperandIndex) -> ForgeResult<i32> {
        let operand = self.at(index)?;
        let data = operand.data().ok_or(GraphError::NotAConstant(index))?;
        match operand.dtype() {
            DataType::ScalarInt32 | DataType::Int32 | DataType::ScalarUInt32 if data.len() >= 4 => {
                let b = data.bytes();
                Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            }
            other => Err(GraphError::TypeMismatch {
                index,
                expected: DataType::ScalarInt32.to_string(),
                actual: other.to_string(),
            }
            .into()),
        }
    }

    /// Read a constant float scalar.
    pub fn scalar_f32(&self, index: OperandIndex) -> ForgeResult<f32> {
        let operand = self.at(index)?;
        let data = operand.data().ok_or(GraphError::NotAConstant(index))?;
        match operand.dtype() {
            DataType::ScalarFloat32 | DataType::Float32 if data.len() >= 4 => {
                Ok(DataType::ScalarFloat32.decode(data.bytes(), 0))
            }
            other => Err(GraphError::TypeMismatch {
                index,
                expected: DataType::ScalarFloat32.to_string(),
                actual: other.to_string(),
            }
            .into()),
        }
    }
}

fn rank_error(index: OperandIndex, expected: &str, shape: &Shape) -> crate::error::ForgeError {
    GraphError::UnsupportedRank {
        index,
        expected: expected.to_string(),
        actual: shape.rank(),
    }
    .into()
}
