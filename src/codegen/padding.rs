//! Implicit padding policies.
//!
//! `SAME` pads so that `out = ceil(in / stride)`, splitting the total with
//! the extra element at the trailing edge. `VALID` never pads.

use crate::error::{ForgeResult, GraphError};
use crate::graph::{FeatureShape, OpKind, OperandIndex, OperandSet, PaddingType};
use crate::kernel::Padding;

/// Decode the padding code stored in a scalar operand.
pub fn decode(kind: OpKind, operands: &OperandSet, index: OperandIndex) -> ForgeResult<PaddingType> {
    let code = operands.scalar_i32(index)?;
    PaddingType::from_code(code).ok_or_else(|| {
        GraphError::InvalidParam {
            kind,
            index,
            reason: format!("unknown padding code {}", code),
        }
        .into()
    })
}

/// Output extent along one axis, `None` when no output position fits.
pub fn output_extent(padding: PaddingType, input: usize, kernel: usize, stride: usize) -> Option<usize> {
    if stride == 0 || kernel == 0 {
        return None;
    }
    match padding {
        PaddingType::Same => Some((input + stride - 1) / stride),
        PaddingType::Valid => input.checked_sub(kernel).map(|span| span / stride + 1),
    }
}

/// Leading and trailing `SAME` padding along one axis.
pub fn same(input: usize, output: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let needed = output.saturating_sub(1) * stride + kernel;
    let total = needed.saturating_sub(input);
    (total / 2, (total + 1) / 2)
}

/// Explicit padding of a 2D window over `input` producing `output`.
pub fn explicit(
    padding: PaddingType,
    input: FeatureShape,
    output: FeatureShape,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
) -> Padding {
    match padding {
        PaddingType::Valid => Padding::default(),
        PaddingType::Same => {
            let (top, bottom) = same(input.h, output.h, kernel_h, stride_h);
            let (left, right) = same(input.w, output.w, kernel_w, stride_w);
            Padding {
                top,
                bottom,
                left,
                right,
            }
        }
    }
}
