//! Elementwise kernels.

use crate::graph::{Activation, TypeInfo};

pub fn add(lhs: &[f32], rhs: &[f32], activation: Activation, output: &mut [f32]) {
    for ((o, a), b) in output.iter_mut().zip(lhs).zip(rhs) {
        *o = activation.apply(a + b);
    }
}

pub fn activation_inplace(data: &mut [f32], activation: Activation) {
    if activation == Activation::None {
        return;
    }
    for v in data.iter_mut() {
        *v = activation.apply(*v);
    }
}

/// Convert storage words of type `from` into storage words of type `to`.
///
/// Quantized inputs are dequantized first; quantized outputs are
/// requantized with the output scale and zero point. Identical types copy.
pub fn cast(input: &[f32], from: &TypeInfo, to: &TypeInfo, output: &mut [f32]) {
    if from == to {
        output.copy_from_slice(&input[..output.len()]);
        return;
    }
    for (o, word) in output.iter_mut().zip(input) {
        *o = to.to_word(from.to_real(*word));
    }
}
