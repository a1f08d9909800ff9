//! Fully connected layer.

use crate::graph::Activation;

/// `output[b][u] = act(bias[u] + sum_i input[b][i] * weights[u][i])`.
///
/// `input` is read as `batch` rows of `input_size`, whatever its rank.
pub fn fully_connected(
    input: &[f32],
    batch: usize,
    input_size: usize,
    weights: &[f32],
    bias: &[f32],
    activation: Activation,
    output: &mut [f32],
) {
    let units = bias.len();
    for b in 0..batch {
        let row = &input[b * input_size..(b + 1) * input_size];
        for u in 0..units {
            let w = &weights[u * input_size..(u + 1) * input_size];
            let dot: f32 = row.iter().zip(w).map(|(x, y)| x * y).sum();
            output[b * units + u] = activation.apply(dot + bias[u]);
        }
    }
}
