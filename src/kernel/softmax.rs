//! Softmax along one axis.

/// Element `(o, a, i)` lives at `(o * axis_len + a) * inner + i`.
pub fn softmax(input: &[f32], outer: usize, axis_len: usize, inner: usize, beta: f32, output: &mut [f32]) {
    for o in 0..outer {
        for i in 0..inner {
            let at = |a: usize| (o * axis_len + a) * inner + i;
            let max = (0..axis_len)
                .map(|a| input[at(a)])
                .fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0;
            for a in 0..axis_len {
                let e = ((input[at(a)] - max) * beta).exp();
                output[at(a)] = e;
                sum += e;
            }
            for a in 0..axis_len {
                output[at(a)] /= sum;
            }
        }
    }
}
