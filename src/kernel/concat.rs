//! Concatenation along one storage axis.

/// Concatenate `inputs` (data, storage dims) along storage `axis`.
///
/// All inputs share every extent except `axis`.
pub fn concat(inputs: &[(&[f32], &[usize])], axis: usize, output: &mut [f32]) {
    let Some((_, first_dims)) = inputs.first() else {
        return;
    };
    let outer: usize = first_dims[..axis].iter().product();
    let inner: usize = first_dims[axis + 1..].iter().product();
    let out_axis: usize = inputs.iter().map(|(_, dims)| dims[axis]).sum();

    let mut axis_offset = 0;
    for (data, dims) in inputs {
        let chunk = dims[axis] * inner;
        for o in 0..outer {
            let src = &data[o * chunk..(o + 1) * chunk];
            let dst_start = (o * out_axis + axis_offset) * inner;
            output[dst_start..dst_start + chunk].copy_from_slice(src);
        }
        axis_offset += dims[axis];
    }
}
