//! Max and average pooling.

use super::{input_coord, FeatureIndexer, Layout, Padding};
use crate::graph::{Activation, FeatureShape};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pool2DGeometry {
    pub input: FeatureShape,
    pub output: FeatureShape,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub padding: Padding,
}

fn pool<F>(geometry: &Pool2DGeometry, layout: Layout, input: &[f32], output: &mut [f32], mut reduce: F)
where
    F: FnMut(&mut dyn Iterator<Item = f32>) -> f32,
{
    let g = geometry;
    let src = FeatureIndexer::new(g.input, layout);
    let dst = FeatureIndexer::new(g.output, layout);
    for n in 0..g.output.n {
        for oh in 0..g.output.h {
            for ow in 0..g.output.w {
                for c in 0..g.output.c {
                    let mut window = (0..g.kernel_h)
                        .filter_map(|kh| input_coord(oh, g.stride_h, kh, g.padding.top, g.input.h))
                        .flat_map(|ih| {
                            (0..g.kernel_w)
                                .filter_map(move |kw| {
                                    input_coord(ow, g.stride_w, kw, g.padding.left, g.input.w)
                                })
                                .map(move |iw| input[src.offset(n, ih, iw, c)])
                        });
                    output[dst.offset(n, oh, ow, c)] = reduce(&mut window);
                }
            }
        }
    }
}

/// Padded positions never win.
pub fn max_pool2d(
    geometry: &Pool2DGeometry,
    layout: Layout,
    input: &[f32],
    activation: Activation,
    output: &mut [f32],
) {
    pool(geometry, layout, input, output, |window| {
        activation.apply(window.fold(f32::NEG_INFINITY, f32::max))
    });
}

/// Padded positions are excluded from the divisor.
pub fn avg_pool2d(
    geometry: &Pool2DGeometry,
    layout: Layout,
    input: &[f32],
    activation: Activation,
    output: &mut [f32],
) {
    pool(geometry, layout, input, output, |window| {
        let (sum, count) = window.fold((0.0f32, 0usize), |(s, c), v| (s + v, c + 1));
        let mean = if count == 0 { 0.0 } else { sum / count as f32 };
        activation.apply(mean)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(padding: Padding, out_hw: usize) -> Pool2DGeometry {
        Pool2DGeometry {
            input: FeatureShape { n: 1, h: 2, w: 2, c: 1 },
            output: FeatureShape { n: 1, h: out_hw, w: out_hw, c: 1 },
            kernel_h: 2,
            kernel_w: 2,
            stride_h: 1,
            stride_w: 1,
            padding,
        }
    }

    #[test]
    fn test_max_pool_valid() {
        let mut out = [0.0];
        max_pool2d(&geometry(Padding::default(), 1), Layout::Nhwc, &[1.0, -2.0, 7.0, 3.0], Activation::None, &mut out);
        assert_eq!(out, [7.0]);
    }

    #[test]
    fn test_avg_pool_excludes_padding() {
        let padding = Padding { top: 0, bottom: 1, left: 0, right: 1 };
        let mut out = [0.0; 4];
        avg_pool2d(&geometry(padding, 2), Layout::Nhwc, &[1.0, 2.0, 3.0, 4.0], Activation::None, &mut out);
        assert_eq!(out, [2.5, 3.0, 3.5, 4.0]);
    }
}
