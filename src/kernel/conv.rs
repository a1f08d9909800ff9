//! 2D convolution.

use super::{input_coord, FeatureIndexer, Layout, Padding};
use crate::graph::{Activation, FeatureShape, KernelShape};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conv2DGeometry {
    pub input: FeatureShape,
    pub kernel: KernelShape,
    pub output: FeatureShape,
    pub stride_h: usize,
    pub stride_w: usize,
    pub padding: Padding,
}

/// Direct convolution.
///
/// `weights` follow `layout` too: OHWI for NHWC, OIHW for NCHW.
pub fn conv2d(
    geometry: &Conv2DGeometry,
    layout: Layout,
    input: &[f32],
    weights: &[f32],
    bias: &[f32],
    activation: Activation,
    output: &mut [f32],
) {
    let g = geometry;
    let src = FeatureIndexer::new(g.input, layout);
    let ker = FeatureIndexer::new(
        FeatureShape {
            n: g.kernel.n,
            h: g.kernel.h,
            w: g.kernel.w,
            c: g.kernel.c,
        },
        layout,
    );
    let dst = FeatureIndexer::new(g.output, layout);

    for n in 0..g.output.n {
        for oh in 0..g.output.h {
            for ow in 0..g.output.w {
                for oc in 0..g.output.c {
                    let mut acc = bias[oc];
                    for kh in 0..g.kernel.h {
                        let Some(ih) = input_coord(oh, g.stride_h, kh, g.padding.top, g.input.h) else {
                            continue;
                        };
                        for kw in 0..g.kernel.w {
                            let Some(iw) = input_coord(ow, g.stride_w, kw, g.padding.left, g.input.w)
                            else {
                                continue;
                            };
                            for ic in 0..g.input.c {
                                acc += input[src.offset(n, ih, iw, ic)]
                                    * weights[ker.offset(oc, kh, kw, ic)];
                            }
                        }
                    }
                    output[dst.offset(n, oh, ow, oc)] = activation.apply(acc);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs(n: usize, h: usize, w: usize, c: usize) -> FeatureShape {
        FeatureShape { n, h, w, c }
    }

    #[test]
    fn test_3x3_valid_sums_window() {
        let geometry = Conv2DGeometry {
            input: fs(1, 3, 3, 1),
            kernel: KernelShape { n: 1, h: 3, w: 3, c: 1 },
            output: fs(1, 1, 1, 1),
            stride_h: 1,
            stride_w: 1,
            padding: Padding::default(),
        };
        let input: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let mut out = [0.0];
        conv2d(&geometry, Layout::Nhwc, &input, &[1.0; 9], &[0.5], Activation::None, &mut out);
        assert_eq!(out[0], 45.5);
    }

    #[test]
    fn test_same_padding_corner_sees_four_taps() {
        let geometry = Conv2DGeometry {
            input: fs(1, 3, 3, 1),
            kernel: KernelShape { n: 1, h: 3, w: 3, c: 1 },
            output: fs(1, 3, 3, 1),
            stride_h: 1,
            stride_w: 1,
            padding: Padding { top: 1, bottom: 1, left: 1, right: 1 },
        };
        let mut out = [0.0; 9];
        conv2d(&geometry, Layout::Nchw, &[1.0; 9], &[1.0; 9], &[0.0], Activation::None, &mut out);
        assert_eq!(out, [4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn test_fused_relu() {
        let geometry = Conv2DGeometry {
            input: fs(1, 1, 1, 2),
            kernel: KernelShape { n: 2, h: 1, w: 1, c: 2 },
            output: fs(1, 1, 1, 2),
            stride_h: 1,
            stride_w: 1,
            padding: Padding::default(),
        };
        let mut out = [0.0; 2];
        // out0 = 1*1 + 2*1, out1 = -(1*1 + 2*1)
        conv2d(
            &geometry,
            Layout::Nhwc,
            &[1.0, 2.0],
            &[1.0, 1.0, -1.0, -1.0],
            &[0.0, 0.0],
            Activation::Relu,
            &mut out,
        );
        assert_eq!(out, [3.0, 0.0]);
    }
}
