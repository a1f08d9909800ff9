//! Index arithmetic for NHWC and NCHW storage.

use crate::graph::{FeatureShape, Layout};

/// Maps logical `(n, h, w, c)` coordinates to a flat storage offset.
#[derive(Debug, Clone, Copy)]
pub struct FeatureIndexer {
    shape: FeatureShape,
    layout: Layout,
}

impl FeatureIndexer {
    pub fn new(shape: FeatureShape, layout: Layout) -> Self {
        Self { shape, layout }
    }

    pub fn shape(&self) -> FeatureShape {
        self.shape
    }

    #[inline]
    pub fn offset(&self, n: usize, h: usize, w: usize, c: usize) -> usize {
        let s = &self.shape;
        match self.layout {
            Layout::Nhwc => ((n * s.h + h) * s.w + w) * s.c + c,
            Layout::Nchw => ((n * s.c + c) * s.h + h) * s.w + w,
        }
    }
}

/// Storage order of a logical (NHWC for rank 4) shape.
pub fn storage_dims(logical: &[usize], layout: Layout) -> Vec<usize> {
    match (layout, logical) {
        (Layout::Nchw, &[n, h, w, c]) => vec![n, c, h, w],
        _ => logical.to_vec(),
    }
}

/// Storage position of logical `axis`.
pub fn storage_axis(axis: usize, rank: usize, layout: Layout) -> usize {
    match (layout, rank) {
        (Layout::Nchw, 4) => [0, 2, 3, 1][axis],
        _ => axis,
    }
}

/// Reorder `data` from `from` to `to` storage. Non rank 4 data is unchanged.
pub fn convert(data: &[f32], logical: &[usize], from: Layout, to: Layout) -> Vec<f32> {
    let feature = match logical {
        &[n, h, w, c] if from != to => FeatureShape { n, h, w, c },
        _ => return data.to_vec(),
    };
    let src = FeatureIndexer::new(feature, from);
    let dst = FeatureIndexer::new(feature, to);
    let mut out = vec![0.0; data.len()];
    for n in 0..feature.n {
        for h in 0..feature.h {
            for w in 0..feature.w {
                for c in 0..feature.c {
                    out[dst.offset(n, h, w, c)] = data[src.offset(n, h, w, c)];
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_cover_buffer_once() {
        let shape = FeatureShape { n: 2, h: 3, w: 2, c: 4 };
        for layout in [Layout::Nhwc, Layout::Nchw] {
            let indexer = FeatureIndexer::new(shape, layout);
            let mut seen = vec![false; 48];
            for n in 0..2 {
                for h in 0..3 {
                    for w in 0..2 {
                        for c in 0..4 {
                            let at = indexer.offset(n, h, w, c);
                            assert!(!seen[at]);
                            seen[at] = true;
                        }
                    }
                }
            }
            assert!(seen.iter().all(|s| *s));
        }
    }

    #[test]
    fn test_convert_nhwc_to_nchw() {
        // 1x1x2x3 NHWC: pixel 0 = [0, 1, 2], pixel 1 = [3, 4, 5]
        let data = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let nchw = convert(&data, &[1, 1, 2, 3], Layout::Nhwc, Layout::Nchw);
        assert_eq!(nchw, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        let back = convert(&nchw, &[1, 1, 2, 3], Layout::Nchw, Layout::Nhwc);
        assert_eq!(back, data.to_vec());
    }

    #[test]
    fn test_storage_axis_for_channel() {
        assert_eq!(storage_axis(3, 4, Layout::Nchw), 1);
        assert_eq!(storage_axis(3, 4, Layout::Nhwc), 3);
        assert_eq!(storage_axis(1, 2, Layout::Nchw), 1);
        assert_eq!(storage_dims(&[1, 2, 3, 4], Layout::Nchw), vec![1, 4, 2, 3]);
    }
}
