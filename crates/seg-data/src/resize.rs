//! 2D resampling kernels matching the usual image-library conventions:
//! half-pixel centres and replicated borders for bicubic, floor mapping for
//! nearest neighbour.

use ndarray::{Array2, ArrayView2};

const CUBIC_A: f64 = -0.75;

fn cubic_weight(x: f64) -> f64 {
    let x = x.abs();
    if x <= 1.0 {
        ((CUBIC_A + 2.0) * x - (CUBIC_A + 3.0)) * x * x + 1.0
    } else if x < 2.0 {
        ((CUBIC_A * x - 5.0 * CUBIC_A) * x + 8.0 * CUBIC_A) * x - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

/// Source taps and weights for every destination coordinate along one axis.
fn cubic_taps(src_len: usize, dst_len: usize) -> Vec<([usize; 4], [f64; 4])> {
    let scale = src_len as f64 / dst_len as f64;
    let last = src_len as isize - 1;
    (0..dst_len)
        .map(|d| {
            let f = (d as f64 + 0.5) * scale - 0.5;
            let base = f.floor();
            let t = f - base;
            let base = base as isize;
            let mut idx = [0usize; 4];
            let mut w = [0f64; 4];
            for k in 0..4 {
                let offset = k as isize - 1;
                idx[k] = (base + offset).clamp(0, last) as usize;
                w[k] = cubic_weight(t - offset as f64);
            }
            (idx, w)
        })
        .collect()
}

/// Bicubic resize to `(height, width)`.
pub fn resize_cubic(src: ArrayView2<'_, f64>, out_shape: (usize, usize)) -> Array2<f64> {
    let (height, width) = out_shape;
    let (src_h, src_w) = src.dim();
    if src_h == 0 || src_w == 0 {
        return Array2::zeros((height, width));
    }
    let rows = cubic_taps(src_h, height);
    let cols = cubic_taps(src_w, width);
    Array2::from_shape_fn((height, width), |(r, c)| {
        let (ri, rw) = &rows[r];
        let (ci, cw) = &cols[c];
        let mut acc = 0.0;
        for i in 0..4 {
            let mut row_acc = 0.0;
            for j in 0..4 {
                row_acc += src[[ri[i], ci[j]]] * cw[j];
            }
            acc += row_acc * rw[i];
        }
        acc
    })
}

/// Nearest-neighbour resize to `(height, width)`; never produces a value not
/// present in `src`.
pub fn resize_nearest<T: Copy + Default>(
    src: ArrayView2<'_, T>,
    out_shape: (usize, usize),
) -> Array2<T> {
    let (height, width) = out_shape;
    let (src_h, src_w) = src.dim();
    if src_h == 0 || src_w == 0 {
        return Array2::from_elem((height, width), T::default());
    }
    let map = |d: usize, src_len: usize, dst_len: usize| {
        let s = (d as f64 * (src_len as f64 / dst_len as f64)).floor() as usize;
        s.min(src_len - 1)
    };
    Array2::from_shape_fn((height, width), |(r, c)| {
        src[[map(r, src_h, height), map(c, src_w, width)]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn cubic_weights_sum_to_one() {
        for step in 0..10 {
            let t = step as f64 / 10.0;
            let sum: f64 = (0..4).map(|k| cubic_weight(t - (k as f64 - 1.0))).sum();
            assert!((sum - 1.0).abs() < 1e-12, "t={} sum={}", t, sum);
        }
    }

    #[test]
    fn cubic_same_size_is_identity() {
        let src = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let out = resize_cubic(src.view(), (2, 3));
        for (a, b) in out.iter().zip(src.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn cubic_keeps_constant_images_constant() {
        let src = Array2::from_elem((7, 5), 3.25);
        let out = resize_cubic(src.view(), (16, 11));
        assert_eq!(out.dim(), (16, 11));
        assert!(out.iter().all(|v| (v - 3.25).abs() < 1e-9));
    }

    #[test]
    fn nearest_upsamples_by_repetition() {
        let src = array![[0u8, 1], [2, 3]];
        let out = resize_nearest(src.view(), (4, 4));
        assert_eq!(
            out,
            array![[0u8, 0, 1, 1], [0, 0, 1, 1], [2, 2, 3, 3], [2, 2, 3, 3]]
        );
    }

    #[test]
    fn nearest_downsample_only_uses_source_values() {
        let src = Array2::from_shape_fn((9, 13), |(r, c)| ((r + c) % 2) as u8);
        let out = resize_nearest(src.view(), (4, 5));
        assert_eq!(out.dim(), (4, 5));
        assert!(out.iter().all(|v| *v == 0 || *v == 1));
    }
}
