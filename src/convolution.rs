// convolution.rs — Separable Gaussian convolution for host images.
//
// A 2D Gaussian G(σ) = g(σ) gᵀ(σ) splits into a horizontal and a vertical
// 1D pass, O(2k) instead of O(k²) per pixel. Both passes run row-parallel
// on rayon.
//
// BORDER HANDLING: clamp (replicate edge pixels). Interior pixels, where the
// kernel never leaves the image, take a branch-free path.

use rayon::prelude::*;

use crate::image::{Image, Pixel};

/// Half-width of a Gaussian kernel that keeps ±4σ of support.
pub fn gaussian_half_size(sigma: f32) -> usize {
    (4.0 * sigma).ceil().max(1.0) as usize
}

/// 1D Gaussian kernel of length `2 * half_size + 1`, normalised to sum 1.
///
/// # Panics
/// Panics if `sigma <= 0`.
pub fn gaussian_kernel_1d(half_size: usize, sigma: f32) -> Vec<f32> {
    assert!(sigma > 0.0, "sigma must be positive");
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=2 * half_size)
        .map(|i| {
            let x = i as f32 - half_size as f32;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Horizontal pass.
pub fn convolve_rows<T: Pixel>(src: &Image<T>, kernel: &[f32]) -> Image<f32> {
    assert!(kernel.len() % 2 == 1, "kernel length must be odd (got {})", kernel.len());
    let (w, h) = (src.width(), src.height());
    let half = kernel.len() / 2;
    let mut dst = Image::<f32>::new(w, h);
    if w == 0 {
        return dst;
    }

    dst.as_mut_slice()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, out)| {
            let row = src.row(y);
            for (x, o) in out.iter_mut().enumerate() {
                let mut acc = 0.0f32;
                if x >= half && x + half < w {
                    for (ki, &kv) in kernel.iter().enumerate() {
                        acc += row[x + ki - half].to_f32() * kv;
                    }
                } else {
                    for (ki, &kv) in kernel.iter().enumerate() {
                        let sx = (x as isize + ki as isize - half as isize).clamp(0, w as isize - 1);
                        acc += row[sx as usize].to_f32() * kv;
                    }
                }
                *o = acc;
            }
        });
    dst
}

/// Vertical pass.
pub fn convolve_cols(src: &Image<f32>, kernel: &[f32]) -> Image<f32> {
    assert!(kernel.len() % 2 == 1, "kernel length must be odd (got {})", kernel.len());
    let (w, h) = (src.width(), src.height());
    let half = kernel.len() / 2;
    let mut dst = Image::<f32>::new(w, h);
    if w == 0 {
        return dst;
    }

    let data = src.as_slice();
    dst.as_mut_slice()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, out)| {
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = (y as isize + ki as isize - half as isize).clamp(0, h as isize - 1) as usize;
                let row = &data[sy * w..(sy + 1) * w];
                for (o, &v) in out.iter_mut().zip(row) {
                    *o += v * kv;
                }
            }
        });
    dst
}

/// Full separable 2D convolution: rows then columns.
pub fn convolve_separable<T: Pixel>(src: &Image<T>, kernel_row: &[f32], kernel_col: &[f32]) -> Image<f32> {
    convolve_cols(&convolve_rows(src, kernel_row), kernel_col)
}

/// Gaussian blur with standard deviation `sigma`.
pub fn gaussian_blur<T: Pixel>(src: &Image<T>, sigma: f32) -> Image<f32> {
    let k = gaussian_kernel_1d(gaussian_half_size(sigma), sigma);
    convolve_separable(src, &k, &k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_gaussian_kernel_properties() {
        let k = gaussian_kernel_1d(2, 1.0);
        assert_eq!(k.len(), 5);
        assert_abs_diff_eq!(k.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(k[0], k[4], epsilon = 1e-7);
        assert!(k[2] > k[1] && k[1] > k[0]);
    }

    #[test]
    fn test_identity_kernel() {
        let img = Image::from_fn(4, 3, |x, y| (y * 4 + x) as u8);
        let id = [0.0, 0.0, 1.0, 0.0, 0.0];
        let out = convolve_separable(&img, &id, &id);
        for (x, y, v) in out.pixels() {
            assert_abs_diff_eq!(v, img.get(x, y).to_f32(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_constant_image_unchanged() {
        let img = Image::from_vec(7, 5, vec![100.0f32; 35]);
        let out = gaussian_blur(&img, 1.6);
        for (_, _, v) in out.pixels() {
            assert_abs_diff_eq!(v, 100.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_blur_spreads_impulse_symmetrically() {
        let mut img = Image::<f32>::new(15, 15);
        img.set(7, 7, 1.0);
        let out = gaussian_blur(&img, 1.0);
        assert_abs_diff_eq!(out.get(6, 7), out.get(8, 7), epsilon = 1e-6);
        assert_abs_diff_eq!(out.get(7, 6), out.get(6, 7), epsilon = 1e-6);
        assert!(out.get(7, 7) < 1.0 && out.get(7, 7) > out.get(6, 7));
        assert_abs_diff_eq!(out.as_slice().iter().sum::<f32>(), 1.0, epsilon = 1e-4);
    }
}
