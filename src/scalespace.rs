// scalespace.rs — Per-octave Gaussian and Difference-of-Gaussian stacks.
//
// For `S = scales_per_octave` an octave holds S + 3 Gaussians
//
//   G[0] = seed (blur init_sigma)      G[i] = G[i-1] ⊛ g(σᵢ),  i = 1..S+2
//
// where σᵢ is the incremental blur that brings G[i-1] from
// init_sigma · k^(i-1) to init_sigma · k^i, k = 2^(1/S), and S + 2 DoG planes
// D[i] = G[i+1] - G[i]. Extrema are searched on D[1..=S], each with a plane
// above and below.
//
// The next octave's seed is G[S] (blur 2 · init_sigma) subsampled 2×, which
// puts it back at init_sigma relative to its own pixel grid.
//
// The first seed is the input blurred from `assumed_blur` to `init_sigma`.

use log::debug;

use crate::config::SiftParams;
use crate::convolution::gaussian_blur;
use crate::image::{Image, Pixel};

/// One octave of the scale space, all planes at the same size.
#[derive(Debug, Clone)]
pub struct Octave {
    pub index: usize,
    pub gaussians: Vec<Image<f32>>,
    pub dogs: Vec<Image<f32>>,
}

impl Octave {
    pub fn width(&self) -> usize {
        self.gaussians[0].width()
    }

    pub fn height(&self) -> usize {
        self.gaussians[0].height()
    }

    /// Ratio between input-image pixels and this octave's pixels.
    pub fn octsize(&self) -> usize {
        1 << self.index
    }

    /// DoG planes concatenated in level order, the device layout
    /// (plane `s` at offset `s × width × height`).
    pub fn dog_stack(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dogs.len() * self.width() * self.height());
        for d in &self.dogs {
            out.extend_from_slice(d.as_slice());
        }
        out
    }
}

/// Incremental blurs σ₁..σ_{S+2} applied between successive Gaussians.
pub fn sigma_schedule(params: &SiftParams) -> Vec<f32> {
    let k = 2f32.powf(1.0 / params.scales_per_octave as f32);
    (1..params.gaussian_levels())
        .map(|i| {
            let prev = params.init_sigma * k.powi(i as i32 - 1);
            let total = prev * k;
            (total * total - prev * prev).sqrt()
        })
        .collect()
}

/// Absolute blur of Gaussian level `i`, octave-local.
pub fn level_sigma(params: &SiftParams, i: usize) -> f32 {
    params.init_sigma * 2f32.powf(i as f32 / params.scales_per_octave as f32)
}

/// Bring the input image from `assumed_blur` to `init_sigma`.
pub fn seed_image<T: Pixel>(image: &Image<T>, params: &SiftParams) -> Image<f32> {
    let extra = params.init_sigma * params.init_sigma - params.assumed_blur * params.assumed_blur;
    if extra > 1e-6 {
        gaussian_blur(image, extra.sqrt())
    } else {
        image.to_f32()
    }
}

/// Build the Gaussian and DoG stacks of one octave from its seed image.
pub fn build_octave(index: usize, seed: Image<f32>, params: &SiftParams) -> Octave {
    let schedule = sigma_schedule(params);
    let mut gaussians = Vec::with_capacity(params.gaussian_levels());
    gaussians.push(seed);
    for &sigma in &schedule {
        let next = match gaussians.last() {
            Some(prev) => gaussian_blur(prev, sigma),
            None => break,
        };
        gaussians.push(next);
    }

    let dogs: Vec<Image<f32>> = gaussians
        .windows(2)
        .map(|pair| {
            let (lo, hi) = (&pair[0], &pair[1]);
            let data = hi
                .as_slice()
                .iter()
                .zip(lo.as_slice())
                .map(|(h, l)| h - l)
                .collect();
            Image::from_vec(lo.width(), lo.height(), data)
        })
        .collect();

    debug!(
        "scalespace: octave {index} {}×{}, {} gaussians, {} DoGs",
        gaussians[0].width(),
        gaussians[0].height(),
        gaussians.len(),
        dogs.len()
    );
    Octave { index, gaussians, dogs }
}

/// Seed of the octave after `octave`: Gaussian level S subsampled 2×.
pub fn next_seed(octave: &Octave, params: &SiftParams) -> Image<f32> {
    downsample_2x(&octave.gaussians[params.scales_per_octave])
}

/// Keep every other pixel in both dimensions (floor of half size).
pub fn downsample_2x(src: &Image<f32>) -> Image<f32> {
    Image::from_fn(src.width() / 2, src.height() / 2, |x, y| src.get(2 * x, 2 * y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_plane_counts() {
        let p = SiftParams::default();
        let img = Image::from_vec(32, 32, vec![10u8; 32 * 32]);
        let oct = build_octave(0, seed_image(&img, &p), &p);
        assert_eq!(oct.gaussians.len(), p.scales_per_octave + 3);
        assert_eq!(oct.dogs.len(), p.scales_per_octave + 2);
        assert_eq!(oct.dog_stack().len(), oct.dogs.len() * 32 * 32);
    }

    #[test]
    fn test_sigma_schedule_composes_to_octave_doubling() {
        let p = SiftParams::default();
        // Blurs add in quadrature: init² + Σσᵢ² over the first S steps = (2·init)².
        let s = p.scales_per_octave;
        let total_sq: f32 = p.init_sigma * p.init_sigma
            + sigma_schedule(&p)[..s].iter().map(|v| v * v).sum::<f32>();
        assert_abs_diff_eq!(total_sq.sqrt(), 2.0 * p.init_sigma, epsilon = 1e-4);
        assert_abs_diff_eq!(level_sigma(&p, s), 2.0 * p.init_sigma, epsilon = 1e-5);
    }

    #[test]
    fn test_constant_image_has_zero_dog() {
        let p = SiftParams::default();
        let img = Image::from_vec(24, 24, vec![77u8; 24 * 24]);
        let oct = build_octave(0, seed_image(&img, &p), &p);
        for d in &oct.dogs {
            assert!(d.as_slice().iter().all(|v| v.abs() < 1e-3));
        }
    }

    #[test]
    fn test_downsample_dimensions() {
        let img = Image::from_fn(33, 20, |x, y| (x + 100 * y) as f32);
        let d = downsample_2x(&img);
        assert_eq!((d.width(), d.height()), (16, 10));
        assert_eq!(d.get(3, 2), img.get(6, 4));
    }

    #[test]
    fn test_next_seed_halves_octave() {
        let p = SiftParams::default();
        let img = Image::from_fn(40, 30, |x, y| ((x * 7 + y * 3) % 255) as u8);
        let oct = build_octave(0, seed_image(&img, &p), &p);
        let seed = next_seed(&oct, &p);
        assert_eq!((seed.width(), seed.height()), (20, 15));
        assert_eq!(build_octave(1, seed, &p).octsize(), 2);
    }
}
