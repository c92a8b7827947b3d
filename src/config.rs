// config.rs — Pipeline parameters.
//
// Defaults follow Lowe's SIFT as commonly tuned for 8-bit images whose
// intensities stay in [0, 255] (no normalisation to [0, 1]):
//
//   peak_thresh   = 255 * 0.04 / 3  ≈ 3.4   DoG contrast floor
//   edge_thresh0  = 0.08                    det/trace² floor, first octave
//   edge_thresh   = 0.06                    det/trace² floor, later octaves
//
// Parameters can be loaded from JSON; missing keys fall back to defaults:
//
//   { "scales_per_octave": 4, "pixels_per_keypoint": 20 }

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunable parameters of the keypoint pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftParams {
    /// Number of scales searched per octave. The octave holds
    /// `scales_per_octave + 3` Gaussians and `scales_per_octave + 2` DoGs.
    pub scales_per_octave: usize,
    /// Blur of the first Gaussian of every octave.
    pub init_sigma: f32,
    /// Blur already present in the input image.
    pub assumed_blur: f32,
    /// Pixels from the image edge in which no extremum is reported.
    pub border_dist: usize,
    /// Minimum absolute DoG value of an accepted keypoint.
    pub peak_thresh: f32,
    /// Edge-response floor (det / trace²) used on the first octave.
    pub edge_thresh0: f32,
    /// Edge-response floor used on every later octave.
    pub edge_thresh: f32,
    /// Gaussian window factor of the orientation histogram.
    pub ori_sigma: f32,
    /// Keypoint density bound: buffer capacity = area / pixels_per_keypoint.
    pub pixels_per_keypoint: usize,
    /// Hard limit on processed octaves.
    pub max_octaves: usize,
    /// Stop before an octave whose shorter side would fall below this.
    pub min_octave_size: usize,
}

impl Default for SiftParams {
    fn default() -> Self {
        SiftParams {
            scales_per_octave: 3,
            init_sigma: 1.6,
            assumed_blur: 0.5,
            border_dist: 5,
            peak_thresh: 255.0 * 0.04 / 3.0,
            edge_thresh0: 0.08,
            edge_thresh: 0.06,
            ori_sigma: 1.5,
            pixels_per_keypoint: 10,
            max_octaves: 8,
            min_octave_size: 16,
        }
    }
}

impl SiftParams {
    /// Parse parameters from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let params: SiftParams =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Read and parse a JSON parameter file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&data)
    }

    /// Check that every parameter is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scales_per_octave == 0 {
            return Err(ConfigError::NoScales(self.scales_per_octave));
        }
        for (name, value) in [
            ("init_sigma", self.init_sigma),
            ("peak_thresh", self.peak_thresh),
            ("edge_thresh0", self.edge_thresh0),
            ("edge_thresh", self.edge_thresh),
            ("ori_sigma", self.ori_sigma),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        if !(self.assumed_blur.is_finite() && self.assumed_blur >= 0.0) {
            return Err(ConfigError::NotPositive {
                name: "assumed_blur",
                value: self.assumed_blur,
            });
        }
        if self.pixels_per_keypoint == 0 {
            return Err(ConfigError::PixelsPerKeypoint(self.pixels_per_keypoint));
        }
        if self.max_octaves == 0 {
            return Err(ConfigError::NoOctaves(self.max_octaves));
        }
        if self.min_octave_size <= 2 * self.border_dist {
            return Err(ConfigError::OctaveTooSmall {
                min: self.min_octave_size,
                border: self.border_dist,
            });
        }
        Ok(())
    }

    /// Number of DoG planes per octave.
    pub fn dog_levels(&self) -> usize {
        self.scales_per_octave + 2
    }

    /// Number of Gaussian planes per octave.
    pub fn gaussian_levels(&self) -> usize {
        self.scales_per_octave + 3
    }

    /// Keypoint buffer capacity for an image of the given size.
    pub fn keypoint_capacity(&self, width: usize, height: usize) -> usize {
        (width * height / self.pixels_per_keypoint).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let p = SiftParams::default();
        assert!(p.validate().is_ok());
        assert_eq!(p.dog_levels(), 5);
        assert_eq!(p.gaussian_levels(), 6);
    }

    #[test]
    fn test_capacity_from_density() {
        let p = SiftParams::default();
        // 386×217 image at 10 px/keypoint, as the density bound is defined.
        assert_eq!(p.keypoint_capacity(386, 217), 386 * 217 / 10);
        assert_eq!(p.keypoint_capacity(2, 2), 1);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let p = SiftParams::from_json_str(r#"{ "scales_per_octave": 4, "pixels_per_keypoint": 20 }"#)
            .unwrap();
        assert_eq!(p.scales_per_octave, 4);
        assert_eq!(p.pixels_per_keypoint, 20);
        assert_eq!(p.border_dist, SiftParams::default().border_dist);
    }

    #[test]
    fn test_rejects_zero_scales() {
        let err = SiftParams::from_json_str(r#"{ "scales_per_octave": 0 }"#).unwrap_err();
        assert_eq!(err, ConfigError::NoScales(0));
    }

    #[test]
    fn test_rejects_negative_sigma() {
        let p = SiftParams { init_sigma: -1.0, ..Default::default() };
        assert!(matches!(
            p.validate(),
            Err(ConfigError::NotPositive { name: "init_sigma", .. })
        ));
    }

    #[test]
    fn test_rejects_border_wider_than_octave() {
        let p = SiftParams { border_dist: 8, min_octave_size: 16, ..Default::default() };
        assert!(matches!(p.validate(), Err(ConfigError::OctaveTooSmall { .. })));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            SiftParams::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
