// keypoint.rs — Device keypoint record and host-side feature output.
//
// The device sees keypoints as a flat array of `float4` (`vec4<f32>` in
// WGSL). The same 16 bytes carry different meanings as a keypoint moves
// through the pipeline:
//
//   stage                  x        y        sigma              angle
//   ─────────────────────  ───────  ───────  ─────────────────  ──────────
//   local_maxmin           column   row      scale index        DoG value
//   interp_keypoint        refined  refined  octave-local blur  0
//   orientation_assignment image-frame position and blur        radians
//
// Slots that hold nothing are filled with -1.0 in every field. A slot is
// valid iff `x >= 0`, which is what every kernel and the compaction step
// test.

use bytemuck::{Pod, Zeroable};
use serde::Serialize;

/// Fill value of an empty or rejected keypoint slot.
pub const SENTINEL: f32 = -1.0;

/// Length of a SIFT descriptor: 4×4 spatial cells × 8 orientation bins.
pub const DESCRIPTOR_LEN: usize = 128;

/// One device keypoint slot. Layout matches `vec4<f32>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub sigma: f32,
    pub angle: f32,
}

impl Keypoint {
    /// The empty slot: every field set to [`SENTINEL`].
    pub const INVALID: Keypoint = Keypoint {
        x: SENTINEL,
        y: SENTINEL,
        sigma: SENTINEL,
        angle: SENTINEL,
    };

    pub fn new(x: f32, y: f32, sigma: f32, angle: f32) -> Self {
        Keypoint { x, y, sigma, angle }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.x >= 0.0
    }
}

impl Default for Keypoint {
    fn default() -> Self {
        Keypoint::INVALID
    }
}

/// A finished feature: keypoint in input-image coordinates, the octave it
/// was found in, and its quantised descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiftFeature {
    pub x: f32,
    pub y: f32,
    /// Blur of the keypoint in input-image pixels.
    pub scale: f32,
    /// Dominant gradient orientation in radians, `(-π, π]`.
    pub angle: f32,
    pub octave: usize,
    #[serde(serialize_with = "serialize_descriptor")]
    pub descriptor: [u8; DESCRIPTOR_LEN],
}

impl SiftFeature {
    pub fn from_parts(kp: &Keypoint, octave: usize, descriptor: &[u8]) -> Self {
        let mut d = [0u8; DESCRIPTOR_LEN];
        let n = descriptor.len().min(DESCRIPTOR_LEN);
        d[..n].copy_from_slice(&descriptor[..n]);
        SiftFeature {
            x: kp.x,
            y: kp.y,
            scale: kp.sigma,
            angle: kp.angle,
            octave,
            descriptor: d,
        }
    }
}

// serde only derives Serialize for arrays up to 32 elements.
fn serialize_descriptor<S: serde::Serializer>(
    d: &[u8; DESCRIPTOR_LEN],
    s: S,
) -> Result<S::Ok, S::Error> {
    s.collect_seq(d.iter())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_float4() {
        assert_eq!(std::mem::size_of::<Keypoint>(), 16);
        assert_eq!(std::mem::align_of::<Keypoint>(), 4);
    }

    #[test]
    fn test_sentinel_is_invalid() {
        assert!(!Keypoint::INVALID.is_valid());
        assert!(!Keypoint::default().is_valid());
        assert!(Keypoint::new(0.0, 3.0, 1.6, 0.0).is_valid());
    }

    #[test]
    fn test_memset_pattern_matches_sentinel() {
        // A buffer filled with -1.0 floats decodes to INVALID keypoints.
        let floats = vec![SENTINEL; 8];
        let kps: &[Keypoint] = bytemuck::cast_slice(&floats);
        assert_eq!(kps, &[Keypoint::INVALID, Keypoint::INVALID]);
    }

    #[test]
    fn test_feature_from_parts() {
        let kp = Keypoint::new(10.0, 20.0, 3.2, 0.5);
        let desc: Vec<u8> = (0..128).map(|i| i as u8).collect();
        let f = SiftFeature::from_parts(&kp, 2, &desc);
        assert_eq!(f.octave, 2);
        assert_eq!(f.descriptor[127], 127);
        assert_eq!(f.scale, 3.2);
    }
}
