// sift-pipeline: GPU-resident SIFT keypoint extraction
//
// Control layer of a SIFT detector/descriptor whose heavy per-pixel and
// per-keypoint work runs as device kernels. The host builds the Gaussian and
// DoG stacks, drives the octave/scale state machine, keeps the keypoint
// buffers dense with stream compaction, and reads back features per octave.
//
// Two devices implement `kernel::ComputeBackend`:
//   host::HostDevice   CPU reference kernels (rayon), always available
//   gpu::WgpuBackend   WGSL compute shaders on a Vulkan adapter
//
// Reference: Lowe, "Distinctive Image Features from Scale-Invariant
// Keypoints" (IJCV 2004)

pub mod error;
pub mod config;
pub mod image;
pub mod convolution;
pub mod keypoint;
pub mod kernel;
pub mod buffers;
pub mod scalespace;
pub mod extrema;
pub mod compact;
pub mod describe;
pub mod pipeline;
pub mod host;
pub mod gpu;

pub use config::SiftParams;
pub use error::{ConfigError, PipelineError, Result};
pub use image::Image;
pub use kernel::{Args, BufferHandle, BufferKind, ComputeBackend, KernelCall, KernelId, NdRange};
pub use keypoint::{Keypoint, SiftFeature, DESCRIPTOR_LEN};
pub use pipeline::{Pipeline, SiftOutput};
