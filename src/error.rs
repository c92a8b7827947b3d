// error.rs — Error taxonomy for the keypoint pipeline.
//
// Three families of failure, all fatal to a run:
//
//   Configuration   bad parameters, unknown kernel, argument arity/kind
//                   mismatch. Raised before any device work is issued.
//   Buffer misuse   stale handle, element-type mismatch, out-of-range
//                   access, one buffer bound twice in a single launch.
//   Device          a launch, wait or transfer reported failure.
//
// Capacity pressure and refinement rejection are NOT errors: the first is a
// `log::warn!`, the second a sentinel keypoint consumed by compaction.

use thiserror::Error;

use crate::gpu::device::GpuError;
use crate::kernel::{KernelId, ParamKind};

/// Invalid `SiftParams` values, detected by `SiftParams::validate`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("scales_per_octave must be at least 1 (got {0})")]
    NoScales(usize),

    #[error("{name} must be positive and finite (got {value})")]
    NotPositive { name: &'static str, value: f32 },

    #[error("pixels_per_keypoint must be at least 1 (got {0})")]
    PixelsPerKeypoint(usize),

    #[error("max_octaves must be at least 1 (got {0})")]
    NoOctaves(usize),

    #[error("min_octave_size ({min}) must exceed twice the border distance ({border})")]
    OctaveTooSmall { min: usize, border: usize },

    #[error("image {width}×{height} is smaller than min_octave_size {min}")]
    ImageTooSmall { width: usize, height: usize, min: usize },

    #[error("failed to read config {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Every fallible pipeline operation returns this error.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("kernel `{0}` is not provided by the device")]
    UnknownKernel(&'static str),

    #[error("kernel `{kernel}` takes {expected} arguments, {supplied} supplied")]
    ArgumentCount {
        kernel: &'static str,
        expected: usize,
        supplied: usize,
    },

    #[error("kernel `{kernel}` argument {index}: expected {expected}, supplied {supplied}")]
    ArgumentKind {
        kernel: &'static str,
        index: usize,
        expected: ParamKind,
        supplied: ParamKind,
    },

    #[error("buffer handle {0} does not name a live allocation")]
    InvalidBuffer(u32),

    #[error("buffer {handle} holds {actual}-byte elements, access used {requested}-byte elements")]
    BufferKind {
        handle: u32,
        actual: usize,
        requested: usize,
    },

    #[error("buffer {handle}: range {offset}..{end} exceeds length {len}")]
    BufferRange {
        handle: u32,
        offset: usize,
        end: usize,
        len: usize,
    },

    #[error("buffer {handle} bound more than once in one launch of `{kernel}`")]
    BufferAliased { handle: u32, kernel: &'static str },

    #[error("launch of `{kernel}` failed: {message}")]
    Launch { kernel: KernelId, message: String },

    #[error("wait on completion token {token} failed: {message}")]
    Wait { token: u64, message: String },

    #[error("host/device transfer failed: {0}")]
    Transfer(String),

    #[error(transparent)]
    Device(#[from] GpuError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
