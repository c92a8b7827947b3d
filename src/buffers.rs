// buffers.rs — Device buffer set of the keypoint pipeline.
//
// All allocations are made once, sized for octave 0, and reused by every
// later (smaller) octave:
//
//   dogs         f32 × dog_levels × W0 × H0     DoG stack of the current octave
//   keypoints    Keypoint × capacity, twice      ping-pong pair
//   counter      i32 × 1                         running keypoint count
//   gray         f32 × W0 × H0                   Gaussian level of the current scale
//   grad, ori    f32 × W0 × H0                   gradient magnitude / angle
//   descriptors  u8 × capacity × 128
//
// Exactly one keypoint buffer is "current". Compaction writes into the
// spare, then `swap` makes it current and the old one is sentinel-filled.

use log::{debug, warn};

use crate::config::SiftParams;
use crate::error::Result;
use crate::kernel::{run_kernel, Args, BufferHandle, BufferKind, ComputeBackend, KernelId, NdRange};
use crate::keypoint::{DESCRIPTOR_LEN, SENTINEL};

/// Allocation lengths, fixed from the parameters and the first octave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub width: usize,
    pub height: usize,
    pub dog_levels: usize,
    pub capacity: usize,
}

impl BufferLayout {
    pub fn new(params: &SiftParams, width: usize, height: usize) -> Self {
        BufferLayout {
            width,
            height,
            dog_levels: params.dog_levels(),
            capacity: params.keypoint_capacity(width, height),
        }
    }

    pub fn image_len(&self) -> usize {
        self.width * self.height
    }

    pub fn dog_len(&self) -> usize {
        self.dog_levels * self.image_len()
    }

    pub fn descriptor_len(&self) -> usize {
        self.capacity * DESCRIPTOR_LEN
    }
}

/// Handles of every device allocation the pipeline uses.
#[derive(Debug)]
pub struct DeviceBuffers {
    pub layout: BufferLayout,
    pub dogs: BufferHandle,
    pub counter: BufferHandle,
    pub gray: BufferHandle,
    pub grad: BufferHandle,
    pub ori: BufferHandle,
    pub descriptors: BufferHandle,
    keypoints: [BufferHandle; 2],
    current: usize,
}

impl DeviceBuffers {
    /// Allocate every buffer and bring the keypoint pair and Counter to
    /// their initial state.
    pub fn allocate<B: ComputeBackend>(backend: &mut B, layout: BufferLayout) -> Result<Self> {
        let image = layout.image_len();
        let buffers = DeviceBuffers {
            layout,
            dogs: backend.allocate(BufferKind::Float, layout.dog_len(), "dogs")?,
            counter: backend.allocate(BufferKind::Int, 1, "counter")?,
            gray: backend.allocate(BufferKind::Float, image, "gray")?,
            grad: backend.allocate(BufferKind::Float, image, "grad")?,
            ori: backend.allocate(BufferKind::Float, image, "ori")?,
            descriptors: backend.allocate(BufferKind::Byte, layout.descriptor_len(), "descriptors")?,
            keypoints: [
                backend.allocate(BufferKind::Keypoint, layout.capacity, "keypoints_a")?,
                backend.allocate(BufferKind::Keypoint, layout.capacity, "keypoints_b")?,
            ],
            current: 0,
        };
        buffers.reset_octave(backend)?;
        Ok(buffers)
    }

    /// Free every allocation of the set on `backend`.
    pub fn release<B: ComputeBackend>(self, backend: &mut B) -> Result<()> {
        for handle in self.handles() {
            backend.release(handle)?;
        }
        debug!("released device buffers for {}×{}", self.layout.width, self.layout.height);
        Ok(())
    }

    /// Every handle of the set.
    pub fn handles(&self) -> [BufferHandle; 8] {
        [
            self.dogs,
            self.counter,
            self.gray,
            self.grad,
            self.ori,
            self.descriptors,
            self.keypoints[0],
            self.keypoints[1],
        ]
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    /// The live keypoint buffer.
    pub fn current(&self) -> BufferHandle {
        self.keypoints[self.current]
    }

    /// The keypoint buffer compaction writes into.
    pub fn spare(&self) -> BufferHandle {
        self.keypoints[1 - self.current]
    }

    /// Make the spare buffer current.
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Sentinel-fill one keypoint buffer over its full capacity.
    pub fn reset_keypoints<B: ComputeBackend>(&self, backend: &mut B, handle: BufferHandle) -> Result<()> {
        reset(backend, handle, 4 * self.layout.capacity, SENTINEL)
    }

    /// Octave-boundary reset: both keypoint buffers to sentinel, Counter to 0.
    pub fn reset_octave<B: ComputeBackend>(&self, backend: &mut B) -> Result<()> {
        for handle in self.keypoints {
            self.reset_keypoints(backend, handle)?;
        }
        self.write_counter(backend, 0)
    }

    /// Read the Counter, clamped to `[0, capacity]`.
    pub fn read_counter<B: ComputeBackend>(&self, backend: &mut B) -> Result<usize> {
        let raw = read_scalar(backend, self.counter)?;
        let capacity = self.layout.capacity;
        if raw < 0 {
            warn!("counter read back negative ({raw}), treating as 0");
            return Ok(0);
        }
        let value = raw as usize;
        if value > capacity {
            warn!("counter {value} exceeds keypoint capacity {capacity}, clamping");
            return Ok(capacity);
        }
        Ok(value)
    }

    pub fn write_counter<B: ComputeBackend>(&self, backend: &mut B, value: usize) -> Result<()> {
        write_scalar(backend, self.counter, value as i32)
    }
}

/// Fill the first `words` 32-bit elements of `handle` with `fill` on the
/// device and wait for completion.
pub fn reset<B: ComputeBackend>(backend: &mut B, handle: BufferHandle, words: usize, fill: f32) -> Result<()> {
    let wg = backend.workgroup_size().total() as usize;
    run_kernel(
        backend,
        KernelId::MemsetBuffer,
        Args::new().buffer(handle).float(fill).count(words),
        NdRange::linear(words, wg),
    )
}

/// Read a single-element `i32` buffer.
pub fn read_scalar<B: ComputeBackend>(backend: &mut B, handle: BufferHandle) -> Result<i32> {
    let v = backend.read::<i32>(handle, 0, 1)?;
    Ok(v[0])
}

/// Write a single-element `i32` buffer.
pub fn write_scalar<B: ComputeBackend>(backend: &mut B, handle: BufferHandle, value: i32) -> Result<()> {
    backend.write(handle, 0, &[value])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostDevice;
    use crate::keypoint::Keypoint;

    fn small_layout() -> BufferLayout {
        BufferLayout::new(&SiftParams::default(), 32, 32)
    }

    #[test]
    fn test_layout_sizes() {
        let l = small_layout();
        assert_eq!(l.capacity, 32 * 32 / 10);
        assert_eq!(l.dog_len(), 5 * 32 * 32);
        assert_eq!(l.descriptor_len(), l.capacity * 128);
    }

    #[test]
    fn test_allocate_starts_clean() {
        let mut dev = HostDevice::new(3);
        let bufs = DeviceBuffers::allocate(&mut dev, small_layout()).unwrap();
        assert_eq!(bufs.read_counter(&mut dev).unwrap(), 0);
        for h in [bufs.current(), bufs.spare()] {
            let kps: Vec<Keypoint> = dev.read(h, 0, bufs.capacity()).unwrap();
            assert!(kps.iter().all(|k| *k == Keypoint::INVALID));
        }
    }

    #[test]
    fn test_swap_flips_current_and_spare() {
        let mut dev = HostDevice::new(3);
        let mut bufs = DeviceBuffers::allocate(&mut dev, small_layout()).unwrap();
        let (a, b) = (bufs.current(), bufs.spare());
        assert_ne!(a, b);
        bufs.swap();
        assert_eq!(bufs.current(), b);
        assert_eq!(bufs.spare(), a);
    }

    #[test]
    fn test_release_frees_every_handle() {
        let mut dev = HostDevice::new(3);
        let bufs = DeviceBuffers::allocate(&mut dev, small_layout()).unwrap();
        assert_eq!(dev.memory().live_buffers(), 8);
        let counter = bufs.counter;
        bufs.release(&mut dev).unwrap();
        assert_eq!(dev.memory().live_buffers(), 0);
        assert!(read_scalar(&mut dev, counter).is_err());
    }

    #[test]
    fn test_counter_clamped_to_capacity() {
        let mut dev = HostDevice::new(3);
        let bufs = DeviceBuffers::allocate(&mut dev, small_layout()).unwrap();
        write_scalar(&mut dev, bufs.counter, 10_000).unwrap();
        assert_eq!(bufs.read_counter(&mut dev).unwrap(), bufs.capacity());
        write_scalar(&mut dev, bufs.counter, -3).unwrap();
        assert_eq!(bufs.read_counter(&mut dev).unwrap(), 0);
    }
}
