// compact.rs — Stream compaction of the live keypoint buffer.
//
// After refinement the range [start, kp_counter) of the current buffer is
// sparse: rejected keypoints are sentinel slots. Compaction moves the valid
// ones into the spare buffer, densely after the untouched prefix
// [0, start), then swaps the pair and sentinel-fills the old buffer.
//
// The Counter is read (kp_counter) BEFORE it is overwritten with `start`;
// the compact kernel then uses it as its output cursor. Swapping that
// order would lose the scan end.

use log::{debug, warn};

use crate::buffers::DeviceBuffers;
use crate::error::Result;
use crate::kernel::{run_kernel, Args, ComputeBackend, KernelId, NdRange};

/// Occupancy above which the buffer is considered close to overflowing.
pub const OVERFLOW_RATIO: f64 = 0.9;

/// What one compaction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compaction {
    /// First slot of the sparse range.
    pub start: usize,
    /// Counter value before compaction (exclusive end of the scan).
    pub scanned_end: usize,
    /// Dense keypoint count after compaction.
    pub count: usize,
    pub overflow_risk: bool,
}

impl Compaction {
    /// Slots dropped as sentinels.
    pub fn removed(&self) -> usize {
        self.scanned_end - self.count
    }
}

/// True when `kp_counter` exceeds 90 % of `capacity`.
pub fn overflow_risk(kp_counter: usize, capacity: usize) -> bool {
    kp_counter as f64 > OVERFLOW_RATIO * capacity as f64
}

/// Compact `[start, counter)` of the current keypoint buffer.
///
/// When nothing was appended since `start` no kernel is launched and no
/// buffer changes.
pub fn compact<B: ComputeBackend>(
    backend: &mut B,
    buffers: &mut DeviceBuffers,
    start: usize,
) -> Result<Compaction> {
    let capacity = buffers.capacity();
    let kp_counter = buffers.read_counter(backend)?;
    let risk = overflow_risk(kp_counter, capacity);
    if risk {
        warn!(
            "keypoint buffer at {kp_counter}/{capacity} (over 90%), candidates may be dropped; lower pixels_per_keypoint"
        );
    }

    if kp_counter <= start {
        return Ok(Compaction {
            start,
            scanned_end: kp_counter.max(start),
            count: start,
            overflow_risk: risk,
        });
    }

    buffers.write_counter(backend, start)?;
    let wg = backend.workgroup_size().total() as usize;
    run_kernel(
        backend,
        KernelId::Compact,
        Args::new()
            .buffer(buffers.current())
            .buffer(buffers.spare())
            .buffer(buffers.counter)
            .count(start)
            .count(kp_counter),
        NdRange::linear(kp_counter, wg),
    )?;
    let count = buffers.read_counter(backend)?;

    buffers.swap();
    buffers.reset_keypoints(backend, buffers.spare())?;

    debug!("compact: [{start}, {kp_counter}) → {count} dense");
    Ok(Compaction {
        start,
        scanned_end: kp_counter,
        count,
        overflow_risk: risk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_threshold() {
        assert!(overflow_risk(95, 100));
        assert!(!overflow_risk(80, 100));
        assert!(!overflow_risk(90, 100));
        assert!(overflow_risk(91, 100));
    }

    #[test]
    fn test_removed_count() {
        let c = Compaction { start: 2, scanned_end: 10, count: 6, overflow_risk: false };
        assert_eq!(c.removed(), 4);
    }
}
