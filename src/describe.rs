// describe.rs — Orientation assignment and descriptors for one scale.
//
//   compute_gradient_orientation   whole image, every scale
//   counter ← newcnt
//   orientation_assignment         over [last_start, newcnt); extra dominant
//                                  orientations are appended at the Counter
//   total ← counter
//   descriptor                     over [last_start, total)
//
// `total` becomes `last_start` for the next scale of the octave.

use log::debug;

use crate::buffers::DeviceBuffers;
use crate::config::SiftParams;
use crate::error::Result;
use crate::kernel::{run_kernel, Args, ComputeBackend, KernelId, NdRange};
use crate::pipeline::OctaveGeometry;

/// Orient and describe the keypoints in `[last_start, newcnt)`.
///
/// The gray image of the scale must already be in `buffers.gray`. Returns
/// the recounted end of the range.
pub fn orient_and_describe<B: ComputeBackend>(
    backend: &mut B,
    buffers: &DeviceBuffers,
    params: &SiftParams,
    geom: &OctaveGeometry,
    last_start: usize,
    newcnt: usize,
) -> Result<usize> {
    let wg = backend.workgroup_size();
    run_kernel(
        backend,
        KernelId::ComputeGradientOrientation,
        Args::new()
            .buffer(buffers.gray)
            .buffer(buffers.grad)
            .buffer(buffers.ori)
            .count(geom.width)
            .count(geom.height),
        NdRange::grid(geom.width, geom.height, wg),
    )?;

    if newcnt <= last_start {
        return Ok(last_start);
    }

    let linear = wg.total() as usize;
    buffers.write_counter(backend, newcnt)?;
    run_kernel(
        backend,
        KernelId::OrientationAssignment,
        Args::new()
            .buffer(buffers.current())
            .buffer(buffers.grad)
            .buffer(buffers.ori)
            .buffer(buffers.counter)
            .count(geom.octsize)
            .float(params.ori_sigma)
            .count(buffers.capacity())
            .count(last_start)
            .count(newcnt)
            .count(geom.width)
            .count(geom.height),
        NdRange::linear(newcnt - last_start, linear),
    )?;

    let total = buffers.read_counter(backend)?.max(newcnt);
    debug!(
        "octave {}: orientation [{last_start}, {newcnt}) → {} keypoints",
        geom.octave,
        total - last_start
    );

    run_kernel(
        backend,
        KernelId::Descriptor,
        Args::new()
            .buffer(buffers.current())
            .buffer(buffers.descriptors)
            .buffer(buffers.grad)
            .buffer(buffers.ori)
            .count(geom.octsize)
            .count(last_start)
            .count(total)
            .count(geom.width)
            .count(geom.height),
        NdRange::linear(total - last_start, linear),
    )?;

    Ok(total)
}
