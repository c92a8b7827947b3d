// extrema.rs — Extrema detection and sub-pixel refinement for one scale.
//
//   counter ← last_start
//   local_maxmin     2D over the octave, appends candidates at the Counter
//   global_cnt ← counter
//   interp_keypoint  over [last_start, global_cnt), rejects become sentinels
//
// Candidates found after the keypoint buffer is full are dropped by the
// kernel's bounded claim; the stage only reports it.

use log::{debug, warn};

use crate::buffers::DeviceBuffers;
use crate::config::SiftParams;
use crate::error::Result;
use crate::kernel::{run_kernel, Args, ComputeBackend, KernelId, NdRange};
use crate::pipeline::OctaveGeometry;

/// Counter values around one detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub last_start: usize,
    /// Counter after `local_maxmin`: exclusive end of the candidate range.
    pub global_cnt: usize,
}

impl Detection {
    pub fn candidates(&self) -> usize {
        self.global_cnt - self.last_start
    }
}

/// Detect extrema at DoG `scale` and refine them in place.
pub fn detect_and_refine<B: ComputeBackend>(
    backend: &mut B,
    buffers: &DeviceBuffers,
    params: &SiftParams,
    geom: &OctaveGeometry,
    scale: usize,
    last_start: usize,
) -> Result<Detection> {
    let wg = backend.workgroup_size();
    buffers.write_counter(backend, last_start)?;

    run_kernel(
        backend,
        KernelId::LocalMaxMin,
        Args::new()
            .buffer(buffers.dogs)
            .buffer(buffers.current())
            .count(params.border_dist)
            .float(params.peak_thresh)
            .count(geom.octsize)
            .float(params.edge_thresh0)
            .float(params.edge_thresh)
            .buffer(buffers.counter)
            .count(buffers.capacity())
            .count(scale)
            .count(geom.width)
            .count(geom.height),
        NdRange::grid(geom.width, geom.height, wg),
    )?;

    let global_cnt = buffers.read_counter(backend)?.max(last_start);
    if global_cnt == buffers.capacity() && global_cnt > last_start {
        warn!(
            "octave {} scale {scale}: keypoint buffer full ({}), further candidates dropped",
            geom.octave,
            buffers.capacity()
        );
    }
    debug!(
        "octave {} scale {scale}: {} candidates in [{last_start}, {global_cnt})",
        geom.octave,
        global_cnt - last_start
    );

    if global_cnt > last_start {
        run_kernel(
            backend,
            KernelId::InterpKeypoint,
            Args::new()
                .buffer(buffers.dogs)
                .buffer(buffers.current())
                .count(last_start)
                .count(global_cnt)
                .float(params.peak_thresh)
                .float(params.init_sigma)
                .count(geom.width)
                .count(geom.height),
            NdRange::linear(global_cnt - last_start, wg.total() as usize),
        )?;
    }

    Ok(Detection { last_start, global_cnt })
}
