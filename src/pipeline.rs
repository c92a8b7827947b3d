// pipeline.rs — Octave driver.
//
// STATE MACHINE
// ─────────────
//
//   BuildPyramid(o) ──► Scale(o, 1) ──► … ──► Scale(o, S) ──► Harvest(o)
//         ▲                                                     │
//         │                                  more octaves?  ────┤
//         └──────────── Downsample(o) ◄──── yes                 │ no
//                                                               ▼
//                                                             Done
//
//   BuildPyramid  host Gaussian/DoG stacks for octave o; DoGs uploaded
//   Scale         extrema → compact → orientation/descriptor for one DoG
//                 level; `last_start` carries the dense count forward
//   Harvest       read back [0, last_start) keypoints and descriptors,
//                 reset keypoint buffers and Counter
//   Downsample    next seed = Gaussian level S subsampled 2×
//
// Octaves stop at `max_octaves` or when the next octave would be smaller
// than `min_octave_size` on either side. Any stage error aborts the run.
//
// Every launch is waited on before the next one is issued, so the single
// control thread always sees a settled Counter.

use std::time::Instant;

use log::{debug, info};
use serde::Serialize;

use crate::buffers::{BufferLayout, DeviceBuffers};
use crate::compact::compact;
use crate::config::SiftParams;
use crate::describe::orient_and_describe;
use crate::error::{ConfigError, Result};
use crate::extrema::detect_and_refine;
use crate::gpu::{GpuDevice, WgpuBackend};
use crate::host::HostDevice;
use crate::image::Image;
use crate::kernel::ComputeBackend;
use crate::keypoint::{Keypoint, SiftFeature, DESCRIPTOR_LEN};
use crate::scalespace::{build_octave, next_seed, seed_image, Octave};

// ---------------------------------------------------------------------------
// Cursor and state
// ---------------------------------------------------------------------------

/// Dimensions of the octave being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OctaveGeometry {
    pub octave: usize,
    pub width: usize,
    pub height: usize,
    /// Input pixels per octave pixel, `2^octave`.
    pub octsize: usize,
}

impl OctaveGeometry {
    pub fn new(octave: usize, width: usize, height: usize) -> Self {
        OctaveGeometry { octave, width, height, octsize: 1 << octave }
    }
}

/// Position of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BuildPyramid { octave: usize },
    Scale { octave: usize, scale: usize },
    Harvest { octave: usize },
    Downsample { octave: usize },
    Done,
}

/// Transition out of `Harvest(octave)` for an octave of `width × height`.
pub fn after_harvest(params: &SiftParams, octave: usize, width: usize, height: usize) -> Stage {
    let (nw, nh) = (width / 2, height / 2);
    if octave + 1 >= params.max_octaves || nw.min(nh) < params.min_octave_size {
        Stage::Done
    } else {
        Stage::Downsample { octave }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Per-octave counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OctaveStats {
    pub octave: usize,
    pub width: usize,
    pub height: usize,
    /// Extrema found by `local_maxmin`, summed over scales.
    pub candidates: usize,
    /// Keypoints surviving refinement and compaction.
    pub refined: usize,
    /// Keypoints after orientation assignment (and harvested).
    pub keypoints: usize,
    /// Compactions that reported overflow risk.
    pub overflow_warnings: usize,
}

/// Wall-clock seconds spent per stage, summed over the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub pyramid: f64,
    pub extrema: f64,
    pub compact: f64,
    pub describe: f64,
    pub harvest: f64,
    pub total: f64,
}

/// Result of one `Pipeline::run`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SiftOutput {
    pub features: Vec<SiftFeature>,
    pub octaves: Vec<OctaveStats>,
    pub timing: StageTimings,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Owns a device, the buffer set allocated on it, and the parameters.
///
/// The device's kernel module must be built for the same
/// `scales_per_octave` as `params`.
pub struct Pipeline<B: ComputeBackend> {
    backend: B,
    params: SiftParams,
    buffers: Option<DeviceBuffers>,
}

impl Pipeline<HostDevice> {
    /// Pipeline on the CPU reference device.
    pub fn host(params: SiftParams) -> Result<Self> {
        let backend = HostDevice::new(params.scales_per_octave);
        Pipeline::new(backend, params)
    }
}

impl Pipeline<WgpuBackend> {
    /// Pipeline on the first usable Vulkan adapter, kernels compiled up front.
    pub fn gpu(params: SiftParams) -> Result<Self> {
        params.validate()?;
        let mut backend = WgpuBackend::new(GpuDevice::new()?, params.scales_per_octave);
        backend.prepare()?;
        Pipeline::new(backend, params)
    }
}

/// Mutable state threaded through one run.
struct RunState {
    seed: Option<Image<f32>>,
    octave: Option<Octave>,
    geom: OctaveGeometry,
    last_start: usize,
    stats: OctaveStats,
    output: SiftOutput,
}

impl<B: ComputeBackend> Pipeline<B> {
    pub fn new(backend: B, params: SiftParams) -> Result<Self> {
        params.validate()?;
        Ok(Pipeline { backend, params, buffers: None })
    }

    pub fn params(&self) -> &SiftParams {
        &self.params
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Extract SIFT features from an 8-bit grayscale image.
    pub fn run(&mut self, image: &Image<u8>) -> Result<SiftOutput> {
        let (w, h) = (image.width(), image.height());
        if w.min(h) < self.params.min_octave_size {
            return Err(ConfigError::ImageTooSmall {
                width: w,
                height: h,
                min: self.params.min_octave_size,
            }
            .into());
        }
        let t_total = Instant::now();
        self.ensure_buffers(w, h)?;
        if let Some(buffers) = &self.buffers {
            buffers.reset_octave(&mut self.backend)?;
        }

        let mut run = RunState {
            seed: Some(seed_image(image, &self.params)),
            octave: None,
            geom: OctaveGeometry::new(0, w, h),
            last_start: 0,
            stats: OctaveStats::default(),
            output: SiftOutput::default(),
        };
        let mut stage = Stage::BuildPyramid { octave: 0 };
        while stage != Stage::Done {
            stage = self.step(stage, &mut run)?;
        }

        run.output.timing.total = t_total.elapsed().as_secs_f64();
        info!(
            "{} features over {} octaves in {:.1} ms",
            run.output.features.len(),
            run.output.octaves.len(),
            run.output.timing.total * 1e3
        );
        Ok(run.output)
    }

    fn ensure_buffers(&mut self, width: usize, height: usize) -> Result<()> {
        let layout = BufferLayout::new(&self.params, width, height);
        if self.buffers.as_ref().map(|b| b.layout) != Some(layout) {
            if let Some(old) = self.buffers.take() {
                old.release(&mut self.backend)?;
            }
            debug!(
                "allocating device buffers for {width}×{height}, keypoint capacity {}",
                layout.capacity
            );
            self.buffers = Some(DeviceBuffers::allocate(&mut self.backend, layout)?);
        }
        Ok(())
    }

    /// Execute one state and return the next.
    fn step(&mut self, stage: Stage, run: &mut RunState) -> Result<Stage> {
        let Pipeline { backend, params, buffers } = self;
        let buffers = match buffers.as_mut() {
            Some(b) => b,
            None => return Ok(Stage::Done),
        };

        match stage {
            Stage::BuildPyramid { octave } => {
                let t0 = Instant::now();
                let seed = match run.seed.take() {
                    Some(s) => s,
                    None => return Ok(Stage::Done),
                };
                let oct = build_octave(octave, seed, params);
                run.geom = OctaveGeometry::new(octave, oct.width(), oct.height());
                backend.write(buffers.dogs, 0, &oct.dog_stack())?;
                run.octave = Some(oct);
                run.last_start = 0;
                run.stats = OctaveStats {
                    octave,
                    width: run.geom.width,
                    height: run.geom.height,
                    ..Default::default()
                };
                run.output.timing.pyramid += t0.elapsed().as_secs_f64();
                Ok(Stage::Scale { octave, scale: 1 })
            }

            Stage::Scale { octave, scale } => {
                let geom = run.geom;
                let last_start = run.last_start;

                let t0 = Instant::now();
                let det = detect_and_refine(backend, buffers, params, &geom, scale, last_start)?;
                run.stats.candidates += det.candidates();
                let t1 = Instant::now();
                run.output.timing.extrema += (t1 - t0).as_secs_f64();

                let comp = compact(backend, buffers, last_start)?;
                run.stats.refined += comp.count - last_start;
                run.stats.overflow_warnings += comp.overflow_risk as usize;
                let t2 = Instant::now();
                run.output.timing.compact += (t2 - t1).as_secs_f64();

                if let Some(oct) = &run.octave {
                    backend.write(buffers.gray, 0, oct.gaussians[scale].as_slice())?;
                }
                run.last_start = orient_and_describe(backend, buffers, params, &geom, last_start, comp.count)?;
                run.output.timing.describe += t2.elapsed().as_secs_f64();

                debug!(
                    "octave {octave} scale {scale}: {} candidates, {} kept, running total {}",
                    det.candidates(),
                    comp.count - last_start,
                    run.last_start
                );
                if scale < params.scales_per_octave {
                    Ok(Stage::Scale { octave, scale: scale + 1 })
                } else {
                    Ok(Stage::Harvest { octave })
                }
            }

            Stage::Harvest { octave } => {
                let t0 = Instant::now();
                let n = run.last_start;
                if n > 0 {
                    let kps: Vec<Keypoint> = backend.read(buffers.current(), 0, n)?;
                    let desc: Vec<u8> = backend.read(buffers.descriptors, 0, n * DESCRIPTOR_LEN)?;
                    run.output.features.extend(
                        kps.iter()
                            .zip(desc.chunks_exact(DESCRIPTOR_LEN))
                            .filter(|(kp, _)| kp.is_valid())
                            .map(|(kp, d)| SiftFeature::from_parts(kp, octave, d)),
                    );
                }
                buffers.reset_octave(backend)?;
                run.last_start = 0;
                run.stats.keypoints = n;
                info!(
                    "octave {octave} ({}×{}): {} candidates, {} refined, {} keypoints",
                    run.stats.width, run.stats.height, run.stats.candidates, run.stats.refined, n
                );
                run.output.octaves.push(std::mem::take(&mut run.stats));
                run.output.timing.harvest += t0.elapsed().as_secs_f64();
                Ok(after_harvest(params, octave, run.geom.width, run.geom.height))
            }

            Stage::Downsample { octave } => {
                let t0 = Instant::now();
                run.seed = run.octave.take().map(|oct| next_seed(&oct, params));
                run.output.timing.pyramid += t0.elapsed().as_secs_f64();
                Ok(Stage::BuildPyramid { octave: octave + 1 })
            }

            Stage::Done => Ok(Stage::Done),
        }
    }
}
