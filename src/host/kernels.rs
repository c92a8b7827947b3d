// host/kernels.rs — Reference implementations of the seven device kernels.
//
// Each function has the `HostKernel` shape and reads its arguments
// positionally, exactly as the matching WGSL entry point does. Work-item
// bounds follow the device convention: a kernel processes
// `min(global size, its own count parameter)` items.
//
// Per-pixel and per-keypoint math runs on rayon; anything that claims slots
// from the Counter runs sequentially afterwards so results are
// deterministic (row-major for detection, slot order for orientation).

use std::f32::consts::{PI, SQRT_2};

use rayon::prelude::*;

use super::{HostBuffer, KernelContext};
use crate::error::{PipelineError, Result};
use crate::kernel::{BufferHandle, KernelCall, KernelId, NdRange};
use crate::keypoint::{Keypoint, DESCRIPTOR_LEN};

/// Newton steps tried by `interp_keypoint` before giving up.
pub const MAX_INTERP_STEPS: usize = 5;
/// Candidates must exceed this fraction of `peak_thresh` before refinement.
pub const PRE_PEAK_RATIO: f32 = 0.8;
/// Orientation histogram bins over the full circle.
pub const ORI_BINS: usize = 36;
/// Secondary orientation peaks must reach this fraction of the maximum.
pub const ORI_PEAK_RATIO: f32 = 0.8;
/// Descriptor spatial grid is `DESC_WIDTH × DESC_WIDTH` cells.
pub const DESC_WIDTH: usize = 4;
/// Orientation bins per descriptor cell.
pub const DESC_BINS: usize = 8;
/// Cell width in units of keypoint sigma.
pub const DESC_CELL_FACTOR: f32 = 3.0;
/// Normalised descriptor entries are clipped at this value.
pub const DESC_CLIP: f32 = 0.2;

fn items(range: NdRange) -> usize {
    range.global[0] * range.global[1]
}

fn arg_usize(call: &KernelCall, index: usize) -> Result<usize> {
    Ok(call.int_at(index)?.max(0) as usize)
}

fn require_len(buf: &HostBuffer, handle: BufferHandle, needed: usize) -> Result<()> {
    if needed > buf.len() {
        return Err(PipelineError::BufferRange {
            handle: handle.id(),
            offset: 0,
            end: needed,
            len: buf.len(),
        });
    }
    Ok(())
}

/// Claim the next keypoint slot below `capacity`, the way the device's
/// `atomicAdd` with rollback does. `None` once the buffer is full.
#[inline]
pub fn bounded_claim(counter: &mut i32, capacity: usize) -> Option<usize> {
    let slot = *counter;
    if slot < 0 || slot as usize >= capacity {
        return None;
    }
    *counter += 1;
    Some(slot as usize)
}

// ---------------------------------------------------------------------------
// memset_buffer(buf, fill_value, element_count)
// ---------------------------------------------------------------------------

pub fn memset_buffer(ctx: &mut KernelContext<'_>, call: &KernelCall, range: NdRange) -> Result<()> {
    let handle = call.buffer_at(0)?;
    let fill = call.float_at(1)?;
    let count = arg_usize(call, 2)?;

    let buf = ctx.memory.get_mut(handle)?;
    let words = buf.words_mut();
    if count > words.len() {
        return Err(PipelineError::BufferRange {
            handle: handle.id(),
            offset: 0,
            end: count,
            len: words.len(),
        });
    }
    let n = count.min(items(range));
    words[..n].fill(fill.to_bits());
    Ok(())
}

// ---------------------------------------------------------------------------
// compact(src, dst, counter, start, end)
// ---------------------------------------------------------------------------

pub fn compact(ctx: &mut KernelContext<'_>, call: &KernelCall, range: NdRange) -> Result<()> {
    let handles = [call.buffer_at(0)?, call.buffer_at(1)?, call.buffer_at(2)?];
    let start = arg_usize(call, 3)?;
    let end = arg_usize(call, 4)?.min(items(range));

    let [src, mut dst, mut counter] = ctx.memory.take_many(handles, KernelId::Compact)?;
    let result = require_len(&src, handles[0], end)
        .and_then(|_| require_len(&dst, handles[1], start.min(end)))
        .map(|_| compact_into(src.keypoints(), dst.keypoints_mut(), &mut counter.i32s_mut()[0], start, end));
    ctx.memory.restore_many(handles, [src, dst, counter]);
    result
}

/// Work item `i < start` copies its slot verbatim; work item
/// `start <= i < end` claims a destination slot if its keypoint is valid.
pub fn compact_into(src: &[Keypoint], dst: &mut [Keypoint], counter: &mut i32, start: usize, end: usize) {
    let capacity = dst.len();
    for (i, kp) in src[..end].iter().enumerate() {
        if i < start {
            dst[i] = *kp;
        } else if kp.is_valid() {
            if let Some(slot) = bounded_claim(counter, capacity) {
                dst[slot] = *kp;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// local_maxmin(DoGs, keypoints, border_dist, peak_thresh, octsize,
//              edge_thresh0, edge_thresh, counter, capacity, scale, width, height)
// ---------------------------------------------------------------------------

pub fn local_maxmin(ctx: &mut KernelContext<'_>, call: &KernelCall, range: NdRange) -> Result<()> {
    let dogs_h = call.buffer_at(0)?;
    let kps_h = call.buffer_at(1)?;
    let border = arg_usize(call, 2)?.max(1);
    let peak_thresh = call.float_at(3)?;
    let octsize = call.int_at(4)?;
    let edge_thresh = if octsize == 1 { call.float_at(5)? } else { call.float_at(6)? };
    let counter_h = call.buffer_at(7)?;
    let capacity = arg_usize(call, 8)?;
    let scale = arg_usize(call, 9)?;
    let width = arg_usize(call, 10)?;
    let height = arg_usize(call, 11)?;

    if scale == 0 {
        return Err(PipelineError::Launch {
            kernel: KernelId::LocalMaxMin,
            message: "scale 0 has no lower DoG neighbour".to_string(),
        });
    }
    let plane = width * height;
    let dogs = ctx.memory.get(dogs_h)?;
    require_len(dogs, dogs_h, (scale + 2) * plane)?;
    let d = dogs.f32s();
    let (prev, cur, next) = (
        &d[(scale - 1) * plane..scale * plane],
        &d[scale * plane..(scale + 1) * plane],
        &d[(scale + 1) * plane..(scale + 2) * plane],
    );

    let x_end = width.saturating_sub(border).min(range.global[0]);
    let y_end = height.saturating_sub(border).min(range.global[1]);
    let candidates: Vec<Keypoint> = (border..y_end.max(border))
        .into_par_iter()
        .flat_map_iter(|y| {
            (border..x_end.max(border)).filter_map(move |x| {
                detect_extremum(prev, cur, next, width, x, y, peak_thresh, edge_thresh)
                    .map(|v| Keypoint::new(x as f32, y as f32, scale as f32, v))
            })
        })
        .collect();

    let [mut kps, mut counter] = ctx.memory.take_many([kps_h, counter_h], KernelId::LocalMaxMin)?;
    let slots = capacity.min(kps.len());
    {
        let kp_slice = kps.keypoints_mut();
        let count = &mut counter.i32s_mut()[0];
        for kp in candidates {
            match bounded_claim(count, slots) {
                Some(slot) => kp_slice[slot] = kp,
                None => break,
            }
        }
    }
    ctx.memory.restore_many([kps_h, counter_h], [kps, counter]);
    Ok(())
}

/// DoG value at `(x, y)` if it is a strict 26-neighbour extremum with
/// enough contrast and a low edge response.
#[allow(clippy::too_many_arguments)]
fn detect_extremum(
    prev: &[f32],
    cur: &[f32],
    next: &[f32],
    width: usize,
    x: usize,
    y: usize,
    peak_thresh: f32,
    edge_thresh: f32,
) -> Option<f32> {
    let at = |p: &[f32], dx: isize, dy: isize| {
        p[(y as isize + dy) as usize * width + (x as isize + dx) as usize]
    };
    let v = cur[y * width + x];
    if v.abs() <= PRE_PEAK_RATIO * peak_thresh {
        return None;
    }

    let (mut is_max, mut is_min) = (true, true);
    for (k, p) in [prev, cur, next].into_iter().enumerate() {
        for dy in -1..=1 {
            for dx in -1..=1 {
                if k == 1 && dx == 0 && dy == 0 {
                    continue;
                }
                let n = at(p, dx, dy);
                is_max &= v > n;
                is_min &= v < n;
            }
        }
        if !is_max && !is_min {
            return None;
        }
    }

    let dxx = at(cur, 1, 0) + at(cur, -1, 0) - 2.0 * v;
    let dyy = at(cur, 0, 1) + at(cur, 0, -1) - 2.0 * v;
    let dxy = (at(cur, 1, 1) - at(cur, -1, 1) - at(cur, 1, -1) + at(cur, -1, -1)) * 0.25;
    let trace = dxx + dyy;
    let det = dxx * dyy - dxy * dxy;
    if det > edge_thresh * trace * trace {
        Some(v)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// interp_keypoint(DoGs, keypoints, start, end, peak_thresh, init_sigma,
//                 width, height)
// ---------------------------------------------------------------------------

pub fn interp_keypoint(ctx: &mut KernelContext<'_>, call: &KernelCall, range: NdRange) -> Result<()> {
    let dogs_h = call.buffer_at(0)?;
    let kps_h = call.buffer_at(1)?;
    let start = arg_usize(call, 2)?;
    let end = arg_usize(call, 3)?.min(start + items(range));
    let peak_thresh = call.float_at(4)?;
    let init_sigma = call.float_at(5)?;
    let width = arg_usize(call, 6)?;
    let height = arg_usize(call, 7)?;
    let scales = ctx.scales_per_octave;

    if start >= end {
        return Ok(());
    }
    let mut kps = ctx.memory.take(kps_h, KernelId::InterpKeypoint)?;
    let result = (|| -> Result<()> {
        let dogs = ctx.memory.get(dogs_h)?;
        require_len(dogs, dogs_h, (scales + 2) * width * height)?;
        require_len(&kps, kps_h, end)?;
        let stack = DogStack { data: dogs.f32s(), width, height, scales };
        kps.keypoints_mut()[start..end].par_iter_mut().for_each(|kp| {
            if kp.is_valid() {
                *kp = stack.refine(kp, peak_thresh, init_sigma).unwrap_or(Keypoint::INVALID);
            }
        });
        Ok(())
    })();
    ctx.memory.restore(kps_h, kps);
    result
}

struct DogStack<'a> {
    data: &'a [f32],
    width: usize,
    height: usize,
    scales: usize,
}

impl DogStack<'_> {
    #[inline]
    fn at(&self, s: i32, y: i32, x: i32) -> f32 {
        self.data[(s as usize * self.height + y as usize) * self.width + x as usize]
    }

    /// Sub-pixel, sub-scale refinement of a detected extremum.
    fn refine(&self, kp: &Keypoint, peak_thresh: f32, init_sigma: f32) -> Option<Keypoint> {
        let (mut x, mut y, mut s) = (kp.x as i32, kp.y as i32, kp.sigma.round() as i32);
        let (w, h) = (self.width as i32, self.height as i32);

        for _ in 0..MAX_INTERP_STEPS {
            let v = self.at(s, y, x);
            let g = [
                (self.at(s, y, x + 1) - self.at(s, y, x - 1)) * 0.5,
                (self.at(s, y + 1, x) - self.at(s, y - 1, x)) * 0.5,
                (self.at(s + 1, y, x) - self.at(s - 1, y, x)) * 0.5,
            ];
            let hxx = self.at(s, y, x + 1) + self.at(s, y, x - 1) - 2.0 * v;
            let hyy = self.at(s, y + 1, x) + self.at(s, y - 1, x) - 2.0 * v;
            let hss = self.at(s + 1, y, x) + self.at(s - 1, y, x) - 2.0 * v;
            let hxy = (self.at(s, y + 1, x + 1) - self.at(s, y + 1, x - 1) - self.at(s, y - 1, x + 1)
                + self.at(s, y - 1, x - 1))
                * 0.25;
            let hxs = (self.at(s + 1, y, x + 1) - self.at(s + 1, y, x - 1) - self.at(s - 1, y, x + 1)
                + self.at(s - 1, y, x - 1))
                * 0.25;
            let hys = (self.at(s + 1, y + 1, x) - self.at(s + 1, y - 1, x) - self.at(s - 1, y + 1, x)
                + self.at(s - 1, y - 1, x))
                * 0.25;

            let off = solve_symmetric3([[hxx, hxy, hxs], [hxy, hyy, hys], [hxs, hys, hss]], g)?;
            let off = [-off[0], -off[1], -off[2]];

            if off.iter().all(|o| o.abs() < 0.5) {
                let contrast = v + 0.5 * (g[0] * off[0] + g[1] * off[1] + g[2] * off[2]);
                if contrast.abs() < peak_thresh {
                    return None;
                }
                let sigma = init_sigma * 2f32.powf((s as f32 + off[2]) / self.scales as f32);
                return Some(Keypoint::new(x as f32 + off[0], y as f32 + off[1], sigma, 0.0));
            }

            x += off[0].round() as i32;
            y += off[1].round() as i32;
            s += off[2].round() as i32;
            if s < 1 || s > self.scales as i32 || x < 1 || x >= w - 1 || y < 1 || y >= h - 1 {
                return None;
            }
        }
        None
    }
}

/// Solve `m · x = b` for a symmetric 3×3 `m` by cofactor expansion.
fn solve_symmetric3(m: [[f32; 3]; 3], b: [f32; 3]) -> Option<[f32; 3]> {
    let [[a, d, e], [_, bb, f], [_, _, c]] = m;
    let det = a * (bb * c - f * f) - d * (d * c - f * e) + e * (d * f - bb * e);
    if det.abs() < 1e-12 || !det.is_finite() {
        return None;
    }
    let inv = [
        [bb * c - f * f, e * f - d * c, d * f - e * bb],
        [e * f - d * c, a * c - e * e, d * e - a * f],
        [d * f - e * bb, d * e - a * f, a * bb - d * d],
    ];
    let mut x = [0.0; 3];
    for (r, row) in inv.iter().enumerate() {
        x[r] = (row[0] * b[0] + row[1] * b[1] + row[2] * b[2]) / det;
    }
    Some(x)
}

// ---------------------------------------------------------------------------
// compute_gradient_orientation(gray, grad, ori, width, height)
// ---------------------------------------------------------------------------

pub fn compute_gradient_orientation(
    ctx: &mut KernelContext<'_>,
    call: &KernelCall,
    _range: NdRange,
) -> Result<()> {
    let gray_h = call.buffer_at(0)?;
    let grad_h = call.buffer_at(1)?;
    let ori_h = call.buffer_at(2)?;
    let width = arg_usize(call, 3)?;
    let height = arg_usize(call, 4)?;
    let n = width * height;
    if n == 0 {
        return Ok(());
    }

    let [mut grad, mut ori] =
        ctx.memory.take_many([grad_h, ori_h], KernelId::ComputeGradientOrientation)?;
    let result = (|| -> Result<()> {
        let gray = ctx.memory.get(gray_h)?;
        require_len(gray, gray_h, n)?;
        require_len(&grad, grad_h, n)?;
        require_len(&ori, ori_h, n)?;
        let g = gray.f32s();
        grad.f32s_mut()[..n]
            .par_chunks_mut(width)
            .zip(ori.f32s_mut()[..n].par_chunks_mut(width))
            .enumerate()
            .for_each(|(y, (mag_row, ori_row))| {
                let ym = y.saturating_sub(1);
                let yp = (y + 1).min(height - 1);
                for x in 0..width {
                    let xm = x.saturating_sub(1);
                    let xp = (x + 1).min(width - 1);
                    let dx = g[y * width + xp] - g[y * width + xm];
                    let dy = g[yp * width + x] - g[ym * width + x];
                    mag_row[x] = (dx * dx + dy * dy).sqrt();
                    ori_row[x] = dy.atan2(dx);
                }
            });
        Ok(())
    })();
    ctx.memory.restore_many([grad_h, ori_h], [grad, ori]);
    result
}

// ---------------------------------------------------------------------------
// orientation_assignment(keypoints, grad, ori, counter, octsize, ori_sigma,
//                        capacity, start, end, width, height)
// ---------------------------------------------------------------------------

pub fn orientation_assignment(ctx: &mut KernelContext<'_>, call: &KernelCall, range: NdRange) -> Result<()> {
    let kps_h = call.buffer_at(0)?;
    let grad_h = call.buffer_at(1)?;
    let ori_h = call.buffer_at(2)?;
    let counter_h = call.buffer_at(3)?;
    let octsize = call.int_at(4)?.max(1) as f32;
    let ori_sigma = call.float_at(5)?;
    let capacity = arg_usize(call, 6)?;
    let start = arg_usize(call, 7)?;
    let end = arg_usize(call, 8)?.min(start + items(range));
    let width = arg_usize(call, 9)?;
    let height = arg_usize(call, 10)?;

    if start >= end {
        return Ok(());
    }
    let [mut kps, mut counter] =
        ctx.memory.take_many([kps_h, counter_h], KernelId::OrientationAssignment)?;
    let result = (|| -> Result<()> {
        let grad = ctx.memory.get(grad_h)?;
        let ori = ctx.memory.get(ori_h)?;
        require_len(grad, grad_h, width * height)?;
        require_len(ori, ori_h, width * height)?;
        require_len(&kps, kps_h, end)?;
        let field = GradientField { mag: grad.f32s(), ori: ori.f32s(), width, height };

        let orientations: Vec<Vec<f32>> = kps.keypoints()[start..end]
            .par_iter()
            .map(|kp| {
                if kp.is_valid() {
                    field.dominant_orientations(kp, ori_sigma)
                } else {
                    Vec::new()
                }
            })
            .collect();

        let slots = capacity.min(kps.len());
        let kp_slice = kps.keypoints_mut();
        let count = &mut counter.i32s_mut()[0];
        for (i, angles) in (start..end).zip(orientations) {
            let kp = kp_slice[i];
            if !kp.is_valid() {
                continue;
            }
            let scaled = Keypoint::new(
                kp.x * octsize,
                kp.y * octsize,
                kp.sigma * octsize,
                angles.first().copied().unwrap_or(0.0),
            );
            kp_slice[i] = scaled;
            for &angle in angles.iter().skip(1) {
                match bounded_claim(count, slots) {
                    Some(slot) => kp_slice[slot] = Keypoint { angle, ..scaled },
                    None => break,
                }
            }
        }
        Ok(())
    })();
    ctx.memory.restore_many([kps_h, counter_h], [kps, counter]);
    result
}

struct GradientField<'a> {
    mag: &'a [f32],
    ori: &'a [f32],
    width: usize,
    height: usize,
}

impl GradientField<'_> {
    /// Peaks of the smoothed 36-bin orientation histogram around an
    /// octave-local keypoint, strongest first.
    fn dominant_orientations(&self, kp: &Keypoint, ori_sigma: f32) -> Vec<f32> {
        let sigma_w = ori_sigma * kp.sigma;
        let radius = (3.0 * sigma_w).round() as i32;
        let exp_scale = -1.0 / (2.0 * sigma_w * sigma_w);
        let (cx, cy) = (kp.x.round() as i32, kp.y.round() as i32);
        let (w, h) = (self.width as i32, self.height as i32);

        let mut raw = [0.0f32; ORI_BINS];
        for dy in -radius..=radius {
            let y = cy + dy;
            if y < 1 || y >= h - 1 {
                continue;
            }
            for dx in -radius..=radius {
                let x = cx + dx;
                if x < 1 || x >= w - 1 {
                    continue;
                }
                let idx = y as usize * self.width + x as usize;
                let weight = ((dx * dx + dy * dy) as f32 * exp_scale).exp();
                raw[orientation_bin(self.ori[idx])] += weight * self.mag[idx];
            }
        }

        let hist = smooth_circular(&raw);
        let max = hist.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return Vec::new();
        }

        let mut peaks: Vec<(f32, f32)> = Vec::new();
        for b in 0..ORI_BINS {
            let l = hist[(b + ORI_BINS - 1) % ORI_BINS];
            let r = hist[(b + 1) % ORI_BINS];
            let c = hist[b];
            if c > l && c > r && c >= ORI_PEAK_RATIO * max {
                let offset = 0.5 * (l - r) / (l - 2.0 * c + r);
                let angle = -PI + (b as f32 + 0.5 + offset) * (2.0 * PI / ORI_BINS as f32);
                peaks.push((c, wrap_angle(angle)));
            }
        }
        peaks.sort_by(|a, b| b.0.total_cmp(&a.0));
        peaks.into_iter().map(|(_, a)| a).collect()
    }
}

/// Histogram bin of an angle in `[-π, π]`.
#[inline]
pub fn orientation_bin(angle: f32) -> usize {
    let b = ((angle + PI) / (2.0 * PI) * ORI_BINS as f32).floor() as i32;
    b.rem_euclid(ORI_BINS as i32) as usize
}

/// Wrap into `(-π, π]`.
#[inline]
pub fn wrap_angle(mut a: f32) -> f32 {
    while a <= -PI {
        a += 2.0 * PI;
    }
    while a > PI {
        a -= 2.0 * PI;
    }
    a
}

/// One circular pass of the [1, 4, 6, 4, 1] / 16 kernel.
fn smooth_circular(raw: &[f32; ORI_BINS]) -> [f32; ORI_BINS] {
    let n = ORI_BINS;
    let mut out = [0.0; ORI_BINS];
    for (i, o) in out.iter_mut().enumerate() {
        let at = |k: usize| raw[(i + n + k - 2) % n];
        *o = (at(0) + at(4)) * (1.0 / 16.0) + (at(1) + at(3)) * (4.0 / 16.0) + at(2) * (6.0 / 16.0);
    }
    out
}

// ---------------------------------------------------------------------------
// descriptor(keypoints, descriptors, grad, ori, octsize, start, end,
//            width, height)
// ---------------------------------------------------------------------------

pub fn descriptor(ctx: &mut KernelContext<'_>, call: &KernelCall, range: NdRange) -> Result<()> {
    let kps_h = call.buffer_at(0)?;
    let desc_h = call.buffer_at(1)?;
    let grad_h = call.buffer_at(2)?;
    let ori_h = call.buffer_at(3)?;
    let octsize = call.int_at(4)?.max(1) as f32;
    let start = arg_usize(call, 5)?;
    let end = arg_usize(call, 6)?.min(start + items(range));
    let width = arg_usize(call, 7)?;
    let height = arg_usize(call, 8)?;

    if start >= end {
        return Ok(());
    }
    let mut desc = ctx.memory.take(desc_h, KernelId::Descriptor)?;
    let result = (|| -> Result<()> {
        let kps = ctx.memory.get(kps_h)?;
        let grad = ctx.memory.get(grad_h)?;
        let ori = ctx.memory.get(ori_h)?;
        require_len(kps, kps_h, end)?;
        require_len(grad, grad_h, width * height)?;
        require_len(ori, ori_h, width * height)?;
        require_len(&desc, desc_h, end * DESCRIPTOR_LEN)?;
        let field = GradientField { mag: grad.f32s(), ori: ori.f32s(), width, height };
        let kp_slice = &kps.keypoints()[start..end];

        desc.bytes_mut()[start * DESCRIPTOR_LEN..end * DESCRIPTOR_LEN]
            .par_chunks_mut(DESCRIPTOR_LEN)
            .zip(kp_slice.par_iter())
            .for_each(|(out, kp)| {
                if kp.is_valid() {
                    let local = Keypoint::new(kp.x / octsize, kp.y / octsize, kp.sigma / octsize, kp.angle);
                    field.describe(&local, out);
                }
            });
        Ok(())
    })();
    ctx.memory.restore(desc_h, desc);
    result
}

impl GradientField<'_> {
    /// 4×4×8 gradient histogram in the keypoint's rotated frame, trilinearly
    /// interpolated, normalised, clipped and quantised to bytes.
    fn describe(&self, kp: &Keypoint, out: &mut [u8]) {
        let cell = DESC_CELL_FACTOR * kp.sigma;
        let half = DESC_WIDTH as f32 / 2.0;
        let radius = ((cell * SQRT_2 * (DESC_WIDTH as f32 + 1.0) * 0.5).round() as i32)
            .min((self.width + self.height) as i32);
        let (sin_t, cos_t) = kp.angle.sin_cos();
        let exp_scale = -1.0 / (2.0 * half * half);
        let bins_per_rad = DESC_BINS as f32 / (2.0 * PI);
        let (cx, cy) = (kp.x.round() as i32, kp.y.round() as i32);
        let (w, h) = (self.width as i32, self.height as i32);

        let mut hist = [0.0f32; DESCRIPTOR_LEN];
        for dy in -radius..=radius {
            let py = cy + dy;
            if py < 1 || py >= h - 1 {
                continue;
            }
            for dx in -radius..=radius {
                let px = cx + dx;
                if px < 1 || px >= w - 1 {
                    continue;
                }
                let (rx, ry) = (px as f32 - kp.x, py as f32 - kp.y);
                let c_rot = (cos_t * rx + sin_t * ry) / cell;
                let r_rot = (-sin_t * rx + cos_t * ry) / cell;
                let rbin = r_rot + half - 0.5;
                let cbin = c_rot + half - 0.5;
                if rbin <= -1.0 || rbin >= DESC_WIDTH as f32 || cbin <= -1.0 || cbin >= DESC_WIDTH as f32 {
                    continue;
                }
                let idx = py as usize * self.width + px as usize;
                let rel = (self.ori[idx] - kp.angle).rem_euclid(2.0 * PI);
                let obin = rel * bins_per_rad;
                let weight = ((c_rot * c_rot + r_rot * r_rot) * exp_scale).exp() * self.mag[idx];
                accumulate_trilinear(&mut hist, rbin, cbin, obin, weight);
            }
        }

        normalize_clip(&mut hist);
        for (o, v) in out.iter_mut().zip(hist) {
            *o = (512.0 * v).round().min(255.0) as u8;
        }
    }
}

fn accumulate_trilinear(hist: &mut [f32; DESCRIPTOR_LEN], rbin: f32, cbin: f32, obin: f32, weight: f32) {
    let (r0, c0, o0) = (rbin.floor(), cbin.floor(), obin.floor());
    let (dr, dc, dob) = (rbin - r0, cbin - c0, obin - o0);
    let (r0, c0, o0) = (r0 as i32, c0 as i32, o0 as i32);
    let dw = DESC_WIDTH as i32;
    for (ri, wr) in [(r0, 1.0 - dr), (r0 + 1, dr)] {
        if ri < 0 || ri >= dw {
            continue;
        }
        for (ci, wc) in [(c0, 1.0 - dc), (c0 + 1, dc)] {
            if ci < 0 || ci >= dw {
                continue;
            }
            for (oi, wo) in [(o0, 1.0 - dob), (o0 + 1, dob)] {
                let oi = oi.rem_euclid(DESC_BINS as i32);
                let k = ((ri * dw + ci) * DESC_BINS as i32 + oi) as usize;
                hist[k] += weight * wr * wc * wo;
            }
        }
    }
}

/// Unit-normalise, clip at `DESC_CLIP`, normalise again.
fn normalize_clip(hist: &mut [f32; DESCRIPTOR_LEN]) {
    let norm = hist.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return;
    }
    for v in hist.iter_mut() {
        *v = (*v / norm).min(DESC_CLIP);
    }
    let norm = hist.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in hist.iter_mut() {
            *v /= norm;
        }
    }
}
