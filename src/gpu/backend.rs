// gpu/backend.rs — wgpu implementation of `ComputeBackend`.
//
// BINDING LAYOUT
// ──────────────
// Every kernel has one WGSL module in `src/shaders/`. Buffer arguments bind
// at group 0, bindings 0..n in positional order. Scalar arguments are packed
// as raw 32-bit words (ints two's complement, floats by bit pattern) into a
// uniform `Params` struct at binding n, zero-padded to 16 bytes:
//
//   compact(src, dst, counter, start, end)
//     @binding(0) src   @binding(1) dst   @binding(2) counter
//     @binding(3) Params { start, end, _pad, _pad }
//
// All storage bindings are declared read_write so one layout shape serves
// every kernel.
//
// SPECIALISATION
// ──────────────
// Shader sources are templates: `{{WG_X}}`, `{{WG_Y}}` and `{{SCALES}}`
// are filled in before compilation. Pipelines are compiled on first use
// and cached per kernel.
//
// SYNCHRONISATION
// ───────────────
// `launch` submits one command buffer and keeps its `SubmissionIndex` under
// a fresh token. `wait` polls the device until that submission retires.
// `write` and `read` block on the whole queue.

use std::collections::HashMap;

use bytemuck::Pod;
use log::{debug, info};
use wgpu::util::DeviceExt;

use crate::error::{PipelineError, Result};
use crate::gpu::device::{GpuDevice, GpuError};
use crate::kernel::{
    check_access, BufferHandle, BufferKind, CompletionToken, ComputeBackend, KernelCall, KernelId,
    NdRange, ParamKind, WorkgroupSize,
};

/// Smallest allocation handed to wgpu; zero-sized bindings are invalid.
const MIN_BUFFER_BYTES: u64 = 16;

/// WGSL template for a kernel.
fn shader_template(kernel: KernelId) -> &'static str {
    match kernel {
        KernelId::LocalMaxMin => include_str!("../shaders/local_maxmin.wgsl"),
        KernelId::InterpKeypoint => include_str!("../shaders/interp_keypoint.wgsl"),
        KernelId::ComputeGradientOrientation => {
            include_str!("../shaders/compute_gradient_orientation.wgsl")
        }
        KernelId::OrientationAssignment => include_str!("../shaders/orientation_assignment.wgsl"),
        KernelId::Descriptor => include_str!("../shaders/descriptor.wgsl"),
        KernelId::Compact => include_str!("../shaders/compact.wgsl"),
        KernelId::MemsetBuffer => include_str!("../shaders/memset_buffer.wgsl"),
    }
}

/// Kernels dispatched over image pixels; the rest run over keypoint slots.
fn is_image_kernel(kernel: KernelId) -> bool {
    matches!(kernel, KernelId::LocalMaxMin | KernelId::ComputeGradientOrientation)
}

fn buffer_count(kernel: KernelId) -> usize {
    kernel.signature().iter().filter(|&&k| k == ParamKind::Buffer).count()
}

/// Scalar words padded to a whole number of 16-byte rows.
fn pack_params(words: &[u32]) -> Vec<u32> {
    let mut packed = words.to_vec();
    packed.resize(words.len().max(1).div_ceil(4) * 4, 0);
    packed
}

/// Workgroups to dispatch for `range` under workgroup shape `wg`.
///
/// Image kernels use the 2D grid directly. Slot kernels flatten their
/// workgroup, so `range.global[0]` is divided by `wg.total()`.
fn dispatch_size(kernel: KernelId, range: NdRange, wg: WorkgroupSize) -> [u32; 3] {
    if is_image_kernel(kernel) {
        [
            range.global[0].div_ceil(wg.x as usize) as u32,
            range.global[1].div_ceil(wg.y as usize) as u32,
            1,
        ]
    } else {
        let items = range.global[0] * range.global[1];
        [items.div_ceil(wg.total() as usize) as u32, 1, 1]
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

struct DeviceBuffer {
    buffer: wgpu::Buffer,
    kind: BufferKind,
    len: usize,
}

struct CompiledKernel {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

/// Kernels, buffers and in-flight submissions on one wgpu device.
pub struct WgpuBackend {
    buffers: Vec<Option<DeviceBuffer>>,
    free: Vec<usize>,
    kernels: HashMap<KernelId, CompiledKernel>,
    pending: HashMap<u64, wgpu::SubmissionIndex>,
    next_token: u64,
    scales_per_octave: usize,
    // Last: the device must outlive every resource above.
    gpu: GpuDevice,
}

impl WgpuBackend {
    /// Wrap an initialised device. `scales_per_octave` is baked into the
    /// refinement kernel.
    pub fn new(gpu: GpuDevice, scales_per_octave: usize) -> Self {
        info!("wgpu backend on {gpu}");
        WgpuBackend {
            buffers: Vec::new(),
            free: Vec::new(),
            kernels: HashMap::new(),
            pending: HashMap::new(),
            next_token: 0,
            scales_per_octave,
            gpu,
        }
    }

    pub fn gpu(&self) -> &GpuDevice {
        &self.gpu
    }

    /// Compile every kernel up front so the first run is not charged for it.
    pub fn prepare(&mut self) -> Result<()> {
        for kernel in KernelId::ALL {
            self.compiled(kernel)?;
        }
        Ok(())
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&DeviceBuffer> {
        self.buffers
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or(PipelineError::InvalidBuffer(handle.id()))
    }

    fn compiled(&mut self, kernel: KernelId) -> Result<&CompiledKernel> {
        if !self.kernels.contains_key(&kernel) {
            let compiled = self.compile(kernel)?;
            self.kernels.insert(kernel, compiled);
        }
        self.kernels
            .get(&kernel)
            .ok_or(PipelineError::UnknownKernel(kernel.name()))
    }

    fn compile(&self, kernel: KernelId) -> Result<CompiledKernel> {
        let device = &self.gpu.device;
        let source = self
            .gpu
            .workgroup_size
            .specialise(shader_template(kernel))
            .replace("{{SCALES}}", &self.scales_per_octave.to_string());

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel.name()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let n_buffers = buffer_count(kernel);
        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..n_buffers as u32)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: n_buffers as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });

        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(kernel.name()),
            entries: &entries,
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(kernel.name()),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel.name()),
            layout: Some(&layout),
            module: &shader,
            entry_point: kernel.name(),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::Shader {
                kernel: kernel.name(),
                message: err.to_string(),
            }
            .into());
        }
        debug!("compiled {kernel} for workgroup {}", self.gpu.workgroup_size);
        Ok(CompiledKernel { pipeline, bgl })
    }

    /// Submit nothing and wait for everything already queued.
    fn flush(&self) {
        self.gpu.queue.submit(std::iter::empty());
        self.gpu.device.poll(wgpu::Maintain::Wait);
    }
}

// ---------------------------------------------------------------------------
// ComputeBackend
// ---------------------------------------------------------------------------

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> String {
        self.gpu.adapter_info.to_string()
    }

    fn workgroup_size(&self) -> WorkgroupSize {
        self.gpu.workgroup_size
    }

    fn allocate(&mut self, kind: BufferKind, len: usize, label: &str) -> Result<BufferHandle> {
        let size = (kind.byte_size(len) as u64).max(MIN_BUFFER_BYTES);
        let limit = self.gpu.device.limits().max_storage_buffer_binding_size as u64;
        if size > limit {
            return Err(PipelineError::Transfer(format!(
                "{label}: {size} bytes exceeds the {limit}-byte storage binding limit"
            )));
        }
        let buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let entry = Some(DeviceBuffer { buffer, kind, len });
        let handle = match self.free.pop() {
            Some(index) => {
                self.buffers[index] = entry;
                BufferHandle::from_index(index)
            }
            None => {
                self.buffers.push(entry);
                BufferHandle::from_index(self.buffers.len() - 1)
            }
        };
        debug!("allocated {label} {handle}: {len} × {kind:?} ({size} bytes)");
        Ok(handle)
    }

    fn release(&mut self, handle: BufferHandle) -> Result<()> {
        let entry = self
            .buffers
            .get_mut(handle.index())
            .and_then(Option::take)
            .ok_or(PipelineError::InvalidBuffer(handle.id()))?;
        // Every launch has been waited on, so nothing in flight still uses it.
        entry.buffer.destroy();
        self.free.push(handle.index());
        debug!("released {handle}");
        Ok(())
    }

    fn buffer_len(&self, handle: BufferHandle) -> Result<usize> {
        Ok(self.buffer(handle)?.len)
    }

    fn write<T: Pod>(&mut self, handle: BufferHandle, offset: usize, data: &[T]) -> Result<()> {
        let es = std::mem::size_of::<T>();
        let buf = self.buffer(handle)?;
        check_access(handle, buf.kind, buf.len, es, offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let start = offset * es;
        if start % 4 != 0 || bytes.len() % 4 != 0 {
            return Err(PipelineError::Transfer(format!(
                "write to {handle} at byte {start} of {} bytes is not word aligned",
                bytes.len()
            )));
        }
        self.gpu.queue.write_buffer(&buf.buffer, start as u64, bytes);
        self.flush();
        Ok(())
    }

    fn read<T: Pod>(&mut self, handle: BufferHandle, offset: usize, len: usize) -> Result<Vec<T>> {
        let es = std::mem::size_of::<T>();
        let buf = self.buffer(handle)?;
        check_access(handle, buf.kind, buf.len, es, offset, len)?;
        if len == 0 {
            return Ok(Vec::new());
        }

        // Copies must start and end on word boundaries.
        let start = offset * es;
        let end = start + len * es;
        let aligned_start = start / 4 * 4;
        let aligned_end = end.div_ceil(4) * 4;
        let size = (aligned_end - aligned_start) as u64;

        let readback = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_buffer_to_buffer(&buf.buffer, aligned_start as u64, &readback, 0, size);
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| PipelineError::Transfer(format!("readback of {handle} never completed: {e}")))?
            .map_err(|e| PipelineError::Transfer(format!("readback of {handle} failed: {e}")))?;

        let mapped = slice.get_mapped_range();
        let skip = start - aligned_start;
        let out: Vec<T> = bytemuck::pod_collect_to_vec(&mapped[skip..skip + len * es]);
        drop(mapped);
        readback.unmap();
        Ok(out)
    }

    fn launch(&mut self, call: &KernelCall, range: NdRange) -> Result<CompletionToken> {
        let kernel = call.kernel();
        let handles: Vec<BufferHandle> = call.buffers().collect();
        self.compiled(kernel)?;
        let bound: Vec<&wgpu::Buffer> = handles
            .iter()
            .map(|&h| self.buffer(h).map(|b| &b.buffer))
            .collect::<Result<_>>()?;
        let wg = self.gpu.workgroup_size;
        let compiled = self
            .kernels
            .get(&kernel)
            .ok_or(PipelineError::UnknownKernel(kernel.name()))?;
        let device = &self.gpu.device;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let params = pack_params(&call.scalar_words());
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("kernel params"),
            contents: bytemuck::cast_slice(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries: Vec<wgpu::BindGroupEntry> = bound
            .iter()
            .enumerate()
            .map(|(binding, buf)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buf.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: handles.len() as u32,
            resource: params_buf.as_entire_binding(),
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.name()),
            layout: &compiled.bgl,
            entries: &entries,
        });

        let [gx, gy, gz] = dispatch_size(kernel, range, wg);
        let mut encoder = device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(kernel.name()) });
        if gx > 0 && gy > 0 {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&compiled.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(gx, gy, gz);
        }
        let index = self.gpu.queue.submit(std::iter::once(encoder.finish()));

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(PipelineError::Launch {
                kernel,
                message: err.to_string(),
            });
        }

        let token = CompletionToken(self.next_token);
        self.next_token += 1;
        self.pending.insert(token.0, index);
        Ok(token)
    }

    fn wait(&mut self, token: CompletionToken) -> Result<()> {
        let index = self.pending.remove(&token.0).ok_or_else(|| PipelineError::Wait {
            token: token.0,
            message: "unknown or already completed".to_string(),
        })?;
        self.gpu.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::run_gpu_test_in_subprocess;
    use crate::host::HostDevice;
    use crate::kernel::{run_kernel, Args};
    use crate::keypoint::Keypoint;

    #[test]
    fn test_params_pad_to_rows() {
        assert_eq!(pack_params(&[1, 2]), vec![1, 2, 0, 0]);
        assert_eq!(pack_params(&[]).len(), 4);
        assert_eq!(pack_params(&[0; 9]).len(), 12);
    }

    #[test]
    fn test_buffer_counts_match_signatures() {
        assert_eq!(buffer_count(KernelId::LocalMaxMin), 3);
        assert_eq!(buffer_count(KernelId::InterpKeypoint), 2);
        assert_eq!(buffer_count(KernelId::OrientationAssignment), 4);
        assert_eq!(buffer_count(KernelId::MemsetBuffer), 1);
    }

    #[test]
    fn test_dispatch_size_flattens_slot_kernels() {
        let wg = WorkgroupSize { x: 16, y: 8 };
        let lin = NdRange::linear(300, wg.total() as usize);
        assert_eq!(dispatch_size(KernelId::Compact, lin, wg), [3, 1, 1]);
        let grid = NdRange::grid(100, 50, wg);
        assert_eq!(dispatch_size(KernelId::LocalMaxMin, grid, wg), [7, 7, 1]);
    }

    #[test]
    fn test_templates_have_named_entry_points() {
        for k in KernelId::ALL {
            let src = shader_template(k);
            assert!(src.contains(&format!("fn {}(", k.name())), "{k}");
            assert!(src.contains("{{WG_X}}"), "{k}");
            // Params binding sits right after the buffers.
            let uniform = format!("@binding({}) var<uniform>", buffer_count(k));
            assert!(src.contains(&uniform), "{k}: missing `{uniform}`");
        }
    }

    // ---- Inner tests (run inside the subprocess) ----

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_write_read_roundtrip() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let mut b = WgpuBackend::new(gpu, 3);
        let h = b.allocate(BufferKind::Float, 10, "floats").unwrap();
        b.write(h, 2, &[1.0f32, 2.0, 3.0]).unwrap();
        let back: Vec<f32> = b.read(h, 2, 3).unwrap();
        assert_eq!(back, vec![1.0, 2.0, 3.0]);

        let d = b.allocate(BufferKind::Byte, 7, "bytes").unwrap();
        b.write(d, 0, &[1u8, 2, 3, 4]).unwrap();
        let bytes: Vec<u8> = b.read(d, 1, 2).unwrap();
        assert_eq!(bytes, vec![2, 3]);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_memset_and_compact_match_host() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let mut gpu_b = WgpuBackend::new(gpu, 3);
        gpu_b.prepare().expect("all kernels compile");
        let mut host_b = HostDevice::new(3);

        let kps = vec![
            Keypoint::new(1.0, 1.0, 1.0, 0.0),
            Keypoint::INVALID,
            Keypoint::new(3.0, 3.0, 1.0, 0.0),
            Keypoint::INVALID,
            Keypoint::new(5.0, 5.0, 1.0, 0.0),
        ];
        let mut counts = Vec::new();
        let mut survivors = Vec::new();

        fn run<B: ComputeBackend>(b: &mut B, kps: &[Keypoint]) -> (i32, Vec<Keypoint>) {
            let src = b.allocate(BufferKind::Keypoint, 8, "src").unwrap();
            let dst = b.allocate(BufferKind::Keypoint, 8, "dst").unwrap();
            let counter = b.allocate(BufferKind::Int, 1, "counter").unwrap();
            let wg = b.workgroup_size().total() as usize;
            for h in [src, dst] {
                run_kernel(
                    b,
                    KernelId::MemsetBuffer,
                    Args::new().buffer(h).float(-1.0).count(32),
                    NdRange::linear(32, wg),
                )
                .unwrap();
            }
            b.write(src, 0, kps).unwrap();
            b.write(counter, 0, &[1i32]).unwrap();
            run_kernel(
                b,
                KernelId::Compact,
                Args::new().buffer(src).buffer(dst).buffer(counter).int(1).count(kps.len()),
                NdRange::linear(kps.len(), wg),
            )
            .unwrap();
            let n: Vec<i32> = b.read(counter, 0, 1).unwrap();
            let mut out: Vec<Keypoint> = b.read(dst, 0, n[0] as usize).unwrap();
            out.sort_by(|a, b| a.x.total_cmp(&b.x));
            (n[0], out)
        }

        for (n, out) in [run(&mut gpu_b, &kps), run(&mut host_b, &kps)] {
            counts.push(n);
            survivors.push(out);
        }
        assert_eq!(counts, vec![3, 3]);
        assert_eq!(survivors[0], survivors[1]);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_release_reuses_slot() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let mut b = WgpuBackend::new(gpu, 3);
        let a = b.allocate(BufferKind::Float, 1024, "a").unwrap();
        b.release(a).unwrap();
        assert!(matches!(b.read::<f32>(a, 0, 1), Err(PipelineError::InvalidBuffer(_))));
        let c = b.allocate(BufferKind::Int, 4, "c").unwrap();
        assert_eq!(c.id(), a.id());
        b.write(c, 0, &[7i32, 8, 9, 10]).unwrap();
        assert_eq!(b.read::<i32>(c, 0, 4).unwrap(), vec![7, 8, 9, 10]);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_wait_twice_is_an_error() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let mut b = WgpuBackend::new(gpu, 3);
        let h = b.allocate(BufferKind::Float, 4, "buf").unwrap();
        let call = KernelCall::bind(KernelId::MemsetBuffer, Args::new().buffer(h).float(0.0).int(4))
            .unwrap();
        let token = b.launch(&call, NdRange::linear(4, 128)).unwrap();
        b.wait(token).unwrap();
        assert!(matches!(b.wait(token), Err(PipelineError::Wait { .. })));
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_pipeline_matches_host() {
        use crate::config::SiftParams;
        use crate::image::Image;
        use crate::pipeline::Pipeline;

        let img = Image::from_fn(128, 96, |x, y| {
            let d2 = (x as f32 - 50.0).powi(2) + (y as f32 - 40.0).powi(2);
            (30.0 + 200.0 * (-d2 / 32.0).exp()) as u8
        });
        let params = SiftParams::default();
        let host = Pipeline::host(params.clone()).unwrap().run(&img).unwrap();
        let gpu = Pipeline::gpu(params).expect("need Vulkan GPU").run(&img).unwrap();

        // Slot order differs on the device; match features by position.
        assert_eq!(gpu.features.len(), host.features.len());
        for f in &host.features {
            let hit = gpu.features.iter().any(|g| {
                (g.x - f.x).abs() < 0.05 && (g.y - f.y).abs() < 0.05 && (g.angle - f.angle).abs() < 0.05
            });
            assert!(hit, "host feature at ({}, {}) missing on GPU", f.x, f.y);
        }
        println!("GPU_TEST_OK");
    }

    // ---- Outer tests ----

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_write_read_roundtrip() {
        let out = run_gpu_test_in_subprocess("gpu::backend::tests::inner_write_read_roundtrip");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_memset_and_compact_match_host() {
        let out = run_gpu_test_in_subprocess("gpu::backend::tests::inner_memset_and_compact_match_host");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_wait_twice_is_an_error() {
        let out = run_gpu_test_in_subprocess("gpu::backend::tests::inner_wait_twice_is_an_error");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_release_reuses_slot() {
        let out = run_gpu_test_in_subprocess("gpu::backend::tests::inner_release_reuses_slot");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_pipeline_matches_host() {
        let out = run_gpu_test_in_subprocess("gpu::backend::tests::inner_pipeline_matches_host");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }
}
