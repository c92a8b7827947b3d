// kernel.rs — Typed kernel invocation layer.
//
// Every device kernel is named by a `KernelId` that carries its declared
// signature: an ordered list of parameter kinds (int, float, buffer).
// A call site builds an ordered `Args` list with a typed builder:
//
//   let call = KernelCall::bind(
//       KernelId::Compact,
//       Args::new().buffer(src).buffer(dst).buffer(counter).int(start).int(end),
//   )?;
//   let token = backend.launch(&call, NdRange::linear(end as usize, 64))?;
//   backend.wait(token)?;
//
// `bind` checks arity and per-position kind against the signature, and
// rejects a buffer bound twice in one call (the compaction ping-pong relies
// on source and destination being distinct). Binding errors are
// configuration defects: they surface before anything reaches the device.
//
// DEVICE CONTRACT
// ───────────────
// `ComputeBackend` is the seam between the pipeline and whatever executes
// the kernels. The host reference device (`host::HostDevice`) and the wgpu
// device (`gpu::WgpuBackend`) both implement it. Launches are asynchronous
// by contract: `launch` returns a `CompletionToken` and only `wait` on that
// token guarantees the kernel's writes are visible. The pipeline always
// waits before issuing a dependent launch.

use std::fmt;

use bytemuck::Pod;

use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Parameter kinds and argument values
// ---------------------------------------------------------------------------

/// Declared kind of one positional kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Float,
    Buffer,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Int => write!(f, "int32"),
            ParamKind::Float => write!(f, "float32"),
            ParamKind::Buffer => write!(f, "buffer"),
        }
    }
}

/// Opaque handle to a device allocation. Only meaningful to the backend
/// that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(u32);

impl BufferHandle {
    pub(crate) fn from_index(index: usize) -> Self {
        BufferHandle(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Element type of a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// `f32` elements (images, DoG stack, gradients).
    Float,
    /// `i32` elements (the keypoint Counter).
    Int,
    /// 16-byte `Keypoint` elements.
    Keypoint,
    /// `u8` elements (descriptors). Storage is rounded up to whole words.
    Byte,
}

impl BufferKind {
    pub fn element_size(self) -> usize {
        match self {
            BufferKind::Float | BufferKind::Int => 4,
            BufferKind::Keypoint => 16,
            BufferKind::Byte => 1,
        }
    }

    /// Storage size in bytes, rounded up to a multiple of 4.
    pub fn byte_size(self, len: usize) -> usize {
        (len * self.element_size() + 3) / 4 * 4
    }
}

/// One tagged argument value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Int(i32),
    Float(f32),
    Buffer(BufferHandle),
}

impl KernelArg {
    pub fn kind(&self) -> ParamKind {
        match self {
            KernelArg::Int(_) => ParamKind::Int,
            KernelArg::Float(_) => ParamKind::Float,
            KernelArg::Buffer(_) => ParamKind::Buffer,
        }
    }
}

/// Ordered argument list builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<KernelArg>);

impl Args {
    pub fn new() -> Self {
        Args(Vec::with_capacity(12))
    }

    pub fn int(mut self, v: i32) -> Self {
        self.0.push(KernelArg::Int(v));
        self
    }

    pub fn float(mut self, v: f32) -> Self {
        self.0.push(KernelArg::Float(v));
        self
    }

    pub fn buffer(mut self, h: BufferHandle) -> Self {
        self.0.push(KernelArg::Buffer(h));
        self
    }

    /// Push a host-side size or index as an `int32` argument.
    pub fn count(self, v: usize) -> Self {
        self.int(v as i32)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Kernel identities and signatures
// ---------------------------------------------------------------------------

use ParamKind::{Buffer as B, Float as F, Int as I};

/// The kernels the pipeline launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    LocalMaxMin,
    InterpKeypoint,
    ComputeGradientOrientation,
    OrientationAssignment,
    Descriptor,
    Compact,
    MemsetBuffer,
}

impl KernelId {
    pub const ALL: [KernelId; 7] = [
        KernelId::LocalMaxMin,
        KernelId::InterpKeypoint,
        KernelId::ComputeGradientOrientation,
        KernelId::OrientationAssignment,
        KernelId::Descriptor,
        KernelId::Compact,
        KernelId::MemsetBuffer,
    ];

    /// Entry-point name in the kernel module.
    pub fn name(self) -> &'static str {
        match self {
            KernelId::LocalMaxMin => "local_maxmin",
            KernelId::InterpKeypoint => "interp_keypoint",
            KernelId::ComputeGradientOrientation => "compute_gradient_orientation",
            KernelId::OrientationAssignment => "orientation_assignment",
            KernelId::Descriptor => "descriptor",
            KernelId::Compact => "compact",
            KernelId::MemsetBuffer => "memset_buffer",
        }
    }

    /// Declared positional parameter kinds.
    pub fn signature(self) -> &'static [ParamKind] {
        match self {
            // DoGs, keypoints, border_dist, peak_thresh, octsize, edge_thresh0,
            // edge_thresh, counter, capacity, scale, width, height
            KernelId::LocalMaxMin => &[B, B, I, F, I, F, F, B, I, I, I, I],
            // DoGs, keypoints, start, end, peak_thresh, init_sigma, width, height
            KernelId::InterpKeypoint => &[B, B, I, I, F, F, I, I],
            // gray, grad, ori, width, height
            KernelId::ComputeGradientOrientation => &[B, B, B, I, I],
            // keypoints, grad, ori, counter, octsize, ori_sigma, capacity,
            // start, end, width, height
            KernelId::OrientationAssignment => &[B, B, B, B, I, F, I, I, I, I, I],
            // keypoints, descriptors, grad, ori, octsize, start, end, width, height
            KernelId::Descriptor => &[B, B, B, B, I, I, I, I, I],
            // src, dst, counter, start, end
            KernelId::Compact => &[B, B, B, I, I],
            // buffer, fill_value, element_count
            KernelId::MemsetBuffer => &[B, F, I],
        }
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Bound call
// ---------------------------------------------------------------------------

/// A kernel with an argument list that matches its signature.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelCall {
    kernel: KernelId,
    args: Vec<KernelArg>,
}

impl KernelCall {
    /// Validate `args` against the kernel's signature.
    pub fn bind(kernel: KernelId, args: Args) -> Result<Self> {
        let signature = kernel.signature();
        let args = args.0;
        if args.len() != signature.len() {
            return Err(PipelineError::ArgumentCount {
                kernel: kernel.name(),
                expected: signature.len(),
                supplied: args.len(),
            });
        }
        for (index, (arg, &expected)) in args.iter().zip(signature).enumerate() {
            if arg.kind() != expected {
                return Err(PipelineError::ArgumentKind {
                    kernel: kernel.name(),
                    index,
                    expected,
                    supplied: arg.kind(),
                });
            }
        }
        let mut seen: Vec<BufferHandle> = Vec::with_capacity(4);
        for arg in &args {
            if let KernelArg::Buffer(h) = arg {
                if seen.contains(h) {
                    return Err(PipelineError::BufferAliased {
                        handle: h.id(),
                        kernel: kernel.name(),
                    });
                }
                seen.push(*h);
            }
        }
        Ok(KernelCall { kernel, args })
    }

    pub fn kernel(&self) -> KernelId {
        self.kernel
    }

    pub fn args(&self) -> &[KernelArg] {
        &self.args
    }

    /// Buffer arguments in positional order.
    pub fn buffers(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.args.iter().filter_map(|a| match a {
            KernelArg::Buffer(h) => Some(*h),
            _ => None,
        })
    }

    /// Scalar arguments in positional order, as raw 32-bit words.
    pub fn scalar_words(&self) -> Vec<u32> {
        self.args
            .iter()
            .filter_map(|a| match a {
                KernelArg::Int(v) => Some(*v as u32),
                KernelArg::Float(v) => Some(v.to_bits()),
                KernelArg::Buffer(_) => None,
            })
            .collect()
    }

    /// Positional accessors for kernel implementations. Binding already
    /// validated kinds, so a mismatch here is a kernel-side indexing bug.
    pub fn buffer_at(&self, index: usize) -> Result<BufferHandle> {
        match self.args.get(index) {
            Some(KernelArg::Buffer(h)) => Ok(*h),
            other => Err(self.kind_error(index, ParamKind::Buffer, other)),
        }
    }

    pub fn int_at(&self, index: usize) -> Result<i32> {
        match self.args.get(index) {
            Some(KernelArg::Int(v)) => Ok(*v),
            other => Err(self.kind_error(index, ParamKind::Int, other)),
        }
    }

    pub fn float_at(&self, index: usize) -> Result<f32> {
        match self.args.get(index) {
            Some(KernelArg::Float(v)) => Ok(*v),
            other => Err(self.kind_error(index, ParamKind::Float, other)),
        }
    }

    fn kind_error(&self, index: usize, expected: ParamKind, got: Option<&KernelArg>) -> PipelineError {
        match got {
            Some(arg) => PipelineError::ArgumentKind {
                kernel: self.kernel.name(),
                index,
                expected,
                supplied: arg.kind(),
            },
            None => PipelineError::ArgumentCount {
                kernel: self.kernel.name(),
                expected: index + 1,
                supplied: self.args.len(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Index space
// ---------------------------------------------------------------------------

/// A workgroup size for 2D dispatches; 1D dispatches use `total()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// Fill the `{{WG_X}}` / `{{WG_Y}}` placeholders of a WGSL template.
    pub fn specialise(&self, template: &str) -> String {
        template
            .replace("{{WG_X}}", &self.x.to_string())
            .replace("{{WG_Y}}", &self.y.to_string())
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Global and local index space of one launch.
///
/// The global size is always a multiple of the local size; kernels must
/// bound themselves with their own size/count parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    pub global: [usize; 2],
    pub local: [usize; 2],
}

impl NdRange {
    /// 1D range covering `n` items with workgroups of `wg` items.
    pub fn linear(n: usize, wg: usize) -> Self {
        let wg = wg.max(1);
        NdRange {
            global: [round_up(n, wg), 1],
            local: [wg, 1],
        }
    }

    /// 2D range covering a `width × height` image.
    pub fn grid(width: usize, height: usize, wg: WorkgroupSize) -> Self {
        let (lx, ly) = (wg.x.max(1) as usize, wg.y.max(1) as usize);
        NdRange {
            global: [round_up(width, lx), round_up(height, ly)],
            local: [lx, ly],
        }
    }

    /// Number of workgroups per dimension.
    pub fn groups(&self) -> [usize; 2] {
        [self.global[0] / self.local[0], self.global[1] / self.local[1]]
    }

    pub fn is_empty(&self) -> bool {
        self.global[0] == 0 || self.global[1] == 0
    }

    /// Every work-item index `(gx, gy)`, row-major.
    pub fn work_items(&self) -> impl Iterator<Item = (usize, usize)> {
        let [gx, gy] = self.global;
        (0..gy).flat_map(move |y| (0..gx).map(move |x| (x, y)))
    }
}

/// Round `n` up to the next multiple of `multiple`.
#[inline]
pub fn round_up(n: usize, multiple: usize) -> usize {
    (n + multiple - 1) / multiple * multiple
}

// ---------------------------------------------------------------------------
// Device contract
// ---------------------------------------------------------------------------

/// Handle on an in-flight launch. Waited on exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionToken(pub(crate) u64);

impl CompletionToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// An accelerator that can hold buffers and execute the pipeline's kernels.
pub trait ComputeBackend {
    /// Human-readable device name for logs.
    fn name(&self) -> String;

    /// Preferred workgroup size; 1D launches use `total()` items per group.
    fn workgroup_size(&self) -> WorkgroupSize;

    /// Allocate `len` elements of `kind`. Contents are unspecified.
    fn allocate(&mut self, kind: BufferKind, len: usize, label: &str) -> Result<BufferHandle>;

    /// Free an allocation. The handle is invalid afterwards and its slot may
    /// be handed out again by a later `allocate`.
    fn release(&mut self, handle: BufferHandle) -> Result<()>;

    /// Length in elements of a live allocation.
    fn buffer_len(&self, handle: BufferHandle) -> Result<usize>;

    /// Blocking host → device copy of `data` at element `offset`.
    fn write<T: Pod>(&mut self, handle: BufferHandle, offset: usize, data: &[T]) -> Result<()>;

    /// Blocking device → host copy of `len` elements at `offset`.
    fn read<T: Pod>(&mut self, handle: BufferHandle, offset: usize, len: usize) -> Result<Vec<T>>;

    /// Enqueue a bound kernel over `range`.
    fn launch(&mut self, call: &KernelCall, range: NdRange) -> Result<CompletionToken>;

    /// Block until the launch behind `token` has completed.
    fn wait(&mut self, token: CompletionToken) -> Result<()>;
}

/// Bind, launch and wait in one step. Every pipeline stage launches this
/// way: nothing downstream may start before the kernel's writes land.
pub fn run_kernel<Bk: ComputeBackend>(
    backend: &mut Bk,
    kernel: KernelId,
    args: Args,
    range: NdRange,
) -> Result<()> {
    let call = KernelCall::bind(kernel, args)?;
    let token = backend.launch(&call, range)?;
    backend.wait(token)
}

/// Shared bounds check for backend `read`/`write` implementations.
pub(crate) fn check_access(
    handle: BufferHandle,
    kind: BufferKind,
    len: usize,
    elem_size: usize,
    offset: usize,
    count: usize,
) -> Result<()> {
    if elem_size != kind.element_size() {
        return Err(PipelineError::BufferKind {
            handle: handle.id(),
            actual: kind.element_size(),
            requested: elem_size,
        });
    }
    let end = offset.saturating_add(count);
    if end > len {
        return Err(PipelineError::BufferRange {
            handle: handle.id(),
            offset,
            end,
            len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(i: usize) -> BufferHandle {
        BufferHandle::from_index(i)
    }

    #[test]
    fn test_bind_accepts_matching_signature() {
        let call = KernelCall::bind(
            KernelId::Compact,
            Args::new().buffer(h(0)).buffer(h(1)).buffer(h(2)).int(0).int(10),
        )
        .unwrap();
        assert_eq!(call.kernel(), KernelId::Compact);
        assert_eq!(call.buffers().count(), 3);
        assert_eq!(call.scalar_words(), vec![0, 10]);
    }

    #[test]
    fn test_bind_rejects_wrong_arity() {
        let err = KernelCall::bind(KernelId::MemsetBuffer, Args::new().buffer(h(0)).float(-1.0))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ArgumentCount { expected: 3, supplied: 2, .. }
        ));
    }

    #[test]
    fn test_bind_rejects_kind_mismatch() {
        // element_count passed as float instead of int.
        let err = KernelCall::bind(
            KernelId::MemsetBuffer,
            Args::new().buffer(h(0)).float(-1.0).float(4.0),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ArgumentKind {
                index: 2,
                expected: ParamKind::Int,
                supplied: ParamKind::Float,
                ..
            }
        ));
    }

    #[test]
    fn test_bind_rejects_aliased_buffers() {
        let err = KernelCall::bind(
            KernelId::Compact,
            Args::new().buffer(h(1)).buffer(h(1)).buffer(h(2)).int(0).int(10),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::BufferAliased { handle: 1, .. }));
    }

    #[test]
    fn test_scalar_words_preserve_float_bits() {
        let call = KernelCall::bind(
            KernelId::MemsetBuffer,
            Args::new().buffer(h(0)).float(-1.0).count(64),
        )
        .unwrap();
        assert_eq!(call.scalar_words(), vec![(-1.0f32).to_bits(), 64]);
        assert_eq!(call.float_at(1).unwrap(), -1.0);
        assert!(call.int_at(1).is_err());
    }

    #[test]
    fn test_every_signature_has_a_buffer() {
        for k in KernelId::ALL {
            assert!(k.signature().contains(&ParamKind::Buffer), "{k}");
        }
    }

    #[test]
    fn test_linear_range_rounds_up() {
        let r = NdRange::linear(100, 64);
        assert_eq!(r.global, [128, 1]);
        assert_eq!(r.groups(), [2, 1]);
        assert!(NdRange::linear(0, 64).is_empty());
    }

    #[test]
    fn test_grid_range_rounds_up() {
        let r = NdRange::grid(100, 100, WorkgroupSize { x: 8, y: 8 });
        assert_eq!(r.global, [104, 104]);
        assert_eq!(r.groups(), [13, 13]);
    }

    #[test]
    fn test_work_items_row_major() {
        let r = NdRange { global: [2, 2], local: [1, 1] };
        let items: Vec<_> = r.work_items().collect();
        assert_eq!(items, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn test_check_access() {
        assert!(check_access(h(0), BufferKind::Float, 10, 4, 5, 5).is_ok());
        assert!(matches!(
            check_access(h(0), BufferKind::Float, 10, 4, 5, 6),
            Err(PipelineError::BufferRange { end: 11, .. })
        ));
        assert!(matches!(
            check_access(h(0), BufferKind::Keypoint, 10, 4, 0, 1),
            Err(PipelineError::BufferKind { actual: 16, requested: 4, .. })
        ));
    }

    #[test]
    fn test_specialise_fills_workgroup() {
        let src = WorkgroupSize { x: 16, y: 8 }.specialise("@workgroup_size({{WG_X}}, {{WG_Y}}, 1)");
        assert_eq!(src, "@workgroup_size(16, 8, 1)");
    }

    #[test]
    fn test_byte_buffers_round_to_words() {
        assert_eq!(BufferKind::Byte.byte_size(130), 132);
        assert_eq!(BufferKind::Keypoint.byte_size(3), 48);
    }
}
