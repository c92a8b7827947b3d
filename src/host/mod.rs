// host/mod.rs — CPU reference device.
//
// `HostDevice` implements the device contract on the host: a buffer arena,
// a kernel registry keyed by `KernelId`, and completion tokens. It is the
// reference the wgpu backend is validated against and needs no GPU, so the
// whole pipeline can be tested on any machine.
//
// Kernels execute synchronously inside `launch`; `wait` only retires the
// token. Any registered kernel can be replaced, which lets tests swap in a
// stub (e.g. an orientation kernel that appends a fixed number of
// keypoints) and observe how the pipeline reacts.
//
// Buffers are moved out of the arena for the duration of a kernel
// (`HostMemory::take`) and moved back afterwards, so a kernel can hold
// several buffers mutably at once and a buffer that is already checked out
// is reported as aliased instead of silently shared.

pub mod kernels;

use std::collections::{HashMap, HashSet};

use bytemuck::Pod;
use log::debug;

use crate::error::{PipelineError, Result};
use crate::kernel::{
    check_access, BufferHandle, BufferKind, CompletionToken, ComputeBackend, KernelCall, KernelId,
    NdRange, WorkgroupSize,
};
use crate::keypoint::Keypoint;

// ---------------------------------------------------------------------------
// Buffer arena
// ---------------------------------------------------------------------------

/// One host allocation. Storage is always whole 32-bit words.
#[derive(Debug, Clone)]
pub struct HostBuffer {
    kind: BufferKind,
    len: usize,
    label: String,
    words: Vec<u32>,
}

impl HostBuffer {
    fn new(kind: BufferKind, len: usize, label: &str) -> Self {
        HostBuffer {
            kind,
            len,
            label: label.to_string(),
            words: vec![0; kind.byte_size(len) / 4],
        }
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Raw 32-bit storage, for kernels that are type-agnostic (memset).
    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    pub fn f32s(&self) -> &[f32] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn f32s_mut(&mut self) -> &mut [f32] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    pub fn i32s_mut(&mut self) -> &mut [i32] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn keypoints_mut(&mut self) -> &mut [Keypoint] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut::<u32, u8>(&mut self.words)[..len]
    }
}

/// Arena of host allocations indexed by `BufferHandle`.
///
/// Released slots go on a free list and are reused by the next `allocate`.
#[derive(Debug, Default)]
pub struct HostMemory {
    slots: Vec<Option<HostBuffer>>,
    free: Vec<usize>,
}

impl HostMemory {
    fn allocate(&mut self, kind: BufferKind, len: usize, label: &str) -> BufferHandle {
        let buffer = Some(HostBuffer::new(kind, len, label));
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = buffer;
                BufferHandle::from_index(index)
            }
            None => {
                self.slots.push(buffer);
                BufferHandle::from_index(self.slots.len() - 1)
            }
        }
    }

    fn release(&mut self, handle: BufferHandle) -> Result<()> {
        match self.slots.get_mut(handle.index()).and_then(Option::take) {
            Some(_) => {
                self.free.push(handle.index());
                Ok(())
            }
            None => Err(PipelineError::InvalidBuffer(handle.id())),
        }
    }

    /// Allocations currently alive.
    pub fn live_buffers(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn missing(&self, handle: BufferHandle, kernel: &'static str) -> PipelineError {
        // An allocated slot that is empty is checked out by the running kernel.
        if handle.index() < self.slots.len() && !self.free.contains(&handle.index()) {
            PipelineError::BufferAliased { handle: handle.id(), kernel }
        } else {
            PipelineError::InvalidBuffer(handle.id())
        }
    }

    pub fn get(&self, handle: BufferHandle) -> Result<&HostBuffer> {
        self.slots
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or(PipelineError::InvalidBuffer(handle.id()))
    }

    pub fn get_mut(&mut self, handle: BufferHandle) -> Result<&mut HostBuffer> {
        self.slots
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or(PipelineError::InvalidBuffer(handle.id()))
    }

    /// Move a buffer out of the arena for the duration of `kernel`.
    pub fn take(&mut self, handle: BufferHandle, kernel: KernelId) -> Result<HostBuffer> {
        let missing = self.missing(handle, kernel.name());
        self.slots
            .get_mut(handle.index())
            .and_then(Option::take)
            .ok_or(missing)
    }

    /// Move several buffers out at once. On failure nothing stays checked out.
    pub fn take_many<const N: usize>(
        &mut self,
        handles: [BufferHandle; N],
        kernel: KernelId,
    ) -> Result<[HostBuffer; N]> {
        let mut taken = Vec::with_capacity(N);
        for &h in &handles {
            match self.take(h, kernel) {
                Ok(buf) => taken.push(buf),
                Err(e) => {
                    for (h, buf) in handles.iter().zip(taken) {
                        self.restore(*h, buf);
                    }
                    return Err(e);
                }
            }
        }
        taken
            .try_into()
            .map_err(|_| PipelineError::InvalidBuffer(handles[0].id()))
    }

    pub fn restore(&mut self, handle: BufferHandle, buffer: HostBuffer) {
        if let Some(slot) = self.slots.get_mut(handle.index()) {
            *slot = Some(buffer);
        }
    }

    pub fn restore_many<const N: usize>(&mut self, handles: [BufferHandle; N], buffers: [HostBuffer; N]) {
        for (h, buf) in handles.into_iter().zip(buffers) {
            self.restore(h, buf);
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel registry
// ---------------------------------------------------------------------------

/// What a host kernel sees besides its bound arguments.
pub struct KernelContext<'a> {
    pub memory: &'a mut HostMemory,
    /// Kernel-module constant shared by every launch (scales per octave).
    pub scales_per_octave: usize,
}

/// A host implementation of one device kernel.
pub trait HostKernel: Send + Sync {
    fn run(&self, ctx: &mut KernelContext<'_>, call: &KernelCall, range: NdRange) -> Result<()>;
}

impl<F> HostKernel for F
where
    F: Fn(&mut KernelContext<'_>, &KernelCall, NdRange) -> Result<()> + Send + Sync,
{
    fn run(&self, ctx: &mut KernelContext<'_>, call: &KernelCall, range: NdRange) -> Result<()> {
        self(ctx, call, range)
    }
}

/// One launch as observed by the host device.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRecord {
    pub call: KernelCall,
    pub range: NdRange,
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

pub struct HostDevice {
    memory: HostMemory,
    kernels: HashMap<KernelId, Box<dyn HostKernel>>,
    pending: HashSet<u64>,
    next_token: u64,
    scales_per_octave: usize,
    workgroup: WorkgroupSize,
    record: bool,
    history: Vec<LaunchRecord>,
}

impl HostDevice {
    /// Device with every reference kernel registered.
    pub fn new(scales_per_octave: usize) -> Self {
        let mut dev = Self::empty(scales_per_octave);
        dev.register(KernelId::MemsetBuffer, kernels::memset_buffer);
        dev.register(KernelId::Compact, kernels::compact);
        dev.register(KernelId::LocalMaxMin, kernels::local_maxmin);
        dev.register(KernelId::InterpKeypoint, kernels::interp_keypoint);
        dev.register(
            KernelId::ComputeGradientOrientation,
            kernels::compute_gradient_orientation,
        );
        dev.register(KernelId::OrientationAssignment, kernels::orientation_assignment);
        dev.register(KernelId::Descriptor, kernels::descriptor);
        dev
    }

    /// Device with no kernels at all.
    pub fn empty(scales_per_octave: usize) -> Self {
        HostDevice {
            memory: HostMemory::default(),
            kernels: HashMap::new(),
            pending: HashSet::new(),
            next_token: 0,
            scales_per_octave,
            workgroup: WorkgroupSize { x: 16, y: 16 },
            record: false,
            history: Vec::new(),
        }
    }

    /// Keep a `LaunchRecord` of every launch. Off by default: a device that
    /// drives a long-running pipeline would otherwise grow without bound.
    pub fn with_history(mut self) -> Self {
        self.record = true;
        self
    }

    /// Install (or replace) the implementation of `id`.
    pub fn register<K: HostKernel + 'static>(&mut self, id: KernelId, kernel: K) {
        self.kernels.insert(id, Box::new(kernel));
    }

    pub fn unregister(&mut self, id: KernelId) {
        self.kernels.remove(&id);
    }

    /// Every launch since recording began (or the last `clear_history`).
    /// Empty unless built `with_history`.
    pub fn history(&self) -> &[LaunchRecord] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Launches of one kernel, in order.
    pub fn launches_of(&self, id: KernelId) -> impl Iterator<Item = &LaunchRecord> {
        self.history.iter().filter(move |r| r.call.kernel() == id)
    }

    pub fn memory(&self) -> &HostMemory {
        &self.memory
    }
}

impl ComputeBackend for HostDevice {
    fn name(&self) -> String {
        "host reference device".to_string()
    }

    fn workgroup_size(&self) -> WorkgroupSize {
        self.workgroup
    }

    fn allocate(&mut self, kind: BufferKind, len: usize, label: &str) -> Result<BufferHandle> {
        let h = self.memory.allocate(kind, len, label);
        debug!("host: allocated {label} {h} ({len} × {} B)", kind.element_size());
        Ok(h)
    }

    fn release(&mut self, handle: BufferHandle) -> Result<()> {
        self.memory.release(handle)?;
        debug!("host: released {handle}");
        Ok(())
    }

    fn buffer_len(&self, handle: BufferHandle) -> Result<usize> {
        Ok(self.memory.get(handle)?.len())
    }

    fn write<T: Pod>(&mut self, handle: BufferHandle, offset: usize, data: &[T]) -> Result<()> {
        let buf = self.memory.get_mut(handle)?;
        let es = std::mem::size_of::<T>();
        check_access(handle, buf.kind, buf.len, es, offset, data.len())?;
        let bytes = bytemuck::cast_slice_mut::<u32, u8>(&mut buf.words);
        bytes[offset * es..(offset + data.len()) * es].copy_from_slice(bytemuck::cast_slice(data));
        Ok(())
    }

    fn read<T: Pod>(&mut self, handle: BufferHandle, offset: usize, len: usize) -> Result<Vec<T>> {
        let buf = self.memory.get(handle)?;
        let es = std::mem::size_of::<T>();
        check_access(handle, buf.kind, buf.len, es, offset, len)?;
        let bytes = bytemuck::cast_slice::<u32, u8>(&buf.words);
        Ok(bytemuck::pod_collect_to_vec(&bytes[offset * es..(offset + len) * es]))
    }

    fn launch(&mut self, call: &KernelCall, range: NdRange) -> Result<CompletionToken> {
        let kernel = self
            .kernels
            .get(&call.kernel())
            .ok_or(PipelineError::UnknownKernel(call.kernel().name()))?;
        for h in call.buffers() {
            self.memory.get(h)?;
        }
        let mut ctx = KernelContext {
            memory: &mut self.memory,
            scales_per_octave: self.scales_per_octave,
        };
        kernel.run(&mut ctx, call, range)?;
        if self.record {
            self.history.push(LaunchRecord { call: call.clone(), range });
        }

        let token = self.next_token;
        self.next_token += 1;
        self.pending.insert(token);
        Ok(CompletionToken(token))
    }

    fn wait(&mut self, token: CompletionToken) -> Result<()> {
        if self.pending.remove(&token.0) {
            Ok(())
        } else {
            Err(PipelineError::Wait {
                token: token.0,
                message: "token unknown or already waited on".to_string(),
            })
        }
    }
}
