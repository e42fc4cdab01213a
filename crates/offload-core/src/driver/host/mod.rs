//! Software OpenCL-like platform that runs kernels on the host thread.
//!
//! Kernel source goes through a small OpenCL C front-end; launches are
//! queued in order and executed when their event is waited on or when a
//! blocking transfer drains the queue. The driver is strict about object
//! lifetimes: releasing a context, program or queue that still has live
//! dependents fails instead of being silently deferred.
//!
//! Integer arithmetic follows OpenCL C: operands take their common type
//! (`int` < `uint` < `size_t`), results wrap to it and shift counts are
//! reduced modulo the operand width. Source nested deeper than 256
//! brackets fails to build, as it does with clang.

mod compiler;
mod exec;
mod lexer;

use super::{
    BufferId, ContextId, DeviceClass, DeviceId, DeviceInfo, Driver, EventId, Handle, KernelArg,
    KernelId, ProgramId, QueueId,
};
use crate::error::{ApiError, DriverResult, status::*};
use compiler::{KernelDef, Module, ParamKind};
use exec::Bound;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tracing::{debug, warn};

const DEFAULT_MEM_SIZE: u64 = 4 << 30;

#[derive(Debug, Clone)]
struct HostDevice {
    id: DeviceId,
    class: DeviceClass,
    info: DeviceInfo,
}

#[derive(Debug)]
struct HostContext {
    device: DeviceId,
    allocated: u64,
}

#[derive(Debug)]
struct HostProgram {
    context: ContextId,
    source: String,
    log: String,
    module: Option<Arc<Module>>,
}

#[derive(Debug)]
struct HostKernel {
    program: ProgramId,
    def: Arc<KernelDef>,
    args: Vec<Option<KernelArg>>,
}

#[derive(Debug)]
struct PendingLaunch {
    event: EventId,
    def: Arc<KernelDef>,
    args: Vec<KernelArg>,
    global: usize,
}

#[derive(Debug)]
struct HostQueue {
    context: ContextId,
    pending: VecDeque<PendingLaunch>,
}

#[derive(Debug)]
struct HostBuffer {
    context: ContextId,
    bytes: usize,
    /// Backing store in 4-byte words so kernels can view it as `int`.
    words: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventState {
    Queued,
    Complete,
    Failed(i32),
}

#[derive(Debug)]
struct HostEvent {
    queue: QueueId,
    state: EventState,
}

/// Emulated compute platform.
///
/// ```
/// use offload_core::driver::{DeviceClass, HostDriver};
///
/// let driver = HostDriver::empty()
///     .with_device(DeviceClass::Gpu, "emulated-gpu", 1 << 30)
///     .fail_allocation_at(3);
/// assert_eq!(driver.live_buffers(), 0);
/// ```
#[derive(Debug)]
pub struct HostDriver {
    devices: Vec<HostDevice>,
    failing_classes: Vec<DeviceClass>,
    fail_allocation_at: Option<usize>,
    fail_transfer_at: Option<usize>,
    fail_context: bool,

    next_id: u64,
    contexts: HashMap<u64, HostContext>,
    programs: HashMap<u64, HostProgram>,
    kernels: HashMap<u64, HostKernel>,
    queues: HashMap<u64, HostQueue>,
    buffers: HashMap<u64, HostBuffer>,
    events: HashMap<u64, HostEvent>,

    allocations: usize,
    transfers: usize,
    release_log: Vec<Handle>,
}

impl HostDriver {
    /// One CPU-class device named `host-cpu` with 4 GiB of memory.
    pub fn new() -> Self {
        Self::empty().with_device(DeviceClass::Cpu, "host-cpu", DEFAULT_MEM_SIZE)
    }

    /// A platform without any device.
    pub fn empty() -> Self {
        Self {
            devices: Vec::new(),
            failing_classes: Vec::new(),
            fail_allocation_at: None,
            fail_transfer_at: None,
            fail_context: false,
            next_id: 1,
            contexts: HashMap::new(),
            programs: HashMap::new(),
            kernels: HashMap::new(),
            queues: HashMap::new(),
            buffers: HashMap::new(),
            events: HashMap::new(),
            allocations: 0,
            transfers: 0,
            release_log: Vec::new(),
        }
    }

    pub fn with_device(mut self, class: DeviceClass, name: &str, global_mem_size: u64) -> Self {
        let id = DeviceId(self.devices.len() as u64 + 1);
        self.devices.push(HostDevice {
            id,
            class,
            info: DeviceInfo {
                name: name.to_string(),
                vendor: "offload-core host platform".to_string(),
                global_mem_size,
                max_work_group_size: 1024,
            },
        });
        self
    }

    /// Enumeration of `class` fails with `CL_DEVICE_NOT_FOUND`, as some
    /// ICDs do instead of returning an empty list.
    pub fn fail_enumeration(mut self, class: DeviceClass) -> Self {
        self.failing_classes.push(class);
        self
    }

    /// The `n`-th buffer allocation (1-based) fails with
    /// `CL_MEM_OBJECT_ALLOCATION_FAILURE`.
    pub fn fail_allocation_at(mut self, n: usize) -> Self {
        self.fail_allocation_at = Some(n);
        self
    }

    /// The `n`-th buffer read or write (1-based) fails with
    /// `CL_OUT_OF_RESOURCES`.
    pub fn fail_transfer_at(mut self, n: usize) -> Self {
        self.fail_transfer_at = Some(n);
        self
    }

    /// Every context creation fails with `CL_DEVICE_NOT_AVAILABLE`.
    pub fn fail_context_creation(mut self) -> Self {
        self.fail_context = true;
        self
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_objects(&self) -> usize {
        self.contexts.len()
            + self.programs.len()
            + self.kernels.len()
            + self.queues.len()
            + self.buffers.len()
            + self.events.len()
    }

    /// Number of `create_buffer` calls, successful or not.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Number of buffer reads and writes, successful or not.
    pub fn transfers(&self) -> usize {
        self.transfers
    }

    /// Successfully released handles, in release order.
    pub fn release_log(&self) -> &[Handle] {
        &self.release_log
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn device(&self, id: DeviceId) -> DriverResult<&HostDevice> {
        self.devices.iter().find(|d| d.id == id).ok_or(ApiError(CL_INVALID_DEVICE))
    }

    fn context_of_queue(&self, queue: QueueId) -> DriverResult<ContextId> {
        self.queues.get(&queue.0).map(|q| q.context).ok_or(ApiError(CL_INVALID_COMMAND_QUEUE))
    }

    fn count_transfer(&mut self) -> DriverResult<()> {
        self.transfers += 1;
        if self.fail_transfer_at == Some(self.transfers) {
            warn!(transfer = self.transfers, "injected transfer failure");
            return Err(ApiError(CL_OUT_OF_RESOURCES));
        }
        Ok(())
    }

    /// Execute queued launches in FIFO order, up to and including `until`
    /// (or everything when `until` is `None`).
    fn drain(&mut self, queue: QueueId, until: Option<EventId>) {
        loop {
            let Some(q) = self.queues.get_mut(&queue.0) else { return };
            let Some(launch) = q.pending.pop_front() else { return };
            let event = launch.event;
            let state = self.execute(&launch);
            if let Some(e) = self.events.get_mut(&event.0) {
                e.state = state;
            }
            if until == Some(event) {
                return;
            }
        }
    }

    fn execute(&mut self, launch: &PendingLaunch) -> EventState {
        // one memory slot per distinct buffer, so aliased arguments share storage
        let mut slots: Vec<BufferId> = Vec::new();
        let mut bound = Vec::with_capacity(launch.args.len());
        for arg in &launch.args {
            bound.push(match *arg {
                KernelArg::Int(v) => Bound::Scalar(v as i64),
                KernelArg::Buffer(id) => {
                    let slot = slots.iter().position(|b| *b == id).unwrap_or_else(|| {
                        slots.push(id);
                        slots.len() - 1
                    });
                    Bound::Memory(slot)
                }
            });
        }

        let mut memory = Vec::with_capacity(slots.len());
        for id in &slots {
            match self.buffers.get_mut(&id.0) {
                Some(buf) => memory.push(std::mem::take(&mut buf.words)),
                None => {
                    self.restore(&slots, memory);
                    return EventState::Failed(CL_INVALID_MEM_OBJECT);
                }
            }
        }

        let result = exec::run(&launch.def, &bound, &mut memory, launch.global);
        self.restore(&slots, memory);

        match result {
            Ok(()) => {
                debug!(kernel = %launch.def.name, lanes = launch.global, "host launch complete");
                EventState::Complete
            }
            Err(fault) => {
                warn!(kernel = %launch.def.name, ?fault, "host launch faulted");
                EventState::Failed(CL_OUT_OF_RESOURCES)
            }
        }
    }

    fn restore(&mut self, slots: &[BufferId], memory: Vec<Vec<i32>>) {
        for (id, words) in slots.iter().zip(memory) {
            if let Some(buf) = self.buffers.get_mut(&id.0) {
                buf.words = words;
            }
        }
    }

    fn buffer_in_flight(&self, id: BufferId) -> bool {
        self.queues.values().flat_map(|q| &q.pending).any(|l| {
            l.args.iter().any(|a| *a == KernelArg::Buffer(id))
        })
    }
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for HostDriver {
    fn device_ids(&mut self, class: DeviceClass) -> DriverResult<Vec<DeviceId>> {
        if self.failing_classes.contains(&class) {
            return Err(ApiError(CL_DEVICE_NOT_FOUND));
        }
        Ok(self.devices.iter().filter(|d| d.class == class).map(|d| d.id).collect())
    }

    fn device_info(&mut self, device: DeviceId) -> DriverResult<DeviceInfo> {
        self.device(device).map(|d| d.info.clone())
    }

    fn create_context(&mut self, device: DeviceId) -> DriverResult<ContextId> {
        self.device(device)?;
        if self.fail_context {
            return Err(ApiError(CL_DEVICE_NOT_AVAILABLE));
        }
        let id = self.alloc_id();
        self.contexts.insert(id, HostContext { device, allocated: 0 });
        Ok(ContextId(id))
    }

    fn create_program(&mut self, context: ContextId, source: &str) -> DriverResult<ProgramId> {
        if !self.contexts.contains_key(&context.0) {
            return Err(ApiError(CL_INVALID_CONTEXT));
        }
        let id = self.alloc_id();
        self.programs.insert(
            id,
            HostProgram {
                context,
                source: source.to_string(),
                log: String::new(),
                module: None,
            },
        );
        Ok(ProgramId(id))
    }

    fn build_program(
        &mut self,
        program: ProgramId,
        device: DeviceId,
        options: &str,
    ) -> DriverResult<()> {
        let ctx = self.programs.get(&program.0).ok_or(ApiError(CL_INVALID_PROGRAM))?.context;
        let ctx_device = self.contexts.get(&ctx.0).map(|c| c.device);
        if ctx_device != Some(device) {
            return Err(ApiError(CL_INVALID_DEVICE));
        }
        if !options.trim().is_empty() {
            debug!(options, "host compiler ignores build options");
        }
        let Some(prog) = self.programs.get_mut(&program.0) else {
            return Err(ApiError(CL_INVALID_PROGRAM));
        };
        let out = compiler::compile(&prog.source);
        prog.log = out.log;
        prog.module = out.module.map(Arc::new);
        if prog.module.is_some() {
            Ok(())
        } else {
            Err(ApiError(CL_BUILD_PROGRAM_FAILURE))
        }
    }

    fn build_log(&mut self, program: ProgramId, device: DeviceId) -> DriverResult<String> {
        self.device(device)?;
        self.programs.get(&program.0).map(|p| p.log.clone()).ok_or(ApiError(CL_INVALID_PROGRAM))
    }

    fn create_kernel(&mut self, program: ProgramId, name: &str) -> DriverResult<KernelId> {
        let prog = self.programs.get(&program.0).ok_or(ApiError(CL_INVALID_PROGRAM))?;
        let module = prog.module.as_ref().ok_or(ApiError(CL_INVALID_PROGRAM_EXECUTABLE))?;
        let def = module.kernel(name).cloned().ok_or(ApiError(CL_INVALID_KERNEL_NAME))?;
        let args = vec![None; def.params.len()];
        let id = self.alloc_id();
        self.kernels.insert(id, HostKernel { program, def, args });
        Ok(KernelId(id))
    }

    fn create_queue(&mut self, context: ContextId, device: DeviceId) -> DriverResult<QueueId> {
        let ctx = self.contexts.get(&context.0).ok_or(ApiError(CL_INVALID_CONTEXT))?;
        if ctx.device != device {
            return Err(ApiError(CL_INVALID_DEVICE));
        }
        let id = self.alloc_id();
        self.queues.insert(id, HostQueue { context, pending: VecDeque::new() });
        Ok(QueueId(id))
    }

    fn create_buffer(&mut self, context: ContextId, bytes: usize) -> DriverResult<BufferId> {
        self.allocations += 1;
        let limit = {
            let ctx = self.contexts.get(&context.0).ok_or(ApiError(CL_INVALID_CONTEXT))?;
            self.device(ctx.device)?.info.global_mem_size
        };
        if bytes == 0 {
            return Err(ApiError(CL_INVALID_BUFFER_SIZE));
        }
        if self.fail_allocation_at == Some(self.allocations) {
            return Err(ApiError(CL_MEM_OBJECT_ALLOCATION_FAILURE));
        }
        let Some(ctx) = self.contexts.get_mut(&context.0) else {
            return Err(ApiError(CL_INVALID_CONTEXT));
        };
        if ctx.allocated.saturating_add(bytes as u64) > limit {
            return Err(ApiError(CL_MEM_OBJECT_ALLOCATION_FAILURE));
        }

        let mut words = Vec::new();
        words
            .try_reserve_exact(bytes.div_ceil(4))
            .map_err(|_| ApiError(CL_OUT_OF_HOST_MEMORY))?;
        words.resize(bytes.div_ceil(4), 0);

        ctx.allocated += bytes as u64;
        let id = self.alloc_id();
        self.buffers.insert(id, HostBuffer { context, bytes, words });
        Ok(BufferId(id))
    }

    fn write_buffer(&mut self, queue: QueueId, buffer: BufferId, data: &[u8]) -> DriverResult<()> {
        let qctx = self.context_of_queue(queue)?;
        self.count_transfer()?;
        self.drain(queue, None);
        let buf = self.buffers.get_mut(&buffer.0).ok_or(ApiError(CL_INVALID_MEM_OBJECT))?;
        if buf.context != qctx {
            return Err(ApiError(CL_INVALID_CONTEXT));
        }
        if data.len() > buf.bytes {
            return Err(ApiError(CL_INVALID_VALUE));
        }
        bytemuck::cast_slice_mut::<i32, u8>(&mut buf.words)[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, queue: QueueId, buffer: BufferId, out: &mut [u8]) -> DriverResult<()> {
        let qctx = self.context_of_queue(queue)?;
        self.count_transfer()?;
        self.drain(queue, None);
        let buf = self.buffers.get(&buffer.0).ok_or(ApiError(CL_INVALID_MEM_OBJECT))?;
        if buf.context != qctx {
            return Err(ApiError(CL_INVALID_CONTEXT));
        }
        if out.len() > buf.bytes {
            return Err(ApiError(CL_INVALID_VALUE));
        }
        out.copy_from_slice(&bytemuck::cast_slice::<i32, u8>(&buf.words)[..out.len()]);
        Ok(())
    }

    fn set_kernel_arg(&mut self, kernel: KernelId, index: u32, arg: KernelArg) -> DriverResult<()> {
        let buffer_live = match arg {
            KernelArg::Buffer(id) => self.buffers.contains_key(&id.0),
            KernelArg::Int(_) => true,
        };
        let k = self.kernels.get_mut(&kernel.0).ok_or(ApiError(CL_INVALID_KERNEL))?;
        let param = k.def.params.get(index as usize).ok_or(ApiError(CL_INVALID_ARG_INDEX))?;
        match (param.kind, arg) {
            (ParamKind::Scalar { ty, .. }, KernelArg::Int(_)) if ty.size() != 4 => {
                return Err(ApiError(CL_INVALID_ARG_SIZE));
            }
            (ParamKind::Scalar { .. }, KernelArg::Int(_)) => {}
            (ParamKind::Scalar { .. }, KernelArg::Buffer(_)) => {
                return Err(ApiError(CL_INVALID_ARG_VALUE));
            }
            // sizeof(int) != sizeof(cl_mem)
            (ParamKind::Pointer { .. }, KernelArg::Int(_)) => {
                return Err(ApiError(CL_INVALID_ARG_SIZE));
            }
            (ParamKind::Pointer { .. }, KernelArg::Buffer(_)) if !buffer_live => {
                return Err(ApiError(CL_INVALID_MEM_OBJECT));
            }
            (ParamKind::Pointer { .. }, KernelArg::Buffer(_)) => {}
        }
        k.args[index as usize] = Some(arg);
        Ok(())
    }

    fn enqueue_kernel(
        &mut self,
        queue: QueueId,
        kernel: KernelId,
        global_work_size: usize,
    ) -> DriverResult<EventId> {
        let qctx = self.context_of_queue(queue)?;
        let k = self.kernels.get(&kernel.0).ok_or(ApiError(CL_INVALID_KERNEL))?;
        let kctx = self.programs.get(&k.program.0).map(|p| p.context);
        if kctx != Some(qctx) {
            return Err(ApiError(CL_INVALID_CONTEXT));
        }
        if global_work_size == 0 {
            return Err(ApiError(CL_INVALID_GLOBAL_WORK_SIZE));
        }
        let args: Vec<KernelArg> = k
            .args
            .iter()
            .copied()
            .collect::<Option<_>>()
            .ok_or(ApiError(CL_INVALID_KERNEL_ARGS))?;
        let stale = args.iter().any(|a| match a {
            KernelArg::Buffer(id) => !self.buffers.contains_key(&id.0),
            KernelArg::Int(_) => false,
        });
        if stale {
            return Err(ApiError(CL_INVALID_MEM_OBJECT));
        }
        let def = Arc::clone(&k.def);

        let id = EventId(self.alloc_id());
        self.events.insert(id.0, HostEvent { queue, state: EventState::Queued });
        if let Some(q) = self.queues.get_mut(&queue.0) {
            q.pending.push_back(PendingLaunch { event: id, def, args, global: global_work_size });
        }
        Ok(id)
    }

    fn wait_for_event(&mut self, event: EventId) -> DriverResult<()> {
        let e = self.events.get(&event.0).ok_or(ApiError(CL_INVALID_EVENT))?;
        if e.state == EventState::Queued {
            let queue = e.queue;
            self.drain(queue, Some(event));
        }
        match self.events.get(&event.0).map(|e| e.state) {
            Some(EventState::Complete) => Ok(()),
            Some(EventState::Failed(_)) => Err(ApiError(CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST)),
            // queue went away before the launch ran
            Some(EventState::Queued) | None => Err(ApiError(CL_INVALID_EVENT)),
        }
    }

    fn release(&mut self, handle: Handle) -> DriverResult<()> {
        match handle {
            Handle::Event(id) => {
                self.events.remove(&id.0).ok_or(ApiError(CL_INVALID_EVENT))?;
            }
            Handle::Buffer(id) => {
                if !self.buffers.contains_key(&id.0) {
                    return Err(ApiError(CL_INVALID_MEM_OBJECT));
                }
                if self.buffer_in_flight(id) {
                    return Err(ApiError(CL_INVALID_MEM_OBJECT));
                }
                if let Some(buf) = self.buffers.remove(&id.0) {
                    if let Some(ctx) = self.contexts.get_mut(&buf.context.0) {
                        ctx.allocated = ctx.allocated.saturating_sub(buf.bytes as u64);
                    }
                }
            }
            Handle::Kernel(id) => {
                self.kernels.remove(&id.0).ok_or(ApiError(CL_INVALID_KERNEL))?;
            }
            Handle::Queue(id) => {
                if !self.queues.contains_key(&id.0) {
                    return Err(ApiError(CL_INVALID_COMMAND_QUEUE));
                }
                // clReleaseCommandQueue flushes outstanding work
                self.drain(id, None);
                if self.events.values().any(|e| e.queue == id) {
                    return Err(ApiError(CL_INVALID_COMMAND_QUEUE));
                }
                self.queues.remove(&id.0);
            }
            Handle::Program(id) => {
                if !self.programs.contains_key(&id.0) {
                    return Err(ApiError(CL_INVALID_PROGRAM));
                }
                if self.kernels.values().any(|k| k.program == id) {
                    return Err(ApiError(CL_INVALID_PROGRAM));
                }
                self.programs.remove(&id.0);
            }
            Handle::Context(id) => {
                if !self.contexts.contains_key(&id.0) {
                    return Err(ApiError(CL_INVALID_CONTEXT));
                }
                let has_dependents = self.programs.values().any(|p| p.context == id)
                    || self.queues.values().any(|q| q.context == id)
                    || self.buffers.values().any(|b| b.context == id);
                if has_dependents {
                    return Err(ApiError(CL_INVALID_CONTEXT));
                }
                self.contexts.remove(&id.0);
            }
        }
        self.release_log.push(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD: &str = "__kernel void add(int n, __global int* a, __global int* b, __global int* c) {
        int i = get_global_id(0);
        if (i < n) c[i] = a[i] + b[i];
    }";

    struct Setup {
        ctx: ContextId,
        queue: QueueId,
        program: ProgramId,
        kernel: KernelId,
    }

    fn setup(d: &mut HostDriver, src: &str) -> Setup {
        let dev = d.device_ids(DeviceClass::Cpu).unwrap()[0];
        let ctx = d.create_context(dev).unwrap();
        let program = d.create_program(ctx, src).unwrap();
        d.build_program(program, dev, "").unwrap();
        let kernel = d.create_kernel(program, "add").unwrap();
        let queue = d.create_queue(ctx, dev).unwrap();
        Setup { ctx, queue, program, kernel }
    }

    #[test]
    fn enumeration_by_class_and_failure() {
        let mut d = HostDriver::new()
            .with_device(DeviceClass::Gpu, "gpu0", 1 << 20)
            .fail_enumeration(DeviceClass::Gpu);
        assert_eq!(d.device_ids(DeviceClass::Gpu), Err(ApiError(CL_DEVICE_NOT_FOUND)));
        assert_eq!(d.device_ids(DeviceClass::Cpu).unwrap().len(), 1);
    }

    #[test]
    fn kernel_runs_on_wait() {
        let mut d = HostDriver::new();
        let s = setup(&mut d, ADD);
        let bufs: Vec<_> = (0..3).map(|_| d.create_buffer(s.ctx, 12).unwrap()).collect();
        d.write_buffer(s.queue, bufs[0], bytemuck::cast_slice(&[1i32, 2, 3])).unwrap();
        d.write_buffer(s.queue, bufs[1], bytemuck::cast_slice(&[4i32, 5, 6])).unwrap();
        d.set_kernel_arg(s.kernel, 0, KernelArg::Int(3)).unwrap();
        for (i, b) in bufs.iter().enumerate() {
            d.set_kernel_arg(s.kernel, i as u32 + 1, KernelArg::Buffer(*b)).unwrap();
        }
        let evt = d.enqueue_kernel(s.queue, s.kernel, 3).unwrap();
        // launch has not run yet
        assert!(d.buffer_in_flight(bufs[2]));
        d.wait_for_event(evt).unwrap();
        assert!(!d.buffer_in_flight(bufs[2]));

        let mut out = [0i32; 3];
        d.read_buffer(s.queue, bufs[2], bytemuck::cast_slice_mut(&mut out)).unwrap();
        assert_eq!(out, [5, 7, 9]);
    }

    #[test]
    fn blocking_read_drains_queue() {
        let mut d = HostDriver::new();
        let s = setup(&mut d, ADD);
        let bufs: Vec<_> = (0..3).map(|_| d.create_buffer(s.ctx, 4).unwrap()).collect();
        d.write_buffer(s.queue, bufs[0], bytemuck::cast_slice(&[2i32])).unwrap();
        d.write_buffer(s.queue, bufs[1], bytemuck::cast_slice(&[3i32])).unwrap();
        d.set_kernel_arg(s.kernel, 0, KernelArg::Int(1)).unwrap();
        for (i, b) in bufs.iter().enumerate() {
            d.set_kernel_arg(s.kernel, i as u32 + 1, KernelArg::Buffer(*b)).unwrap();
        }
        d.enqueue_kernel(s.queue, s.kernel, 1).unwrap();
        let mut out = [0i32; 1];
        d.read_buffer(s.queue, bufs[2], bytemuck::cast_slice_mut(&mut out)).unwrap();
        assert_eq!(out, [5]);
    }

    #[test]
    fn argument_checks() {
        let mut d = HostDriver::new();
        let s = setup(&mut d, ADD);
        let buf = d.create_buffer(s.ctx, 4).unwrap();
        assert_eq!(d.set_kernel_arg(s.kernel, 0, KernelArg::Buffer(buf)), Err(ApiError(CL_INVALID_ARG_VALUE)));
        assert_eq!(d.set_kernel_arg(s.kernel, 1, KernelArg::Int(1)), Err(ApiError(CL_INVALID_ARG_SIZE)));
        assert_eq!(d.set_kernel_arg(s.kernel, 4, KernelArg::Int(1)), Err(ApiError(CL_INVALID_ARG_INDEX)));
        assert_eq!(
            d.set_kernel_arg(s.kernel, 1, KernelArg::Buffer(BufferId(9999))),
            Err(ApiError(CL_INVALID_MEM_OBJECT))
        );
        // slots 1..3 still unbound
        d.set_kernel_arg(s.kernel, 0, KernelArg::Int(1)).unwrap();
        assert_eq!(d.enqueue_kernel(s.queue, s.kernel, 1), Err(ApiError(CL_INVALID_KERNEL_ARGS)));
    }

    #[test]
    fn lane_fault_fails_the_event() {
        let src = "__kernel void add(__global int* a) { a[get_global_id(0) * 2] = 1; }";
        let mut d = HostDriver::new();
        let s = setup(&mut d, src);
        let buf = d.create_buffer(s.ctx, 8).unwrap();
        d.set_kernel_arg(s.kernel, 0, KernelArg::Buffer(buf)).unwrap();
        let evt = d.enqueue_kernel(s.queue, s.kernel, 2).unwrap();
        assert_eq!(
            d.wait_for_event(evt),
            Err(ApiError(CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST))
        );
    }

    #[test]
    fn build_failure_keeps_log_and_blocks_kernels() {
        let mut d = HostDriver::new();
        let dev = d.device_ids(DeviceClass::Cpu).unwrap()[0];
        let ctx = d.create_context(dev).unwrap();
        let program = d.create_program(ctx, "__kernel void add( {").unwrap();
        assert_eq!(d.build_program(program, dev, ""), Err(ApiError(CL_BUILD_PROGRAM_FAILURE)));
        assert!(d.build_log(program, dev).unwrap().contains("error:"));
        assert_eq!(d.create_kernel(program, "add"), Err(ApiError(CL_INVALID_PROGRAM_EXECUTABLE)));
    }

    #[test]
    fn release_rejects_live_dependents() {
        let mut d = HostDriver::new();
        let s = setup(&mut d, ADD);
        let buf = d.create_buffer(s.ctx, 4).unwrap();

        assert_eq!(d.release(Handle::Context(s.ctx)), Err(ApiError(CL_INVALID_CONTEXT)));
        assert_eq!(d.release(Handle::Program(s.program)), Err(ApiError(CL_INVALID_PROGRAM)));

        for h in [
            Handle::Buffer(buf),
            Handle::Kernel(s.kernel),
            Handle::Queue(s.queue),
            Handle::Program(s.program),
            Handle::Context(s.ctx),
        ] {
            d.release(h).unwrap();
        }
        assert_eq!(d.live_objects(), 0);
        assert_eq!(d.release(Handle::Buffer(buf)), Err(ApiError(CL_INVALID_MEM_OBJECT)));
        assert_eq!(d.release_log().len(), 5);
    }

    #[test]
    fn memory_limit_and_injected_failure() {
        let mut d = HostDriver::empty()
            .with_device(DeviceClass::Cpu, "tiny", 16)
            .fail_allocation_at(2);
        let dev = d.device_ids(DeviceClass::Cpu).unwrap()[0];
        let ctx = d.create_context(dev).unwrap();
        let first = d.create_buffer(ctx, 8).unwrap();
        assert_eq!(d.create_buffer(ctx, 4), Err(ApiError(CL_MEM_OBJECT_ALLOCATION_FAILURE)));
        assert_eq!(d.create_buffer(ctx, 12), Err(ApiError(CL_MEM_OBJECT_ALLOCATION_FAILURE)));
        d.release(Handle::Buffer(first)).unwrap();
        assert!(d.create_buffer(ctx, 12).is_ok());
        assert_eq!(d.create_buffer(ctx, 0), Err(ApiError(CL_INVALID_BUFFER_SIZE)));
        assert_eq!(d.allocations(), 5);
    }

    #[test]
    fn injected_transfer_failure_hits_only_the_nth() {
        let mut d = HostDriver::new().fail_transfer_at(2);
        let s = setup(&mut d, ADD);
        let buf = d.create_buffer(s.ctx, 8).unwrap();
        d.write_buffer(s.queue, buf, &[1; 8]).unwrap();
        assert_eq!(d.write_buffer(s.queue, buf, &[2; 8]), Err(ApiError(CL_OUT_OF_RESOURCES)));
        let mut out = [0u8; 8];
        d.read_buffer(s.queue, buf, &mut out).unwrap();
        // the failed write left the buffer untouched
        assert_eq!(out, [1; 8]);
        assert_eq!(d.transfers(), 3);
    }
}
