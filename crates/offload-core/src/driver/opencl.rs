//! `opencl3`-backed driver.
//!
//! Objects live in per-kind tables keyed by handle id. Releasing a handle
//! removes it from its table and the `opencl3` wrapper's `Drop` calls the
//! matching `clRelease*`.

use super::{
    BufferId, ContextId, DeviceClass, DeviceId, DeviceInfo, Driver, EventId, Handle, KernelArg,
    KernelId, ProgramId, QueueId,
};
use crate::error::{ApiError, DriverResult, status::*};

use opencl3::{
    command_queue::CommandQueue,
    context::Context,
    device::{CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU, Device},
    event::Event,
    kernel::Kernel,
    memory::{Buffer, CL_MEM_READ_WRITE, ClMem},
    platform::get_platforms,
    program::Program,
    types::{CL_BLOCKING, cl_device_id, cl_int},
};
use std::{collections::HashMap, ptr};
use tracing::debug;

#[derive(Default)]
pub struct OpenClDriver {
    next_id: u64,
    devices: HashMap<u64, cl_device_id>,
    contexts: HashMap<u64, Context>,
    programs: HashMap<u64, Program>,
    kernels: HashMap<u64, Kernel>,
    queues: HashMap<u64, CommandQueue>,
    buffers: HashMap<u64, Buffer<u8>>,
    events: HashMap<u64, Event>,
}

impl std::fmt::Debug for OpenClDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClDriver")
            .field("devices", &self.devices.len())
            .field("buffers", &self.buffers.len())
            .finish_non_exhaustive()
    }
}

impl OpenClDriver {
    pub fn new() -> Self {
        Self { next_id: 1, ..Default::default() }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn device(&self, id: DeviceId) -> DriverResult<cl_device_id> {
        self.devices.get(&id.0).copied().ok_or(ApiError(CL_INVALID_DEVICE))
    }

    fn queue(&self, id: QueueId) -> DriverResult<&CommandQueue> {
        self.queues.get(&id.0).ok_or(ApiError(CL_INVALID_COMMAND_QUEUE))
    }
}

impl Driver for OpenClDriver {
    fn device_ids(&mut self, class: DeviceClass) -> DriverResult<Vec<DeviceId>> {
        let platforms = get_platforms()?;
        let Some(platform) = platforms.first() else {
            return Ok(Vec::new());
        };
        let kind = match class {
            DeviceClass::Gpu => CL_DEVICE_TYPE_GPU,
            DeviceClass::Cpu => CL_DEVICE_TYPE_CPU,
        };
        let raw = listed_or_none(platform.get_devices(kind).map_err(ApiError::from))?;
        if raw.is_empty() {
            debug!(%class, "platform has no devices of this class");
        }

        let mut ids = Vec::with_capacity(raw.len());
        for dev in raw {
            let known = self.devices.iter().find(|(_, d)| **d == dev).map(|(k, _)| *k);
            let id = match known {
                Some(id) => id,
                None => {
                    let id = self.alloc_id();
                    self.devices.insert(id, dev);
                    id
                }
            };
            ids.push(DeviceId(id));
        }
        Ok(ids)
    }

    fn device_info(&mut self, device: DeviceId) -> DriverResult<DeviceInfo> {
        let dev = Device::new(self.device(device)?);
        Ok(DeviceInfo {
            name: dev.name()?.trim().to_string(),
            vendor: dev.vendor()?.trim().to_string(),
            global_mem_size: dev.global_mem_size()?,
            max_work_group_size: dev.max_work_group_size()?,
        })
    }

    fn create_context(&mut self, device: DeviceId) -> DriverResult<ContextId> {
        let dev = Device::new(self.device(device)?);
        let context = Context::from_device(&dev)?;
        let id = self.alloc_id();
        self.contexts.insert(id, context);
        Ok(ContextId(id))
    }

    fn create_program(&mut self, context: ContextId, source: &str) -> DriverResult<ProgramId> {
        let ctx = self.contexts.get(&context.0).ok_or(ApiError(CL_INVALID_CONTEXT))?;
        let program = Program::create_from_source(ctx, source)?;
        let id = self.alloc_id();
        self.programs.insert(id, program);
        Ok(ProgramId(id))
    }

    fn build_program(
        &mut self,
        program: ProgramId,
        device: DeviceId,
        options: &str,
    ) -> DriverResult<()> {
        let dev = self.device(device)?;
        let prog = self.programs.get_mut(&program.0).ok_or(ApiError(CL_INVALID_PROGRAM))?;
        prog.build(&[dev], options)?;
        Ok(())
    }

    fn build_log(&mut self, program: ProgramId, device: DeviceId) -> DriverResult<String> {
        let dev = self.device(device)?;
        let prog = self.programs.get(&program.0).ok_or(ApiError(CL_INVALID_PROGRAM))?;
        Ok(prog.get_build_log(dev)?)
    }

    fn create_kernel(&mut self, program: ProgramId, name: &str) -> DriverResult<KernelId> {
        let prog = self.programs.get(&program.0).ok_or(ApiError(CL_INVALID_PROGRAM))?;
        let kernel = Kernel::create(prog, name)?;
        let id = self.alloc_id();
        self.kernels.insert(id, kernel);
        Ok(KernelId(id))
    }

    fn create_queue(&mut self, context: ContextId, device: DeviceId) -> DriverResult<QueueId> {
        let dev = self.device(device)?;
        let ctx = self.contexts.get(&context.0).ok_or(ApiError(CL_INVALID_CONTEXT))?;
        // in-order, no profiling
        #[allow(deprecated)]
        let queue = CommandQueue::create(ctx, dev, 0)?;
        let id = self.alloc_id();
        self.queues.insert(id, queue);
        Ok(QueueId(id))
    }

    fn create_buffer(&mut self, context: ContextId, bytes: usize) -> DriverResult<BufferId> {
        let ctx = self.contexts.get(&context.0).ok_or(ApiError(CL_INVALID_CONTEXT))?;
        // SAFETY: no host pointer is handed to the runtime.
        let buf = unsafe { Buffer::<u8>::create(ctx, CL_MEM_READ_WRITE, bytes, ptr::null_mut())? };
        let id = self.alloc_id();
        self.buffers.insert(id, buf);
        debug!(buffer = id, bytes, "clCreateBuffer");
        Ok(BufferId(id))
    }

    fn write_buffer(&mut self, queue: QueueId, buffer: BufferId, data: &[u8]) -> DriverResult<()> {
        let q = self.queues.get(&queue.0).ok_or(ApiError(CL_INVALID_COMMAND_QUEUE))?;
        let buf = self.buffers.get_mut(&buffer.0).ok_or(ApiError(CL_INVALID_MEM_OBJECT))?;
        // SAFETY: blocking write; `data` outlives the call.
        unsafe { q.enqueue_write_buffer(buf, CL_BLOCKING, 0, data, &[])? };
        Ok(())
    }

    fn read_buffer(&mut self, queue: QueueId, buffer: BufferId, out: &mut [u8]) -> DriverResult<()> {
        let q = self.queues.get(&queue.0).ok_or(ApiError(CL_INVALID_COMMAND_QUEUE))?;
        let buf = self.buffers.get_mut(&buffer.0).ok_or(ApiError(CL_INVALID_MEM_OBJECT))?;
        // SAFETY: blocking read; `out` outlives the call.
        unsafe { q.enqueue_read_buffer(buf, CL_BLOCKING, 0, out, &[])? };
        Ok(())
    }

    fn set_kernel_arg(&mut self, kernel: KernelId, index: u32, arg: KernelArg) -> DriverResult<()> {
        let k = self.kernels.get(&kernel.0).ok_or(ApiError(CL_INVALID_KERNEL))?;
        match arg {
            KernelArg::Int(v) => {
                let v: cl_int = v;
                // SAFETY: `v` is a plain `cl_int`; the runtime copies it.
                unsafe { k.set_arg(index, &v)? };
            }
            KernelArg::Buffer(id) => {
                let buf = self.buffers.get(&id.0).ok_or(ApiError(CL_INVALID_MEM_OBJECT))?;
                let mem = buf.get();
                // SAFETY: `mem` is a live cl_mem owned by this driver.
                unsafe { k.set_arg(index, &mem)? };
            }
        }
        Ok(())
    }

    fn enqueue_kernel(
        &mut self,
        queue: QueueId,
        kernel: KernelId,
        global_work_size: usize,
    ) -> DriverResult<EventId> {
        let q = self.queue(queue)?;
        let k = self.kernels.get(&kernel.0).ok_or(ApiError(CL_INVALID_KERNEL))?;
        let global = [global_work_size];
        // SAFETY: all arguments are bound to live objects; the driver picks the local size.
        let event = unsafe {
            q.enqueue_nd_range_kernel(k.get(), 1, ptr::null(), global.as_ptr(), ptr::null(), &[])?
        };
        let id = self.alloc_id();
        self.events.insert(id, event);
        Ok(EventId(id))
    }

    fn wait_for_event(&mut self, event: EventId) -> DriverResult<()> {
        let evt = self.events.get(&event.0).ok_or(ApiError(CL_INVALID_EVENT))?;
        evt.wait()?;
        Ok(())
    }

    fn release(&mut self, handle: Handle) -> DriverResult<()> {
        let found = match handle {
            Handle::Event(id) => self.events.remove(&id.0).map(drop).ok_or(CL_INVALID_EVENT),
            Handle::Buffer(id) => self.buffers.remove(&id.0).map(drop).ok_or(CL_INVALID_MEM_OBJECT),
            Handle::Kernel(id) => self.kernels.remove(&id.0).map(drop).ok_or(CL_INVALID_KERNEL),
            Handle::Queue(id) => self
                .queues
                .remove(&id.0)
                .map(drop)
                .ok_or(CL_INVALID_COMMAND_QUEUE),
            Handle::Program(id) => self.programs.remove(&id.0).map(drop).ok_or(CL_INVALID_PROGRAM),
            Handle::Context(id) => self.contexts.remove(&id.0).map(drop).ok_or(CL_INVALID_CONTEXT),
        };
        found.map_err(ApiError)
    }
}

/// ICDs report an absent device class as `CL_DEVICE_NOT_FOUND`; that is an
/// empty list, not a failure.
fn listed_or_none<T>(listed: DriverResult<Vec<T>>) -> DriverResult<Vec<T>> {
    match listed {
        Err(e) if e.code() == CL_DEVICE_NOT_FOUND => Ok(Vec::new()),
        other => other,
    }
}
