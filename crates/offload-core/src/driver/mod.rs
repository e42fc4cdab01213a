//! Device API seam.
//!
//! The pipeline talks to the compute runtime only through [`Driver`].
//! Handles are plain ids; the driver owns the underlying objects until
//! [`Driver::release`] is called for them.

pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;

use crate::error::DriverResult;
use std::fmt;

pub use host::HostDriver;
#[cfg(feature = "opencl")]
pub use opencl::OpenClDriver;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            #[inline]
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

handle!(
    /// One physical or logical compute device.
    DeviceId
);
handle!(ContextId);
handle!(ProgramId);
handle!(KernelId);
handle!(QueueId);
handle!(BufferId);
handle!(
    /// Completion event of an enqueued kernel launch.
    EventId
);

/// Any releasable driver object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle {
    Event(EventId),
    Buffer(BufferId),
    Kernel(KernelId),
    Queue(QueueId),
    Program(ProgramId),
    Context(ContextId),
}

impl Handle {
    pub fn kind(&self) -> &'static str {
        match self {
            Handle::Event(_) => "event",
            Handle::Buffer(_) => "buffer",
            Handle::Kernel(_) => "kernel",
            Handle::Queue(_) => "queue",
            Handle::Program(_) => "program",
            Handle::Context(_) => "context",
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = match *self {
            Handle::Event(h) => h.raw(),
            Handle::Buffer(h) => h.raw(),
            Handle::Kernel(h) => h.raw(),
            Handle::Queue(h) => h.raw(),
            Handle::Program(h) => h.raw(),
            Handle::Context(h) => h.raw(),
        };
        write!(f, "{}#{raw}", self.kind())
    }
}

/// Device classes the selector knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// Accelerator-class device (`CL_DEVICE_TYPE_GPU`).
    Gpu,
    /// General-purpose processor (`CL_DEVICE_TYPE_CPU`).
    Cpu,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceClass::Gpu => "GPU",
            DeviceClass::Cpu => "CPU",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub global_mem_size: u64,
    pub max_work_group_size: usize,
}

impl DeviceInfo {
    pub(crate) fn unknown() -> Self {
        Self {
            name: "<unknown device>".to_string(),
            vendor: String::new(),
            global_mem_size: 0,
            max_work_group_size: 1,
        }
    }
}

/// Value bound to one kernel argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelArg {
    /// 32-bit `int` scalar.
    Int(i32),
    /// Global memory object.
    Buffer(BufferId),
}

/// Minimal device runtime interface used by the dispatch pipeline.
///
/// `write_buffer` and `read_buffer` are blocking: the call returns once
/// the copy has completed. `enqueue_kernel` is asynchronous and hands back
/// an event that must be waited on with [`Driver::wait_for_event`].
pub trait Driver {
    /// Device ids of the given class on the default platform.
    fn device_ids(&mut self, class: DeviceClass) -> DriverResult<Vec<DeviceId>>;
    fn device_info(&mut self, device: DeviceId) -> DriverResult<DeviceInfo>;

    fn create_context(&mut self, device: DeviceId) -> DriverResult<ContextId>;

    fn create_program(&mut self, context: ContextId, source: &str) -> DriverResult<ProgramId>;
    fn build_program(
        &mut self,
        program: ProgramId,
        device: DeviceId,
        options: &str,
    ) -> DriverResult<()>;
    fn build_log(&mut self, program: ProgramId, device: DeviceId) -> DriverResult<String>;

    fn create_kernel(&mut self, program: ProgramId, name: &str) -> DriverResult<KernelId>;
    fn create_queue(&mut self, context: ContextId, device: DeviceId) -> DriverResult<QueueId>;
    fn create_buffer(&mut self, context: ContextId, bytes: usize) -> DriverResult<BufferId>;

    fn write_buffer(&mut self, queue: QueueId, buffer: BufferId, data: &[u8])
        -> DriverResult<()>;
    fn read_buffer(&mut self, queue: QueueId, buffer: BufferId, out: &mut [u8])
        -> DriverResult<()>;

    fn set_kernel_arg(&mut self, kernel: KernelId, index: u32, arg: KernelArg)
        -> DriverResult<()>;
    /// One-dimensional launch; the local size is left to the driver.
    fn enqueue_kernel(
        &mut self,
        queue: QueueId,
        kernel: KernelId,
        global_work_size: usize,
    ) -> DriverResult<EventId>;
    fn wait_for_event(&mut self, event: EventId) -> DriverResult<()>;

    fn release(&mut self, handle: Handle) -> DriverResult<()>;
}

impl<D: Driver + ?Sized> Driver for &mut D {
    fn device_ids(&mut self, class: DeviceClass) -> DriverResult<Vec<DeviceId>> {
        (**self).device_ids(class)
    }
    fn device_info(&mut self, device: DeviceId) -> DriverResult<DeviceInfo> {
        (**self).device_info(device)
    }
    fn create_context(&mut self, device: DeviceId) -> DriverResult<ContextId> {
        (**self).create_context(device)
    }
    fn create_program(&mut self, context: ContextId, source: &str) -> DriverResult<ProgramId> {
        (**self).create_program(context, source)
    }
    fn build_program(
        &mut self,
        program: ProgramId,
        device: DeviceId,
        options: &str,
    ) -> DriverResult<()> {
        (**self).build_program(program, device, options)
    }
    fn build_log(&mut self, program: ProgramId, device: DeviceId) -> DriverResult<String> {
        (**self).build_log(program, device)
    }
    fn create_kernel(&mut self, program: ProgramId, name: &str) -> DriverResult<KernelId> {
        (**self).create_kernel(program, name)
    }
    fn create_queue(&mut self, context: ContextId, device: DeviceId) -> DriverResult<QueueId> {
        (**self).create_queue(context, device)
    }
    fn create_buffer(&mut self, context: ContextId, bytes: usize) -> DriverResult<BufferId> {
        (**self).create_buffer(context, bytes)
    }
    fn write_buffer(
        &mut self,
        queue: QueueId,
        buffer: BufferId,
        data: &[u8],
    ) -> DriverResult<()> {
        (**self).write_buffer(queue, buffer, data)
    }
    fn read_buffer(
        &mut self,
        queue: QueueId,
        buffer: BufferId,
        out: &mut [u8],
    ) -> DriverResult<()> {
        (**self).read_buffer(queue, buffer, out)
    }
    fn set_kernel_arg(
        &mut self,
        kernel: KernelId,
        index: u32,
        arg: KernelArg,
    ) -> DriverResult<()> {
        (**self).set_kernel_arg(kernel, index, arg)
    }
    fn enqueue_kernel(
        &mut self,
        queue: QueueId,
        kernel: KernelId,
        global_work_size: usize,
    ) -> DriverResult<EventId> {
        (**self).enqueue_kernel(queue, kernel, global_work_size)
    }
    fn wait_for_event(&mut self, event: EventId) -> DriverResult<()> {
        (**self).wait_for_event(event)
    }
    fn release(&mut self, handle: Handle) -> DriverResult<()> {
        (**self).release(handle)
    }
}
