//! Ledger of acquired driver objects and their ordered release.

use crate::driver::{BufferId, ContextId, Driver, EventId, Handle, KernelId, ProgramId, QueueId};
use crate::error::ApiError;
use tracing::{debug, warn};

/// Every driver object a pipeline currently holds.
///
/// Slots are filled as objects are created and emptied as they are
/// released, so [`Resources::release_all`] can run at any point of a run
/// and any number of times.
#[derive(Debug, Default)]
pub struct Resources {
    pending: Option<EventId>,
    buffers: [Option<BufferId>; 3],
    kernel: Option<KernelId>,
    queue: Option<QueueId>,
    program: Option<ProgramId>,
    context: Option<ContextId>,
}

/// What one teardown pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub released: usize,
    pub failures: Vec<(Handle, ApiError)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_context(&mut self, id: ContextId) {
        self.context = Some(id);
    }

    pub fn track_program(&mut self, id: ProgramId) {
        self.program = Some(id);
    }

    pub fn track_kernel(&mut self, id: KernelId) {
        self.kernel = Some(id);
    }

    pub fn track_queue(&mut self, id: QueueId) {
        self.queue = Some(id);
    }

    /// Buffers `a`, `b`, `out`, in that order.
    pub fn track_buffers(&mut self, ids: [BufferId; 3]) {
        self.buffers = ids.map(Some);
    }

    /// Launch event that has not been waited on successfully yet.
    pub fn set_pending(&mut self, event: Option<EventId>) {
        self.pending = event;
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_none()
            && self.buffers.iter().all(Option::is_none)
            && self.kernel.is_none()
            && self.queue.is_none()
            && self.program.is_none()
            && self.context.is_none()
    }

    /// Release everything still held: a pending event first (after
    /// waiting on it), then the buffers, kernel, queue, program and context.
    ///
    /// Failures are logged and collected; teardown always runs to the end.
    pub fn release_all<D: Driver>(&mut self, driver: &mut D) -> TeardownReport {
        let mut report = TeardownReport::default();

        if let Some(event) = self.pending.take() {
            if let Err(e) = driver.wait_for_event(event) {
                warn!(%e, "pending launch failed during teardown");
            }
            release(driver, Handle::Event(event), &mut report);
        }

        let mut order: Vec<Handle> = Vec::with_capacity(7);
        order.extend(self.buffers.iter_mut().filter_map(Option::take).map(Handle::Buffer));
        order.extend(self.kernel.take().map(Handle::Kernel));
        order.extend(self.queue.take().map(Handle::Queue));
        order.extend(self.program.take().map(Handle::Program));
        order.extend(self.context.take().map(Handle::Context));

        for handle in order {
            release(driver, handle, &mut report);
        }
        debug!(released = report.released, failed = report.failures.len(), "teardown finished");
        report
    }
}

fn release<D: Driver>(driver: &mut D, handle: Handle, report: &mut TeardownReport) {
    match driver.release(handle) {
        Ok(()) => report.released += 1,
        Err(e) => {
            warn!(%handle, %e, "release failed");
            report.failures.push((handle, e));
        }
    }
}
