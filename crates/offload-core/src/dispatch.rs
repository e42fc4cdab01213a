//! Argument binding, kernel launch and completion.

use crate::buffer::BufferSet;
use crate::driver::{Driver, EventId, Handle, KernelArg, KernelId, QueueId};
use crate::error::{ApiError, OffloadError, Result, status};
use crate::state::{InFlight, Ready, State};
use std::{
    marker::PhantomData,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// Bind `count` to slot 0 and the `a`, `b`, `out` buffers to slots 1..=3.
pub fn bind_arguments<D: Driver, S: State>(
    driver: &mut D,
    kernel: KernelId,
    count: usize,
    buffers: &BufferSet<S>,
) -> Result<()> {
    let n = i32::try_from(count).map_err(|_| OffloadError::ArgumentBindingFailed {
        slot: 0,
        code: ApiError(status::CL_INVALID_ARG_VALUE),
    })?;

    let args = [
        KernelArg::Int(n),
        KernelArg::Buffer(buffers.a.id()),
        KernelArg::Buffer(buffers.b.id()),
        KernelArg::Buffer(buffers.out.id()),
    ];
    for (slot, arg) in (0u32..).zip(args) {
        driver
            .set_kernel_arg(kernel, slot, arg)
            .map_err(|code| OffloadError::ArgumentBindingFailed { slot, code })?;
    }
    Ok(())
}

/// One kernel launch. `Launch<InFlight>` must be waited on before the
/// output may be read.
#[derive(Debug)]
#[must_use = "a launch must be waited on"]
pub struct Launch<S: State> {
    event: Option<EventId>,
    started: Instant,
    _state: PhantomData<S>,
}

/// Launch `count` work-items over one dimension. A zero-sized launch is
/// not enqueued at all and completes immediately.
pub fn enqueue_launch<D: Driver>(
    driver: &mut D,
    queue: QueueId,
    kernel: KernelId,
    count: usize,
) -> Result<Launch<InFlight>> {
    let started = Instant::now();
    let event = if count == 0 {
        debug!("empty launch, nothing enqueued");
        None
    } else {
        let event = driver
            .enqueue_kernel(queue, kernel, count)
            .map_err(|code| OffloadError::DispatchFailed { code })?;
        debug!(global = count, event = event.raw(), "kernel enqueued");
        Some(event)
    };
    Ok(Launch { event, started, _state: PhantomData })
}

impl<S: State> Launch<S> {
    /// Completion event, while one is outstanding.
    pub fn event(&self) -> Option<EventId> {
        self.event
    }
}

impl Launch<InFlight> {
    /// Block until the device reports the launch complete.
    ///
    /// On failure the event is left alive so teardown can settle it.
    pub fn wait<D: Driver>(self, driver: &mut D) -> Result<Launch<Ready>> {
        if let Some(event) = self.event {
            driver
                .wait_for_event(event)
                .map_err(|code| OffloadError::WaitFailed { code })?;
            if let Err(e) = driver.release(Handle::Event(event)) {
                warn!(%e, "couldn't release completion event");
            }
        }
        Ok(Launch { event: None, started: self.started, _state: PhantomData })
    }
}

impl Launch<Ready> {
    /// Time since the launch was enqueued.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[cfg(test)]
    pub(crate) fn completed() -> Self {
        Launch { event: None, started: Instant::now(), _state: PhantomData }
    }
}
