//! Device buffers and host↔device transfers.
//!
//! A [`DeviceBuffer`] only names a driver object; releasing it is the job of
//! [`Resources`](crate::teardown::Resources). The type-state parameter
//! records whether the host has defined its contents yet.

use crate::dispatch::Launch;
use crate::driver::{BufferId, ContextId, Driver, Handle, QueueId};
use crate::error::{ApiError, Direction, OffloadError, Result, status};
use crate::state::{Queued, Ready, State};
use std::marker::PhantomData;
use tracing::{debug, warn};

const ELEM: usize = std::mem::size_of::<i32>();

#[derive(Debug)]
pub struct DeviceBuffer<S: State> {
    id: BufferId,
    len: usize,
    _state: PhantomData<S>,
}

impl<S: State> DeviceBuffer<S> {
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Logical length in `i32` elements. The device allocation holds at
    /// least one element even when this is zero.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the device allocation in bytes.
    pub fn bytes(&self) -> usize {
        self.len.max(1) * ELEM
    }

    fn into_state<T: State>(self) -> DeviceBuffer<T> {
        DeviceBuffer { id: self.id, len: self.len, _state: PhantomData }
    }
}

/// Inputs `a`, `b` and the output buffer of one vector addition.
#[derive(Debug)]
pub struct BufferSet<S: State> {
    pub a: DeviceBuffer<S>,
    pub b: DeviceBuffer<S>,
    pub out: DeviceBuffer<S>,
}

impl<S: State> BufferSet<S> {
    pub fn ids(&self) -> [BufferId; 3] {
        [self.a.id, self.b.id, self.out.id]
    }
}

/// Allocate three read-write buffers of `count` elements.
///
/// Either all three exist afterwards or none do.
pub fn allocate_buffers<D: Driver>(
    driver: &mut D,
    context: ContextId,
    count: usize,
) -> Result<BufferSet<Queued>> {
    let bytes = count.max(1).checked_mul(ELEM).ok_or(OffloadError::AllocationFailed {
        which: "a",
        bytes: usize::MAX,
        code: ApiError(status::CL_INVALID_BUFFER_SIZE),
    })?;

    let mut made: Vec<BufferId> = Vec::with_capacity(3);
    for which in ["a", "b", "out"] {
        match driver.create_buffer(context, bytes) {
            Ok(id) => {
                debug!(which, bytes, buffer = id.raw(), "allocated device buffer");
                #[cfg(feature = "metrics")]
                crate::metrics::count_allocation(bytes);
                made.push(id);
            }
            Err(code) => {
                for id in made.into_iter().rev() {
                    if let Err(e) = driver.release(Handle::Buffer(id)) {
                        warn!(%e, buffer = id.raw(), "couldn't release buffer after failed allocation");
                    }
                }
                return Err(OffloadError::AllocationFailed { which, bytes, code });
            }
        }
    }

    let buffer = |id| DeviceBuffer { id, len: count, _state: PhantomData };
    Ok(BufferSet { a: buffer(made[0]), b: buffer(made[1]), out: buffer(made[2]) })
}

/// Copy `host_a` and `host_b` into the input buffers, blocking, A first.
pub fn upload_inputs<D: Driver>(
    driver: &mut D,
    queue: QueueId,
    buffers: BufferSet<Queued>,
    host_a: &[i32],
    host_b: &[i32],
) -> Result<BufferSet<Ready>> {
    for (which, host) in [("a", host_a), ("b", host_b)] {
        if host.len() != buffers.a.len {
            return Err(OffloadError::LengthMismatch {
                which,
                expected: buffers.a.len,
                actual: host.len(),
            });
        }
    }

    if !buffers.a.is_empty() {
        for (buf, host) in [(&buffers.a, host_a), (&buffers.b, host_b)] {
            driver
                .write_buffer(queue, buf.id, bytemuck::cast_slice(host))
                .map_err(|code| OffloadError::TransferFailed {
                    direction: Direction::HostToDevice,
                    code,
                })?;
        }
    }

    Ok(BufferSet {
        a: buffers.a.into_state(),
        b: buffers.b.into_state(),
        out: buffers.out.into_state(),
    })
}

/// Copy the whole output buffer back in one blocking read.
///
/// Only callable once the launch has been observed complete.
pub fn read_output<D: Driver>(
    driver: &mut D,
    queue: QueueId,
    _launch: &Launch<Ready>,
    out: &DeviceBuffer<Ready>,
    count: usize,
) -> Result<Vec<i32>> {
    let mut host = vec![0i32; count];
    if count == 0 {
        return Ok(host);
    }
    if count > out.len {
        return Err(OffloadError::LengthMismatch { which: "out", expected: out.len, actual: count });
    }
    driver
        .read_buffer(queue, out.id, bytemuck::cast_slice_mut(&mut host))
        .map_err(|code| OffloadError::TransferFailed { direction: Direction::DeviceToHost, code })?;
    Ok(host)
}
