//! One complete offload: setup, transfer, launch, readback, teardown.

use crate::buffer::{allocate_buffers, read_output, upload_inputs};
use crate::config::PipelineConfig;
use crate::device::{SelectedDevice, select_device};
use crate::dispatch::{bind_arguments, enqueue_launch};
use crate::driver::{ContextId, Driver, KernelId, QueueId};
use crate::error::{OffloadError, Result};
use crate::program::{build_program, create_context, create_queue, resolve_kernel};
use crate::teardown::{Resources, TeardownReport};
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use crate::metrics::record;
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Result of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub output: Vec<i32>,
    /// Enqueue to end of readback.
    pub elapsed: Duration,
    pub device: SelectedDevice,
    pub teardown: TeardownReport,
}

/// A device, context, built kernel and queue, ready for one run.
///
/// Dropping a pipeline without calling [`run`](Pipeline::run) or
/// [`close`](Pipeline::close) still releases everything it holds.
#[derive(Debug)]
pub struct Pipeline<D: Driver> {
    driver: D,
    resources: Resources,
    device: SelectedDevice,
    context: ContextId,
    kernel: KernelId,
    queue: QueueId,
}

impl<D: Driver> Pipeline<D> {
    /// Select a device and prepare the kernel named by `config`.
    pub fn new(mut driver: D, config: &PipelineConfig) -> Result<Self> {
        let mut resources = Resources::new();
        match Self::setup(&mut driver, &mut resources, config) {
            Ok((device, context, kernel, queue)) => Ok(Self {
                driver,
                resources,
                device,
                context,
                kernel,
                queue,
            }),
            Err(e) => {
                let report = resources.release_all(&mut driver);
                debug!(released = report.released, "released partial setup");
                Err(e)
            }
        }
    }

    fn setup(
        driver: &mut D,
        resources: &mut Resources,
        config: &PipelineConfig,
    ) -> Result<(SelectedDevice, ContextId, KernelId, QueueId)> {
        let device = select_device(driver)?;

        let context = create_context(driver, device.id)?;
        resources.track_context(context);

        let program = build_program(
            driver,
            context,
            device.id,
            &config.kernel_path,
            &config.build_options,
        )?;
        resources.track_program(program);

        let kernel = resolve_kernel(driver, program, &config.entry_point)?;
        resources.track_kernel(kernel);

        let queue = create_queue(driver, context, device.id)?;
        resources.track_queue(queue);

        info!(entry = %config.entry_point, path = %config.kernel_path.display(), "pipeline ready");
        Ok((device, context, kernel, queue))
    }

    pub fn device(&self) -> &SelectedDevice {
        &self.device
    }

    /// Compute `a[i] + b[i]` on the device and release everything.
    pub fn run(mut self, a: &[i32], b: &[i32]) -> Result<RunOutput> {
        let (output, elapsed) = self.execute(a, b)?;
        let teardown = self.close_inner();
        Ok(RunOutput { output, elapsed, device: self.device.clone(), teardown })
    }

    fn execute(&mut self, a: &[i32], b: &[i32]) -> Result<(Vec<i32>, Duration)> {
        if a.len() != b.len() {
            return Err(OffloadError::LengthMismatch { which: "b", expected: a.len(), actual: b.len() });
        }
        let count = a.len();
        let driver = &mut self.driver;

        #[cfg(feature = "metrics")]
        let t = Instant::now();
        let buffers = allocate_buffers(driver, self.context, count)?;
        self.resources.track_buffers(buffers.ids());
        #[cfg(feature = "metrics")]
        record("allocate", t);

        #[cfg(feature = "metrics")]
        let t = Instant::now();
        let buffers = upload_inputs(driver, self.queue, buffers, a, b)?;
        #[cfg(feature = "metrics")]
        record("upload", t);

        #[cfg(feature = "metrics")]
        let t = Instant::now();
        bind_arguments(driver, self.kernel, count, &buffers)?;
        #[cfg(feature = "metrics")]
        record("bind", t);

        #[cfg(feature = "metrics")]
        let t = Instant::now();
        let launch = enqueue_launch(driver, self.queue, self.kernel, count)?;
        self.resources.set_pending(launch.event());
        #[cfg(feature = "metrics")]
        record("launch", t);

        #[cfg(feature = "metrics")]
        let t = Instant::now();
        let launch = launch.wait(driver)?;
        self.resources.set_pending(None);
        #[cfg(feature = "metrics")]
        record("wait", t);

        #[cfg(feature = "metrics")]
        let t = Instant::now();
        let output = read_output(driver, self.queue, &launch, &buffers.out, count)?;
        #[cfg(feature = "metrics")]
        record("readback", t);

        let elapsed = launch.elapsed();
        debug!(count, ?elapsed, "run complete");
        Ok((output, elapsed))
    }

    /// Release every driver object this pipeline holds.
    pub fn close(mut self) -> TeardownReport {
        self.close_inner()
    }

    fn close_inner(&mut self) -> TeardownReport {
        self.resources.release_all(&mut self.driver)
    }
}

impl<D: Driver> Drop for Pipeline<D> {
    fn drop(&mut self) {
        if !self.resources.is_empty() {
            let report = self.close_inner();
            if !report.is_clean() {
                warn!(failures = report.failures.len(), "teardown on drop left objects behind");
            }
        }
    }
}

/// Build a pipeline on `driver` and run it once.
pub fn offload<D: Driver>(driver: D, config: &PipelineConfig, a: &[i32], b: &[i32]) -> Result<RunOutput> {
    Pipeline::new(driver, config)?.run(a, b)
}
