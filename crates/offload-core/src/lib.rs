//! Offload an elementwise integer vector addition to an OpenCL-style
//! compute device.
//!
//! ```no_run
//! use offload_core::{HostDriver, PipelineConfig, offload};
//!
//! let config = PipelineConfig::default().with_kernel_path("kernels/vector_ops_ocl.cl");
//! let run = offload(HostDriver::new(), &config, &[1, 2, 3], &[8, 7, 6])?;
//! assert_eq!(run.output, [9, 9, 9]);
//! # Ok::<(), offload_core::OffloadError>(())
//! ```

/* ───────────── driver layer ─────────────────────────── */

pub mod driver;
pub mod error;
pub mod state;

/* ───────────── pipeline stages ──────────────────────── */

pub mod buffer;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod program;
pub mod teardown;

pub mod pipeline;

#[cfg(feature = "metrics")]
pub mod metrics;

/* ───────────── re-exports ───────────────────────────── */

pub use buffer::{BufferSet, DeviceBuffer, allocate_buffers, read_output, upload_inputs};
pub use config::PipelineConfig;
pub use device::{SelectedDevice, select_device};
pub use dispatch::{Launch, bind_arguments, enqueue_launch};
pub use driver::{DeviceClass, Driver, HostDriver};
#[cfg(feature = "opencl")]
pub use driver::OpenClDriver;
pub use error::{ApiError, Direction, OffloadError, Result, Stage};
pub use pipeline::{Pipeline, RunOutput, offload};
pub use program::{build_program, create_context, create_queue, resolve_kernel};
pub use state::{InFlight, Queued, Ready};
pub use teardown::{Resources, TeardownReport};
