// ─── Error types ──────────────────────────────────────────────────────
use std::{fmt, path::PathBuf};

/// OpenCL status codes used by the drivers and by the pipeline's
/// error mapping. Values follow `CL/cl.h`.
pub mod status {
    pub const CL_SUCCESS: i32 = 0;
    pub const CL_DEVICE_NOT_FOUND: i32 = -1;
    pub const CL_DEVICE_NOT_AVAILABLE: i32 = -2;
    pub const CL_MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    pub const CL_OUT_OF_RESOURCES: i32 = -5;
    pub const CL_OUT_OF_HOST_MEMORY: i32 = -6;
    pub const CL_BUILD_PROGRAM_FAILURE: i32 = -11;
    pub const CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: i32 = -14;
    pub const CL_INVALID_VALUE: i32 = -30;
    pub const CL_INVALID_DEVICE: i32 = -33;
    pub const CL_INVALID_CONTEXT: i32 = -34;
    pub const CL_INVALID_COMMAND_QUEUE: i32 = -36;
    pub const CL_INVALID_MEM_OBJECT: i32 = -38;
    pub const CL_INVALID_PROGRAM: i32 = -44;
    pub const CL_INVALID_PROGRAM_EXECUTABLE: i32 = -45;
    pub const CL_INVALID_KERNEL_NAME: i32 = -46;
    pub const CL_INVALID_KERNEL: i32 = -48;
    pub const CL_INVALID_ARG_INDEX: i32 = -49;
    pub const CL_INVALID_ARG_VALUE: i32 = -50;
    pub const CL_INVALID_ARG_SIZE: i32 = -51;
    pub const CL_INVALID_KERNEL_ARGS: i32 = -52;
    pub const CL_INVALID_EVENT: i32 = -58;
    pub const CL_INVALID_BUFFER_SIZE: i32 = -61;
    pub const CL_INVALID_GLOBAL_WORK_SIZE: i32 = -63;

    /// Symbolic name for a status code, if it is one we know.
    pub fn name(code: i32) -> Option<&'static str> {
        Some(match code {
            CL_SUCCESS => "CL_SUCCESS",
            CL_DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
            CL_DEVICE_NOT_AVAILABLE => "CL_DEVICE_NOT_AVAILABLE",
            CL_MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
            CL_OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
            CL_OUT_OF_HOST_MEMORY => "CL_OUT_OF_HOST_MEMORY",
            CL_BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
            CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => {
                "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"
            }
            CL_INVALID_VALUE => "CL_INVALID_VALUE",
            CL_INVALID_DEVICE => "CL_INVALID_DEVICE",
            CL_INVALID_CONTEXT => "CL_INVALID_CONTEXT",
            CL_INVALID_COMMAND_QUEUE => "CL_INVALID_COMMAND_QUEUE",
            CL_INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
            CL_INVALID_PROGRAM => "CL_INVALID_PROGRAM",
            CL_INVALID_PROGRAM_EXECUTABLE => "CL_INVALID_PROGRAM_EXECUTABLE",
            CL_INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
            CL_INVALID_KERNEL => "CL_INVALID_KERNEL",
            CL_INVALID_ARG_INDEX => "CL_INVALID_ARG_INDEX",
            CL_INVALID_ARG_VALUE => "CL_INVALID_ARG_VALUE",
            CL_INVALID_ARG_SIZE => "CL_INVALID_ARG_SIZE",
            CL_INVALID_KERNEL_ARGS => "CL_INVALID_KERNEL_ARGS",
            CL_INVALID_EVENT => "CL_INVALID_EVENT",
            CL_INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
            CL_INVALID_GLOBAL_WORK_SIZE => "CL_INVALID_GLOBAL_WORK_SIZE",
            _ => return None,
        })
    }
}

/// Raw status code returned by a driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiError(pub i32);

impl ApiError {
    #[inline]
    pub fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match status::name(self.0) {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "OpenCL error code {}", self.0),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<i32> for ApiError {
    #[inline]
    fn from(code: i32) -> Self {
        ApiError(code)
    }
}

#[cfg(feature = "opencl")]
impl From<opencl3::error_codes::ClError> for ApiError {
    #[inline]
    fn from(err: opencl3::error_codes::ClError) -> Self {
        ApiError(err.0)
    }
}

pub type DriverResult<T> = std::result::Result<T, ApiError>;

/// Transfer direction, used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToDevice,
    DeviceToHost,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::HostToDevice => "host->device",
            Direction::DeviceToHost => "device->host",
        })
    }
}

/// Pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DeviceSelection,
    Context,
    ProgramBuild,
    KernelResolve,
    Queue,
    Allocation,
    Transfer,
    ArgumentBinding,
    Dispatch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::DeviceSelection => "device selection",
            Stage::Context => "context creation",
            Stage::ProgramBuild => "program build",
            Stage::KernelResolve => "kernel creation",
            Stage::Queue => "command queue creation",
            Stage::Allocation => "buffer allocation",
            Stage::Transfer => "buffer transfer",
            Stage::ArgumentBinding => "kernel argument binding",
            Stage::Dispatch => "kernel dispatch",
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum OffloadError {
    #[error("no GPU or CPU compute device available")]
    NoDeviceAvailable,

    #[error("couldn't create a context: {code}")]
    ContextCreationFailed { code: ApiError },

    #[error("couldn't find the program file {}: {source}", path.display())]
    SourceFileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't create the program: {code}")]
    ProgramCreationFailed { code: ApiError },

    #[error("build log:\n{log}")]
    CompilationFailed { log: String },

    #[error("kernel entry point `{name}` not found in program")]
    EntryPointNotFound { name: String },

    #[error("couldn't create kernel `{name}`: {code}")]
    KernelCreationFailed { name: String, code: ApiError },

    #[error("couldn't create a command queue: {code}")]
    QueueCreationFailed { code: ApiError },

    #[error("couldn't allocate buffer `{which}` ({bytes} bytes): {code}")]
    AllocationFailed {
        which: &'static str,
        bytes: usize,
        code: ApiError,
    },

    #[error("host array `{which}` has {actual} elements, expected {expected}")]
    LengthMismatch {
        which: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{direction} transfer failed: {code}")]
    TransferFailed { direction: Direction, code: ApiError },

    #[error("couldn't set kernel argument {slot}: {code}")]
    ArgumentBindingFailed { slot: u32, code: ApiError },

    #[error("kernel launch failed: {code}")]
    DispatchFailed { code: ApiError },

    #[error("waiting for kernel completion failed: {code}")]
    WaitFailed { code: ApiError },
}

impl OffloadError {
    pub fn stage(&self) -> Stage {
        match self {
            OffloadError::NoDeviceAvailable => Stage::DeviceSelection,
            OffloadError::ContextCreationFailed { .. } => Stage::Context,
            OffloadError::SourceFileNotFound { .. }
            | OffloadError::ProgramCreationFailed { .. }
            | OffloadError::CompilationFailed { .. } => Stage::ProgramBuild,
            OffloadError::EntryPointNotFound { .. }
            | OffloadError::KernelCreationFailed { .. } => Stage::KernelResolve,
            OffloadError::QueueCreationFailed { .. } => Stage::Queue,
            OffloadError::AllocationFailed { .. } => Stage::Allocation,
            OffloadError::LengthMismatch { .. } | OffloadError::TransferFailed { .. } => {
                Stage::Transfer
            }
            OffloadError::ArgumentBindingFailed { .. } => Stage::ArgumentBinding,
            OffloadError::DispatchFailed { .. } | OffloadError::WaitFailed { .. } => {
                Stage::Dispatch
            }
        }
    }

    /// Underlying driver code, where the failure came from a driver call.
    pub fn api_code(&self) -> Option<ApiError> {
        match self {
            OffloadError::ContextCreationFailed { code }
            | OffloadError::ProgramCreationFailed { code }
            | OffloadError::KernelCreationFailed { code, .. }
            | OffloadError::QueueCreationFailed { code }
            | OffloadError::AllocationFailed { code, .. }
            | OffloadError::TransferFailed { code, .. }
            | OffloadError::ArgumentBindingFailed { code, .. }
            | OffloadError::DispatchFailed { code }
            | OffloadError::WaitFailed { code } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, OffloadError>;
