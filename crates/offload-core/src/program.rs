//! Context, program build, kernel resolution and queue creation.

use crate::driver::{ContextId, DeviceId, Driver, Handle, KernelId, ProgramId, QueueId};
use crate::error::{OffloadError, Result, status};
use std::{fs, path::Path};
use tracing::{debug, warn};

pub fn create_context<D: Driver>(driver: &mut D, device: DeviceId) -> Result<ContextId> {
    driver
        .create_context(device)
        .map_err(|code| OffloadError::ContextCreationFailed { code })
}

/// Read `path` in full and build it for `device`.
///
/// On a build failure the program is released and the build log is
/// returned inside [`OffloadError::CompilationFailed`]. The log is never
/// empty: when the driver has nothing to say, it names the status code.
pub fn build_program<D: Driver>(
    driver: &mut D,
    context: ContextId,
    device: DeviceId,
    path: &Path,
    options: &str,
) -> Result<ProgramId> {
    let source = fs::read_to_string(path).map_err(|source| OffloadError::SourceFileNotFound {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), bytes = source.len(), "read kernel source");

    let program = driver
        .create_program(context, &source)
        .map_err(|code| OffloadError::ProgramCreationFailed { code })?;

    match driver.build_program(program, device, options) {
        Ok(()) => {
            if let Ok(log) = driver.build_log(program, device) {
                if !log.trim().is_empty() {
                    debug!(log = %log.trim_end(), "build log");
                }
            }
            Ok(program)
        }
        Err(code) => {
            let log = match driver.build_log(program, device) {
                Ok(log) if !log.trim().is_empty() => log,
                Ok(_) => format!("build failed with {code} and an empty build log"),
                Err(log_err) => {
                    format!("build failed with {code}; build log unavailable ({log_err})")
                }
            };
            if let Err(e) = driver.release(Handle::Program(program)) {
                warn!(%e, "couldn't release program after failed build");
            }
            Err(OffloadError::CompilationFailed { log })
        }
    }
}

/// Create a kernel for the entry point `name`.
pub fn resolve_kernel<D: Driver>(driver: &mut D, program: ProgramId, name: &str) -> Result<KernelId> {
    driver.create_kernel(program, name).map_err(|code| {
        if code.code() == status::CL_INVALID_KERNEL_NAME {
            OffloadError::EntryPointNotFound { name: name.to_string() }
        } else {
            OffloadError::KernelCreationFailed { name: name.to_string(), code }
        }
    })
}

pub fn create_queue<D: Driver>(driver: &mut D, context: ContextId, device: DeviceId) -> Result<QueueId> {
    driver
        .create_queue(context, device)
        .map_err(|code| OffloadError::QueueCreationFailed { code })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DeviceClass, HostDriver};
    use std::io::Write;

    fn source_file(src: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(src.as_bytes()).unwrap();
        f
    }

    fn context(d: &mut HostDriver) -> (DeviceId, ContextId) {
        let dev = d.device_ids(DeviceClass::Cpu).unwrap()[0];
        (dev, create_context(d, dev).unwrap())
    }

    #[test]
    fn context_failure_carries_code() {
        let mut d = HostDriver::new().fail_context_creation();
        let dev = d.device_ids(DeviceClass::Cpu).unwrap()[0];
        let err = create_context(&mut d, dev).unwrap_err();
        assert!(matches!(
            err,
            OffloadError::ContextCreationFailed { code } if code.code() == status::CL_DEVICE_NOT_AVAILABLE
        ));
    }

    #[test]
    fn missing_file() {
        let mut d = HostDriver::new();
        let (dev, ctx) = context(&mut d);
        let err = build_program(&mut d, ctx, dev, Path::new("/nonexistent/k.cl"), "").unwrap_err();
        assert!(matches!(err, OffloadError::SourceFileNotFound { .. }));
    }

    #[test]
    fn compile_failure_surfaces_log_and_releases_program() {
        let mut d = HostDriver::new();
        let (dev, ctx) = context(&mut d);
        let f = source_file("__kernel void k(__global int* a) { a[0] = 1 }");
        let err = build_program(&mut d, ctx, dev, f.path(), "").unwrap_err();
        let OffloadError::CompilationFailed { log } = err else { panic!("expected build failure") };
        assert!(log.contains("error: expected ';'"), "{log}");
        // only the context is left
        assert_eq!(d.live_objects(), 1);
    }

    #[test]
    fn entry_point_lookup() {
        let mut d = HostDriver::new();
        let (dev, ctx) = context(&mut d);
        let f = source_file("__kernel void k(__global int* a) { a[0] = 1; }");
        let program = build_program(&mut d, ctx, dev, f.path(), "").unwrap();
        assert!(resolve_kernel(&mut d, program, "k").is_ok());
        let err = resolve_kernel(&mut d, program, "kk").unwrap_err();
        assert!(matches!(err, OffloadError::EntryPointNotFound { name } if name == "kk"));
    }

    #[test]
    fn kernel_from_unbuilt_program_keeps_the_code() {
        let mut d = HostDriver::new();
        let (_, ctx) = context(&mut d);
        let program = d.create_program(ctx, "__kernel void k(__global int* a) { a[0] = 1; }").unwrap();
        let err = resolve_kernel(&mut d, program, "k").unwrap_err();
        assert!(matches!(
            &err,
            OffloadError::KernelCreationFailed { name, code }
                if name == "k" && code.code() == status::CL_INVALID_PROGRAM_EXECUTABLE
        ));
        assert_eq!(err.api_code().map(|c| c.code()), Some(status::CL_INVALID_PROGRAM_EXECUTABLE));
    }
}
