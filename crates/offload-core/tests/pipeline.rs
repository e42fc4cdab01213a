use offload_core::driver::Handle;
use offload_core::{
    DeviceClass, Direction, HostDriver, OffloadError, Pipeline, PipelineConfig, Stage, offload,
};
use proptest::prelude::*;
use std::io::Write;
use std::process::Command;

const KERNEL: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/vector_ops_ocl.cl");

fn config() -> PipelineConfig {
    PipelineConfig::default().with_kernel_path(KERNEL)
}

fn source_file(src: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(src.as_bytes()).unwrap();
    f
}

#[test]
fn eight_elements_sum_to_nine() {
    let mut d = HostDriver::new();
    let a: Vec<i32> = (1..=8).collect();
    let b: Vec<i32> = (1..=8).rev().collect();
    let run = offload(&mut d, &config(), &a, &b).unwrap();
    assert_eq!(run.output, vec![9; 8]);
    assert_eq!(run.device.class, DeviceClass::Cpu);
    assert!(run.teardown.is_clean());
    assert_eq!(d.live_objects(), 0);
}

#[test]
fn zero_elements_give_empty_output() {
    let mut d = HostDriver::new();
    let run = offload(&mut d, &config(), &[], &[]).unwrap();
    assert!(run.output.is_empty());
    assert_eq!(d.live_objects(), 0);
}

#[test]
fn missing_source_allocates_nothing() {
    let mut d = HostDriver::new();
    let cfg = config().with_kernel_path("/definitely/not/here/vector_ops_ocl.cl");
    let err = offload(&mut d, &cfg, &[1], &[2]).unwrap_err();
    assert!(matches!(err, OffloadError::SourceFileNotFound { .. }));
    assert_eq!(err.stage(), Stage::ProgramBuild);
    assert_eq!(d.allocations(), 0);
    assert_eq!(d.live_objects(), 0);
}

#[test]
fn misspelled_entry_point_fails_after_build() {
    let mut d = HostDriver::new();
    let err = offload(&mut d, &config().with_entry_point("vector_add_ocI"), &[1], &[2]).unwrap_err();
    assert!(matches!(&err, OffloadError::EntryPointNotFound { name } if name == "vector_add_ocI"));
    assert_eq!(d.live_objects(), 0);
    // the program was built and released, no kernel was ever made
    assert!(d.release_log().iter().any(|h| matches!(h, Handle::Program(_))));
    assert!(!d.release_log().iter().any(|h| matches!(h, Handle::Kernel(_))));
}

#[test]
fn invalid_source_reports_build_log() {
    let f = source_file("__kernel void vector_add_ocl(const int size, __global int* v1) {\n  v1[0] = size\n}\n");
    let mut d = HostDriver::new();
    let err = offload(&mut d, &config().with_kernel_path(f.path()), &[1], &[2]).unwrap_err();
    let OffloadError::CompilationFailed { log } = &err else {
        panic!("expected a build failure, got {err:?}");
    };
    assert!(!log.trim().is_empty());
    assert!(log.contains("error"));
    assert!(err.to_string().contains(log.as_str()));
    assert!(!d.release_log().iter().any(|h| matches!(h, Handle::Kernel(_))));
    assert_eq!(d.live_objects(), 0);
}

#[test]
fn gpu_enumeration_error_falls_back_to_cpu() {
    let mut d = HostDriver::new()
        .with_device(DeviceClass::Gpu, "gpu0", 1 << 30)
        .fail_enumeration(DeviceClass::Gpu);
    let run = offload(&mut d, &config(), &[1, 2], &[3, 4]).unwrap();
    assert_eq!(run.device.class, DeviceClass::Cpu);
    assert_eq!(run.output, [4, 6]);
}

#[test]
fn gpu_is_preferred_when_present() {
    let mut d = HostDriver::new().with_device(DeviceClass::Gpu, "gpu0", 1 << 30);
    let run = offload(&mut d, &config(), &[1], &[1]).unwrap();
    assert_eq!(run.device.class, DeviceClass::Gpu);
    assert_eq!(run.device.info.name, "gpu0");
}

#[test]
fn no_device_at_all() {
    let mut d = HostDriver::empty();
    let err = offload(&mut d, &config(), &[1], &[1]).unwrap_err();
    assert!(matches!(err, OffloadError::NoDeviceAvailable));
    assert_eq!(err.stage(), Stage::DeviceSelection);
}

#[test]
fn allocation_failure_leaks_nothing() {
    for n in [1, 2, 3] {
        let mut d = HostDriver::new().fail_allocation_at(n);
        let err = offload(&mut d, &config(), &[1, 2, 3], &[4, 5, 6]).unwrap_err();
        assert!(matches!(err, OffloadError::AllocationFailed { .. }), "{err:?}");
        assert_eq!(d.live_buffers(), 0, "failure at allocation {n}");
        assert_eq!(d.live_objects(), 0, "failure at allocation {n}");
    }
}

#[test]
fn upload_failure_leaks_nothing_and_never_launches() {
    for n in [1, 2] {
        let mut d = HostDriver::new().fail_transfer_at(n);
        let err = offload(&mut d, &config(), &[1, 2, 3], &[4, 5, 6]).unwrap_err();
        assert!(
            matches!(err, OffloadError::TransferFailed { direction: Direction::HostToDevice, .. }),
            "{err:?}"
        );
        assert_eq!(err.stage(), Stage::Transfer);
        assert_eq!(d.live_objects(), 0, "failure at transfer {n}");
        assert!(!d.release_log().iter().any(|h| matches!(h, Handle::Event(_))));
    }
}

#[test]
fn readback_failure_leaks_nothing() {
    let mut d = HostDriver::new().fail_transfer_at(3);
    let err = offload(&mut d, &config(), &[1, 2, 3], &[4, 5, 6]).unwrap_err();
    assert!(
        matches!(err, OffloadError::TransferFailed { direction: Direction::DeviceToHost, .. }),
        "{err:?}"
    );
    assert_eq!(d.live_objects(), 0);
}

#[test]
fn runaway_nesting_is_a_build_failure() {
    let src = format!(
        "__kernel void vector_add_ocl(const int size, __global int* v1, __global int* v2, __global int* v_out) {{\n  v_out[0] = {};\n}}\n",
        "(".repeat(200_000)
    );
    let f = source_file(&src);
    let mut d = HostDriver::new();
    let err = offload(&mut d, &config().with_kernel_path(f.path()), &[1], &[2]).unwrap_err();
    let OffloadError::CompilationFailed { log } = &err else {
        panic!("expected a build failure, got {err:?}");
    };
    assert!(log.contains("bracket nesting level exceeded maximum of 256"));
    assert_eq!(d.live_objects(), 0);
}

#[test]
fn length_mismatch_is_rejected() {
    let mut d = HostDriver::new();
    let err = offload(&mut d, &config(), &[1, 2, 3], &[4, 5]).unwrap_err();
    assert!(matches!(err, OffloadError::LengthMismatch { expected: 3, actual: 2, .. }));
    assert_eq!(d.live_objects(), 0);
}

#[test]
fn signature_mismatch_names_the_slot() {
    let f = source_file(
        "__kernel void vector_add_ocl(__global int* v1, __global int* v2, __global int* v_out, const int size) {\n\
         \x20 int i = get_global_id(0);\n\
         \x20 if (i < size) v_out[i] = v1[i] + v2[i];\n\
         }\n",
    );
    let mut d = HostDriver::new();
    let err = offload(&mut d, &config().with_kernel_path(f.path()), &[1], &[2]).unwrap_err();
    assert!(matches!(err, OffloadError::ArgumentBindingFailed { slot: 0, .. }), "{err:?}");
    assert_eq!(d.live_objects(), 0);
}

#[test]
fn faulting_kernel_is_settled_by_teardown() {
    let f = source_file(
        "__kernel void vector_add_ocl(const int size, __global int* v1, __global int* v2, __global int* v_out) {\n\
         \x20 v_out[get_global_id(0) + size] = 1;\n\
         }\n",
    );
    let mut d = HostDriver::new();
    let err = offload(&mut d, &config().with_kernel_path(f.path()), &[1, 2], &[3, 4]).unwrap_err();
    assert!(matches!(err, OffloadError::WaitFailed { .. }), "{err:?}");
    assert_eq!(err.stage(), Stage::Dispatch);
    assert_eq!(d.live_objects(), 0);
    let log = d.release_log();
    let event_at = log.iter().position(|h| matches!(h, Handle::Event(_))).unwrap();
    let first_buffer = log.iter().position(|h| matches!(h, Handle::Buffer(_))).unwrap();
    assert!(event_at < first_buffer);
}

#[test]
fn teardown_order_and_reuse_of_the_driver() {
    let mut d = HostDriver::new();
    let run = offload(&mut d, &config(), &[5, 5, 5], &[1, 2, 3]).unwrap();
    assert_eq!(run.teardown.released, 7);
    let kinds: Vec<_> = d.release_log().iter().map(Handle::kind).collect();
    assert_eq!(
        kinds,
        ["event", "buffer", "buffer", "buffer", "kernel", "queue", "program", "context"]
    );

    let again = offload(&mut d, &config(), &[0, -1], &[0, 1]).unwrap();
    assert_eq!(again.output, [0, 0]);
    assert_eq!(d.live_objects(), 0);
}

#[test]
fn dropped_pipeline_releases_everything() {
    let mut d = HostDriver::new();
    {
        let pipeline = Pipeline::new(&mut d, &config()).unwrap();
        assert_eq!(pipeline.device().class, DeviceClass::Cpu);
    }
    assert_eq!(d.live_objects(), 0);

    let pipeline = Pipeline::new(&mut d, &config()).unwrap();
    let report = pipeline.close();
    assert_eq!(report.released, 4);
    assert!(report.is_clean());
}

#[test]
fn binary_exits_with_one_on_missing_kernel() {
    let out = Command::new(env!("CARGO_BIN_EXE_vector-add"))
        .args(["4", "--backend", "host", "--kernel", "/definitely/not/here.cl"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("program build"), "{stderr}");
}

#[test]
fn binary_prints_arrays_and_timing() {
    let out = Command::new(env!("CARGO_BIN_EXE_vector-add"))
        .args(["20", "--backend", "host", "--kernel", KERNEL])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    let dashes = "-".repeat(28);
    assert_eq!(stdout.lines().filter(|l| *l == dashes).count(), 3);
    assert_eq!(stdout.matches(" ..... ").count(), 3);
    let last = stdout.lines().last().unwrap();
    assert!(last.starts_with("Kernel Execution Time: ") && last.ends_with(" ms"), "{last}");
}

#[test]
fn binary_reports_a_build_failure_once() {
    let f = source_file("__kernel void vector_add_ocl(const int size, __global int* v1) {\n  v1[0] = size\n}\n");
    let out = Command::new(env!("CARGO_BIN_EXE_vector-add"))
        .args(["4", "--backend", "host", "--kernel"])
        .arg(f.path())
        .env_remove("RUST_LOG")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.starts_with("error: program build failed: build log:\n"), "{stderr}");
    assert_eq!(stderr.matches("program build failed").count(), 1, "{stderr}");
}

#[test]
fn binary_logs_the_driver_status() {
    let f = source_file(
        "__kernel void vector_add_ocl(__global int* v1, __global int* v2, __global int* v_out, const int size) {\n\
         \x20 v_out[0] = size;\n\
         }\n",
    );
    let out = Command::new(env!("CARGO_BIN_EXE_vector-add"))
        .args(["4", "--quiet", "--backend", "host", "--kernel"])
        .arg(f.path())
        .env("RUST_LOG", "debug")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("run failed"), "{stderr}");
    assert!(stderr.contains("status=-51"), "{stderr}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn output_is_elementwise_sum(pairs in prop::collection::vec((any::<i32>(), any::<i32>()), 1..64)) {
        let (a, b): (Vec<i32>, Vec<i32>) = pairs.into_iter().unzip();
        let mut d = HostDriver::new();
        let run = offload(&mut d, &config(), &a, &b).unwrap();
        for i in 0..a.len() {
            prop_assert_eq!(run.output[i], a[i].wrapping_add(b[i]));
        }
        prop_assert_eq!(d.live_objects(), 0);
    }
}
