//! Drives the stage functions by hand through every type-state transition.

use offload_core::driver::{DeviceClass, Driver, Handle, HostDriver};
use offload_core::{
    Launch, Ready, Resources, allocate_buffers, bind_arguments, build_program, create_context,
    create_queue, enqueue_launch, read_output, resolve_kernel, select_device, upload_inputs,
};
use std::path::Path;

const KERNEL: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/vector_ops_ocl.cl");

#[test]
fn queued_inflight_ready() {
    let mut d = HostDriver::new();
    let mut res = Resources::new();

    let dev = select_device(&mut d).unwrap();
    let ctx = create_context(&mut d, dev.id).unwrap();
    res.track_context(ctx);
    let program = build_program(&mut d, ctx, dev.id, Path::new(KERNEL), "").unwrap();
    res.track_program(program);
    let kernel = resolve_kernel(&mut d, program, "vector_add_ocl").unwrap();
    res.track_kernel(kernel);
    let queue = create_queue(&mut d, ctx, dev.id).unwrap();
    res.track_queue(queue);

    let queued = allocate_buffers(&mut d, ctx, 4).unwrap();
    res.track_buffers(queued.ids());
    let ready = upload_inputs(&mut d, queue, queued, &[1, 2, 3, 4], &[10, 20, 30, 40]).unwrap();
    bind_arguments(&mut d, kernel, 4, &ready).unwrap();

    let in_flight = enqueue_launch(&mut d, queue, kernel, 4).unwrap();
    res.set_pending(in_flight.event());
    // the launch hasn't run yet, so its buffers can't go away
    assert!(d.release(Handle::Buffer(ready.out.id())).is_err());

    let done: Launch<Ready> = in_flight.wait(&mut d).unwrap();
    res.set_pending(None);
    let out = read_output(&mut d, queue, &done, &ready.out, 4).unwrap();
    assert_eq!(out, [11, 22, 33, 44]);

    let report = res.release_all(&mut d);
    assert!(report.is_clean());
    assert_eq!(d.live_objects(), 0);
}

#[test]
fn zero_length_run_skips_the_device() {
    let mut d = HostDriver::new();
    let dev = d.device_ids(DeviceClass::Cpu).unwrap()[0];
    let ctx = create_context(&mut d, dev).unwrap();
    let program = build_program(&mut d, ctx, dev, Path::new(KERNEL), "").unwrap();
    let kernel = resolve_kernel(&mut d, program, "vector_add_ocl").unwrap();
    let queue = create_queue(&mut d, ctx, dev).unwrap();

    let queued = allocate_buffers(&mut d, ctx, 0).unwrap();
    let ready = upload_inputs(&mut d, queue, queued, &[], &[]).unwrap();
    bind_arguments(&mut d, kernel, 0, &ready).unwrap();
    let launch = enqueue_launch(&mut d, queue, kernel, 0).unwrap();
    assert!(launch.event().is_none());
    let done = launch.wait(&mut d).unwrap();
    assert!(read_output(&mut d, queue, &done, &ready.out, 0).unwrap().is_empty());
    assert!(d.release_log().is_empty());
}
