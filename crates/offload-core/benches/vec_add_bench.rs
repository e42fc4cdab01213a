use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use offload_core::{HostDriver, PipelineConfig, offload};
use std::hint::black_box;

fn bench_vec_add(c: &mut Criterion) {
    let config = PipelineConfig::default()
        .with_kernel_path(concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/vector_ops_ocl.cl"));

    let mut group = c.benchmark_group("vec_add_host");
    for n in [256usize, 4096, 65_536] {
        let a = vec![1_i32; n];
        let b = vec![2_i32; n];
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, _| {
            bench.iter(|| {
                let run = offload(HostDriver::new(), &config, black_box(&a), black_box(&b))
                    .expect("host pipeline");
                assert_eq!(run.output[0], 3);
            });
        });
    }
    group.finish();
}

// Criterion needs both macros to run the group
criterion_group!(benches, bench_vec_add);
criterion_main!(benches);
