// In benches/pack_bench.rs

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use std::sync::Arc;

use tambak_array::tensor::{pack_tensor, unpack_tensor};
use tambak_array::{ArrayParams, EvalConfig, Evaluator, LazyExpr, NDArray, PackParams, Region, Slice};

const SIDE: usize = 512;

/// Slowly varying data, the shape of most real sensor grids.
fn smooth_grid() -> ArrayD<f64> {
    ArrayD::from_shape_fn(IxDyn(&[SIDE, SIDE]), |ix| {
        ((ix[0] as f64) * 0.01).sin() + ((ix[1] as f64) * 0.02).cos()
    })
}

fn noisy_grid() -> ArrayD<f64> {
    let mut rng = rand::rng();
    ArrayD::from_shape_fn(IxDyn(&[SIDE, SIDE]), |_| rng.random::<f64>())
}

fn bench_pack(c: &mut Criterion) {
    let smooth = smooth_grid();
    let noisy = noisy_grid();
    let params = PackParams::default();
    let packed_smooth = pack_tensor(&smooth, &params).unwrap();

    let mut group = c.benchmark_group("Tensor Packing");
    group.throughput(Throughput::Bytes((SIDE * SIDE * 8) as u64));
    group.bench_function("pack smooth f64", |b| {
        b.iter(|| black_box(pack_tensor(black_box(&smooth), &params)))
    });
    group.bench_function("pack noisy f64", |b| {
        b.iter(|| black_box(pack_tensor(black_box(&noisy), &params)))
    });
    group.bench_function("unpack smooth f64", |b| {
        b.iter(|| black_box(unpack_tensor(black_box(&packed_smooth))))
    });
    group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
    let array_params = ArrayParams::default().chunks(&[128, 128]);
    let a = Arc::new(NDArray::from_ndarray(&smooth_grid(), &array_params).unwrap());
    let b = Arc::new(NDArray::from_ndarray(&noisy_grid(), &array_params).unwrap());
    let ea = LazyExpr::array(a).unwrap();
    let eb = LazyExpr::array(b).unwrap();
    let expr = (&ea * &ea + &eb * &eb).gt(2i64 * &ea * &eb + 1i64).unwrap();

    let mut group = c.benchmark_group("Lazy Evaluation");
    for nthreads in [1, 4] {
        let evaluator = Evaluator::new(EvalConfig::default().nthreads(nthreads)).unwrap();
        group.bench_function(format!("evaluate {} threads", nthreads), |bench| {
            bench.iter(|| black_box(evaluator.evaluate(black_box(&expr))))
        });
    }
    let evaluator = Evaluator::new(EvalConfig::default()).unwrap();
    let rows = Region::new(vec![Slice::range(100, 140)]);
    group.bench_function("evaluate_slice 40 rows", |bench| {
        bench.iter(|| black_box(evaluator.evaluate_slice(black_box(&expr), &rows)))
    });
    group.finish();
}

criterion_group!(benches, bench_pack, bench_evaluate);
criterion_main!(benches);
