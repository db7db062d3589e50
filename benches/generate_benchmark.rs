use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lbmgen::solver::native::{Generator, HostBuffer, HostLauncher};
use lbmgen::solver::GeneratorConfig;
use lbmgen_ir::{stencil, BoundarySpec, CollisionSpec, EquilibriumSpec, StreamingSpec};

fn generate_benchmark(c: &mut Criterion) {
    let d2q9 = GeneratorConfig::default().build().unwrap();
    c.bench_function("generate_d2q9_bounce_back", |b| {
        b.iter(|| black_box(&d2q9).generate().unwrap())
    });

    let d3q27 = Generator::new(
        stencil::d3q27(),
        CollisionSpec::Bgk { tau: 0.8 },
        vec![
            BoundarySpec::bounce_back(1).unwrap(),
            BoundarySpec::outlet(vec![0, 0, 1]).unwrap(),
        ],
        EquilibriumSpec::Quadratic,
        StreamingSpec::standard_masked(),
    )
    .unwrap();
    c.bench_function("generate_d3q27_outlet_masked", |b| {
        b.iter(|| black_box(&d3q27).generate().unwrap())
    });
}

fn host_launch_benchmark(c: &mut Criterion) {
    let generator = Generator::new(
        stencil::d2q9(),
        CollisionSpec::Bgk { tau: 0.8 },
        Vec::new(),
        EquilibriumSpec::Quadratic,
        StreamingSpec::standard(),
    )
    .unwrap();
    let module = generator.generate_module().unwrap();
    let shape = [32, 32];
    let cells = 32 * 32;
    let f: Vec<f64> = stencil::d2q9()
        .w()
        .iter()
        .flat_map(|&w| std::iter::repeat(w).take(cells))
        .collect();
    let mut launcher = HostLauncher::new(&module, &shape).unwrap();
    launcher.bind_buffer("f", HostBuffer::Scalar(f.clone())).unwrap();
    launcher.bind_buffer("f_next", HostBuffer::Scalar(f)).unwrap();
    launcher.bind_value("tau_inv", 1.0 / 0.8).unwrap();

    c.bench_function("host_launch_d2q9_32x32", |b| {
        b.iter(|| launcher.launch().unwrap())
    });
}

criterion_group!(benches, generate_benchmark, host_launch_benchmark);
criterion_main!(benches);
