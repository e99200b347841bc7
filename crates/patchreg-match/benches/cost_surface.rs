use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use patchreg_core::{Image, Planes};
use patchreg_match::{
    build_representation, build_vector_field, compute_cost_surfaces, AlignmentConfig, Distance,
    RepresentationMode,
};
use std::hint::black_box;

fn texture(x: usize, y: usize) -> f32 {
    let fx = x as f32 * 0.21;
    let fy = y as f32 * 0.17;
    0.5 + 0.25 * (fx.sin() * fy.cos()) + 0.25 * ((fx * 0.37 + fy * 1.3).sin())
}

fn cost_surface_benchmarks(c: &mut Criterion) {
    let reference = Image::from_fn(512, 512, texture);
    let moving = Image::from_fn(512, 512, |x, y| texture(x + 2, y + 1));

    let mut group = c.benchmark_group("cost_surfaces");
    for distance in [Distance::Ssd, Distance::Ntg] {
        let cfg = AlignmentConfig {
            grid: (8, 8),
            search_radius: (8, 8),
            distance,
            ..AlignmentConfig::default()
        };
        let r = build_representation(&reference.view(), RepresentationMode::LaplacianEnergies, 1.0);
        let m = build_representation(&moving.view(), RepresentationMode::LaplacianEnergies, 1.0);
        group.bench_with_input(
            BenchmarkId::new("laplacian_energies", format!("{distance:?}")),
            &(r, m),
            |b, (r, m): &(Planes, Planes)| {
                b.iter(|| compute_cost_surfaces(black_box(r), black_box(m), &cfg));
            },
        );
    }
    group.finish();

    let cfg = AlignmentConfig {
        grid: (8, 8),
        search_radius: (8, 8),
        ..AlignmentConfig::default()
    };
    let r = build_representation(&reference.view(), cfg.mode, cfg.sigma_ref);
    let m = build_representation(&moving.view(), cfg.mode, cfg.sigma_mov);
    if let Ok(surfaces) = compute_cost_surfaces(&r, &m, &cfg) {
        c.bench_function("refine_64_patches", |b| {
            b.iter(|| build_vector_field(black_box(&surfaces), &cfg.refine));
        });
    }
}

criterion_group!(benches, cost_surface_benchmarks);
criterion_main!(benches);
