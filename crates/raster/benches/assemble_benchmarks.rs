//! Benchmarks for the tile assembler.
//!
//! Run with: cargo bench --package raster --bench assemble_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use raster::{assemble, crop, mosaic, resample, retile, AssemblyParams, GeoTransform, Raster};
use test_utils::{pattern_rgb, scheme};
use tile_common::BoundingBox;

/// Rendered raster of `edge` world units square at the renderer's native
/// resolution, with its upper-left corner one unit outside the chunk.
fn rendered_raster(edge: f64) -> Raster {
    let res = scheme::RENDERER_RES;
    let px = ((edge + 2.0) / res).ceil() as usize;
    let mut data = Vec::with_capacity(px * px * 3);
    for row in 0..px {
        for col in 0..px {
            data.extend_from_slice(&pattern_rgb(col, row));
        }
    }
    let transform = GeoTransform::new(-1.0, edge + 1.0, res, res);
    Raster::from_data(px, px, 3, data, transform, 255).unwrap()
}

fn bench_assemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("assemble");
    group.sample_size(10);
    let params = AssemblyParams::default();

    for edge in [200.0, 1000.0, 2000.0] {
        let source = rendered_raster(edge);
        let bounds = BoundingBox::new(0.0, 0.0, edge, edge);
        group.throughput(Throughput::Elements((source.width * source.height) as u64));
        group.bench_with_input(BenchmarkId::new("full", edge as u32), &edge, |b, _| {
            b.iter(|| assemble(black_box(std::slice::from_ref(&source)), &bounds, &params).unwrap())
        });
    }
    group.finish();
}

fn bench_stages(c: &mut Criterion) {
    let mut group = c.benchmark_group("stages");
    group.sample_size(10);
    let params = AssemblyParams::default();
    let edge = 1000.0;
    let source = rendered_raster(edge);
    let bounds = BoundingBox::new(0.0, 0.0, edge, edge);
    let padded = bounds.padded(params.pad);

    group.bench_function("mosaic", |b| {
        b.iter(|| mosaic(black_box(std::slice::from_ref(&source)), &padded, 255).unwrap())
    });

    let merged = mosaic(std::slice::from_ref(&source), &padded, 255).unwrap();
    group.bench_function("resample", |b| {
        b.iter(|| resample(black_box(&merged), params.target_resolution()))
    });

    let resampled = resample(&merged, params.target_resolution());
    let cropped = crop(&resampled, &bounds).unwrap();
    group.bench_function("retile", |b| b.iter(|| retile(black_box(&cropped), &params)));

    let tiles = retile(&cropped, &params);
    group.bench_function("encode_png", |b| {
        b.iter(|| tiles[0].encode_png().unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_assemble, bench_stages);
criterion_main!(benches);
