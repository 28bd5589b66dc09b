//! Performance benchmarks for the sharpness metrics and frame decode path
//!
//! Run with: cargo bench
//!
//! A focus search scores dozens of frames per camera, so the per-frame cost
//! of decode plus scoring bounds how fast a whole array can be focused.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use image::DynamicImage;
use mcam_autofocus::sharpness::{CannyScorer, LaplacianScorer, SharpnessScorer};
use mcam_autofocus::testing::{defocused_target, encode_png};
use mcam_autofocus::decode_image;
use std::time::Duration;

fn bench_scorers(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sharpness Scoring");
    group.measurement_time(Duration::from_secs(5));

    let resolutions = [(320, 240, "320x240"), (640, 480, "640x480"), (1280, 720, "720p")];

    for (width, height, name) in resolutions {
        let gray = DynamicImage::ImageRgb8(defocused_target(width, height, 1.0)).to_luma8();
        group.throughput(Throughput::Elements(u64::from(width * height)));

        let canny = CannyScorer::default();
        group.bench_with_input(BenchmarkId::new("canny", name), &gray, |b, img| {
            b.iter(|| black_box(canny.score(black_box(img))));
        });

        group.bench_with_input(BenchmarkId::new("laplacian", name), &gray, |b, img| {
            b.iter(|| black_box(LaplacianScorer.score(black_box(img))));
        });
    }

    group.finish();
}

fn bench_decode_and_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("Decode + Score");
    group.sample_size(20);

    let png = match encode_png(&defocused_target(640, 480, 2.0)) {
        Ok(bytes) => bytes,
        Err(e) => panic!("failed to encode benchmark frame: {}", e),
    };
    let scorer = CannyScorer::default();

    group.bench_function("png_640x480", |b| {
        b.iter(|| {
            let image = decode_image(black_box(&png));
            black_box(image.map(|img| scorer.score_image(&img)))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_scorers, bench_decode_and_score);
criterion_main!(benches);
