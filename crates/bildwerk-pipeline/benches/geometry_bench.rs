// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for face-box aggregation and crop resolution in the
// bildwerk-pipeline crate.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use bildwerk_core::types::BoundingBox;
use bildwerk_pipeline::geometry::{aggregate_bounding_boxes, resolve_crop_area};

/// A crowd of small, slightly noisy face boxes spread over the image.
fn crowd(count: usize) -> Vec<BoundingBox> {
    (0..count)
        .map(|i| {
            let step = i as f64 / count as f64;
            BoundingBox::new(step * 0.9 - 0.02, (1.0 - step) * 0.8, 0.08, 0.11)
        })
        .collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let pair = crowd(2);
    c.bench_function("aggregate_bounding_boxes (2 faces)", |b| {
        b.iter(|| black_box(aggregate_bounding_boxes(black_box(&pair))));
    });

    let many = crowd(100);
    c.bench_function("aggregate_bounding_boxes (100 faces)", |b| {
        b.iter(|| black_box(aggregate_bounding_boxes(black_box(&many))));
    });
}

fn bench_resolve(c: &mut Criterion) {
    let merged = aggregate_bounding_boxes(&crowd(5));
    c.bench_function("resolve_crop_area (1800x1200, 20px padding)", |b| {
        b.iter(|| {
            let area = resolve_crop_area(black_box(&merged), black_box(20), 1800, 1200);
            assert!(area.fits_within(1800, 1200));
        });
    });
}

criterion_group!(benches, bench_aggregate, bench_resolve);
criterion_main!(benches);
