//! # Heading Fusion and Solar Geometry Benchmark

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use comms_if::eqpt::gps::Fix;
use radiom_lib::{
    heading_fusion::{HeadingFusion, Params},
    params::BearingMode,
    solar::solar_position,
};

fn fusion_benchmark(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();

    let fix = |source_id, latitude_deg, longitude_deg| Fix {
        source_id,
        latitude_deg,
        longitude_deg,
        course_over_ground_deg: Some(234.0),
        speed_knots: 8.0,
        timestamp: now,
        valid: true,
        num_satellites: Some(9),
    };

    // Antennas roughly 20 m apart on a ship heading south west
    let front = fix(0, 50.369_896, -4.140_223);
    let rear = fix(1, 50.370_104, -4.139_777);

    let fusion = HeadingFusion::new(
        Params::default(),
        BearingMode::DynamicHeading {
            fallback_bearing_deg: 0.0,
        },
    )
    .unwrap();

    c.bench_function("HeadingFusion::fuse", |b| {
        b.iter(|| fusion.fuse(now, black_box(Some(&front)), black_box(Some(&rear)), None))
    });

    c.bench_function("HeadingFusion::fuse::single_fix", |b| {
        b.iter(|| fusion.fuse(now, black_box(Some(&front)), None, None))
    });
}

fn solar_benchmark(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();

    c.bench_function("solar_position", |b| {
        b.iter(|| solar_position(black_box(now), black_box(50.37), black_box(-4.14)))
    });
}

criterion_group!(benches, fusion_benchmark, solar_benchmark);
criterion_main!(benches);
