//! Criterion benchmarks for the frame codec hot paths.
//!
//! Measure frames are decoded and scaled once per sample, so their cost bounds
//! the sustainable sample rate for wide channel counts.
//!
//! Run with: cargo bench --bench frame_codec

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use resistes_daq::hardware::frame_codec::{
    build_config_frame, decode_measure_frame, encode_measure_frame, ChannelCodes, MeasureFrame,
};
use resistes_daq::hardware::{AcquisitionParams, ValueCodec};
use resistes_daq::measurement::MeasureRecord;

fn sample_frame(channels: usize) -> MeasureFrame {
    MeasureFrame {
        count: 1234,
        rec_battery: 11191,
        em_battery: 10743,
        phase_current: 1 << 20,
        quad_current: -(1 << 14),
        channels: (0..channels as i32)
            .map(|k| ChannelCodes {
                phase: (k + 1) << 16,
                quad: -(k << 10),
            })
            .collect(),
    }
}

fn measure_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("measure_frame_decode");
    for channels in [1usize, 8, 64, 127] {
        let raw = encode_measure_frame(&sample_frame(channels));
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(channels), &raw, |b, raw| {
            b.iter(|| decode_measure_frame(black_box(raw), channels).unwrap());
        });
    }
    group.finish();
}

fn measure_record_scaling(c: &mut Criterion) {
    let codec = ValueCodec::default();
    let mut group = c.benchmark_group("measure_record_scaling");
    for channels in [1usize, 64] {
        let frame = sample_frame(channels);
        group.bench_with_input(BenchmarkId::from_parameter(channels), &frame, |b, frame| {
            b.iter(|| MeasureRecord::from_frame(black_box(frame), &codec, Utc::now()));
        });
    }
    group.finish();
}

fn config_frame_build(c: &mut Criterion) {
    let codec = ValueCodec::default();
    let config = AcquisitionParams::default().validate(&codec).unwrap();
    c.bench_function("config_frame_build", |b| {
        b.iter(|| build_config_frame(black_box(&config), &codec).unwrap());
    });
}

criterion_group!(
    benches,
    measure_frame_decode,
    measure_record_scaling,
    config_frame_build
);
criterion_main!(benches);
