//! Codec benchmarks for preamp-protocol.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use preamp_protocol::{codec, ChannelConfig, GainEncoding, InputSource};

fn bench_encode_command(c: &mut Criterion) {
    let config = ChannelConfig::new(3).with_input(InputSource::Di).with_gain(120);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(
        GainEncoding::FixedTripleByte.frame_len() as u64,
    ));
    group.bench_function("fixed_triple", |b| {
        b.iter(|| codec::encode_command(black_box(&config)))
    });
    group.bench_function("per_input", |b| {
        b.iter(|| {
            codec::encode_command_with(black_box(&config), GainEncoding::PerInputVariableWidth)
        })
    });
    group.finish();
}

fn bench_decode_frame(c: &mut Criterion) {
    let config = ChannelConfig::new(3).with_gain(42);
    let encoded = codec::encode_command(&config).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("channel_update", |b| {
        b.iter(|| codec::decode_frame(black_box(&encoded)))
    });
    group.bench_function("idle", |b| {
        b.iter(|| codec::decode_frame(black_box(&codec::IDLE_ACK_FRAME)))
    });
    group.finish();
}

fn bench_split_stream(c: &mut Criterion) {
    let mut stream = Vec::new();
    for _ in 0..64 {
        stream.extend_from_slice(&codec::IDLE_ACK_FRAME);
        stream.extend_from_slice(&codec::HEARTBEAT_FRAME);
    }

    c.bench_function("split_128_frames", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(black_box(&stream[..]));
            let mut count = 0;
            while codec::split_frame(&mut buf).is_some() {
                count += 1;
            }
            count
        })
    });
}

criterion_group!(
    benches,
    bench_encode_command,
    bench_decode_frame,
    bench_split_stream
);
criterion_main!(benches);
