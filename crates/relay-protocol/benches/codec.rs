//! Codec benchmarks for dirc-relay-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use dirc_relay_protocol::{codec, ClientEvent, RelayEvent};

fn message_frame(size: usize) -> String {
    format!(
        r#"{{"action":"MESSAGE","payload":{{"chat":"c1","content":"{}"}}}}"#,
        "x".repeat(size)
    )
}

fn bench_decode(c: &mut Criterion) {
    let frame = message_frame(64);

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("message_64B", |b| {
        b.iter(|| codec::decode(black_box(frame.as_bytes())))
    });
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let event = RelayEvent::from_client(ClientEvent::message("c1", "x".repeat(1024)), "bob", 1.0);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(1024));
    group.bench_function("message_1KB", |b| b.iter(|| codec::encode(black_box(&event))));
    group.finish();
}

fn bench_stamp(c: &mut Criterion) {
    let frame = message_frame(256);

    c.bench_function("decode_stamp_encode_256B", |b| {
        b.iter(|| {
            let event = codec::decode(black_box(frame.as_bytes())).unwrap();
            let outbound = RelayEvent::from_client(event, "bob", 1.0);
            codec::encode(&outbound).unwrap()
        })
    });
}

criterion_group!(benches, bench_decode, bench_encode, bench_stamp);
criterion_main!(benches);
