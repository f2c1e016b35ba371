//! Codec benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hubload_core::{decode_message, encode_message, FrameBuffer, HubMessage, Protocol, Timestamp};

fn echo_push() -> HubMessage {
    HubMessage::invocation("echo", vec![Timestamp::now().to_value()])
}

fn encode_benchmark(c: &mut Criterion) {
    let msg = echo_push();

    c.bench_function("encode_echo_json", |b| {
        b.iter(|| black_box(encode_message(Protocol::Json, &msg).unwrap()))
    });

    c.bench_function("encode_echo_messagepack", |b| {
        b.iter(|| black_box(encode_message(Protocol::MessagePack, &msg).unwrap()))
    });
}

fn decode_benchmark(c: &mut Criterion) {
    let msg = echo_push();

    for protocol in [Protocol::Json, Protocol::MessagePack] {
        let encoded = encode_message(protocol, &msg).unwrap();
        let name = format!("deframe_decode_echo_{}", protocol);

        c.bench_function(&name, |b| {
            b.iter(|| {
                let mut frames = FrameBuffer::for_protocol(protocol);
                frames.extend(&encoded);
                let unit = frames.next_unit().unwrap().unwrap();
                black_box(decode_message(protocol, &unit).unwrap())
            })
        });
    }
}

criterion_group!(benches, encode_benchmark, decode_benchmark);
criterion_main!(benches);
