//! Codec benchmarks for parley-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parley_protocol::codec;
use parley_protocol::{
    ClientEnvelope, DeliveryStatus, Message, MessageType, ServerEvent, ServerFrame,
};

fn sample_frame() -> ServerFrame {
    ServerFrame::Event(ServerEvent::MessageReceived(Message {
        id: "5f1c7a0e-0000-4000-8000-000000000000".into(),
        content: "x".repeat(64),
        sender_id: "u1".into(),
        sender_username: "alice".into(),
        group_id: Some("g1".into()),
        timestamp: 1_700_000_000_000,
        message_type: MessageType::Text,
        delivery_status: DeliveryStatus::Sent,
        read_by: Vec::new(),
        metadata: None,
    }))
}

fn bench_encode_text(c: &mut Criterion) {
    let frame = sample_frame();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("text_message", |b| {
        b.iter(|| codec::encode_text(black_box(&frame)))
    });
    group.bench_function("binary_message", |b| {
        b.iter(|| codec::encode_binary(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_envelope(c: &mut Criterion) {
    let text = r#"{"event":"message:send","data":{"content":"hello there","groupId":"g1"},"ack":1}"#;
    let envelope = codec::decode_text(text).unwrap();
    let binary = codec::encode_binary(&envelope).unwrap();

    let mut group = c.benchmark_group("decode");
    group.bench_function("text_envelope", |b| {
        b.iter(|| codec::decode_text(black_box(text)).and_then(|e| e.parse()))
    });
    group.bench_function("binary_envelope", |b| {
        b.iter(|| {
            codec::decode_binary::<ClientEnvelope>(black_box(&binary)).and_then(|e| e.parse())
        })
    });
    group.finish();
}

criterion_group!(benches, bench_encode_text, bench_decode_envelope);
criterion_main!(benches);
