//! Fan-out benchmarks for parley-core.
//!
//! These benchmarks measure the cost of admitting and distributing messages
//! through the session coordinator and its stores.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parley_core::{
    EngineConfig, Handshake, MessageStore, RateLimitConfig, RateLimiter, SessionCoordinator,
};
use parley_protocol::{
    ClientEvent, ConversationKey, DeliveryStatus, Message, MessageType, SendMessageRequest,
};
use parley_transport::{ConnectionId, FrameReceiver, Hub};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn engine(connections: usize) -> (Arc<SessionCoordinator>, ConnectionId, Vec<FrameReceiver>) {
    let config = EngineConfig {
        rate_limiting: RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        },
        enable_online_status: false,
        ..EngineConfig::default()
    };
    let hub = Arc::new(Hub::new());
    let coordinator = Arc::new(SessionCoordinator::new(config, hub.clone()));

    let receivers = (0..connections)
        .map(|i| {
            let connection = ConnectionId::new(format!("conn:{i}"));
            let rx = hub.register(connection.clone());
            coordinator.connect(&connection, Handshake::default());
            rx
        })
        .collect();

    (coordinator, ConnectionId::new("conn:0"), receivers)
}

/// Benchmark a global send to N connected users.
fn bench_send(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("send");

    for connections in [1, 10, 100, 1000] {
        let (coordinator, sender, mut receivers) = rt.block_on(async { engine(connections) });
        group.throughput(Throughput::Elements(connections as u64));
        group.bench_with_input(
            BenchmarkId::new("global", connections),
            &connections,
            |b, _| {
                b.iter(|| {
                    let event = ClientEvent::SendMessage(SendMessageRequest {
                        content: "hello everyone".into(),
                        message_type: MessageType::Text,
                        group_id: None,
                        metadata: None,
                    });
                    let ack = rt.block_on(coordinator.handle_event(&sender, event));
                    // Keep the outbound queues from growing across iterations.
                    for rx in &mut receivers {
                        while rx.try_recv().is_ok() {}
                    }
                    black_box(ack)
                });
            },
        );
    }

    group.finish();
}

/// Benchmark message store operations.
fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");

    group.bench_function("append_evicting", |b| {
        let store = MessageStore::new(100);
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let message = Message {
                id: format!("m{i}"),
                content: "hello".into(),
                sender_id: "u1".into(),
                sender_username: "alice".into(),
                group_id: None,
                timestamp: i,
                message_type: MessageType::Text,
                delivery_status: DeliveryStatus::Sent,
                read_by: Vec::new(),
                metadata: None,
            };
            store.append(black_box(message))
        });
    });

    group.bench_function("history_50", |b| {
        let store = MessageStore::new(1000);
        for i in 0..1000u64 {
            let group_id = (i % 2 == 0).then(|| "g1".to_string());
            store
                .append(Message {
                    id: format!("m{i}"),
                    content: "hello".into(),
                    sender_id: "u1".into(),
                    sender_username: "alice".into(),
                    group_id,
                    timestamp: i,
                    message_type: MessageType::Text,
                    delivery_status: DeliveryStatus::Sent,
                    read_by: Vec::new(),
                    metadata: None,
                })
                .unwrap();
        }
        let conversation = ConversationKey::Group("g1".into());
        b.iter(|| store.history(black_box(&conversation), 50));
    });

    group.finish();
}

/// Benchmark rate limiter admission.
fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter");

    group.bench_function("admit", |b| {
        let limiter = RateLimiter::new(u32::MAX, Duration::from_secs(60));
        let connection = ConnectionId::new("conn:0");
        b.iter(|| limiter.admit(black_box(&connection), Instant::now()));
    });

    group.finish();
}

criterion_group!(benches, bench_send, bench_store, bench_rate_limiter);
criterion_main!(benches);
