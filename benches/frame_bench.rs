use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use relay_hub::core::codec::FrameCodec;
use relay_hub::core::message::Message;
use relay_hub::protocol::dispatcher::Dispatcher;
use relay_hub::utils::metrics::Metrics;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");

    let frame = json!({"context": "Chat", "target": "g", "data": {"text": "a".repeat(256)}}).to_string();
    let stream = format!("{frame}\n").repeat(64);

    group.bench_function("split_64_frames", |b| {
        b.iter_batched(
            || BytesMut::from(stream.as_bytes()),
            |mut buf| {
                let mut codec = FrameCodec::new();
                while let Some(frame) = codec.decode(&mut buf).unwrap() {
                    black_box(frame);
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("decode_message", |b| {
        b.iter(|| Message::decode(black_box(&frame)).unwrap())
    });

    group.finish();
}

fn bench_group_broadcast(c: &mut Criterion) {
    let mut dispatcher = Dispatcher::new(Arc::new(Metrics::new()));
    let mut receivers = Vec::new();
    let mut ids = Vec::new();

    for port in 0..32u16 {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = dispatcher.connect(SocketAddr::from(([10, 0, 0, 1], port)), tx);
        let identify = Message::decode(
            &json!({"context": "Identify", "target": "i",
                    "data": {"group": "bench", "ip": "10.0.0.1", "name": format!("srv{port}"), "port": port}})
            .to_string(),
        )
        .unwrap();
        dispatcher.dispatch(id, &identify).unwrap();
        receivers.push(rx);
        ids.push(id);
    }

    let chat = Message::decode(r#"{"context":"Chat","target":"g","data":{"text":"hello"}}"#).unwrap();

    c.bench_function("group_broadcast_32", |b| {
        b.iter(|| {
            dispatcher.dispatch(ids[0], &chat).unwrap();
            for rx in &mut receivers {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

criterion_group!(benches, bench_framing, bench_group_broadcast);
criterion_main!(benches);
