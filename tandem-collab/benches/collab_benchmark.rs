use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tandem_collab::broadcast::BroadcastGroup;
use tandem_collab::presence::{PresenceRoom, TextRange};
use tandem_collab::protocol::{PeerInfo, SyncMessage};
use tandem_core::DocumentHandle;
use uuid::Uuid;

fn typical_update() -> Vec<u8> {
    let doc = DocumentHandle::new();
    doc.text("quill").insert(None, 0, "hello world").unwrap();
    doc.encode_state_as_update()
}

fn bench_update_encode(c: &mut Criterion) {
    let peer = Uuid::new_v4();
    let update = typical_update();

    c.bench_function("update_encode", |b| {
        b.iter(|| {
            let msg = SyncMessage::update(black_box(peer), "ws", black_box(1), update.clone());
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_update_decode(c: &mut Criterion) {
    let encoded = SyncMessage::update(Uuid::new_v4(), "ws", 1, typical_update())
        .encode()
        .unwrap();

    c.bench_function("update_decode", |b| {
        b.iter(|| black_box(SyncMessage::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_broadcast_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let group = BroadcastGroup::new(2048);
    let receivers: Vec<_> = (0..100)
        .map(|i| rt.block_on(group.add_peer(PeerInfo::new(format!("Peer{i}")))))
        .collect();
    let msg = SyncMessage::update(Uuid::new_v4(), "ws", 1, typical_update());

    c.bench_function("broadcast_100_peers", |b| {
        b.iter(|| black_box(group.broadcast(&msg).unwrap()))
    });
    drop(receivers);
}

fn bench_presence_cursor(c: &mut Criterion) {
    let mut room = PresenceRoom::with_interval(Uuid::new_v4(), std::time::Duration::ZERO);

    c.bench_function("presence_cursor_encode", |b| {
        b.iter(|| {
            let msg = room.update_local_cursor(TextRange { index: 5, length: 2 });
            black_box(msg.map(|m| m.encode().unwrap()));
        })
    });
}

criterion_group!(
    benches,
    bench_update_encode,
    bench_update_decode,
    bench_broadcast_fan_out,
    bench_presence_cursor,
);
criterion_main!(benches);
