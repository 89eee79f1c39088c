use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lunchline_core::{Order, OrderItem, OrderPatch, SharedState};
use lunchline_sync::broadcast::{BroadcastGroup, ClientInfo, Frame};
use lunchline_sync::protocol::{ClientEvent, ServerMessage};
use lunchline_sync::store::StateStore;
use uuid::Uuid;

fn typical_order(first_name: &str) -> Order {
    Order {
        first_name: first_name.to_string(),
        last_name: "Student".to_string(),
        grade: "10".to_string(),
        email: "kid@school.example".to_string(),
        items: vec![
            OrderItem::new("Pizza", 2, 5.0),
            OrderItem::new("Soda", 1, 1.5),
            OrderItem::new("Cookie", 3, 0.75),
        ],
        ..Order::new()
    }
}

fn busy_state(orders: usize) -> SharedState {
    let mut state = SharedState::default();
    for i in 0..orders {
        state.add_order(typical_order(&format!("Kid{i}")));
    }
    state
}

fn bench_event_encode(c: &mut Criterion) {
    let event = ClientEvent::OrderAdded(typical_order("Ada"));

    c.bench_function("event_encode_order_added", |b| {
        b.iter(|| black_box(black_box(&event).encode().unwrap()))
    });
}

fn bench_event_decode(c: &mut Criterion) {
    let encoded = ClientEvent::OrderAdded(typical_order("Ada"))
        .encode()
        .unwrap();

    c.bench_function("event_decode_order_added", |b| {
        b.iter(|| black_box(ClientEvent::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_snapshot_encode(c: &mut Criterion) {
    let message = ServerMessage::StateUpdated(busy_state(200));

    c.bench_function("snapshot_encode_200_orders", |b| {
        b.iter(|| black_box(black_box(&message).encode().unwrap()))
    });
}

fn bench_patch_merge(c: &mut Criterion) {
    let state = busy_state(200);
    let target = state.orders[100].id.clone();
    let mut patch = OrderPatch::new(target);
    patch.checked_in = Some(true);
    patch.payment_method = Some("Venmo".to_string());

    c.bench_function("patch_merge_into_200_orders", |b| {
        b.iter(|| {
            let mut copy = state.clone();
            black_box(copy.update_order(patch.clone()).unwrap());
        })
    });
}

fn bench_broadcast_fanout(c: &mut Criterion) {
    let mut group = BroadcastGroup::new(2048);

    // Keep 100 receivers alive for the duration of the benchmark.
    let mut receivers = Vec::new();
    for _ in 0..100 {
        receivers.push(group.attach(ClientInfo::new(None)));
    }

    let payload = ClientEvent::OrderAdded(typical_order("Ada"))
        .encode()
        .unwrap();
    let origin = Uuid::new_v4();

    c.bench_function("broadcast_to_100_clients", |b| {
        b.iter(|| {
            black_box(group.broadcast(Frame::from_client(origin, payload.clone())));
        })
    });
}

fn bench_store_roundtrip(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path().join("bench.json"));
    let state = busy_state(200);

    c.bench_function("store_save_load_200_orders", |b| {
        b.iter(|| {
            store.save(black_box(&state)).unwrap();
            black_box(store.try_load().unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_event_encode,
    bench_event_decode,
    bench_snapshot_encode,
    bench_patch_merge,
    bench_broadcast_fanout,
    bench_store_roundtrip
);
criterion_main!(benches);
