use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use sessionkit::storage::REQUEST_ACCESS_TIME;
use sessionkit::{Container, SessionManager, Storage};

fn populated(entries: usize) -> (SessionManager, Container) {
    let manager = SessionManager::in_memory();
    let container = Container::new("Bench", Some(manager.clone())).unwrap();
    for i in 0..entries {
        container.set(&format!("key{}", i), i).unwrap();
    }
    (manager, container)
}

fn bench_get(c: &mut Criterion) {
    let (_manager, container) = populated(64);
    container.set_expiration_seconds(3600, None).unwrap();

    c.bench_function("container_get", |b| {
        b.iter(|| container.get(black_box("key32")))
    });
}

fn bench_hop_evaluation(c: &mut Criterion) {
    let (manager, container) = populated(64);
    let keys: Vec<String> = (0..64).map(|i| format!("key{}", i)).collect();
    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
    container.set_expiration_hops(i64::MAX, Some(keys.as_slice())).unwrap();
    let shared = manager.storage();
    let mut ts = Storage::new().request_access_time();

    c.bench_function("container_hop_boundary", |b| {
        b.iter(|| {
            ts += 1.0;
            shared
                .write()
                .unwrap()
                .set_metadata(REQUEST_ACCESS_TIME, json!(ts), true)
                .unwrap();
            container.len()
        })
    });
}

fn bench_blob_round_trip(c: &mut Criterion) {
    let (manager, _container) = populated(256);
    let blob = manager.storage().read().unwrap().to_blob().unwrap();

    c.bench_function("storage_from_blob", |b| {
        b.iter(|| {
            let mut storage = Storage::new();
            storage.from_blob(black_box(&blob)).unwrap();
            storage
        })
    });
}

criterion_group!(benches, bench_get, bench_hop_evaluation, bench_blob_round_trip);
criterion_main!(benches);
