//! Concurrent registry tests

use lksocks::session::SessionRegistry;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::time::Duration;

fn peer(i: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 10_000 + i))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_register_unregister() {
    let registry = SessionRegistry::new();

    // register from 20 tasks at once
    let mut tasks = Vec::new();
    for worker in 0..20u16 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let mut guards = Vec::new();
            for i in 0..50u16 {
                guards.push(registry.register(peer(worker * 50 + i)));
                tokio::task::yield_now().await;
            }
            guards
        }));
    }
    let mut guards = Vec::new();
    for task in tasks {
        guards.extend(task.await.unwrap());
    }
    assert_eq!(registry.len(), 1000);

    let mut ids: Vec<_> = guards.iter().map(|g| g.id()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 1000);
    ids.shuffle(&mut rand::thread_rng());

    let mut tasks = Vec::new();
    for chunk in ids.chunks(50) {
        let chunk = chunk.to_vec();
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            for id in chunk {
                assert!(registry.unregister(id));
                // second removal is a no-op
                assert!(!registry.unregister(id));
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(registry.is_empty());
    drop(guards);
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_guards_dropped_across_tasks() {
    let registry = SessionRegistry::new();
    let mut tasks = Vec::new();

    for i in 0..200u16 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let guard = registry.register(peer(i));
            let delay = rand::random::<u64>() % 5;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            assert!(registry.contains(guard.id()));
            guard.id()
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 200);
    assert!(registry.is_empty());
}
