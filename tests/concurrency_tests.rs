//! Concurrency stress tests and queue properties
//!
//! These tests run many matchmaking calls at once and check that the queue
//! keeps its ordering and deduplication guarantees.

mod fixtures;

use fixtures::create_test_system;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_100_concurrent_match_requests() {
    let system = Arc::new(create_test_system());
    let concurrent_requests = 100;

    let start = Instant::now();
    let handles: Vec<_> = (0..concurrent_requests)
        .map(|i| {
            let system = system.clone();
            tokio::spawn(async move { system.request(&format!("user_{}", i)).await })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }
    let elapsed = start.elapsed();

    assert_eq!(accepted, concurrent_requests);
    let stats = system.matchmaker.get_stats().await.unwrap();
    assert_eq!(stats.waiting_users, concurrent_requests);
    assert_eq!(stats.queue_length, concurrent_requests);

    println!(
        "✅ {} concurrent requests processed in {:?}",
        concurrent_requests, elapsed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pairing_never_double_books() {
    let system = Arc::new(create_test_system());
    let users = 100;

    for i in 0..users {
        assert!(system.request(&format!("user_{}", i)).await);
    }

    let handles: Vec<_> = (0..users / 2)
        .map(|_| {
            let system = system.clone();
            tokio::spawn(async move { system.matchmaker.pair_next().await.unwrap() })
        })
        .collect();

    let mut pairs = Vec::new();
    for handle in handles {
        if let Some(pair) = handle.await.unwrap() {
            pairs.push(pair);
        }
    }

    assert_eq!(pairs.len(), users / 2);
    assert_eq!(system.matchmaker.pair_next().await.unwrap(), None);

    let mut seen = HashSet::new();
    for (a, b) in &pairs {
        assert_ne!(a, b);
        assert!(seen.insert(a.clone()), "{} paired twice", a);
        assert!(seen.insert(b.clone()), "{} paired twice", b);

        assert_eq!(
            system.matchmaker.partner_of(a).await.unwrap().as_ref(),
            Some(b)
        );
        assert_eq!(
            system.matchmaker.partner_of(b).await.unwrap().as_ref(),
            Some(a)
        );
    }
    assert_eq!(seen.len(), users);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_disconnects_tear_down_pairs() {
    let system = Arc::new(create_test_system());
    let mut clients = Vec::new();

    for i in 0..20 {
        let client = system.connect(&format!("user_{}", i));
        system.request(&client.user_id).await;
        clients.push(client);
    }
    while system.matchmaker.pair_next().await.unwrap().is_some() {}

    let handles: Vec<_> = clients
        .iter()
        .step_by(2)
        .map(|client| {
            let system = system.clone();
            let user_id = client.user_id.clone();
            let connection_id = client.connection_id;
            tokio::spawn(async move {
                system
                    .matchmaker
                    .disconnect(&user_id, connection_id)
                    .await
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let stats = system.matchmaker.get_stats().await.unwrap();
    assert_eq!(stats.paired_users, 0);
    assert_eq!(stats.connected_users, 10);
}

fn run<F: std::future::Future>(future: F) -> F::Output {
    tokio_test::block_on(future)
}

proptest! {
    #[test]
    fn prop_dequeue_preserves_arrival_order(
        users in prop::collection::vec("[a-z]{1,8}", 1..30)
    ) {
        let mut seen = BTreeSet::new();
        let expected: Vec<String> = users
            .into_iter()
            .filter(|user| seen.insert(user.clone()))
            .collect();

        let dequeued = run(async {
            let system = create_test_system();
            for user in &expected {
                system.request(user).await;
            }

            let store = system.matchmaker.store();
            let mut out = Vec::new();
            while let Some(user) = store.dequeue_valid().await.unwrap() {
                out.push(user);
            }
            out
        });

        prop_assert_eq!(dequeued, expected);
    }

    #[test]
    fn prop_repeat_request_is_rejected(
        user in "[a-z0-9]{1,12}",
        repeats in 1usize..5
    ) {
        let results = run(async {
            let system = create_test_system();
            let mut results = Vec::new();
            for _ in 0..=repeats {
                results.push(system.request(&user).await);
            }
            results
        });

        prop_assert!(results[0]);
        prop_assert!(results[1..].iter().all(|accepted| !accepted));
    }

    #[test]
    fn prop_cancelled_users_are_skipped(
        flags in prop::collection::vec(any::<bool>(), 1..30)
    ) {
        let (dequeued, expected) = run(async {
            let system = create_test_system();
            let mut expected = Vec::new();

            for (i, cancel) in flags.iter().enumerate() {
                let user = format!("user_{}", i);
                system.request(&user).await;
                if *cancel {
                    system.matchmaker.cancel_request(&user).await.unwrap();
                } else {
                    expected.push(user);
                }
            }

            let store = system.matchmaker.store();
            let mut out = Vec::new();
            while let Some(user) = store.dequeue_valid().await.unwrap() {
                out.push(user);
            }
            assert_eq!(store.queue_len().await.unwrap(), 0);
            (out, expected)
        });

        prop_assert_eq!(dequeued, expected);
    }
}
