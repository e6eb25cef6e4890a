use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};

use dog_parts::{
    DefaultPartCoordinator, DestinationStream, MemoryObjectStore, Part, PartCoordinator,
    PartResult, UploadConfig, UploadOutcome,
};

/// Test factory functions
fn create_coordinator(store: &MemoryObjectStore) -> Arc<DefaultPartCoordinator> {
    Arc::new(
        DefaultPartCoordinator::new(
            DestinationStream::new("events").with_generation_id(3),
            store.clone(),
            UploadConfig::default().with_max_concurrent_part_uploads(4),
        )
        .expect("valid config"),
    )
}

fn data_part(key: &str, index: u64, payload: &str) -> Part {
    Part::new(key, index)
        .with_bytes(Bytes::copy_from_slice(payload.as_bytes()))
        .with_file_number(11)
}

/// Parts 0..=last carrying "p{i};", final marker on `last`
fn numbered_parts(key: &str, last: u64) -> Vec<Part> {
    (0..=last)
        .map(|i| {
            let part = data_part(key, i, &format!("p{};", i));
            if i == last { part.final_part() } else { part }
        })
        .collect()
}

fn expected_content(last: u64) -> Bytes {
    Bytes::from((0..=last).map(|i| format!("p{};", i)).collect::<String>())
}

async fn process_all(
    coordinator: &Arc<DefaultPartCoordinator>,
    parts: Vec<Part>,
) -> Vec<PartResult<UploadOutcome>> {
    let handles = parts.into_iter().map(|part| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.process_part(part).await })
    });

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect()
}

async fn wait_for_opens(store: &MemoryObjectStore, key: &str, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while store.open_count(key) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timeout waiting for transport open");
}

fn completed_count(results: &[PartResult<UploadOutcome>]) -> usize {
    results
        .iter()
        .filter(|r| matches!(r, Ok(outcome) if outcome.is_completed()))
        .count()
}

/// C1. Two-part object: incomplete, then completed
#[tokio::test]
async fn test_two_part_scenario() {
    let store = MemoryObjectStore::new();
    let coordinator = create_coordinator(&store);

    let first = assert_ok!(coordinator.process_part(data_part("a", 0, "payload")).await);
    assert_eq!(first, UploadOutcome::Incomplete { key: "a".to_string() });

    let second = assert_ok!(
        coordinator
            .process_part(Part::new("a", 1).with_bytes(Bytes::new()).final_part().with_file_number(11))
            .await
    );

    match second {
        UploadOutcome::Completed { object, file_number } => {
            assert_eq!(object.key, "a");
            assert_eq!(file_number, 11);
        }
        other => panic!("expected completion, got {:?}", other),
    }
    assert_eq!(store.object("a"), Some(Bytes::from_static(b"payload")));
}

/// C2. Concurrent first arrivals open the transport exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_parts_open_once_and_complete_once() {
    let store = MemoryObjectStore::new().with_open_latency(Duration::from_millis(25));
    let coordinator = create_coordinator(&store);

    let results = process_all(&coordinator, numbered_parts("shared", 31)).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(completed_count(&results), 1);
    assert_eq!(store.open_count("shared"), 1);
    assert_eq!(store.object("shared"), Some(expected_content(31)));
    assert!(coordinator.in_flight_keys().is_empty());
}

/// C3. Delivery order does not change the outcome
#[tokio::test]
async fn test_completion_is_order_independent() {
    let orders: Vec<Vec<u64>> = vec![
        vec![0, 1, 2, 3, 4],
        vec![4, 3, 2, 1, 0],
        vec![2, 4, 0, 3, 1],
        vec![1, 0, 4, 2, 3],
    ];

    for (run, order) in orders.into_iter().enumerate() {
        let store = MemoryObjectStore::new();
        let coordinator = create_coordinator(&store);
        let key = format!("ordered-{}", run);
        let parts = numbered_parts(&key, 4);

        let mut outcomes = Vec::new();
        for index in &order {
            outcomes.push(assert_ok!(coordinator.process_part(parts[*index as usize].clone()).await));
        }

        let completions: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_completed())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(completions, vec![order.len() - 1], "order {:?}", order);
        assert_eq!(store.object(&key), Some(expected_content(4)));
    }
}

/// C4. Redelivered parts neither complete twice nor corrupt tracking
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_delivery_is_idempotent() {
    let store = MemoryObjectStore::new();
    let coordinator = create_coordinator(&store);

    assert_ok!(coordinator.process_part(data_part("dup", 0, "p0;")).await);
    assert_ok!(coordinator.process_part(data_part("dup", 0, "p0;")).await);
    assert_ok!(coordinator.process_part(data_part("dup", 2, "p2;").final_part()).await);

    let session = coordinator.registry().get("dup").expect("session in flight");
    assert_eq!(session.tracker().received_count(), 2);
    assert_eq!(session.tracker().missing(10), vec![1]);

    let mut last = vec![data_part("dup", 1, "p1;")];
    last.extend(std::iter::repeat(data_part("dup", 1, "p1;")).take(3));
    let results = process_all(&coordinator, last).await;

    assert_eq!(completed_count(&results), 1);
    assert_eq!(store.object_version("dup"), Some(1));
    assert_eq!(store.object("dup"), Some(expected_content(2)));
}

/// C5. Placeholder parts count but never reach the transport
#[tokio::test]
async fn test_empty_parts_skip_transport() {
    let store = MemoryObjectStore::new();
    let coordinator = create_coordinator(&store);

    assert_ok!(coordinator.process_part(Part::new("sparse", 0)).await);
    assert_ok!(coordinator.process_part(data_part("sparse", 1, "body")).await);
    let outcome = assert_ok!(
        coordinator
            .process_part(Part::new("sparse", 2).with_bytes(Bytes::new()).final_part())
            .await
    );

    assert!(outcome.is_completed());
    assert_eq!(store.upload_calls("sparse"), vec![1]);
    assert_eq!(store.object("sparse"), Some(Bytes::from_static(b"body")));
}

/// C6. A completed key is forgotten; its next part starts a new session
#[tokio::test]
async fn test_key_reuse_after_completion_starts_fresh_session() {
    let store = MemoryObjectStore::new();
    let coordinator = create_coordinator(&store);

    let first_session = coordinator.registry().get_or_create("reuse").id();
    assert_ok!(coordinator.process_part(data_part("reuse", 0, "v1").final_part()).await);
    assert!(!coordinator.registry().contains("reuse"));

    assert_ok!(coordinator.process_part(data_part("reuse", 0, "v2")).await);
    let second_session = coordinator.registry().get("reuse").expect("new session").id();
    assert_ne!(first_session, second_session);

    let outcome = assert_ok!(coordinator.process_part(Part::new("reuse", 1).final_part()).await);
    assert!(outcome.is_completed());
    assert_eq!(store.open_count("reuse"), 2);
    assert_eq!(store.object_version("reuse"), Some(2));
    assert_eq!(store.object("reuse"), Some(Bytes::from_static(b"v2")));
}

/// C7. A slow open for one key never holds up another key
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_keys_do_not_block_each_other() {
    let store = MemoryObjectStore::new();
    let coordinator = create_coordinator(&store);
    let gate = store.hold_opens("slow");

    let slow = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator.process_part(data_part("slow", 0, "s").final_part()).await
        })
    };
    wait_for_opens(&store, "slow", 1).await;

    let fast = tokio::time::timeout(
        Duration::from_secs(1),
        coordinator.process_part(data_part("fast", 0, "f").final_part()),
    )
    .await
    .expect("open for another key must not wait");
    assert!(assert_ok!(fast).is_completed());
    assert!(!slow.is_finished());

    gate.notify_one();
    let slow = assert_ok!(slow.await.expect("task panicked"));
    assert!(slow.is_completed());
}

/// C8. A failed open is not reused; the next part retries it
#[tokio::test]
async fn test_open_failure_then_fresh_attempt() {
    let store = MemoryObjectStore::new();
    let coordinator = create_coordinator(&store);
    store.fail_next_open("x");

    let err = assert_err!(coordinator.process_part(data_part("x", 0, "a")).await);
    assert!(err.is_session_open());
    assert_eq!(err.key(), Some("x"));
    assert!(!coordinator.registry().contains("x"));

    let outcome = assert_ok!(coordinator.process_part(data_part("x", 0, "a").final_part()).await);
    assert!(outcome.is_completed());
    assert_eq!(store.open_count("x"), 2);
}

/// C9. Every caller waiting on a failed open sees the failure
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_open_failure_reaches_all_waiters() {
    let store = MemoryObjectStore::new();
    let coordinator = create_coordinator(&store);
    let gate = store.hold_opens("x");
    store.fail_next_open("x");

    let handles: Vec<_> = numbered_parts("x", 4)
        .into_iter()
        .map(|part| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.process_part(part).await })
        })
        .collect();

    wait_for_opens(&store, "x", 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.notify_one();

    for handle in handles {
        let err = assert_err!(handle.await.expect("task panicked"));
        assert!(err.is_session_open(), "unexpected error: {}", err);
    }
    assert_eq!(store.open_count("x"), 1);
    assert!(coordinator.in_flight_keys().is_empty());
}

/// C10. A failed part write keeps the session for a redelivery
#[tokio::test]
async fn test_part_upload_failure_keeps_session() {
    let store = MemoryObjectStore::new();
    let coordinator = create_coordinator(&store);
    store.fail_next_upload("retry");

    let err = assert_err!(coordinator.process_part(data_part("retry", 0, "p0;")).await);
    assert!(err.is_part_upload());
    assert!(coordinator.registry().contains("retry"));

    assert_ok!(coordinator.process_part(data_part("retry", 0, "p0;")).await);
    let outcome = assert_ok!(coordinator.process_part(data_part("retry", 1, "p1;").final_part()).await);

    assert!(outcome.is_completed());
    assert_eq!(store.open_count("retry"), 1);
    assert_eq!(store.object("retry"), Some(expected_content(1)));
}

/// C11. A failed commit keeps the session; resubmitting the part finalizes
#[tokio::test]
async fn test_finalize_failure_keeps_session() {
    let store = MemoryObjectStore::new();
    let coordinator = create_coordinator(&store);
    store.fail_next_complete("commit");

    assert_ok!(coordinator.process_part(data_part("commit", 0, "p0;")).await);
    let err = assert_err!(coordinator.process_part(data_part("commit", 1, "p1;").final_part()).await);
    assert!(err.is_finalize());
    assert!(coordinator.registry().contains("commit"));
    assert!(store.object("commit").is_none());

    let outcome = assert_ok!(coordinator.process_part(data_part("commit", 1, "p1;").final_part()).await);
    assert!(outcome.is_completed());
    assert_eq!(store.open_count("commit"), 1);
    assert_eq!(store.object("commit"), Some(expected_content(1)));
    assert!(!coordinator.registry().contains("commit"));
}

/// C12. Cancelling the opener releases its waiters with a failure
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_open_releases_waiters() {
    let store = MemoryObjectStore::new();
    let coordinator = create_coordinator(&store);
    store.hold_opens("c");

    let opener = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.process_part(data_part("c", 0, "a")).await })
    };
    wait_for_opens(&store, "c", 1).await;

    let waiter = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.process_part(data_part("c", 1, "b").final_part()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    opener.abort();
    assert!(opener.await.unwrap_err().is_cancelled());

    let err = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter must not hang")
        .expect("task panicked")
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(!coordinator.registry().contains("c"));

    store.release_opens("c");
    assert_ok!(coordinator.process_part(data_part("c", 0, "a")).await);
    assert_eq!(store.open_count("c"), 2);
}

/// C13. Many keys in parallel each complete exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_keys_in_parallel() {
    let store = MemoryObjectStore::new().with_open_latency(Duration::from_millis(5));
    let coordinator = create_coordinator(&store);

    let parts: Vec<Part> = (0..8)
        .flat_map(|k| numbered_parts(&format!("bulk/{}", k), 5))
        .collect();
    let results = process_all(&coordinator, parts).await;

    assert_eq!(completed_count(&results), 8);
    assert_eq!(store.total_opens(), 8);
    for k in 0..8 {
        assert_eq!(store.object(&format!("bulk/{}", k)), Some(expected_content(5)));
    }
    assert!(coordinator.in_flight_keys().is_empty());
}

/// C14. A part redelivered while the object commits is absorbed, not failed
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redelivery_during_finalize_is_idempotent() {
    let store = MemoryObjectStore::new();
    let coordinator = Arc::new(assert_ok!(DefaultPartCoordinator::new(
        DestinationStream::new("events"),
        store.clone(),
        UploadConfig::default().with_max_concurrent_part_uploads(1),
    )));

    assert_ok!(coordinator.process_part(data_part("race", 0, "p0;")).await);
    let session = coordinator.registry().get("race").expect("session in flight");
    let slot = assert_ok!(session.acquire_upload_slot().await);

    let duplicate = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.process_part(data_part("race", 0, "p0;")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let last = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.process_part(Part::new("race", 1).final_part()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.object("race").is_none());
    drop(slot);

    let duplicate = assert_ok!(duplicate.await.expect("task panicked"));
    let last = assert_ok!(last.await.expect("task panicked"));

    assert!(!duplicate.is_completed());
    assert!(last.is_completed());
    assert_eq!(store.object("race"), Some(Bytes::from_static(b"p0;")));
    assert_eq!(store.object_version("race"), Some(1));
    assert!(!coordinator.registry().contains("race"));
}

/// C15. A part that waited out a successful commit is dropped quietly
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_write_after_commit_is_ignored() {
    let store = MemoryObjectStore::new();
    let coordinator = Arc::new(assert_ok!(DefaultPartCoordinator::new(
        DestinationStream::new("events"),
        store.clone(),
        UploadConfig::default().with_max_concurrent_part_uploads(1),
    )));

    assert_ok!(coordinator.process_part(data_part("late", 0, "p0;")).await);
    let session = coordinator.registry().get("late").expect("session in flight");

    // Commit while a redelivery of part 0 is queued for the upload slot.
    let finalize = session.try_begin_finalize().expect("finalize gate free");
    let drained = assert_ok!(session.drain_uploads().await);
    let duplicate = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.process_part(data_part("late", 0, "p0;")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    finalize.commit();
    drop(drained);

    let outcome = assert_ok!(duplicate.await.expect("task panicked"));
    assert!(!outcome.is_completed());
    assert_eq!(store.upload_calls("late"), vec![0]);
}
