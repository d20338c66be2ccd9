use crate::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use ndbsig_core::FragInfo;
use ndbsig_fragment::{Assembly, SendOutcome, SendRequest, SendStatus};

/// Callback that stores the cleaned-element count.
fn counter() -> (Arc<AtomicUsize>, ndbsig_fragment::CleanupCallback) {
    let seen = Arc::new(AtomicUsize::new(usize::MAX));
    let store = seen.clone();
    (
        seen,
        Box::new(move |_: NodeId, n: usize| store.store(n, Ordering::SeqCst)),
    )
}

/// Hand the next `n` queued deliveries for `node` to `to`.
fn feed(from: &mut Context, to: &mut Context, node: NodeId, n: usize) {
    for _ in 0..n {
        match from.transport_mut().pop(node) {
            Some(Delivery::Signal(signal)) => {
                assert!(matches!(to.receive(signal), Assembly::Pending));
            }
            other => panic!("expected a fragment, got {other:?}"),
        }
    }
}

#[test]
fn receiver_discards_partial_trains_of_failed_sender() {
    let pool = Arc::new(SegmentPool::new(128));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);
    let s = pool.import(&words(80, 400)).unwrap();
    a.send_fragmented(SendRequest::new(30, to_node(2)).segmented(vec![s]))
        .unwrap();
    a.run_until_idle(100);
    feed(&mut a, &mut b, 2, 2);
    assert_eq!(b.assembler().len(), 1);

    let (seen, callback) = counter();
    b.node_failure(1, Some(callback));
    b.run_until_idle(100);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(b.assembler().is_empty());

    // Stragglers of the failed sender are released without delivery
    let late = pump(&mut a, &mut b, 2);
    assert!(late.delivered.is_empty());
    assert!(late.dropped.is_empty());
    assert_eq!(pool.free_count(), 128);
}

#[test]
fn multicast_train_continues_to_surviving_receiver() {
    let pool = Arc::new(SegmentPool::new(256));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);
    let mut c = context(3, &pool, 100);
    let src = words(81, 500);
    let s = pool.import(&src).unwrap();

    let receivers = ReceiverGroup::new(BLOCK, [2, 3].into_iter().collect());
    a.send_fragmented(SendRequest::new(31, receivers).segmented(vec![s]))
        .unwrap();
    feed(&mut a, &mut c, 3, 1);

    let (seen, callback) = counter();
    a.node_failure(3, Some(callback));
    a.run_until_idle(1000);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(!a.sender().has_pending());

    let sent_to = |node: NodeId| a.transport().history().iter().filter(|r| r.node == node).count();
    assert!(sent_to(3) < sent_to(2));

    let to_b = pump(&mut a, &mut b, 2);
    assert_eq!(pool.copy_section(&to_b.delivered[0].sections[0]), src);
    to_b.release(&pool);

    // Node 3 holds a partial train until it learns node 1 failed
    let to_c = pump(&mut a, &mut c, 3);
    assert!(to_c.delivered.is_empty());
    assert_eq!(c.assembler().len(), 1);
    c.node_failure(1, None);
    c.run_until_idle(100);
    assert!(c.assembler().is_empty());
    assert_eq!(pool.free_count(), 256);
}

#[test]
fn train_with_no_receivers_left_is_cancelled() {
    let pool = Arc::new(SegmentPool::new(64));
    let mut a = context(1, &pool, 100);
    let outcome: Arc<Mutex<Option<SendOutcome>>> = Arc::default();
    let store = outcome.clone();

    let s = pool.import(&words(82, 600)).unwrap();
    a.send_fragmented(
        SendRequest::new(32, to_node(2))
            .segmented(vec![s])
            .on_complete(move |o| *store.lock().unwrap() = Some(o)),
    )
    .unwrap();
    a.node_failure(2, None);
    a.run_until_idle(100);

    let outcome = outcome.lock().unwrap().expect("callback ran");
    assert_eq!(outcome.status, SendStatus::Cancelled);
    assert_eq!(outcome.fragments_sent as usize, a.transport().history().len());
    assert!(!a.sender().has_pending());
    a.transport_mut().discard(&pool, 2);
    assert_eq!(pool.free_count(), 64);
}

#[test]
fn cleanup_is_spread_over_bounded_steps() {
    let pool = Arc::new(SegmentPool::new(512));
    let mut a = context(1, &pool, 100);
    let mut b = ExecutionContext::new(
        block(2),
        pool.clone(),
        LocalTransport::new(),
        FragmentSettings {
            max_fragment_words: 100,
            work_units: 4,
            ..FragmentSettings::default()
        },
    );

    for i in 0..40 {
        let s = pool.import(&words(90 + i, 300)).unwrap();
        a.send_fragmented(SendRequest::new(33, to_node(2)).segmented(vec![s]))
            .unwrap();
    }
    let firsts = a.transport().pending(2);
    assert_eq!(firsts, 40);
    feed(&mut a, &mut b, 2, firsts);
    assert_eq!(b.assembler().len(), 40);

    let (seen, callback) = counter();
    b.node_failure(1, Some(callback));
    assert!(b.run_once(Instant::now()));
    let after_one = b.assembler().len();
    assert!(after_one < 40 && after_one > 0, "{after_one} left after one step");
    assert_eq!(seen.load(Ordering::SeqCst), usize::MAX);

    b.run_until_idle(1000);
    assert!(b.assembler().is_empty());
    assert_eq!(seen.load(Ordering::SeqCst), 40);

    a.node_failure(2, None);
    a.run_until_idle(1000);
    a.transport_mut().discard(&pool, 2);
    assert_eq!(pool.free_count(), 512);
}

#[test]
fn rejoined_node_can_start_new_trains() {
    let pool = Arc::new(SegmentPool::new(128));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);

    b.node_failure(1, None);
    b.run_until_idle(100);
    b.node_rejoined(1);

    let src = words(83, 350);
    let s = pool.import(&src).unwrap();
    a.send_fragmented(SendRequest::new(34, to_node(2)).segmented(vec![s]))
        .unwrap();
    let received = pump(&mut a, &mut b, 2);
    assert!(a
        .transport()
        .history()
        .iter()
        .any(|r| r.frag_info == FragInfo::Last));
    assert_eq!(pool.copy_section(&received.delivered[0].sections[0]), src);
    received.release(&pool);
    assert_eq!(pool.free_count(), 128);
}
