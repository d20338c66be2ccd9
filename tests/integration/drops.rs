use crate::*;

use ndbsig_core::{FragInfo, Section};
use ndbsig_fragment::{FragmentKey, SendRequest};

/// Send a 5-fragment train (60, 60, 60, 60, 160 words) from node 1 to
/// node 2, losing the deliveries in `lost`.
fn lossy_train(lost: &[usize]) -> (Arc<SegmentPool>, Received, Context) {
    let pool = Arc::new(SegmentPool::new(128));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);
    for n in lost {
        a.transport_mut().drop_delivery(*n);
    }

    let sections: Vec<Section> = vec![pool.import(&words(70, 400)).unwrap()];
    a.send_fragmented(SendRequest::new(21, to_node(2)).data(&[5, 6]).segmented(sections))
        .unwrap();
    let received = pump(&mut a, &mut b, 2);
    let lens: Vec<Vec<usize>> = a
        .transport()
        .history()
        .iter()
        .map(|r| r.section_lens.clone())
        .collect();
    assert_eq!(lens, vec![vec![60], vec![60], vec![60], vec![60], vec![160]]);
    (pool, received, b)
}

#[test]
fn losing_any_fragment_reports_one_drop() {
    for lost in 0..5 {
        let (pool, received, b) = lossy_train(&[lost]);
        assert!(received.delivered.is_empty(), "lost fragment {lost}");
        assert_eq!(received.dropped.len(), 1, "lost fragment {lost}");
        let dropped = &received.dropped[0];
        assert_eq!(dropped.gsn, 21);
        assert_eq!(dropped.sender, block(1));
        // The drop report still carries the inline words
        assert_eq!(dropped.data, vec![5, 6]);
        assert!(b.assembler().is_empty());
        received.release(&pool);
        assert_eq!(pool.free_count(), 128, "lost fragment {lost}");
    }
}

#[test]
fn losing_several_fragments_still_reports_once() {
    let (pool, received, b) = lossy_train(&[1, 3]);
    assert_eq!(received.dropped.len(), 1);
    assert!(b.assembler().is_empty());
    received.release(&pool);
    assert_eq!(pool.free_count(), 128);
}

#[test]
fn dropped_train_does_not_disturb_the_next_one() {
    let pool = Arc::new(SegmentPool::new(128));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);
    a.transport_mut().drop_delivery(1);

    let first = words(71, 300);
    let second = words(72, 300);
    for (id, w) in [(1u32, &first), (2, &second)] {
        let s = pool.import(w).unwrap();
        a.send_fragmented(SendRequest::new(22, to_node(2)).data(&[id]).segmented(vec![s]))
            .unwrap();
    }
    let received = pump(&mut a, &mut b, 2);
    assert_eq!(received.dropped.len(), 1);
    assert_eq!(received.delivered.len(), 1);
    let signal = &received.delivered[0];
    let expect = if signal.data[0] == 1 { &first } else { &second };
    assert_eq!(pool.copy_section(&signal.sections[0]), *expect);
    received.release(&pool);
    assert_eq!(pool.free_count(), 128);
}

#[test]
fn unfragmented_loss_is_reported_directly() {
    let pool = Arc::new(SegmentPool::new(16));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);
    a.transport_mut().drop_delivery(0);

    let s = pool.import(&words(73, 20)).unwrap();
    a.send_fragmented(SendRequest::new(23, to_node(2)).data(&[8]).segmented(vec![s]))
        .unwrap();
    assert_eq!(a.transport().history()[0].frag_info, FragInfo::None);
    let received = pump(&mut a, &mut b, 2);
    assert_eq!(received.dropped.len(), 1);
    assert_eq!(received.dropped[0].data, vec![8]);
    assert_eq!(pool.free_count(), 16);
}

#[test]
#[should_panic(expected = "invariant violation")]
fn unknown_train_from_live_node_is_fatal() {
    let pool = Arc::new(SegmentPool::new(32));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);
    let s = pool.import(&words(74, 300)).unwrap();
    a.send_fragmented(SendRequest::new(24, to_node(2)).segmented(vec![s]))
        .unwrap();
    a.run_until_idle(100);

    // Skip the First fragment and hand over the Middle one
    let _first = a.transport_mut().pop(2);
    if let Some(Delivery::Signal(middle)) = a.transport_mut().pop(2) {
        let key = FragmentKey {
            fragment_id: 1,
            sender: block(1),
        };
        assert!(!b.assembler().contains(&key));
        b.receive(middle);
    }
}
