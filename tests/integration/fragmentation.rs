use crate::*;

use ndbsig_core::wire::MAX_SECTIONS;
use ndbsig_core::{FragInfo, Priority, Section, DATA_LENGTH};
use ndbsig_fragment::{SendError, SendRequest, SendStatus};

/// Section shapes exercised against every budget.
const SHAPES: &[&[usize]] = &[
    &[],
    &[0],
    &[59, 60, 61],
    &[700],
    &[130, 5, 400],
    &[0, 0, 1000],
    &[181, 1, 239],
];

fn send_shape(budget: usize, shape: &[usize], seed: u64) {
    let pool = Arc::new(SegmentPool::new(512));
    let mut a = context(1, &pool, budget);
    let mut b = context(2, &pool, budget);

    let expected: Vec<Vec<u32>> = shape
        .iter()
        .enumerate()
        .map(|(i, n)| words(seed + i as u64, *n))
        .collect();
    let sections: Vec<Section> = expected.iter().map(|w| pool.import(w).unwrap()).collect();
    let data = [budget as u32, 0xabc];

    a.send_fragmented(SendRequest::new(77, to_node(2)).data(&data).segmented(sections))
        .unwrap();
    let received = pump(&mut a, &mut b, 2);

    assert!(received.dropped.is_empty());
    assert_eq!(received.delivered.len(), 1, "budget {budget} shape {shape:?}");
    let signal = &received.delivered[0];
    assert_eq!(signal.gsn, 77);
    assert_eq!(signal.sender, block(1));
    assert_eq!(signal.data, data);
    let got: Vec<Vec<u32>> = signal.sections.iter().map(|s| pool.copy_section(s)).collect();
    assert_eq!(got, expected, "budget {budget} shape {shape:?}");
    for s in &signal.sections {
        pool.verify_section(s).unwrap();
    }

    // Every physical fragment respects the budget, give or take one segment
    for record in a.transport().history() {
        let total: usize = record.section_lens.iter().sum();
        assert!(total <= budget + DATA_LENGTH, "fragment of {total} words");
    }

    received.release(&pool);
    assert!(b.assembler().is_empty());
    assert_eq!(pool.free_count(), 512, "budget {budget} shape {shape:?}");
}

#[test]
fn every_shape_reassembles_around_segment_multiples() {
    let b = 2 * DATA_LENGTH;
    for budget in [b - 1, b, b + 1, 2 * b + 7] {
        for (i, shape) in SHAPES.iter().enumerate() {
            send_shape(budget, shape, 1000 * budget as u64 + i as u64);
        }
    }
}

#[test]
fn budget_100_cuts_250_words_into_60_60_130() {
    let pool = Arc::new(SegmentPool::new(32));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);
    let src = words(21, 250);
    let s = pool.import(&src).unwrap();

    let status = a
        .send_fragmented(SendRequest::new(5, to_node(2)).data(&[9]).segmented(vec![s]))
        .unwrap();
    assert_eq!(status, SendStatus::NotComplete);
    let received = pump(&mut a, &mut b, 2);

    let history = a.transport().history();
    let infos: Vec<FragInfo> = history.iter().map(|r| r.frag_info).collect();
    assert_eq!(infos, vec![FragInfo::First, FragInfo::Middle, FragInfo::Last]);
    let lens: Vec<Vec<usize>> = history.iter().map(|r| r.section_lens.clone()).collect();
    assert_eq!(lens, vec![vec![60], vec![60], vec![130]]);

    assert_eq!(pool.copy_section(&received.delivered[0].sections[0]), src);
    received.release(&pool);
    assert_eq!(pool.free_count(), 32);
}

#[test]
fn fits_within_one_segment_of_budget_goes_unfragmented() {
    let pool = Arc::new(SegmentPool::new(32));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);

    let s = pool.import(&words(22, 100 + DATA_LENGTH)).unwrap();
    let status = a
        .send_fragmented(SendRequest::new(5, to_node(2)).segmented(vec![s]))
        .unwrap();
    assert_eq!(status, SendStatus::Complete);
    assert_eq!(a.transport().history()[0].frag_info, FragInfo::None);

    let s = pool.import(&words(23, 100 + DATA_LENGTH + 1)).unwrap();
    let status = a
        .send_fragmented(SendRequest::new(5, to_node(2)).segmented(vec![s]))
        .unwrap();
    assert_eq!(status, SendStatus::NotComplete);

    let received = pump(&mut a, &mut b, 2);
    assert_eq!(received.delivered.len(), 2);
    received.release(&pool);
    assert_eq!(pool.free_count(), 32);
}

#[test]
fn interleaved_trains_keep_their_sections_apart() {
    let pool = Arc::new(SegmentPool::new(512));
    let mut a = context(1, &pool, 120);
    let mut b = context(2, &pool, 120);

    let mut expected = Vec::new();
    for id in 0..5u32 {
        let w = words(30 + u64::from(id), 300 + 97 * id as usize);
        let s = pool.import(&w).unwrap();
        a.send_fragmented(SendRequest::new(6, to_node(2)).data(&[id]).segmented(vec![s]))
            .unwrap();
        expected.push(w);
    }
    let received = pump(&mut a, &mut b, 2);
    assert_eq!(received.delivered.len(), 5);
    for signal in &received.delivered {
        let id = signal.data[0] as usize;
        assert_eq!(pool.copy_section(&signal.sections[0]), expected[id]);
    }

    // Each train opens with its own First fragment
    let firsts = a
        .transport()
        .history()
        .iter()
        .filter(|r| r.frag_info == FragInfo::First)
        .count();
    assert_eq!(firsts, 5);
    received.release(&pool);
    assert_eq!(pool.free_count(), 512);
}

#[test]
fn linear_sections_arrive_like_segmented_ones() {
    let pool = Arc::new(SegmentPool::new(128));
    let mut a = context(1, &pool, 120);
    let mut b = context(2, &pool, 120);
    let bufs: Vec<Vec<u32>> = (0..MAX_SECTIONS as u64).map(|i| words(40 + i, 150 + 200 * i as usize)).collect();

    a.send_fragmented(SendRequest::new(8, to_node(2)).linear(bufs.clone()))
        .unwrap();
    let received = pump(&mut a, &mut b, 2);
    let got: Vec<Vec<u32>> = received.delivered[0]
        .sections
        .iter()
        .map(|s| pool.copy_section(s))
        .collect();
    assert_eq!(got, bufs);
    received.release(&pool);
    assert_eq!(pool.free_count(), 128);
}

#[test]
fn no_release_send_keeps_callers_sections() {
    let pool = Arc::new(SegmentPool::new(128));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);
    let first = words(50, 420);
    let second = words(51, 75);
    let s0 = pool.import(&first).unwrap();
    let s1 = pool.import(&second).unwrap();

    let outcome = a.send_no_release(3, &[1, 2, 3], &[&s0, &s1], to_node(2)).unwrap();
    assert_eq!(outcome.status, SendStatus::Complete);
    assert!(outcome.fragment_id != 0);
    assert!(!a.sender().has_pending());

    let received = pump(&mut a, &mut b, 2);
    let signal = &received.delivered[0];
    assert_eq!(signal.data, vec![1, 2, 3]);
    assert_eq!(pool.copy_section(&signal.sections[0]), first);
    assert_eq!(pool.copy_section(&signal.sections[1]), second);
    received.release(&pool);
    assert_eq!(pool.free_count(), 128 - 7 - 2);

    // The caller's chains are intact
    assert_eq!(pool.copy_section(&s0), first);
    pool.verify_section(&s0).unwrap();
    pool.verify_section(&s1).unwrap();
    pool.release_sections([s0, s1]);
    assert_eq!(pool.free_count(), 128);
}

#[test]
fn no_release_to_overloaded_node_leaves_sections_alone() {
    let pool = Arc::new(SegmentPool::new(64));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);
    let src = words(52, 420);
    let s = pool.import(&src).unwrap();
    let before = pool.free_count();

    a.transport_mut().set_overloaded(2, true);
    let err = a.send_no_release(3, &[1], &[&s], to_node(2)).unwrap_err();
    assert!(matches!(err, SendError::Overloaded));
    assert!(a.transport().history().is_empty());
    assert_eq!(pool.free_count(), before);
    assert_eq!(pool.copy_section(&s), src);
    pool.verify_section(&s).unwrap();

    // Once the node drains, the same sections go out
    a.transport_mut().set_overloaded(2, false);
    let outcome = a.send_no_release(3, &[1], &[&s], to_node(2)).unwrap();
    assert_eq!(outcome.status, SendStatus::Complete);
    let received = pump(&mut a, &mut b, 2);
    assert_eq!(pool.copy_section(&received.delivered[0].sections[0]), src);
    received.release(&pool);
    pool.release_section(s);
    assert_eq!(pool.free_count(), 64);
}

#[test]
fn trains_with_different_budgets_interleave() {
    let pool = Arc::new(SegmentPool::new(64));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);
    let narrow = words(53, 250);
    let wide = words(54, 600);

    let s = pool.import(&narrow).unwrap();
    a.send_fragmented(SendRequest::new(30, to_node(2)).segmented(vec![s]))
        .unwrap();
    let s = pool.import(&wide).unwrap();
    a.send_fragmented(
        SendRequest::new(31, to_node(2))
            .max_fragment_words(240)
            .segmented(vec![s]),
    )
    .unwrap();
    let received = pump(&mut a, &mut b, 2);

    let lens = |gsn: u16| -> Vec<Vec<usize>> {
        a.transport()
            .history()
            .iter()
            .filter(|r| r.gsn == gsn)
            .map(|r| r.section_lens.clone())
            .collect()
    };
    assert_eq!(lens(30), vec![vec![60], vec![60], vec![130]]);
    assert_eq!(lens(31), vec![vec![240], vec![240], vec![120]]);

    assert_eq!(received.delivered.len(), 2);
    for signal in &received.delivered {
        let expect = if signal.gsn == 30 { &narrow } else { &wide };
        assert_eq!(pool.copy_section(&signal.sections[0]), *expect);
    }
    received.release(&pool);
    assert_eq!(pool.free_count(), 64);
}

#[test]
fn multicast_train_reaches_every_receiver() {
    let pool = Arc::new(SegmentPool::new(256));
    let mut a = context(1, &pool, 120);
    let mut b = context(2, &pool, 120);
    let mut c = context(3, &pool, 120);
    let src = words(60, 500);
    let s = pool.import(&src).unwrap();

    let receivers = ReceiverGroup::new(BLOCK, [2, 3].into_iter().collect());
    a.send_fragmented(
        SendRequest::new(12, receivers)
            .priority(Priority::High)
            .segmented(vec![s]),
    )
    .unwrap();
    let to_b = pump(&mut a, &mut b, 2);
    let to_c = pump(&mut a, &mut c, 3);
    assert_eq!(pool.copy_section(&to_b.delivered[0].sections[0]), src);
    assert_eq!(pool.copy_section(&to_c.delivered[0].sections[0]), src);
    to_b.release(&pool);
    to_c.release(&pool);
    assert_eq!(pool.free_count(), 256);
}
