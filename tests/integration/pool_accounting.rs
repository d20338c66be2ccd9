use crate::*;

use ndbsig_core::{segments_for, PoolError, SectionWriter, DATA_LENGTH};

#[test]
fn segments_in_use_match_section_sizes() {
    let pool = SegmentPool::new(64);
    let sizes = [0, 1, 59, 60, 61, 120, 121, 599];
    let sections: Vec<_> = sizes
        .iter()
        .enumerate()
        .map(|(i, n)| pool.import(&words(i as u64, *n)).unwrap())
        .collect();

    let expected: usize = sizes.iter().map(|n| segments_for(*n)).sum();
    assert_eq!(pool.capacity() - pool.free_count(), expected);
    for (section, n) in sections.iter().zip(sizes) {
        assert_eq!(pool.section_len(section), n);
        pool.verify_section(section).unwrap();
    }

    pool.release_sections(sections);
    assert_eq!(pool.free_count(), 64);
    assert_eq!(pool.stats().high_water, expected);
}

#[test]
fn exhaustion_keeps_nothing_behind() {
    let pool = SegmentPool::new(4);
    let held = pool.import(&words(1, 2 * DATA_LENGTH)).unwrap();

    assert!(matches!(
        pool.import(&words(2, 3 * DATA_LENGTH)),
        Err(PoolError::Exhausted { .. })
    ));
    assert_eq!(pool.free_count(), 2);

    // Appending past capacity leaves the chain as it was
    let mut target = Some(held);
    assert!(pool
        .append_to_section(&mut target, &words(3, 3 * DATA_LENGTH))
        .is_err());
    let held = target.unwrap();
    assert_eq!(pool.copy_section(&held), words(1, 2 * DATA_LENGTH));
    pool.verify_section(&held).unwrap();

    let dup = pool.dup_section(&held).unwrap();
    assert_eq!(pool.free_count(), 0);
    pool.release_section(dup);
    pool.release_section(held);
    assert_eq!(pool.free_count(), 4);
    assert!(pool.stats().seize_failures >= 2);
}

#[test]
fn abandoned_writer_returns_its_segments() {
    let pool = SegmentPool::new(8);
    {
        let mut w = SectionWriter::new(&pool).unwrap();
        w.put_words(&words(4, 250)).unwrap();
        assert!(pool.free_count() < 8);
    }
    assert_eq!(pool.free_count(), 8);

    let mut w = SectionWriter::new(&pool).unwrap();
    w.put_words(&words(5, 2 * DATA_LENGTH)).unwrap();
    let section = w.finish();
    // No empty speculative segment survives finish
    assert_eq!(pool.free_count(), 8 - 2);
    pool.release_section(section);
    assert_eq!(pool.free_count(), 8);
}

#[test]
fn random_traffic_leaves_pool_full() {
    let pool = Arc::new(SegmentPool::new(512));
    let mut a = context(1, &pool, 240);
    let mut b = context(2, &pool, 240);
    let mut rng = StdRng::seed_from_u64(7);

    for round in 0..40u32 {
        let count = rng.gen_range(0..=3);
        let sections: Vec<_> = (0..count)
            .map(|i| {
                let n = rng.gen_range(0..900);
                pool.import(&words(u64::from(round) * 8 + i, n)).unwrap()
            })
            .collect();
        a.send_fragmented(
            ndbsig_fragment::SendRequest::new(9, to_node(2))
                .data(&[round])
                .segmented(sections),
        )
        .unwrap();
        let received = pump(&mut a, &mut b, 2);
        assert_eq!(received.delivered.len(), 1);
        assert_eq!(received.delivered[0].data, vec![round]);
        received.release(&pool);
    }

    assert_eq!(pool.free_count(), 512);
    assert!(b.assembler().is_empty());
}
