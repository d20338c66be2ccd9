use crate::*;

use ndbsig_core::{PropertiesReader, PropertyValue, SectionReader, SectionWriter, DATA_LENGTH};
use ndbsig_fragment::SendRequest;

#[test]
fn properties_survive_a_fragmented_send() {
    let pool = Arc::new(SegmentPool::new(256));
    let mut a = context(1, &pool, 100);
    let mut b = context(2, &pool, 100);

    let blob: Vec<u8> = (0..=255u8).cycle().take(700).collect();
    let mut w = SectionWriter::new(&pool).unwrap();
    w.put_u32_property(1, 0xdead_beef).unwrap();
    w.put_str_property(2, "NodeGroup").unwrap();
    w.put_binary_property(3, &blob).unwrap();
    w.put_u32_property(4, 7).unwrap();
    let section = w.finish();
    let len = pool.section_len(&section);
    assert!(len > 2 * DATA_LENGTH);

    a.send_fragmented(SendRequest::new(40, to_node(2)).segmented(vec![section]))
        .unwrap();
    let received = pump(&mut a, &mut b, 2);
    assert_eq!(received.delivered.len(), 1);
    let got = &received.delivered[0].sections[0];
    assert_eq!(pool.section_len(got), len);
    pool.verify_section(got).unwrap();

    let mut reader = SectionReader::new(&pool, got);
    let props: Vec<(u16, PropertyValue)> = PropertiesReader::new(&mut reader)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        props,
        vec![
            (1, PropertyValue::Uint32(0xdead_beef)),
            (2, PropertyValue::String("NodeGroup".into())),
            (3, PropertyValue::Binary(blob)),
            (4, PropertyValue::Uint32(7)),
        ]
    );
    received.release(&pool);
    assert_eq!(pool.free_count(), 256);
}

#[test]
fn independent_cursors_over_one_section() {
    let pool = SegmentPool::new(8);
    let src = words(11, 200);
    let section = pool.import(&src).unwrap();

    let mut r = SectionReader::new(&pool, &section);
    assert!(r.step(59));
    let at_59 = r.get_pos();
    assert_eq!(r.get_word(), Some(src[59]));
    assert_eq!(r.get_word(), Some(src[60]));

    let mut run = Vec::new();
    while let Some(chunk) = r.get_words_ptr(1000) {
        assert!(chunk.len() <= DATA_LENGTH);
        run.extend_from_slice(&chunk);
    }
    assert_eq!(run, src[61..]);

    assert!(r.set_pos(at_59));
    let mut two = [0u32; 2];
    assert!(r.get_words(&mut two));
    assert_eq!(two, [src[59], src[60]]);

    // Rewrite a word through the cursor and see it from a second reader
    assert!(r.update_word(1));
    let mut other = SectionReader::new(&pool, &section);
    assert!(other.step(61));
    assert_eq!(other.peek_word(), Some(1));
    pool.release_section(section);
}

#[test]
fn failed_step_overshoots_by_one_word() {
    let pool = SegmentPool::new(4);
    let section = pool.import(&words(12, 100)).unwrap();
    let mut r = SectionReader::new(&pool, &section);
    assert!(r.step(10));
    assert!(!r.step(90));
    assert_eq!(r.remaining(), 89);
    pool.release_section(section);
}

#[test]
fn split_then_link_rebuilds_the_chain() {
    let pool = SegmentPool::new(16);
    let src = words(13, 400);
    let mut head = pool.import(&src).unwrap();

    let mut rest = pool.split_section(&mut head, 2);
    let tail = pool.split_section(&mut rest, 3);
    assert_eq!(pool.section_len(&head), 120);
    assert_eq!(pool.section_len(&rest), 180);
    assert_eq!(pool.section_len(&tail), 100);
    for s in [&head, &rest, &tail] {
        pool.verify_section(s).unwrap();
    }

    pool.link_sections(&mut head, rest);
    pool.link_sections(&mut head, tail);
    pool.verify_section(&head).unwrap();
    assert_eq!(pool.copy_section(&head), src);
    pool.release_section(head);
    assert_eq!(pool.free_count(), 16);
}

#[test]
fn digest_follows_content_not_layout() {
    let pool = SegmentPool::new(16);
    let src = words(14, 333);
    let whole = pool.import(&src).unwrap();

    let mut built = None;
    for chunk in src.chunks(37) {
        pool.append_to_section(&mut built, chunk).unwrap();
    }
    let built = built.unwrap();
    assert_eq!(pool.section_digest(&whole), pool.section_digest(&built));

    pool.write_to_section(&built, 300, &[0]).unwrap();
    assert_ne!(pool.section_digest(&whole), pool.section_digest(&built));
    assert!(pool.write_to_section(&built, 333, &[0]).is_err());

    pool.release_sections([whole, built]);
    assert_eq!(pool.free_count(), 16);
}
