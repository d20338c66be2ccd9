//! Forward cursor over a section.
//!
//! The reader tracks a word position plus the segment that position falls
//! in, so sequential reads never rewalk the chain. Positions can be saved
//! and restored to run independent cursors over the same section.

use std::ops::Deref;

use parking_lot::{MappedRwLockReadGuard, RwLockReadGuard};

use crate::pool::{SegmentId, SegmentPool, DATA_LENGTH};
use crate::section::{Section, SectionView};

/// Saved reader position. Only meaningful for the reader it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderPos {
    pos: usize,
    segment: Option<SegmentId>,
}

/// Zero-copy run of words inside one segment.
///
/// Holds the pool's read lock. Drop it before touching the pool mutably.
pub struct WordRun<'r> {
    words: MappedRwLockReadGuard<'r, [u32]>,
}

impl Deref for WordRun<'_> {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        &self.words
    }
}

impl std::fmt::Debug for WordRun<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordRun").field("len", &self.words.len()).finish()
    }
}

pub struct SectionReader<'a> {
    pool: &'a SegmentPool,
    head: SegmentId,
    len: usize,
    pos: usize,
    /// Segment holding `pos`; `None` once the walk has run off the chain.
    current: Option<SegmentId>,
}

impl<'a> SectionReader<'a> {
    pub fn new(pool: &'a SegmentPool, section: &Section) -> Self {
        Self::from_view(pool, pool.view(section))
    }

    pub fn from_view(pool: &'a SegmentPool, view: SectionView) -> Self {
        Self {
            pool,
            head: view.head,
            len: view.len,
            pos: 0,
            current: Some(view.head),
        }
    }

    /// Rewind to the first word.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.current = Some(self.head);
    }

    pub fn size(&self) -> usize {
        self.len
    }

    pub fn remaining(&self) -> usize {
        self.len.saturating_sub(self.pos)
    }

    /// Move forward to `to`, following as many links as the segment index changes by.
    fn seek(&mut self, to: usize) {
        let hops = to / DATA_LENGTH - self.pos / DATA_LENGTH;
        if hops > 0 {
            let arena = self.pool.arena.read();
            self.current = self.current.and_then(|id| arena.advance(id, hops));
        }
        self.pos = to;
    }

    /// Skip `n` words.
    ///
    /// Fails when that would reach or pass the end. A failed step still
    /// advances the position by exactly one word; callers rely on that and
    /// never read at the resulting position.
    pub fn step(&mut self, n: usize) -> bool {
        if self.pos + n >= self.len {
            self.seek(self.pos + 1);
            return false;
        }
        self.seek(self.pos + n);
        true
    }

    pub fn peek_word(&self) -> Option<u32> {
        if self.pos >= self.len {
            return None;
        }
        let id = self.current?;
        Some(self.pool.arena.read().get(id).data[self.pos % DATA_LENGTH])
    }

    pub fn get_word(&mut self) -> Option<u32> {
        let word = self.peek_word()?;
        self.seek(self.pos + 1);
        Some(word)
    }

    /// Fill `dst` from the cursor without moving it. All or nothing.
    pub fn peek_words(&self, dst: &mut [u32]) -> bool {
        if self.pos + dst.len() > self.len {
            return false;
        }
        let arena = self.pool.arena.read();
        let mut current = self.current;
        let mut index = self.pos % DATA_LENGTH;
        let mut copied = 0;
        while copied < dst.len() {
            let Some(id) = current else { return false };
            let seg = arena.get(id);
            let n = (DATA_LENGTH - index).min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&seg.data[index..index + n]);
            copied += n;
            index = 0;
            current = seg.next;
        }
        true
    }

    pub fn get_words(&mut self, dst: &mut [u32]) -> bool {
        if !self.peek_words(dst) {
            return false;
        }
        self.seek(self.pos + dst.len());
        true
    }

    /// Borrow up to `max` words in place.
    ///
    /// The run never crosses a segment boundary, so it may be shorter than
    /// `max` even when more words remain. The cursor moves past the run.
    pub fn get_words_ptr(&mut self, max: usize) -> Option<WordRun<'_>> {
        if self.pos >= self.len || max == 0 {
            return None;
        }
        let id = self.current?;
        let start = self.pos % DATA_LENGTH;
        let n = max.min(DATA_LENGTH - start).min(self.len - self.pos);

        let arena = self.pool.arena.read();
        let next = arena.get(id).next;
        let words = RwLockReadGuard::map(arena, |a| &a.get(id).data[start..start + n]);

        self.pos += n;
        if self.pos % DATA_LENGTH == 0 {
            self.current = next;
        }
        Some(WordRun { words })
    }

    pub fn get_pos(&self) -> ReaderPos {
        ReaderPos {
            pos: self.pos,
            segment: self.current,
        }
    }

    /// Restore a saved position. Rejects positions past the end.
    pub fn set_pos(&mut self, saved: ReaderPos) -> bool {
        if saved.pos > self.len {
            return false;
        }
        self.pos = saved.pos;
        self.current = saved.segment;
        true
    }

    /// Overwrite the word under the cursor without moving.
    pub fn update_word(&mut self, value: u32) -> bool {
        if self.pos >= self.len {
            return false;
        }
        let Some(id) = self.current else { return false };
        self.pool.arena.write().get_mut(id).data[self.pos % DATA_LENGTH] = value;
        true
    }
}

impl std::fmt::Debug for SectionReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionReader")
            .field("head", &self.head)
            .field("len", &self.len)
            .field("pos", &self.pos)
            .finish()
    }
}
