//! Append-only section builder.
//!
//! The writer fills one segment at a time and seizes the next as soon as
//! the current one is full, so a put never has to wait on the pool for the
//! word it is writing. `finish` hands back the [`Section`]; an unfinished
//! writer releases its chain on drop.

use crate::error::PoolError;
use crate::pool::{SegmentId, SegmentPool, DATA_LENGTH};
use crate::section::Section;

pub struct SectionWriter<'a> {
    pool: &'a SegmentPool,
    head: SegmentId,
    sealed: bool,
    tail: SegmentId,
    prev: Option<SegmentId>,
    /// Words written into `tail`.
    fill: usize,
    segments: usize,
    len: usize,
}

impl<'a> SectionWriter<'a> {
    pub fn new(pool: &'a SegmentPool) -> Result<Self, PoolError> {
        let head = pool.seize()?;
        Ok(Self {
            pool,
            head,
            sealed: false,
            tail: head,
            prev: None,
            fill: 0,
            segments: 1,
            len: 0,
        })
    }

    /// Words written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn extend(&mut self) -> Result<(), PoolError> {
        let mut arena = self.pool.arena.write();
        let id = arena.seize()?;
        arena.get_mut(self.tail).next = Some(id);
        self.prev = Some(self.tail);
        self.tail = id;
        self.fill = 0;
        self.segments += 1;
        Ok(())
    }

    /// Append one word.
    ///
    /// An `Err` after the word is stored means only the speculative seize
    /// failed; the next put retries it before writing.
    pub fn put_word(&mut self, word: u32) -> Result<(), PoolError> {
        self.put_words(&[word])
    }

    pub fn put_words(&mut self, mut src: &[u32]) -> Result<(), PoolError> {
        while !src.is_empty() {
            if self.fill == DATA_LENGTH {
                self.extend()?;
            }
            let n = (DATA_LENGTH - self.fill).min(src.len());
            self.pool.arena.write().get_mut(self.tail).data[self.fill..self.fill + n]
                .copy_from_slice(&src[..n]);
            self.fill += n;
            self.len += n;
            src = &src[n..];
            if self.fill == DATA_LENGTH {
                self.extend()?;
            }
        }
        Ok(())
    }

    /// Drop everything written and start over on the head segment.
    pub fn reset(&mut self) {
        let head = self.head;
        if self.segments > 1 {
            let mut arena = self.pool.arena.write();
            if let Some(second) = arena.get_mut(head).next.take() {
                arena.release_list(self.segments - 1, second, self.tail);
            }
        }
        self.tail = head;
        self.prev = None;
        self.fill = 0;
        self.segments = 1;
        self.len = 0;
    }

    /// Seal the chain into a section.
    pub fn finish(mut self) -> Section {
        let head = self.head;
        self.sealed = true;
        let mut arena = self.pool.arena.write();

        // Release the speculative segment seized after an exact fill
        if self.fill == 0 {
            if let Some(prev) = self.prev {
                arena.get_mut(prev).next = None;
                arena.release(self.tail);
                self.tail = prev;
            }
        }

        let h = arena.get_mut(head);
        h.size = self.len as u32;
        h.last = Some(self.tail);
        drop(arena);

        tracing::trace!(head = head.index(), len = self.len, "section written");
        Section::from_head(head)
    }
}

impl Drop for SectionWriter<'_> {
    fn drop(&mut self) {
        if !self.sealed {
            self.pool.release_list(self.segments, self.head, self.tail);
        }
    }
}

impl std::fmt::Debug for SectionWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionWriter")
            .field("head", &self.head)
            .field("len", &self.len)
            .field("segments", &self.segments)
            .finish()
    }
}
