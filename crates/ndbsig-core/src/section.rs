//! Sections — variable-length word buffers stored as segment chains.
//!
//! A [`Section`] owns its chain: it is move-only, and releasing it consumes
//! the handle. The head segment records the total size and the tail; the
//! tail's `next` is `None`. An empty section still owns one segment, so a
//! section of `n` words always spans `segments_for(n)` segments.

use crate::error::{fatal, InvariantViolation, PoolError, SectionError};
use crate::pool::{Arena, SegmentId, SegmentPool, DATA_LENGTH};

/// Segments spanned by a section of `len` words.
pub fn segments_for(len: usize) -> usize {
    len.div_ceil(DATA_LENGTH).max(1)
}

/// Owning handle on a segment chain.
#[must_use = "a section owns pool segments and must be released"]
#[derive(Debug, PartialEq, Eq)]
pub struct Section {
    head: SegmentId,
}

impl Section {
    pub(crate) fn from_head(head: SegmentId) -> Self {
        Self { head }
    }

    pub fn head(&self) -> SegmentId {
        self.head
    }

    /// Raw i-value of the head segment.
    pub fn ival(&self) -> u32 {
        self.head.index()
    }
}

/// A readable run of `len` words starting at the first word of `head`.
///
/// Views carry no ownership. `head` may be any segment of a chain; the view
/// ignores the header fields that only the chain head maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionView {
    pub head: SegmentId,
    pub len: usize,
}

// ── Locked helpers ────────────────────────────────────────────────────────────

fn import_locked(arena: &mut Arena, src: &[u32]) -> Result<Section, PoolError> {
    let head = arena.seize()?;
    let mut tail = head;
    let mut seized = 1;

    let mut chunks = src.chunks(DATA_LENGTH);
    if let Some(first) = chunks.next() {
        arena.get_mut(head).data[..first.len()].copy_from_slice(first);
    }
    for chunk in chunks {
        let id = match arena.seize() {
            Ok(id) => id,
            Err(e) => {
                arena.release_list(seized, head, tail);
                return Err(e);
            }
        };
        arena.get_mut(id).data[..chunk.len()].copy_from_slice(chunk);
        arena.get_mut(tail).next = Some(id);
        tail = id;
        seized += 1;
    }

    let h = arena.get_mut(head);
    h.size = src.len() as u32;
    h.last = Some(tail);
    Ok(Section { head })
}

fn append_locked(arena: &mut Arena, head: SegmentId, src: &[u32]) -> Result<(), PoolError> {
    if src.is_empty() {
        return Ok(());
    }
    let (size, old_tail) = {
        let h = arena.get(head);
        (h.size as usize, h.last.unwrap_or(head))
    };

    // Fill the current tail first
    let used = size - (segments_for(size) - 1) * DATA_LENGTH;
    let fill = (DATA_LENGTH - used).min(src.len());
    let rest = &src[fill..];

    // Seize the extension before touching the chain so failure leaves it intact
    let mut ext: Option<(SegmentId, SegmentId)> = None;
    let mut seized = 0;
    for chunk in rest.chunks(DATA_LENGTH) {
        let id = match arena.seize() {
            Ok(id) => id,
            Err(e) => {
                if let Some((ext_head, ext_tail)) = ext {
                    arena.release_list(seized, ext_head, ext_tail);
                }
                return Err(e);
            }
        };
        arena.get_mut(id).data[..chunk.len()].copy_from_slice(chunk);
        ext = Some(match ext {
            None => (id, id),
            Some((ext_head, ext_tail)) => {
                arena.get_mut(ext_tail).next = Some(id);
                (ext_head, id)
            }
        });
        seized += 1;
    }

    arena.get_mut(old_tail).data[used..used + fill].copy_from_slice(&src[..fill]);
    let new_tail = match ext {
        Some((ext_head, ext_tail)) => {
            arena.get_mut(old_tail).next = Some(ext_head);
            ext_tail
        }
        None => old_tail,
    };

    let h = arena.get_mut(head);
    h.size = (size + src.len()) as u32;
    h.last = Some(new_tail);
    Ok(())
}

fn release_locked(arena: &mut Arena, section: Section) {
    let (size, last) = {
        let h = arena.get(section.head);
        (h.size as usize, h.last.unwrap_or(section.head))
    };
    arena.release_list(segments_for(size), section.head, last);
}

fn copy_view_locked(arena: &Arena, view: SectionView, dst: &mut [u32]) {
    let mut current = Some(view.head);
    let mut copied = 0;
    while copied < view.len {
        let Some(id) = current else { break };
        let seg = arena.get(id);
        let n = (view.len - copied).min(DATA_LENGTH);
        dst[copied..copied + n].copy_from_slice(&seg.data[..n]);
        copied += n;
        current = seg.next;
    }
}

// ── Section operations ────────────────────────────────────────────────────────

impl SegmentPool {
    /// Copy `src` into a fresh chain. Atomic: on exhaustion nothing is kept.
    pub fn import(&self, src: &[u32]) -> Result<Section, PoolError> {
        import_locked(&mut self.arena.write(), src)
    }

    /// Append `src`, importing into `section` when it is `None`.
    ///
    /// On exhaustion the existing chain is left exactly as it was.
    pub fn append_to_section(
        &self,
        section: &mut Option<Section>,
        src: &[u32],
    ) -> Result<(), PoolError> {
        let mut arena = self.arena.write();
        match section {
            None => {
                *section = Some(import_locked(&mut arena, src)?);
                Ok(())
            }
            Some(s) => append_locked(&mut arena, s.head, src),
        }
    }

    /// Overwrite words in place. Never grows the section.
    pub fn write_to_section(
        &self,
        section: &Section,
        offset: usize,
        src: &[u32],
    ) -> Result<(), SectionError> {
        let mut arena = self.arena.write();
        let size = arena.get(section.head).size as usize;
        if offset + src.len() > size {
            return Err(SectionError::OutOfRange {
                offset,
                len: src.len(),
                size,
            });
        }

        let mut current = arena.advance(section.head, offset / DATA_LENGTH);
        let mut index = offset % DATA_LENGTH;
        let mut written = 0;
        while written < src.len() {
            let Some(id) = current else { break };
            let n = (DATA_LENGTH - index).min(src.len() - written);
            let seg = arena.get_mut(id);
            seg.data[index..index + n].copy_from_slice(&src[written..written + n]);
            written += n;
            index = 0;
            current = seg.next;
        }
        Ok(())
    }

    /// Deep copy through repeated appends. A partial copy is released on failure.
    pub fn dup_section(&self, src: &Section) -> Result<Section, PoolError> {
        let mut arena = self.arena.write();
        let size = arena.get(src.head).size as usize;

        let mut dst: Option<Section> = None;
        let mut current = Some(src.head);
        let mut remaining = size;
        let mut buf = [0u32; DATA_LENGTH];
        loop {
            let Some(id) = current else { break };
            let n = remaining.min(DATA_LENGTH);
            let seg = arena.get(id);
            buf[..n].copy_from_slice(&seg.data[..n]);
            current = seg.next;

            let result = match dst.as_ref().map(|d| d.head) {
                None => import_locked(&mut arena, &buf[..n]).map(|s| {
                    dst = Some(s);
                }),
                Some(head) => append_locked(&mut arena, head, &buf[..n]),
            };
            if let Err(e) = result {
                if let Some(partial) = dst {
                    release_locked(&mut arena, partial);
                }
                return Err(e);
            }

            remaining -= n;
            if remaining == 0 {
                break;
            }
        }

        match dst {
            Some(d) => Ok(d),
            None => import_locked(&mut arena, &[]),
        }
    }

    /// Return the whole chain to the pool. Segment count comes from the size.
    pub fn release_section(&self, section: Section) {
        release_locked(&mut self.arena.write(), section);
    }

    pub fn release_sections(&self, sections: impl IntoIterator<Item = Section>) {
        let mut arena = self.arena.write();
        for section in sections {
            release_locked(&mut arena, section);
        }
    }

    /// Size in words.
    pub fn section_len(&self, section: &Section) -> usize {
        self.arena.read().get(section.head).size as usize
    }

    pub fn view(&self, section: &Section) -> SectionView {
        SectionView {
            head: section.head,
            len: self.section_len(section),
        }
    }

    /// The segment `n` links after `id`, if the chain is that long.
    pub fn segment_after(&self, id: SegmentId, n: usize) -> Option<SegmentId> {
        self.arena.read().advance(id, n)
    }

    pub fn copy_section(&self, section: &Section) -> Vec<u32> {
        self.copy_view(self.view(section))
    }

    pub fn copy_view(&self, view: SectionView) -> Vec<u32> {
        let mut out = vec![0; view.len];
        copy_view_locked(&self.arena.read(), view, &mut out);
        out
    }

    /// Copy the section into the front of `dst`, returning the word count.
    pub fn copy_section_into(
        &self,
        section: &Section,
        dst: &mut [u32],
    ) -> Result<usize, SectionError> {
        let arena = self.arena.read();
        let len = arena.get(section.head).size as usize;
        if dst.len() < len {
            return Err(SectionError::DestinationTooSmall {
                have: dst.len(),
                need: len,
            });
        }
        copy_view_locked(
            &arena,
            SectionView {
                head: section.head,
                len,
            },
            dst,
        );
        Ok(len)
    }

    /// Walk the chain and check size, tail and termination.
    pub fn verify_section(&self, section: &Section) -> Result<(), SectionError> {
        let arena = self.arena.read();
        let head = arena
            .try_get(section.head)
            .ok_or(SectionError::DeadSegment(section.head.index()))?;
        let recorded = segments_for(head.size as usize);
        let recorded_tail = head.last.unwrap_or(section.head);

        let mut walked = 0;
        let mut tail = section.head;
        let mut current = Some(section.head);
        while let Some(id) = current {
            let seg = arena.try_get(id).ok_or(SectionError::DeadSegment(id.index()))?;
            walked += 1;
            tail = id;
            current = seg.next;
            if walked > recorded {
                break;
            }
        }

        if walked != recorded {
            return Err(SectionError::SegmentCountMismatch { recorded, walked });
        }
        if tail != recorded_tail {
            return Err(SectionError::TailMismatch {
                recorded: recorded_tail.index(),
                walked: tail.index(),
            });
        }
        Ok(())
    }

    /// BLAKE3 digest of the section's words (little-endian).
    pub fn section_digest(&self, section: &Section) -> [u8; 32] {
        let arena = self.arena.read();
        let mut remaining = arena.get(section.head).size as usize;
        let mut hasher = blake3::Hasher::new();
        let mut current = Some(section.head);
        while remaining > 0 {
            let Some(id) = current else { break };
            let seg = arena.get(id);
            let n = remaining.min(DATA_LENGTH);
            for word in &seg.data[..n] {
                hasher.update(&word.to_le_bytes());
            }
            remaining -= n;
            current = seg.next;
        }
        *hasher.finalize().as_bytes()
    }

    /// Trace-level dump of every segment.
    pub fn dump_section(&self, section: &Section) {
        let arena = self.arena.read();
        let size = arena.get(section.head).size as usize;
        tracing::trace!(head = section.head.index(), size, "section dump");
        let mut remaining = size;
        let mut current = Some(section.head);
        while let Some(id) = current {
            let seg = arena.get(id);
            let n = remaining.min(DATA_LENGTH);
            let bytes: Vec<u8> = seg.data[..n].iter().flat_map(|w| w.to_le_bytes()).collect();
            tracing::trace!(segment = id.index(), words = n, data = hex::encode(bytes));
            remaining -= n;
            current = seg.next;
        }
    }

    /// Tag the head segment with an owner reference.
    pub fn tag_section(&self, section: &Section, owner: u32) {
        self.arena.write().get_mut(section.head).owner = owner;
    }

    pub fn section_owner(&self, section: &Section) -> u32 {
        self.arena.read().get(section.head).owner
    }

    /// Cut the chain after `keep` segments and return the remainder.
    ///
    /// Both heads get rewritten headers: the kept part holds exactly
    /// `keep * DATA_LENGTH` words.
    pub fn split_section(&self, section: &mut Section, keep: usize) -> Section {
        let mut arena = self.arena.write();
        let (size, last) = {
            let h = arena.get(section.head);
            (h.size as usize, h.last.unwrap_or(section.head))
        };
        let segments = segments_for(size);
        if keep == 0 || keep >= segments {
            fatal(InvariantViolation::InvalidSplit { keep, segments });
        }

        let Some(boundary) = arena.advance(section.head, keep - 1) else {
            fatal(InvariantViolation::InvalidSplit { keep, segments });
        };
        let Some(rest_head) = arena.get_mut(boundary).next.take() else {
            fatal(InvariantViolation::InvalidSplit { keep, segments });
        };

        let h = arena.get_mut(section.head);
        h.size = (keep * DATA_LENGTH) as u32;
        h.last = Some(boundary);

        let r = arena.get_mut(rest_head);
        r.size = (size - keep * DATA_LENGTH) as u32;
        r.last = Some(last);

        Section { head: rest_head }
    }

    /// Splice `tail` onto the end of `dst` in O(1).
    ///
    /// `dst` must end on a segment boundary. An empty `dst` is replaced by
    /// `tail`, and an empty `tail` is simply released.
    pub fn link_sections(&self, dst: &mut Section, tail: Section) {
        let mut arena = self.arena.write();
        let (dst_size, dst_last) = {
            let h = arena.get(dst.head);
            (h.size as usize, h.last.unwrap_or(dst.head))
        };
        let (tail_size, tail_last) = {
            let t = arena.get(tail.head);
            (t.size as usize, t.last.unwrap_or(tail.head))
        };

        if tail_size == 0 {
            release_locked(&mut arena, tail);
            return;
        }
        if dst_size == 0 {
            let empty = std::mem::replace(dst, tail);
            release_locked(&mut arena, empty);
            return;
        }
        if dst_size % DATA_LENGTH != 0 {
            fatal(InvariantViolation::UnalignedSplice { len: dst_size });
        }

        arena.get_mut(dst_last).next = Some(tail.head);
        arena.get_mut(tail.head).normalize_header();
        let h = arena.get_mut(dst.head);
        h.size = (dst_size + tail_size) as u32;
        h.last = Some(tail_last);
    }
}
