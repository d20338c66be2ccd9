//! Fragmented sending.
//!
//! A signal whose sections exceed the per-fragment budget is cut into a
//! train of physical fragments. The first goes out immediately; the rest
//! follow one per tick through [`FragmentSender::continue_sending`], so a
//! long train never monopolises its execution context. Each fragment
//! carries whole sections where they fit and otherwise a segment-aligned
//! piece of the next one, which keeps every non-final piece a multiple of
//! `DATA_LENGTH` and lets the receiver splice pieces without copying.

use std::collections::BTreeMap;
use std::ops::Bound;

use ndbsig_core::wire::{push_fragment_trailer, WireError, MAX_INLINE_WORDS, MAX_SECTIONS};
use ndbsig_core::{
    fatal, segments_for, BlockRef, FragInfo, InvariantViolation, NodeId, PoolError, Priority,
    ReceiverGroup, Section, SectionView, SegmentPool, DATA_LENGTH,
};

use crate::assembler::Sweep;
use crate::signal::{OutgoingSignal, SectionPayload, SignalTransport};

pub type SendCallback = Box<dyn FnOnce(SendOutcome) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    NotComplete,
    /// Every receiver failed; the train stops at the next tick.
    Cancelled,
    Complete,
}

/// Reported to the completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    /// Zero for signals that went out unfragmented.
    pub fragment_id: u32,
    pub fragments_sent: u32,
    /// `Complete`, or `Cancelled` if the train was abandoned.
    pub status: SendStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Wire(#[from] WireError),
    /// A no-release send found its receivers overloaded and sent nothing.
    #[error("receivers overloaded")]
    Overloaded,
}

/// Sections handed to a send. Ownership passes to the sender.
#[derive(Debug)]
pub enum SendSections {
    Segmented(Vec<Section>),
    Linear(Vec<Vec<u32>>),
}

pub struct SendRequest<'d> {
    pub gsn: u16,
    pub data: &'d [u32],
    pub sections: SendSections,
    pub receivers: ReceiverGroup,
    pub priority: Priority,
    /// Fragment budget for this train; the sender's default when `None`.
    pub max_fragment_words: Option<usize>,
    pub callback: Option<SendCallback>,
}

impl<'d> SendRequest<'d> {
    pub fn new(gsn: u16, receivers: ReceiverGroup) -> Self {
        Self {
            gsn,
            data: &[],
            sections: SendSections::Segmented(Vec::new()),
            receivers,
            priority: Priority::Normal,
            max_fragment_words: None,
            callback: None,
        }
    }

    pub fn data(mut self, data: &'d [u32]) -> Self {
        self.data = data;
        self
    }

    pub fn segmented(mut self, sections: Vec<Section>) -> Self {
        self.sections = SendSections::Segmented(sections);
        self
    }

    pub fn linear(mut self, sections: Vec<Vec<u32>>) -> Self {
        self.sections = SendSections::Linear(sections);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_fragment_words(mut self, words: usize) -> Self {
        self.max_fragment_words = Some(words);
        self
    }

    pub fn on_complete(mut self, callback: impl FnOnce(SendOutcome) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// Identifies an in-flight train. Also its position in the send lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SendId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendList {
    Segmented,
    Linear,
}

/// What one call to `send_next_*_fragment` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentStep {
    Sent { complete: bool },
    /// The transport is overloaded; nothing was sent.
    Blocked,
    /// The train was abandoned and its resources released.
    Cancelled,
}

/// Result of one pass over both send lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub sent: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub blocked: usize,
}

// ── Send slots ────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum SendSlot {
    Empty,
    Owned(Section),
    /// The caller keeps the chain; only valid inside `send_no_release`.
    Borrowed(SectionView),
    Linear { words: Vec<u32>, offset: usize },
}

/// The part of a slot one fragment carries.
enum Detached {
    Owned(Section),
    View(SectionView),
    Words(Vec<u32>),
}

struct Piece {
    slot: usize,
    words: usize,
    whole: bool,
}

impl SendSlot {
    fn remaining(&self, pool: &SegmentPool) -> Option<usize> {
        match self {
            Self::Empty => None,
            Self::Owned(section) => Some(pool.section_len(section)),
            Self::Borrowed(view) => Some(view.len),
            Self::Linear { words, offset } => Some(words.len() - offset),
        }
    }

    fn payload(&self, pool: &SegmentPool) -> Option<SectionPayload<'_>> {
        match self {
            Self::Empty => None,
            Self::Owned(section) => Some(SectionPayload::Segmented(pool.view(section))),
            Self::Borrowed(view) => Some(SectionPayload::Segmented(*view)),
            Self::Linear { words, offset } => Some(SectionPayload::Linear(&words[*offset..])),
        }
    }

    /// Take the first `words` words off the slot, or all of it when `whole`.
    fn detach(&mut self, pool: &SegmentPool, words: usize, whole: bool) -> Detached {
        match std::mem::replace(self, SendSlot::Empty) {
            SendSlot::Empty => Detached::Words(Vec::new()),
            SendSlot::Owned(mut section) => {
                if !whole {
                    let rest = pool.split_section(&mut section, words / DATA_LENGTH);
                    *self = SendSlot::Owned(rest);
                }
                Detached::Owned(section)
            }
            SendSlot::Borrowed(view) => {
                if whole {
                    return Detached::View(view);
                }
                let keep = words / DATA_LENGTH;
                let Some(rest) = pool.segment_after(view.head, keep) else {
                    fatal(InvariantViolation::InvalidSplit {
                        keep,
                        segments: segments_for(view.len),
                    });
                };
                *self = SendSlot::Borrowed(SectionView {
                    head: rest,
                    len: view.len - words,
                });
                Detached::View(SectionView {
                    head: view.head,
                    len: words,
                })
            }
            SendSlot::Linear {
                words: mut buf,
                offset,
            } => {
                if whole {
                    buf.drain(..offset);
                    return Detached::Words(buf);
                }
                let piece = buf[offset..offset + words].to_vec();
                *self = SendSlot::Linear {
                    words: buf,
                    offset: offset + words,
                };
                Detached::Words(piece)
            }
        }
    }

    fn release(&mut self, pool: &SegmentPool) {
        if let SendSlot::Owned(section) = std::mem::replace(self, SendSlot::Empty) {
            pool.release_section(section);
        }
    }
}

fn empty_slots() -> [SendSlot; MAX_SECTIONS] {
    std::array::from_fn(|_| SendSlot::Empty)
}

fn release_slots(pool: &SegmentPool, slots: &mut [SendSlot; MAX_SECTIONS]) {
    for slot in slots.iter_mut() {
        slot.release(pool);
    }
}

/// Choose what the next fragment carries.
///
/// Sections are taken from the highest number down. Whole sections go in
/// while they fit; one may overshoot the budget by up to a segment. A larger
/// overshoot splits the section at the last segment boundary that fits,
/// or after one segment if the fragment would otherwise be empty.
fn plan_fragment(
    slots: &[SendSlot; MAX_SECTIONS],
    pool: &SegmentPool,
    budget: usize,
) -> (Vec<Piece>, bool) {
    let mut pieces: Vec<Piece> = Vec::new();
    let mut used = 0;
    for slot in (0..MAX_SECTIONS).rev() {
        let Some(len) = slots[slot].remaining(pool) else {
            continue;
        };
        if used + len <= budget {
            pieces.push(Piece {
                slot,
                words: len,
                whole: true,
            });
            used += len;
            continue;
        }
        if used + len - budget <= DATA_LENGTH {
            pieces.push(Piece {
                slot,
                words: len,
                whole: true,
            });
            break;
        }
        let mut keep = (budget - used) / DATA_LENGTH;
        if keep == 0 {
            if !pieces.is_empty() {
                break;
            }
            keep = 1;
        }
        pieces.push(Piece {
            slot,
            words: keep * DATA_LENGTH,
            whole: false,
        });
        break;
    }

    let last = (0..MAX_SECTIONS).all(|slot| {
        matches!(slots[slot], SendSlot::Empty)
            || pieces.iter().any(|p| p.slot == slot && p.whole)
    });
    (pieces, last)
}

/// Whether the sections fit one physical signal.
fn fits_unfragmented(slots: &[SendSlot; MAX_SECTIONS], pool: &SegmentPool, budget: usize) -> bool {
    let total: usize = slots.iter().filter_map(|s| s.remaining(pool)).sum();
    total <= budget + DATA_LENGTH
}

// ── Fragment send info ────────────────────────────────────────────────────────

struct FragmentSendInfo {
    gsn: u16,
    fragment_id: u32,
    receivers: ReceiverGroup,
    priority: Priority,
    /// Words per fragment, fixed when the train starts.
    budget: usize,
    slots: [SendSlot; MAX_SECTIONS],
    /// Private copy of the inline words, sent with the last fragment.
    inline: Option<Section>,
    status: SendStatus,
    fragments_sent: u32,
    callback: Option<SendCallback>,
}

impl FragmentSendInfo {
    /// Send one fragment.
    fn emit<T: SignalTransport>(
        &mut self,
        pool: &SegmentPool,
        transport: &mut T,
        sender: BlockRef,
    ) -> SendStatus {
        let (pieces, last) = plan_fragment(&self.slots, pool, self.budget);

        let detached: Vec<Detached> = pieces
            .iter()
            .map(|p| self.slots[p.slot].detach(pool, p.words, p.whole))
            .collect();
        let payloads: Vec<SectionPayload<'_>> = detached
            .iter()
            .map(|d| match d {
                Detached::Owned(section) => SectionPayload::Segmented(pool.view(section)),
                Detached::View(view) => SectionPayload::Segmented(*view),
                Detached::Words(words) => SectionPayload::Linear(words),
            })
            .collect();

        let mut data = match (&self.inline, last) {
            (Some(inline), true) => pool.copy_section(inline),
            _ => Vec::new(),
        };
        let numbers: Vec<u8> = pieces.iter().map(|p| p.slot as u8).collect();
        push_fragment_trailer(&mut data, &numbers, self.fragment_id);

        let frag_info = match (self.fragments_sent, last) {
            (0, _) => FragInfo::First,
            (_, true) => FragInfo::Last,
            _ => FragInfo::Middle,
        };

        transport.transmit(
            pool,
            &self.receivers,
            &OutgoingSignal {
                gsn: self.gsn,
                sender,
                priority: self.priority,
                frag_info,
                data: &data,
                sections: &payloads,
            },
        );
        tracing::debug!(
            fragment_id = self.fragment_id,
            frag_info = ?frag_info,
            sections = payloads.len(),
            words = payloads.iter().map(SectionPayload::len).sum::<usize>(),
            "fragment sent"
        );
        drop(payloads);

        for d in detached {
            if let Detached::Owned(section) = d {
                pool.release_section(section);
            }
        }
        self.fragments_sent += 1;

        if last {
            if let Some(inline) = self.inline.take() {
                pool.release_section(inline);
            }
            self.status = SendStatus::Complete;
        }
        self.status
    }

    fn release(&mut self, pool: &SegmentPool) {
        release_slots(pool, &mut self.slots);
        if let Some(inline) = self.inline.take() {
            pool.release_section(inline);
        }
    }

    /// Run the callback and hand back the outcome.
    fn finish(mut self, status: SendStatus) -> SendOutcome {
        let outcome = SendOutcome {
            fragment_id: self.fragment_id,
            fragments_sent: self.fragments_sent,
            status,
        };
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
        outcome
    }
}

// ── Sender ────────────────────────────────────────────────────────────────────

/// Per-context sending state: the fragment id counter and both send lists.
pub struct FragmentSender {
    own_ref: BlockRef,
    max_fragment_words: usize,
    last_fragment_id: u32,
    next_send_id: u64,
    segmented: BTreeMap<SendId, FragmentSendInfo>,
    linear: BTreeMap<SendId, FragmentSendInfo>,
}

impl FragmentSender {
    pub fn new(own_ref: BlockRef, max_fragment_words: usize) -> Self {
        Self {
            own_ref,
            max_fragment_words,
            last_fragment_id: 0,
            next_send_id: 0,
            segmented: BTreeMap::new(),
            linear: BTreeMap::new(),
        }
    }

    pub fn own_ref(&self) -> BlockRef {
        self.own_ref
    }

    pub fn max_fragment_words(&self) -> usize {
        self.max_fragment_words
    }

    /// Next fragment id. Wraps, never zero.
    fn next_fragment_id(&mut self) -> u32 {
        self.last_fragment_id = self.last_fragment_id.wrapping_add(1);
        if self.last_fragment_id == 0 {
            self.last_fragment_id = 1;
        }
        self.last_fragment_id
    }

    fn list(&self, list: SendList) -> &BTreeMap<SendId, FragmentSendInfo> {
        match list {
            SendList::Segmented => &self.segmented,
            SendList::Linear => &self.linear,
        }
    }

    fn list_mut(&mut self, list: SendList) -> &mut BTreeMap<SendId, FragmentSendInfo> {
        match list {
            SendList::Segmented => &mut self.segmented,
            SendList::Linear => &mut self.linear,
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.segmented.is_empty() || !self.linear.is_empty()
    }

    /// Trains in flight on `list`.
    pub fn in_flight(&self, list: SendList) -> usize {
        self.list(list).len()
    }

    /// Receivers still attached to an in-flight train.
    pub fn receivers(&self, list: SendList, id: SendId) -> Option<ReceiverGroup> {
        self.list(list).get(&id).map(|info| info.receivers)
    }

    fn validate(data: &[u32], sections: usize) -> Result<(), WireError> {
        if data.len() > MAX_INLINE_WORDS {
            return Err(WireError::TooManyInlineWords(data.len()));
        }
        if sections > MAX_SECTIONS {
            return Err(WireError::TooManySections(sections));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn send_unfragmented<T: SignalTransport>(
        &self,
        pool: &SegmentPool,
        transport: &mut T,
        gsn: u16,
        priority: Priority,
        data: &[u32],
        slots: &[SendSlot; MAX_SECTIONS],
        receivers: &ReceiverGroup,
    ) {
        let payloads: Vec<SectionPayload<'_>> =
            slots.iter().filter_map(|s| s.payload(pool)).collect();
        transport.transmit(
            pool,
            receivers,
            &OutgoingSignal {
                gsn,
                sender: self.own_ref,
                priority,
                frag_info: FragInfo::None,
                data,
                sections: &payloads,
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn new_train(
        &mut self,
        pool: &SegmentPool,
        gsn: u16,
        data: &[u32],
        slots: [SendSlot; MAX_SECTIONS],
        receivers: ReceiverGroup,
        priority: Priority,
        budget: usize,
        callback: Option<SendCallback>,
    ) -> Result<FragmentSendInfo, SendError> {
        let mut slots = slots;
        let inline = match pool.import(data) {
            Ok(section) => section,
            Err(e) => {
                release_slots(pool, &mut slots);
                return Err(e.into());
            }
        };
        Ok(FragmentSendInfo {
            gsn,
            fragment_id: self.next_fragment_id(),
            receivers,
            priority,
            budget,
            slots,
            inline: Some(inline),
            status: SendStatus::NotComplete,
            fragments_sent: 0,
            callback,
        })
    }

    /// Start a send, taking ownership of its sections.
    ///
    /// Small signals go out whole. Larger ones send their first fragment
    /// now and join a send list; `continue_sending` drives the rest. On
    /// error the sections have already been released.
    pub fn send_first_fragment<T: SignalTransport>(
        &mut self,
        pool: &SegmentPool,
        transport: &mut T,
        request: SendRequest<'_>,
    ) -> Result<(SendStatus, Option<SendId>), SendError> {
        let SendRequest {
            gsn,
            data,
            sections,
            receivers,
            priority,
            max_fragment_words,
            callback,
        } = request;
        let budget = max_fragment_words.unwrap_or(self.max_fragment_words);

        let mut slots = empty_slots();
        let (count, list) = match sections {
            SendSections::Segmented(sections) => {
                let count = sections.len();
                if count > MAX_SECTIONS {
                    pool.release_sections(sections);
                    return Err(WireError::TooManySections(count).into());
                }
                for (slot, section) in slots.iter_mut().zip(sections) {
                    *slot = SendSlot::Owned(section);
                }
                (count, SendList::Segmented)
            }
            SendSections::Linear(buffers) => {
                let count = buffers.len();
                for (slot, words) in slots.iter_mut().zip(buffers) {
                    *slot = SendSlot::Linear { words, offset: 0 };
                }
                (count, SendList::Linear)
            }
        };
        if let Err(e) = Self::validate(data, count) {
            release_slots(pool, &mut slots);
            return Err(e.into());
        }

        if fits_unfragmented(&slots, pool, budget) {
            self.send_unfragmented(pool, transport, gsn, priority, data, &slots, &receivers);
            release_slots(pool, &mut slots);
            let outcome = SendOutcome {
                fragment_id: 0,
                fragments_sent: 1,
                status: SendStatus::Complete,
            };
            if let Some(callback) = callback {
                callback(outcome);
            }
            return Ok((SendStatus::Complete, None));
        }

        let mut info =
            self.new_train(pool, gsn, data, slots, receivers, priority, budget, callback)?;
        tracing::debug!(
            fragment_id = info.fragment_id,
            gsn,
            budget,
            list = ?list,
            "fragmented send started"
        );
        info.emit(pool, transport, self.own_ref);

        let id = SendId(self.next_send_id);
        self.next_send_id += 1;
        self.list_mut(list).insert(id, info);
        Ok((SendStatus::NotComplete, Some(id)))
    }

    /// Send a signal whose sections stay with the caller.
    ///
    /// The whole train goes out before returning. Fragments are cut from
    /// borrowed views, so the caller's chains are never modified and the
    /// train cannot outlive the call. Overload and receiver failure are
    /// therefore checked once, up front: an overloaded receiver set gives
    /// `SendError::Overloaded` and an empty one a `Cancelled` outcome,
    /// both with nothing sent. Once the first fragment is out the rest
    /// follow regardless of overload.
    #[allow(clippy::too_many_arguments)]
    pub fn send_no_release<T: SignalTransport>(
        &mut self,
        pool: &SegmentPool,
        transport: &mut T,
        gsn: u16,
        data: &[u32],
        sections: &[&Section],
        receivers: ReceiverGroup,
        priority: Priority,
    ) -> Result<SendOutcome, SendError> {
        Self::validate(data, sections.len())?;
        if receivers.nodes.is_empty() {
            return Ok(SendOutcome {
                fragment_id: 0,
                fragments_sent: 0,
                status: SendStatus::Cancelled,
            });
        }
        if transport.is_overloaded(&receivers) {
            tracing::debug!(gsn, "no-release send refused, receivers overloaded");
            return Err(SendError::Overloaded);
        }

        let mut slots = empty_slots();
        for (slot, section) in slots.iter_mut().zip(sections) {
            *slot = SendSlot::Borrowed(pool.view(section));
        }

        if fits_unfragmented(&slots, pool, self.max_fragment_words) {
            self.send_unfragmented(pool, transport, gsn, priority, data, &slots, &receivers);
            return Ok(SendOutcome {
                fragment_id: 0,
                fragments_sent: 1,
                status: SendStatus::Complete,
            });
        }

        let budget = self.max_fragment_words;
        let mut info = self.new_train(pool, gsn, data, slots, receivers, priority, budget, None)?;
        while info.emit(pool, transport, self.own_ref) != SendStatus::Complete {}
        Ok(info.finish(SendStatus::Complete))
    }

    fn send_next_fragment<T: SignalTransport>(
        &mut self,
        list: SendList,
        pool: &SegmentPool,
        transport: &mut T,
        id: SendId,
    ) -> Option<FragmentStep> {
        let own_ref = self.own_ref;
        let sends = self.list_mut(list);
        let info = sends.get_mut(&id)?;

        if info.receivers.nodes.is_empty() {
            info.status = SendStatus::Cancelled;
        }
        if info.status == SendStatus::Cancelled {
            let mut info = sends.remove(&id)?;
            info.release(pool);
            tracing::info!(
                fragment_id = info.fragment_id,
                fragments_sent = info.fragments_sent,
                "fragmented send cancelled"
            );
            info.finish(SendStatus::Cancelled);
            return Some(FragmentStep::Cancelled);
        }
        if transport.is_overloaded(&info.receivers) {
            return Some(FragmentStep::Blocked);
        }

        let status = info.emit(pool, transport, own_ref);
        if status == SendStatus::Complete {
            let info = sends.remove(&id)?;
            tracing::info!(
                fragment_id = info.fragment_id,
                fragments = info.fragments_sent,
                gsn = info.gsn,
                "fragmented send complete"
            );
            info.finish(SendStatus::Complete);
            return Some(FragmentStep::Sent { complete: true });
        }
        Some(FragmentStep::Sent { complete: false })
    }

    /// Send the next fragment of a segmented train. `None` if `id` is unknown.
    pub fn send_next_segmented_fragment<T: SignalTransport>(
        &mut self,
        pool: &SegmentPool,
        transport: &mut T,
        id: SendId,
    ) -> Option<FragmentStep> {
        self.send_next_fragment(SendList::Segmented, pool, transport, id)
    }

    /// Send the next fragment of a linear train. `None` if `id` is unknown.
    pub fn send_next_linear_fragment<T: SignalTransport>(
        &mut self,
        pool: &SegmentPool,
        transport: &mut T,
        id: SendId,
    ) -> Option<FragmentStep> {
        self.send_next_fragment(SendList::Linear, pool, transport, id)
    }

    /// Advance every in-flight train by at most one fragment.
    pub fn continue_sending<T: SignalTransport>(
        &mut self,
        pool: &SegmentPool,
        transport: &mut T,
    ) -> Progress {
        let mut progress = Progress::default();
        for list in [SendList::Segmented, SendList::Linear] {
            let ids: Vec<SendId> = self.list(list).keys().copied().collect();
            for id in ids {
                match self.send_next_fragment(list, pool, transport, id) {
                    Some(FragmentStep::Sent { complete }) => {
                        progress.sent += 1;
                        if complete {
                            progress.completed += 1;
                        }
                    }
                    Some(FragmentStep::Blocked) => progress.blocked += 1,
                    Some(FragmentStep::Cancelled) => progress.cancelled += 1,
                    None => {}
                }
            }
        }
        progress
    }

    /// Remove `node` from up to `budget` trains on `list`, starting after
    /// `after`. A train left with no receivers is cancelled.
    pub fn drop_node(
        &mut self,
        list: SendList,
        node: NodeId,
        after: Option<SendId>,
        budget: usize,
    ) -> Sweep<SendId> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let sends = self.list_mut(list);
        let ids: Vec<SendId> = sends
            .range((lower, Bound::Unbounded))
            .take(budget)
            .map(|(id, _)| *id)
            .collect();

        let mut cleaned = 0;
        for id in &ids {
            let Some(info) = sends.get_mut(id) else {
                continue;
            };
            if !info.receivers.nodes.contains(node) {
                continue;
            }
            info.receivers.nodes.clear(node);
            cleaned += 1;
            if info.receivers.nodes.is_empty() {
                info.status = SendStatus::Cancelled;
                tracing::debug!(fragment_id = info.fragment_id, node, "all receivers failed");
            }
        }

        Sweep {
            examined: ids.len(),
            cleaned,
            resume_after: if ids.len() < budget {
                None
            } else {
                ids.last().copied()
            },
        }
    }
}

impl std::fmt::Debug for FragmentSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentSender")
            .field("own_ref", &self.own_ref)
            .field("max_fragment_words", &self.max_fragment_words)
            .field("segmented", &self.segmented.len())
            .field("linear", &self.linear.len())
            .finish()
    }
}
