//! Loopback transporter between node tasks in one process.
//!
//! A physical signal is framed as a [`SignalPreamble`] followed by the
//! data words and the words of each section, little-endian, and pushed
//! into the receiving node's inbox channel. The receiver imports the
//! section words into the shared pool. If the pool cannot take them the
//! frame turns into a drop report instead.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use tokio::sync::mpsc;
use zerocopy::{AsBytes, FromBytes};

use ndbsig_core::wire::{SignalPreamble, WireError, MAX_INLINE_WORDS, MAX_SECTIONS, PREAMBLE_LEN};
use ndbsig_core::{BlockRef, FragInfo, NodeId, Priority, ReceiverGroup, Section, SegmentPool};
use ndbsig_fragment::{
    Delivery, IncomingSignal, OutgoingSignal, SignalDroppedRep, SignalTransport,
};

/// Inbox of every live node, keyed by node id.
pub type Inboxes = Arc<DashMap<NodeId, mpsc::UnboundedSender<Bytes>>>;

pub fn new_inboxes() -> Inboxes {
    Arc::new(DashMap::new())
}

/// Largest data-word count a frame may carry: inline words plus the
/// fragment trailer.
const MAX_DATA_WORDS: usize = MAX_INLINE_WORDS + MAX_SECTIONS + 1;

pub struct LoopbackTransport {
    inboxes: Inboxes,
    frames_sent: u64,
    unreachable: u64,
}

impl LoopbackTransport {
    pub fn new(inboxes: Inboxes) -> Self {
        Self {
            inboxes,
            frames_sent: 0,
            unreachable: 0,
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn unreachable(&self) -> u64 {
        self.unreachable
    }
}

impl SignalTransport for LoopbackTransport {
    fn transmit(&mut self, pool: &SegmentPool, receivers: &ReceiverGroup, signal: &OutgoingSignal<'_>) {
        let frame = encode_frame(pool, receivers.block, signal);
        for node in receivers.nodes.iter() {
            let delivered = self
                .inboxes
                .get(&node)
                .map(|tx| tx.send(frame.clone()).is_ok())
                .unwrap_or(false);
            if delivered {
                self.frames_sent += 1;
            } else {
                self.unreachable += 1;
                tracing::debug!(node, gsn = signal.gsn, "receiver unreachable, frame discarded");
            }
        }
    }
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Serialise one physical signal. Section words are copied out of the pool.
pub fn encode_frame(pool: &SegmentPool, receiver_block: u16, signal: &OutgoingSignal<'_>) -> Bytes {
    let mut section_lens = [0u32; MAX_SECTIONS];
    for (slot, payload) in section_lens.iter_mut().zip(signal.sections) {
        *slot = payload.len() as u32;
    }
    let preamble = SignalPreamble {
        gsn: signal.gsn,
        frag_info: signal.frag_info.into(),
        priority: signal.priority as u8,
        sender: signal.sender.raw(),
        receiver_block,
        section_count: signal.sections.len() as u8,
        reserved: 0,
        data_len: signal.data.len() as u32,
        section_lens,
    };

    let words = signal.data.len() + signal.section_words();
    let mut buf = BytesMut::with_capacity(PREAMBLE_LEN + words * 4);
    buf.put_slice(preamble.as_bytes());
    for word in signal.data {
        buf.put_u32_le(*word);
    }
    for payload in signal.sections {
        for word in payload.to_words(pool) {
            buf.put_u32_le(word);
        }
    }
    buf.freeze()
}

/// Parse a frame and import its sections into `pool`.
pub fn decode_frame(pool: &SegmentPool, frame: &[u8]) -> Result<Delivery, WireError> {
    let preamble = SignalPreamble::read_from_prefix(frame).ok_or(WireError::TruncatedFrame {
        need: PREAMBLE_LEN,
        have: frame.len(),
    })?;

    let frag_info = FragInfo::try_from(preamble.frag_info)?;
    Priority::try_from(preamble.priority)?;
    let section_count = preamble.section_count as usize;
    if section_count > MAX_SECTIONS {
        return Err(WireError::TooManySections(section_count));
    }
    let data_len = preamble.data_len as usize;
    if data_len > MAX_DATA_WORDS {
        return Err(WireError::TooManyInlineWords(data_len));
    }
    let lens = preamble.section_lens;
    let section_words: usize = lens[..section_count].iter().map(|l| *l as usize).sum();
    let need = PREAMBLE_LEN + (data_len + section_words) * 4;
    if frame.len() < need {
        return Err(WireError::TruncatedFrame {
            need,
            have: frame.len(),
        });
    }

    let mut body = &frame[PREAMBLE_LEN..need];
    let data: Vec<u32> = (0..data_len).map(|_| body.get_u32_le()).collect();
    let sender = BlockRef::from_raw(preamble.sender);
    let gsn = preamble.gsn;

    let mut sections: Vec<Section> = Vec::with_capacity(section_count);
    for len in &lens[..section_count] {
        let words: Vec<u32> = (0..*len).map(|_| body.get_u32_le()).collect();
        match pool.import(&words) {
            Ok(section) => sections.push(section),
            Err(e) => {
                tracing::warn!(%sender, gsn, error = %e, "receive import failed, reporting drop");
                pool.release_sections(sections);
                return Ok(Delivery::Dropped(SignalDroppedRep {
                    gsn,
                    sender,
                    frag_info,
                    data,
                    section_count,
                }));
            }
        }
    }

    Ok(Delivery::Signal(IncomingSignal {
        gsn,
        sender,
        frag_info,
        data,
        sections,
    }))
}
