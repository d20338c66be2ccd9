//! Signals as this layer sees them, and the transport seam.

use ndbsig_core::{
    BlockRef, FragInfo, Priority, ReceiverGroup, Section, SectionView, SegmentPool,
};

/// One section of an outgoing physical signal.
#[derive(Debug, Clone, Copy)]
pub enum SectionPayload<'a> {
    /// Words held in the pool.
    Segmented(SectionView),
    /// Words in a caller-owned buffer.
    Linear(&'a [u32]),
}

impl SectionPayload<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::Segmented(view) => view.len,
            Self::Linear(words) => words.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the words out, as a send buffer would.
    pub fn to_words(&self, pool: &SegmentPool) -> Vec<u32> {
        match self {
            Self::Segmented(view) => pool.copy_view(*view),
            Self::Linear(words) => words.to_vec(),
        }
    }
}

/// A physical signal handed to the transport.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingSignal<'a> {
    pub gsn: u16,
    pub sender: BlockRef,
    pub priority: Priority,
    pub frag_info: FragInfo,
    /// Inline words, followed by the fragment trailer when fragmented.
    pub data: &'a [u32],
    pub sections: &'a [SectionPayload<'a>],
}

impl OutgoingSignal<'_> {
    pub fn section_words(&self) -> usize {
        self.sections.iter().map(SectionPayload::len).sum()
    }
}

/// Moves physical signals to their receivers.
///
/// `transmit` must copy section words out of the pool before returning;
/// the sender releases or reuses them straight afterwards.
pub trait SignalTransport {
    fn transmit(&mut self, pool: &SegmentPool, receivers: &ReceiverGroup, signal: &OutgoingSignal<'_>);

    /// Whether sends to `receivers` should back off for now.
    fn is_overloaded(&self, _receivers: &ReceiverGroup) -> bool {
        false
    }
}

/// A physical signal as received, sections already imported into the pool.
#[derive(Debug)]
pub struct IncomingSignal {
    pub gsn: u16,
    pub sender: BlockRef,
    pub frag_info: FragInfo,
    pub data: Vec<u32>,
    pub sections: Vec<Section>,
}

/// Report that a physical signal was lost on receive.
///
/// Carries the data words (trailer included) but none of the sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalDroppedRep {
    pub gsn: u16,
    pub sender: BlockRef,
    pub frag_info: FragInfo,
    pub data: Vec<u32>,
    pub section_count: usize,
}

/// A complete logical signal handed to the receiving block.
#[derive(Debug)]
pub struct DeliveredSignal {
    pub gsn: u16,
    pub sender: BlockRef,
    pub data: Vec<u32>,
    pub sections: Vec<Section>,
}

impl DeliveredSignal {
    pub fn release(self, pool: &SegmentPool) {
        pool.release_sections(self.sections);
    }
}

/// A logical signal that lost data in transit. Reported once per message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedSignal {
    pub gsn: u16,
    pub sender: BlockRef,
    pub data: Vec<u32>,
}
