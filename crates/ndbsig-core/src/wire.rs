//! ndbsig wire format — the parts of a signal this layer owns.
//!
//! Header encoding, routing and transport belong to collaborators. This
//! module only defines what the fragment protocol reads and writes: the
//! 2-bit `fragInfo` field, the trailer a fragmented signal carries
//! (section numbers, then the fragment id), block references, receiver
//! groups, and the fixed preamble the loopback transporter frames signals
//! with.
//!
//! `SignalPreamble` is #[repr(C, packed)] and uses zerocopy derives, so it
//! is serialised without unsafe code.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Raw "no handle" value. Pool capacity is capped below it, so it can
/// never alias a valid segment index.
pub const RNIL: u32 = 0xffff_ff00;

/// Maximum number of inline signal words.
pub const MAX_INLINE_WORDS: usize = 25;

/// Maximum number of sections attached to one signal.
pub const MAX_SECTIONS: usize = 3;

/// Node ids are `1..MAX_NODES`. Node 0 is never valid.
pub const MAX_NODES: usize = 256;

/// Node identifier inside the cluster.
pub type NodeId = u16;

// ── Block references ──────────────────────────────────────────────────────────

/// Address of one block on one node: `block << 16 | node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef(u32);

impl BlockRef {
    pub const fn new(block: u16, node: NodeId) -> Self {
        Self(((block as u32) << 16) | node as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn node(self) -> NodeId {
        (self.0 & 0xffff) as NodeId
    }

    pub const fn block(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.block(), self.node())
    }
}

// ── fragInfo ──────────────────────────────────────────────────────────────────

/// Position of a physical signal in a fragment train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FragInfo {
    /// Standalone signal, not part of a train.
    None = 0,
    First = 1,
    Middle = 2,
    Last = 3,
}

impl FragInfo {
    pub fn is_fragmented(self) -> bool {
        !matches!(self, FragInfo::None)
    }
}

impl TryFrom<u8> for FragInfo {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FragInfo::None),
            1 => Ok(FragInfo::First),
            2 => Ok(FragInfo::Middle),
            3 => Ok(FragInfo::Last),
            other => Err(WireError::InvalidFragInfo(other)),
        }
    }
}

impl From<FragInfo> for u8 {
    fn from(f: FragInfo) -> u8 {
        f as u8
    }
}

// ── Priority ──────────────────────────────────────────────────────────────────

/// Job buffer a signal is queued on. High is drained before Normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Priority {
    High = 0,
    #[default]
    Normal = 1,
}

impl TryFrom<u8> for Priority {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::High),
            1 => Ok(Priority::Normal),
            other => Err(WireError::InvalidPriority(other)),
        }
    }
}

// ── Receiver groups ───────────────────────────────────────────────────────────

const MASK_WORDS: usize = MAX_NODES / 64;

/// Fixed-size set of node ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeBitmask {
    words: [u64; MASK_WORDS],
}

impl NodeBitmask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(node: NodeId) -> Self {
        let mut mask = Self::new();
        mask.set(node);
        mask
    }

    pub fn set(&mut self, node: NodeId) {
        let n = node as usize;
        if n < MAX_NODES {
            self.words[n / 64] |= 1 << (n % 64);
        }
    }

    pub fn clear(&mut self, node: NodeId) {
        let n = node as usize;
        if n < MAX_NODES {
            self.words[n / 64] &= !(1 << (n % 64));
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        let n = node as usize;
        n < MAX_NODES && self.words[n / 64] & (1 << (n % 64)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Node ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..MAX_NODES)
            .filter(|n| self.words[n / 64] & (1 << (n % 64)) != 0)
            .map(|n| n as NodeId)
    }
}

impl FromIterator<NodeId> for NodeBitmask {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        let mut mask = Self::new();
        for node in iter {
            mask.set(node);
        }
        mask
    }
}

/// Destination of a send: one block number on a set of nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverGroup {
    pub block: u16,
    pub nodes: NodeBitmask,
}

impl ReceiverGroup {
    pub fn new(block: u16, nodes: NodeBitmask) -> Self {
        Self { block, nodes }
    }

    pub fn single(target: BlockRef) -> Self {
        Self {
            block: target.block(),
            nodes: NodeBitmask::single(target.node()),
        }
    }
}

// ── Fragment trailer ──────────────────────────────────────────────────────────

/// Decoded tail of a fragmented signal's data words.
///
/// Layout: `[inline words] ++ [section number per carried section] ++ [fragment id]`.
/// Inline words are only present on the last fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentTrailer {
    pub fragment_id: u32,
    section_numbers: [u8; MAX_SECTIONS],
    section_count: u8,
}

impl FragmentTrailer {
    /// Section number of each carried section, in carried order.
    pub fn section_numbers(&self) -> &[u8] {
        &self.section_numbers[..self.section_count as usize]
    }
}

/// Append the trailer for a fragment carrying `section_numbers`.
pub fn push_fragment_trailer(data: &mut Vec<u32>, section_numbers: &[u8], fragment_id: u32) {
    data.extend(section_numbers.iter().map(|n| *n as u32));
    data.push(fragment_id);
}

/// Split a fragmented signal's data words into inline words and trailer.
pub fn split_fragment_trailer(
    data: &[u32],
    section_count: usize,
) -> Result<(&[u32], FragmentTrailer), WireError> {
    if section_count > MAX_SECTIONS {
        return Err(WireError::TooManySections(section_count));
    }
    if data.len() < section_count + 1 {
        return Err(WireError::TruncatedTrailer {
            len: data.len(),
            sections: section_count,
        });
    }

    let fragment_id = data[data.len() - 1];
    if fragment_id == 0 {
        return Err(WireError::ZeroFragmentId);
    }

    let numbers_at = data.len() - 1 - section_count;
    let mut section_numbers = [0u8; MAX_SECTIONS];
    for (i, word) in data[numbers_at..data.len() - 1].iter().enumerate() {
        if *word as usize >= MAX_SECTIONS {
            return Err(WireError::InvalidSectionNumber(*word));
        }
        section_numbers[i] = *word as u8;
    }

    Ok((
        &data[..numbers_at],
        FragmentTrailer {
            fragment_id,
            section_numbers,
            section_count: section_count as u8,
        },
    ))
}

// ── Signal preamble ───────────────────────────────────────────────────────────

/// Fixed-size frame preamble used by in-process transporters.
///
/// Followed on the wire by `data_len` data words and then the words of each
/// section, all little-endian.
///
/// Wire size: 28 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct SignalPreamble {
    /// Global signal number.
    pub gsn: u16,

    /// `FragInfo` in bits 0-1; bits 2-7 must be zero.
    pub frag_info: u8,

    /// `Priority` byte.
    pub priority: u8,

    /// Raw `BlockRef` of the sending block.
    pub sender: u32,

    /// Block number of the receiver on the destination node.
    pub receiver_block: u16,

    /// Number of sections that follow, at most `MAX_SECTIONS`.
    pub section_count: u8,

    /// Reserved, must be zero.
    pub reserved: u8,

    /// Number of data words that follow the preamble.
    pub data_len: u32,

    /// Word length of each section; unused entries are zero.
    pub section_lens: [u32; MAX_SECTIONS],
}

assert_eq_size!(SignalPreamble, [u8; 28]);

/// Preamble size in bytes.
pub const PREAMBLE_LEN: usize = std::mem::size_of::<SignalPreamble>();

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("invalid fragInfo value: {0}")]
    InvalidFragInfo(u8),

    #[error("invalid priority byte: 0x{0:02x}")]
    InvalidPriority(u8),

    #[error("fragment trailer truncated: {len} data words for {sections} sections")]
    TruncatedTrailer { len: usize, sections: usize },

    #[error("section number {0} out of range")]
    InvalidSectionNumber(u32),

    #[error("fragment id must be non-zero")]
    ZeroFragmentId,

    #[error("{0} sections exceeds maximum {}", MAX_SECTIONS)]
    TooManySections(usize),

    #[error("{0} inline words exceeds maximum {}", MAX_INLINE_WORDS)]
    TooManyInlineWords(usize),

    #[error("frame truncated: need {need} bytes, have {have}")]
    TruncatedFrame { need: usize, have: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
