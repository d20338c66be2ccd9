//! Reassembly of fragmented signals.
//!
//! Each train in progress is keyed by `(fragment_id, sender)`. Incoming
//! section pieces are spliced onto the slot their section number names, so
//! fragments must arrive in send order. A train that lost a fragment stays
//! in the table as `Dropped` until its last fragment, which then produces
//! exactly one drop notification.

use std::collections::BTreeMap;
use std::ops::Bound;

use ndbsig_core::wire::{split_fragment_trailer, FragmentTrailer, MAX_SECTIONS};
use ndbsig_core::{
    fatal, BlockRef, FragInfo, InvariantViolation, NodeBitmask, NodeId, Section, SegmentPool,
};

use crate::signal::{DeliveredSignal, DroppedSignal, IncomingSignal, SignalDroppedRep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentKey {
    pub fragment_id: u32,
    pub sender: BlockRef,
}

#[derive(Debug)]
enum FragmentInfo {
    Collecting([Option<Section>; MAX_SECTIONS]),
    Dropped,
}

impl FragmentInfo {
    fn release(self, pool: &SegmentPool) -> usize {
        match self {
            Self::Collecting(slots) => {
                let sections: Vec<Section> = slots.into_iter().flatten().collect();
                let n = sections.len();
                pool.release_sections(sections);
                n
            }
            Self::Dropped => 0,
        }
    }
}

/// Result of feeding one physical signal to the assembler.
#[derive(Debug)]
pub enum Assembly {
    /// Complete signal; the caller owns its sections.
    Ready(DeliveredSignal),
    /// Fragment absorbed, more to come.
    Pending,
    /// Last fragment of a train that lost data.
    Dropped(DroppedSignal),
}

/// One bounded pass over a keyed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sweep<K> {
    pub examined: usize,
    pub cleaned: usize,
    /// Where the next pass resumes. `None` once the table is exhausted.
    pub resume_after: Option<K>,
}

#[derive(Debug)]
pub struct FragmentAssembler {
    table: BTreeMap<FragmentKey, FragmentInfo>,
    capacity: usize,
    failed: NodeBitmask,
}

impl FragmentAssembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: BTreeMap::new(),
            capacity,
            failed: NodeBitmask::new(),
        }
    }

    /// Trains in progress.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn contains(&self, key: &FragmentKey) -> bool {
        self.table.contains_key(key)
    }

    fn trailer(sender: BlockRef, data: &[u32], sections: usize) -> (&[u32], FragmentTrailer) {
        match split_fragment_trailer(data, sections) {
            Ok(split) => split,
            Err(error) => fatal(InvariantViolation::MalformedFragment { sender, error }),
        }
    }

    fn insert(&mut self, key: FragmentKey, info: FragmentInfo) {
        if self.table.contains_key(&key) {
            fatal(InvariantViolation::DuplicateFragmentTrain {
                fragment_id: key.fragment_id,
                sender: key.sender,
            });
        }
        if self.table.len() >= self.capacity {
            fatal(InvariantViolation::AssemblyTableFull {
                capacity: self.capacity,
            });
        }
        self.table.insert(key, info);
    }

    /// A fragment whose train we do not know. Tolerated only from failed nodes.
    fn unknown_train(&self, key: FragmentKey) {
        if !self.failed.contains(key.sender.node()) {
            fatal(InvariantViolation::UnknownFragmentTrain {
                fragment_id: key.fragment_id,
                sender: key.sender,
            });
        }
        tracing::debug!(
            fragment_id = key.fragment_id,
            sender = %key.sender,
            "discarding fragment from failed node"
        );
    }

    /// Feed one physical signal.
    pub fn assemble(&mut self, pool: &SegmentPool, signal: IncomingSignal) -> Assembly {
        let IncomingSignal {
            gsn,
            sender,
            frag_info,
            data,
            sections,
        } = signal;

        if frag_info == FragInfo::None {
            return Assembly::Ready(DeliveredSignal {
                gsn,
                sender,
                data,
                sections,
            });
        }

        let (inline, trailer) = Self::trailer(sender, &data, sections.len());
        let key = FragmentKey {
            fragment_id: trailer.fragment_id,
            sender,
        };

        if self.failed.contains(sender.node()) && !self.table.contains_key(&key) {
            self.unknown_train(key);
            pool.release_sections(sections);
            return Assembly::Pending;
        }

        if frag_info == FragInfo::First {
            let mut slots: [Option<Section>; MAX_SECTIONS] = Default::default();
            for (piece, number) in sections.into_iter().zip(trailer.section_numbers()) {
                splice(pool, &mut slots[*number as usize], piece);
            }
            self.insert(key, FragmentInfo::Collecting(slots));
            tracing::trace!(fragment_id = key.fragment_id, sender = %sender, "train started");
            return Assembly::Pending;
        }

        let Some(info) = self.table.get_mut(&key) else {
            self.unknown_train(key);
            pool.release_sections(sections);
            return Assembly::Pending;
        };

        match info {
            FragmentInfo::Collecting(slots) => {
                for (piece, number) in sections.into_iter().zip(trailer.section_numbers()) {
                    splice(pool, &mut slots[*number as usize], piece);
                }
            }
            FragmentInfo::Dropped => pool.release_sections(sections),
        }

        if frag_info == FragInfo::Middle {
            return Assembly::Pending;
        }

        let inline = inline.to_vec();
        match self.table.remove(&key) {
            Some(FragmentInfo::Collecting(slots)) => {
                let sections: Vec<Section> = slots.into_iter().flatten().collect();
                tracing::debug!(
                    fragment_id = key.fragment_id,
                    sender = %sender,
                    gsn,
                    sections = sections.len(),
                    "train assembled"
                );
                Assembly::Ready(DeliveredSignal {
                    gsn,
                    sender,
                    data: inline,
                    sections,
                })
            }
            _ => {
                tracing::info!(
                    fragment_id = key.fragment_id,
                    sender = %sender,
                    gsn,
                    "fragmented signal dropped"
                );
                Assembly::Dropped(DroppedSignal {
                    gsn,
                    sender,
                    data: inline,
                })
            }
        }
    }

    /// Handle a physical signal the transport lost on receive.
    ///
    /// Returns the drop notification for the receiving block, if this
    /// report completes one.
    pub fn assemble_dropped(
        &mut self,
        pool: &SegmentPool,
        rep: SignalDroppedRep,
    ) -> Option<DroppedSignal> {
        let SignalDroppedRep {
            gsn,
            sender,
            frag_info,
            data,
            section_count,
        } = rep;

        if frag_info == FragInfo::None {
            tracing::info!(gsn, sender = %sender, "signal dropped");
            return Some(DroppedSignal { gsn, sender, data });
        }

        let (inline, trailer) = Self::trailer(sender, &data, section_count);
        let key = FragmentKey {
            fragment_id: trailer.fragment_id,
            sender,
        };
        tracing::debug!(
            fragment_id = key.fragment_id,
            sender = %sender,
            frag_info = ?frag_info,
            "fragment dropped"
        );

        match frag_info {
            FragInfo::First => {
                if self.failed.contains(sender.node()) {
                    return None;
                }
                self.insert(key, FragmentInfo::Dropped);
                None
            }
            FragInfo::Middle => {
                match self.table.get_mut(&key) {
                    Some(info) => std::mem::replace(info, FragmentInfo::Dropped).release(pool),
                    None => {
                        self.unknown_train(key);
                        0
                    }
                };
                None
            }
            _ => {
                let Some(info) = self.table.remove(&key) else {
                    self.unknown_train(key);
                    return None;
                };
                info.release(pool);
                tracing::info!(
                    fragment_id = key.fragment_id,
                    sender = %sender,
                    gsn,
                    "fragmented signal dropped"
                );
                Some(DroppedSignal {
                    gsn,
                    sender,
                    data: inline.to_vec(),
                })
            }
        }
    }

    /// Stop accepting new trains from `node` and tolerate its stragglers.
    pub fn mark_node_failed(&mut self, node: NodeId) {
        self.failed.set(node);
    }

    pub fn node_rejoined(&mut self, node: NodeId) {
        self.failed.clear(node);
    }

    pub fn is_node_failed(&self, node: NodeId) -> bool {
        self.failed.contains(node)
    }

    /// Release up to `budget` entries' worth of trains sent by `node`,
    /// starting after `after`.
    pub fn release_node(
        &mut self,
        pool: &SegmentPool,
        node: NodeId,
        after: Option<FragmentKey>,
        budget: usize,
    ) -> Sweep<FragmentKey> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let keys: Vec<FragmentKey> = self
            .table
            .range((lower, Bound::Unbounded))
            .take(budget)
            .map(|(k, _)| *k)
            .collect();

        let mut cleaned = 0;
        for key in &keys {
            if key.sender.node() != node {
                continue;
            }
            if let Some(info) = self.table.remove(key) {
                info.release(pool);
                cleaned += 1;
            }
        }

        Sweep {
            examined: keys.len(),
            cleaned,
            resume_after: if keys.len() < budget {
                None
            } else {
                keys.last().copied()
            },
        }
    }
}

/// Attach `piece` to the end of `slot`.
fn splice(pool: &SegmentPool, slot: &mut Option<Section>, piece: Section) {
    match slot {
        Some(existing) => pool.link_sections(existing, piece),
        None => *slot = Some(piece),
    }
}
