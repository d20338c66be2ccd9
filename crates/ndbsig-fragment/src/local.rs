//! In-process transport with per-node inboxes.
//!
//! Sections are copied out of the sender's chains and imported afresh for
//! the receiver, as a real transporter's receive path would. Losses and
//! overload can be injected.

use std::collections::{HashMap, HashSet, VecDeque};

use ndbsig_core::{FragInfo, NodeBitmask, NodeId, ReceiverGroup, Section, SegmentPool};

use crate::signal::{IncomingSignal, OutgoingSignal, SignalDroppedRep, SignalTransport};

/// What a receiving node finds in its inbox.
#[derive(Debug)]
pub enum Delivery {
    Signal(IncomingSignal),
    Dropped(SignalDroppedRep),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitRecord {
    pub node: NodeId,
    pub gsn: u16,
    pub frag_info: FragInfo,
    pub section_lens: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct LocalTransport {
    inboxes: HashMap<NodeId, VecDeque<Delivery>>,
    history: Vec<TransmitRecord>,
    drop_at: HashSet<usize>,
    overloaded: NodeBitmask,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lose the `n`th per-node delivery (0-based, counted over all transmits).
    pub fn drop_delivery(&mut self, n: usize) {
        self.drop_at.insert(n);
    }

    pub fn set_overloaded(&mut self, node: NodeId, overloaded: bool) {
        if overloaded {
            self.overloaded.set(node);
        } else {
            self.overloaded.clear(node);
        }
    }

    pub fn pop(&mut self, node: NodeId) -> Option<Delivery> {
        self.inboxes.get_mut(&node)?.pop_front()
    }

    pub fn pending(&self, node: NodeId) -> usize {
        self.inboxes.get(&node).map_or(0, VecDeque::len)
    }

    pub fn history(&self) -> &[TransmitRecord] {
        &self.history
    }

    /// Release everything still queued for `node`.
    pub fn discard(&mut self, pool: &SegmentPool, node: NodeId) -> usize {
        let Some(inbox) = self.inboxes.remove(&node) else {
            return 0;
        };
        let n = inbox.len();
        for delivery in inbox {
            if let Delivery::Signal(signal) = delivery {
                pool.release_sections(signal.sections);
            }
        }
        n
    }

    fn import_all(pool: &SegmentPool, signal: &OutgoingSignal<'_>) -> Option<Vec<Section>> {
        let mut imported = Vec::with_capacity(signal.sections.len());
        for payload in signal.sections {
            match pool.import(&payload.to_words(pool)) {
                Ok(section) => imported.push(section),
                Err(_) => {
                    pool.release_sections(imported);
                    return None;
                }
            }
        }
        Some(imported)
    }
}

impl SignalTransport for LocalTransport {
    fn transmit(&mut self, pool: &SegmentPool, receivers: &ReceiverGroup, signal: &OutgoingSignal<'_>) {
        for node in receivers.nodes.iter() {
            let seq = self.history.len();
            self.history.push(TransmitRecord {
                node,
                gsn: signal.gsn,
                frag_info: signal.frag_info,
                section_lens: signal.sections.iter().map(|s| s.len()).collect(),
            });

            let imported = if self.drop_at.remove(&seq) {
                None
            } else {
                Self::import_all(pool, signal)
            };
            let delivery = match imported {
                Some(sections) => Delivery::Signal(IncomingSignal {
                    gsn: signal.gsn,
                    sender: signal.sender,
                    frag_info: signal.frag_info,
                    data: signal.data.to_vec(),
                    sections,
                }),
                None => {
                    tracing::debug!(node, gsn = signal.gsn, "delivery lost");
                    Delivery::Dropped(SignalDroppedRep {
                        gsn: signal.gsn,
                        sender: signal.sender,
                        frag_info: signal.frag_info,
                        data: signal.data.to_vec(),
                        section_count: signal.sections.len(),
                    })
                }
            };
            self.inboxes.entry(node).or_default().push_back(delivery);
        }
    }

    fn is_overloaded(&self, receivers: &ReceiverGroup) -> bool {
        receivers.nodes.iter().any(|n| self.overloaded.contains(n))
    }
}
