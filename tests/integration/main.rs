//! ndbsig integration tests.
//!
//! Every test builds its own pool and execution contexts and moves
//! signals between them through the in-process transport, so the suite
//! needs no environment and tests never share state.
//!
//!   cargo test --test integration

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ndbsig_core::{BlockRef, NodeId, ReceiverGroup, SegmentPool};
use ndbsig_fragment::{
    Assembly, DeliveredSignal, Delivery, DroppedSignal, ExecutionContext, FragmentSettings,
    LocalTransport,
};

// ── Harness ───────────────────────────────────────────────────────────────────

/// Block number used for every context in the suite.
pub const BLOCK: u16 = 0xf7;

pub type Context = ExecutionContext<LocalTransport>;

pub fn block(node: NodeId) -> BlockRef {
    BlockRef::new(BLOCK, node)
}

pub fn to_node(node: NodeId) -> ReceiverGroup {
    ReceiverGroup::single(block(node))
}

/// A context for `node` with the given fragment budget.
pub fn context(node: NodeId, pool: &Arc<SegmentPool>, max_fragment_words: usize) -> Context {
    ExecutionContext::new(
        block(node),
        pool.clone(),
        LocalTransport::new(),
        FragmentSettings {
            max_fragment_words,
            ..FragmentSettings::default()
        },
    )
}

/// Deterministic pseudo-random words.
pub fn words(seed: u64, n: usize) -> Vec<u32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen()).collect()
}

/// What a receiving context made of its inbox.
#[derive(Debug, Default)]
pub struct Received {
    pub delivered: Vec<DeliveredSignal>,
    pub dropped: Vec<DroppedSignal>,
}

impl Received {
    pub fn release(self, pool: &SegmentPool) {
        for signal in self.delivered {
            signal.release(pool);
        }
    }
}

/// Drive `from` until its sends are done, feeding everything queued for
/// `node` into `to`.
pub fn pump(from: &mut Context, to: &mut Context, node: NodeId) -> Received {
    from.run_until_idle(10_000);
    let mut out = Received::default();
    while let Some(delivery) = from.transport_mut().pop(node) {
        match delivery {
            Delivery::Signal(signal) => match to.receive(signal) {
                Assembly::Ready(done) => out.delivered.push(done),
                Assembly::Pending => {}
                Assembly::Dropped(dropped) => out.dropped.push(dropped),
            },
            Delivery::Dropped(rep) => {
                if let Some(dropped) = to.signal_dropped(rep) {
                    out.dropped.push(dropped);
                }
            }
        }
    }
    out
}

mod drops;
mod fragmentation;
mod node_failure;
mod pool_accounting;
mod sections;
