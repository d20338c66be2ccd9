//! One simulated data node: an execution context driven by a tokio task.
//!
//! The task multiplexes three inputs: frames from the loopback inbox,
//! commands from the daemon, and a tick that drains the context's run
//! queue. Everything that touches the context happens on this task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use ndbsig_core::{BlockRef, NodeId, ReceiverGroup, Section, SegmentPool};
use ndbsig_fragment::{
    Assembly, Delivery, ExecutionContext, FragmentSettings, SendRequest, SendStatus,
};

use crate::loopback::{decode_frame, Inboxes, LoopbackTransport};

/// Block number every simulated node runs its receiver under.
pub const DEMO_BLOCK: u16 = 0xf7;

/// Global signal number used for test messages.
pub const GSN_DEMO_MESSAGE: u16 = 512;

/// Continuations run per tick before yielding back to the select loop.
const STEPS_PER_TICK: usize = 64;

pub enum Command {
    /// Send a message whose first data word is its id.
    Send {
        to: NodeId,
        data: Vec<u32>,
        sections: Vec<Vec<u32>>,
    },
    NodeFailure {
        node: NodeId,
        done: oneshot::Sender<usize>,
    },
    NodeRejoined(NodeId),
}

/// Shared bookkeeping of what was sent and what arrived, keyed by message id.
#[derive(Debug, Default)]
pub struct Ledger {
    pub expected: DashMap<u32, [u8; 32]>,
    pub received: DashMap<u32, [u8; 32]>,
    pub completed: AtomicUsize,
    pub dropped: AtomicUsize,
    pub send_failures: AtomicUsize,
}

impl Ledger {
    pub fn settled(&self, messages: usize) -> bool {
        self.received.len()
            + self.dropped.load(Ordering::Relaxed)
            + self.send_failures.load(Ordering::Relaxed)
            >= messages
    }
}

/// Digest of a whole message: blake3 over each section's digest in order.
pub fn message_digest(pool: &SegmentPool, sections: &[Section]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for section in sections {
        hasher.update(&pool.section_digest(section));
    }
    *hasher.finalize().as_bytes()
}

pub struct NodeTask {
    node: NodeId,
    pool: Arc<SegmentPool>,
    ctx: ExecutionContext<LoopbackTransport>,
    inbox: mpsc::UnboundedReceiver<Bytes>,
    commands: mpsc::UnboundedReceiver<Command>,
    ledger: Arc<Ledger>,
    tick: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl NodeTask {
    /// Register `node`'s inbox and build its task. Returns the command handle.
    pub fn new(
        node: NodeId,
        pool: Arc<SegmentPool>,
        inboxes: Inboxes,
        settings: FragmentSettings,
        ledger: Arc<Ledger>,
        tick: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, mpsc::UnboundedSender<Command>) {
        let (frame_tx, inbox) = mpsc::unbounded_channel();
        inboxes.insert(node, frame_tx);
        let (command_tx, commands) = mpsc::unbounded_channel();

        let ctx = ExecutionContext::new(
            BlockRef::new(DEMO_BLOCK, node),
            pool.clone(),
            LoopbackTransport::new(inboxes),
            settings,
        );
        let task = Self {
            node,
            pool,
            ctx,
            inbox,
            commands,
            ledger,
            tick,
            shutdown,
        };
        (task, command_tx)
    }

    pub async fn run(mut self) -> Result<()> {
        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(node = self.node, "node started");

        loop {
            // Inbox before commands: frames queued ahead of a node failure
            // must reach the assembler before the failure does
            tokio::select! {
                biased;

                _ = self.shutdown.recv() => {
                    tracing::info!(
                        node = self.node,
                        frames_sent = self.ctx.transport().frames_sent(),
                        unreachable = self.ctx.transport().unreachable(),
                        "node shutting down"
                    );
                    return Ok(());
                }

                Some(frame) = self.inbox.recv() => self.handle_frame(&frame),

                Some(command) = self.commands.recv() => self.handle_command(command),

                _ = tick.tick() => {
                    let steps = self.ctx.run_until_idle(STEPS_PER_TICK);
                    if steps > 0 {
                        tracing::trace!(node = self.node, steps, "run queue drained");
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let delivery = match decode_frame(&self.pool, frame) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(node = self.node, error = %e, "malformed frame discarded");
                return;
            }
        };

        match delivery {
            Delivery::Signal(signal) => match self.ctx.receive(signal) {
                Assembly::Ready(done) => {
                    let digest = message_digest(&self.pool, &done.sections);
                    if let Some(id) = done.data.first().copied() {
                        tracing::debug!(
                            node = self.node,
                            id,
                            from = %done.sender,
                            sections = done.sections.len(),
                            "message delivered"
                        );
                        self.ledger.received.insert(id, digest);
                    }
                    done.release(&self.pool);
                }
                Assembly::Pending => {}
                Assembly::Dropped(dropped) => {
                    tracing::info!(node = self.node, from = %dropped.sender, "message dropped");
                    self.ledger.dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
            Delivery::Dropped(rep) => {
                if let Some(dropped) = self.ctx.signal_dropped(rep) {
                    tracing::info!(node = self.node, from = %dropped.sender, "message dropped");
                    self.ledger.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { to, data, sections } => self.send(to, data, sections),
            Command::NodeFailure { node, done } => {
                self.ctx.node_failure(
                    node,
                    Some(Box::new(move |_: NodeId, cleaned: usize| {
                        let _ = done.send(cleaned);
                    })),
                );
            }
            Command::NodeRejoined(node) => self.ctx.node_rejoined(node),
        }
    }

    fn send(&mut self, to: NodeId, data: Vec<u32>, words: Vec<Vec<u32>>) {
        let id = data.first().copied().unwrap_or_default();
        let mut sections = Vec::with_capacity(words.len());
        for w in &words {
            match self.pool.import(w) {
                Ok(section) => sections.push(section),
                Err(e) => {
                    tracing::warn!(node = self.node, id, error = %e, "send import failed");
                    self.pool.release_sections(sections);
                    self.ledger.send_failures.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
        let digest = message_digest(&self.pool, &sections);

        let ledger = self.ledger.clone();
        let request = SendRequest::new(GSN_DEMO_MESSAGE, ReceiverGroup::single(BlockRef::new(DEMO_BLOCK, to)))
            .data(&data)
            .segmented(sections)
            .on_complete(move |outcome| {
                if outcome.status == SendStatus::Complete {
                    ledger.completed.fetch_add(1, Ordering::Relaxed);
                }
            });

        match self.ctx.send_fragmented(request) {
            Ok(status) => {
                self.ledger.expected.insert(id, digest);
                tracing::debug!(node = self.node, to, id, ?status, "message sent");
            }
            Err(e) => {
                tracing::warn!(node = self.node, to, id, error = %e, "send failed");
                self.ledger.send_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
