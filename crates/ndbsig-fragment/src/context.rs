//! One execution context: a single logical thread of control that owns an
//! assembler, a sender and a run queue, and shares the segment pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ndbsig_core::{BlockRef, NdbsigConfig, NodeId, Priority, ReceiverGroup, Section, SegmentPool};

use crate::assembler::{Assembly, FragmentAssembler};
use crate::cleanup::{CleanupCallback, CleanupStep, CleanupTask};
use crate::scheduler::{Continuation, RunQueue, SelfScheduler};
use crate::sender::{FragmentSender, SendError, SendOutcome, SendRequest, SendStatus};
use crate::signal::{DroppedSignal, IncomingSignal, SignalDroppedRep, SignalTransport};

/// Fragment protocol knobs, taken from `[fragment]` and `[cleanup]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSettings {
    pub max_fragment_words: usize,
    pub max_assemblies: usize,
    pub retry_delay: Duration,
    pub work_units: usize,
}

impl Default for FragmentSettings {
    fn default() -> Self {
        Self::from(&NdbsigConfig::default())
    }
}

impl From<&NdbsigConfig> for FragmentSettings {
    fn from(config: &NdbsigConfig) -> Self {
        Self {
            max_fragment_words: config.fragment.max_fragment_words,
            max_assemblies: config.fragment.max_assemblies,
            retry_delay: Duration::from_millis(config.fragment.retry_delay_millis),
            work_units: config.cleanup.work_units,
        }
    }
}

pub struct ExecutionContext<T> {
    pool: Arc<SegmentPool>,
    transport: T,
    assembler: FragmentAssembler,
    sender: FragmentSender,
    queue: RunQueue,
    settings: FragmentSettings,
    sending_posted: bool,
}

impl<T: SignalTransport> ExecutionContext<T> {
    pub fn new(own_ref: BlockRef, pool: Arc<SegmentPool>, transport: T, settings: FragmentSettings) -> Self {
        Self {
            pool,
            transport,
            assembler: FragmentAssembler::new(settings.max_assemblies),
            sender: FragmentSender::new(own_ref, settings.max_fragment_words),
            queue: RunQueue::new(),
            settings,
            sending_posted: false,
        }
    }

    pub fn own_ref(&self) -> BlockRef {
        self.sender.own_ref()
    }

    pub fn pool(&self) -> &SegmentPool {
        &self.pool
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn assembler(&self) -> &FragmentAssembler {
        &self.assembler
    }

    pub fn sender(&self) -> &FragmentSender {
        &self.sender
    }

    /// Whether anything is queued, including delayed continuations.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    fn post_sending(&mut self, delay: Option<Duration>) {
        if !self.sending_posted {
            self.sending_posted = true;
            self.queue
                .send_to_self(Continuation::ContinueSending, Priority::Normal, delay);
        }
    }

    /// Send a signal, fragmenting it if needed. The sections are consumed.
    pub fn send_fragmented(&mut self, request: SendRequest<'_>) -> Result<SendStatus, SendError> {
        let (status, _) = self
            .sender
            .send_first_fragment(&self.pool, &mut self.transport, request)?;
        if status == SendStatus::NotComplete {
            self.post_sending(None);
        }
        Ok(status)
    }

    /// Send a signal whose sections stay with the caller.
    pub fn send_no_release(
        &mut self,
        gsn: u16,
        data: &[u32],
        sections: &[&Section],
        receivers: ReceiverGroup,
    ) -> Result<SendOutcome, SendError> {
        self.sender.send_no_release(
            &self.pool,
            &mut self.transport,
            gsn,
            data,
            sections,
            receivers,
            Priority::Normal,
        )
    }

    /// Feed one received physical signal to the assembler.
    pub fn receive(&mut self, signal: IncomingSignal) -> Assembly {
        self.assembler.assemble(&self.pool, signal)
    }

    pub fn signal_dropped(&mut self, rep: SignalDroppedRep) -> Option<DroppedSignal> {
        self.assembler.assemble_dropped(&self.pool, rep)
    }

    /// Start incremental cleanup for a failed peer.
    pub fn node_failure(&mut self, node: NodeId, callback: Option<CleanupCallback>) {
        tracing::info!(node, "node failure cleanup started");
        self.assembler.mark_node_failed(node);
        self.queue.send_to_self(
            Continuation::Cleanup(CleanupTask::new(node, callback)),
            Priority::Normal,
            None,
        );
    }

    pub fn node_rejoined(&mut self, node: NodeId) {
        tracing::info!(node, "node rejoined");
        self.assembler.node_rejoined(node);
    }

    /// Run one continuation that is due at `now`. Returns false if none was.
    pub fn run_once(&mut self, now: Instant) -> bool {
        let Some(continuation) = self.queue.pop(now) else {
            return false;
        };
        match continuation {
            Continuation::ContinueSending => {
                self.sending_posted = false;
                let progress = self.sender.continue_sending(&self.pool, &mut self.transport);
                if self.sender.has_pending() {
                    let stalled = progress.sent == 0 && progress.cancelled == 0 && progress.blocked > 0;
                    let delay = stalled.then_some(self.settings.retry_delay);
                    self.post_sending(delay);
                }
            }
            Continuation::Cleanup(task) => {
                match task.run(
                    &self.pool,
                    &mut self.assembler,
                    &mut self.sender,
                    self.settings.work_units,
                ) {
                    CleanupStep::Continue(task) => {
                        self.queue
                            .send_to_self(Continuation::Cleanup(task), Priority::Normal, None);
                    }
                    CleanupStep::Finished { .. } => {}
                }
                // Cancelled trains are released by the sending loop
                if self.sender.has_pending() {
                    self.post_sending(None);
                }
            }
        }
        true
    }

    /// Run due continuations until none are left or `max_steps` ran.
    pub fn run_until_idle(&mut self, max_steps: usize) -> usize {
        let mut steps = 0;
        while steps < max_steps && self.run_once(Instant::now()) {
            steps += 1;
        }
        steps
    }
}

impl<T> std::fmt::Debug for ExecutionContext<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("sender", &self.sender)
            .field("assemblies", &self.assembler.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}
