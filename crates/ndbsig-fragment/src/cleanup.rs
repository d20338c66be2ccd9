//! Incremental cleanup after a peer node fails.
//!
//! Cleanup walks the assembly table and then both send lists, a bounded
//! number of elements per step. The task carries its own cursor so it can
//! be re-posted to the run queue between steps.

use ndbsig_core::{NodeId, SegmentPool};

use crate::assembler::{FragmentAssembler, FragmentKey, Sweep};
use crate::sender::{FragmentSender, SendId, SendList};

pub type CleanupCallback = Box<dyn FnOnce(NodeId, usize) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CleanupPhase {
    Assemblies(Option<FragmentKey>),
    SegmentedSends(Option<SendId>),
    LinearSends(Option<SendId>),
}

pub struct CleanupTask {
    failed_node: NodeId,
    phase: CleanupPhase,
    elements_cleaned: usize,
    callback: Option<CleanupCallback>,
}

#[derive(Debug)]
pub enum CleanupStep {
    /// More to do; post the task again.
    Continue(CleanupTask),
    Finished { failed_node: NodeId, elements_cleaned: usize },
}

impl CleanupTask {
    pub fn new(failed_node: NodeId, callback: Option<CleanupCallback>) -> Self {
        Self {
            failed_node,
            phase: CleanupPhase::Assemblies(None),
            elements_cleaned: 0,
            callback,
        }
    }

    pub fn failed_node(&self) -> NodeId {
        self.failed_node
    }

    pub fn elements_cleaned(&self) -> usize {
        self.elements_cleaned
    }

    /// Examine at most `work_units` elements.
    pub fn run(
        mut self,
        pool: &SegmentPool,
        assembler: &mut FragmentAssembler,
        sender: &mut FragmentSender,
        work_units: usize,
    ) -> CleanupStep {
        let node = self.failed_node;
        let mut budget = work_units.max(1);

        while budget > 0 {
            let (sweep_examined, sweep_cleaned, next) = match self.phase {
                CleanupPhase::Assemblies(after) => {
                    let sweep = assembler.release_node(pool, node, after, budget);
                    let next = match sweep.resume_after {
                        Some(key) => CleanupPhase::Assemblies(Some(key)),
                        None => CleanupPhase::SegmentedSends(None),
                    };
                    (sweep.examined, sweep.cleaned, Some(next))
                }
                CleanupPhase::SegmentedSends(after) => {
                    let sweep = sender.drop_node(SendList::Segmented, node, after, budget);
                    let next = resume(sweep, CleanupPhase::SegmentedSends, || {
                        Some(CleanupPhase::LinearSends(None))
                    });
                    (sweep.examined, sweep.cleaned, next)
                }
                CleanupPhase::LinearSends(after) => {
                    let sweep = sender.drop_node(SendList::Linear, node, after, budget);
                    let next = resume(sweep, CleanupPhase::LinearSends, || None);
                    (sweep.examined, sweep.cleaned, next)
                }
            };

            self.elements_cleaned += sweep_cleaned;
            budget -= sweep_examined.min(budget);

            match next {
                Some(phase) => self.phase = phase,
                None => return self.finish(),
            }
        }

        tracing::trace!(
            node,
            phase = ?self.phase,
            cleaned = self.elements_cleaned,
            "cleanup step"
        );
        CleanupStep::Continue(self)
    }

    fn finish(mut self) -> CleanupStep {
        tracing::info!(
            node = self.failed_node,
            elements_cleaned = self.elements_cleaned,
            "node failure cleanup complete"
        );
        if let Some(callback) = self.callback.take() {
            callback(self.failed_node, self.elements_cleaned);
        }
        CleanupStep::Finished {
            failed_node: self.failed_node,
            elements_cleaned: self.elements_cleaned,
        }
    }
}

fn resume(
    sweep: Sweep<SendId>,
    same: fn(Option<SendId>) -> CleanupPhase,
    done: impl FnOnce() -> Option<CleanupPhase>,
) -> Option<CleanupPhase> {
    match sweep.resume_after {
        Some(id) => Some(same(Some(id))),
        None => done(),
    }
}

impl std::fmt::Debug for CleanupTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupTask")
            .field("failed_node", &self.failed_node)
            .field("phase", &self.phase)
            .field("elements_cleaned", &self.elements_cleaned)
            .finish()
    }
}
