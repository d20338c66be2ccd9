//! Continuations an execution context posts to itself.
//!
//! Nothing here blocks. Work that must wait for a later turn (the next
//! fragment of a train, the next cleanup batch) is re-queued as a
//! [`Continuation`] and picked up by the context's run loop.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ndbsig_core::Priority;

use crate::cleanup::CleanupTask;

pub enum Continuation {
    /// Advance every in-flight fragmented send by one fragment.
    ContinueSending,
    Cleanup(CleanupTask),
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContinueSending => f.write_str("ContinueSending"),
            Self::Cleanup(task) => f.debug_tuple("Cleanup").field(task).finish(),
        }
    }
}

/// "Send a signal to myself", optionally delayed.
pub trait SelfScheduler {
    fn send_to_self(&mut self, continuation: Continuation, priority: Priority, delay: Option<Duration>);
}

#[derive(Debug)]
struct Delayed {
    due: Instant,
    priority: Priority,
    continuation: Continuation,
}

/// Two priority queues plus a delayed list, drained high first.
#[derive(Debug, Default)]
pub struct RunQueue {
    high: VecDeque<Continuation>,
    normal: VecDeque<Continuation>,
    delayed: Vec<Delayed>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `continuation` to become runnable at `due`.
    pub fn post_at(&mut self, continuation: Continuation, priority: Priority, due: Instant) {
        self.delayed.push(Delayed {
            due,
            priority,
            continuation,
        });
    }

    fn push(&mut self, continuation: Continuation, priority: Priority) {
        match priority {
            Priority::High => self.high.push_back(continuation),
            Priority::Normal => self.normal.push_back(continuation),
        }
    }

    /// Earliest time a delayed continuation becomes runnable.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.delayed.iter().map(|d| d.due).min()
    }

    /// Next runnable continuation as of `now`.
    pub fn pop(&mut self, now: Instant) -> Option<Continuation> {
        if !self.delayed.is_empty() {
            self.delayed.sort_by_key(|d| d.due);
            let split = self.delayed.partition_point(|d| d.due <= now);
            let ready: Vec<Delayed> = self.delayed.drain(..split).collect();
            for d in ready {
                self.push(d.continuation, d.priority);
            }
        }
        self.high.pop_front().or_else(|| self.normal.pop_front())
    }
}

impl SelfScheduler for RunQueue {
    fn send_to_self(&mut self, continuation: Continuation, priority: Priority, delay: Option<Duration>) {
        match delay {
            Some(delay) if !delay.is_zero() => {
                self.post_at(continuation, priority, Instant::now() + delay)
            }
            _ => self.push(continuation, priority),
        }
    }
}
