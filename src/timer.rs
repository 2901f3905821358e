//! Deadline timer heap driving `choose`'s blocking wait.
//!
//! `spec.md` §6 names `timer_add(cr, deadline_ms)` / `timer_rm` as part of
//! the interface the core consumes from an external scheduler/poller. That
//! collaborator isn't implemented here (the fd-poller is explicitly out of
//! scope), but the choose engine needs *something* to arm and disarm a
//! deadline against, so this crate owns a minimal binary-heap timer wheel.
//! Naming follows the pack's `DeadlineHeap` convention (see
//! `other_examples/.../scheduler/mod.rs`).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::coroutine::TaskId;

/// Absolute millisecond timestamp on the runtime's monotonic clock.
pub type Deadline = i64;

/// Returns the current monotonic time in milliseconds, relative to the
/// first call into the runtime (matches spec.md's "monotonic clock").
pub fn now() -> Deadline {
    EPOCH.with(|epoch| epoch.elapsed().as_millis() as Deadline)
}

thread_local! {
    static EPOCH: Instant = Instant::now();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    deadline: Deadline,
    seq: u64,
    task: TaskId,
    /// The task's timer generation at arm time; see `Task::timer_gen`.
    gen: u64,
}

/// A min-heap of pending deadlines, ordered by `(deadline, seq)` so timers
/// armed at the same millisecond still fire in registration order.
#[derive(Debug, Default)]
pub struct TimerHeap {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
}

impl TimerHeap {
    pub fn new() -> TimerHeap {
        TimerHeap {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Arms a deadline for `task` under timer generation `gen` (see
    /// `Task::timer_gen`). Multiple outstanding timers per task are
    /// allowed; entries left over from a suspend that ended another way
    /// are cheap to carry since the heap doesn't support O(log n) removal
    /// by key — `pop_expired` hands the generation back so the scheduler
    /// can tell a live timer from a stale one without scanning the heap.
    pub fn add(&mut self, task: TaskId, deadline: Deadline, gen: u64) {
        self.seq += 1;
        self.heap.push(Reverse(Entry {
            deadline,
            seq: self.seq,
            task,
            gen,
        }));
    }

    /// Pops every timer whose deadline has passed `now`, returning
    /// `(task, gen)` pairs to resume with `ERR_TIMEDOUT` — the scheduler
    /// compares `gen` against the task's current `timer_gen` and drops
    /// the wakeup if they don't match.
    pub fn pop_expired(&mut self, now: Deadline) -> Vec<(TaskId, u64)> {
        let mut fired = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().unwrap();
            fired.push((entry.task, entry.gen));
        }
        fired
    }

    /// The soonest deadline still armed, if any — used by the scheduler to
    /// decide how long it may safely sleep when the ready queue is empty.
    pub fn next_deadline(&self) -> Option<Deadline> {
        self.heap.peek().map(|Reverse(e)| e.deadline)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
