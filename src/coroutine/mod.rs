//! Coroutine control block and low-level stack switching.
//!
//! Mirrors the shape of the teacher's own `coroutine::{Coroutine, Handle}`
//! split (see `coroutine/raw.rs`): `raw` owns the bare stack/context pair,
//! this module adds the bookkeeping spec.md's coroutine control block
//! requires (suspend/resume linkage, cancellation, choose scratch space).

pub mod raw;

use std::any::Any;

use crate::handle::{Handle, HandleObject};

/// A coroutine and a channel share one handle namespace, per spec.md §3
/// ("Handle: a small non-negative integer naming either a coroutine or a
/// channel").
pub type TaskId = Handle;

/// Lifecycle state of a task, used by the scheduler to decide whether a
/// handle is eligible for `resume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// On the ready queue, waiting for its turn to run.
    Ready,
    /// Currently executing (there is at most one of these at a time).
    Running,
    /// Suspended on `yield`/`msleep`/`fdwait`/a channel op/`choose`.
    Suspended,
    /// The coroutine's closure returned; the slot is eligible for `close`.
    Finished,
}

/// The coroutine control block (spec.md §3).
pub struct Task {
    pub(crate) raw: raw::Coroutine,
    pub(crate) state: TaskState,
    pub(crate) name: Option<String>,

    /// Set by a closer; the next suspending call returns `ERR_CANCELED`
    /// without performing its operation.
    pub(crate) canceled: bool,
    /// Set while this task's own `close` vtable callback is running, so it
    /// cannot recursively suspend.
    pub(crate) stopping: bool,

    /// Scratch area used by `choose` while this task is blocked inside it.
    /// Sized dynamically instead of the C original's fixed
    /// `DILL_OPAQUE_SIZE` byte array, since Rust has no reason to recreate
    /// that trick.
    pub(crate) choose_scratch: Option<crate::choose::ChooseData>,

    /// The value the next suspending call will return: `>= 0` is a clause
    /// index delivered by a peer operation or a `done` cascade, negative
    /// values are `-errno` (timeout, cancellation), matching spec.md's
    /// "negative resume codes translated to errno returns".
    pub(crate) resume_value: i32,

    /// Set alongside a non-negative `resume_value` when the completed
    /// clause also carries a per-clause error (spec.md scenario 5: a
    /// choose on a done channel returns the clause index *and* `ERR_PIPE`
    /// on that clause).
    pub(crate) resume_clause_error: Option<crate::error::Error>,

    /// Bumped on every suspend, timer-arming or not. A timer heap entry
    /// stashes the generation it was armed under; the scheduler only acts
    /// on a fired timer if it still matches, so a deadline left over from
    /// an already-completed `choose`/`msleep` can never wake the wrong
    /// later suspend.
    pub(crate) timer_gen: u64,
}

impl Task {
    pub fn new(raw: raw::Coroutine, name: Option<String>) -> Task {
        Task {
            raw,
            state: TaskState::Ready,
            name,
            canceled: false,
            stopping: false,
            choose_scratch: None,
            resume_value: 0,
            resume_clause_error: None,
            timer_gen: 0,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.state == TaskState::Finished
    }

    /// Advances this task's timer generation and returns the new value, to
    /// be stashed alongside any timer armed for the suspend now starting.
    pub(crate) fn bump_timer_gen(&mut self) -> u64 {
        self.timer_gen += 1;
        self.timer_gen
    }
}

impl HandleObject for Task {
    fn close(&mut self) {
        // Actual cancellation/join is driven by the scheduler (it needs
        // the runtime-global ready queue and timer heap); by the time the
        // handle table calls this, the scheduler has already resumed the
        // task to completion. This is the vtable hook spec.md §4.1
        // requires every handle to have.
    }

    fn dump(&self) -> String {
        format!(
            "COROUTINE name:{} state:{:?}",
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.state
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
