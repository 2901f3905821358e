//! Seam for the event-loop poller `fdwait` integrates with.
//!
//! spec.md §1 names the fd-poller an out-of-scope external collaborator;
//! this trait is the interface it names, not an implementation of it. A
//! caller that wants real epoll/kqueue-backed `fdwait` implements
//! [`Poller`] and installs it via [`crate::scheduler::set_poller`]. The
//! crate ships only [`NullPoller`], which never reports a descriptor
//! ready — `fdwait` calls against it always run to their deadline.

use crate::coroutine::TaskId;

/// Readiness bits, matching the conventional `POLLIN`/`POLLOUT` shape
/// `libdill`'s `fdwait` takes.
pub const IN: i16 = 0x001;
pub const OUT: i16 = 0x004;

pub trait Poller {
    /// Registers interest in `events` on `fd` on behalf of `task`. The
    /// runtime is pull-based, not callback-based: it collects readiness
    /// by calling [`Poller::poll`] once per scheduler tick and resumes
    /// whichever tasks come back in the result.
    fn fdwait(&mut self, fd: i32, events: i16, task: TaskId);

    /// Drops any registration for `fd`, e.g. because the waiting
    /// coroutine's suspend ended some other way (timeout, cancellation).
    fn fdclean(&mut self, fd: i32);

    /// Runs one poll iteration, blocking at most `timeout_ms` (negative:
    /// forever, zero: return immediately). Returns `(task, events)` pairs
    /// for every descriptor that became ready.
    fn poll(&mut self, timeout_ms: i64) -> Vec<(TaskId, i16)>;
}

/// Default poller: nothing is ever ready. `fdwait` against this
/// degenerates into a pure deadline wait.
#[derive(Debug, Default)]
pub struct NullPoller;

impl Poller for NullPoller {
    fn fdwait(&mut self, _fd: i32, _events: i16, _task: TaskId) {}

    fn fdclean(&mut self, _fd: i32) {}

    fn poll(&mut self, _timeout_ms: i64) -> Vec<(TaskId, i16)> {
        Vec::new()
    }
}
