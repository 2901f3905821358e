// The MIT License (MIT)

// Copyright (c) 2015 Rustcc Developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! The cooperative, single-threaded runtime: ready queue, timer-driven
//! wakeups, cancellation, and the stack pool spawned coroutines draw from.
//!
//! The teacher's own `scheduler.rs` ran a `mio`-backed event loop across a
//! pool of work-stealing OS threads (`deque::{Stealer, Worker}`,
//! `SchedMessage`, per-core `SCHEDULER` thread-locals). None of that
//! survives here: spec.md §4.2/§5 specify a strictly single-threaded
//! cooperative model with no preemption and no cross-thread state, so the
//! multi-core plumbing is gone and only the shape — a thread-local runtime
//! object, `#[macro_use] extern crate log;` diagnostics, a `Builder`-driven
//! `spawn` — survives the transformation.

use std::cell::RefCell;
use std::collections::VecDeque;

use log::{debug, trace, warn};

use crate::channel::Channel;
use crate::coroutine::{raw, Task, TaskId, TaskState};
use crate::error::{Error, Result};
use crate::handle::{Handle, HandleTable};
use crate::options::Options;
use crate::poller::{NullPoller, Poller};
use crate::stack::StackPool;
use crate::timer::{Deadline, TimerHeap};

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(Runtime::new());
}

/// Runs `f` with exclusive access to this thread's runtime. Never held
/// across a coroutine stack switch: every suspension point in this crate
/// drops its borrow before calling [`raw::suspend_current`].
pub(crate) fn with_runtime<F, R>(f: F) -> R
where
    F: FnOnce(&mut Runtime) -> R,
{
    RUNTIME.with(|cell| f(&mut cell.borrow_mut()))
}

/// The runtime-wide state: handle table, ready queue, timer heap, stack
/// cache and installed poller. Exactly the "single runtime object"
/// spec.md §9 calls for in place of implicit global state.
pub struct Runtime {
    pub(crate) handles: HandleTable,
    ready: VecDeque<TaskId>,
    pub(crate) timers: TimerHeap,
    stacks: StackPool,
    invocation: u64,
    current: Option<TaskId>,
    poller: Box<dyn Poller>,
}

impl Runtime {
    fn new() -> Runtime {
        Runtime {
            handles: HandleTable::new(),
            ready: VecDeque::new(),
            timers: TimerHeap::new(),
            stacks: StackPool::new(),
            invocation: 0,
            current: None,
            poller: Box::new(NullPoller),
        }
    }

    pub(crate) fn next_invocation(&mut self) -> u64 {
        self.invocation += 1;
        self.invocation
    }

    /// Places `task` at the tail of the ready queue. Exposed for choose's
    /// self-resume fast paths, which queue a wakeup without going through
    /// `resume_clause`/`resume_global`'s "must currently be Suspended"
    /// gate.
    pub(crate) fn enqueue_ready(&mut self, task: TaskId) {
        self.ready.push_back(task);
    }

    fn spawn<F>(&mut self, opts: Options, f: F) -> Result<Handle>
    where
        F: FnOnce() + Send + 'static,
    {
        let stack = self.stacks.take_stack(opts.stack_size);
        let raw = raw::Coroutine::spawn(stack, f);
        let task = Task::new(raw, opts.name);
        let h = self.handles.create(task, "go")?;
        self.ready.push_back(h);
        Ok(h)
    }

    /// Wakes a task blocked in `choose` (or `chsend`/`chrecv`, which are
    /// one-clause chooses) with the given clause index and optional
    /// per-clause error. A no-op if the task isn't currently suspended —
    /// guards against a stale wakeup racing a cancellation.
    pub(crate) fn resume_clause(&mut self, task: TaskId, clause: usize, err: Option<Error>) {
        if let Ok(t) = self.handles.data_mut::<Task>(task) {
            if t.state != TaskState::Suspended {
                return;
            }
            t.resume_value = clause as i32;
            t.resume_clause_error = err;
            t.state = TaskState::Ready;
            self.ready.push_back(task);
        }
    }

    /// Wakes a suspended task with a global error (timeout, cancellation)
    /// rather than a clause completion. `gen` is the timer generation this
    /// wakeup was armed under; a mismatch means the suspend it was meant
    /// for already ended some other way, so the wakeup is dropped.
    fn resume_global(&mut self, task: TaskId, gen: u64, err: Error) {
        if let Ok(t) = self.handles.data_mut::<Task>(task) {
            if t.state != TaskState::Suspended || t.timer_gen != gen {
                return;
            }
            t.resume_value = -err.errno();
            t.resume_clause_error = None;
            t.state = TaskState::Ready;
            self.ready.push_back(task);
        }
    }

    /// Runs one scheduling tick: fires expired timers, then resumes at
    /// most one ready task. Returns `false` once there is nothing left to
    /// do (empty ready queue and empty timer heap).
    fn tick(&mut self) -> bool {
        let now = crate::timer::now();
        for (task, gen) in self.timers.pop_expired(now) {
            self.resume_global(task, gen, Error::TimedOut);
        }
        for (task, _events) in self.poller.poll(0) {
            self.resume_clause(task, 0, None);
        }

        let task_id = match self.ready.pop_front() {
            Some(t) => t,
            None => return !self.timers.is_empty(),
        };

        self.current = Some(task_id);
        let finished = {
            let t = match self.handles.data_mut::<Task>(task_id) {
                Ok(t) => t,
                Err(_) => {
                    self.current = None;
                    return true;
                }
            };
            t.state = TaskState::Running;
            trace!("resuming task {}", task_id);
            // The real payload (clause index / -errno) is read back from
            // the task's own `resume_value` field after it wakes, not from
            // this raw resume value: every suspension point in this crate
            // re-borrows the runtime once it's back, so there is nothing
            // meaningful to pass across the bare stack switch itself.
            t.raw.resume(0);
            t.state = if t.raw.is_finished() { TaskState::Finished } else { TaskState::Suspended };
            t.raw.is_finished()
        };
        self.current = None;

        if finished {
            debug!("task {} finished", task_id);
            if let Some(stack) = self.handles.data_mut::<Task>(task_id).ok().and_then(|t| t.raw.take_stack()) {
                self.stacks.give_stack(stack);
            }
        }
        true
    }

    /// Delivers cancellation to a coroutine handle and pumps the
    /// scheduler until it has run to completion, mirroring `hclose` on a
    /// coroutine (spec.md §4.2: "delivers cancellation and joins"). Only
    /// ever called on the final release of a Task handle — see `hclose`'s
    /// refcount gate — so this, not `hclose` itself, is the payload of
    /// spec.md §4.1's "when it reaches zero" branch.
    ///
    /// If `h` is still `Ready` (spawned but never run), this leaves it on
    /// the ready queue rather than forcing it onto it a second time;
    /// `canceled` alone is enough, since every suspending entry point now
    /// checks it up front and fails fast before blocking, so the join loop
    /// below can never stall on a task that hasn't had its first turn yet.
    fn cancel_and_join(&mut self, h: Handle) -> Result<()> {
        {
            let t = self.handles.data_mut::<Task>(h)?;
            t.canceled = true;
            if t.state == TaskState::Suspended {
                t.resume_value = -Error::Canceled.errno();
                t.resume_clause_error = None;
                t.state = TaskState::Ready;
                self.ready.push_back(h);
            }
        }
        while !self.handles.data::<Task>(h).map(|t| t.is_finished()).unwrap_or(true) {
            if !self.tick() {
                warn!("cancel_and_join on {} stalled: scheduler ran dry before the task finished", h);
                break;
            }
        }
        self.close_handle(h)
    }

    /// Releases `h` through the handle table, toggling the *calling*
    /// coroutine's (`self.current`'s) `stopping` flag around the vtable
    /// `close` callback — spec.md §4.1/§4.2: "`stopping` is set during a
    /// handle's own close callback to prevent it from suspending further,"
    /// matching `handle.c`'s `hclose` saving/restoring
    /// `dill_running->stopping` around the vtable call.
    fn close_handle(&mut self, h: Handle) -> Result<()> {
        let caller = self.current;
        let was_stopping = caller.and_then(|cr| {
            self.handles.data_mut::<Task>(cr).ok().map(|t| {
                let prev = t.stopping;
                t.stopping = true;
                prev
            })
        });
        let result = self.handles.close(h);
        if let (Some(cr), Some(prev)) = (caller, was_stopping) {
            if let Ok(t) = self.handles.data_mut::<Task>(cr) {
                t.stopping = prev;
            }
        }
        result
    }
}

/// Launches a coroutine with default options. Returns immediately; the
/// child becomes ready but doesn't run until the scheduler next reaches
/// it.
#[track_caller]
pub fn go<F>(f: F) -> Result<Handle>
where
    F: FnOnce() + Send + 'static,
{
    go_opts(Options::default(), f)
}

/// Launches a coroutine with explicit [`Options`] (stack size, name).
#[track_caller]
pub fn go_opts<F>(opts: Options, f: F) -> Result<Handle>
where
    F: FnOnce() + Send + 'static,
{
    with_runtime(|rt| rt.spawn(opts, f))
}

/// The handle of the coroutine executing this call.
///
/// # Panics
/// If called outside a coroutine started by [`go`] (e.g. from the thread
/// that only calls [`run`]).
pub fn current() -> TaskId {
    with_runtime(|rt| rt.current).expect("current() called outside a running coroutine")
}

/// Places the current coroutine at the tail of the ready queue and runs
/// the next one. Returns `ERR_CANCELED` if a cancellation was delivered
/// during the yield.
pub fn yield_now() -> Result<()> {
    let cr = current();
    with_runtime(|rt| {
        let t = rt.handles.data_mut::<Task>(cr).expect("current task handle must be live");
        // Bumped even though this suspend never arms its own timer: it
        // retires any deadline still outstanding from an earlier
        // msleep/choose on this task, so that one can't fire into this
        // self-resume and double-enqueue it.
        t.bump_timer_gen();
        t.state = TaskState::Suspended;
        t.resume_value = 0;
        rt.ready.push_back(cr);
    });
    raw::suspend_current(0);
    with_runtime(|rt| {
        let t = rt.handles.data_mut::<Task>(cr).expect("current task handle must be live");
        if t.canceled {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    })
}

/// Suspends the current coroutine until `deadline` (absolute ms on
/// [`crate::timer::now`]'s clock) or cancellation.
pub fn msleep(deadline: Deadline) -> Result<()> {
    let cr = current();
    if with_runtime(|rt| rt.handles.data::<Task>(cr).map(|t| t.canceled || t.stopping).unwrap_or(false)) {
        return Err(Error::Canceled);
    }
    with_runtime(|rt| {
        let t = rt.handles.data_mut::<Task>(cr).expect("current task handle must be live");
        let gen = t.bump_timer_gen();
        t.state = TaskState::Suspended;
        rt.timers.add(cr, deadline, gen);
    });
    raw::suspend_current(0);
    with_runtime(|rt| {
        let t = rt.handles.data_mut::<Task>(cr).expect("current task handle must be live");
        let rv = t.resume_value;
        if rv < 0 {
            Err(Error::from_errno(-rv))
        } else {
            Ok(())
        }
    })
}

/// Suspends until `fd` becomes ready for one of `events`, the deadline
/// passes, or cancellation arrives. With the default
/// [`crate::poller::NullPoller`] installed, this degenerates into a plain
/// deadline wait.
pub fn fdwait(fd: i32, events: i16, deadline: Option<Deadline>) -> Result<i16> {
    let cr = current();
    if with_runtime(|rt| rt.handles.data::<Task>(cr).map(|t| t.canceled || t.stopping).unwrap_or(false)) {
        return Err(Error::Canceled);
    }
    with_runtime(|rt| {
        rt.poller.fdwait(fd, events, cr);
        let t = rt.handles.data_mut::<Task>(cr).expect("current task handle must be live");
        let gen = t.bump_timer_gen();
        if let Some(d) = deadline {
            rt.timers.add(cr, d, gen);
        }
        let t = rt.handles.data_mut::<Task>(cr).expect("current task handle must be live");
        t.state = TaskState::Suspended;
    });
    raw::suspend_current(0);
    with_runtime(|rt| {
        rt.poller.fdclean(fd);
        let t = rt.handles.data_mut::<Task>(cr).expect("current task handle must be live");
        let rv = t.resume_value;
        if rv < 0 {
            Err(Error::from_errno(-rv))
        } else {
            Ok(events)
        }
    })
}

/// Decrements a handle's refcount. Only on the final release does this
/// run the type-specific cascade: for a channel, sets `done` and wakes
/// every queued waiter with `ERR_PIPE`; for a coroutine, cancels and
/// joins. Every release before that is a plain decrement with no cascade
/// (spec.md:43: "a handle with refcount N is released only after N
/// closes; close is invoked exactly once, on the final release").
/// `ERR_BADF` if `h` doesn't name a live handle of either kind.
pub fn hclose(h: Handle) -> Result<()> {
    with_runtime(|rt| {
        if rt.handles.data::<Channel>(h).is_ok() {
            if rt.handles.would_release(h)? {
                let waiters = {
                    let ch = rt.handles.data_mut::<Channel>(h)?;
                    ch.mark_done()
                };
                for w in waiters {
                    rt.resume_clause(w.task, w.clause, Some(Error::Pipe));
                }
            }
            rt.close_handle(h)
        } else if rt.handles.data::<Task>(h).is_ok() {
            if rt.handles.would_release(h)? {
                rt.cancel_and_join(h)
            } else {
                rt.close_handle(h)
            }
        } else {
            Err(Error::Badf)
        }
    })
}

/// Increments a handle's refcount, returning the same handle.
pub fn hdup(h: Handle) -> Result<Handle> {
    with_runtime(|rt| rt.handles.dup(h))
}

/// Drives the scheduler until both the ready queue and the timer heap are
/// empty — i.e. every spawned coroutine has run to completion or is
/// waiting on something nothing will ever signal. The entry point a
/// top-level program calls after `go`-ing its initial coroutines; the
/// closest Rust rendering of the implicit scheduler loop a linked
/// `libdill` program gets for free.
pub fn run() {
    while with_runtime(|rt| rt.tick()) {}
}

/// Runs one scheduling tick and returns whether there is more work
/// pending. Lets a caller interleave the runtime with its own I/O loop
/// instead of blocking inside [`run`].
pub fn run_until_idle() -> bool {
    with_runtime(|rt| rt.tick())
}

/// Installs a custom [`Poller`] (e.g. an epoll- or kqueue-backed one) in
/// place of the default [`crate::poller::NullPoller`].
pub fn set_poller(poller: Box<dyn Poller>) {
    with_runtime(|rt| rt.poller = poller);
}
