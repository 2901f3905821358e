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

//! A coroutine is nothing more than a (register context, stack) pair, same
//! as the teacher's own `coroutine::raw::Coroutine`. The teacher vendored
//! its own `rust_swap_registers` assembly (see the historical `context.rs`
//! this module replaces); this revision instead depends on the `context`
//! crate directly, the same move the pack's later `cheme-coroutine-rs`
//! revision made (its `coroutine::clonable` imports `context::Context` and
//! `context::stack::Stack` rather than a hand-rolled register file).

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};

use context::stack::ProtectedFixedSizeStack;
use context::{Context, Transfer};
use log::{error, trace};

/// Data value a finished coroutine's trampoline hands back forever. Chosen
/// out of the normal resume-value range (spec.md's resume values are small
/// clause indices or `-errno`) so it can never be confused with a real
/// wakeup.
const FINISHED_SENTINEL: usize = usize::MAX;

thread_local! {
    /// The context to switch back into to return control to whatever is
    /// driving the currently-running coroutine on this thread. Captured
    /// from the `Transfer` the trampoline receives on entry, and updated
    /// on every subsequent [`suspend_current`] round-trip. `None` when no
    /// coroutine is currently running on this thread.
    static YIELDER: RefCell<Option<Context>> = RefCell::new(None);
}

extern "C" fn trampoline(t: Transfer) -> ! {
    // The first resume into a freshly spawned coroutine carries a pointer
    // to the boxed closure as `data`, stashed there by `Coroutine::resume`.
    let closure_ptr = t.data as *mut Box<dyn FnOnce()>;
    let closure = unsafe { Box::from_raw(closure_ptr) };
    YIELDER.with(|y| *y.borrow_mut() = Some(t.context));

    let result = panic::catch_unwind(AssertUnwindSafe(|| closure()));
    if let Err(payload) = result {
        let msg = payload
            .downcast_ref::<&'static str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("Box<dyn Any>");
        error!("coroutine panicked: {}", msg);
    }

    // The closure returned (or panicked): signal completion and never
    // resume into this stack again. `Context::resume` never returns to us
    // since the scheduler won't switch back into a finished coroutine.
    let ctx = YIELDER.with(|y| y.borrow_mut().take()).expect("yielder context present at coroutine exit");
    let mut transfer = unsafe { ctx.resume(FINISHED_SENTINEL) };
    loop {
        transfer = unsafe { transfer.context.resume(FINISHED_SENTINEL) };
    }
}

/// Switches out of the currently running coroutine, back to whatever
/// called [`Coroutine::resume`] to get here, carrying `value`. Returns
/// whatever the next `resume` call passes in. Called by scheduler-level
/// suspension points (`yield_now`, `msleep`, channel operations,
/// `choose`) — never called from outside a running coroutine.
pub fn suspend_current(value: usize) -> usize {
    let ctx = YIELDER
        .with(|y| y.borrow_mut().take())
        .expect("suspend_current called outside a running coroutine");
    trace!("suspending coroutine, switching back to driver");
    let Transfer { context, data } = unsafe { ctx.resume(value) };
    YIELDER.with(|y| *y.borrow_mut() = Some(context));
    data
}

/// Coroutine is nothing more than a context and a stack.
pub struct Coroutine {
    /// `Some` whenever this coroutine is suspended and ready to be
    /// resumed; taken (and put back) across a switch.
    context: Option<Context>,
    stack: Option<ProtectedFixedSizeStack>,
    /// Pointer to the boxed entry closure, consumed on the very first
    /// resume. `None` afterwards.
    entry: Option<usize>,
    finished: bool,
}

unsafe impl Send for Coroutine {}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("finished", &self.finished)
            .field("launched", &self.entry.is_none())
            .finish()
    }
}

impl Coroutine {
    /// Allocates a stack and prepares a not-yet-running coroutine.
    pub fn spawn<F>(stack: ProtectedFixedSizeStack, f: F) -> Coroutine
    where
        F: FnOnce() + Send + 'static,
    {
        let boxed: Box<dyn FnOnce()> = Box::new(f);
        let entry = Box::into_raw(Box::new(boxed)) as usize;
        let context = unsafe { Context::new(&stack, trampoline) };
        Coroutine {
            context: Some(context),
            stack: Some(stack),
            entry: Some(entry),
            finished: false,
        }
    }

    /// Switches execution into this coroutine, carrying `value`. Returns
    /// whatever the coroutine passed back when it next suspends (or
    /// `FINISHED_SENTINEL` if its closure has returned).
    pub fn resume(&mut self, value: usize) -> usize {
        debug_assert!(!self.finished, "resume on a finished coroutine");
        let ctx = self
            .context
            .take()
            .expect("resume on a coroutine that is already running");
        let data = self.entry.take().unwrap_or(value);
        trace!("switching into coroutine stack");
        let Transfer { context, data } = unsafe { ctx.resume(data) };
        if data == FINISHED_SENTINEL {
            self.finished = true;
        } else {
            self.context = Some(context);
        }
        data
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Reclaims the stack for the pool, if this coroutine has finished.
    pub fn take_stack(&mut self) -> Option<ProtectedFixedSizeStack> {
        if self.finished {
            self.stack.take()
        } else {
            None
        }
    }
}
