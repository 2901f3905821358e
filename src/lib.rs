// The MIT License (MIT)

// Copyright (c) 2015 Rustcc developers

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

//! A lightweight structured-concurrency runtime: a channel and choose
//! engine, cooperative coroutine scheduling, and the reference-counted
//! handle table that gives both uniform naming.
//!
//! Spawn coroutines with [`go`], move values between them with
//! [`channel`]/[`chsend`]/[`chrecv`] or the typed [`chan::Chan`] wrapper,
//! and wait on several channels at once with [`choose`]. Nothing runs
//! until the top-level program calls [`run`].

#[macro_use]
extern crate log;

pub mod builder;
pub mod chan;
pub mod channel;
pub mod choose;
pub mod coroutine;
pub mod error;
pub mod handle;
pub mod options;
pub mod poller;
pub mod scheduler;
pub mod stack;
pub mod timer;

pub use builder::Builder;
pub use chan::Chan;
pub use choose::{choose, Clause};
pub use coroutine::TaskId;
pub use error::{Error, Result};
pub use handle::Handle;
pub use options::Options;
pub use scheduler::{current, fdwait, go, go_opts, hclose, hdup, msleep, run, run_until_idle, set_poller, yield_now};
pub use timer::{now, Deadline};

use crate::scheduler::with_runtime;

/// Creates a channel of `bufsz` items, each `itemsz` bytes. `bufsz == 0`
/// is a valid, unbuffered channel.
#[track_caller]
pub fn channel(itemsz: usize, bufsz: usize) -> Result<Handle> {
    with_runtime(|rt| rt.handles.create(channel::Channel::new(itemsz, bufsz), "channel"))
}

/// Sends `val` on `h`, blocking until a receiver takes it or the channel
/// has buffer room, up to `deadline` (`None` waits forever).
///
/// `ERR_INVAL` if `val.len()` doesn't match the channel's item size.
/// `ERR_PIPE` if the channel is done.
pub fn chsend(h: Handle, val: &[u8], deadline: Option<Deadline>) -> Result<()> {
    let mut clauses = [Clause::send(h, val)];
    choose(&mut clauses, deadline).map(|_| ())
}

/// Receives one item from `h` into `out`, blocking up to `deadline`.
///
/// `ERR_INVAL` if `out.len()` doesn't match the channel's item size.
/// `ERR_PIPE` if the channel is done and empty.
pub fn chrecv(h: Handle, out: &mut [u8], deadline: Option<Deadline>) -> Result<()> {
    let mut clauses = [Clause::recv(h, out)];
    choose(&mut clauses, deadline).map(|_| ())
}

/// Marks channel `h` done: every sender and receiver currently queued on
/// it is woken with `ERR_PIPE`, and every subsequent `chdone` on the same
/// handle returns `ERR_PIPE`. Does not free the handle — pair with
/// [`hclose`] for that.
pub fn chdone(h: Handle) -> Result<()> {
    with_runtime(|rt| {
        let waiters = {
            let ch = rt.handles.data_mut::<channel::Channel>(h)?;
            if ch.is_done() {
                return Err(Error::Pipe);
            }
            ch.mark_done()
        };
        for w in waiters {
            rt.resume_clause(w.task, w.clause, Some(Error::Pipe));
        }
        Ok(())
    })
}
