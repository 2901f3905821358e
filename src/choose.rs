//! The choose engine: atomic multi-clause selection over channels.
//!
//! A Rust rendering of `chan.c`'s `dill_choose_*` family. The C original
//! keeps clause state in a fixed-size array threaded through a stack-
//! resident `choosedata` struct; here the per-call bookkeeping is a plain
//! local `Vec`, and the caller-supplied buffers are reached through raw
//! pointers stashed on the channel endpoints — valid for exactly as long
//! as the owning coroutine stays parked, the same lifetime the C clause
//! nodes rely on.

use rand::Rng;

use crate::channel::{Channel, Waiter};
use crate::coroutine::{raw, Task, TaskId};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::scheduler::{self, with_runtime};
use crate::timer::Deadline;

/// The operation a clause offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Send,
    Recv,
}

/// Borrowed access to the caller's value buffer for one clause. Replaces
/// the C original's `void *val` + `len` pair with a lifetimed, direction-
/// correct slice at the public API boundary.
pub enum ClauseIo<'a> {
    Send(&'a [u8]),
    Recv(&'a mut [u8]),
}

impl<'a> ClauseIo<'a> {
    fn len(&self) -> usize {
        match self {
            ClauseIo::Send(s) => s.len(),
            ClauseIo::Recv(s) => s.len(),
        }
    }

    fn op(&self) -> Op {
        match self {
            ClauseIo::Send(_) => Op::Send,
            ClauseIo::Recv(_) => Op::Recv,
        }
    }
}

/// A single offered operation on a channel, supplied by the caller.
pub struct Clause<'a> {
    pub channel: Handle,
    pub io: ClauseIo<'a>,
}

impl<'a> Clause<'a> {
    pub fn send(channel: Handle, val: &'a [u8]) -> Clause<'a> {
        Clause { channel, io: ClauseIo::Send(val) }
    }

    pub fn recv(channel: Handle, out: &'a mut [u8]) -> Clause<'a> {
        Clause { channel, io: ClauseIo::Recv(out) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Sender,
    Receiver,
}

/// One clause's registration on an endpoint, recorded so the wait can be
/// torn down again regardless of which clause actually completed it.
#[derive(Debug, Clone, Copy)]
struct Registration {
    channel: Handle,
    side: Side,
    clause: usize,
}

/// Scratch stashed in a blocked task's control block while it waits
/// inside `choose` — the Rust rendering of `choosedata`. Diagnostic only:
/// the registrations that actually need tearing down on wakeup live in
/// this call's own stack frame (`suspend_and_wait` below), which stays
/// alive for as long as the task is parked.
pub struct ChooseData {
    pub clause_count: usize,
    pub deadline: Option<Deadline>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Ready,
    WouldBlock,
    Pipe,
}

fn classify(ch: &Channel, op: Op) -> Classification {
    match op {
        Op::Send => {
            if ch.is_done() {
                Classification::Pipe
            } else if !ch.has_receiver_waiting() && ch.items() == ch.bufsz() {
                Classification::WouldBlock
            } else {
                Classification::Ready
            }
        }
        Op::Recv => {
            if ch.has_sender_waiting() || ch.items() > 0 {
                Classification::Ready
            } else if ch.is_done() {
                Classification::Pipe
            } else {
                Classification::WouldBlock
            }
        }
    }
}

/// Runs one choose call. `deadline`: `Some(ms)` where `ms <= now()` polls
/// (returns `ERR_TIMEDOUT` immediately if nothing is ready), `Some(ms)`
/// where `ms > now()` waits until then, `None` waits forever.
///
/// Collapses the per-clause error into the overall result — callers that
/// need scenario 5's "returns a clause index *and* a pipe error" should
/// use [`choose_clause`] instead.
pub fn choose(clauses: &mut [Clause<'_>], deadline: Option<Deadline>) -> Result<usize> {
    match choose_clause(clauses, deadline) {
        Ok((idx, Ok(()))) => Ok(idx),
        Ok((_idx, Err(e))) => Err(e),
        Err(e) => Err(e),
    }
}

/// Maps the generic `ERR_NOTSUP` a wrong-type handle lookup produces to the
/// `ERR_BADF` choose's own contract promises for "a clause's handle is not
/// a channel" (spec.md §4.4 Validation).
fn as_badf(e: Error) -> Error {
    if e == Error::Notsup {
        Error::Badf
    } else {
        e
    }
}

/// Queues `cr` to resume on the next tick carrying `resume_value`/`err`,
/// matching `dill_resume` immediately followed by `dill_suspend` in the C
/// original — used even on choose's fast paths so a tight loop of
/// already-satisfiable clauses still yields to the rest of the ready
/// queue.
fn self_resume(rt: &mut scheduler::Runtime, cr: TaskId, resume_value: i32, err: Option<Error>) {
    if let Ok(t) = rt.handles.data_mut::<Task>(cr) {
        t.bump_timer_gen();
        t.resume_value = resume_value;
        t.resume_clause_error = err;
        t.state = crate::coroutine::TaskState::Suspended;
    }
    rt.enqueue_ready(cr);
}

/// Full-fidelity choose: on success returns `(clause_index, per_clause_result)`.
pub fn choose_clause(clauses: &mut [Clause<'_>], deadline: Option<Deadline>) -> Result<(usize, Result<()>)> {
    let cr = scheduler::current();

    // Mirrors `dill_choose_`'s very first statement: a cancellation or an
    // in-progress close on this coroutine fails the call fast, before any
    // validation or registration work runs.
    if with_runtime(|rt| rt.handles.data::<Task>(cr).map(|t| t.canceled || t.stopping).unwrap_or(false)) {
        return Err(Error::Canceled);
    }

    if clauses.is_empty() {
        return Err(Error::Inval);
    }

    // Validation + pre-check + inline transfer, all under one borrow: no
    // suspend point is reached on this path, so holding the runtime
    // borrow for its whole duration is safe.
    let resolved = with_runtime(|rt| -> Result<Option<(usize, Result<()>)>> {
        for c in clauses.iter() {
            let ch = rt.handles.data::<Channel>(c.channel).map_err(as_badf)?;
            if c.io.len() != ch.itemsz() {
                return Err(Error::Inval);
            }
        }

        let invocation = rt.next_invocation();
        let mut classified: Vec<Option<Classification>> = vec![None; clauses.len()];
        for (i, c) in clauses.iter().enumerate() {
            let ch = rt.handles.data_mut::<Channel>(c.channel).map_err(as_badf)?;
            let duplicate = match c.io.op() {
                Op::Send => ch.sender_touch(invocation),
                Op::Recv => ch.receiver_touch(invocation),
            };
            if !duplicate {
                classified[i] = Some(classify(ch, c.io.op()));
            }
        }

        let candidates: Vec<usize> = classified
            .iter()
            .enumerate()
            .filter_map(|(i, c)| match c {
                Some(Classification::Ready) | Some(Classification::Pipe) => Some(i),
                _ => None,
            })
            .collect();

        if !candidates.is_empty() {
            let chosen = if candidates.len() == 1 {
                candidates[0]
            } else {
                candidates[rand::thread_rng().gen_range(0..candidates.len())]
            };
            let outcome = if classified[chosen] == Some(Classification::Ready) {
                transfer(rt, clauses, chosen)?
            } else {
                Err(Error::Pipe)
            };
            // Self-resume and re-enter the scheduler even on this fast
            // path, exactly as `dill_choose_` does (`dill_resume` then
            // `dill_suspend` run unconditionally once a clause is picked):
            // a coroutine doing nothing but tight-loop immediate-path
            // `chsend`/`chrecv` calls still has to give the rest of the
            // ready queue a turn.
            self_resume(rt, cr, chosen as i32, outcome.err());
            PENDING.with(|p| *p.borrow_mut() = Some(Vec::new()));
            return Ok(None);
        }

        if matches!(deadline, Some(d) if d <= crate::timer::now()) {
            self_resume(rt, cr, -Error::TimedOut.errno(), None);
            PENDING.with(|p| *p.borrow_mut() = Some(Vec::new()));
            return Ok(None);
        }

        // Nothing ready and the caller is willing to wait: register every
        // non-duplicate clause on its endpoint and arm the deadline. The
        // actual suspend happens after this closure returns.
        let mut registrations = Vec::new();
        for (i, c) in clauses.iter_mut().enumerate() {
            if classified[i].is_none() {
                continue;
            }
            let (ptr, len) = match &mut c.io {
                ClauseIo::Send(v) => (v.as_ptr() as *mut u8, v.len()),
                ClauseIo::Recv(v) => (v.as_mut_ptr(), v.len()),
            };
            let ch = rt.handles.data_mut::<Channel>(c.channel)?;
            match c.io.op() {
                Op::Send => {
                    ch.enqueue_sender(Waiter { task: cr, clause: i, ptr, len });
                    registrations.push(Registration { channel: c.channel, side: Side::Sender, clause: i });
                }
                Op::Recv => {
                    ch.enqueue_receiver(Waiter { task: cr, clause: i, ptr, len });
                    registrations.push(Registration { channel: c.channel, side: Side::Receiver, clause: i });
                }
            }
        }
        if let Ok(t) = rt.handles.data_mut::<Task>(cr) {
            let gen = t.bump_timer_gen();
            if let Some(d) = deadline {
                rt.timers.add(cr, d, gen);
            }
        }
        if let Ok(t) = rt.handles.data_mut::<Task>(cr) {
            t.choose_scratch = Some(ChooseData { clause_count: clauses.len(), deadline });
            t.state = crate::coroutine::TaskState::Suspended;
        }
        PENDING.with(|p| *p.borrow_mut() = Some(registrations));
        Ok(None)
    })?;

    if let Some(result) = resolved {
        return Ok(result);
    }

    // Hand control back to the scheduler. Nothing here may touch the
    // runtime borrow: it must be fully released before this call, since
    // it performs a real stack switch away from this coroutine.
    raw::suspend_current(0);

    // We're back: read what the resumer recorded, then tear down every
    // registration this call posted (not just the one that completed).
    let (resume_value, clause_err) = with_runtime(|rt| {
        let t = rt.handles.data_mut::<Task>(cr).expect("current task handle must be live");
        t.choose_scratch = None;
        (t.resume_value, t.resume_clause_error.take())
    });

    let registrations = PENDING.with(|p| p.borrow_mut().take()).unwrap_or_default();
    with_runtime(|rt| {
        for r in &registrations {
            if let Ok(ch) = rt.handles.data_mut::<Channel>(r.channel) {
                match r.side {
                    Side::Sender => ch.remove_sender(cr, r.clause),
                    Side::Receiver => ch.remove_receiver(cr, r.clause),
                }
            }
        }
    });

    if resume_value >= 0 {
        Ok((resume_value as usize, clause_err.map_or(Ok(()), Err)))
    } else {
        Err(Error::from_errno(-resume_value))
    }
}

thread_local! {
    /// Bridges the registration list from the pre-suspend half of
    /// `choose_clause` to its post-wake half. A plain local couldn't
    /// survive the raw stack switch in between.
    static PENDING: std::cell::RefCell<Option<Vec<Registration>>> = std::cell::RefCell::new(None);
}

/// Performs the inline transfer for a clause classified `Ready`: either
/// handing data straight to/from a waiting peer, or moving it through the
/// ring buffer. Follows the rendezvous rule from spec.md §4.3 exactly.
fn transfer(rt: &mut scheduler::Runtime, clauses: &mut [Clause<'_>], idx: usize) -> Result<()> {
    let channel = clauses[idx].channel;
    match &mut clauses[idx].io {
        ClauseIo::Send(val) => {
            let peer = {
                let ch = rt.handles.data_mut::<Channel>(channel)?;
                ch.pop_receiver()
            };
            if let Some(w) = peer {
                // SAFETY: `w` was registered by a task that is still
                // suspended awaiting this resume; its buffer is live.
                unsafe { w.as_mut_slice().copy_from_slice(val) };
                rt.resume_clause(w.task, w.clause, None);
            } else {
                let ch = rt.handles.data_mut::<Channel>(channel)?;
                ch.ring_push(val);
            }
            Ok(())
        }
        ClauseIo::Recv(out) => {
            let had_items = rt.handles.data::<Channel>(channel)?.items() > 0;
            if had_items {
                let ch = rt.handles.data_mut::<Channel>(channel)?;
                ch.ring_pop(out);
                let promoted = {
                    let ch = rt.handles.data_mut::<Channel>(channel)?;
                    ch.pop_sender()
                };
                if let Some(w) = promoted {
                    // SAFETY: see above.
                    let val = unsafe { w.as_slice() }.to_vec();
                    let ch = rt.handles.data_mut::<Channel>(channel)?;
                    ch.ring_push(&val);
                    rt.resume_clause(w.task, w.clause, None);
                }
            } else {
                let sender = {
                    let ch = rt.handles.data_mut::<Channel>(channel)?;
                    ch.pop_sender()
                };
                let w = sender.expect("classified Ready recv must have a sender or items");
                // SAFETY: see above.
                unsafe { out.copy_from_slice(w.as_slice()) };
                rt.resume_clause(w.task, w.clause, None);
            }
            Ok(())
        }
    }
}
