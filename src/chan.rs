//! Typed channel wrapper over the byte-oriented core.
//!
//! `channel`/`chsend`/`chrecv` only ever see byte buffers and an item size
//! (spec.md Non-goals: "no typed item enforcement beyond byte-size
//! matching"). `Chan<T>` is a thin ergonomic layer on top, the same move
//! the teacher's own `sync::mpsc` makes wrapping a byte/any channel with a
//! typed `Sender<T>`/`Receiver<T>`: it fixes `itemsz` to `size_of::<T>()`
//! at construction and transmutes through `std::slice::from_raw_parts`,
//! mirroring libdill's `memcpy`-based transfer at the macro layer.

use std::marker::PhantomData;
use std::mem;

use crate::error::Result;
use crate::handle::Handle;
use crate::timer::Deadline;
use crate::{chdone, chrecv, chsend, channel, hclose, hdup};

/// A channel of `T`, `T: Copy` so sending never needs to worry about
/// leaving a moved-from value inside the ring buffer or a peer's buffer.
pub struct Chan<T: Copy> {
    handle: Handle,
    _marker: PhantomData<T>,
}

impl<T: Copy> Chan<T> {
    /// Creates a channel of `bufsz` buffered items of `T`.
    pub fn new(bufsz: usize) -> Result<Chan<T>> {
        let handle = channel(mem::size_of::<T>(), bufsz)?;
        Ok(Chan { handle, _marker: PhantomData })
    }

    /// The raw handle, for interop with [`crate::choose`] clauses.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Sends `val`, blocking until a receiver takes it, the buffer has
    /// room, or `deadline` passes.
    pub fn send(&self, val: T, deadline: Option<Deadline>) -> Result<()> {
        // SAFETY: `val` is `Copy` and exactly `size_of::<T>()` bytes; the
        // slice does not outlive this call.
        let bytes = unsafe { std::slice::from_raw_parts(&val as *const T as *const u8, mem::size_of::<T>()) };
        chsend(self.handle, bytes, deadline)
    }

    /// Receives one value, blocking until a sender provides one, a
    /// buffered item is available, or `deadline` passes.
    pub fn recv(&self, deadline: Option<Deadline>) -> Result<T> {
        let mut out = mem::MaybeUninit::<T>::uninit();
        // SAFETY: `out` has room for exactly `size_of::<T>()` bytes;
        // `chrecv` always writes the full buffer on `Ok`.
        let bytes = unsafe { std::slice::from_raw_parts_mut(out.as_mut_ptr() as *mut u8, mem::size_of::<T>()) };
        chrecv(self.handle, bytes, deadline)?;
        Ok(unsafe { out.assume_init() })
    }

    /// Marks the channel done: further sends fail, queued/future receives
    /// drain then fail with `ERR_PIPE`.
    pub fn done(&self) -> Result<()> {
        chdone(self.handle)
    }
}

impl<T: Copy> Clone for Chan<T> {
    fn clone(&self) -> Chan<T> {
        let handle = hdup(self.handle).expect("channel handle must still be live");
        Chan { handle, _marker: PhantomData }
    }
}

impl<T: Copy> Drop for Chan<T> {
    fn drop(&mut self) {
        let _ = hclose(self.handle);
    }
}
