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

//! Error kinds shared by the handle table, the channel engine and the
//! scheduler. These mirror the POSIX-flavored errno values the reference
//! runtime returns; here they are a closed enum instead of a thread-local
//! `errno`.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error conditions raised by the handle table, channel and choose engine.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed arguments: wrong op, size mismatch, null value with
    /// non-zero length, negative clause count.
    #[error("invalid argument")]
    Inval,
    /// Handle absent or already freed.
    #[error("bad file descriptor")]
    Badf,
    /// Handle exists but is of the wrong type.
    #[error("operation not supported")]
    Notsup,
    /// Allocation failure growing the handle table or a channel buffer.
    #[error("out of memory")]
    Nomem,
    /// Operation refused because the channel has reached the terminal
    /// "done" state.
    #[error("broken pipe")]
    Pipe,
    /// Deadline fired before any clause became ready.
    #[error("timed out")]
    TimedOut,
    /// The running coroutine was canceled, or the runtime is unwinding.
    #[error("operation canceled")]
    Canceled,
}

impl Error {
    /// The `errno`-style numeric code the reference implementation would
    /// have set, kept around for diagnostics and `Debug` dumps.
    pub fn errno(self) -> i32 {
        match self {
            Error::Inval => libc::EINVAL,
            Error::Badf => libc::EBADF,
            Error::Notsup => libc::ENOTSUP,
            Error::Nomem => libc::ENOMEM,
            Error::Pipe => libc::EPIPE,
            Error::TimedOut => libc::ETIMEDOUT,
            Error::Canceled => libc::ECANCELED,
        }
    }

    /// Reverse of [`Error::errno`], used to decode the global error code a
    /// resumed coroutine finds on its own control block (timeout,
    /// cancellation) back into an `Error`.
    pub fn from_errno(errno: i32) -> Error {
        match errno {
            libc::EBADF => Error::Badf,
            libc::ENOTSUP => Error::Notsup,
            libc::ENOMEM => Error::Nomem,
            libc::EPIPE => Error::Pipe,
            libc::ETIMEDOUT => Error::TimedOut,
            libc::ECANCELED => Error::Canceled,
            _ => Error::Inval,
        }
    }
}
