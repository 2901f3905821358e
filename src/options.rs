//! Coroutine spawn options

use std::sync::atomic::{AtomicUsize, Ordering};

const DEFAULT_STACK_SIZE: usize = 128 * 1024;

static MAX_CACHED_STACKS: AtomicUsize = AtomicUsize::new(0);

/// Coroutine spawn options
#[derive(Debug, Clone)]
pub struct Options {
    /// The size of the stack
    pub stack_size: usize,

    /// The name of the Coroutine
    pub name: Option<String>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            stack_size: DEFAULT_STACK_SIZE,
            name: None,
        }
    }
}

/// How many stacks `StackPool` is allowed to cache before it starts
/// deallocating instead of recycling. Tunable via `COROCHAN_MAX_CACHED_STACKS`,
/// read once and cached for the lifetime of the process.
pub fn max_cached_stacks() -> usize {
    match MAX_CACHED_STACKS.load(Ordering::SeqCst) {
        0 => {}
        n => return n - 1,
    }
    let amt = std::env::var("COROCHAN_MAX_CACHED_STACKS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);
    // 0 is the sentinel for "not yet read", so store amt + 1.
    MAX_CACHED_STACKS.store(amt + 1, Ordering::SeqCst);
    amt
}
