// The MIT License (MIT)

// Copyright (c) 2015 Rustcc Developers

//  Permission is hereby granted, free of charge, to any person obtaining a
//  copy of this software and associated documentation files (the "Software"),
//  to deal in the Software without restriction, including without limitation
//  the rights to use, copy, modify, merge, publish, distribute, sublicense,
//  and/or sell copies of the Software, and to permit persons to whom the
//  Software is furnished to do so, subject to the following conditions:
//
//  The above copyright notice and this permission notice shall be included in
//  all copies or substantial portions of the Software.
//
//  THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
//  OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//  FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//  AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//  LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
//  FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
//  DEALINGS IN THE SOFTWARE.

use context::stack::ProtectedFixedSizeStack;

use crate::options::max_cached_stacks;

/// Caches spawned-then-finished stacks so the next `go` doesn't have to
/// mmap and guard-page a fresh one. Cache depth policy lives in
/// `options::max_cached_stacks` rather than being duplicated here.
#[derive(Debug, Default)]
pub struct StackPool {
    // Ideally this would be some data structure that preserved ordering on
    // stack size.
    stacks: Vec<ProtectedFixedSizeStack>,
}

impl StackPool {
    pub fn new() -> StackPool {
        StackPool { stacks: vec![] }
    }

    pub fn take_stack(&mut self, min_size: usize) -> ProtectedFixedSizeStack {
        // Ideally this would be a binary search.
        match self.stacks.iter().position(|s| min_size <= s.len()) {
            Some(idx) => self.stacks.swap_remove(idx),
            None => ProtectedFixedSizeStack::new(min_size).expect("stack allocation"),
        }
    }

    pub fn give_stack(&mut self, stack: ProtectedFixedSizeStack) {
        if self.stacks.len() <= max_cached_stacks() {
            self.stacks.push(stack)
        }
    }
}
