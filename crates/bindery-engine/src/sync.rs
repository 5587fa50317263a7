//! Exclusive-access token
//!
//! A single re-entrant token gates all mutation of host-managed state. The
//! thread holding it may temporarily give it up around a native call
//! ([`TokenGuard::release`]) so that native threads can make reverse calls;
//! the holder reacquires it, with its recursion depth, before returning.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

struct TokenState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Re-entrant, per-thread exclusive-access token
pub struct ExclusiveToken {
    state: Mutex<TokenState>,
    available: Condvar,
}

impl ExclusiveToken {
    /// Create an unheld token
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TokenState {
                owner: None,
                depth: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Acquire the token, blocking while another thread holds it.
    /// Re-entrant: nested acquisitions on the holding thread never block.
    pub fn acquire(&self) -> TokenGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner == Some(me) {
            state.depth += 1;
        } else {
            while state.owner.is_some() {
                self.available.wait(&mut state);
            }
            state.owner = Some(me);
            state.depth = 1;
        }
        TokenGuard { token: self }
    }

    /// Check if the calling thread holds the token
    pub fn is_held_by_current(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    /// Check if any thread holds the token
    pub fn is_held(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    fn unlock_one(&self) {
        let mut state = self.state.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.available.notify_one();
        }
    }
}

impl Default for ExclusiveToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds one level of the token; dropping it releases that level
pub struct TokenGuard<'a> {
    token: &'a ExclusiveToken,
}

impl<'a> TokenGuard<'a> {
    /// Give up the token entirely (all recursion levels) until the returned
    /// guard is dropped.
    pub fn release(&self) -> ReleasedToken<'a> {
        let mut state = self.token.state.lock();
        let depth = state.depth;
        state.owner = None;
        state.depth = 0;
        self.token.available.notify_one();
        ReleasedToken {
            token: self.token,
            depth,
        }
    }
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        self.token.unlock_one();
    }
}

/// Token given up by [`TokenGuard::release`]; reacquired on drop
pub struct ReleasedToken<'a> {
    token: &'a ExclusiveToken,
    depth: usize,
}

impl Drop for ReleasedToken<'_> {
    fn drop(&mut self) {
        let me = thread::current().id();
        let mut state = self.token.state.lock();
        while state.owner.is_some() {
            self.token.available.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = self.depth;
    }
}
