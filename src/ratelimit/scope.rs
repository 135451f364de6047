//! Caller-owned release capability for one request.

use parking_lot::Mutex;
use std::fmt;

type ReleaseAction = Box<dyn FnOnce() + Send + 'static>;

/// Collects release actions for the lifetime of one request.
///
/// The limiter registers what must be undone (a concurrency slot) and the
/// caller decides when the request is over by calling [`CallScope::close`]
/// or dropping the scope. Every action runs exactly once, whichever comes
/// first, including when the request unwinds.
#[derive(Default)]
pub struct CallScope {
    state: Mutex<ScopeState>,
}

#[derive(Default)]
struct ScopeState {
    closed: bool,
    actions: Vec<ReleaseAction>,
}

impl CallScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action to run when the scope closes.
    ///
    /// If the scope is already closed the action runs immediately.
    pub fn on_release<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            action();
        } else {
            state.actions.push(Box::new(action));
        }
    }

    /// Run all registered actions. Later calls do nothing.
    pub fn close(&self) {
        let actions = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.actions)
        };
        for action in actions.into_iter().rev() {
            action();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of actions still waiting for the scope to close.
    pub fn pending(&self) -> usize {
        self.state.lock().actions.len()
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for CallScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CallScope")
            .field("closed", &state.closed)
            .field("pending", &state.actions.len())
            .finish()
    }
}
