//! Scoped stack depth restoration

use std::ops::{Deref, DerefMut};

use super::State;

/// Restores the frame's stack depth when dropped
///
/// Every host operation that pushes temporaries works through a guard, so
/// the stack is balanced on every exit path, early returns and `?` included.
pub struct StackGuard<'a> {
    state: &'a mut State,
    depth: i32,
}

impl<'a> StackGuard<'a> {
    /// Record the current depth of `state`
    pub fn new(state: &'a mut State) -> Self {
        let depth = state.top();
        StackGuard { state, depth }
    }

    /// Depth restored on drop
    #[inline]
    pub fn depth(&self) -> i32 {
        self.depth
    }

    /// Keep `n` values pushed above the recorded depth
    ///
    /// Used by operations whose documented net effect is to leave values on
    /// the stack.
    #[inline]
    pub fn retain(&mut self, n: i32) {
        self.depth += n;
    }
}

impl Deref for StackGuard<'_> {
    type Target = State;

    fn deref(&self) -> &State {
        self.state
    }
}

impl DerefMut for StackGuard<'_> {
    fn deref_mut(&mut self) -> &mut State {
        self.state
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        if self.state.top() != self.depth {
            self.state.set_top(self.depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restores_depth() {
        let mut state = State::new();
        state.push_integer(1);
        {
            let mut guard = StackGuard::new(&mut state);
            guard.push_integer(2);
            guard.push_integer(3);
            assert_eq!(guard.top(), 3);
        }
        assert_eq!(state.top(), 1);
        assert_eq!(state.to_integer(-1), Some(1));
    }

    #[test]
    fn test_restores_on_early_return() {
        fn push_then_fail(state: &mut State) -> Option<()> {
            let mut guard = StackGuard::new(state);
            guard.push_nil();
            guard.to_integer(-1)?;
            Some(())
        }

        let mut state = State::new();
        assert!(push_then_fail(&mut state).is_none());
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_retain() {
        let mut state = State::new();
        {
            let mut guard = StackGuard::new(&mut state);
            guard.push_integer(1);
            guard.push_integer(2);
            guard.retain(1);
        }
        assert_eq!(state.top(), 1);
        assert_eq!(state.to_integer(1), Some(1));
    }
}
