//! Native function types
//!
//! Every callable in the runtime is a native closure: a plain function
//! pointer plus the upvalues bundled with it when it was created. The
//! function reads its arguments from the current frame of the `State` and
//! leaves its results on top of the stack.

use std::fmt;

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::State;

/// Maximum number of upvalues a closure can carry
pub const MAX_UPVALUES: usize = 255;

/// Native function signature
///
/// Returns the number of results left on top of the stack, or an error to
/// raise in the caller.
pub type NativeFn = fn(state: &mut State) -> Result<usize, RuntimeError>;

/// Native closure
pub struct Closure {
    /// Function pointer
    pub func: NativeFn,
    /// Values bundled with the function, readable only by it
    pub upvalues: Vec<Value>,
    /// Name used in diagnostics
    pub name: Option<String>,
}

impl Closure {
    /// Create a closure without upvalues
    pub fn new(func: NativeFn) -> Self {
        Closure {
            func,
            upvalues: Vec::new(),
            name: None,
        }
    }

    /// Create a closure with upvalues
    pub fn with_upvalues(func: NativeFn, upvalues: Vec<Value>) -> Self {
        Closure {
            func,
            upvalues,
            name: None,
        }
    }

    /// Set the diagnostic name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Get an upvalue (1-based)
    pub fn upvalue(&self, index: usize) -> Option<&Value> {
        index.checked_sub(1).and_then(|i| self.upvalues.get(i))
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.name)
            .field("upvalues", &self.upvalues.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_state: &mut State) -> Result<usize, RuntimeError> {
        Ok(0)
    }

    #[test]
    fn test_closure() {
        let closure = Closure::new(noop);
        assert!(closure.upvalues.is_empty());
        assert!(closure.upvalue(1).is_none());
        assert!(closure.name.is_none());
    }

    #[test]
    fn test_upvalues_are_one_based() {
        let closure =
            Closure::with_upvalues(noop, vec![Value::Integer(1), Value::Integer(2)]).named("pair");

        assert!(closure.upvalue(0).is_none());
        assert_eq!(closure.upvalue(1), Some(&Value::Integer(1)));
        assert_eq!(closure.upvalue(2), Some(&Value::Integer(2)));
        assert!(closure.upvalue(3).is_none());
        assert_eq!(closure.name.as_deref(), Some("pair"));
    }
}
