//! Runtime state module
//!
//! The state owns the operand stack, the registry and the globals, and runs
//! native calls with a frame per call.

pub mod guard;
pub mod stack;
pub mod state;

pub use guard::StackGuard;
pub use stack::Stack;
pub use state::{CallFrame, State, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_STACK};
