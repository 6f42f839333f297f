//! lpp - host bindings for an embedded Lua-style runtime
//!
//! Host code holds runtime values through reference-counted handles,
//! converts between Rust and runtime types, walks tables and exposes Rust
//! methods to the runtime.
//!
//! # Features
//! - `ValueHandle`: registry-backed handle; clones share one slot
//! - Closed set of conversions through `FromStack` / `ToStack`
//! - `TableCursor`: lazy key/value traversal
//! - Protected calls into the runtime, and host methods bound on tables
//! - Declarative data chunks loaded into globals
//!
//! # Example
//! ```
//! use lpp::RuntimeContext;
//!
//! let ctx = RuntimeContext::new();
//! ctx.load_source("settings", "window = { width = 800, title = 'main' }");
//!
//! let window = ctx.global("window");
//! assert_eq!(window.get_field("width").get::<i64>(), 800);
//! assert_eq!(window.get_field("title").get::<String>(), "main");
//! ```

// Core modules
pub mod value;
pub mod context;
pub mod error;

// Runtime substrate
pub mod runtime;
pub mod vm;

// Data chunk loading
pub mod parser;

// Host bindings
pub mod binding;

// Re-export main types
pub use binding::{FromStack, HostObject, Nil, TableCursor, ToStack, ValueHandle};
pub use context::{ContextConfig, MemoryStats, RuntimeContext};
pub use error::{BindError, BindResult, CallStatus, LoadError, RuntimeError};
pub use value::{Value, ValueType};
pub use vm::State;
