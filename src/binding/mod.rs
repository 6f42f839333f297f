//! Host binding layer
//!
//! Handles to runtime values, conversions between host and runtime types,
//! table traversal, and calls in both directions.

pub mod call;
pub mod cursor;
pub mod handle;
pub mod marshal;
pub mod method;
mod refcount;

// Re-exports
pub use cursor::TableCursor;
pub use handle::ValueHandle;
pub use marshal::{ArgList, FromStack, HostObject, Nil, ReturnValues, ToStack};
pub use method::{HostMethod, THIS_FIELD};
