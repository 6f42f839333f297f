//! Runtime support
//!
//! This module contains the core runtime types:
//! - Table storage with metatables
//! - Native closures and their upvalues
//! - The registry of host-retained values
//! - The base library

pub mod function;
pub mod registry;
pub mod stdlib;
pub mod table;

pub use function::{Closure, NativeFn, MAX_UPVALUES};
pub use registry::{Registry, Slot};
pub use table::Table;
