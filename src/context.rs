//! Runtime context
//!
//! The context owns one runtime state and is the entry point for host code:
//! value handles borrow it, chunks are loaded through it, and dropping it
//! closes the runtime.
//!
//! The state sits behind a `RefCell`. A host method invoked by the runtime
//! runs while the state is borrowed, so handle operations attempted from
//! inside it find the context busy and degrade to their default result.
//! Slot releases requested during that window are queued and applied as
//! soon as the state is free again.

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::path::Path;

use tracing::{debug, error, trace};

use crate::binding::ValueHandle;
use crate::error::{BindError, BindResult, LoadError};
use crate::parser::parse_chunk;
use crate::runtime::{stdlib, Slot};
use crate::vm::{State, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_STACK};

/// Runtime context configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// Stack budget in slots; calls beyond it fail with a memory error
    pub max_stack: usize,
    /// Limit of nested native calls
    pub max_call_depth: usize,
    /// Install the base library
    pub open_libs: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            max_stack: DEFAULT_MAX_STACK,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            open_libs: true,
        }
    }
}

/// Runtime context
pub struct RuntimeContext {
    state: RefCell<State>,
    /// Slots released while the state was borrowed
    pending_releases: RefCell<Vec<Slot>>,
}

impl RuntimeContext {
    /// Create a context with the default configuration
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Create a context with a custom configuration
    pub fn with_config(config: ContextConfig) -> Self {
        let mut state = State::with_limits(config.max_stack, config.max_call_depth);
        if config.open_libs {
            stdlib::open_base(&mut state);
        }
        debug!(
            max_stack = config.max_stack,
            max_call_depth = config.max_call_depth,
            open_libs = config.open_libs,
            "runtime context created"
        );

        RuntimeContext {
            state: RefCell::new(state),
            pending_releases: RefCell::new(Vec::new()),
        }
    }

    /// Borrow the runtime state
    ///
    /// # Panics
    /// Panics if the state is already borrowed, which happens when called
    /// from a host method the runtime is executing. Use `try_state` or
    /// `with_state` where that can occur.
    pub fn state(&self) -> RefMut<'_, State> {
        self.state.borrow_mut()
    }

    /// Borrow the runtime state, failing if it is busy
    pub fn try_state(&self) -> BindResult<RefMut<'_, State>> {
        self.state.try_borrow_mut().map_err(|_| BindError::ContextBusy)
    }

    /// Run `f` with the runtime state
    ///
    /// Slot releases deferred while the state was busy are applied before
    /// the borrow ends.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> BindResult<R> {
        let mut state = self.try_state()?;
        let result = f(&mut state);
        self.flush_releases(&mut state);
        Ok(result)
    }

    /// Whether `state` is this context's runtime state
    pub(crate) fn owns(&self, state: &State) -> bool {
        std::ptr::eq(self.state.as_ptr(), state)
    }

    /// Release a registry slot now, or as soon as the state is free
    pub fn release_slot(&self, slot: Slot) {
        match self.state.try_borrow_mut() {
            Ok(mut state) => {
                state.release(slot);
            }
            Err(_) => {
                trace!(%slot, "state busy, deferring slot release");
                self.pending_releases.borrow_mut().push(slot);
            }
        }
    }

    fn flush_releases(&self, state: &mut State) {
        let pending = std::mem::take(&mut *self.pending_releases.borrow_mut());
        for slot in pending {
            state.release(slot);
        }
    }

    /// Load a data chunk from a file
    ///
    /// Every failure collapses to `false`; the cause is logged.
    pub fn load_script(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match self.try_load_script(path) {
            Ok(()) => true,
            Err(err) => {
                error!(path = %path.display(), status = %err.status(), error = %err, "failed to load script");
                false
            }
        }
    }

    /// Load a data chunk from a file, reporting the cause of failure
    pub fn try_load_script(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| LoadError::File {
            path: path.to_path_buf(),
            source,
        })?;
        self.try_load_source(&path.display().to_string(), &source)
    }

    /// Load a data chunk from text; `name` identifies it in diagnostics
    pub fn load_source(&self, name: &str, source: &str) -> bool {
        match self.try_load_source(name, source) {
            Ok(()) => true,
            Err(err) => {
                error!(chunk = name, status = %err.status(), error = %err, "failed to load chunk");
                false
            }
        }
    }

    /// Load a data chunk from text, reporting the cause of failure
    ///
    /// The chunk is parsed completely before any global is assigned.
    pub fn try_load_source(&self, name: &str, source: &str) -> Result<(), LoadError> {
        let assignments = parse_chunk(name, source)?;
        let count = assignments.len();
        self.with_state(|state| {
            let mut globals = state.globals().borrow_mut();
            for (global, value) in assignments {
                globals.set_str(&global, value);
            }
        })
        .map_err(|_| LoadError::ContextBusy)?;

        debug!(chunk = name, assignments = count, "chunk loaded");
        Ok(())
    }

    /// Handle bound to a named global
    pub fn global(&self, name: &str) -> ValueHandle<'_> {
        ValueHandle::from_global(self, name)
    }

    /// Empty handle bound to this context
    pub fn new_value(&self) -> ValueHandle<'_> {
        ValueHandle::new(self)
    }

    /// Current usage statistics
    ///
    /// Returns zeroed statistics if the state is busy.
    pub fn stats(&self) -> MemoryStats {
        let Ok(state) = self.state.try_borrow() else {
            return MemoryStats::default();
        };
        MemoryStats {
            stack_depth: state.top() as usize,
            call_depth: state.call_depth(),
            registry_live: state.registry().live(),
            registry_capacity: state.registry().capacity(),
            global_count: state.globals().borrow().field_count(),
            pending_releases: self.pending_releases.borrow().len(),
        }
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for RuntimeContext {
    fn drop(&mut self) {
        let stats = self.stats();
        debug!(
            registry_live = stats.registry_live,
            stack_depth = stats.stack_depth,
            "closing runtime context"
        );
    }
}

/// Usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Values on the stack in the outermost frame
    pub stack_depth: usize,
    /// Native calls currently running
    pub call_depth: usize,
    /// Live registry slots
    pub registry_live: usize,
    /// Registry slots ever allocated
    pub registry_capacity: usize,
    /// Number of globals
    pub global_count: usize,
    /// Slot releases waiting for the state to be free
    pub pending_releases: usize,
}
