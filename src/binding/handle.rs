//! Reference-counted value handles
//!
//! A `ValueHandle` keeps one runtime value reachable by retaining it in a
//! registry slot. Cloning a handle shares the slot: both handles denote the
//! same runtime value, and writes through one are seen by the other. The
//! slot is released when the last clone is dropped.
//!
//! Reads on a handle without a reference (fresh, or moved out with
//! [`ValueHandle::take`]) return the default or nil result, never an
//! error. The `try_` variants report why an operation did not happen.

use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::context::RuntimeContext;
use crate::error::{BindError, BindResult, RuntimeError};
use crate::runtime::Slot;
use crate::value::{Value, ValueType};
use crate::vm::{StackGuard, State};

use super::marshal::{FromStack, ToStack};
use super::refcount::SlotLease;

/// Handle to a runtime value retained in the registry
#[derive(Clone)]
pub struct ValueHandle<'ctx> {
    ctx: &'ctx RuntimeContext,
    lease: Option<Rc<SlotLease<'ctx>>>,
}

/// Log a degraded operation and return its fallback
pub(crate) fn degrade<T>(op: &'static str, err: BindError, fallback: T) -> T {
    warn!(operation = op, error = %err, "value handle operation skipped");
    fallback
}

/// Map a runtime error raised by a handle operation
pub(crate) fn runtime_failure(err: RuntimeError) -> BindError {
    BindError::RuntimeFailure {
        status: err.status(),
        message: err.to_string(),
    }
}

impl<'ctx> ValueHandle<'ctx> {
    /// Create an empty handle bound to `ctx`
    pub fn new(ctx: &'ctx RuntimeContext) -> Self {
        ValueHandle { ctx, lease: None }
    }

    /// Adopt a slot that was just referenced
    pub(crate) fn from_slot(ctx: &'ctx RuntimeContext, slot: Slot) -> Self {
        ValueHandle {
            ctx,
            lease: Some(SlotLease::new(ctx, slot)),
        }
    }

    /// Capture the value at a stack position into a fresh slot
    ///
    /// The stack is left unchanged. An empty position captures nil.
    pub fn from_stack(ctx: &'ctx RuntimeContext, idx: i32) -> Self {
        match ctx.with_state(|state| Self::capture_slot(state, idx)) {
            Ok(slot) => Self::from_slot(ctx, slot),
            Err(err) => degrade("from_stack", err, Self::new(ctx)),
        }
    }

    /// Capture a value into a fresh slot
    pub fn from_value(ctx: &'ctx RuntimeContext, value: impl ToStack) -> Self {
        let mut handle = Self::new(ctx);
        handle.set(value);
        handle
    }

    /// Handle bound to the current value of a named global
    pub fn from_global(ctx: &'ctx RuntimeContext, name: &str) -> Self {
        let mut handle = Self::new(ctx);
        handle.get_global(name);
        handle
    }

    /// Reference a copy of the value at `idx`, leaving the stack as it was
    pub(crate) fn capture_slot(state: &mut State, idx: i32) -> Slot {
        state.push_copy(idx);
        state.reference()
    }

    // Ownership

    /// Move out of this handle
    ///
    /// The returned handle takes over the slot and its share count; `self`
    /// is left without a reference, still bound to its context.
    pub fn take(&mut self) -> ValueHandle<'ctx> {
        ValueHandle {
            ctx: self.ctx,
            lease: self.lease.take(),
        }
    }

    /// Copy-assign: drop this handle's share, then share `other`'s slot
    ///
    /// The incoming share is taken before the old one is dropped, so
    /// assigning a handle that shares this handle's slot never releases it.
    pub fn assign(&mut self, other: &ValueHandle<'ctx>) {
        let incoming = other.lease.clone();
        self.lease = None;
        self.ctx = other.ctx;
        self.lease = incoming;
    }

    /// Move-assign: drop this handle's share, then take over `other`'s
    pub fn assign_from(&mut self, mut other: ValueHandle<'ctx>) {
        let incoming = other.lease.take();
        self.lease = None;
        self.ctx = other.ctx;
        self.lease = incoming;
    }

    /// Whether this handle holds a slot
    #[inline]
    pub fn has_reference(&self) -> bool {
        self.lease.is_some()
    }

    /// Registry slot held by this handle
    #[inline]
    pub fn slot(&self) -> Option<Slot> {
        self.lease.as_ref().map(|lease| lease.slot())
    }

    /// Number of handles sharing this handle's slot (0 without a reference)
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.lease.as_ref().map_or(0, Rc::strong_count)
    }

    #[inline]
    pub fn context(&self) -> &'ctx RuntimeContext {
        self.ctx
    }

    // Globals

    /// Fetch the current value of a global into this handle
    ///
    /// An existing slot is overwritten in place, so clones and cursors
    /// holding it see the new value.
    pub fn get_global(&mut self, name: &str) {
        if let Err(err) = self.store_with(|state| {
            state.get_global(name);
        }) {
            degrade("get_global", err, ());
        }
    }

    /// Publish this handle's value as a global; does nothing without a reference
    pub fn set_global(&self, name: &str) {
        let Some(slot) = self.slot() else {
            return;
        };
        let published = self.ctx.with_state(|state| {
            if state.push_slot(slot) {
                state.set_global(name);
            }
        });
        if let Err(err) = published {
            degrade("set_global", err, ());
        }
    }

    // Values

    /// Store a host value, overwriting the slot in place if there is one
    pub fn set(&mut self, value: impl ToStack) {
        if let Err(err) = self.store_with(|state| value.push(state)) {
            degrade("set", err, ());
        }
    }

    /// Store a runtime value
    pub fn set_value(&mut self, value: Value) {
        self.set(value);
    }

    /// Make this handle reference a fresh empty table
    pub fn create_table(&mut self) {
        self.set(Value::new_table());
    }

    /// Push with `push`, then move the pushed value into this handle's slot
    fn store_with(&mut self, push: impl FnOnce(&mut State)) -> BindResult<()> {
        let current = self.slot();
        let fresh = self.ctx.with_state(|state| {
            let mut guard = StackGuard::new(state);
            push(&mut *guard);
            match current {
                Some(slot) if guard.registry().is_live(slot) => {
                    guard.overwrite_slot(slot);
                    None
                }
                _ => Some(guard.reference()),
            }
        })?;

        if let Some(slot) = fresh {
            self.lease = Some(SlotLease::new(self.ctx, slot));
        }
        Ok(())
    }

    /// Run `f` with this handle's value pushed on the stack
    pub(crate) fn with_pushed<R>(
        &self,
        f: impl FnOnce(&mut StackGuard<'_>) -> BindResult<R>,
    ) -> BindResult<R> {
        let slot = self.slot().ok_or(BindError::NoReference)?;
        self.ctx.with_state(|state| {
            let mut guard = StackGuard::new(state);
            if !guard.push_slot(slot) {
                return Err(BindError::NoReference);
            }
            f(&mut guard)
        })?
    }

    /// Push this handle's value, or nil without a reference
    ///
    /// Slots only mean something in the handle's own context. Pushing into
    /// another context's state pushes a copy of the value instead.
    pub fn push_to_stack(&self, state: &mut State) {
        if !self.ctx.owns(state) {
            debug!(slot = ?self.slot(), "pushing handle into a foreign context by value");
            state.push_value(self.value());
            return;
        }
        let pushed = self.slot().is_some_and(|slot| state.push_slot(slot));
        if !pushed {
            state.push_nil();
        }
    }

    /// Copy of the referenced runtime value (nil without a reference)
    pub fn value(&self) -> Value {
        self.with_pushed(|state| Ok(state.pop_value()))
            .unwrap_or_else(|err| match err {
                BindError::NoReference => Value::Nil,
                err => degrade("value", err, Value::Nil),
            })
    }

    /// Convert the value to a host type, or report why it cannot be
    pub fn try_get<T: FromStack>(&self) -> BindResult<T> {
        self.with_pushed(|state| {
            if T::is(state, -1) {
                Ok(T::get(state, -1))
            } else {
                Err(BindError::TypeMismatch {
                    expected: T::TYPE_NAME,
                    found: state.value_type(-1),
                })
            }
        })
    }

    /// Convert the value to a host type
    ///
    /// Converts whatever the runtime type is; without a reference the
    /// conversion of nil is returned.
    pub fn get<T: FromStack>(&self) -> T {
        self.with_pushed(|state| Ok(T::get(state, -1)))
            .unwrap_or_else(|err| match err {
                BindError::NoReference => T::from_value(&Value::Nil),
                err => degrade("get", err, T::from_value(&Value::Nil)),
            })
    }

    /// Convert the value to a host type, or return `default` untouched
    pub fn get_or<T: FromStack>(&self, default: T) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(_) => default,
        }
    }

    /// Whether the value has host type `T`
    ///
    /// Without a reference the value reads as nil, so `is::<Nil>()` holds.
    pub fn is<T: FromStack>(&self) -> bool {
        self.with_pushed(|state| Ok(T::is(state, -1)))
            .unwrap_or_else(|err| match err {
                BindError::NoReference => T::is_value(&Value::Nil),
                _ => false,
            })
    }

    /// Runtime type of the value (`None` without a reference)
    pub fn value_type(&self) -> ValueType {
        self.with_pushed(|state| Ok(state.value_type(-1)))
            .unwrap_or(ValueType::None)
    }

    /// Nil, or no reference at all
    pub fn is_nil(&self) -> bool {
        matches!(self.value_type(), ValueType::Nil | ValueType::None)
    }

    pub fn is_table(&self) -> bool {
        self.value_type() == ValueType::Table
    }

    pub fn is_function(&self) -> bool {
        self.value_type() == ValueType::Function
    }

    // Table access

    /// Field `name` of the table, honoring `__index`
    pub fn try_get_field(&self, name: &str) -> BindResult<ValueHandle<'ctx>> {
        let slot = self.with_pushed(|state| {
            require_table(state)?;
            state.get_field(-1, name).map_err(runtime_failure)?;
            Ok(state.reference())
        })?;
        Ok(ValueHandle::from_slot(self.ctx, slot))
    }

    /// Field `name` of the table; nil handle on failure
    pub fn get_field(&self, name: &str) -> ValueHandle<'ctx> {
        self.try_get_field(name)
            .unwrap_or_else(|err| degrade("get_field", err, ValueHandle::new(self.ctx)))
    }

    /// Assign field `name` of the table, honoring `__newindex`
    pub fn try_set_field(&self, name: &str, value: impl ToStack) -> BindResult<()> {
        self.with_pushed(|state| {
            require_table(state)?;
            value.push(state);
            state.set_field(-2, name).map_err(runtime_failure)
        })
    }

    /// Assign field `name` of the table; does nothing on failure
    pub fn set_field(&self, name: &str, value: impl ToStack) {
        if let Err(err) = self.try_set_field(name, value) {
            degrade("set_field", err, ());
        }
    }

    /// Element `i` of the table, honoring `__index`
    pub fn try_index(&self, i: i64) -> BindResult<ValueHandle<'ctx>> {
        let slot = self.with_pushed(|state| {
            require_table(state)?;
            state.push_integer(i);
            state.get_table(-2).map_err(runtime_failure)?;
            Ok(state.reference())
        })?;
        Ok(ValueHandle::from_slot(self.ctx, slot))
    }

    /// Element `i` of the table; nil handle on failure
    pub fn index(&self, i: i64) -> ValueHandle<'ctx> {
        self.try_index(i)
            .unwrap_or_else(|err| degrade("index", err, ValueHandle::new(self.ctx)))
    }

    /// Assign element `i` of the table, honoring `__newindex`
    pub fn try_set_index(&self, i: i64, value: impl ToStack) -> BindResult<()> {
        self.with_pushed(|state| {
            require_table(state)?;
            state.push_integer(i);
            value.push(state);
            state.set_table(-3).map_err(runtime_failure)
        })
    }

    /// Assign element `i` of the table; does nothing on failure
    pub fn set_index(&self, i: i64, value: impl ToStack) {
        if let Err(err) = self.try_set_index(i, value) {
            degrade("set_index", err, ());
        }
    }

    /// Raw length: border of a table, byte length of a string, 0 otherwise
    pub fn len(&self) -> usize {
        self.with_pushed(|state| Ok(state.raw_len(-1))).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Metatables

    /// Make this handle reference the metatable registered under `name`
    ///
    /// The metatable is created on first use with `__index` pointing at
    /// itself, so methods set on it are visible from tables using it.
    pub fn create_metatable(&mut self, name: &str) {
        let created = self.store_with(|state| {
            if state.new_metatable(name) {
                state.push_copy(-1);
                // Fresh tables cannot fail a raw field write
                let _ = state.set_field(-2, "__index");
            }
        });
        if let Err(err) = created {
            degrade("create_metatable", err, ());
        }
    }

    /// Attach the metatable registered under `name` to this table
    pub fn try_set_metatable(&self, name: &str) -> BindResult<()> {
        self.with_pushed(|state| {
            require_table(state)?;
            if state.get_named_metatable(name) != ValueType::Table {
                return Err(BindError::TypeMismatch {
                    expected: "metatable",
                    found: ValueType::Nil,
                });
            }
            state.set_metatable(-2).map_err(runtime_failure)
        })
    }

    /// Attach the metatable registered under `name`; does nothing on failure
    pub fn set_metatable(&self, name: &str) {
        if let Err(err) = self.try_set_metatable(name) {
            degrade("set_metatable", err, ());
        }
    }
}

/// Fail with `NotATable` unless the top value is a table
pub(crate) fn require_table(state: &State) -> BindResult<()> {
    match state.value_type(-1) {
        ValueType::Table => Ok(()),
        other => Err(BindError::NotATable(other)),
    }
}

/// Handles are equal when they hold the same slot of the same context
impl PartialEq for ValueHandle<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ctx, other.ctx) && self.slot() == other.slot()
    }
}

impl Eq for ValueHandle<'_> {}

impl fmt::Display for ValueHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl fmt::Debug for ValueHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot() {
            Some(slot) => f
                .debug_struct("ValueHandle")
                .field("slot", &slot)
                .field("refs", &self.ref_count())
                .field("value", &self.value())
                .finish(),
            None => f.write_str("ValueHandle(<no reference>)"),
        }
    }
}

impl ToStack for ValueHandle<'_> {
    fn push(self, state: &mut State) {
        self.push_to_stack(state);
    }
}

impl ToStack for &ValueHandle<'_> {
    fn push(self, state: &mut State) {
        self.push_to_stack(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Nil;
    use proptest::prelude::*;

    #[test]
    fn test_empty_handle() {
        let ctx = RuntimeContext::new();
        let handle = ctx.new_value();

        assert!(!handle.has_reference());
        assert_eq!(handle.ref_count(), 0);
        assert!(handle.is_nil());
        assert_eq!(handle.value_type(), ValueType::None);
        assert_eq!(handle.get::<i64>(), 0);
        assert_eq!(handle.get::<String>(), "");
        assert_eq!(handle.try_get::<i64>(), Err(BindError::NoReference));
        assert_eq!(handle.len(), 0);
        assert!(handle.get_field("x").is_nil());
    }

    #[test]
    fn test_set_and_get() {
        let ctx = RuntimeContext::new();
        let mut handle = ctx.new_value();

        handle.set(42i64);
        assert!(handle.has_reference());
        assert_eq!(handle.get::<i64>(), 42);
        assert!(handle.is::<i64>());
        assert!(handle.is::<f64>());
        assert!(!handle.is::<bool>());

        let slot = handle.slot();
        handle.set("text");
        assert_eq!(handle.slot(), slot);
        assert_eq!(handle.get::<String>(), "text");
        assert_eq!(handle.get_or(5i64), 5);
        assert_eq!(
            handle.try_get::<i64>(),
            Err(BindError::TypeMismatch {
                expected: "integer",
                found: ValueType::String,
            })
        );
        assert_eq!(ctx.stats().stack_depth, 0);
    }

    #[test]
    fn test_copies_release_once() {
        let ctx = RuntimeContext::new();
        let original = ValueHandle::from_value(&ctx, "shared");
        let slot = original.slot().unwrap();

        let copies = [original.clone(), original.clone(), original.clone()];
        assert_eq!(original.ref_count(), 4);
        assert!(copies.iter().all(|copy| *copy == original));

        let [a, b, c] = copies;
        for copy in [a, b, c] {
            drop(copy);
            assert!(ctx.state().registry().is_live(slot));
        }
        assert_eq!(original.ref_count(), 1);

        drop(original);
        assert!(!ctx.state().registry().is_live(slot));
        assert_eq!(ctx.stats().registry_live, 0);
    }

    #[test]
    fn test_copies_share_writes() {
        let ctx = RuntimeContext::new();
        let mut a = ValueHandle::from_value(&ctx, 1i64);
        let b = a.clone();

        a.set(2i64);
        assert_eq!(b.get::<i64>(), 2);
    }

    #[test]
    fn test_independent_captures_do_not_share() {
        let ctx = RuntimeContext::new();
        ctx.load_source("test", "answer = 42");

        let a = ctx.global("answer");
        let b = ctx.global("answer");
        assert_ne!(a, b);
        assert_eq!(a.ref_count(), 1);
        assert_eq!(b.ref_count(), 1);
        assert_eq!(a.get::<i64>(), b.get::<i64>());
    }

    #[test]
    fn test_take() {
        let ctx = RuntimeContext::new();
        let mut source = ValueHandle::from_value(&ctx, 7i64);
        let slot = source.slot();

        let moved = source.take();
        assert_eq!(moved.slot(), slot);
        assert_eq!(moved.ref_count(), 1);
        assert_eq!(moved.get::<i64>(), 7);

        // The moved-from handle reads defaults without fault
        assert!(!source.has_reference());
        assert_eq!(source.get::<i64>(), 0);
        assert!(source.is_nil());
        assert!(source.get_field("x").is_nil());
        assert!(std::ptr::eq(source.context(), &ctx));
        source.set_global("nothing");
        assert!(ctx.global("nothing").is_nil());
    }

    #[test]
    fn test_assign() {
        let ctx = RuntimeContext::new();
        let mut a = ValueHandle::from_value(&ctx, 1i64);
        let b = ValueHandle::from_value(&ctx, 2i64);
        let old_slot = a.slot().unwrap();

        a.assign(&b);
        assert_eq!(a, b);
        assert_eq!(b.ref_count(), 2);
        assert!(!ctx.state().registry().is_live(old_slot));

        // Assigning a handle that already shares the slot keeps it alive
        let same = a.clone();
        a.assign(&same);
        drop(same);
        assert_eq!(a.get::<i64>(), 2);
        assert_eq!(a.ref_count(), 2);
    }

    #[test]
    fn test_self_assign_sole_owner() {
        let ctx = RuntimeContext::new();
        let mut a = ValueHandle::from_value(&ctx, 9i64);
        let slot = a.slot().unwrap();

        let alias = a.take();
        a.assign_from(alias);
        assert_eq!(a.slot(), Some(slot));
        assert_eq!(a.ref_count(), 1);
        assert_eq!(a.get::<i64>(), 9);
        assert!(ctx.state().registry().is_live(slot));
    }

    #[test]
    fn test_assign_from() {
        let ctx = RuntimeContext::new();
        let mut a = ValueHandle::from_value(&ctx, 1i64);
        let b = ValueHandle::from_value(&ctx, 2i64);
        let b_slot = b.slot();

        a.assign_from(b);
        assert_eq!(a.slot(), b_slot);
        assert_eq!(a.ref_count(), 1);
        assert_eq!(ctx.stats().registry_live, 1);
    }

    #[test]
    fn test_globals() {
        let ctx = RuntimeContext::new();
        let mut handle = ValueHandle::from_value(&ctx, "published");
        handle.set_global("greeting");
        assert_eq!(ctx.global("greeting").get::<String>(), "published");

        ctx.load_source("test", "greeting = 'changed'");
        let slot = handle.slot();
        handle.get_global("greeting");
        assert_eq!(handle.slot(), slot);
        assert_eq!(handle.get::<String>(), "changed");
    }

    #[test]
    fn test_from_stack() {
        let ctx = RuntimeContext::new();
        ctx.state().push_integer(5);

        let handle = ValueHandle::from_stack(&ctx, -1);
        assert_eq!(handle.get::<i64>(), 5);
        assert_eq!(ctx.stats().stack_depth, 1);
    }

    #[test]
    fn test_table_fields() {
        let ctx = RuntimeContext::new();
        let mut table = ctx.new_value();
        table.create_table();

        table.set_field("name", "box");
        table.set_index(1, 10i64);
        table.set_index(2, 20i64);

        assert_eq!(table.get_field("name").get::<String>(), "box");
        assert_eq!(table.index(2).get::<i64>(), 20);
        assert_eq!(table.len(), 2);
        assert!(table.get_field("missing").is_nil());
        assert_eq!(ctx.stats().stack_depth, 0);
    }

    #[test]
    fn test_not_a_table() {
        let ctx = RuntimeContext::new();
        let number = ValueHandle::from_value(&ctx, 3i64);

        assert_eq!(
            number.try_get_field("x").unwrap_err(),
            BindError::NotATable(ValueType::Number)
        );
        assert_eq!(
            number.try_set_field("x", 1i64).unwrap_err(),
            BindError::NotATable(ValueType::Number)
        );
        number.set_field("x", 1i64);
        assert!(number.index(1).is_nil());
        assert_eq!(ctx.stats().stack_depth, 0);
    }

    #[test]
    fn test_metatable() {
        let ctx = RuntimeContext::new();
        let mut class = ctx.new_value();
        class.create_metatable("Shape");
        class.set_field("sides", 4i64);

        let mut instance = ctx.new_value();
        instance.create_table();
        instance.set_metatable("Shape");
        assert_eq!(instance.get_field("sides").get::<i64>(), 4);

        // Creating again returns the same metatable
        let mut again = ctx.new_value();
        again.create_metatable("Shape");
        assert_eq!(again.value(), class.value());

        assert!(instance.try_set_metatable("Unknown").is_err());
    }

    #[test]
    fn test_busy_context_degrades() {
        let ctx = RuntimeContext::new();
        let mut handle = ValueHandle::from_value(&ctx, 1i64);
        let busy = ctx.state();

        assert_eq!(handle.try_get::<i64>(), Err(BindError::ContextBusy));
        assert_eq!(handle.get::<i64>(), 0);
        handle.set(2i64);
        drop(busy);

        assert_eq!(handle.get::<i64>(), 1);
    }

    #[test]
    fn test_drop_while_busy_is_deferred() {
        let ctx = RuntimeContext::new();
        let handle = ValueHandle::from_value(&ctx, 1i64);
        {
            let _busy = ctx.state();
            drop(handle);
        }
        assert_eq!(ctx.stats().registry_live, 1);

        ctx.new_value().set(0i64);
        // The deferred release was applied; only the new value remains, and
        // it was dropped at the end of the statement
        assert_eq!(ctx.stats().registry_live, 0);
    }

    #[test]
    fn test_display_and_debug() {
        let ctx = RuntimeContext::new();
        let handle = ValueHandle::from_value(&ctx, 1.5f64);
        assert_eq!(handle.to_string(), "1.5");
        assert!(format!("{:?}", handle).contains("slot"));
        assert_eq!(format!("{:?}", ctx.new_value()), "ValueHandle(<no reference>)");
    }

    #[test]
    fn test_empty_handle_reads_as_nil() {
        let ctx = RuntimeContext::new();
        let fresh = ctx.new_value();
        assert!(fresh.is::<Nil>());
        assert!(fresh.is::<Option<i64>>());
        assert!(!fresh.is::<i64>());

        let mut source = ValueHandle::from_value(&ctx, 3i64);
        assert!(!source.is::<Nil>());
        let moved = source.take();
        assert!(source.is_nil());
        assert!(source.is::<Nil>());
        assert!(source.is::<Option<String>>());
        assert!(moved.is::<i64>());
    }

    #[test]
    fn test_push_into_other_context() {
        let a = RuntimeContext::new();
        let b = RuntimeContext::new();
        let local = ValueHandle::from_value(&b, "from b");
        let foreign = ValueHandle::from_value(&a, "from a");
        assert_eq!(local.slot(), foreign.slot());

        let mut target = b.new_value();
        target.create_table();
        target.set_field("x", &foreign);
        target.set_index(1, foreign.clone());
        assert_eq!(target.get_field("x").get::<String>(), "from a");
        assert_eq!(target.index(1).get::<String>(), "from a");
        assert_eq!(local.get::<String>(), "from b");

        let mut copy = b.new_value();
        copy.set(&foreign);
        assert_eq!(copy.get::<String>(), "from a");
        assert_ne!(copy, foreign);

        // No reference pushes nil in any context
        target.set_field("y", a.new_value());
        assert!(target.get_field("y").is_nil());
        assert_eq!(a.stats().stack_depth, 0);
        assert_eq!(b.stats().stack_depth, 0);
    }

    proptest! {
        #[test]
        fn prop_slot_released_after_last_copy(copies in 1usize..16, order in any::<u64>()) {
            let ctx = RuntimeContext::new();
            let original = ValueHandle::from_value(&ctx, "x");
            let slot = original.slot().unwrap();
            let mut handles: Vec<_> = (0..copies).map(|_| original.clone()).collect();
            handles.push(original);

            // Drop in a pseudo-random order
            let mut seed = order;
            while handles.len() > 1 {
                let i = (seed % handles.len() as u64) as usize;
                seed = seed.rotate_left(7) ^ 0x9e37_79b9;
                handles.swap_remove(i);
                prop_assert!(ctx.state().registry().is_live(slot));
            }
            prop_assert_eq!(handles[0].ref_count(), 1);
            handles.clear();
            prop_assert!(!ctx.state().registry().is_live(slot));
        }

        #[test]
        fn prop_set_preserves_slot(values in proptest::collection::vec(any::<i64>(), 1..8)) {
            let ctx = RuntimeContext::new();
            let mut handle = ctx.new_value();
            handle.set(0i64);
            let slot = handle.slot();
            for v in &values {
                handle.set(*v);
                prop_assert_eq!(handle.slot(), slot);
            }
            prop_assert_eq!(handle.get::<i64>(), *values.last().unwrap());
            prop_assert_eq!(ctx.stats().registry_live, 1);
        }
    }
}
