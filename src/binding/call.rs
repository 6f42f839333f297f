//! Calling runtime functions from the host
//!
//! `call` looks a function up on a table and calls it as a method, with the
//! table as first argument. `invoke` calls the handle's value itself. Both
//! run in protected mode: a raising callee is reported as
//! [`BindError::RuntimeFailure`] by the `try_` variants and degrades to a
//! nil handle otherwise.
//!
//! Results come back as one handle: nil for no results, the value itself
//! for one, and a fresh sequence table for several.

use tracing::{debug, error};

use crate::error::{BindError, BindResult, CallStatus};
use crate::runtime::Slot;
use crate::value::Value;
use crate::vm::{StackGuard, State};

use super::handle::{degrade, require_table, runtime_failure, ValueHandle};
use super::marshal::ArgList;

impl<'ctx> ValueHandle<'ctx> {
    /// Call method `name` with no arguments
    pub fn call(&self, name: &str) -> ValueHandle<'ctx> {
        self.call_with(name, ())
    }

    /// Call method `name`; the table is passed first, then `args`
    pub fn call_with(&self, name: &str, args: impl ArgList) -> ValueHandle<'ctx> {
        self.try_call_with(name, args)
            .unwrap_or_else(|err| degrade("call", err, ValueHandle::new(self.context())))
    }

    pub fn try_call(&self, name: &str) -> BindResult<ValueHandle<'ctx>> {
        self.try_call_with(name, ())
    }

    /// Call method `name`, reporting lookup and runtime failures
    pub fn try_call_with(&self, name: &str, args: impl ArgList) -> BindResult<ValueHandle<'ctx>> {
        let results = self.with_pushed(|state| {
            require_table(state)?;
            let receiver = state.top();
            let found = state
                .get_field(receiver, name)
                .map_err(runtime_failure)?;
            if !is_callable(state, -1) {
                return Err(BindError::NotCallable {
                    name: name.to_string(),
                    found,
                });
            }
            state.push_copy(receiver);
            let nargs = 1 + args.push_all(state);
            protected_call(state, name, nargs)
        })?;
        Ok(self.adopt_results(results))
    }

    /// Call this handle's value with no arguments
    pub fn invoke(&self) -> ValueHandle<'ctx> {
        self.invoke_with(())
    }

    /// Call this handle's value with `args`
    pub fn invoke_with(&self, args: impl ArgList) -> ValueHandle<'ctx> {
        self.try_invoke_with(args)
            .unwrap_or_else(|err| degrade("invoke", err, ValueHandle::new(self.context())))
    }

    pub fn try_invoke(&self) -> BindResult<ValueHandle<'ctx>> {
        self.try_invoke_with(())
    }

    /// Call this handle's value, reporting runtime failures
    pub fn try_invoke_with(&self, args: impl ArgList) -> BindResult<ValueHandle<'ctx>> {
        let results = self.with_pushed(|state| {
            if !is_callable(state, -1) {
                return Err(BindError::NotCallable {
                    name: "<anonymous>".to_string(),
                    found: state.value_type(-1),
                });
            }
            let nargs = args.push_all(state);
            protected_call(state, "<anonymous>", nargs)
        })?;
        Ok(self.adopt_results(results))
    }

    fn adopt_results(&self, results: Option<Slot>) -> ValueHandle<'ctx> {
        match results {
            Some(slot) => ValueHandle::from_slot(self.context(), slot),
            None => ValueHandle::new(self.context()),
        }
    }
}

/// A function, or a table whose metatable has a `__call` function
fn is_callable(state: &State, idx: i32) -> bool {
    match state.value(idx) {
        Some(Value::Function(_)) => true,
        Some(other @ Value::Table(_)) => state.metamethod(other, "__call").is_function(),
        _ => false,
    }
}

/// Call the function below the top `nargs` values and capture its results
///
/// No results give `None`; one result is referenced as is; several are
/// collected into a new sequence table.
fn protected_call(
    state: &mut StackGuard<'_>,
    name: &str,
    nargs: usize,
) -> BindResult<Option<Slot>> {
    let func_index = state.top() - nargs as i32;
    match state.pcall(nargs, None) {
        CallStatus::Ok => {}
        status => {
            let message = state.pop_value().to_string();
            error!(function = name, %status, error = %message, "call failed");
            return Err(BindError::RuntimeFailure { status, message });
        }
    }

    let count = (state.top() - func_index + 1).max(0);
    debug!(function = name, results = count, "call returned");
    match count {
        0 => Ok(None),
        1 => Ok(Some(state.reference())),
        n => {
            state.push_value(Value::new_table());
            state.insert(func_index);
            for i in (1..=i64::from(n)).rev() {
                state
                    .raw_set_i(func_index, i)
                    .map_err(runtime_failure)?;
            }
            Ok(Some(state.reference()))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::context::RuntimeContext;
    use crate::error::RuntimeError;
    use crate::vm::State;

    use crate::value::ValueType;

    use super::*;

    fn no_results(_state: &mut State) -> Result<usize, RuntimeError> {
        Ok(0)
    }

    /// Returns its second argument plus one
    fn increment(state: &mut State) -> Result<usize, RuntimeError> {
        let n = state.to_integer(2).ok_or_else(|| state.arg_error(2, "number expected"))?;
        state.push_integer(n + 1);
        Ok(1)
    }

    fn three(state: &mut State) -> Result<usize, RuntimeError> {
        state.push_integer(1);
        state.push_string("two");
        state.push_integer(3);
        Ok(3)
    }

    fn raises(_state: &mut State) -> Result<usize, RuntimeError> {
        Err(RuntimeError::runtime("boom"))
    }

    /// Counts its arguments
    fn arity(state: &mut State) -> Result<usize, RuntimeError> {
        let n = state.top();
        state.push_integer(i64::from(n));
        Ok(1)
    }

    fn object(ctx: &RuntimeContext) -> ValueHandle<'_> {
        let mut table = ctx.new_value();
        table.create_table();
        ctx.with_state(|state| {
            table.push_to_stack(state);
            for (name, func) in [
                ("none", no_results as crate::runtime::NativeFn),
                ("increment", increment),
                ("three", three),
                ("raises", raises),
                ("arity", arity),
            ] {
                state.push_function(func);
                state.set_field(-2, name).unwrap();
            }
            state.pop(1);
        })
        .unwrap();
        table
    }

    #[test]
    fn test_zero_results() {
        let ctx = RuntimeContext::new();
        let obj = object(&ctx);

        let result = obj.call("none");
        assert!(!result.has_reference());
        assert!(result.is_nil());
    }

    #[test]
    fn test_one_result() {
        let ctx = RuntimeContext::new();
        let obj = object(&ctx);

        let result = obj.call_with("increment", (41i64,));
        assert_eq!(result.get::<i64>(), 42);
        assert_eq!(ctx.stats().stack_depth, 0);
    }

    #[test]
    fn test_three_results() {
        let ctx = RuntimeContext::new();
        let obj = object(&ctx);

        let result = obj.call("three");
        assert!(result.is_table());
        assert_eq!(result.len(), 3);
        assert_eq!(result.index(1).get::<i64>(), 1);
        assert_eq!(result.index(2).get::<String>(), "two");
        assert_eq!(result.index(3).get::<i64>(), 3);
        assert_eq!(ctx.stats().stack_depth, 0);
    }

    #[test]
    fn test_self_is_first_argument() {
        let ctx = RuntimeContext::new();
        let obj = object(&ctx);

        assert_eq!(obj.call("arity").get::<i64>(), 1);
        assert_eq!(obj.call_with("arity", (1i64, "x", true)).get::<i64>(), 4);
        assert_eq!(obj.get_field("arity").invoke_with((1i64,)).get::<i64>(), 1);
    }

    #[test]
    fn test_runtime_error_is_contained() {
        let ctx = RuntimeContext::new();
        let obj = object(&ctx);
        ctx.state().push_integer(7);

        assert_eq!(
            obj.try_call("raises").unwrap_err(),
            BindError::RuntimeFailure {
                status: CallStatus::Runtime,
                message: "boom".to_string(),
            }
        );
        assert!(obj.call("raises").is_nil());
        assert_eq!(ctx.stats().stack_depth, 1);

        // The context stays usable
        assert_eq!(obj.call_with("increment", (1i64,)).get::<i64>(), 2);
    }

    #[test]
    fn test_not_callable() {
        let ctx = RuntimeContext::new();
        let obj = object(&ctx);
        obj.set_field("data", 5i64);

        assert_eq!(
            obj.try_call("missing").unwrap_err(),
            BindError::NotCallable {
                name: "missing".to_string(),
                found: ValueType::Nil,
            }
        );
        assert!(obj.call("data").is_nil());
        assert!(matches!(
            ValueHandle::from_value(&ctx, 1i64).try_invoke(),
            Err(BindError::NotCallable { .. })
        ));
        assert!(matches!(ctx.new_value().try_call("x"), Err(BindError::NoReference)));
        assert_eq!(ctx.stats().stack_depth, 0);
    }

    #[test]
    fn test_call_through_index_metatable() {
        let ctx = RuntimeContext::new();
        let mut class = ctx.new_value();
        class.create_metatable("Counter");
        ctx.with_state(|state| {
            class.push_to_stack(state);
            state.push_function(increment);
            state.set_field(-2, "increment").unwrap();
            state.pop(1);
        })
        .unwrap();

        let mut instance = ctx.new_value();
        instance.create_table();
        instance.set_metatable("Counter");
        assert_eq!(instance.call_with("increment", (9i64,)).get::<i64>(), 10);
    }

    #[test]
    fn test_invoke_global_function() {
        let ctx = RuntimeContext::new();
        let select = ctx.global("select");
        assert_eq!(select.invoke_with(("#", 1i64, 2i64)).get::<i64>(), 2);

        let tail = select.invoke_with((2i64, "a", "b", "c"));
        assert!(tail.is_table());
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.index(1).get::<String>(), "b");
    }

    #[test]
    fn test_call_depth_limit() {
        let ctx = RuntimeContext::with_config(crate::context::ContextConfig {
            max_call_depth: 0,
            ..Default::default()
        });
        let obj = object(&ctx);

        let err = obj.try_call("none").unwrap_err();
        assert!(matches!(err, BindError::RuntimeFailure { .. }));
        assert_eq!(ctx.stats().stack_depth, 0);
    }
}
