//! Host methods exposed as runtime functions
//!
//! [`ValueHandle::bind_method`] installs a host closure on a table as a
//! native function. The closure travels as userdata in the function's first
//! upvalue. When the runtime calls it, the trampoline looks up `__this` on
//! the table passed as first argument, borrows the host object stored there,
//! reads the remaining arguments with [`FromStack`] and pushes the result
//! with [`ReturnValues`].
//!
//! `__this` must hold a [`HostObject<T>`]. A raw pointer stored there is a
//! light userdata and is ignored: the call returns no values, the same as
//! when `__this` is missing or holds a host object of another type.
//!
//! ```
//! use lpp::binding::HostObject;
//! use lpp::RuntimeContext;
//!
//! struct Counter {
//!     total: i64,
//! }
//!
//! let ctx = RuntimeContext::new();
//! let mut counter = ctx.new_value();
//! counter.create_table();
//! counter.set_field("__this", HostObject::new(Counter { total: 10 }));
//! counter.bind_method("add", |this: &mut Counter, n: i64| {
//!     this.total += n;
//!     this.total
//! });
//!
//! assert_eq!(counter.call_with("add", (5i64,)).get::<i64>(), 15);
//! ```

use std::rc::Rc;

use tracing::debug;

use crate::error::{BindResult, RuntimeError};
use crate::value::{Value, ValueType};
use crate::vm::State;

use super::handle::{degrade, require_table, runtime_failure, ValueHandle};
use super::marshal::{FromStack, HostObject, ReturnValues};

/// Field of a bound table holding its host object
pub const THIS_FIELD: &str = "__this";

/// Host callable that can be bound as a method of `T`
///
/// Implemented for every `Fn(&mut T, A1, .., An) -> R` with up to eight
/// arguments, where each argument is [`FromStack`] and `R` is
/// [`ReturnValues`]. `Args` is the argument tuple and only serves to keep
/// the implementations apart.
pub trait HostMethod<T, Args>: 'static {
    /// Read the arguments at stack positions 2.., call, and push the result
    fn invoke(&self, target: &mut T, state: &mut State) -> Result<usize, RuntimeError>;
}

macro_rules! impl_host_method {
    ($($arg:ident = $idx:literal),*) => {
        impl<T, F, R, $($arg),*> HostMethod<T, ($($arg,)*)> for F
        where
            F: Fn(&mut T, $($arg),*) -> R + 'static,
            R: ReturnValues,
            $($arg: FromStack,)*
        {
            #[allow(non_snake_case)]
            fn invoke(&self, target: &mut T, state: &mut State) -> Result<usize, RuntimeError> {
                $(let $arg = <$arg as FromStack>::get(state, $idx);)*
                (self)(target, $($arg),*).push_returns(state)
            }
        }
    };
}

impl_host_method!();
impl_host_method!(A1 = 2);
impl_host_method!(A1 = 2, A2 = 3);
impl_host_method!(A1 = 2, A2 = 3, A3 = 4);
impl_host_method!(A1 = 2, A2 = 3, A3 = 4, A4 = 5);
impl_host_method!(A1 = 2, A2 = 3, A3 = 4, A4 = 5, A5 = 6);
impl_host_method!(A1 = 2, A2 = 3, A3 = 4, A4 = 5, A5 = 6, A6 = 7);
impl_host_method!(A1 = 2, A2 = 3, A3 = 4, A4 = 5, A5 = 6, A6 = 7, A7 = 8);
impl_host_method!(A1 = 2, A2 = 3, A3 = 4, A4 = 5, A5 = 6, A6 = 7, A7 = 8, A8 = 9);

/// Native entry point shared by every method bound with signature `M`
fn call_bound_method<T, Args, M>(state: &mut State) -> Result<usize, RuntimeError>
where
    T: 'static,
    Args: 'static,
    M: HostMethod<T, Args>,
{
    let payload = match state.upvalue(1) {
        Some(Value::UserData(data)) => data.clone(),
        _ => return Err(RuntimeError::runtime("bound method has no payload")),
    };
    let method = payload
        .downcast::<M>()
        .map_err(|_| RuntimeError::runtime("bound method payload has an unexpected type"))?;

    let Some(object) = this_object::<T>(state)? else {
        debug!(
            method = std::any::type_name::<M>(),
            "no host object bound to the receiver, skipping call"
        );
        return Ok(0);
    };
    let mut target = object
        .inner()
        .try_borrow_mut()
        .map_err(|_| RuntimeError::runtime("host object is already borrowed"))?;
    method.invoke(&mut *target, state)
}

/// Host object of type `T` stored in the receiver's `__this` field
fn this_object<T: 'static>(state: &mut State) -> Result<Option<HostObject<T>>, RuntimeError> {
    if state.value_type(1) != ValueType::Table {
        return Ok(None);
    }
    state.get_field(1, THIS_FIELD)?;
    let this = state.pop_value();
    Ok(HostObject::from_value(&this))
}

impl ValueHandle<'_> {
    /// Install `method` on this table as function `name`
    ///
    /// Does nothing if this handle is not a table.
    pub fn bind_method<T, Args, M>(&self, name: &str, method: M)
    where
        T: 'static,
        Args: 'static,
        M: HostMethod<T, Args>,
    {
        if let Err(err) = self.try_bind_method(name, method) {
            degrade("bind_method", err, ());
        }
    }

    /// Install `method` on this table as function `name`, reporting failures
    pub fn try_bind_method<T, Args, M>(&self, name: &str, method: M) -> BindResult<()>
    where
        T: 'static,
        Args: 'static,
        M: HostMethod<T, Args>,
    {
        self.with_pushed(|state| {
            require_table(state)?;
            state.push_userdata(Rc::new(method));
            state
                .push_closure(call_bound_method::<T, Args, M>, 1)
                .map_err(runtime_failure)?;
            state.set_field(-2, name).map_err(runtime_failure)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use crate::context::RuntimeContext;
    use crate::error::{BindError, CallStatus};

    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        total: i64,
    }

    fn counter(ctx: &RuntimeContext) -> ValueHandle<'_> {
        let mut table = ctx.new_value();
        table.create_table();
        table.bind_method("f", |this: &mut Counter, n: i64| this.total + n);
        table
    }

    #[test]
    fn test_call_with_host_object() {
        let ctx = RuntimeContext::new();
        let obj = counter(&ctx);
        obj.set_field(THIS_FIELD, HostObject::new(Counter { total: 100 }));

        assert!(obj.get_field("f").is_function());
        assert_eq!(obj.call_with("f", (5i64,)).get::<i64>(), 105);
        assert_eq!(ctx.stats().stack_depth, 0);
    }

    #[test]
    fn test_call_without_host_object() {
        let ctx = RuntimeContext::new();
        let obj = counter(&ctx);

        let result = obj.try_call_with("f", (5i64,)).unwrap();
        assert!(!result.has_reference());
        assert!(result.is_nil());

        // A host object of another type is treated as absent
        obj.set_field(THIS_FIELD, HostObject::new(String::from("not a counter")));
        assert!(obj.call_with("f", (5i64,)).is_nil());

        // A raw pointer is a light userdata and is ignored as well
        let mut raw = Counter::default();
        obj.set_field(THIS_FIELD, &mut raw as *mut Counter);
        assert!(obj.call_with("f", (5i64,)).is_nil());
        assert_eq!(ctx.stats().stack_depth, 0);
    }

    #[test]
    fn test_method_mutates_shared_object() {
        let ctx = RuntimeContext::new();
        let shared = Rc::new(RefCell::new(Counter::default()));

        let mut obj = ctx.new_value();
        obj.create_table();
        obj.set_field(THIS_FIELD, HostObject::from_rc(shared.clone()));
        obj.bind_method("add", |this: &mut Counter, n: i64| {
            this.total += n;
        });

        assert!(obj.call_with("add", (3i64,)).is_nil());
        obj.call_with("add", (4i64,));
        assert_eq!(shared.borrow().total, 7);
    }

    #[test]
    fn test_arguments_are_marshaled() {
        let ctx = RuntimeContext::new();
        let mut obj = ctx.new_value();
        obj.create_table();
        obj.set_field(THIS_FIELD, HostObject::new(Counter { total: 2 }));
        obj.bind_method(
            "describe",
            |this: &mut Counter, label: String, scale: f64, flag: bool, missing: Option<i64>| {
                format!("{} {} {} {:?}", label, this.total as f64 * scale, flag, missing)
            },
        );
        obj.bind_method("nothing", |_this: &mut Counter| 1u8);

        let text = obj.call_with("describe", ("total", 1.5f64, true));
        assert_eq!(text.get::<String>(), "total 3 true None");
        assert_eq!(obj.call("nothing").get::<u8>(), 1);
    }

    #[test]
    fn test_error_result_raises() {
        let ctx = RuntimeContext::new();
        let mut obj = ctx.new_value();
        obj.create_table();
        obj.set_field(THIS_FIELD, HostObject::new(Counter::default()));
        obj.bind_method("checked", |_this: &mut Counter, n: i64| {
            if n < 0 {
                Err(format!("negative input {}", n))
            } else {
                Ok(n * 2)
            }
        });

        assert_eq!(obj.call_with("checked", (4i64,)).get::<i64>(), 8);
        assert_eq!(
            obj.try_call_with("checked", (-1i64,)).unwrap_err(),
            BindError::RuntimeFailure {
                status: CallStatus::Runtime,
                message: "negative input -1".to_string(),
            }
        );
        assert_eq!(ctx.stats().stack_depth, 0);
    }

    #[test]
    fn test_called_from_function_value() {
        let ctx = RuntimeContext::new();
        let obj = counter(&ctx);
        obj.set_field(THIS_FIELD, HostObject::new(Counter { total: 1 }));

        let f = obj.get_field("f");
        assert_eq!(f.invoke_with((&obj, 5i64)).get::<i64>(), 6);
        // Called without a receiver table
        assert!(f.invoke_with((5i64,)).is_nil());
    }

    #[test]
    fn test_shared_method_through_metatable() {
        let ctx = RuntimeContext::new();
        let mut class = ctx.new_value();
        class.create_metatable("Counter");
        class.bind_method("get", |this: &mut Counter| this.total);

        let make = |total| {
            let mut instance = ctx.new_value();
            instance.create_table();
            instance.set_metatable("Counter");
            instance.set_field(THIS_FIELD, HostObject::new(Counter { total }));
            instance
        };
        let a = make(1);
        let b = make(2);

        assert_eq!(a.call("get").get::<i64>(), 1);
        assert_eq!(b.call("get").get::<i64>(), 2);
    }

    #[test]
    fn test_bind_on_non_table() {
        let ctx = RuntimeContext::new();
        let number = ValueHandle::from_value(&ctx, 1i64);

        let err = number
            .try_bind_method("f", |_this: &mut Counter| ())
            .unwrap_err();
        assert_eq!(err, BindError::NotATable(ValueType::Number));
        assert_eq!(ctx.stats().stack_depth, 0);
    }
}
