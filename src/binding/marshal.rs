//! Marshaling between host types and the runtime stack
//!
//! `FromStack` reads a host value from a stack position, `ToStack` pushes one.
//! The supported set is closed: booleans, integers, floats, text, raw
//! pointers (as light userdata), `Nil`, `Value`, `Option<T>`, shared host
//! objects and value handles. Enumerations join the set through
//! [`marshal_enum!`](crate::marshal_enum). Using any other type is a compile
//! error.
//!
//! # Predicates
//! - `bool` only matches booleans; it is never an integer.
//! - Integer types match exact integers only: `10` matches, `10.0` does not.
//! - Float types match any number, and numeric strings.
//! - `String` matches strings and numbers (numbers convert to text).
//!
//! # Conversions
//! Reading converts regardless of the predicate, with the runtime's
//! rules: a float reads as an integer only if it is integral (`10.0` reads
//! as `10`, `10.5` reads as `0`); an integer reads as a float exactly.
//! Narrower integer types truncate like an `as` cast.

use std::any::Any;
use std::cell::RefCell;
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::State;

/// Host type that can be read from the runtime stack
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot be read from the runtime stack",
    label = "unsupported marshaling type",
    note = "supported types are bool, integers, floats, String, raw pointers, Nil, Value, \
            Option<T> and enums declared with `marshal_enum!`"
)]
pub trait FromStack: Sized {
    /// Type name used in mismatch diagnostics
    const TYPE_NAME: &'static str;

    /// Whether a runtime value has this host type
    fn is_value(value: &Value) -> bool;

    /// Convert a runtime value, whatever its type
    fn from_value(value: &Value) -> Self;

    /// Type predicate for a stack position; an empty position reads as nil
    fn is(state: &State, idx: i32) -> bool {
        Self::is_value(state.value(idx).unwrap_or(&Value::Nil))
    }

    /// Convert the value at a stack position
    fn get(state: &State, idx: i32) -> Self {
        Self::from_value(state.value(idx).unwrap_or(&Value::Nil))
    }

    /// Convert the value at a stack position, or return `default` untouched
    /// if it does not have this type
    fn get_or(state: &State, idx: i32, default: Self) -> Self {
        if Self::is(state, idx) {
            Self::get(state, idx)
        } else {
            default
        }
    }
}

/// Host type that can be pushed onto the runtime stack
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot be pushed onto the runtime stack",
    label = "unsupported marshaling type",
    note = "supported types are bool, integers, floats, String, &str, raw pointers, Nil, \
            Value, Option<T>, HostObject<T>, ValueHandle and enums declared with `marshal_enum!`"
)]
pub trait ToStack {
    /// Push the runtime representation of `self`
    fn push(self, state: &mut State);
}

/// Host stand-in for the runtime's `nil`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nil;

impl FromStack for bool {
    const TYPE_NAME: &'static str = "boolean";

    #[inline]
    fn is_value(value: &Value) -> bool {
        value.is_boolean()
    }

    /// Truthiness: only `nil` and `false` read as false
    #[inline]
    fn from_value(value: &Value) -> Self {
        value.is_truthy()
    }
}

impl ToStack for bool {
    #[inline]
    fn push(self, state: &mut State) {
        state.push_boolean(self);
    }
}

macro_rules! marshal_integer {
    ($($ty:ty),+) => {$(
        impl FromStack for $ty {
            const TYPE_NAME: &'static str = "integer";

            #[inline]
            fn is_value(value: &Value) -> bool {
                value.is_integer()
            }

            #[inline]
            fn from_value(value: &Value) -> Self {
                value.to_integer().unwrap_or(0) as $ty
            }
        }

        impl ToStack for $ty {
            #[inline]
            fn push(self, state: &mut State) {
                state.push_integer(self as i64);
            }
        }
    )+};
}

marshal_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! marshal_float {
    ($($ty:ty),+) => {$(
        impl FromStack for $ty {
            const TYPE_NAME: &'static str = "number";

            #[inline]
            fn is_value(value: &Value) -> bool {
                value.is_number()
            }

            #[inline]
            fn from_value(value: &Value) -> Self {
                value.to_number().unwrap_or(0.0) as $ty
            }
        }

        impl ToStack for $ty {
            #[inline]
            fn push(self, state: &mut State) {
                state.push_number(self as f64);
            }
        }
    )+};
}

marshal_float!(f32, f64);

impl FromStack for String {
    const TYPE_NAME: &'static str = "string";

    #[inline]
    fn is_value(value: &Value) -> bool {
        value.is_string()
    }

    fn from_value(value: &Value) -> Self {
        value.to_text().unwrap_or_default()
    }
}

impl ToStack for String {
    fn push(self, state: &mut State) {
        state.push_string(&self);
    }
}

impl ToStack for &String {
    fn push(self, state: &mut State) {
        state.push_string(self);
    }
}

impl ToStack for &str {
    fn push(self, state: &mut State) {
        state.push_string(self);
    }
}

// Raw pointers travel as light userdata: no ownership, no finalizer

impl<T> FromStack for *mut T {
    const TYPE_NAME: &'static str = "light userdata";

    #[inline]
    fn is_value(value: &Value) -> bool {
        value.is_light_userdata()
    }

    #[inline]
    fn from_value(value: &Value) -> Self {
        value.to_light_userdata().cast()
    }
}

impl<T> ToStack for *mut T {
    #[inline]
    fn push(self, state: &mut State) {
        state.push_light_userdata(self.cast::<c_void>());
    }
}

impl<T> FromStack for *const T {
    const TYPE_NAME: &'static str = "light userdata";

    #[inline]
    fn is_value(value: &Value) -> bool {
        value.is_light_userdata()
    }

    #[inline]
    fn from_value(value: &Value) -> Self {
        value.to_light_userdata().cast_const().cast()
    }
}

impl<T> ToStack for *const T {
    #[inline]
    fn push(self, state: &mut State) {
        state.push_light_userdata(self.cast_mut().cast::<c_void>());
    }
}

impl FromStack for Nil {
    const TYPE_NAME: &'static str = "nil";

    #[inline]
    fn is_value(value: &Value) -> bool {
        value.is_nil()
    }

    #[inline]
    fn from_value(_value: &Value) -> Self {
        Nil
    }
}

impl ToStack for Nil {
    #[inline]
    fn push(self, state: &mut State) {
        state.push_nil();
    }
}

impl FromStack for Value {
    const TYPE_NAME: &'static str = "value";

    #[inline]
    fn is_value(_value: &Value) -> bool {
        true
    }

    #[inline]
    fn from_value(value: &Value) -> Self {
        value.clone()
    }
}

impl ToStack for Value {
    #[inline]
    fn push(self, state: &mut State) {
        state.push_value(self);
    }
}

impl ToStack for &Value {
    #[inline]
    fn push(self, state: &mut State) {
        state.push_value(self.clone());
    }
}

/// `None` stands for nil
impl<T: FromStack> FromStack for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn is_value(value: &Value) -> bool {
        value.is_nil() || T::is_value(value)
    }

    fn from_value(value: &Value) -> Self {
        if value.is_nil() {
            None
        } else {
            Some(T::from_value(value))
        }
    }
}

impl<T: ToStack> ToStack for Option<T> {
    fn push(self, state: &mut State) {
        match self {
            Some(value) => value.push(state),
            None => state.push_nil(),
        }
    }
}

/// Host object shared with the runtime as full userdata
///
/// The runtime holds one share of the object; the host keeps others. Bound
/// methods reach the object through the `__this` field of the table they
/// are called on.
pub struct HostObject<T>(Rc<RefCell<T>>);

impl<T: 'static> HostObject<T> {
    /// Wrap a new object
    pub fn new(value: T) -> Self {
        HostObject(Rc::new(RefCell::new(value)))
    }

    /// Share an object the host already holds
    pub fn from_rc(inner: Rc<RefCell<T>>) -> Self {
        HostObject(inner)
    }

    /// The object behind a full userdata value, if it has type `T`
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::UserData(data) => data.clone().downcast::<RefCell<T>>().ok().map(HostObject),
            _ => None,
        }
    }

    #[inline]
    pub fn inner(&self) -> &Rc<RefCell<T>> {
        &self.0
    }

    #[inline]
    pub fn into_inner(self) -> Rc<RefCell<T>> {
        self.0
    }
}

impl<T> Clone for HostObject<T> {
    fn clone(&self) -> Self {
        HostObject(self.0.clone())
    }
}

impl<T> fmt::Debug for HostObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({:p})", Rc::as_ptr(&self.0))
    }
}

impl<T: 'static> ToStack for HostObject<T> {
    fn push(self, state: &mut State) {
        let data: Rc<dyn Any> = self.0;
        state.push_userdata(data);
    }
}

/// Declare a field-less enumeration as marshaled through its integer value
///
/// The enum must convert both ways: `From<i64>` for the enum and
/// `From<Enum>` for `i64`.
///
/// ```
/// use lpp::marshal_enum;
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Mode { Read = 1, Write = 2 }
///
/// impl From<i64> for Mode {
///     fn from(n: i64) -> Self {
///         if n == 2 { Mode::Write } else { Mode::Read }
///     }
/// }
///
/// impl From<Mode> for i64 {
///     fn from(mode: Mode) -> Self {
///         mode as i64
///     }
/// }
///
/// marshal_enum!(Mode);
/// ```
#[macro_export]
macro_rules! marshal_enum {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::binding::FromStack for $ty {
            const TYPE_NAME: &'static str = "integer";

            fn is_value(value: &$crate::value::Value) -> bool {
                value.is_integer()
            }

            fn from_value(value: &$crate::value::Value) -> Self {
                <$ty>::from(value.to_integer().unwrap_or(0))
            }
        }

        impl $crate::binding::ToStack for $ty {
            fn push(self, state: &mut $crate::vm::State) {
                state.push_integer(i64::from(self));
            }
        }
    )+};
}

/// Positional argument list pushed by a call
pub trait ArgList {
    /// Push every argument in order, returning how many were pushed
    fn push_all(self, state: &mut State) -> usize;
}

impl ArgList for () {
    #[inline]
    fn push_all(self, _state: &mut State) -> usize {
        0
    }
}

macro_rules! impl_arg_list {
    ($($arg:ident),+) => {
        impl<$($arg: ToStack),+> ArgList for ($($arg,)+) {
            #[allow(non_snake_case)]
            fn push_all(self, state: &mut State) -> usize {
                let ($($arg,)+) = self;
                let mut count = 0;
                $(
                    $arg.push(state);
                    count += 1;
                )+
                count
            }
        }
    };
}

impl_arg_list!(A1);
impl_arg_list!(A1, A2);
impl_arg_list!(A1, A2, A3);
impl_arg_list!(A1, A2, A3, A4);
impl_arg_list!(A1, A2, A3, A4, A5);
impl_arg_list!(A1, A2, A3, A4, A5, A6);
impl_arg_list!(A1, A2, A3, A4, A5, A6, A7);
impl_arg_list!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Return value of a bound host method
///
/// `()` returns nothing; any pushable type returns one value; `Err` of a
/// `Result` raises a runtime error carrying its message.
pub trait ReturnValues {
    /// Push the results, returning how many were pushed
    fn push_returns(self, state: &mut State) -> Result<usize, RuntimeError>;
}

impl ReturnValues for () {
    #[inline]
    fn push_returns(self, _state: &mut State) -> Result<usize, RuntimeError> {
        Ok(0)
    }
}

impl<T: ToStack> ReturnValues for T {
    #[inline]
    fn push_returns(self, state: &mut State) -> Result<usize, RuntimeError> {
        self.push(state);
        Ok(1)
    }
}

impl<T: ReturnValues, E: fmt::Display> ReturnValues for Result<T, E> {
    fn push_returns(self, state: &mut State) -> Result<usize, RuntimeError> {
        match self {
            Ok(value) => value.push_returns(state),
            Err(err) => Err(RuntimeError::runtime(err.to_string())),
        }
    }
}
