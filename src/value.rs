//! Runtime value representation
//!
//! `Value` is the dynamically-typed value living on the operand stack, in
//! table fields, in upvalues and in registry slots. Scalars are stored
//! inline; tables, functions and full userdata are shared through `Rc`, so
//! a value is reclaimed as soon as its last owner drops it.
//!
//! # Type model
//! - `nil`, `boolean`
//! - `number`, with an exact integer subtype (`Integer`) and a float subtype (`Number`)
//! - `string` (immutable, shared)
//! - `table`, `function`
//! - `userdata`: light (a bare host pointer) or full (a shared host object)

use std::any::Any;
use std::cell::RefCell;
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

use crate::runtime::{Closure, Table};

/// Shared, mutable table reference
pub type TableRef = Rc<RefCell<Table>>;

/// Shared native closure reference
pub type FunctionRef = Rc<Closure>;

/// Basic type tags, as reported by `type()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Stack index that does not hold a value
    None,
    Nil,
    Boolean,
    LightUserData,
    Number,
    String,
    Table,
    Function,
    UserData,
}

impl ValueType {
    /// Type name as seen from scripts
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::None => "no value",
            ValueType::Nil => "nil",
            ValueType::Boolean => "boolean",
            ValueType::LightUserData | ValueType::UserData => "userdata",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Table => "table",
            ValueType::Function => "function",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Dynamically-typed runtime value
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(Rc<str>),
    Table(TableRef),
    Function(FunctionRef),
    /// Opaque host pointer; no ownership, no finalizer
    LightUserData(*mut c_void),
    /// Host object owned jointly by the runtime and the host
    UserData(Rc<dyn Any>),
}

impl Value {
    /// Create a string value, copying the text into the runtime
    #[inline]
    pub fn string(s: &str) -> Self {
        Value::String(Rc::from(s))
    }

    /// Create a fresh empty table
    pub fn new_table() -> Self {
        Value::Table(Rc::new(RefCell::new(Table::new())))
    }

    /// Get the basic type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) | Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Table(_) => ValueType::Table,
            Value::Function(_) => ValueType::Function,
            Value::LightUserData(_) => ValueType::LightUserData,
            Value::UserData(_) => ValueType::UserData,
        }
    }

    // Type checking

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn is_boolean(&self) -> bool {
        matches!(self, Value::Boolean(_))
    }

    /// Check for the exact integer subtype; `10.0` is not an integer
    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Integer(_))
    }

    /// Check if this is a number or a string convertible to a number
    pub fn is_number(&self) -> bool {
        match self {
            Value::Integer(_) | Value::Number(_) => true,
            Value::String(s) => str_to_number(s).is_some(),
            _ => false,
        }
    }

    /// Check if this is a string or a number (numbers coerce to strings)
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_) | Value::Integer(_) | Value::Number(_))
    }

    #[inline]
    pub fn is_table(&self) -> bool {
        matches!(self, Value::Table(_))
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    #[inline]
    pub fn is_light_userdata(&self) -> bool {
        matches!(self, Value::LightUserData(_))
    }

    #[inline]
    pub fn is_userdata(&self) -> bool {
        matches!(self, Value::UserData(_) | Value::LightUserData(_))
    }

    /// Only `nil` and `false` are falsy
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    // Value extraction

    /// Convert to an integer
    ///
    /// Floats convert only when they hold an exact integral value in range;
    /// numeric strings are converted the same way.
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) => float_to_integer(*n),
            Value::String(s) => match str_to_number(s)? {
                Value::Integer(i) => Some(i),
                Value::Number(n) => float_to_integer(n),
                _ => None,
            },
            _ => None,
        }
    }

    /// Convert to a float; integers convert exactly within the float range
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            Value::String(s) => match str_to_number(s)? {
                Value::Integer(i) => Some(i as f64),
                Value::Number(n) => Some(n),
                _ => None,
            },
            _ => None,
        }
    }

    /// Convert to text; numbers are formatted, other types yield `None`
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.to_string()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Number(n) => Some(number_to_string(*n)),
            _ => None,
        }
    }

    #[inline]
    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    #[inline]
    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Light userdata pointer, or null for any other type
    #[inline]
    pub fn to_light_userdata(&self) -> *mut c_void {
        match self {
            Value::LightUserData(p) => *p,
            _ => std::ptr::null_mut(),
        }
    }

    /// Address used for identity display and hashing of reference types
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Table(t) => Some(Rc::as_ptr(t) as *const () as usize),
            Value::Function(f) => Some(Rc::as_ptr(f) as *const () as usize),
            Value::UserData(u) => Some(Rc::as_ptr(u) as *const () as usize),
            Value::LightUserData(p) => Some(*p as usize),
            _ => None,
        }
    }

    /// Primitive equality without metamethods
    pub fn raw_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(i), Value::Number(n)) | (Value::Number(n), Value::Integer(i)) => {
                float_to_integer(*n) == Some(*i)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::UserData(a), Value::UserData(b)) => Rc::ptr_eq(a, b),
            (Value::LightUserData(a), Value::LightUserData(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equal(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Boolean(b) => write!(f, "Boolean({})", b),
            Value::Integer(i) => write!(f, "Integer({})", i),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Table(_) => write!(f, "Table({:#x})", self.identity().unwrap_or(0)),
            Value::Function(_) => write!(f, "Function({:#x})", self.identity().unwrap_or(0)),
            Value::LightUserData(p) => write!(f, "LightUserData({:?})", p),
            Value::UserData(_) => write!(f, "UserData({:#x})", self.identity().unwrap_or(0)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => f.write_str(&number_to_string(*n)),
            Value::String(s) => f.write_str(s),
            other => write!(
                f,
                "{}: {:#x}",
                other.value_type().name(),
                other.identity().unwrap_or(0)
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

/// Lower bound of the float range that converts to `i64`
const I64_MIN_F: f64 = -9_223_372_036_854_775_808.0;

/// Convert a float with an exact integral value to an integer
#[inline]
pub fn float_to_integer(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= I64_MIN_F && n < -I64_MIN_F {
        Some(n as i64)
    } else {
        None
    }
}

/// Format a float the way scripts see it
///
/// Integral floats keep a trailing `.0` so they stay distinguishable from
/// integers.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else if n.abs() >= 1e16 || (n != 0.0 && n.abs() < 1e-4) {
        format!("{:e}", n)
    } else {
        format!("{}", n)
    }
}

/// Parse a numeric string into an integer or float value
///
/// Accepts optional surrounding whitespace, decimal and hexadecimal
/// integers, and decimal floats with an optional exponent.
pub fn str_to_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (negative, digits) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        // Hex integers wrap around on overflow
        let value = hex.bytes().fold(0i64, |acc, c| {
            acc.wrapping_mul(16)
                .wrapping_add((c as char).to_digit(16).unwrap_or(0) as i64)
        });
        return Some(Value::Integer(if negative { value.wrapping_neg() } else { value }));
    }

    let valid = !digits.is_empty()
        && digits.as_bytes()[0] != b'+'
        && digits.as_bytes()[0] != b'-'
        && digits
            .bytes()
            .all(|c| c.is_ascii_digit() || matches!(c, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !valid {
        return None;
    }

    if digits.bytes().all(|c| c.is_ascii_digit()) {
        if let Ok(i) = s.parse::<i64>() {
            return Some(Value::Integer(i));
        }
    }

    s.parse::<f64>().ok().map(Value::Number)
}
