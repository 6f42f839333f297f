//! Base library
//!
//! The subset of the standard base functions that make sense without a
//! script interpreter: type queries and conversions, raw table access,
//! traversal, metatables and protected calls.

use crate::error::RuntimeError;
use crate::value::{str_to_number, Value, ValueType};
use crate::vm::State;

use super::NativeFn;

/// Base functions, in registration order
const BASE_FUNCTIONS: &[(&str, NativeFn)] = &[
    ("assert", base_assert),
    ("error", base_error),
    ("getmetatable", base_getmetatable),
    ("next", base_next),
    ("pcall", base_pcall),
    ("rawequal", base_rawequal),
    ("rawget", base_rawget),
    ("rawlen", base_rawlen),
    ("rawset", base_rawset),
    ("select", base_select),
    ("setmetatable", base_setmetatable),
    ("tonumber", base_tonumber),
    ("tostring", base_tostring),
    ("type", base_type),
    ("xpcall", base_xpcall),
];

/// Install the base functions as globals
pub fn open_base(state: &mut State) {
    for &(name, func) in BASE_FUNCTIONS {
        state.register(name, func);
    }
}

// Argument checks

fn check_any(state: &State, arg: i32) -> Result<(), RuntimeError> {
    if state.value(arg).is_none() {
        return Err(state.arg_error(arg, "value expected"));
    }
    Ok(())
}

fn check_type(state: &State, arg: i32, expected: ValueType) -> Result<(), RuntimeError> {
    let found = state.value_type(arg);
    if found != expected {
        let msg = format!("{} expected, got {}", expected, found);
        return Err(state.arg_error(arg, &msg));
    }
    Ok(())
}

fn check_integer(state: &State, arg: i32) -> Result<i64, RuntimeError> {
    match state.value(arg) {
        Some(v) if v.is_number() => v
            .to_integer()
            .ok_or_else(|| state.arg_error(arg, "number has no integer representation")),
        other => {
            let found = other.map_or(ValueType::None, Value::value_type);
            Err(state.arg_error(arg, &format!("number expected, got {}", found)))
        }
    }
}

/// Render a value as `tostring` does, honoring `__tostring`
fn to_display_string(state: &mut State, value: &Value) -> Result<String, RuntimeError> {
    let handler = state.metamethod(value, "__tostring");
    if handler.is_nil() {
        return Ok(value.to_string());
    }

    state.push_value(handler);
    state.push_value(value.clone());
    state.call(1, Some(1))?;
    match state.pop_value() {
        Value::String(s) => Ok(s.to_string()),
        _ => Err(RuntimeError::runtime("'__tostring' must return a string")),
    }
}

// Base functions

fn base_assert(state: &mut State) -> Result<usize, RuntimeError> {
    check_any(state, 1)?;
    if state.to_boolean(1) {
        return Ok(state.top() as usize);
    }
    if state.value(2).is_some() {
        let msg = state.remove(2).unwrap_or_default();
        return Err(RuntimeError::Runtime(msg));
    }
    Err(RuntimeError::runtime("assertion failed!"))
}

fn base_error(state: &mut State) -> Result<usize, RuntimeError> {
    state.set_top(1);
    Err(RuntimeError::Runtime(state.pop_value()))
}

fn base_getmetatable(state: &mut State) -> Result<usize, RuntimeError> {
    check_any(state, 1)?;
    if !state.get_metatable(1) {
        state.push_nil();
        return Ok(1);
    }
    // A __metatable field hides the real metatable
    let target = state.value(1).cloned().unwrap_or_default();
    let protected = state.metamethod(&target, "__metatable");
    if !protected.is_nil() {
        state.push_value(protected);
    }
    Ok(1)
}

fn base_next(state: &mut State) -> Result<usize, RuntimeError> {
    check_type(state, 1, ValueType::Table)?;
    state.set_top(2);
    if state.next(1)? {
        Ok(2)
    } else {
        state.push_nil();
        Ok(1)
    }
}

fn base_pcall(state: &mut State) -> Result<usize, RuntimeError> {
    check_any(state, 1)?;
    let nargs = (state.top() - 1) as usize;
    let status = state.pcall(nargs, None);
    state.push_boolean(status.is_ok());
    state.insert(1);
    Ok(state.top() as usize)
}

fn base_xpcall(state: &mut State) -> Result<usize, RuntimeError> {
    check_any(state, 2)?;
    // Reorder to handler, function, args...
    state.push_copy(2);
    state.insert(1);
    state.remove(3);
    let nargs = (state.top() - 2) as usize;
    let status = state.xpcall(nargs, None, 1);
    state.push_boolean(status.is_ok());
    state.replace(1);
    Ok(state.top() as usize)
}

fn base_rawequal(state: &mut State) -> Result<usize, RuntimeError> {
    check_any(state, 1)?;
    check_any(state, 2)?;
    let equal = match (state.value(1), state.value(2)) {
        (Some(a), Some(b)) => a.raw_equal(b),
        _ => false,
    };
    state.push_boolean(equal);
    Ok(1)
}

fn base_rawget(state: &mut State) -> Result<usize, RuntimeError> {
    check_type(state, 1, ValueType::Table)?;
    check_any(state, 2)?;
    state.set_top(2);
    state.raw_get(1);
    Ok(1)
}

fn base_rawlen(state: &mut State) -> Result<usize, RuntimeError> {
    match state.value_type(1) {
        ValueType::Table | ValueType::String => {
            let len = state.raw_len(1);
            state.push_integer(len as i64);
            Ok(1)
        }
        _ => Err(state.arg_error(1, "table or string expected")),
    }
}

fn base_rawset(state: &mut State) -> Result<usize, RuntimeError> {
    check_type(state, 1, ValueType::Table)?;
    check_any(state, 2)?;
    check_any(state, 3)?;
    state.set_top(3);
    state.raw_set(1)?;
    Ok(1)
}

fn base_select(state: &mut State) -> Result<usize, RuntimeError> {
    let n = state.top() as i64;
    if let Some(Value::String(s)) = state.value(1) {
        if &**s == "#" {
            state.push_integer(n - 1);
            return Ok(1);
        }
    }

    let i = check_integer(state, 1)?;
    let first = if i < 0 {
        n + i
    } else if i == 0 {
        return Err(state.arg_error(1, "index out of range"));
    } else {
        i.min(n)
    };
    if first < 1 {
        return Err(state.arg_error(1, "index out of range"));
    }
    Ok((n - first) as usize)
}

fn base_setmetatable(state: &mut State) -> Result<usize, RuntimeError> {
    check_type(state, 1, ValueType::Table)?;
    match state.value_type(2) {
        ValueType::Nil | ValueType::Table => {}
        _ => return Err(state.arg_error(2, "nil or table expected")),
    }

    let target = state.value(1).cloned().unwrap_or_default();
    if !state.metamethod(&target, "__metatable").is_nil() {
        return Err(RuntimeError::runtime("cannot change a protected metatable"));
    }

    state.set_top(2);
    state.set_metatable(1)?;
    Ok(1)
}

fn base_tonumber(state: &mut State) -> Result<usize, RuntimeError> {
    if state.is_none_or_nil(2) {
        check_any(state, 1)?;
        let converted = match state.value(1) {
            Some(v @ (Value::Integer(_) | Value::Number(_))) => v.clone(),
            Some(Value::String(s)) => str_to_number(s).unwrap_or_default(),
            _ => Value::Nil,
        };
        state.push_value(converted);
        return Ok(1);
    }

    let base = check_integer(state, 2)?;
    if !(2..=36).contains(&base) {
        return Err(state.arg_error(2, "base out of range"));
    }
    check_type(state, 1, ValueType::String)?;
    let text = state.to_text(1).unwrap_or_default();
    let converted = parse_in_base(text.trim(), base as u32)
        .map(Value::Integer)
        .unwrap_or_default();
    state.push_value(converted);
    Ok(1)
}

/// Parse an integer written in `base`, wrapping on overflow
fn parse_in_base(text: &str, base: u32) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n: i64 = 0;
    for c in digits.chars() {
        let d = c.to_digit(base)?;
        n = n.wrapping_mul(base as i64).wrapping_add(d as i64);
    }
    Some(if negative { n.wrapping_neg() } else { n })
}

fn base_tostring(state: &mut State) -> Result<usize, RuntimeError> {
    check_any(state, 1)?;
    let value = state.value(1).cloned().unwrap_or_default();
    let text = to_display_string(state, &value)?;
    state.push_string(&text);
    Ok(1)
}

fn base_type(state: &mut State) -> Result<usize, RuntimeError> {
    check_any(state, 1)?;
    let name = state.value_type(1).name();
    state.push_string(name);
    Ok(1)
}
