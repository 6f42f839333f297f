//! Runtime state
//!
//! `State` is the handle the host talks to: an operand stack addressed by
//! position, a registry addressed by slot, a table of globals addressed by
//! name, and the native call machinery.
//!
//! # Stack indices
//! Positive indices count from the bottom of the running function's frame
//! (1 is its first argument); negative indices count from the top (-1 is the
//! top value). Index 0 is never valid.
//!
//! # Calls
//! To call a function, push it, push its arguments in order, then call
//! `call(nargs, nresults)`. The function and its arguments are replaced by
//! the results. `pcall` does the same but catches any error raised inside,
//! leaving the error object where the function was.

use std::any::Any;
use std::cell::RefCell;
use std::ffi::c_void;
use std::rc::Rc;

use crate::error::{CallStatus, RuntimeError};
use crate::runtime::{Closure, NativeFn, Registry, Slot, Table, MAX_UPVALUES};
use crate::value::{FunctionRef, TableRef, Value, ValueType};

use super::stack::Stack;

/// Default stack budget in slots
pub const DEFAULT_MAX_STACK: usize = 1_000_000;

/// Default limit of nested native calls
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Longest `__index`/`__newindex` chain followed before giving up
const MAX_META_CHAIN: usize = 2000;

/// Call frame of a running native closure
#[derive(Debug)]
pub struct CallFrame {
    /// The running closure
    pub func: FunctionRef,
    /// Frame base of the caller
    pub prev_base: usize,
}

/// Runtime state: stack, registry, globals and call frames
pub struct State {
    stack: Stack,
    frames: Vec<CallFrame>,
    registry: Registry,
    globals: TableRef,
    max_stack: usize,
    max_call_depth: usize,
}

impl State {
    /// Create a new state with default limits
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_STACK, DEFAULT_MAX_CALL_DEPTH)
    }

    /// Create a new state with custom limits
    pub fn with_limits(max_stack: usize, max_call_depth: usize) -> Self {
        State {
            stack: Stack::new(64),
            frames: Vec::new(),
            registry: Registry::new(),
            globals: Rc::new(RefCell::new(Table::new())),
            max_stack,
            max_call_depth,
        }
    }

    // Stack manipulation

    /// Absolute stack position of a frame index, if it holds a value
    pub fn abs_index(&self, idx: i32) -> Option<usize> {
        let base = self.stack.frame_base();
        let len = self.stack.len();
        if idx > 0 {
            let abs = base + idx as usize - 1;
            (abs < len).then_some(abs)
        } else if idx < 0 {
            let back = idx.unsigned_abs() as usize;
            (back <= len - base).then(|| len - back)
        } else {
            None
        }
    }

    /// Convert a top-relative index into the equivalent frame index
    ///
    /// The result stays valid while values are pushed above it.
    pub fn normalize_index(&self, idx: i32) -> i32 {
        if idx < 0 {
            self.top() + idx + 1
        } else {
            idx
        }
    }

    /// Number of values in the current frame (the index of the top value)
    #[inline]
    pub fn top(&self) -> i32 {
        self.stack.frame_len() as i32
    }

    /// Set the frame's top, truncating or padding with nil
    pub fn set_top(&mut self, idx: i32) {
        let base = self.stack.frame_base();
        let new_len = if idx >= 0 {
            base + idx as usize
        } else {
            (self.stack.len() as i64 + idx as i64 + 1).max(base as i64) as usize
        };
        self.stack.resize(new_len);
    }

    /// Pop n values, never below the current frame
    #[inline]
    pub fn pop(&mut self, n: usize) {
        self.stack.drop_n(n);
    }

    /// Pop the top value; an empty frame yields nil
    #[inline]
    pub fn pop_value(&mut self) -> Value {
        self.stack.pop().unwrap_or_default()
    }

    /// Value at a stack index
    #[inline]
    pub fn value(&self, idx: i32) -> Option<&Value> {
        self.abs_index(idx).and_then(|abs| self.stack.get(abs))
    }

    /// Type of the value at a stack index (`None` for an empty position)
    pub fn value_type(&self, idx: i32) -> ValueType {
        self.value(idx).map_or(ValueType::None, Value::value_type)
    }

    /// Push a copy of the value at a stack index; pushes nil for an empty one
    pub fn push_copy(&mut self, idx: i32) {
        let value = self.value(idx).cloned().unwrap_or_default();
        self.stack.push(value);
    }

    /// Move the top value into position `idx`, shifting values above it up
    pub fn insert(&mut self, idx: i32) {
        if let Some(abs) = self.abs_index(idx) {
            self.stack.insert_top(abs);
        }
    }

    /// Remove the value at `idx`, shifting values above it down
    pub fn remove(&mut self, idx: i32) -> Option<Value> {
        let abs = self.abs_index(idx)?;
        self.stack.remove(abs)
    }

    /// Pop the top value into position `idx`
    pub fn replace(&mut self, idx: i32) {
        let Some(abs) = self.abs_index(idx) else {
            return;
        };
        let value = self.pop_value();
        self.stack.set(abs, value);
    }

    // Push operations

    #[inline]
    pub fn push_value(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub fn push_nil(&mut self) {
        self.stack.push(Value::Nil);
    }

    #[inline]
    pub fn push_boolean(&mut self, b: bool) {
        self.stack.push(Value::Boolean(b));
    }

    #[inline]
    pub fn push_integer(&mut self, i: i64) {
        self.stack.push(Value::Integer(i));
    }

    #[inline]
    pub fn push_number(&mut self, n: f64) {
        self.stack.push(Value::Number(n));
    }

    /// Push a string; the text is copied into the runtime
    #[inline]
    pub fn push_string(&mut self, s: &str) {
        self.stack.push(Value::string(s));
    }

    #[inline]
    pub fn push_light_userdata(&mut self, p: *mut c_void) {
        self.stack.push(Value::LightUserData(p));
    }

    /// Push a full userdata shared with the host
    #[inline]
    pub fn push_userdata(&mut self, data: Rc<dyn Any>) {
        self.stack.push(Value::UserData(data));
    }

    // Access operations

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value(idx).is_some_and(Value::is_truthy)
    }

    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        self.value(idx).and_then(Value::to_integer)
    }

    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.value(idx).and_then(Value::to_number)
    }

    pub fn to_text(&self, idx: i32) -> Option<String> {
        self.value(idx).and_then(Value::to_text)
    }

    pub fn to_userdata(&self, idx: i32) -> Option<Rc<dyn Any>> {
        match self.value(idx)? {
            Value::UserData(data) => Some(data.clone()),
            _ => None,
        }
    }

    #[inline]
    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        self.value(idx).is_none_or(Value::is_nil)
    }

    // Table operations

    /// Push a fresh empty table
    pub fn new_table(&mut self) {
        self.stack.push(Value::new_table());
    }

    /// Push `t[name]` for the value at `idx`, honoring `__index`
    pub fn get_field(&mut self, idx: i32, name: &str) -> Result<ValueType, RuntimeError> {
        let target = self.value(idx).cloned().unwrap_or_default();
        let value = self.index_value(target, Value::string(name))?;
        let ty = value.value_type();
        self.stack.push(value);
        Ok(ty)
    }

    /// Pop a key and push `t[key]` for the value at `idx`, honoring `__index`
    pub fn get_table(&mut self, idx: i32) -> Result<ValueType, RuntimeError> {
        let target = self.value(idx).cloned().unwrap_or_default();
        let key = self.pop_value();
        let value = self.index_value(target, key)?;
        let ty = value.value_type();
        self.stack.push(value);
        Ok(ty)
    }

    /// Pop a value and assign `t[name]` for the value at `idx`, honoring `__newindex`
    pub fn set_field(&mut self, idx: i32, name: &str) -> Result<(), RuntimeError> {
        let target = self.value(idx).cloned().unwrap_or_default();
        let value = self.pop_value();
        self.newindex_value(target, Value::string(name), value)
    }

    /// Pop a value and a key and assign `t[key]`, honoring `__newindex`
    pub fn set_table(&mut self, idx: i32) -> Result<(), RuntimeError> {
        let target = self.value(idx).cloned().unwrap_or_default();
        let value = self.pop_value();
        let key = self.pop_value();
        self.newindex_value(target, key, value)
    }

    /// Pop a key and push the raw field of the table at `idx`
    ///
    /// Pushes nil when `idx` is not a table.
    pub fn raw_get(&mut self, idx: i32) -> ValueType {
        let table = self.value(idx).and_then(Value::as_table).cloned();
        let key = self.pop_value();
        let value = table.map(|t| t.borrow().get(&key)).unwrap_or_default();
        let ty = value.value_type();
        self.stack.push(value);
        ty
    }

    /// Push the raw integer field `n` of the table at `idx`
    pub fn raw_get_i(&mut self, idx: i32, n: i64) -> ValueType {
        let value = self
            .value(idx)
            .and_then(Value::as_table)
            .map(|t| t.borrow().get_int(n))
            .unwrap_or_default();
        let ty = value.value_type();
        self.stack.push(value);
        ty
    }

    /// Pop a value and a key and assign the raw field of the table at `idx`
    pub fn raw_set(&mut self, idx: i32) -> Result<(), RuntimeError> {
        let table = self.table_at(idx)?;
        let value = self.pop_value();
        let key = self.pop_value();
        table.borrow_mut().set(key, value)
    }

    /// Pop a value and assign the raw integer field `n` of the table at `idx`
    pub fn raw_set_i(&mut self, idx: i32, n: i64) -> Result<(), RuntimeError> {
        let table = self.table_at(idx)?;
        let value = self.pop_value();
        table.borrow_mut().set_int(n, value);
        Ok(())
    }

    /// Raw length: border of a table, byte length of a string, 0 otherwise
    pub fn raw_len(&self, idx: i32) -> usize {
        match self.value(idx) {
            Some(Value::Table(t)) => t.borrow().len(),
            Some(Value::String(s)) => s.len(),
            _ => 0,
        }
    }

    /// Pop a key and push the next key/value pair of the table at `idx`
    ///
    /// Returns `false` (pushing nothing) when the traversal is complete.
    pub fn next(&mut self, idx: i32) -> Result<bool, RuntimeError> {
        let table = self.table_at(idx)?;
        let key = self.pop_value();
        let pair = table.borrow().next(&key)?;
        match pair {
            Some((k, v)) => {
                self.stack.push(k);
                self.stack.push(v);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn table_at(&self, idx: i32) -> Result<TableRef, RuntimeError> {
        match self.value(idx) {
            Some(Value::Table(t)) => Ok(t.clone()),
            other => Err(RuntimeError::runtime(format!(
                "table expected, got {}",
                other.map_or(ValueType::None, Value::value_type)
            ))),
        }
    }

    /// Read `target[key]`, following `__index` tables and functions
    pub fn index_value(&mut self, target: Value, key: Value) -> Result<Value, RuntimeError> {
        let mut current = target;
        for _ in 0..MAX_META_CHAIN {
            let table = match &current {
                Value::Table(t) => t.clone(),
                other => {
                    return Err(RuntimeError::runtime(format!(
                        "attempt to index a {} value",
                        other.value_type()
                    )));
                }
            };

            let handler = {
                let table = table.borrow();
                let raw = table.get(&key);
                if !raw.is_nil() {
                    return Ok(raw);
                }
                match table.metatable() {
                    Some(mt) => mt.borrow().get_str("__index"),
                    None => return Ok(Value::Nil),
                }
            };

            match handler {
                Value::Nil => return Ok(Value::Nil),
                Value::Function(_) => {
                    self.stack.push(handler);
                    self.stack.push(current);
                    self.stack.push(key);
                    self.call(2, Some(1))?;
                    return Ok(self.pop_value());
                }
                next => current = next,
            }
        }
        Err(RuntimeError::runtime("'__index' chain too long; possible loop"))
    }

    /// Write `target[key] = value`, following `__newindex` tables and functions
    pub fn newindex_value(
        &mut self,
        target: Value,
        key: Value,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let mut current = target;
        for _ in 0..MAX_META_CHAIN {
            let table = match &current {
                Value::Table(t) => t.clone(),
                other => {
                    return Err(RuntimeError::runtime(format!(
                        "attempt to index a {} value",
                        other.value_type()
                    )));
                }
            };

            // __newindex only applies to absent keys
            let handler = {
                let table = table.borrow();
                if table.get(&key).is_nil() {
                    table
                        .metatable()
                        .map(|mt| mt.borrow().get_str("__newindex"))
                        .unwrap_or_default()
                } else {
                    Value::Nil
                }
            };

            match handler {
                Value::Nil => return table.borrow_mut().set(key, value),
                Value::Function(_) => {
                    self.stack.push(handler);
                    self.stack.push(current);
                    self.stack.push(key);
                    self.stack.push(value);
                    self.call(3, Some(0))?;
                    return Ok(());
                }
                next => current = next,
            }
        }
        Err(RuntimeError::runtime("'__newindex' chain too long; possible loop"))
    }

    /// Field `event` of the value's metatable, or nil
    pub fn metamethod(&self, value: &Value, event: &str) -> Value {
        match value {
            Value::Table(t) => t
                .borrow()
                .metatable()
                .map(|mt| mt.borrow().get_str(event))
                .unwrap_or_default(),
            _ => Value::Nil,
        }
    }

    // Globals

    #[inline]
    pub fn globals(&self) -> &TableRef {
        &self.globals
    }

    /// Push the value of a global
    pub fn get_global(&mut self, name: &str) -> ValueType {
        let value = self.globals.borrow().get_str(name);
        let ty = value.value_type();
        self.stack.push(value);
        ty
    }

    /// Pop a value and assign it to a global
    pub fn set_global(&mut self, name: &str) {
        let value = self.pop_value();
        self.globals.borrow_mut().set_str(name, value);
    }

    // Registry

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Pop the top value and retain it in a fresh registry slot
    pub fn reference(&mut self) -> Slot {
        let value = self.pop_value();
        self.registry.reference(value)
    }

    /// Release a registry slot; returns false if it was not live
    #[inline]
    pub fn release(&mut self, slot: Slot) -> bool {
        self.registry.release(slot)
    }

    /// Push the value held by a slot; pushes nothing for a dead slot
    pub fn push_slot(&mut self, slot: Slot) -> bool {
        match self.registry.get(slot) {
            Some(value) => {
                let value = value.clone();
                self.stack.push(value);
                true
            }
            None => false,
        }
    }

    /// Pop the top value into a live slot, keeping the slot number
    ///
    /// The value is popped even if the slot is dead.
    pub fn overwrite_slot(&mut self, slot: Slot) -> bool {
        let value = self.pop_value();
        self.registry.set(slot, value)
    }

    // Metatables

    /// Push the metatable registered under `name`, creating it if needed
    ///
    /// Returns true if the metatable was created by this call.
    pub fn new_metatable(&mut self, name: &str) -> bool {
        if let Some(mt) = self.registry.named(name) {
            let mt = mt.clone();
            self.stack.push(Value::Table(mt));
            return false;
        }
        let mt = Rc::new(RefCell::new(Table::new()));
        mt.borrow_mut().set_str("__name", Value::string(name));
        self.registry.insert_named(name, mt.clone());
        self.stack.push(Value::Table(mt));
        true
    }

    /// Push the metatable registered under `name`, or nil
    pub fn get_named_metatable(&mut self, name: &str) -> ValueType {
        match self.registry.named(name) {
            Some(mt) => {
                let mt = mt.clone();
                self.stack.push(Value::Table(mt));
                ValueType::Table
            }
            None => {
                self.stack.push(Value::Nil);
                ValueType::Nil
            }
        }
    }

    /// Pop a table (or nil) and make it the metatable of the table at `idx`
    pub fn set_metatable(&mut self, idx: i32) -> Result<(), RuntimeError> {
        let target = self.value(idx).cloned().unwrap_or_default();
        let mt = match self.pop_value() {
            Value::Table(mt) => Some(mt),
            Value::Nil => None,
            other => {
                return Err(RuntimeError::runtime(format!(
                    "metatable must be a table or nil, got {}",
                    other.value_type()
                )));
            }
        };
        match target {
            Value::Table(t) => {
                t.borrow_mut().set_metatable(mt);
                Ok(())
            }
            other => Err(RuntimeError::runtime(format!(
                "cannot set the metatable of a {} value",
                other.value_type()
            ))),
        }
    }

    /// Push the metatable of the value at `idx`; returns false (pushing
    /// nothing) if it has none
    pub fn get_metatable(&mut self, idx: i32) -> bool {
        let mt = self
            .value(idx)
            .and_then(Value::as_table)
            .and_then(|t| t.borrow().metatable().cloned());
        match mt {
            Some(mt) => {
                self.stack.push(Value::Table(mt));
                true
            }
            None => false,
        }
    }

    // Functions

    /// Push a native function without upvalues
    pub fn push_function(&mut self, func: NativeFn) {
        self.stack.push(Value::Function(Rc::new(Closure::new(func))));
    }

    /// Pop `n` upvalues and push a closure bundling them
    pub fn push_closure(&mut self, func: NativeFn, n: usize) -> Result<(), RuntimeError> {
        if n > MAX_UPVALUES {
            return Err(RuntimeError::runtime("too many upvalues"));
        }
        let n = n.min(self.stack.frame_len());
        let upvalues = self.stack.split_off(self.stack.len() - n);
        self.stack
            .push(Value::Function(Rc::new(Closure::with_upvalues(func, upvalues))));
        Ok(())
    }

    /// Install a native function as a named global
    pub fn register(&mut self, name: &str, func: NativeFn) {
        let closure = Closure::new(func).named(name);
        self.globals
            .borrow_mut()
            .set_str(name, Value::Function(Rc::new(closure)));
    }

    /// Upvalue `i` (1-based) of the running closure
    pub fn upvalue(&self, i: usize) -> Option<&Value> {
        self.frames.last().and_then(|frame| frame.func.upvalue(i))
    }

    /// Number of native calls currently running
    #[inline]
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Name of the running closure, used in argument errors
    pub fn current_function_name(&self) -> &str {
        self.frames
            .last()
            .and_then(|frame| frame.func.name.as_deref())
            .unwrap_or("?")
    }

    /// Build a "bad argument" error for the running closure
    pub fn arg_error(&self, arg: i32, msg: &str) -> RuntimeError {
        RuntimeError::runtime(format!(
            "bad argument #{} to '{}' ({})",
            arg,
            self.current_function_name(),
            msg
        ))
    }

    // Calls

    /// Call the function below the top `nargs` values
    ///
    /// With `nresults` set, the results are truncated or padded with nil to
    /// that count; with `None` all results are kept. Returns the number of
    /// results left on the stack. On error, the function and its arguments
    /// have been removed and the error is returned to the caller.
    pub fn call(&mut self, nargs: usize, nresults: Option<usize>) -> Result<usize, RuntimeError> {
        let base = self.stack.frame_base();
        let func_pos = match self.stack.len().checked_sub(nargs + 1) {
            Some(pos) if pos >= base => pos,
            _ => return Err(RuntimeError::runtime("not enough values on the stack for call")),
        };

        let callee = self.stack.get(func_pos).cloned().unwrap_or_default();
        let func = match callee {
            Value::Function(f) => f,
            other => match self.metamethod(&other, "__call") {
                Value::Function(f) => {
                    self.stack.push(Value::Function(f.clone()));
                    self.stack.insert_top(func_pos);
                    f
                }
                _ => {
                    self.stack.truncate(func_pos);
                    return Err(RuntimeError::runtime(format!(
                        "attempt to call a {} value",
                        other.value_type()
                    )));
                }
            },
        };

        if self.frames.len() >= self.max_call_depth {
            self.stack.truncate(func_pos);
            return Err(RuntimeError::runtime("stack overflow"));
        }
        if self.stack.len() >= self.max_stack {
            self.stack.truncate(func_pos);
            return Err(RuntimeError::Memory(format!(
                "stack size exceeds {} slots",
                self.max_stack
            )));
        }

        let prev_base = self.stack.enter_frame(func_pos + 1);
        self.frames.push(CallFrame {
            func: func.clone(),
            prev_base,
        });
        let outcome = (func.func)(self);
        self.frames.pop();
        self.stack.leave_frame(prev_base);

        match outcome {
            Ok(n) => {
                let available = self.stack.len() - (func_pos + 1);
                let n = n.min(available);
                let mut results = self.stack.split_off(self.stack.len() - n);
                self.stack.truncate(func_pos);
                if let Some(wanted) = nresults {
                    results.resize(wanted, Value::Nil);
                }
                let count = results.len();
                self.stack.extend(results);
                Ok(count)
            }
            Err(err) => {
                self.stack.truncate(func_pos);
                Err(err)
            }
        }
    }

    /// Call in protected mode
    ///
    /// On success behaves like `call`. On failure the function and its
    /// arguments are replaced by a single error object.
    pub fn pcall(&mut self, nargs: usize, nresults: Option<usize>) -> CallStatus {
        match self.call(nargs, nresults) {
            Ok(_) => CallStatus::Ok,
            Err(err) => {
                let status = err.status();
                self.stack.push(err.into_value());
                status
            }
        }
    }

    /// Call in protected mode with a message handler at stack index `msgh`
    ///
    /// The handler receives runtime error objects and its result becomes
    /// the error object. If the handler fails, the status is `ErrorInError`.
    pub fn xpcall(&mut self, nargs: usize, nresults: Option<usize>, msgh: i32) -> CallStatus {
        let handler = self.value(msgh).cloned().unwrap_or_default();
        match self.call(nargs, nresults) {
            Ok(_) => CallStatus::Ok,
            Err(err) => {
                let status = err.status();
                if status != CallStatus::Runtime || !handler.is_function() {
                    self.stack.push(err.into_value());
                    return status;
                }

                self.stack.push(handler);
                self.stack.push(err.into_value());
                match self.call(1, Some(1)) {
                    Ok(_) => CallStatus::Runtime,
                    Err(_) => {
                        self.stack.push(Value::string("error in error handling"));
                        CallStatus::ErrorInError
                    }
                }
            }
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}
