//! Operand stack
//!
//! One contiguous vector of values shared by every call frame. The frame
//! base marks where the running function's arguments start; stack indices
//! handed out by `State` are relative to it.

use crate::value::Value;

/// Value stack for runtime calls
pub struct Stack {
    /// Stack storage
    values: Vec<Value>,
    /// Absolute index of the current frame's first slot
    frame_base: usize,
}

impl Stack {
    /// Create a new stack with the given capacity
    pub fn new(capacity: usize) -> Self {
        Stack {
            values: Vec::with_capacity(capacity),
            frame_base: 0,
        }
    }

    /// Push a value onto the stack
    #[inline]
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Pop a value, never below the current frame
    #[inline]
    pub fn pop(&mut self) -> Option<Value> {
        if self.values.len() > self.frame_base {
            self.values.pop()
        } else {
            None
        }
    }

    /// Peek at the top value without removing it
    #[inline]
    pub fn peek(&self) -> Option<&Value> {
        self.values.last()
    }

    /// Value at an absolute index
    #[inline]
    pub fn get(&self, abs: usize) -> Option<&Value> {
        self.values.get(abs)
    }

    /// Overwrite the value at an absolute index
    #[inline]
    pub fn set(&mut self, abs: usize, value: Value) -> Option<()> {
        let slot = self.values.get_mut(abs)?;
        *slot = value;
        Some(())
    }

    /// Total number of values on the stack, across all frames
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of values in the current frame
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.values.len() - self.frame_base
    }

    #[inline]
    pub fn frame_base(&self) -> usize {
        self.frame_base
    }

    /// Switch to a new frame base, returning the previous one
    #[inline]
    pub fn enter_frame(&mut self, base: usize) -> usize {
        std::mem::replace(&mut self.frame_base, base)
    }

    /// Restore the previous frame base
    #[inline]
    pub fn leave_frame(&mut self, prev_base: usize) {
        self.frame_base = prev_base;
    }

    /// Truncate to an absolute length
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    /// Grow or shrink to an absolute length, filling with nil
    pub fn resize(&mut self, len: usize) {
        self.values.resize(len, Value::Nil);
    }

    /// Drop n values from the stack, never below the current frame
    pub fn drop_n(&mut self, n: usize) {
        let new_len = self.values.len().saturating_sub(n).max(self.frame_base);
        self.values.truncate(new_len);
    }

    /// Move the top value to an absolute index, shifting the rest up
    pub fn insert_top(&mut self, abs: usize) -> Option<()> {
        if abs >= self.values.len() {
            return None;
        }
        let top = self.values.pop()?;
        self.values.insert(abs, top);
        Some(())
    }

    /// Remove the value at an absolute index, shifting the rest down
    pub fn remove(&mut self, abs: usize) -> Option<Value> {
        if abs < self.values.len() {
            Some(self.values.remove(abs))
        } else {
            None
        }
    }

    /// Split off everything from an absolute index up
    pub fn split_off(&mut self, abs: usize) -> Vec<Value> {
        self.values.split_off(abs.min(self.values.len()))
    }

    /// Append values to the top
    pub fn extend(&mut self, values: impl IntoIterator<Item = Value>) {
        self.values.extend(values);
    }
}
